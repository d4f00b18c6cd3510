//! Response message bodies (server to client).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::metadata::{Metadata, ResultSet};
use super::options::Consistency;
use crate::protocol::buffer::{ByteBuffer, Inet};
use crate::protocol::error::{CodecError, CodecResult};
use crate::protocol::version::ProtocolVersion;

/// Native protocol error codes.
pub struct ErrorCode;

impl ErrorCode {
    // Connection-level
    /// Server-side failure
    pub const SERVER_ERROR: i32 = 0x0000;
    /// Malformed request or protocol violation
    pub const PROTOCOL_ERROR: i32 = 0x000A;
    /// Authentication failed
    pub const BAD_CREDENTIALS: i32 = 0x0100;

    // Request execution
    /// Not enough live replicas
    pub const UNAVAILABLE: i32 = 0x1000;
    /// Coordinator is overloaded
    pub const OVERLOADED: i32 = 0x1001;
    /// Coordinator is still bootstrapping
    pub const IS_BOOTSTRAPPING: i32 = 0x1002;
    /// Truncation failed
    pub const TRUNCATE_ERROR: i32 = 0x1003;
    /// Write not acknowledged in time
    pub const WRITE_TIMEOUT: i32 = 0x1100;
    /// Read not answered in time
    pub const READ_TIMEOUT: i32 = 0x1200;

    // Request validation
    /// Query does not parse
    pub const SYNTAX_ERROR: i32 = 0x2000;
    /// Missing permission
    pub const UNAUTHORIZED: i32 = 0x2100;
    /// Query is syntactically valid but invalid
    pub const INVALID: i32 = 0x2200;
    /// Invalid configuration change
    pub const CONFIG_ERROR: i32 = 0x2300;
    /// Keyspace or table already exists
    pub const ALREADY_EXISTS: i32 = 0x2400;
    /// Prepared id unknown to the server
    pub const UNPREPARED: i32 = 0x2500;

    /// Human-readable name of a code.
    pub fn name(code: i32) -> &'static str {
        match code {
            Self::SERVER_ERROR => "Server error",
            Self::PROTOCOL_ERROR => "Protocol error",
            Self::BAD_CREDENTIALS => "Bad credentials",
            Self::UNAVAILABLE => "Unavailable",
            Self::OVERLOADED => "Overloaded",
            Self::IS_BOOTSTRAPPING => "Is bootstrapping",
            Self::TRUNCATE_ERROR => "Truncate error",
            Self::WRITE_TIMEOUT => "Write timeout",
            Self::READ_TIMEOUT => "Read timeout",
            Self::SYNTAX_ERROR => "Syntax error",
            Self::UNAUTHORIZED => "Unauthorized",
            Self::INVALID => "Invalid",
            Self::CONFIG_ERROR => "Config error",
            Self::ALREADY_EXISTS => "Already exists",
            Self::UNPREPARED => "Unprepared",
            _ => "Unknown error",
        }
    }
}

/// Code-specific fields of an ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorDetails {
    /// No additional fields
    #[default]
    None,
    /// Not enough replicas alive
    Unavailable {
        /// Requested consistency
        consistency: Consistency,
        /// Replicas needed
        required: i32,
        /// Replicas known alive
        alive: i32,
    },
    /// Replicas did not acknowledge a write in time
    WriteTimeout {
        /// Requested consistency
        consistency: Consistency,
        /// Acknowledgments received
        received: i32,
        /// Acknowledgments needed
        block_for: i32,
        /// Kind of write, e.g. `SIMPLE` or `BATCH_LOG`
        write_type: String,
    },
    /// Replicas did not answer a read in time
    ReadTimeout {
        /// Requested consistency
        consistency: Consistency,
        /// Responses received
        received: i32,
        /// Responses needed
        block_for: i32,
        /// Whether the replica asked for data answered
        data_present: bool,
    },
    /// Keyspace or table already exists
    AlreadyExists {
        /// Keyspace name
        keyspace: String,
        /// Table name, empty when the keyspace itself exists
        table: String,
    },
    /// Prepared id unknown to the server
    Unprepared {
        /// Statement id the server does not know
        id: Bytes,
    },
}

/// ERROR - a request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Error code, see [`ErrorCode`]
    pub code: i32,
    /// Server message
    pub message: String,
    /// Code-specific fields
    pub details: ErrorDetails,
}

impl ErrorMessage {
    /// Error without details.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: ErrorDetails::None,
        }
    }

    /// Error with details.
    pub fn with_details(code: i32, message: impl Into<String>, details: ErrorDetails) -> Self {
        Self {
            code,
            message: message.into(),
            details,
        }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_i32(self.code);
        buf.write_string(&self.message)?;

        match (self.code, &self.details) {
            (ErrorCode::UNAVAILABLE, ErrorDetails::Unavailable { consistency, required, alive }) => {
                consistency.write(buf);
                buf.write_i32(*required);
                buf.write_i32(*alive);
            }
            (
                ErrorCode::WRITE_TIMEOUT,
                ErrorDetails::WriteTimeout { consistency, received, block_for, write_type },
            ) => {
                consistency.write(buf);
                buf.write_i32(*received);
                buf.write_i32(*block_for);
                buf.write_string(write_type)?;
            }
            (
                ErrorCode::READ_TIMEOUT,
                ErrorDetails::ReadTimeout { consistency, received, block_for, data_present },
            ) => {
                consistency.write(buf);
                buf.write_i32(*received);
                buf.write_i32(*block_for);
                buf.write_u8(u8::from(*data_present));
            }
            (ErrorCode::ALREADY_EXISTS, ErrorDetails::AlreadyExists { keyspace, table }) => {
                buf.write_string(keyspace)?;
                buf.write_string(table)?;
            }
            (ErrorCode::UNPREPARED, ErrorDetails::Unprepared { id }) => {
                buf.write_short_bytes(id)?;
            }
            (
                ErrorCode::UNAVAILABLE
                | ErrorCode::WRITE_TIMEOUT
                | ErrorCode::READ_TIMEOUT
                | ErrorCode::ALREADY_EXISTS
                | ErrorCode::UNPREPARED,
                _,
            ) => {
                return Err(CodecError::InvalidValue(format!(
                    "error 0x{:04X} requires matching details",
                    self.code
                )));
            }
            (_, ErrorDetails::None) => {}
            (code, details) => {
                return Err(CodecError::InvalidValue(format!(
                    "error 0x{:04X} cannot carry {:?}",
                    code, details
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let code = buf.read_i32()?;
        let message = buf.read_string()?;

        let details = match code {
            ErrorCode::UNAVAILABLE => ErrorDetails::Unavailable {
                consistency: Consistency::read(buf)?,
                required: buf.read_i32()?,
                alive: buf.read_i32()?,
            },
            ErrorCode::WRITE_TIMEOUT => ErrorDetails::WriteTimeout {
                consistency: Consistency::read(buf)?,
                received: buf.read_i32()?,
                block_for: buf.read_i32()?,
                write_type: buf.read_string()?,
            },
            ErrorCode::READ_TIMEOUT => ErrorDetails::ReadTimeout {
                consistency: Consistency::read(buf)?,
                received: buf.read_i32()?,
                block_for: buf.read_i32()?,
                data_present: buf.read_u8()? != 0,
            },
            ErrorCode::ALREADY_EXISTS => ErrorDetails::AlreadyExists {
                keyspace: buf.read_string()?,
                table: buf.read_string()?,
            },
            ErrorCode::UNPREPARED => ErrorDetails::Unprepared {
                id: buf.read_short_bytes()?.unwrap_or_default(),
            },
            _ => ErrorDetails::None,
        };

        Ok(Self { code, message, details })
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X}): {}", ErrorCode::name(self.code), self.code, self.message)
    }
}

/// AUTHENTICATE - the server requires authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    /// Fully qualified authenticator class
    pub authenticator: String,
}

impl AuthenticateMessage {
    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_string(&self.authenticator)
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self { authenticator: buf.read_string()? })
    }
}

/// SUPPORTED - answer to OPTIONS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SupportedMessage {
    /// Supported startup option values
    pub options: BTreeMap<String, Vec<String>>,
}

impl SupportedMessage {
    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_string_multimap(&self.options)
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self { options: buf.read_string_multimap()? })
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Result kinds.
pub mod result_kind {
    /// No payload
    pub const VOID: i32 = 0x0001;
    /// Rows with metadata
    pub const ROWS: i32 = 0x0002;
    /// Answer to `USE`
    pub const SET_KEYSPACE: i32 = 0x0003;
    /// Prepared statement id and metadata
    pub const PREPARED: i32 = 0x0004;
    /// Schema altered
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

/// Payload of a PREPARED result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedResult {
    /// Statement id
    pub id: Bytes,
    /// Bind marker metadata
    pub metadata: Metadata,
    /// Result column metadata (v2 and later)
    pub result_metadata: Option<Metadata>,
}

/// Schema modification notice, used by results and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// `CREATED`, `UPDATED` or `DROPPED`
    pub change: String,
    /// Keyspace
    pub keyspace: String,
    /// Table, empty for keyspace-level changes
    pub table: String,
}

impl SchemaChange {
    fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_string(&self.change)?;
        buf.write_string(&self.keyspace)?;
        buf.write_string(&self.table)
    }

    fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self {
            change: buf.read_string()?,
            keyspace: buf.read_string()?,
            table: buf.read_string()?,
        })
    }
}

/// RESULT - outcome of QUERY, PREPARE, EXECUTE or BATCH.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultMessage {
    /// No content
    Void,
    /// A page of rows
    Rows(ResultSet),
    /// Answer to `USE`
    SetKeyspace(String),
    /// Answer to PREPARE
    Prepared(PreparedResult),
    /// Answer to a schema-altering statement
    SchemaChange(SchemaChange),
}

impl ResultMessage {
    /// Result kind code.
    pub fn kind(&self) -> i32 {
        match self {
            ResultMessage::Void => result_kind::VOID,
            ResultMessage::Rows(_) => result_kind::ROWS,
            ResultMessage::SetKeyspace(_) => result_kind::SET_KEYSPACE,
            ResultMessage::Prepared(_) => result_kind::PREPARED,
            ResultMessage::SchemaChange(_) => result_kind::SCHEMA_CHANGE,
        }
    }

    /// Result kind name.
    pub fn name(&self) -> &'static str {
        match self {
            ResultMessage::Void => "VOID",
            ResultMessage::Rows(_) => "ROWS",
            ResultMessage::SetKeyspace(_) => "SET_KEYSPACE",
            ResultMessage::Prepared(_) => "PREPARED",
            ResultMessage::SchemaChange(_) => "SCHEMA_CHANGE",
        }
    }

    /// Rows, if this is a rows result.
    pub fn into_rows(self) -> Option<ResultSet> {
        match self {
            ResultMessage::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<()> {
        buf.write_i32(self.kind());
        match self {
            ResultMessage::Void => Ok(()),
            ResultMessage::Rows(rows) => rows.encode(buf),
            ResultMessage::SetKeyspace(keyspace) => buf.write_string(keyspace),
            ResultMessage::Prepared(prepared) => {
                buf.write_short_bytes(&prepared.id)?;
                prepared.metadata.encode(buf)?;
                if version.prepared_has_result_metadata() {
                    prepared
                        .result_metadata
                        .clone()
                        .unwrap_or_else(|| Metadata::without_columns(0))
                        .encode(buf)?;
                }
                Ok(())
            }
            ResultMessage::SchemaChange(change) => change.encode(buf),
        }
    }

    pub(crate) fn decode(buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<Self> {
        let kind = buf.read_i32()?;
        let result = match kind {
            result_kind::VOID => ResultMessage::Void,
            result_kind::ROWS => ResultMessage::Rows(ResultSet::decode(buf)?),
            result_kind::SET_KEYSPACE => ResultMessage::SetKeyspace(buf.read_string()?),
            result_kind::PREPARED => {
                let id = buf.read_short_bytes()?.unwrap_or_default();
                let metadata = Metadata::decode(buf)?;
                let result_metadata = if version.prepared_has_result_metadata() {
                    Some(Metadata::decode(buf)?)
                } else {
                    None
                };
                ResultMessage::Prepared(PreparedResult { id, metadata, result_metadata })
            }
            result_kind::SCHEMA_CHANGE => ResultMessage::SchemaChange(SchemaChange::decode(buf)?),
            other => return Err(CodecError::UnknownResultKind(other)),
        };
        Ok(result)
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// Server event types accepted by REGISTER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Node added, removed or moved
    TopologyChange,
    /// Node up or down
    StatusChange,
    /// Keyspace or table created, updated or dropped
    SchemaChange,
}

impl EventType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TopologyChange => "TOPOLOGY_CHANGE",
            EventType::StatusChange => "STATUS_CHANGE",
            EventType::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}

impl FromStr for EventType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOPOLOGY_CHANGE" => Ok(EventType::TopologyChange),
            "STATUS_CHANGE" => Ok(EventType::StatusChange),
            "SCHEMA_CHANGE" => Ok(EventType::SchemaChange),
            other => Err(CodecError::InvalidValue(format!("unknown event type '{}'", other))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EVENT - unsolicited server notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `NEW_NODE`, `REMOVED_NODE` or `MOVED_NODE`
    TopologyChange {
        /// Change kind
        change: String,
        /// Node address
        address: Inet,
    },
    /// `UP` or `DOWN`
    StatusChange {
        /// Change kind
        change: String,
        /// Node address
        address: Inet,
    },
    /// Schema modification
    SchemaChange(SchemaChange),
}

impl Event {
    /// Type of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TopologyChange { .. } => EventType::TopologyChange,
            Event::StatusChange { .. } => EventType::StatusChange,
            Event::SchemaChange(_) => EventType::SchemaChange,
        }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_string(self.event_type().as_str())?;
        match self {
            Event::TopologyChange { change, address } | Event::StatusChange { change, address } => {
                buf.write_string(change)?;
                buf.write_inet(address);
                Ok(())
            }
            Event::SchemaChange(change) => change.encode(buf),
        }
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let event_type: EventType = buf.read_string()?.parse()?;
        let event = match event_type {
            EventType::TopologyChange => Event::TopologyChange {
                change: buf.read_string()?,
                address: buf.read_inet()?,
            },
            EventType::StatusChange => Event::StatusChange {
                change: buf.read_string()?,
                address: buf.read_inet()?,
            },
            EventType::SchemaChange => Event::SchemaChange(SchemaChange::decode(buf)?),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::metadata::ColumnSpec;
    use crate::protocol::types::CqlType;

    fn round_trip_error(error: ErrorMessage) -> ErrorMessage {
        let mut buf = ByteBuffer::new();
        error.encode(&mut buf).unwrap();
        buf.rewind();
        let decoded = ErrorMessage::decode(&mut buf).unwrap();
        assert_eq!(buf.remaining(), 0);
        decoded
    }

    #[test]
    fn test_error_details_by_code() {
        let cases = vec![
            ErrorMessage::with_details(
                ErrorCode::UNAVAILABLE,
                "not enough replicas",
                ErrorDetails::Unavailable { consistency: Consistency::Quorum, required: 2, alive: 1 },
            ),
            ErrorMessage::with_details(
                ErrorCode::WRITE_TIMEOUT,
                "timeout",
                ErrorDetails::WriteTimeout {
                    consistency: Consistency::One,
                    received: 0,
                    block_for: 1,
                    write_type: "SIMPLE".to_string(),
                },
            ),
            ErrorMessage::with_details(
                ErrorCode::READ_TIMEOUT,
                "timeout",
                ErrorDetails::ReadTimeout {
                    consistency: Consistency::All,
                    received: 2,
                    block_for: 3,
                    data_present: true,
                },
            ),
            ErrorMessage::with_details(
                ErrorCode::ALREADY_EXISTS,
                "exists",
                ErrorDetails::AlreadyExists { keyspace: "ks".to_string(), table: "t".to_string() },
            ),
            ErrorMessage::with_details(
                ErrorCode::UNPREPARED,
                "unknown id",
                ErrorDetails::Unprepared { id: Bytes::from_static(&[0xDE, 0xAD]) },
            ),
            ErrorMessage::new(ErrorCode::SYNTAX_ERROR, "line 1:0 no viable alternative"),
        ];

        for error in cases {
            assert_eq!(round_trip_error(error.clone()), error);
        }
    }

    #[test]
    fn test_read_timeout_data_present_byte() {
        let error = ErrorMessage::with_details(
            ErrorCode::READ_TIMEOUT,
            "",
            ErrorDetails::ReadTimeout {
                consistency: Consistency::One,
                received: 0,
                block_for: 1,
                data_present: false,
            },
        );
        let mut buf = ByteBuffer::new();
        error.encode(&mut buf).unwrap();
        assert_eq!(*buf.as_slice().last().unwrap(), 0);
    }

    #[test]
    fn test_error_details_must_match_code() {
        let error = ErrorMessage::new(ErrorCode::UNAVAILABLE, "missing details");
        assert!(error.encode(&mut ByteBuffer::new()).is_err());

        let error = ErrorMessage::with_details(
            ErrorCode::INVALID,
            "wrong details",
            ErrorDetails::Unprepared { id: Bytes::from_static(&[1]) },
        );
        assert!(error.encode(&mut ByteBuffer::new()).is_err());
    }

    #[test]
    fn test_error_display() {
        let error = ErrorMessage::new(ErrorCode::INVALID, "unconfigured columnfamily");
        assert_eq!(error.to_string(), "Invalid (0x2200): unconfigured columnfamily");
    }

    #[test]
    fn test_prepared_result_versions() {
        let prepared = ResultMessage::Prepared(PreparedResult {
            id: Bytes::from_static(&[9, 9]),
            metadata: Metadata::new(vec![ColumnSpec::new("ks", "t", "k", CqlType::Int)]),
            result_metadata: Some(Metadata::new(vec![ColumnSpec::new("ks", "t", "v", CqlType::Text)])),
        });

        let mut buf = ByteBuffer::new();
        prepared.encode(&mut buf, ProtocolVersion::V2).unwrap();
        buf.rewind();
        assert_eq!(ResultMessage::decode(&mut buf, ProtocolVersion::V2).unwrap(), prepared);

        let mut buf = ByteBuffer::new();
        prepared.encode(&mut buf, ProtocolVersion::V1).unwrap();
        buf.rewind();
        match ResultMessage::decode(&mut buf, ProtocolVersion::V1).unwrap() {
            ResultMessage::Prepared(p) => assert!(p.result_metadata.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_result_kind() {
        let mut buf = ByteBuffer::from_bytes(vec![0, 0, 0, 9]);
        assert_eq!(
            ResultMessage::decode(&mut buf, ProtocolVersion::V2).unwrap_err(),
            CodecError::UnknownResultKind(9)
        );
    }

    #[test]
    fn test_events() {
        let events = vec![
            Event::StatusChange {
                change: "DOWN".to_string(),
                address: Inet::with_port("10.0.0.2".parse().unwrap(), 9042),
            },
            Event::SchemaChange(SchemaChange {
                change: "CREATED".to_string(),
                keyspace: "ks".to_string(),
                table: String::new(),
            }),
        ];
        for event in events {
            let mut buf = ByteBuffer::new();
            event.encode(&mut buf).unwrap();
            buf.rewind();
            assert_eq!(Event::decode(&mut buf).unwrap(), event);
        }
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!("STATUS_CHANGE".parse::<EventType>().unwrap(), EventType::StatusChange);
        assert!("status_change".parse::<EventType>().is_err());
    }
}
