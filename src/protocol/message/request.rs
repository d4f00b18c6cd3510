//! Request message bodies (client to server).

use std::collections::BTreeMap;

use bytes::Bytes;

use super::options::{read_values, write_values, BatchType, Consistency, QueryOptions};
use super::response::EventType;
use crate::protocol::buffer::ByteBuffer;
use crate::protocol::error::{CodecError, CodecResult};
use crate::protocol::version::ProtocolVersion;

/// CQL language version announced in STARTUP.
pub const CQL_VERSION: &str = "3.1.0";

/// STARTUP option key for the CQL version.
pub const STARTUP_CQL_VERSION: &str = "CQL_VERSION";

/// STARTUP option key for compression.
pub const STARTUP_COMPRESSION: &str = "COMPRESSION";

/// STARTUP - initialize the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    /// Startup options
    pub options: BTreeMap<String, String>,
}

impl StartupMessage {
    /// STARTUP announcing the given CQL version.
    pub fn new(cql_version: impl Into<String>) -> Self {
        let mut options = BTreeMap::new();
        options.insert(STARTUP_CQL_VERSION.to_string(), cql_version.into());
        Self { options }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_string_map(&self.options)
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self { options: buf.read_string_map()? })
    }
}

impl Default for StartupMessage {
    fn default() -> Self {
        Self::new(CQL_VERSION)
    }
}

/// CREDENTIALS - v1 authentication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CredentialsMessage {
    /// Credential pairs, typically `username` and `password`
    pub credentials: BTreeMap<String, String>,
}

impl CredentialsMessage {
    /// Username/password credentials.
    pub fn username_password(username: &str, password: &str) -> Self {
        let mut credentials = BTreeMap::new();
        credentials.insert("username".to_string(), username.to_string());
        credentials.insert("password".to_string(), password.to_string());
        Self { credentials }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_string_map(&self.credentials)
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self { credentials: buf.read_string_map()? })
    }
}

/// QUERY - run a CQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    /// CQL text
    pub query: String,
    /// Query parameters
    pub options: QueryOptions,
}

impl QueryMessage {
    /// Create a QUERY.
    pub fn new(query: impl Into<String>, options: QueryOptions) -> Self {
        Self { query: query.into(), options }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<()> {
        buf.write_long_string(&self.query)?;
        if version.supports_query_flags() {
            self.options.encode(buf)
        } else {
            self.options.check_v1(false)?;
            self.options.consistency.write(buf);
            Ok(())
        }
    }

    pub(crate) fn decode(buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<Self> {
        let query = buf.read_long_string()?;
        let options = if version.supports_query_flags() {
            QueryOptions::decode(buf)?
        } else {
            QueryOptions::new(Consistency::read(buf)?)
        };
        Ok(Self { query, options })
    }
}

/// PREPARE - prepare a CQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareMessage {
    /// CQL text
    pub query: String,
}

impl PrepareMessage {
    /// Create a PREPARE.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into() }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_long_string(&self.query)
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self { query: buf.read_long_string()? })
    }
}

/// EXECUTE - run a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteMessage {
    /// Prepared statement id
    pub id: Bytes,
    /// Query parameters, including bound values
    pub options: QueryOptions,
}

impl ExecuteMessage {
    /// Create an EXECUTE.
    pub fn new(id: Bytes, options: QueryOptions) -> Self {
        Self { id, options }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<()> {
        buf.write_short_bytes(&self.id)?;
        if version.supports_query_flags() {
            self.options.encode(buf)
        } else {
            self.options.check_v1(true)?;
            write_values(buf, self.options.values.as_deref().unwrap_or(&[]))?;
            self.options.consistency.write(buf);
            Ok(())
        }
    }

    pub(crate) fn decode(buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<Self> {
        let id = buf.read_short_bytes()?.unwrap_or_default();
        let options = if version.supports_query_flags() {
            QueryOptions::decode(buf)?
        } else {
            let values = read_values(buf)?;
            QueryOptions::new(Consistency::read(buf)?).with_values(values)
        };
        Ok(Self { id, options })
    }
}

/// REGISTER - subscribe to server events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMessage {
    /// Event types to receive
    pub events: Vec<EventType>,
}

impl RegisterMessage {
    /// Create a REGISTER.
    pub fn new(events: Vec<EventType>) -> Self {
        Self { events }
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        let names: Vec<&str> = self.events.iter().map(|e| e.as_str()).collect();
        buf.write_string_list(&names)
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let events = buf
            .read_string_list()?
            .iter()
            .map(|name| name.parse())
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { events })
    }
}

/// Statement of one batch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatement {
    /// Inline CQL text
    Query(String),
    /// Prepared statement id
    Prepared(Bytes),
}

impl BatchStatement {
    const KIND_QUERY: u8 = 0;
    const KIND_PREPARED: u8 = 1;
}

/// One entry of a BATCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    /// Statement
    pub statement: BatchStatement,
    /// Bound values
    pub values: Vec<Option<Bytes>>,
}

impl BatchQuery {
    /// Inline query entry.
    pub fn query(query: impl Into<String>, values: Vec<Option<Bytes>>) -> Self {
        Self {
            statement: BatchStatement::Query(query.into()),
            values,
        }
    }

    /// Prepared statement entry.
    pub fn prepared(id: Bytes, values: Vec<Option<Bytes>>) -> Self {
        Self {
            statement: BatchStatement::Prepared(id),
            values,
        }
    }
}

/// BATCH - run several modifications together (v2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchMessage {
    /// Batch type
    pub batch_type: BatchType,
    /// Entries in execution order
    pub queries: Vec<BatchQuery>,
    /// Consistency level
    pub consistency: Consistency,
}

impl BatchMessage {
    /// Create an empty batch.
    pub fn new(batch_type: BatchType, consistency: Consistency) -> Self {
        Self {
            batch_type,
            queries: Vec::new(),
            consistency,
        }
    }

    /// Append an entry.
    pub fn add(&mut self, query: BatchQuery) {
        self.queries.push(query);
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<()> {
        if !version.supports_batch() {
            return Err(CodecError::UnsupportedFeature("BATCH requires protocol v2".to_string()));
        }
        buf.write_u8(self.batch_type as u8);
        buf.write_count(self.queries.len())?;
        for entry in &self.queries {
            match &entry.statement {
                BatchStatement::Query(query) => {
                    buf.write_u8(BatchStatement::KIND_QUERY);
                    buf.write_long_string(query)?;
                }
                BatchStatement::Prepared(id) => {
                    buf.write_u8(BatchStatement::KIND_PREPARED);
                    buf.write_short_bytes(id)?;
                }
            }
            write_values(buf, &entry.values)?;
        }
        self.consistency.write(buf);
        Ok(())
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let batch_type = BatchType::from_u8(buf.read_u8()?)?;
        let count = buf.read_u16()? as usize;
        let mut queries = Vec::with_capacity(count.min(buf.remaining() / 4 + 1));
        for _ in 0..count {
            let statement = match buf.read_u8()? {
                BatchStatement::KIND_QUERY => BatchStatement::Query(buf.read_long_string()?),
                BatchStatement::KIND_PREPARED => {
                    BatchStatement::Prepared(buf.read_short_bytes()?.unwrap_or_default())
                }
                other => {
                    return Err(CodecError::InvalidValue(format!("batch entry kind {}", other)));
                }
            };
            let values = read_values(buf)?;
            queries.push(BatchQuery { statement, values });
        }
        let consistency = Consistency::read(buf)?;
        Ok(Self {
            batch_type,
            queries,
            consistency,
        })
    }
}

/// SASL token carried by AUTH_CHALLENGE, AUTH_RESPONSE and AUTH_SUCCESS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslToken {
    /// Token bytes, may be null
    pub token: Option<Bytes>,
}

impl SaslToken {
    /// Wrap a token.
    pub fn new(token: impl Into<Bytes>) -> Self {
        Self { token: Some(token.into()) }
    }

    /// SASL PLAIN initial response: `\0username\0password`.
    pub fn plain(username: &str, password: &str) -> Self {
        let mut token = Vec::with_capacity(username.len() + password.len() + 2);
        token.push(0);
        token.extend_from_slice(username.as_bytes());
        token.push(0);
        token.extend_from_slice(password.as_bytes());
        Self::new(token)
    }

    pub(crate) fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        buf.write_bytes(self.token.as_deref())
    }

    pub(crate) fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Ok(Self { token: buf.read_bytes()? })
    }
}
