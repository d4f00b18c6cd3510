//! Consistency levels and query parameters shared by QUERY, EXECUTE and BATCH.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::protocol::buffer::ByteBuffer;
use crate::protocol::error::{CodecError, CodecResult};

/// Replication acknowledgment level requested for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(u16)]
pub enum Consistency {
    /// Any node, hinted handoff included (writes only)
    Any = 0x0000,
    /// One replica
    One = 0x0001,
    /// Two replicas
    Two = 0x0002,
    /// Three replicas
    Three = 0x0003,
    /// Majority of replicas
    #[default]
    Quorum = 0x0004,
    /// Every replica
    All = 0x0005,
    /// Majority in the local datacenter
    LocalQuorum = 0x0006,
    /// Majority in each datacenter
    EachQuorum = 0x0007,
    /// Serial phase of a lightweight transaction
    Serial = 0x0008,
    /// Datacenter-local serial phase
    LocalSerial = 0x0009,
}

impl Consistency {
    /// Create from the wire code.
    pub fn from_u16(value: u16) -> CodecResult<Self> {
        let level = match value {
            0x0000 => Consistency::Any,
            0x0001 => Consistency::One,
            0x0002 => Consistency::Two,
            0x0003 => Consistency::Three,
            0x0004 => Consistency::Quorum,
            0x0005 => Consistency::All,
            0x0006 => Consistency::LocalQuorum,
            0x0007 => Consistency::EachQuorum,
            0x0008 => Consistency::Serial,
            0x0009 => Consistency::LocalSerial,
            other => return Err(CodecError::UnknownConsistency(other)),
        };
        Ok(level)
    }

    /// Wire code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        }
    }

    /// Whether this level is valid as a serial consistency.
    pub fn is_serial(self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }

    pub(crate) fn read(buf: &mut ByteBuffer) -> CodecResult<Self> {
        Self::from_u16(buf.read_u16()?)
    }

    pub(crate) fn write(self, buf: &mut ByteBuffer) {
        buf.write_u16(self.as_u16());
    }
}

impl FromStr for Consistency {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY" => Consistency::Any,
            "ONE" => Consistency::One,
            "TWO" => Consistency::Two,
            "THREE" => Consistency::Three,
            "QUORUM" => Consistency::Quorum,
            "ALL" => Consistency::All,
            "LOCAL_QUORUM" | "LOCALQUORUM" => Consistency::LocalQuorum,
            "EACH_QUORUM" | "EACHQUORUM" => Consistency::EachQuorum,
            "SERIAL" => Consistency::Serial,
            "LOCAL_SERIAL" | "LOCALSERIAL" => Consistency::LocalSerial,
            _ => return Err(CodecError::InvalidValue(format!("unknown consistency '{}'", s))),
        };
        Ok(level)
    }
}

impl TryFrom<String> for Consistency {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Consistency> for String {
    fn from(level: Consistency) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BATCH type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BatchType {
    /// Atomic batch through the batch log
    #[default]
    Logged = 0,
    /// Non-atomic batch
    Unlogged = 1,
    /// Counter updates only
    Counter = 2,
}

impl BatchType {
    /// Create from the wire byte.
    pub fn from_u8(value: u8) -> CodecResult<Self> {
        match value {
            0 => Ok(BatchType::Logged),
            1 => Ok(BatchType::Unlogged),
            2 => Ok(BatchType::Counter),
            other => Err(CodecError::InvalidValue(format!("batch type {}", other))),
        }
    }
}

impl FromStr for BatchType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logged" => Ok(BatchType::Logged),
            "unlogged" => Ok(BatchType::Unlogged),
            "counter" => Ok(BatchType::Counter),
            _ => Err(CodecError::InvalidValue(format!("unknown batch type '{}'", s))),
        }
    }
}

/// QUERY/EXECUTE option flags (v2).
pub mod query_flags {
    /// Bound values follow
    pub const VALUES: u8 = 0x01;
    /// Ask the server to omit result metadata
    pub const SKIP_METADATA: u8 = 0x02;
    /// Result page size follows
    pub const PAGE_SIZE: u8 = 0x04;
    /// Paging state follows
    pub const PAGING_STATE: u8 = 0x08;
    /// Serial consistency follows
    pub const SERIAL_CONSISTENCY: u8 = 0x10;
}

/// Parameters of a QUERY or EXECUTE.
///
/// The flags byte is computed from the fields at encode time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Consistency level
    pub consistency: Consistency,
    /// Bound values, `None` entries are nulls
    pub values: Option<Vec<Option<Bytes>>>,
    /// Ask the server to omit result metadata
    pub skip_metadata: bool,
    /// Result page size
    pub page_size: Option<i32>,
    /// Continuation token from a previous page
    pub paging_state: Option<Bytes>,
    /// Consistency for the serial phase of conditional updates
    pub serial_consistency: Option<Consistency>,
}

impl QueryOptions {
    /// Options with the given consistency and nothing else.
    pub fn new(consistency: Consistency) -> Self {
        Self {
            consistency,
            ..Default::default()
        }
    }

    /// Set bound values.
    pub fn with_values(mut self, values: Vec<Option<Bytes>>) -> Self {
        self.values = Some(values);
        self
    }

    /// Set page size.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set paging state.
    pub fn with_paging_state(mut self, paging_state: Bytes) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    /// Set serial consistency.
    pub fn with_serial_consistency(mut self, serial: Consistency) -> Self {
        self.serial_consistency = Some(serial);
        self
    }

    /// Set skip-metadata.
    pub fn with_skip_metadata(mut self, skip: bool) -> Self {
        self.skip_metadata = skip;
        self
    }

    /// Flags byte derived from which optional fields are present.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.values.is_some() {
            flags |= query_flags::VALUES;
        }
        if self.skip_metadata {
            flags |= query_flags::SKIP_METADATA;
        }
        if self.page_size.is_some() {
            flags |= query_flags::PAGE_SIZE;
        }
        if self.paging_state.is_some() {
            flags |= query_flags::PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= query_flags::SERIAL_CONSISTENCY;
        }
        flags
    }

    /// Encode the v2 `<consistency><flags>[...]` layout.
    pub fn encode(&self, buf: &mut ByteBuffer) -> CodecResult<()> {
        self.consistency.write(buf);
        buf.write_u8(self.flags());

        if let Some(values) = &self.values {
            write_values(buf, values)?;
        }
        if let Some(page_size) = self.page_size {
            buf.write_i32(page_size);
        }
        if let Some(state) = &self.paging_state {
            buf.write_bytes(Some(state.as_ref()))?;
        }
        if let Some(serial) = self.serial_consistency {
            serial.write(buf);
        }
        Ok(())
    }

    /// Decode the v2 layout.
    pub fn decode(buf: &mut ByteBuffer) -> CodecResult<Self> {
        let consistency = Consistency::read(buf)?;
        let flags = buf.read_u8()?;

        let values = if flags & query_flags::VALUES != 0 {
            Some(read_values(buf)?)
        } else {
            None
        };
        let page_size = if flags & query_flags::PAGE_SIZE != 0 {
            Some(buf.read_i32()?)
        } else {
            None
        };
        let paging_state = if flags & query_flags::PAGING_STATE != 0 {
            buf.read_bytes()?
        } else {
            None
        };
        let serial_consistency = if flags & query_flags::SERIAL_CONSISTENCY != 0 {
            Some(Consistency::read(buf)?)
        } else {
            None
        };

        Ok(Self {
            consistency,
            values,
            skip_metadata: flags & query_flags::SKIP_METADATA != 0,
            page_size,
            paging_state,
            serial_consistency,
        })
    }

    /// Fail when a v1 body cannot carry these options.
    pub(crate) fn check_v1(&self, allow_values: bool) -> CodecResult<()> {
        let unsupported = |what: &str| Err(CodecError::UnsupportedFeature(format!("{} requires protocol v2", what)));
        if self.values.is_some() && !allow_values {
            return unsupported("bound values on QUERY");
        }
        if self.page_size.is_some() || self.paging_state.is_some() {
            return unsupported("paging");
        }
        if self.serial_consistency.is_some() {
            return unsupported("serial consistency");
        }
        if self.skip_metadata {
            return unsupported("skip metadata");
        }
        Ok(())
    }
}

/// Write `<n><value_1>...<value_n>` with `[bytes]` values.
pub(crate) fn write_values(buf: &mut ByteBuffer, values: &[Option<Bytes>]) -> CodecResult<()> {
    buf.write_count(values.len())?;
    for value in values {
        buf.write_bytes(value.as_deref())?;
    }
    Ok(())
}

/// Read `<n><value_1>...<value_n>`.
pub(crate) fn read_values(buf: &mut ByteBuffer) -> CodecResult<Vec<Option<Bytes>>> {
    let count = buf.read_u16()? as usize;
    let mut values = Vec::with_capacity(count.min(buf.remaining() / 4 + 1));
    for _ in 0..count {
        values.push(buf.read_bytes()?);
    }
    Ok(values)
}
