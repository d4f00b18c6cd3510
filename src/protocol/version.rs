//! Native protocol version definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{CodecError, CodecResult};

/// Native protocol versions understood by this crate.
///
/// The version byte of a frame carries the version in its low 7 bits and the
/// response direction in the high bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Protocol v1 (Cassandra 1.2)
    V1 = 1,
    /// Protocol v2 (Cassandra 2.0) - paging, batches, SASL
    #[default]
    V2 = 2,
}

impl ProtocolVersion {
    /// Highest supported version.
    pub const MAX: ProtocolVersion = ProtocolVersion::V2;

    /// Create from the low 7 bits of a frame version byte.
    pub fn from_u8(value: u8) -> CodecResult<Self> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    /// Raw version number.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether query options carry a flags byte (paging, serial consistency).
    pub fn supports_query_flags(self) -> bool {
        self >= ProtocolVersion::V2
    }

    /// Whether BATCH and the SASL auth messages exist.
    pub fn supports_batch(self) -> bool {
        self >= ProtocolVersion::V2
    }

    /// Whether PREPARED results carry result metadata.
    pub fn prepared_has_result_metadata(self) -> bool {
        self >= ProtocolVersion::V2
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value)
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        version.as_u8()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(ProtocolVersion::from_u8(1).unwrap(), ProtocolVersion::V1);
        assert_eq!(ProtocolVersion::from_u8(2).unwrap(), ProtocolVersion::V2);
        assert_eq!(
            ProtocolVersion::from_u8(3).unwrap_err(),
            CodecError::UnsupportedVersion(3)
        );
    }

    #[test]
    fn test_version_features() {
        assert!(!ProtocolVersion::V1.supports_query_flags());
        assert!(ProtocolVersion::V2.supports_batch());
        assert_eq!(ProtocolVersion::default(), ProtocolVersion::MAX);
    }
}
