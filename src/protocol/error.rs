//! Protocol-level error types.

use std::fmt;
use std::io;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for framed protocol I/O.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes left to read a value
    UnexpectedEof {
        /// Bytes the value needs
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// String bytes are not valid UTF-8
    InvalidUtf8,

    /// A value cannot be represented on the wire (or the wire holds an invalid one)
    InvalidValue(String),

    /// Numeric value does not fit its wire representation
    Overflow(String),

    /// Unknown message opcode
    UnknownOpcode(u8),

    /// Unknown CQL type code or name
    UnknownType(String),

    /// Unknown consistency level code
    UnknownConsistency(u16),

    /// Unknown result kind
    UnknownResultKind(i32),

    /// Protocol version this codec does not speak
    UnsupportedVersion(u8),

    /// Feature not available in the negotiated protocol version
    UnsupportedFeature(String),

    /// Frame has the compression flag set
    CompressionUnsupported,

    /// Frame body exceeds the configured limit
    FrameTooLarge {
        /// Declared body length
        size: usize,
        /// Configured limit
        max: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof { needed, remaining } => write!(
                f,
                "Unexpected end of buffer: need {} bytes, {} remaining",
                needed, remaining
            ),
            CodecError::InvalidUtf8 => write!(f, "Invalid UTF-8 string"),
            CodecError::InvalidValue(msg) => write!(f, "Invalid value: {}", msg),
            CodecError::Overflow(msg) => write!(f, "Overflow: {}", msg),
            CodecError::UnknownOpcode(op) => write!(f, "Unknown opcode: 0x{:02X}", op),
            CodecError::UnknownType(ty) => write!(f, "Unknown type: {}", ty),
            CodecError::UnknownConsistency(c) => write!(f, "Unknown consistency: 0x{:04X}", c),
            CodecError::UnknownResultKind(k) => write!(f, "Unknown result kind: {}", k),
            CodecError::UnsupportedVersion(v) => write!(f, "Unsupported protocol version: {}", v),
            CodecError::UnsupportedFeature(msg) => write!(f, "Unsupported feature: {}", msg),
            CodecError::CompressionUnsupported => write!(f, "Frame compression is not supported"),
            CodecError::FrameTooLarge { size, max } => {
                write!(f, "Frame too large: {} bytes (max: {})", size, max)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors raised by the framed transport.
#[derive(Debug)]
pub enum ProtocolError {
    /// I/O error
    Io(io::Error),

    /// Malformed wire data
    Codec(CodecError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
            ProtocolError::Codec(e) => write!(f, "Codec error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            ProtocolError::Codec(e) => Some(e),
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::Io(err)
    }
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        ProtocolError::Codec(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::UnexpectedEof { needed: 4, remaining: 1 };
        assert!(err.to_string().contains("need 4 bytes"));

        let err = CodecError::UnknownOpcode(0x42);
        assert_eq!(err.to_string(), "Unknown opcode: 0x42");
    }

    #[test]
    fn test_protocol_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: ProtocolError = io_err.into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_protocol_error_from_codec() {
        let err: ProtocolError = CodecError::CompressionUnsupported.into();
        assert!(matches!(err, ProtocolError::Codec(CodecError::CompressionUnsupported)));
    }
}
