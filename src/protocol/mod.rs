//! # Native Protocol Implementation
//!
//! Low-level codec for the binary, frame-based CQL native protocol
//! (versions 1 and 2).
//!
//! ## Overview
//!
//! Every exchange is a frame: an 8-byte header followed by an opcode-specific
//! body. This module provides:
//!
//! - **Byte buffer** - Big-endian primitives and length-prefixed notations
//! - **Value codec** - CQL type descriptors and value (de)serialization
//! - **Message types** - Request/response bodies for every opcode
//! - **Frame** - Header layout and envelope encoding
//! - **Codec** - Async frame splitting for Tokio
//!
//! ## Submodules
//!
//! - [`buffer`] - Positional byte buffer
//! - [`types`] - CQL types and values
//! - [`message`] - Message bodies (STARTUP, QUERY, RESULT, etc.)
//! - [`frame`] - Frame header and envelope
//! - [`codec`] - Tokio codec for async I/O
//! - [`error`] - Protocol error types
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with the protocol directly.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
mod numeric;
pub mod types;
pub mod version;

pub use buffer::{ByteBuffer, Inet};
pub use codec::{Frame, MessageCodec, DEFAULT_MAX_FRAME_SIZE};
pub use error::{CodecError, CodecResult, ProtocolError, ProtocolResult};
pub use frame::{frame_flags, Envelope, FrameHeader, EVENT_STREAM_ID, HEADER_SIZE};
pub use message::{
    AuthenticateMessage, BatchMessage, BatchQuery, BatchStatement, BatchType, ColumnSpec,
    Consistency, CredentialsMessage, ErrorCode, ErrorDetails, ErrorMessage, Event, EventType,
    ExecuteMessage, Message, Metadata, PrepareMessage, PreparedResult, QueryMessage, QueryOptions,
    RegisterMessage, ResultMessage, ResultSet, Row, SaslToken, SchemaChange, StartupMessage,
    SupportedMessage,
};
pub use types::{CqlType, Value};
pub use version::ProtocolVersion;
