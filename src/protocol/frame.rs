//! Frame header and envelope.
//!
//! ```text
//! +---------+-------+--------+--------+-----------------+
//! | version | flags | stream | opcode | length (u32 BE) |
//! +---------+-------+--------+--------+-----------------+
//! ```
//!
//! The high bit of the version byte marks a response.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::buffer::ByteBuffer;
use super::error::{CodecError, CodecResult};
use super::message::Message;
use super::version::ProtocolVersion;

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 8;

/// Direction bit in the version byte.
pub const RESPONSE_BIT: u8 = 0x80;

/// Stream id used by the server for EVENT frames.
pub const EVENT_STREAM_ID: i8 = -1;

/// Frame header flags.
pub mod frame_flags {
    /// Body is compressed
    pub const COMPRESSION: u8 = 0x01;
    /// Request tracing; responses carry a trace id first
    pub const TRACING: u8 = 0x02;
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version
    pub version: ProtocolVersion,
    /// Whether the frame is a response
    pub is_response: bool,
    /// Flag bits, see [`frame_flags`]
    pub flags: u8,
    /// Stream id
    pub stream_id: i8,
    /// Opcode of the body
    pub opcode: u8,
    /// Body length in bytes
    pub length: u32,
}

impl FrameHeader {
    /// Parse a header from exactly [`HEADER_SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::UnexpectedEof {
                needed: HEADER_SIZE,
                remaining: bytes.len(),
            });
        }

        let version = ProtocolVersion::from_u8(bytes[0] & !RESPONSE_BIT)?;
        Ok(Self {
            version,
            is_response: bytes[0] & RESPONSE_BIT != 0,
            flags: bytes[1],
            stream_id: bytes[2] as i8,
            opcode: bytes[3],
            length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Write the header.
    pub fn write(&self, dst: &mut BytesMut) {
        let direction = if self.is_response { RESPONSE_BIT } else { 0 };
        dst.put_u8(self.version.as_u8() | direction);
        dst.put_u8(self.flags);
        dst.put_i8(self.stream_id);
        dst.put_u8(self.opcode);
        dst.put_u32(self.length);
    }

    /// Whether the body is compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & frame_flags::COMPRESSION != 0
    }

    /// Whether tracing was requested or reported.
    pub fn is_tracing(&self) -> bool {
        self.flags & frame_flags::TRACING != 0
    }
}

/// A message together with its frame metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Protocol version of the frame
    pub version: ProtocolVersion,
    /// Whether the frame is a response
    pub is_response: bool,
    /// Stream id
    pub stream_id: i8,
    /// Flag bits, see [`frame_flags`]
    pub flags: u8,
    /// Trace session id of a traced response
    pub trace_id: Option<Uuid>,
    /// Message body
    pub message: Message,
}

impl Envelope {
    /// Request envelope on a stream.
    pub fn request(version: ProtocolVersion, stream_id: i8, message: Message) -> Self {
        Self {
            version,
            is_response: false,
            stream_id,
            flags: 0,
            trace_id: None,
            message,
        }
    }

    /// Response envelope on a stream.
    pub fn response(version: ProtocolVersion, stream_id: i8, message: Message) -> Self {
        Self {
            version,
            is_response: true,
            stream_id,
            flags: 0,
            trace_id: None,
            message,
        }
    }

    /// Request tracing for this request.
    pub fn with_tracing(mut self) -> Self {
        self.flags |= frame_flags::TRACING;
        self
    }

    /// Attach a trace id to a response.
    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.flags |= frame_flags::TRACING;
        self.trace_id = Some(trace_id);
        self
    }

    /// Whether this is a server event.
    pub fn is_event(&self) -> bool {
        self.stream_id == EVENT_STREAM_ID && matches!(self.message, Message::Event(_))
    }

    /// Encode header and body.
    pub fn encode(&self, dst: &mut BytesMut) -> CodecResult<()> {
        if self.flags & frame_flags::COMPRESSION != 0 {
            return Err(CodecError::CompressionUnsupported);
        }

        let mut body = ByteBuffer::new();
        if self.is_response && self.flags & frame_flags::TRACING != 0 {
            let trace_id = self.trace_id.ok_or_else(|| {
                CodecError::InvalidValue("traced response without trace id".to_string())
            })?;
            body.write_uuid(&trace_id);
        }
        self.message.encode_into(&mut body, self.version)?;

        let length = u32::try_from(body.len())
            .map_err(|_| CodecError::Overflow(format!("frame body of {} bytes", body.len())))?;
        let header = FrameHeader {
            version: self.version,
            is_response: self.is_response,
            flags: self.flags,
            stream_id: self.stream_id,
            opcode: self.message.opcode(),
            length,
        };

        dst.reserve(HEADER_SIZE + body.len());
        header.write(dst);
        dst.put_slice(body.as_slice());
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> CodecResult<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode a body for an already parsed header.
    pub fn decode(header: &FrameHeader, body: &[u8]) -> CodecResult<Self> {
        if header.is_compressed() {
            return Err(CodecError::CompressionUnsupported);
        }

        let mut buf = ByteBuffer::from_bytes(body);
        let trace_id = if header.is_response && header.is_tracing() {
            Some(buf.read_uuid()?)
        } else {
            None
        };
        let message = Message::decode(header.opcode, &mut buf, header.version)?;

        Ok(Self {
            version: header.version,
            is_response: header.is_response,
            stream_id: header.stream_id,
            flags: header.flags,
            trace_id,
            message,
        })
    }
}
