//! Native protocol message types.
//!
//! Every frame body is one of the messages below, selected by the frame
//! opcode. Request and response bodies live in their own modules; the
//! [`Message`] enum ties them to opcodes.

pub mod metadata;
pub mod options;
pub mod request;
pub mod response;

pub use metadata::*;
pub use options::*;
pub use request::*;
pub use response::*;

use bytes::Bytes;

use super::buffer::ByteBuffer;
use super::error::{CodecError, CodecResult};
use super::version::ProtocolVersion;

/// Frame opcodes.
pub mod opcode {
    /// ERROR (0x00)
    pub const ERROR: u8 = 0x00;
    /// STARTUP (0x01)
    pub const STARTUP: u8 = 0x01;
    /// READY (0x02)
    pub const READY: u8 = 0x02;
    /// AUTHENTICATE (0x03)
    pub const AUTHENTICATE: u8 = 0x03;
    /// CREDENTIALS (0x04) - v1 only
    pub const CREDENTIALS: u8 = 0x04;
    /// OPTIONS (0x05)
    pub const OPTIONS: u8 = 0x05;
    /// SUPPORTED (0x06)
    pub const SUPPORTED: u8 = 0x06;
    /// QUERY (0x07)
    pub const QUERY: u8 = 0x07;
    /// RESULT (0x08)
    pub const RESULT: u8 = 0x08;
    /// PREPARE (0x09)
    pub const PREPARE: u8 = 0x09;
    /// EXECUTE (0x0A)
    pub const EXECUTE: u8 = 0x0A;
    /// REGISTER (0x0B)
    pub const REGISTER: u8 = 0x0B;
    /// EVENT (0x0C)
    pub const EVENT: u8 = 0x0C;
    /// BATCH (0x0D) - v2+
    pub const BATCH: u8 = 0x0D;
    /// AUTH_CHALLENGE (0x0E) - v2+
    pub const AUTH_CHALLENGE: u8 = 0x0E;
    /// AUTH_RESPONSE (0x0F) - v2+
    pub const AUTH_RESPONSE: u8 = 0x0F;
    /// AUTH_SUCCESS (0x10) - v2+
    pub const AUTH_SUCCESS: u8 = 0x10;
}

/// A decoded frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request failed
    Error(ErrorMessage),
    /// Connection initialization
    Startup(StartupMessage),
    /// Server is ready for queries
    Ready,
    /// Server requires authentication
    Authenticate(AuthenticateMessage),
    /// v1 credentials
    Credentials(CredentialsMessage),
    /// Ask for supported startup options
    Options,
    /// Supported startup options
    Supported(SupportedMessage),
    /// Run a CQL statement
    Query(QueryMessage),
    /// Statement outcome
    Result(ResultMessage),
    /// Prepare a CQL statement
    Prepare(PrepareMessage),
    /// Run a prepared statement
    Execute(ExecuteMessage),
    /// Subscribe to server events
    Register(RegisterMessage),
    /// Server event
    Event(Event),
    /// Run several statements together
    Batch(BatchMessage),
    /// SASL challenge from the server
    AuthChallenge(SaslToken),
    /// SASL response from the client
    AuthResponse(SaslToken),
    /// SASL exchange finished
    AuthSuccess(SaslToken),
}

impl Message {
    /// Opcode carried in the frame header.
    pub fn opcode(&self) -> u8 {
        match self {
            Message::Error(_) => opcode::ERROR,
            Message::Startup(_) => opcode::STARTUP,
            Message::Ready => opcode::READY,
            Message::Authenticate(_) => opcode::AUTHENTICATE,
            Message::Credentials(_) => opcode::CREDENTIALS,
            Message::Options => opcode::OPTIONS,
            Message::Supported(_) => opcode::SUPPORTED,
            Message::Query(_) => opcode::QUERY,
            Message::Result(_) => opcode::RESULT,
            Message::Prepare(_) => opcode::PREPARE,
            Message::Execute(_) => opcode::EXECUTE,
            Message::Register(_) => opcode::REGISTER,
            Message::Event(_) => opcode::EVENT,
            Message::Batch(_) => opcode::BATCH,
            Message::AuthChallenge(_) => opcode::AUTH_CHALLENGE,
            Message::AuthResponse(_) => opcode::AUTH_RESPONSE,
            Message::AuthSuccess(_) => opcode::AUTH_SUCCESS,
        }
    }

    /// Get the message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Error(_) => "ERROR",
            Message::Startup(_) => "STARTUP",
            Message::Ready => "READY",
            Message::Authenticate(_) => "AUTHENTICATE",
            Message::Credentials(_) => "CREDENTIALS",
            Message::Options => "OPTIONS",
            Message::Supported(_) => "SUPPORTED",
            Message::Query(_) => "QUERY",
            Message::Result(_) => "RESULT",
            Message::Prepare(_) => "PREPARE",
            Message::Execute(_) => "EXECUTE",
            Message::Register(_) => "REGISTER",
            Message::Event(_) => "EVENT",
            Message::Batch(_) => "BATCH",
            Message::AuthChallenge(_) => "AUTH_CHALLENGE",
            Message::AuthResponse(_) => "AUTH_RESPONSE",
            Message::AuthSuccess(_) => "AUTH_SUCCESS",
        }
    }

    /// Whether the message travels client to server.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::Startup(_)
                | Message::Credentials(_)
                | Message::Options
                | Message::Query(_)
                | Message::Prepare(_)
                | Message::Execute(_)
                | Message::Register(_)
                | Message::Batch(_)
                | Message::AuthResponse(_)
        )
    }

    /// Encode the message body.
    pub fn encode(&self, version: ProtocolVersion) -> CodecResult<Bytes> {
        let mut buf = ByteBuffer::new();
        self.encode_into(&mut buf, version)?;
        Ok(buf.into_bytes())
    }

    /// Encode the message body into an existing buffer.
    pub fn encode_into(&self, buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<()> {
        let v2_only = matches!(
            self,
            Message::Batch(_) | Message::AuthChallenge(_) | Message::AuthResponse(_) | Message::AuthSuccess(_)
        );
        if v2_only && version == ProtocolVersion::V1 {
            return Err(CodecError::UnsupportedFeature(format!(
                "{} requires protocol v2",
                self.name()
            )));
        }

        match self {
            Message::Error(msg) => msg.encode(buf),
            Message::Startup(msg) => msg.encode(buf),
            Message::Ready | Message::Options => Ok(()),
            Message::Authenticate(msg) => msg.encode(buf),
            Message::Credentials(msg) => msg.encode(buf),
            Message::Supported(msg) => msg.encode(buf),
            Message::Query(msg) => msg.encode(buf, version),
            Message::Result(msg) => msg.encode(buf, version),
            Message::Prepare(msg) => msg.encode(buf),
            Message::Execute(msg) => msg.encode(buf, version),
            Message::Register(msg) => msg.encode(buf),
            Message::Event(msg) => msg.encode(buf),
            Message::Batch(msg) => msg.encode(buf, version),
            Message::AuthChallenge(token) | Message::AuthResponse(token) | Message::AuthSuccess(token) => {
                token.encode(buf)
            }
        }
    }

    /// Decode a message body for the given opcode.
    pub fn decode(op: u8, buf: &mut ByteBuffer, version: ProtocolVersion) -> CodecResult<Self> {
        let message = match op {
            opcode::ERROR => Message::Error(ErrorMessage::decode(buf)?),
            opcode::STARTUP => Message::Startup(StartupMessage::decode(buf)?),
            opcode::READY => Message::Ready,
            opcode::AUTHENTICATE => Message::Authenticate(AuthenticateMessage::decode(buf)?),
            opcode::CREDENTIALS => Message::Credentials(CredentialsMessage::decode(buf)?),
            opcode::OPTIONS => Message::Options,
            opcode::SUPPORTED => Message::Supported(SupportedMessage::decode(buf)?),
            opcode::QUERY => Message::Query(QueryMessage::decode(buf, version)?),
            opcode::RESULT => Message::Result(ResultMessage::decode(buf, version)?),
            opcode::PREPARE => Message::Prepare(PrepareMessage::decode(buf)?),
            opcode::EXECUTE => Message::Execute(ExecuteMessage::decode(buf, version)?),
            opcode::REGISTER => Message::Register(RegisterMessage::decode(buf)?),
            opcode::EVENT => Message::Event(Event::decode(buf)?),
            opcode::BATCH => Message::Batch(BatchMessage::decode(buf)?),
            opcode::AUTH_CHALLENGE => Message::AuthChallenge(SaslToken::decode(buf)?),
            opcode::AUTH_RESPONSE => Message::AuthResponse(SaslToken::decode(buf)?),
            opcode::AUTH_SUCCESS => Message::AuthSuccess(SaslToken::decode(buf)?),
            other => return Err(CodecError::UnknownOpcode(other)),
        };
        Ok(message)
    }
}
