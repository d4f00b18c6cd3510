//! Frame codec for tokio_util.
//!
//! Splits an inbound byte stream into whole frames regardless of how the
//! bytes were chunked, and serializes outbound [`Envelope`]s.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{CodecError, CodecResult, ProtocolError};
use super::frame::{Envelope, FrameHeader, HEADER_SIZE};

/// Default maximum accepted body length (256MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// A complete frame whose body has not been decoded yet.
///
/// Body decoding is left to the caller so that a malformed body can be
/// reported against its stream id instead of tearing down the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Parsed header
    pub header: FrameHeader,
    /// Raw body bytes
    pub body: Bytes,
}

impl Frame {
    /// Stream id of the frame.
    pub fn stream_id(&self) -> i8 {
        self.header.stream_id
    }

    /// Decode the body into an envelope.
    pub fn into_envelope(self) -> CodecResult<Envelope> {
        Envelope::decode(&self.header, &self.body)
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the 8 header bytes
    Header,
    /// Header parsed, waiting for the body
    Body(FrameHeader),
}

/// Native protocol frame codec.
#[derive(Debug)]
pub struct MessageCodec {
    /// Maximum accepted body length
    max_frame_size: usize,
    /// Decoder state
    state: DecodeState,
}

impl MessageCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom maximum body length.
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: DecodeState::Header,
        }
    }

    /// Maximum accepted body length.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < HEADER_SIZE {
                        src.reserve(HEADER_SIZE - src.len());
                        return Ok(None);
                    }

                    let header = FrameHeader::parse(&src[..HEADER_SIZE])?;
                    let length = header.length as usize;
                    if length > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge {
                            size: length,
                            max: self.max_frame_size,
                        }
                        .into());
                    }

                    src.advance(HEADER_SIZE);
                    self.state = DecodeState::Body(header);
                }
                DecodeState::Body(header) => {
                    let length = header.length as usize;
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }

                    let body = src.split_to(length).freeze();
                    self.state = DecodeState::Header;
                    return Ok(Some(Frame { header, body }));
                }
            }
        }
    }
}

impl Encoder<Envelope> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        if let Err(e) = item.encode(dst) {
            dst.truncate(start);
            return Err(e.into());
        }

        let size = dst.len() - start - HEADER_SIZE;
        if size > self.max_frame_size {
            dst.truncate(start);
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{
        ColumnSpec, Consistency, Message, Metadata, QueryMessage, QueryOptions, ResultMessage,
        ResultSet, Row,
    };
    use crate::protocol::types::{CqlType, Value};
    use crate::protocol::version::ProtocolVersion;

    fn rows_envelope() -> Envelope {
        let metadata = Metadata::new(vec![ColumnSpec::new("ks", "users", "name", CqlType::Varchar)]);
        let names: std::sync::Arc<[String]> = metadata.column_names().into();
        let rows = (0..20)
            .map(|i| Row::new(names.clone(), vec![Value::Text(format!("user-{}", i))]))
            .collect();
        Envelope::response(
            ProtocolVersion::V2,
            17,
            Message::Result(ResultMessage::Rows(ResultSet::new(metadata, rows))),
        )
    }

    fn decode_in_chunks(bytes: &[u8], chunk: usize) -> Vec<Envelope> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for piece in bytes.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                out.push(frame.into_envelope().unwrap());
            }
        }
        assert!(buf.is_empty());
        out
    }

    #[test]
    fn test_chunk_boundaries() {
        let envelope = rows_envelope();
        let bytes = envelope.to_bytes().unwrap();

        for chunk in [1, 3, 7, 8, 9, 64, bytes.len()] {
            let decoded = decode_in_chunks(&bytes, chunk);
            assert_eq!(decoded, vec![envelope.clone()], "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_many_frames_in_one_chunk() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let first = Envelope::response(ProtocolVersion::V2, 0, Message::Ready);
        let second = rows_envelope();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();
        // half of a third frame
        let third = first.to_bytes().unwrap();
        buf.extend_from_slice(&third[..4]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().into_envelope().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().into_envelope().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_empty_body_emitted_immediately() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0x82, 0x00, 0x04, 0x02, 0, 0, 0, 0][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.stream_id(), 4);
        assert!(frame.body.is_empty());
        assert_eq!(frame.into_envelope().unwrap().message, Message::Ready);
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = MessageCodec::with_max_size(16);
        let mut buf = BytesMut::from(&[0x82, 0x00, 0x00, 0x08, 0, 0, 1, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Codec(CodecError::FrameTooLarge { size: 256, max: 16 }))
        ));
    }

    #[test]
    fn test_malformed_body_keeps_stream_in_sync() {
        let mut codec = MessageCodec::new();
        // RESULT with an unknown kind, then a READY
        let mut buf = BytesMut::from(&[0x82, 0x00, 0x01, 0x08, 0, 0, 0, 4, 0, 0, 0, 0x63][..]);
        buf.extend_from_slice(&[0x82, 0x00, 0x02, 0x02, 0, 0, 0, 0]);

        let bad = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(bad.stream_id(), 1);
        assert_eq!(bad.into_envelope().unwrap_err(), CodecError::UnknownResultKind(0x63));

        let good = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(good.into_envelope().unwrap().message, Message::Ready);
    }

    #[test]
    fn test_encode_failure_leaves_buffer_untouched() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let query = Message::Query(QueryMessage::new(
            "SELECT 1",
            QueryOptions::new(Consistency::One).with_page_size(5),
        ));
        let result = codec.encode(Envelope::request(ProtocolVersion::V1, 0, query), &mut buf);
        assert!(result.is_err());
        assert!(buf.is_empty());
    }
}
