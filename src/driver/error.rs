//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CodecError, ErrorCode, ErrorDetails, ErrorMessage, ProtocolError};

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
///
/// 하나의 실패가 여러 대기자에게 전달되므로 `Clone`을 구현합니다.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 연결 종료 - 진행 중이던 요청은 다른 연결에서 재시도할 수 있음
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// 스트림 대기열 초과
    #[error("Too many requests: wait queue of {max_waiters} is full")]
    TooManyRequests {
        /// 대기열 최대 길이
        max_waiters: usize,
    },

    /// 연결 타임아웃
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 서버 에러
    #[error("Server error: {0}")]
    Server(ServerError),

    /// 예상하지 못한 응답
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// 기대한 메시지
        expected: &'static str,
        /// 받은 메시지
        actual: &'static str,
    },

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 코덱 에러
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 연결 종료 에러 생성
    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 예상하지 못한 응답 에러 생성
    pub fn unexpected(expected: &'static str, actual: &'static str) -> Self {
        Self::UnexpectedResponse { expected, actual }
    }

    /// 연결 종료로 인한 실패 여부
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }

    /// 준비되지 않은 문장(Unprepared) 에러 여부
    pub fn is_unprepared(&self) -> bool {
        matches!(self, Self::Server(e) if e.code == ErrorCode::UNPREPARED)
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionClosed(_) | Self::Connection(_) | Self::ConnectTimeout(_) | Self::Io(_) => true,
            Self::Server(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 서버 에러 상세
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<ProtocolError> for DriverError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => e.into(),
            ProtocolError::Codec(e) => Self::Codec(e),
        }
    }
}

impl From<ErrorMessage> for DriverError {
    fn from(err: ErrorMessage) -> Self {
        Self::Server(ServerError::from(err))
    }
}

// ============================================================================
// ServerError - 서버가 보낸 ERROR 메시지
// ============================================================================

/// 서버 에러
///
/// ERROR 메시지의 코드, 메시지, 코드별 상세 필드를 그대로 보존합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// 에러 코드
    pub code: i32,
    /// 에러 메시지
    pub message: String,
    /// 코드별 상세
    pub details: ErrorDetails,
}

impl ServerError {
    /// 에러 코드 이름
    pub fn name(&self) -> &'static str {
        ErrorCode::name(self.code)
    }

    /// Unprepared 에러의 문장 ID
    pub fn unprepared_id(&self) -> Option<&[u8]> {
        match &self.details {
            ErrorDetails::Unprepared { id } => Some(id),
            _ => None,
        }
    }

    /// 재시도 가능한 에러 코드 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::UNAVAILABLE
                | ErrorCode::OVERLOADED
                | ErrorCode::IS_BOOTSTRAPPING
                | ErrorCode::WRITE_TIMEOUT
                | ErrorCode::READ_TIMEOUT
        )
    }
}

impl From<ErrorMessage> for ServerError {
    fn from(err: ErrorMessage) -> Self {
        Self {
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X}) - {}", self.name(), self.code, self.message)
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err = DriverError::TooManyRequests { max_waiters: 100 };
        assert_eq!(err.to_string(), "Too many requests: wait queue of 100 is full");

        let err: DriverError = ErrorMessage::new(ErrorCode::SYNTAX_ERROR, "line 1:0").into();
        assert_eq!(err.to_string(), "Server error: Syntax error (0x2000) - line 1:0");
    }

    #[test]
    fn test_connection_closed_tag() {
        let err = DriverError::connection_closed("transport dropped");
        assert!(err.is_connection_closed());
        assert!(err.is_retryable());

        let err = DriverError::connection("refused");
        assert!(!err.is_connection_closed());
    }

    #[test]
    fn test_unprepared() {
        let err: DriverError = ErrorMessage::with_details(
            ErrorCode::UNPREPARED,
            "Prepared query with ID 0102 not found",
            ErrorDetails::Unprepared { id: Bytes::from_static(&[1, 2]) },
        )
        .into();
        assert!(err.is_unprepared());
        assert_eq!(err.server_error().and_then(|e| e.unprepared_id()), Some(&[1u8, 2][..]));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_driver_error_retryable() {
        let err: DriverError = ErrorMessage::new(ErrorCode::OVERLOADED, "busy").into();
        assert!(err.is_retryable());

        let err = DriverError::TooManyRequests { max_waiters: 1 };
        assert!(!err.is_retryable());

        let err = DriverError::authentication("bad credentials");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_protocol_error() {
        let err: DriverError = ProtocolError::Codec(CodecError::CompressionUnsupported).into();
        assert!(matches!(err, DriverError::Codec(CodecError::CompressionUnsupported)));

        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err: DriverError = ProtocolError::Io(io_err).into();
        assert!(matches!(err, DriverError::Io(_)));
    }
}
