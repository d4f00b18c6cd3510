//! Connection Events
//!
//! 연결 상태와 구독자에게 전달되는 이벤트

use std::fmt;

use super::error::DriverError;
use crate::protocol::Event;

/// 연결 상태
///
/// ```text
/// Idle -> Connecting -> Active -> Closing -> Closed
///                         |
///                         +-> Faulted -> (재연결) Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 생성됨, 연결 전
    Idle,
    /// 전송 계층 연결 및 핸드셰이크 중
    Connecting,
    /// 요청 처리 가능
    Active,
    /// 정상 종료 중
    Closing,
    /// 전송 계층이 끊어짐, 재연결 대기
    Faulted,
    /// 종료됨
    Closed,
}

impl ConnectionState {
    /// 요청 처리 가능 여부
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// 새 연결 시도가 가능한 상태인지
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Closed | Self::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Faulted => "faulted",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 연결 이벤트
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// 핸드셰이크 완료 (재연결 포함)
    Connected,
    /// 연결 종료
    Closed,
    /// 전송 계층이 끊어져 재연결 예정
    Reconnecting,
    /// 백그라운드 에러 (재연결 실패 등)
    Error(DriverError),
    /// 서버 이벤트
    Event(Event),
}
