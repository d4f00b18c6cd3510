//! Connection Configuration
//!
//! 연결 설정, 서버 주소, 인증 토큰

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use super::error::{DriverError, DriverResult};
use crate::protocol::{Consistency, ProtocolVersion, DEFAULT_MAX_FRAME_SIZE};
use crate::protocol::message::CQL_VERSION;

/// 기본 포트
pub const DEFAULT_PORT: u16 = 9042;

/// 연결당 최대 스트림 수 (스트림 ID 0..=127)
pub const MAX_STREAMS: usize = 128;

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// 사용자명/비밀번호 (v1 CREDENTIALS, v2 SASL PLAIN)
    Basic {
        /// 사용자명
        username: String,
        /// 비밀번호
        password: String,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 인증 정보 존재 여부
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URI에서 파싱
    ///
    /// `host`, `host:port`, `cql://host:port`, `[::1]:port` 형식을 허용합니다.
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        let uri = uri.trim().trim_start_matches("cql://");
        if uri.is_empty() {
            return Err(DriverError::configuration("Empty server address"));
        }

        // [v6addr]:port
        if let Some(rest) = uri.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| DriverError::configuration("Unterminated IPv6 address"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(DriverError::configuration("Invalid server address")),
            };
            return Ok(Self::new(host, port));
        }

        let parts: Vec<&str> = uri.split(':').collect();
        match parts.len() {
            1 => Ok(Self::new(parts[0], DEFAULT_PORT)),
            2 => Ok(Self::new(parts[0], parse_port(parts[1])?)),
            // bare IPv6 without brackets
            _ if uri.parse::<std::net::Ipv6Addr>().is_ok() => Ok(Self::new(uri, DEFAULT_PORT)),
            _ => Err(DriverError::configuration("Invalid server address")),
        }
    }

    /// 소켓 주소로 변환
    pub fn to_socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> DriverResult<u16> {
    port.parse()
        .map_err(|_| DriverError::configuration(format!("Invalid port: {}", port)))
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_socket_addr())
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = DriverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_uri(&value)
    }
}

// ============================================================================
// ConnectionConfig - 연결 설정
// ============================================================================

/// 연결 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 서버 주소
    pub address: ServerAddress,
    /// 핸드셰이크 후 `USE`할 키스페이스
    pub keyspace: Option<String>,
    /// 프로토콜 버전
    pub protocol_version: ProtocolVersion,
    /// STARTUP에 보낼 CQL 버전
    pub cql_version: String,
    /// 기본 일관성 수준
    pub consistency: Consistency,
    /// 동시 스트림 수
    pub max_streams: usize,
    /// 스트림 대기열 최대 길이
    pub max_waiters: usize,
    /// Prepared 캐시 크기
    pub prepared_cache_size: usize,
    /// 연결 타임아웃
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// 정상 종료 대기 시간
    #[serde(with = "millis")]
    pub close_timeout: Duration,
    /// 연결 끊김 시 자동 재연결
    pub auto_reconnect: bool,
    /// 재연결 간격
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    /// 이벤트 채널 용량
    pub event_buffer: usize,
    /// 수신 프레임 본문 최대 크기
    pub max_frame_size: usize,
    /// 인증 토큰
    pub auth: AuthToken,
}

impl ConnectionConfig {
    /// 주소로 설정 생성
    pub fn new(uri: &str) -> DriverResult<Self> {
        Ok(Self {
            address: ServerAddress::from_uri(uri)?,
            ..Self::default()
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str) -> DriverResult<ConnectionConfigBuilder> {
        let config = Self::new(uri)?;
        Ok(ConnectionConfigBuilder { config })
    }

    /// 설정 검증
    pub fn validate(&self) -> DriverResult<()> {
        if self.max_streams == 0 || self.max_streams > MAX_STREAMS {
            return Err(DriverError::configuration(format!(
                "max_streams must be between 1 and {}",
                MAX_STREAMS
            )));
        }
        if self.prepared_cache_size == 0 {
            return Err(DriverError::configuration("prepared_cache_size must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(DriverError::configuration("event_buffer must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(DriverError::configuration("connect_timeout must be positive"));
        }
        if self.consistency.is_serial() {
            return Err(DriverError::configuration(
                "serial consistency cannot be the default consistency",
            ));
        }
        if let Some(keyspace) = &self.keyspace {
            if keyspace.is_empty() {
                return Err(DriverError::configuration("keyspace must not be empty"));
            }
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: ServerAddress::default(),
            keyspace: None,
            protocol_version: ProtocolVersion::default(),
            cql_version: CQL_VERSION.to_string(),
            consistency: Consistency::Quorum,
            max_streams: MAX_STREAMS,
            max_waiters: 100,
            prepared_cache_size: 10_000,
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            auto_reconnect: false,
            reconnect_interval: Duration::from_secs(5),
            event_buffer: 64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            auth: AuthToken::None,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// ConnectionConfigBuilder - 설정 빌더
// ============================================================================

/// 연결 설정 빌더
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// 키스페이스 설정
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.keyspace = Some(keyspace.into());
        self
    }

    /// 프로토콜 버전 설정
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// CQL 버전 설정
    pub fn with_cql_version(mut self, version: impl Into<String>) -> Self {
        self.config.cql_version = version.into();
        self
    }

    /// 기본 일관성 수준 설정
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.config.consistency = consistency;
        self
    }

    /// 동시 스트림 수 설정
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.config.max_streams = max_streams;
        self
    }

    /// 대기열 길이 설정
    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.config.max_waiters = max_waiters;
        self
    }

    /// Prepared 캐시 크기 설정
    pub fn with_prepared_cache_size(mut self, size: usize) -> Self {
        self.config.prepared_cache_size = size;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// 종료 대기 시간 설정
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// 자동 재연결 설정
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// 재연결 간격 설정
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// 이벤트 채널 용량 설정
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity;
        self
    }

    /// 최대 프레임 크기 설정
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// 인증 토큰 설정
    pub fn with_auth(mut self, auth: AuthToken) -> Self {
        self.config.auth = auth;
        self
    }

    /// 빌드
    pub fn build(self) -> DriverResult<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Tests
// ============================================================================
