//! Driver Module
//!
//! 네이티브 프로토콜 연결 (클라이언트 코어)
//!
//! # Components
//!
//! - 연결 설정 (ConnectionConfig, ServerAddress, AuthToken)
//! - 스트림 다중화 연결 (Connection)
//! - Prepared 문장 캐시 (PreparedStatement)
//! - 결과 커서 (Cursor, RowStream)
//! - 연결 이벤트 (ConnectionEvent, ConnectionState)
//!
//! # Example
//!
//! ```no_run
//! use cql_driver::driver::{AuthToken, Connection, ConnectionConfig, QueryParams};
//! use cql_driver::protocol::{Consistency, Value};
//!
//! # async fn example() -> cql_driver::driver::DriverResult<()> {
//! let config = ConnectionConfig::builder("cql://localhost:9042")?
//!     .with_keyspace("app")
//!     .with_auth(AuthToken::basic("cassandra", "cassandra"))
//!     .with_consistency(Consistency::LocalQuorum)
//!     .build()?;
//!
//! let conn = Connection::open(config).await?;
//!
//! // 준비(캐시 사용) 후 실행
//! conn.execute_cql(
//!     "INSERT INTO users (id, name) VALUES (?, ?)",
//!     &[Value::Int(1), Value::Text("alice".to_string())],
//!     QueryParams::new(),
//! )
//! .await?;
//!
//! // 페이지 단위 조회
//! let mut cursor = conn
//!     .query_paged("SELECT * FROM users", QueryParams::new().with_page_size(100))
//!     .await?;
//! while let Some(row) = cursor.next_row().await? {
//!     println!("{:?}", row.get("name"));
//! }
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod cursor;
mod error;
mod events;
mod prepared;
mod query;
mod streams;
mod transport;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{
    AuthToken, ConnectionConfig, ConnectionConfigBuilder, ServerAddress, DEFAULT_PORT, MAX_STREAMS,
};
pub use connection::Connection;
pub use cursor::{Cursor, RowStream};
pub use error::{DriverError, DriverResult, ServerError};
pub use events::{ConnectionEvent, ConnectionState};
pub use prepared::{bind_values, PreparedStatement};
pub use query::{QueryParams, QueryResult};
pub use transport::{BoxedTransport, Connector, TcpConnector, Transport};
