//! # CQL Driver
//!
//! Client core for the CQL binary native protocol (versions 1 and 2): the
//! wire codec and a single multiplexed connection.
//!
//! ## Features
//!
//! - **Native protocol v1/v2** - Every request and response message, typed values, tracing frames
//! - **Async/Await** - Built on Tokio; one I/O task per connection, many requests in flight
//! - **Stream multiplexing** - Up to 128 concurrent requests per connection with a bounded FIFO wait queue
//! - **Prepared statements** - Per-connection LRU cache, coalesced prepares, transparent re-prepare
//! - **Paging** - Lazy row cursors that follow the paging state, also usable as a `Stream`
//! - **Events** - Server push events and connection lifecycle notifications
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cql-driver = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use cql_driver::{Connection, ConnectionConfig, QueryParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::builder("127.0.0.1:9042")?
//!         .with_keyspace("system")
//!         .build()?;
//!     let conn = Connection::open(config).await?;
//!
//!     let result = conn
//!         .query("SELECT release_version FROM local", QueryParams::new())
//!         .await?;
//!     if let Some(rows) = result.rows() {
//!         for row in &rows.rows {
//!             println!("{:?}", row.get("release_version"));
//!         }
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Prepared Statements
//!
//! ```rust,no_run
//! # use cql_driver::{Connection, QueryParams, Value};
//! # async fn example(conn: Connection) -> Result<(), Box<dyn std::error::Error>> {
//! let statement = conn.prepare("SELECT * FROM users WHERE id = ?").await?;
//! let result = conn
//!     .execute_prepared(&statement, &[Value::Int(42)], QueryParams::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Events
//!
//! ```rust,no_run
//! # use cql_driver::{Connection, ConnectionEvent};
//! # use cql_driver::protocol::EventType;
//! # async fn example(conn: Connection) -> Result<(), Box<dyn std::error::Error>> {
//! let mut events = conn.subscribe();
//! conn.register(&[EventType::SchemaChange, EventType::StatusChange]).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ConnectionEvent::Event(event) = event {
//!         println!("{:?}", event);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! # use cql_driver::{Connection, DriverError, QueryParams};
//! # async fn example(conn: Connection) {
//! match conn.query("SELECT * FROM t", QueryParams::new()).await {
//!     Ok(result) => println!("{:?}", result.result()),
//!     Err(e) if e.is_connection_closed() => eprintln!("retry on another connection: {}", e),
//!     Err(DriverError::Server(e)) => eprintln!("server said {} ({:#06x})", e.message, e.code),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connection, configuration, cursor and error types
//! - [`protocol`] - Low-level native protocol implementation
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;
pub mod protocol;

// Re-exports for convenience
pub use driver::{
    AuthToken, Connection, ConnectionConfig, ConnectionConfigBuilder, ConnectionEvent,
    ConnectionState, Cursor, DriverError, DriverResult, PreparedStatement, QueryParams,
    QueryResult, RowStream, ServerAddress, ServerError,
};

pub use protocol::{
    BatchType, CodecError, Consistency, CqlType, ProtocolVersion, ResultSet, Row, Value,
};

/// Config alias for convenience
pub type Config = ConnectionConfig;
