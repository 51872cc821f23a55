//! Protocol and connection layer for the Supex host runtime
//!
//! This crate owns the socket to the scripting runtime embedded in the host
//! application. It has no knowledge of individual capabilities - it sends a
//! method name with JSON params and hands back the result or a classified
//! error.
//!
//! # Architecture
//!
//! ```text
//! driver crate                    ipc crate
//! ┌─────────────────────────┐    ┌─────────────────────┐
//! │  SupexClient            │───>│  Connection         │
//! │  (typed capabilities)   │    │  (one request at a  │
//! └─────────────────────────┘    │   time, timeouts)   │
//!                                └──────────┬──────────┘
//!                                           │ protocol::encode / decode
//!                                           v
//!                                  TCP, newline-delimited JSON-RPC
//!                                           │
//!                                           v
//!                                    ┌──────────────┐
//!                                    │ Host runtime │
//!                                    └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use ipc::{Connection, ConnectionConfig};
//!
//! let mut conn = Connection::new(ConnectionConfig::default().with_agent("user"));
//! conn.connect().await?;
//! let result = conn.send_command("eval_ruby", json!({"code": "1 + 1"}), timeout).await?;
//! ```

mod connection;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod protocol;

pub use connection::{
    Connection, ConnectionConfig, ConnectionState, CLIENT_NAME, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT,
};
pub use error::{Error, ErrorKind, Result};
pub use protocol::{ErrorCode, Outcome, RemoteError, Request, Response};
