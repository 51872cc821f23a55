//! Supex driver - typed access to the host application's scripting runtime
//!
//! [`SupexClient`] wraps one [`ipc::Connection`] and exposes every remote
//! capability as a method: code evaluation, read-only model introspection,
//! open/save/export, and screenshots (returned as file paths, never pixels).
//! The CLI and the MCP server are both thin layers over this crate.
//!
//! Calls are at-most-once. A connection-fatal error leaves the client in the
//! Failed state and the caller decides whether to reconnect; mutating calls
//! should not be replayed after a transport failure since the side effect
//! may already have happened.

pub mod client;
pub mod method;
pub mod status;
pub mod types;

pub use client::{unwrap_content, SupexClient};
pub use method::{Method, UnknownMethod};
pub use status::{status, StatusReport};
pub use types::{BatchScreenshotOptions, EntityType, ExportFormat, ScreenshotOptions};

pub use ipc::{ConnectionConfig, ConnectionState, Error, ErrorCode, ErrorKind, Result};
