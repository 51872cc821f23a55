//! Error taxonomy for host runtime communication
//!
//! Every failure that leaves this crate is one of four kinds. The first three
//! are connection-fatal: the socket is dropped and the caller has to
//! `connect()` again. A remote error means the host ran the request and it
//! failed there; the connection stays usable.

use std::fmt;
use std::io;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{ErrorCode, RemoteError};

#[derive(Error, Debug)]
pub enum Error {
    /// Socket could not be opened or was lost mid-exchange
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response within the caller's bound, when it is known
    #[error("{}", timeout_message(.0.as_ref()))]
    Timeout(Option<Duration>),

    /// Payload violated the wire contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The host accepted the request but the operation itself failed
    #[error("Remote error [{}]: {}", .0.code, .0.message)]
    Remote(RemoteError),
}

pub type Result<T> = std::result::Result<T, Error>;

fn timeout_message(bound: Option<&Duration>) -> String {
    match bound {
        Some(bound) => format!("No response within {:.1}s", bound.as_secs_f64()),
        None => "Operation timed out".to_string(),
    }
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Protocol,
    RemoteExecution,
}

impl ErrorKind {
    /// Stable label used in CLI and agent-tool output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::RemoteExecution => "remote",
        }
    }

    /// Whether the connection must be re-established after this kind
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, ErrorKind::RemoteExecution)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection(message.into())
    }

    pub fn timeout(bound: Duration) -> Self {
        Error::Timeout(Some(bound))
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    /// A failure the host reported inside an otherwise successful reply
    pub fn application(message: impl Into<String>) -> Self {
        Error::Remote(RemoteError::new(ErrorCode::APPLICATION, message))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Remote(_) => ErrorKind::RemoteExecution,
        }
    }

    pub fn is_connection_fatal(&self) -> bool {
        self.kind().is_connection_fatal()
    }

    /// The message without its kind prefix
    pub fn message(&self) -> String {
        match self {
            Error::Connection(msg) | Error::Protocol(msg) => msg.clone(),
            Error::Timeout(_) => self.to_string(),
            Error::Remote(remote) => remote.message.clone(),
        }
    }

    /// Remote error code, if the host reported one
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            Error::Remote(remote) => Some(&remote.code),
            _ => None,
        }
    }

    /// Structured failure object returned to agents and printed by `--raw`
    pub fn to_failure(&self) -> Value {
        let mut failure = json!({
            "success": false,
            "error": self.message(),
            "error_type": self.kind().as_str(),
        });
        if let Error::Remote(remote) = self {
            failure["error_code"] = json!(remote.code);
            if let Some(data) = &remote.data {
                failure["error_data"] = data.clone();
            }
        }
        failure
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::connection("connection closed by host"),
            io::ErrorKind::InvalidData => Error::protocol(err.to_string()),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout(None),
            _ => Error::connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::protocol(err.to_string())
    }
}
