//! Health check against a fresh connection

use serde_json::{json, Value};

use ipc::{ConnectionConfig, Error, ErrorCode, ErrorKind};

use crate::client::SupexClient;

/// Outcome of [`status`]
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    /// Host answered the ping
    Connected { version: Option<String>, info: Value },
    /// Socket, handshake or ping exchange failed
    Unreachable { kind: ErrorKind, message: String },
    /// Host is reachable but the ping itself raised
    Failed { code: ErrorCode, message: String },
}

impl StatusReport {
    pub fn is_connected(&self) -> bool {
        matches!(self, StatusReport::Connected { .. })
    }

    pub fn to_json(&self) -> Value {
        match self {
            StatusReport::Connected { version, .. } => json!({
                "status": "connected",
                "version": version.as_deref().unwrap_or("unknown"),
                "message": "Host runtime is connected and responding",
            }),
            StatusReport::Unreachable { kind, message } => json!({
                "status": "disconnected",
                "error": message,
                "error_type": kind.as_str(),
                "message": "Make sure the host application is running with the Supex runtime",
            }),
            StatusReport::Failed { code, message } => json!({
                "status": "error",
                "error": message,
                "error_type": ErrorKind::RemoteExecution.as_str(),
                "error_code": code,
                "message": "Host runtime execution error",
            }),
        }
    }
}

impl From<Error> for StatusReport {
    fn from(err: Error) -> Self {
        match err {
            Error::Remote(remote) => StatusReport::Failed {
                code: remote.code,
                message: remote.message,
            },
            other => StatusReport::Unreachable {
                kind: other.kind(),
                message: other.message(),
            },
        }
    }
}

/// Connect, ping and disconnect on a connection of its own
///
/// Works without any prior connection and never returns an error; the
/// failure kind is part of the report.
pub async fn status(config: ConnectionConfig) -> StatusReport {
    let mut client = SupexClient::new(config);

    let report = match client.connect().await {
        Err(e) => StatusReport::from(e),
        Ok(()) => match client.ping().await {
            Ok(info) => StatusReport::Connected {
                version: info.get("version").and_then(Value::as_str).map(str::to_owned),
                info,
            },
            Err(e) => StatusReport::from(e),
        },
    };

    client.disconnect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc::mock::{MockRuntime, Reply};
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_connected() {
        let runtime = MockRuntime::start().await.unwrap();
        let report = status(runtime.config()).await;
        assert!(report.is_connected());
        assert_eq!(report.to_json()["version"], "mock");
    }

    #[tokio::test]
    async fn test_status_closed_port_is_unreachable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let report = status(ConnectionConfig::new("127.0.0.1", port)).await;
        assert!(matches!(report, StatusReport::Unreachable { kind: ErrorKind::Connection, .. }));
        assert_eq!(report.to_json()["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_status_silent_host_times_out() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.reply("ping", Reply::Silent);
        let config = runtime.config().with_request_timeout(Duration::from_millis(150));

        let report = status(config).await;
        assert!(matches!(report, StatusReport::Unreachable { kind: ErrorKind::Timeout, .. }));
    }

    #[tokio::test]
    async fn test_status_remote_failure_is_distinct() {
        let runtime = MockRuntime::start().await.unwrap();
        runtime.set_error("ping", -32603, "runtime busy");

        let report = status(runtime.config()).await;
        assert_eq!(
            report,
            StatusReport::Failed {
                code: ErrorCode::INTERNAL,
                message: "runtime busy".into()
            }
        );
        let json = report.to_json();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error_type"], "remote");
        assert_eq!(json["error_code"], -32603);
    }
}
