//! Typed client for host runtime capabilities
//!
//! One method per capability. Each builds its params, sends exactly one
//! request on the owned connection and returns the unwrapped result. Nothing
//! here retries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use ipc::{Connection, ConnectionConfig, Error, Result};

use crate::method::Method;
use crate::types::{BatchScreenshotOptions, EntityType, ExportFormat, ScreenshotOptions};

/// Client for the host runtime
///
/// Holds no state besides its [`Connection`]. A client is meant for one
/// caller at a time; share it behind a mutex if needed.
#[derive(Debug)]
pub struct SupexClient {
    conn: Connection,
}

impl SupexClient {
    /// Create a client; the socket opens on first use
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
        }
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.conn.connect().await
    }

    pub fn disconnect(&mut self) {
        self.conn.disconnect()
    }

    /// Reconnect if the connection is not currently usable
    ///
    /// This is the caller's explicit decision; no capability method calls it.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.conn.is_connected() {
            return Ok(());
        }
        debug!(state = %self.conn.state(), "Re-establishing connection");
        self.conn.connect().await
    }

    /// Invoke a capability with the configured request timeout
    pub async fn call(&mut self, method: Method, params: impl Serialize) -> Result<Value> {
        let timeout = self.conn.config().request_timeout;
        self.call_with_timeout(method, params, timeout).await
    }

    /// Invoke a capability with an explicit timeout
    pub async fn call_with_timeout(
        &mut self,
        method: Method,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<Value> {
        debug!(method = %method, mutating = method.is_mutating(), "Calling capability");
        let result = self
            .conn
            .send_command(method.wire_name(), params, timeout)
            .await?;
        unwrap_content(result)
    }

    // ========== Execution ==========

    /// Evaluate inline code in the host's scripting runtime
    pub async fn eval(&mut self, code: &str) -> Result<Value> {
        #[derive(Serialize)]
        struct Params<'a> {
            code: &'a str,
        }

        self.call(Method::Eval, Params { code }).await
    }

    /// Evaluate a script file; the host reports file and line on failure
    pub async fn eval_file(&mut self, file_path: &Path) -> Result<Value> {
        #[derive(Serialize)]
        struct Params<'a> {
            file_path: &'a Path,
        }

        self.call(Method::EvalFile, Params { file_path }).await
    }

    // ========== Introspection ==========

    pub async fn model_info(&mut self) -> Result<Value> {
        self.call(Method::ModelInfo, ()).await
    }

    pub async fn list_entities(&mut self, entity_type: EntityType) -> Result<Value> {
        #[derive(Serialize)]
        struct Params {
            entity_type: EntityType,
        }

        self.call(Method::ListEntities, Params { entity_type }).await
    }

    pub async fn selection(&mut self) -> Result<Value> {
        self.call(Method::Selection, ()).await
    }

    pub async fn layers(&mut self) -> Result<Value> {
        self.call(Method::Layers, ()).await
    }

    pub async fn materials(&mut self) -> Result<Value> {
        self.call(Method::Materials, ()).await
    }

    pub async fn camera_info(&mut self) -> Result<Value> {
        self.call(Method::CameraInfo, ()).await
    }

    pub async fn console_status(&mut self) -> Result<Value> {
        self.call(Method::ConsoleStatus, ()).await
    }

    pub async fn ping(&mut self) -> Result<Value> {
        self.call(Method::Ping, ()).await
    }

    // ========== Capture ==========

    /// Render the current view to disk and return the written path
    pub async fn screenshot(&mut self, options: &ScreenshotOptions) -> Result<PathBuf> {
        let result = self.call(Method::Screenshot, options).await?;
        written_path(&result, Method::Screenshot)
    }

    /// Render several camera setups in one request; returns the host's summary
    pub async fn batch_screenshots(&mut self, options: &BatchScreenshotOptions) -> Result<Value> {
        self.call(Method::BatchScreenshots, options).await
    }

    // ========== State-changing ==========

    pub async fn open_model(&mut self, path: &Path) -> Result<Value> {
        #[derive(Serialize)]
        struct Params<'a> {
            path: &'a Path,
        }

        self.call(Method::OpenModel, Params { path }).await
    }

    /// Save the model, to `path` if given, otherwise where it was loaded from
    pub async fn save_model(&mut self, path: Option<&Path>) -> Result<Value> {
        #[derive(Serialize)]
        struct Params<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            path: Option<&'a Path>,
        }

        self.call(Method::SaveModel, Params { path }).await
    }

    /// Export the scene and return the written path
    pub async fn export(&mut self, format: ExportFormat) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct Params {
            format: ExportFormat,
        }

        let result = self.call(Method::Export, Params { format }).await?;
        written_path(&result, Method::Export)
    }

    /// Reload the host-side extension without restarting the application
    pub async fn reload(&mut self) -> Result<Value> {
        self.call(Method::Reload, ()).await
    }
}

/// Unwrap an MCP-style tool result and surface soft failures
///
/// `{"content":[{"type":"text","text":T}]}` becomes `T`, parsed as JSON when
/// it parses. `isError: true` or `success: false` become a remote error.
pub fn unwrap_content(result: Value) -> Result<Value> {
    let flagged = result.get("isError").and_then(Value::as_bool).unwrap_or(false);

    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let value = match text {
        Some(text) if flagged => return Err(Error::application(text)),
        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        None if flagged => return Err(Error::application("host reported an error without details")),
        None => result,
    };

    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(Error::application(message));
    }

    Ok(value)
}

/// Path of the file the host reports having written
///
/// A reply without one is the host's failure, not a broken exchange, so the
/// connection stays usable.
fn written_path(result: &Value, method: Method) -> Result<PathBuf> {
    result
        .get("file_path")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| Error::application(format!("{} result has no \"file_path\"", method)))
}
