//! MCP server for Supex
//!
//! Exposes the host application's scripting runtime via the Model Context
//! Protocol, so AI assistants can evaluate code, inspect the open model,
//! open/save/export files and take screenshots.
//!
//! # Tools Provided
//!
//! - **Status**: check whether the host runtime is reachable
//! - **Execution**: evaluate inline code or a script file
//! - **Introspection**: model info, entities, selection, layers, materials, camera
//! - **Files**: open, save, export
//! - **Capture**: single and batch screenshots, returned as file paths
//!
//! Every tool replies with JSON: `{"success": true, "result": ...}` or a
//! failure object carrying `error_type` (`connection`, `timeout`, `protocol`,
//! `remote`).
//!
//! # Usage
//!
//! The server runs on stdio and talks to the host runtime over TCP:
//!
//! ```bash
//! supex mcp serve
//! ```

mod calls;

use std::path::PathBuf;

use anyhow::Result;
use mcp_attr::server::{mcp_server, serve_stdio, McpServer};
use mcp_attr::ErrorCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use driver::{
    BatchScreenshotOptions, ConnectionConfig, EntityType, ExportFormat, ScreenshotOptions,
    SupexClient,
};

pub use calls::{respond, ToolCall};

/// MCP server backed by one shared host connection
///
/// Tool calls can arrive concurrently; the mutex makes them take turns on the
/// single connection.
pub struct SupexMcpServer {
    config: ConnectionConfig,
    client: Mutex<SupexClient>,
}

impl SupexMcpServer {
    pub fn new(config: ConnectionConfig) -> Self {
        let client = Mutex::new(SupexClient::new(config.clone()));
        Self { config, client }
    }

    /// Run a tool call, reconnecting first if the last call broke the connection
    pub async fn execute(&self, call: ToolCall) -> Value {
        let tool = call.name();
        let mut client = self.client.lock().await;

        let outcome = match client.ensure_connected().await {
            Ok(()) => call.run(&mut client).await,
            Err(e) => Err(e),
        };
        respond(tool, outcome)
    }

    /// Health check on a fresh connection of its own
    pub async fn status_report(&self) -> Value {
        driver::status(self.config.clone()).await.to_json()
    }
}

fn parse_choice<T: DeserializeOwned>(field: &str, value: &str) -> mcp_attr::Result<T> {
    serde_json::from_value(Value::String(value.trim().to_lowercase())).map_err(|_| {
        let msg = format!("Invalid {}: {}", field, value);
        mcp_attr::Error::new(ErrorCode::INVALID_PARAMS).with_message(msg, true)
    })
}

#[mcp_server]
impl McpServer for SupexMcpServer {
    /// Check if the host application is running and the Supex runtime responds
    #[tool]
    async fn check_status(&self) -> mcp_attr::Result<String> {
        Ok(self.status_report().await.to_string())
    }

    /// Evaluate arbitrary Ruby code in the host application
    ///
    /// Prefer eval_ruby_file for anything longer than a few lines; errors from
    /// files carry file and line information.
    #[tool]
    async fn eval_ruby(
        &self,
        /// Ruby code to execute
        code: String,
    ) -> mcp_attr::Result<String> {
        tracing::info!("Evaluating Ruby code ({} characters)", code.len());
        Ok(self.execute(ToolCall::Eval { code }).await.to_string())
    }

    /// Evaluate Ruby code from a file in the host application
    #[tool]
    async fn eval_ruby_file(
        &self,
        /// Absolute path to the Ruby file to execute
        file_path: String,
    ) -> mcp_attr::Result<String> {
        tracing::info!("Evaluating Ruby file: {}", file_path);
        let call = ToolCall::EvalFile {
            file_path: PathBuf::from(file_path),
        };
        Ok(self.execute(call).await.to_string())
    }

    /// Get basic information about the current model
    ///
    /// Returns title, units, face/edge/group/component counts and whether
    /// the model has unsaved changes.
    #[tool]
    async fn get_model_info(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::ModelInfo).await.to_string())
    }

    /// List entities in the model
    #[tool]
    async fn list_entities(
        &self,
        /// One of: all, faces, edges, groups, components. Default: all
        entity_type: Option<String>,
    ) -> mcp_attr::Result<String> {
        let entity_type = match entity_type {
            Some(s) => parse_choice::<EntityType>("entity_type", &s)?,
            None => EntityType::All,
        };
        Ok(self.execute(ToolCall::ListEntities { entity_type }).await.to_string())
    }

    /// Get the currently selected entities
    #[tool]
    async fn get_selection(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::Selection).await.to_string())
    }

    /// Get the layers (tags) in the model with visibility and entity counts
    #[tool]
    async fn get_layers(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::Layers).await.to_string())
    }

    /// Get the materials in the model with color and texture information
    #[tool]
    async fn get_materials(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::Materials).await.to_string())
    }

    /// Get camera eye, target, up vector and field of view
    #[tool]
    async fn get_camera_info(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::CameraInfo).await.to_string())
    }

    /// Take a screenshot of the current view and save it to disk
    ///
    /// Returns the file path only, not image data. Read the file if you need
    /// to look at it.
    #[tool]
    async fn take_screenshot(
        &self,
        /// Image width in pixels. Default: 1920
        width: Option<u32>,
        /// Image height in pixels. Default: 1080
        height: Option<u32>,
        /// Transparent background. Default: false
        transparent: Option<bool>,
        /// Where to save the image. Default: chosen by the host
        output_path: Option<String>,
    ) -> mcp_attr::Result<String> {
        let defaults = ScreenshotOptions::default();
        let options = ScreenshotOptions {
            width: width.unwrap_or(defaults.width),
            height: height.unwrap_or(defaults.height),
            transparent: transparent.unwrap_or(defaults.transparent),
            output_path: output_path.map(PathBuf::from),
        };
        Ok(self.execute(ToolCall::Screenshot(options)).await.to_string())
    }

    /// Take several screenshots with different cameras in one batch
    ///
    /// Each shot is an object with a `camera` spec (`standard_view` with
    /// `view`, `custom` with `eye`/`target`, or `zoom_entity` with
    /// `entity_ids`), an optional `name`, optional `width`/`height`, and an
    /// optional `isolate` entity id. The user's camera is restored afterwards
    /// unless restore_camera is false.
    #[tool]
    async fn take_batch_screenshots(
        &self,
        /// Shot specifications
        shots: Vec<Value>,
        /// Output directory. Default: chosen by the host
        output_dir: Option<String>,
        /// Base file name. Default: screenshot
        base_name: Option<String>,
        /// Default width for all shots. Default: 1920
        width: Option<u32>,
        /// Default height for all shots. Default: 1080
        height: Option<u32>,
        /// Transparent background. Default: false
        transparent: Option<bool>,
        /// Restore the original camera afterwards. Default: true
        restore_camera: Option<bool>,
    ) -> mcp_attr::Result<String> {
        let mut options = BatchScreenshotOptions::new(shots);
        options.output_dir = output_dir.map(PathBuf::from);
        if let Some(base_name) = base_name {
            options.base_name = base_name;
        }
        options.width = width.unwrap_or(options.width);
        options.height = height.unwrap_or(options.height);
        options.transparent = transparent.unwrap_or(options.transparent);
        options.restore_camera = restore_camera.unwrap_or(options.restore_camera);
        Ok(self.execute(ToolCall::BatchScreenshots(options)).await.to_string())
    }

    /// Open a model file
    #[tool]
    async fn open_model(
        &self,
        /// Absolute path to the .skp file
        path: String,
    ) -> mcp_attr::Result<String> {
        let call = ToolCall::OpenModel {
            path: PathBuf::from(path),
        };
        Ok(self.execute(call).await.to_string())
    }

    /// Save the current model
    #[tool]
    async fn save_model(
        &self,
        /// Absolute path to save to. Default: the model's current location
        path: Option<String>,
    ) -> mcp_attr::Result<String> {
        let call = ToolCall::SaveModel {
            path: path.map(PathBuf::from),
        };
        Ok(self.execute(call).await.to_string())
    }

    /// Export the current scene and return the written file path
    #[tool]
    async fn export_scene(
        &self,
        /// One of: skp, obj, dae, stl, png, jpg. Default: skp
        format: Option<String>,
    ) -> mcp_attr::Result<String> {
        let format = match format {
            Some(s) => parse_choice::<ExportFormat>("format", &s)?,
            None => ExportFormat::Skp,
        };
        Ok(self.execute(ToolCall::Export { format }).await.to_string())
    }

    /// Get console capture status and log file information
    #[tool]
    async fn console_capture_status(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::ConsoleStatus).await.to_string())
    }

    /// Reload the Supex extension inside the host without restarting it
    #[tool]
    async fn reload_extension(&self) -> mcp_attr::Result<String> {
        Ok(self.execute(ToolCall::Reload).await.to_string())
    }
}

/// Start the MCP server on stdio
pub async fn start_server(config: ConnectionConfig) -> Result<()> {
    tracing::info!(
        "Starting Supex MCP server version {} (host {})",
        env!("CARGO_PKG_VERSION"),
        config.address()
    );

    let server = SupexMcpServer::new(config);

    // The host may start later; tools report connection errors until it does
    let report = driver::status(server.config.clone()).await;
    if report.is_connected() {
        tracing::info!("Host runtime reachable, MCP server ready on stdio");
    } else {
        tracing::warn!("Host runtime not reachable yet: {}", report.to_json());
    }

    serve_stdio(server).await?;
    Ok(())
}
