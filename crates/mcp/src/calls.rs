//! Tool calls and their structured replies
//!
//! Agents get JSON back for every call, success or not, so they can decide
//! themselves whether to retry, reconnect or give up.

use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::error;

use driver::{BatchScreenshotOptions, EntityType, ExportFormat, ScreenshotOptions, SupexClient};
use ipc::Result;

/// One agent tool invocation, already validated
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Eval { code: String },
    EvalFile { file_path: PathBuf },
    ModelInfo,
    ListEntities { entity_type: EntityType },
    Selection,
    Layers,
    Materials,
    CameraInfo,
    Screenshot(ScreenshotOptions),
    BatchScreenshots(BatchScreenshotOptions),
    OpenModel { path: PathBuf },
    SaveModel { path: Option<PathBuf> },
    Export { format: ExportFormat },
    ConsoleStatus,
    Reload,
}

impl ToolCall {
    /// Tool name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Eval { .. } => "eval_ruby",
            ToolCall::EvalFile { .. } => "eval_ruby_file",
            ToolCall::ModelInfo => "get_model_info",
            ToolCall::ListEntities { .. } => "list_entities",
            ToolCall::Selection => "get_selection",
            ToolCall::Layers => "get_layers",
            ToolCall::Materials => "get_materials",
            ToolCall::CameraInfo => "get_camera_info",
            ToolCall::Screenshot(_) => "take_screenshot",
            ToolCall::BatchScreenshots(_) => "take_batch_screenshots",
            ToolCall::OpenModel { .. } => "open_model",
            ToolCall::SaveModel { .. } => "save_model",
            ToolCall::Export { .. } => "export_scene",
            ToolCall::ConsoleStatus => "console_capture_status",
            ToolCall::Reload => "reload_extension",
        }
    }

    /// Run the call on a connected client
    pub async fn run(self, client: &mut SupexClient) -> Result<Value> {
        match self {
            ToolCall::Eval { code } => client.eval(&code).await,
            ToolCall::EvalFile { file_path } => client.eval_file(&file_path).await,
            ToolCall::ModelInfo => client.model_info().await,
            ToolCall::ListEntities { entity_type } => client.list_entities(entity_type).await,
            ToolCall::Selection => client.selection().await,
            ToolCall::Layers => client.layers().await,
            ToolCall::Materials => client.materials().await,
            ToolCall::CameraInfo => client.camera_info().await,
            ToolCall::Screenshot(options) => {
                let path = client.screenshot(&options).await?;
                Ok(json!({ "file_path": path }))
            }
            ToolCall::BatchScreenshots(options) => client.batch_screenshots(&options).await,
            ToolCall::OpenModel { path } => client.open_model(&path).await,
            ToolCall::SaveModel { path } => client.save_model(path.as_deref()).await,
            ToolCall::Export { format } => {
                let path = client.export(format).await?;
                Ok(json!({ "file_path": path, "format": format }))
            }
            ToolCall::ConsoleStatus => client.console_status().await,
            ToolCall::Reload => client.reload().await,
        }
    }
}

/// Turn an outcome into the JSON an agent sees
pub fn respond(tool: &str, outcome: Result<Value>) -> Value {
    match outcome {
        Ok(result) => json!({ "success": true, "result": result }),
        Err(e) => {
            error!(tool, kind = %e.kind(), "Tool call failed: {}", e);
            e.to_failure()
        }
    }
}
