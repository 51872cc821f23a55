//! Catalog of remote capabilities
//!
//! Every capability the host runtime exposes is a variant here, so an unknown
//! name is rejected before anything goes over the wire.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Eval,
    EvalFile,
    ModelInfo,
    ListEntities,
    Selection,
    Layers,
    Materials,
    CameraInfo,
    Screenshot,
    BatchScreenshots,
    OpenModel,
    SaveModel,
    Export,
    ConsoleStatus,
    Reload,
    Ping,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown method: {0}")]
pub struct UnknownMethod(pub String);

impl Method {
    pub const ALL: &'static [Method] = &[
        Method::Eval,
        Method::EvalFile,
        Method::ModelInfo,
        Method::ListEntities,
        Method::Selection,
        Method::Layers,
        Method::Materials,
        Method::CameraInfo,
        Method::Screenshot,
        Method::BatchScreenshots,
        Method::OpenModel,
        Method::SaveModel,
        Method::Export,
        Method::ConsoleStatus,
        Method::Reload,
        Method::Ping,
    ];

    /// Short name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Method::Eval => "eval",
            Method::EvalFile => "eval_file",
            Method::ModelInfo => "model_info",
            Method::ListEntities => "list_entities",
            Method::Selection => "selection",
            Method::Layers => "layers",
            Method::Materials => "materials",
            Method::CameraInfo => "camera_info",
            Method::Screenshot => "screenshot",
            Method::BatchScreenshots => "batch_screenshots",
            Method::OpenModel => "open_model",
            Method::SaveModel => "save_model",
            Method::Export => "export",
            Method::ConsoleStatus => "console_status",
            Method::Reload => "reload",
            Method::Ping => "ping",
        }
    }

    /// Tool name the host runtime dispatches on
    pub fn wire_name(&self) -> &'static str {
        match self {
            Method::Eval => "eval_ruby",
            Method::EvalFile => "eval_ruby_file",
            Method::ModelInfo => "get_model_info",
            Method::ListEntities => "list_entities",
            Method::Selection => "get_selection",
            Method::Layers => "get_layers",
            Method::Materials => "get_materials",
            Method::CameraInfo => "get_camera_info",
            Method::Screenshot => "take_screenshot",
            Method::BatchScreenshots => "take_batch_screenshots",
            Method::OpenModel => "open_model",
            Method::SaveModel => "save_model",
            Method::Export => "export_scene",
            Method::ConsoleStatus => "console_capture_status",
            Method::Reload => "reload_extension",
            Method::Ping => "ping",
        }
    }

    /// Whether the call can change host state
    ///
    /// Mutating calls must never be retried blindly: after a transport
    /// failure nobody knows whether the side effect happened.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Method::Eval
                | Method::EvalFile
                | Method::BatchScreenshots
                | Method::OpenModel
                | Method::SaveModel
                | Method::Export
                | Method::Reload
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    /// Accepts the short name (dashes allowed), the wire name, or `status`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        if normalized == "status" {
            return Ok(Method::Ping);
        }
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.name() == normalized || m.wire_name() == normalized)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}
