//! Parameter types for capabilities that take more than a string

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity filter for `list_entities`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[default]
    All,
    Faces,
    Edges,
    Groups,
    Components,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::All => "all",
            EntityType::Faces => "faces",
            EntityType::Edges => "edges",
            EntityType::Groups => "groups",
            EntityType::Components => "components",
        };
        f.write_str(s)
    }
}

/// Output format for `export`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Skp,
    Obj,
    Dae,
    Stl,
    Png,
    Jpg,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportFormat::Skp => "skp",
            ExportFormat::Obj => "obj",
            ExportFormat::Dae => "dae",
            ExportFormat::Stl => "stl",
            ExportFormat::Png => "png",
            ExportFormat::Jpg => "jpg",
        };
        f.write_str(s)
    }
}

/// Options for a single screenshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotOptions {
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
    /// Where the host should write the image; it picks a path when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            transparent: false,
            output_path: None,
        }
    }
}

/// Options for a batch of screenshots from different cameras
///
/// Each shot is passed through to the host untouched, e.g.
/// `{"camera": {"type": "standard_view", "view": "top"}, "name": "top"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchScreenshotOptions {
    pub shots: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub base_name: String,
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
    /// Put the user's camera back when the batch is done
    pub restore_camera: bool,
}

impl BatchScreenshotOptions {
    pub fn new(shots: Vec<Value>) -> Self {
        Self {
            shots,
            output_dir: None,
            base_name: "screenshot".to_string(),
            width: 1920,
            height: 1080,
            transparent: false,
            restore_camera: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_screenshot_params_omit_unset_path() {
        let params = serde_json::to_value(ScreenshotOptions::default()).unwrap();
        assert_eq!(params, json!({"width": 1920, "height": 1080, "transparent": false}));

        let params = serde_json::to_value(ScreenshotOptions {
            output_path: Some(PathBuf::from("/tmp/shot.png")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(params["output_path"], "/tmp/shot.png");
    }

    #[test]
    fn test_enum_wire_spelling() {
        assert_eq!(serde_json::to_value(EntityType::Components).unwrap(), json!("components"));
        assert_eq!(serde_json::to_value(ExportFormat::Stl).unwrap(), json!("stl"));
        assert_eq!(EntityType::default().to_string(), "all");
        assert_eq!(ExportFormat::default().to_string(), "skp");
    }
}
