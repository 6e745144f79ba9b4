use crate::error::EngineResult;
use crate::{CONTAINER_EXPERIMENT_DIR, DEFAULT_IMAGE_PREFIX};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Harness-wide settings the tool engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub use_container: bool,
    pub dir_experiments: PathBuf,
    pub is_purge: bool,
    pub container_workdir: String,
    pub image_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_container: true,
            dir_experiments: PathBuf::from("experiments"),
            is_purge: false,
            container_workdir: CONTAINER_EXPERIMENT_DIR.to_string(),
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        load_document(path)
    }

    /// Image used by a tool that does not name one explicitly.
    pub fn default_image_for(&self, tool_name: &str) -> String {
        format!("{}:{}", self.image_prefix, tool_name.to_lowercase())
    }
}

/// Reads a YAML or JSON document, picking the parser from the file extension.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let raw = fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        Ok(serde_yaml::from_str(&raw)?)
    } else {
        Ok(serde_json::from_str(&raw)?)
    }
}
