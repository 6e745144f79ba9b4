use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure taxonomy for the tool engine.
///
/// `Configuration` and `Provisioning` are fatal for the current tool and always
/// carry the tool name. Non-zero process exits are not errors at all; they are
/// reported by the supervisor.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error for {tool}: {message}")]
    Configuration { tool: String, message: String },

    #[error("provisioning error for {tool}: {message}")]
    Provisioning { tool: String, message: String },

    #[error("{step}: {detail}")]
    Runtime { step: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    pub fn configuration(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn provisioning(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn runtime(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Runtime {
            step: step.into(),
            detail: detail.into(),
        }
    }

    /// True for the classes that must halt the current tool's run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Provisioning { .. })
    }
}
