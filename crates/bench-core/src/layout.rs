use crate::error::{EngineError, EngineResult};
use crate::{
    CONTAINER_EXPERIMENT_DIR, DIR_KEY_ARTIFACTS, DIR_KEY_EXPERIMENT, DIR_KEY_INSTRUMENTATION,
    DIR_KEY_LOGS, DIR_KEY_SETUP,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Raw path map for one mode, keyed by `experiment`, `logs`, `instrumentation`,
/// `setup` and `artifacts`.
pub type ModePaths = BTreeMap<String, String>;

/// Path descriptor handed over by the harness, one map per execution mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ModePaths>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<ModePaths>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentMode {
    Container,
    Local,
}

impl EnvironmentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryLayout {
    pub experiment: PathBuf,
    pub logs: PathBuf,
    pub instrumentation: PathBuf,
    pub setup: PathBuf,
    pub output: PathBuf,
    pub base_experiment: PathBuf,
}

impl DirectoryLayout {
    /// Resolves the working directories for `mode`.
    ///
    /// Every key must be present for the active mode; a missing key is a
    /// configuration error rather than a silent default. `local_base` is the
    /// host experiments directory and only matters in local mode.
    pub fn resolve(
        tool: &str,
        dir_info: &DirInfo,
        mode: EnvironmentMode,
        local_base: &Path,
    ) -> EngineResult<Self> {
        let paths = match mode {
            EnvironmentMode::Container => dir_info.container.as_ref(),
            EnvironmentMode::Local => dir_info.local.as_ref(),
        }
        .ok_or_else(|| {
            EngineError::configuration(
                tool,
                format!("directory info has no '{}' section", mode.as_str()),
            )
        })?;

        let lookup = |key: &str| -> EngineResult<PathBuf> {
            paths.get(key).map(PathBuf::from).ok_or_else(|| {
                EngineError::configuration(
                    tool,
                    format!(
                        "directory info '{}' section is missing '{}'",
                        mode.as_str(),
                        key
                    ),
                )
            })
        };

        let base_experiment = match mode {
            EnvironmentMode::Container => PathBuf::from(CONTAINER_EXPERIMENT_DIR),
            EnvironmentMode::Local => local_base.to_path_buf(),
        };

        Ok(Self {
            experiment: lookup(DIR_KEY_EXPERIMENT)?,
            logs: lookup(DIR_KEY_LOGS)?,
            instrumentation: lookup(DIR_KEY_INSTRUMENTATION)?,
            setup: lookup(DIR_KEY_SETUP)?,
            output: lookup(DIR_KEY_ARTIFACTS)?,
            base_experiment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode_paths(root: &str) -> ModePaths {
        [
            DIR_KEY_EXPERIMENT,
            DIR_KEY_LOGS,
            DIR_KEY_INSTRUMENTATION,
            DIR_KEY_SETUP,
            DIR_KEY_ARTIFACTS,
        ]
        .iter()
        .map(|key| (key.to_string(), format!("{}/{}", root, key)))
        .collect()
    }

    fn full_dir_info() -> DirInfo {
        DirInfo {
            container: Some(mode_paths("/experiment/subject")),
            local: Some(mode_paths("/host/experiments/subject")),
        }
    }

    #[test]
    fn container_mode_uses_container_section_and_fixed_base() {
        let layout = DirectoryLayout::resolve(
            "foo",
            &full_dir_info(),
            EnvironmentMode::Container,
            Path::new("/host/experiments"),
        )
        .expect("resolve");
        assert_eq!(layout.experiment, PathBuf::from("/experiment/subject/experiment"));
        assert_eq!(layout.logs, PathBuf::from("/experiment/subject/logs"));
        assert_eq!(
            layout.instrumentation,
            PathBuf::from("/experiment/subject/instrumentation")
        );
        assert_eq!(layout.setup, PathBuf::from("/experiment/subject/setup"));
        assert_eq!(layout.output, PathBuf::from("/experiment/subject/artifacts"));
        assert_eq!(layout.base_experiment, PathBuf::from("/experiment"));
    }

    #[test]
    fn local_mode_uses_local_section_and_configured_base() {
        let layout = DirectoryLayout::resolve(
            "foo",
            &full_dir_info(),
            EnvironmentMode::Local,
            Path::new("/host/experiments"),
        )
        .expect("resolve");
        assert_eq!(layout.experiment, PathBuf::from("/host/experiments/subject/experiment"));
        assert_eq!(layout.output, PathBuf::from("/host/experiments/subject/artifacts"));
        assert_eq!(layout.base_experiment, PathBuf::from("/host/experiments"));
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let mut info = full_dir_info();
        if let Some(local) = info.local.as_mut() {
            local.remove(DIR_KEY_SETUP);
        }
        let err = DirectoryLayout::resolve("foo", &info, EnvironmentMode::Local, Path::new("/x"))
            .expect_err("missing setup key must fail");
        assert!(err.is_fatal());
        let msg = err.to_string();
        assert!(msg.contains("foo"), "message should name the tool: {}", msg);
        assert!(msg.contains("setup"), "message should name the key: {}", msg);
    }

    #[test]
    fn missing_mode_section_is_a_configuration_error() {
        let info = DirInfo {
            container: None,
            local: Some(mode_paths("/host")),
        };
        let err = DirectoryLayout::resolve("foo", &info, EnvironmentMode::Container, Path::new("/x"))
            .expect_err("missing container section must fail");
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn dir_info_parses_from_json() {
        let raw = r#"{"container":{"experiment":"/experiment/a","logs":"/logs","instrumentation":"/inst","setup":"/setup","artifacts":"/output"}}"#;
        let info: DirInfo = serde_json::from_str(raw).expect("parse");
        assert!(info.local.is_none());
        let layout =
            DirectoryLayout::resolve("foo", &info, EnvironmentMode::Container, Path::new("/x"))
                .expect("resolve");
        assert_eq!(layout.output, PathBuf::from("/output"));
    }
}
