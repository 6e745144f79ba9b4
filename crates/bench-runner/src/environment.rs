use crate::artifacts::copy_dir_contents;
use crate::files::FileAccess;
use crate::runtime::{CommandEnv, ContainerRuntime, HostExecutor};
use bench_core::{decode_latin1, ensure_dir, EngineResult, EnvironmentMode, DISCARD_LOG_PATH};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where `run` sends command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Discard,
    File(PathBuf),
}

impl LogTarget {
    /// Any path naming `/dev/null` is the discard sentinel.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.to_string_lossy().contains(DISCARD_LOG_PATH) {
            Self::Discard
        } else {
            Self::File(path)
        }
    }

    fn shell_path(&self) -> String {
        match self {
            Self::Discard => DISCARD_LOG_PATH.to_string(),
            Self::File(path) => shell_quote(&path.to_string_lossy()),
        }
    }
}

/// The single place the container/local split lives.
///
/// Output handling differs on purpose: the container variant receives the
/// captured stdout/stderr and appends it to the log unless the target is
/// `Discard`, while the local variant hands stream capture to shell
/// redirection and never sees the bytes.
#[derive(Clone)]
pub enum ExecutionEnvironment {
    Container {
        id: String,
        runtime: Arc<dyn ContainerRuntime>,
        default_workdir: PathBuf,
    },
    Local {
        root: PathBuf,
        host: Arc<dyn HostExecutor>,
    },
}

impl fmt::Debug for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container {
                id,
                default_workdir,
                ..
            } => f
                .debug_struct("Container")
                .field("id", id)
                .field("default_workdir", default_workdir)
                .finish(),
            Self::Local { root, .. } => f.debug_struct("Local").field("root", root).finish(),
        }
    }
}

impl ExecutionEnvironment {
    pub fn mode(&self) -> EnvironmentMode {
        match self {
            Self::Container { .. } => EnvironmentMode::Container,
            Self::Local { .. } => EnvironmentMode::Local,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            Self::Container { id, .. } => Some(id),
            Self::Local { .. } => None,
        }
    }

    pub fn files(&self) -> FileAccess<'_> {
        match self {
            Self::Container { id, runtime, .. } => FileAccess::Container {
                id,
                runtime: runtime.as_ref(),
            },
            Self::Local { .. } => FileAccess::Host,
        }
    }

    /// Runs `command` and returns only its exit code; output goes to `log`.
    pub fn run(
        &self,
        command: &str,
        log: &LogTarget,
        working_dir: Option<&Path>,
        env: &CommandEnv,
    ) -> EngineResult<i32> {
        match self {
            Self::Container {
                id,
                runtime,
                default_workdir,
            } => {
                let dir = working_dir.unwrap_or(default_workdir.as_path());
                debug!(container = %id, dir = %dir.display(), command, "container exec");
                let output = runtime.exec_command(id, command, dir, env)?;
                if let LogTarget::File(path) = log {
                    let files = self.files();
                    if !output.stdout.is_empty() {
                        files.append_file(&decode_latin1(&output.stdout), path)?;
                    }
                    if !output.stderr.is_empty() {
                        files.append_file(&decode_latin1(&output.stderr), path)?;
                    }
                }
                Ok(output.exit_code)
            }
            Self::Local { root, host } => {
                let dir = working_dir.unwrap_or(root.as_path());
                let command_line = format!("{} >> {} 2>&1", command, log.shell_path());
                host.execute(&command_line, env, dir)
            }
        }
    }

    /// Copies the contents of `src` into `dst`. A missing source is a no-op.
    ///
    /// Container mode goes straight to the runtime's copy, which also works
    /// once the container has been stopped.
    pub fn copy_out(&self, src: &Path, dst: &Path) -> EngineResult<bool> {
        let copied = match self {
            Self::Container { id, runtime, .. } => {
                if let Some(parent) = dst.parent() {
                    ensure_dir(parent)?;
                }
                runtime.copy_from_container(id, &src.join("."), dst)?
            }
            Self::Local { .. } => {
                if src.is_dir() {
                    ensure_dir(dst)?;
                    copy_dir_contents(src, dst)?;
                    true
                } else if let (true, Some(name)) = (src.is_file(), src.file_name()) {
                    ensure_dir(dst)?;
                    fs::copy(src, dst.join(name))?;
                    true
                } else {
                    false
                }
            }
        };
        if !copied {
            debug!(src = %src.display(), "nothing to copy");
        }
        Ok(copied)
    }

    /// Container mode removes the container; local mode removes the
    /// experiment directory.
    pub fn remove(&self) -> EngineResult<()> {
        match self {
            Self::Container { id, runtime, .. } => runtime.remove_container(id),
            Self::Local { root, .. } => {
                if root.is_dir() {
                    fs::remove_dir_all(root)?;
                }
                Ok(())
            }
        }
    }
}

pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
