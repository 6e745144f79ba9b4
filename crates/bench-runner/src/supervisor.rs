use crate::environment::ExecutionEnvironment;
use bench_core::EXIT_CODE_KILLED;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success {
        tool: String,
    },
    Failed {
        tool: String,
        exit_code: i32,
    },
    /// Exit 137 inside a container; `restarted` reports whether the
    /// stop/start cycle that keeps the container's files reachable worked.
    Killed {
        tool: String,
        restarted: bool,
    },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success { .. } => 0,
            Self::Failed { exit_code, .. } => *exit_code,
            Self::Killed { .. } => EXIT_CODE_KILLED,
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { tool } => write!(f, "{} ended successfully", tool),
            Self::Failed { tool, exit_code } => {
                write!(f, "{} exited with an error code {}", tool, exit_code)
            }
            Self::Killed { tool, .. } => {
                write!(f, "{} exited with an error code {}", tool, EXIT_CODE_KILLED)
            }
        }
    }
}

/// Classifies exit codes. Non-zero codes are warnings, never errors; the
/// harness decides whether to abort.
pub struct ProcessSupervisor<'a> {
    tool: &'a str,
    environment: &'a ExecutionEnvironment,
}

impl<'a> ProcessSupervisor<'a> {
    pub fn new(tool: &'a str, environment: &'a ExecutionEnvironment) -> Self {
        Self { tool, environment }
    }

    pub fn classify(&self, exit_code: i32) -> ProcessOutcome {
        if exit_code == 0 {
            let outcome = ProcessOutcome::Success {
                tool: self.tool.to_string(),
            };
            info!(tool = self.tool, "{}", outcome);
            return outcome;
        }

        let outcome = match self.environment {
            ExecutionEnvironment::Container { id, runtime, .. } if exit_code == EXIT_CODE_KILLED => {
                let restarted = runtime
                    .stop_container(id)
                    .and_then(|_| runtime.start_container(id));
                if let Err(err) = &restarted {
                    error!(tool = self.tool, container = %id, "container restart failed: {}", err);
                }
                ProcessOutcome::Killed {
                    tool: self.tool.to_string(),
                    restarted: restarted.is_ok(),
                }
            }
            _ => ProcessOutcome::Failed {
                tool: self.tool.to_string(),
                exit_code,
            },
        };
        warn!(tool = self.tool, exit_code, "{}", outcome);
        outcome
    }
}
