//! Tool execution and lifecycle engine for the benchmark harness.
//!
//! One [`ToolEngine`] exists per tool under benchmark. It runs commands in a
//! container or on the host through [`ExecutionEnvironment`], provisions the
//! tool's image, supervises exit codes, records per-run statistics and
//! preserves artifacts.

pub mod artifacts;
pub mod environment;
pub mod files;
pub mod provision;
pub mod runtime;
pub mod stats;
pub mod supervisor;
pub mod testing;
pub mod tool;

pub use artifacts::{ArtifactCopy, ArtifactTargets};
pub use environment::{ExecutionEnvironment, LogTarget};
pub use files::FileAccess;
pub use provision::{ImageProvisioner, ImageReference, ProvisionOutcome, RebuildFlag};
pub use runtime::{
    CommandEnv, ContainerRuntime, DockerCli, ExecOutput, HostExecutor, ImageHandle, ShellExecutor,
};
pub use stats::{SpaceStats, TimeStats, ToolStats};
pub use supervisor::{ProcessOutcome, ProcessSupervisor};
pub use tool::{Tool, ToolCapabilities, ToolEngine};
