use crate::artifacts::{save_artifacts, ArtifactCopy, ArtifactTargets};
use crate::environment::{shell_quote, ExecutionEnvironment, LogTarget};
use crate::files::FileAccess;
use crate::provision::{verify_host_tool, ImageProvisioner, ProvisionOutcome, RebuildFlag};
use crate::runtime::{CommandEnv, ContainerRuntime, DockerCli, HostExecutor, ShellExecutor};
use crate::stats::ToolStats;
use crate::supervisor::{ProcessOutcome, ProcessSupervisor};
use bench_core::{
    DirInfo, DirectoryLayout, EngineConfig, EngineError, EngineResult, EnvironmentMode,
    LOG_TIMESTAMP_FORMAT, OUTPUT_LOG_SUFFIX,
};
use chrono::Local;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static OUTPUT_LOG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^.*{}$", regex::escape(OUTPUT_LOG_SUFFIX)))
        .expect("output log pattern is valid")
});

/// External collaborators injected at construction.
#[derive(Clone)]
pub struct ToolCapabilities {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub host: Arc<dyn HostExecutor>,
    pub rebuild: RebuildFlag,
}

impl Default for ToolCapabilities {
    fn default() -> Self {
        Self {
            runtime: Arc::new(DockerCli::default()),
            host: Arc::new(ShellExecutor),
            rebuild: RebuildFlag::new(),
        }
    }
}

/// Per-tool execution and lifecycle state. The harness calls
/// `update_info`, `pre_process`, run-specific work, then `post_process`,
/// and finally reads statistics and saves artifacts.
pub struct ToolEngine {
    name: String,
    image: Option<String>,
    config: EngineConfig,
    capabilities: ToolCapabilities,
    environment: Option<ExecutionEnvironment>,
    layout: Option<DirectoryLayout>,
    instrument_only: bool,
    stats: ToolStats,
    log_output_path: Option<PathBuf>,
}

impl ToolEngine {
    pub fn new(name: impl Into<String>, config: EngineConfig, capabilities: ToolCapabilities) -> Self {
        let name = name.into();
        debug!(tool = %name, "using tool");
        let image = Some(config.default_image_for(&name));
        Self {
            name,
            image,
            config,
            capabilities,
            environment: None,
            layout: None,
            instrument_only: false,
            stats: ToolStats::default(),
            log_output_path: None,
        }
    }

    /// Overrides the default `<prefix>:<name>` image; `None` means the tool
    /// ships no image.
    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rebuild_flag(&self) -> &RebuildFlag {
        &self.capabilities.rebuild
    }

    pub fn is_instrument_only(&self) -> bool {
        self.instrument_only
    }

    pub fn stats(&self) -> &ToolStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ToolStats {
        &mut self.stats
    }

    pub fn environment(&self) -> EngineResult<&ExecutionEnvironment> {
        self.environment.as_ref().ok_or_else(|| self.not_initialised())
    }

    pub fn layout(&self) -> EngineResult<&DirectoryLayout> {
        self.layout.as_ref().ok_or_else(|| self.not_initialised())
    }

    fn not_initialised(&self) -> EngineError {
        EngineError::configuration(&self.name, "update_info has not been called for this run")
    }

    /// Starts a new invocation cycle: fixes the execution mode, resolves the
    /// working directories and replaces the statistics record.
    pub fn update_info(
        &mut self,
        container_id: Option<String>,
        instrument_only: bool,
        dir_info: &DirInfo,
    ) -> EngineResult<()> {
        let mode = if container_id.is_some() {
            EnvironmentMode::Container
        } else {
            EnvironmentMode::Local
        };
        let layout =
            DirectoryLayout::resolve(&self.name, dir_info, mode, &self.config.dir_experiments)?;
        let environment = match container_id {
            Some(id) => ExecutionEnvironment::Container {
                id,
                runtime: self.capabilities.runtime.clone(),
                default_workdir: PathBuf::from(&self.config.container_workdir),
            },
            None => ExecutionEnvironment::Local {
                root: layout.experiment.clone(),
                host: self.capabilities.host.clone(),
            },
        };
        debug!(tool = %self.name, environment = ?environment, "updated run info");
        self.environment = Some(environment);
        self.layout = Some(layout);
        self.instrument_only = instrument_only;
        self.stats = ToolStats::default();
        self.log_output_path = None;
        Ok(())
    }

    pub fn pre_process(&self) -> EngineResult<()> {
        self.check_tool_exists().map(|_| ())
    }

    /// Container mode provisions the image; local mode requires the tool on
    /// `PATH`. Before `update_info` the configured mode decides.
    pub fn check_tool_exists(&self) -> EngineResult<Option<ProvisionOutcome>> {
        let use_container = match &self.environment {
            Some(environment) => environment.mode() == EnvironmentMode::Container,
            None => self.config.use_container,
        };
        if use_container {
            let provisioner = ImageProvisioner::new(
                self.capabilities.runtime.as_ref(),
                &self.capabilities.rebuild,
            );
            provisioner.ensure(&self.name, self.image()).map(Some)
        } else {
            let path = verify_host_tool(&self.name, self.capabilities.host.as_ref())?;
            debug!(tool = %self.name, path = %path.display(), "tool found on host");
            Ok(None)
        }
    }

    /// Prepares an analysis run: names the output log after the
    /// configuration and bug, creates the output directory and starts the
    /// clock.
    pub fn begin_analysis(&mut self, config_id: &str, bug_id: &str) -> EngineResult<PathBuf> {
        info!(tool = %self.name, "running analysis");
        let layout = self.layout()?;
        let log_path = layout.logs.join(format!(
            "{}-{}-{}{}",
            config_id,
            self.name.to_lowercase(),
            bug_id,
            OUTPUT_LOG_SUFFIX
        ));
        let mkdir = format!("mkdir -p {}", shell_quote(&layout.output.to_string_lossy()));
        let status =
            self.run_command(&mkdir, &LogTarget::Discard, Some(Path::new("/")), &CommandEnv::new())?;
        if status != 0 {
            warn!(tool = %self.name, command = %mkdir, status, "could not create output directory");
        }
        self.log_output_path = Some(log_path.clone());
        self.stats.time.mark_start();
        Ok(log_path)
    }

    pub fn run_command(
        &self,
        command: &str,
        log: &LogTarget,
        working_dir: Option<&Path>,
        env: &CommandEnv,
    ) -> EngineResult<i32> {
        self.environment()?.run(command, log, working_dir, env)
    }

    pub fn process_status(&self, status: i32) -> EngineResult<ProcessOutcome> {
        Ok(ProcessSupervisor::new(&self.name, self.environment()?).classify(status))
    }

    pub fn post_process(&mut self) -> EngineResult<()> {
        self.stats.time.mark_end();
        let environment = self.environment()?;
        if let Some(id) = environment.container_id() {
            self.capabilities.runtime.stop_container(id)?;
        }
        if self.config.is_purge {
            self.clean_up()?;
        }
        Ok(())
    }

    pub fn clean_up(&self) -> EngineResult<()> {
        info!(tool = %self.name, "cleaning up");
        self.environment()?.remove()
    }

    pub fn save_artifacts(&self, targets: &ArtifactTargets) -> EngineResult<Vec<ArtifactCopy>> {
        Ok(save_artifacts(
            &self.name,
            self.environment()?,
            self.layout()?,
            targets,
        ))
    }

    /// Output log for this run. When no run named one, the logs directory
    /// is scanned for a `*-output.log` carrying the tool's name, compared
    /// case-insensitively as `begin_analysis` lowercases it, and the first
    /// hit is cached.
    pub fn output_log_path(&mut self) -> EngineResult<Option<PathBuf>> {
        if self.log_output_path.is_none() {
            let logs = self.layout()?.logs.clone();
            let needle = self.name.to_lowercase();
            let found = self
                .files()?
                .list_dir(&logs, Some(OUTPUT_LOG_REGEX.as_str()))?
                .into_iter()
                .find(|path| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().to_lowercase().contains(&needle))
                        .unwrap_or(false)
                });
            self.log_output_path = found;
        }
        Ok(self.log_output_path.clone())
    }

    pub fn print_stats(&self) {
        self.stats.print(&self.name);
    }

    fn append_to_output_log(&self, text: &str) -> EngineResult<()> {
        let path = self.log_output_path.as_ref().ok_or_else(|| {
            EngineError::configuration(&self.name, "no output log path for this run")
        })?;
        self.files()?.append_file(text, path)
    }

    fn now() -> String {
        Local::now().format(LOG_TIMESTAMP_FORMAT).to_string()
    }

    pub fn timestamp_log(&self) -> EngineResult<()> {
        self.append_to_output_log(&Self::now())
    }

    pub fn timestamp_log_start(&self) -> EngineResult<()> {
        self.append_to_output_log(&format!("{}\n", Self::now()))
    }

    pub fn timestamp_log_end(&self) -> EngineResult<()> {
        self.append_to_output_log(&format!("\n{}", Self::now()))
    }

    pub fn files(&self) -> EngineResult<FileAccess<'_>> {
        Ok(self.environment()?.files())
    }

    pub fn read_file(&self, path: &Path) -> EngineResult<Option<String>> {
        self.files()?.read_file(path)
    }

    pub fn read_json(&self, path: &Path) -> EngineResult<Option<Value>> {
        self.files()?.read_json(path)
    }

    pub fn append_file(&self, contents: &str, path: &Path) -> EngineResult<()> {
        self.files()?.append_file(contents, path)
    }

    pub fn write_file(&self, contents: &str, path: &Path) -> EngineResult<()> {
        self.files()?.write_file(contents, path)
    }

    pub fn write_json(&self, value: &Value, path: &Path) -> EngineResult<()> {
        self.files()?.write_json(value, path)
    }

    pub fn list_dir(&self, dir: &Path, pattern: Option<&str>) -> EngineResult<Vec<PathBuf>> {
        self.files()?.list_dir(dir, pattern)
    }

    pub fn is_dir(&self, path: &Path) -> EngineResult<bool> {
        self.files()?.is_dir(path)
    }

    pub fn is_file(&self, path: &Path) -> EngineResult<bool> {
        self.files()?.is_file(path)
    }
}

/// A benchmarked tool. Implementors provide output analysis; the lifecycle
/// comes from the embedded engine.
pub trait Tool {
    fn engine(&self) -> &ToolEngine;
    fn engine_mut(&mut self) -> &mut ToolEngine;

    /// Parses the tool's output log into the engine's statistics record.
    fn analyse_output(
        &mut self,
        dir_info: &DirInfo,
        bug_id: &str,
        fail_list: &[String],
    ) -> EngineResult<ToolStats>;

    fn name(&self) -> &str {
        self.engine().name()
    }
}
