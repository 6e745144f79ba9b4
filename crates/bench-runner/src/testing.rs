//! In-memory collaborators used by the engine's own tests and by harness
//! integration tests that must not touch a real container daemon.

use crate::runtime::{CommandEnv, ContainerRuntime, ExecOutput, ImageHandle};
use bench_core::{ensure_dir, EngineError, EngineResult};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct TempDirGuard {
    pub path: PathBuf,
}

impl TempDirGuard {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&path).expect("temp dir");
        Self { path }
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Exec {
        container_id: String,
        command: String,
        working_dir: PathBuf,
    },
    Start(String),
    Stop(String),
    Remove(String),
    ImageExists(String),
    Pull(String),
    GetImage(String),
    CopyFrom {
        container_id: String,
        src: PathBuf,
        dst: PathBuf,
    },
    Write {
        path: PathBuf,
        append: bool,
    },
}

#[derive(Default)]
struct FakeRuntimeState {
    calls: Vec<RuntimeCall>,
    exec_outputs: VecDeque<ExecOutput>,
    local_images: HashMap<String, String>,
    registry_images: HashMap<String, String>,
    files: BTreeMap<PathBuf, Vec<u8>>,
    stopped: HashSet<String>,
}

impl FakeRuntimeState {
    /// `docker exec` semantics: anything that runs inside the container
    /// fails once it has been stopped.
    fn ensure_running(&self, container_id: &str) -> EngineResult<()> {
        if self.stopped.contains(container_id) {
            return Err(EngineError::runtime(
                "fake exec",
                format!("container {} is not running", container_id),
            ));
        }
        Ok(())
    }
}

/// Recording container runtime with an in-memory image store and filesystem.
/// Stopped containers reject exec-style calls but still allow copies out,
/// as `docker cp` does.
#[derive(Clone, Default)]
pub struct FakeContainerRuntime {
    state: Arc<Mutex<FakeRuntimeState>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, FakeRuntimeState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::runtime("fake runtime", "state lock poisoned"))
    }

    /// Queues the result of the next `exec_command`; an empty queue yields exit 0.
    pub fn push_exec_output(&self, output: ExecOutput) {
        if let Ok(mut state) = self.lock() {
            state.exec_outputs.push_back(output);
        }
    }

    pub fn add_local_image(&self, image: &str, id: &str) {
        if let Ok(mut state) = self.lock() {
            state.local_images.insert(image.to_string(), id.to_string());
        }
    }

    pub fn add_registry_image(&self, image: &str, id: &str) {
        if let Ok(mut state) = self.lock() {
            state.registry_images.insert(image.to_string(), id.to_string());
        }
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: &[u8]) {
        if let Ok(mut state) = self.lock() {
            state.files.insert(path.into(), contents.to_vec());
        }
    }

    pub fn file(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().ok()?.files.get(path).cloned()
    }

    pub fn is_stopped(&self, container_id: &str) -> bool {
        self.lock()
            .map(|state| state.stopped.contains(container_id))
            .unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().map(|state| state.calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: RuntimeCall) -> EngineResult<MutexGuard<'_, FakeRuntimeState>> {
        let mut state = self.lock()?;
        state.calls.push(call);
        Ok(state)
    }
}

fn key(repository: &str, tag: &str) -> String {
    format!("{}:{}", repository, tag)
}

impl ContainerRuntime for FakeContainerRuntime {
    fn exec_command(
        &self,
        container_id: &str,
        command: &str,
        working_dir: &Path,
        _env: &CommandEnv,
    ) -> EngineResult<ExecOutput> {
        let mut state = self.record(RuntimeCall::Exec {
            container_id: container_id.to_string(),
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
        })?;
        state.ensure_running(container_id)?;
        Ok(state.exec_outputs.pop_front().unwrap_or_default())
    }

    fn start_container(&self, container_id: &str) -> EngineResult<()> {
        let mut state = self.record(RuntimeCall::Start(container_id.to_string()))?;
        state.stopped.remove(container_id);
        Ok(())
    }

    fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        let mut state = self.record(RuntimeCall::Stop(container_id.to_string()))?;
        state.stopped.insert(container_id.to_string());
        Ok(())
    }

    fn remove_container(&self, container_id: &str) -> EngineResult<()> {
        self.record(RuntimeCall::Remove(container_id.to_string()))
            .map(|_| ())
    }

    fn image_exists(&self, repository: &str, tag: &str) -> EngineResult<bool> {
        let image = key(repository, tag);
        let state = self.record(RuntimeCall::ImageExists(image.clone()))?;
        Ok(state.local_images.contains_key(&image))
    }

    fn pull_image(&self, repository: &str, tag: &str) -> Option<ImageHandle> {
        let image = key(repository, tag);
        let mut state = self.record(RuntimeCall::Pull(image.clone())).ok()?;
        let id = state.registry_images.get(&image).cloned()?;
        state.local_images.insert(image, id.clone());
        Some(ImageHandle { id })
    }

    fn get_image(&self, repository: &str, tag: &str) -> EngineResult<ImageHandle> {
        let image = key(repository, tag);
        let state = self.record(RuntimeCall::GetImage(image.clone()))?;
        state
            .local_images
            .get(&image)
            .map(|id| ImageHandle { id: id.clone() })
            .ok_or_else(|| EngineError::runtime("fake get_image", format!("no image {}", image)))
    }

    fn copy_from_container(
        &self,
        container_id: &str,
        src: &Path,
        dst: &Path,
    ) -> EngineResult<bool> {
        let state = self.record(RuntimeCall::CopyFrom {
            container_id: container_id.to_string(),
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        })?;
        // Component comparison drops the trailing `/.` of a contents copy.
        let matches: Vec<(PathBuf, Vec<u8>)> = state
            .files
            .iter()
            .filter_map(|(file, contents)| {
                let rel = file.strip_prefix(src).ok()?;
                let target = if rel.as_os_str().is_empty() {
                    dst.join(file.file_name()?)
                } else {
                    dst.join(rel)
                };
                Some((target, contents.clone()))
            })
            .collect();
        drop(state);
        for (target, contents) in &matches {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::write(target, contents)?;
        }
        Ok(!matches.is_empty())
    }

    fn read_file(&self, container_id: &str, path: &Path) -> EngineResult<Option<Vec<u8>>> {
        let state = self.lock()?;
        state.ensure_running(container_id)?;
        Ok(state.files.get(path).cloned())
    }

    fn write_file(
        &self,
        container_id: &str,
        path: &Path,
        contents: &[u8],
        append: bool,
    ) -> EngineResult<()> {
        let mut state = self.record(RuntimeCall::Write {
            path: path.to_path_buf(),
            append,
        })?;
        state.ensure_running(container_id)?;
        let entry = state.files.entry(path.to_path_buf()).or_default();
        if !append {
            entry.clear();
        }
        entry.extend_from_slice(contents);
        Ok(())
    }

    fn list_dir(&self, container_id: &str, path: &Path) -> EngineResult<Vec<String>> {
        let state = self.lock()?;
        state.ensure_running(container_id)?;
        let mut names: Vec<String> = state
            .files
            .keys()
            .filter_map(|file| file.strip_prefix(path).ok())
            .filter_map(|rel| rel.components().next())
            .map(|first| first.as_os_str().to_string_lossy().into_owned())
            .collect();
        names.dedup();
        Ok(names)
    }

    fn is_dir(&self, container_id: &str, path: &Path) -> EngineResult<bool> {
        let state = self.lock()?;
        state.ensure_running(container_id)?;
        Ok(state
            .files
            .keys()
            .any(|file| file != path && file.starts_with(path)))
    }

    fn is_file(&self, container_id: &str, path: &Path) -> EngineResult<bool> {
        let state = self.lock()?;
        state.ensure_running(container_id)?;
        Ok(state.files.contains_key(path))
    }
}
