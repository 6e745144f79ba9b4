use crate::environment::ExecutionEnvironment;
use bench_core::{ensure_dir, DirectoryLayout, EngineResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persistent harness directories a run's artifacts are preserved into.
/// An empty path means "skip this target".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactTargets {
    pub results: PathBuf,
    pub artifacts: PathBuf,
    pub logs: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactCopy {
    pub src: PathBuf,
    pub dst: PathBuf,
}

fn is_unset(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// Results receive output and logs as a consolidated bundle, artifacts
/// receive output only, logs receive logs only.
pub fn plan_copies(layout: &DirectoryLayout, targets: &ArtifactTargets) -> Vec<ArtifactCopy> {
    let matrix = [
        (&layout.output, &targets.results),
        (&layout.logs, &targets.results),
        (&layout.output, &targets.artifacts),
        (&layout.logs, &targets.logs),
    ];
    matrix
        .into_iter()
        .filter(|(src, dst)| !is_unset(src) && !is_unset(dst))
        .map(|(src, dst)| ArtifactCopy {
            src: src.clone(),
            dst: dst.clone(),
        })
        .collect()
}

/// Best-effort preservation: failed copies are logged and skipped. Returns
/// the copies that actually transferred something.
pub fn save_artifacts(
    tool: &str,
    environment: &ExecutionEnvironment,
    layout: &DirectoryLayout,
    targets: &ArtifactTargets,
) -> Vec<ArtifactCopy> {
    info!(tool, "saving artifacts");
    let mut saved = Vec::new();
    for copy in plan_copies(layout, targets) {
        match environment.copy_out(&copy.src, &copy.dst) {
            Ok(true) => saved.push(copy),
            Ok(false) => {}
            Err(err) => warn!(
                tool,
                src = %copy.src.display(),
                dst = %copy.dst.display(),
                "artifact copy failed: {}",
                err
            ),
        }
    }
    saved
}

/// Recursively copies the contents of `src` into `dst`, overwriting files
/// already there. Symlinks are recreated as links, never followed.
pub(crate) fn copy_dir_contents(src: &Path, dst: &Path) -> EngineResult<()> {
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_symlink() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)?;
            }
            copy_symlink(path, &target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(path, target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> EngineResult<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> EngineResult<()> {
    // Without unix symlinks only file links are preserved, by content.
    if fs::metadata(link).map(|meta| meta.is_file()).unwrap_or(false) {
        fs::copy(link, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ShellExecutor;
    use crate::testing::{FakeContainerRuntime, RuntimeCall, TempDirGuard};
    use std::sync::Arc;

    fn layout(root: &Path) -> DirectoryLayout {
        DirectoryLayout {
            experiment: root.join("experiment"),
            logs: root.join("logs"),
            instrumentation: root.join("inst"),
            setup: root.join("setup"),
            output: root.join("output"),
            base_experiment: root.to_path_buf(),
        }
    }

    #[test]
    fn plan_duplicates_into_results_and_skips_empty_targets() {
        let layout = layout(Path::new("/x"));
        let targets = ArtifactTargets {
            results: PathBuf::from("/r"),
            artifacts: PathBuf::from("/a"),
            logs: PathBuf::new(),
        };
        let plan = plan_copies(&layout, &targets);
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|copy| copy.dst != PathBuf::new()));
        assert_eq!(plan.iter().filter(|c| c.dst == PathBuf::from("/r")).count(), 2);
    }

    #[test]
    fn local_save_copies_tree_contents() {
        let root = TempDirGuard::new("bench_artifacts_local");
        let layout = layout(&root.path);
        ensure_dir(&layout.output.join("patches")).expect("dir");
        fs::write(layout.output.join("patches").join("fix.diff"), "diff").expect("write");
        ensure_dir(&layout.logs).expect("dir");
        fs::write(layout.logs.join("foo-output.log"), "log").expect("write");
        let targets = ArtifactTargets {
            results: root.path.join("results"),
            artifacts: root.path.join("artifacts"),
            logs: root.path.join("saved_logs"),
        };
        let environment = ExecutionEnvironment::Local {
            root: layout.experiment.clone(),
            host: Arc::new(ShellExecutor),
        };
        let saved = save_artifacts("foo", &environment, &layout, &targets);
        assert_eq!(saved.len(), 4);
        assert!(targets.results.join("patches").join("fix.diff").is_file());
        assert!(targets.results.join("foo-output.log").is_file());
        assert!(targets.artifacts.join("patches").join("fix.diff").is_file());
        assert!(!targets.artifacts.join("foo-output.log").exists());
        assert!(targets.logs.join("foo-output.log").is_file());
    }

    #[test]
    fn local_save_without_output_dir_does_not_fail() {
        let root = TempDirGuard::new("bench_artifacts_empty");
        let layout = layout(&root.path);
        let targets = ArtifactTargets {
            results: root.path.join("results"),
            ..ArtifactTargets::default()
        };
        let environment = ExecutionEnvironment::Local {
            root: layout.experiment.clone(),
            host: Arc::new(ShellExecutor),
        };
        assert!(save_artifacts("foo", &environment, &layout, &targets).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_copied_as_links_without_recursing() {
        let root = TempDirGuard::new("bench_artifacts_links");
        let src = root.path.join("output");
        ensure_dir(&src.join("nested")).expect("dir");
        fs::write(src.join("nested").join("fix.diff"), "diff").expect("write");
        std::os::unix::fs::symlink(".", src.join("loop")).expect("loop link");
        std::os::unix::fs::symlink("nested/fix.diff", src.join("latest.diff")).expect("file link");

        let dst = root.path.join("results");
        copy_dir_contents(&src, &dst).expect("copy");
        copy_dir_contents(&src, &dst).expect("copy over existing links");

        assert!(dst.join("nested").join("fix.diff").is_file());
        assert_eq!(fs::read_link(dst.join("loop")).expect("loop"), PathBuf::from("."));
        assert_eq!(
            fs::read_to_string(dst.join("latest.diff")).expect("file link"),
            "diff"
        );
        assert!(fs::symlink_metadata(dst.join("latest.diff"))
            .expect("meta")
            .file_type()
            .is_symlink());
    }

    #[test]
    fn container_save_with_empty_logs_target_never_copies_to_logs() {
        let runtime = FakeContainerRuntime::new();
        runtime.add_file("/out/patch.diff", b"diff");
        runtime.add_file("/logs/foo-output.log", b"log");
        let layout = DirectoryLayout {
            experiment: PathBuf::from("/experiment/subject"),
            logs: PathBuf::from("/logs"),
            instrumentation: PathBuf::from("/inst"),
            setup: PathBuf::from("/setup"),
            output: PathBuf::from("/out"),
            base_experiment: PathBuf::from("/experiment"),
        };
        let root = TempDirGuard::new("bench_artifacts_container");
        let targets = ArtifactTargets {
            results: root.path.join("results"),
            artifacts: root.path.join("artifacts"),
            logs: PathBuf::new(),
        };
        let environment = ExecutionEnvironment::Container {
            id: "c-9".to_string(),
            runtime: Arc::new(runtime.clone()),
            default_workdir: PathBuf::from("/experiment"),
        };
        let saved = save_artifacts("foo", &environment, &layout, &targets);
        assert_eq!(saved.len(), 3);
        let copies: Vec<_> = runtime
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::CopyFrom { src, dst, .. } => Some((src, dst)),
                _ => None,
            })
            .collect();
        assert_eq!(copies.len(), 3);
        assert!(copies.contains(&(PathBuf::from("/logs/."), targets.results.clone())));
        assert!(copies.iter().all(|(_, dst)| dst != &targets.logs));
        assert!(targets.results.join("patch.diff").is_file());
        assert!(targets.artifacts.join("patch.diff").is_file());
    }
}
