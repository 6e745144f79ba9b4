//! Capabilities the engine consumes: a container runtime and a host process
//! executor. Both are object-safe and `Send + Sync` so engines can be moved
//! across harness worker threads.

use bench_core::{driver_message, EngineError, EngineResult};
use std::collections::BTreeMap;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::{debug, warn};

pub type CommandEnv = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub id: String,
}

pub trait ContainerRuntime: Send + Sync {
    fn exec_command(
        &self,
        container_id: &str,
        command: &str,
        working_dir: &Path,
        env: &CommandEnv,
    ) -> EngineResult<ExecOutput>;
    fn start_container(&self, container_id: &str) -> EngineResult<()>;
    fn stop_container(&self, container_id: &str) -> EngineResult<()>;
    fn remove_container(&self, container_id: &str) -> EngineResult<()>;
    fn image_exists(&self, repository: &str, tag: &str) -> EngineResult<bool>;
    /// Returns `None` when the registry cannot serve the image.
    fn pull_image(&self, repository: &str, tag: &str) -> Option<ImageHandle>;
    fn get_image(&self, repository: &str, tag: &str) -> EngineResult<ImageHandle>;
    /// Works on stopped containers. Returns `false` when `src` does not exist.
    fn copy_from_container(&self, container_id: &str, src: &Path, dst: &Path)
        -> EngineResult<bool>;
    /// Returns `None` when the file does not exist in the container.
    fn read_file(&self, container_id: &str, path: &Path) -> EngineResult<Option<Vec<u8>>>;
    fn write_file(
        &self,
        container_id: &str,
        path: &Path,
        contents: &[u8],
        append: bool,
    ) -> EngineResult<()>;
    fn list_dir(&self, container_id: &str, path: &Path) -> EngineResult<Vec<String>>;
    fn is_dir(&self, container_id: &str, path: &Path) -> EngineResult<bool>;
    fn is_file(&self, container_id: &str, path: &Path) -> EngineResult<bool>;
}

pub trait HostExecutor: Send + Sync {
    /// Runs a shell command line (redirections included) and returns its exit code.
    fn execute(&self, command_line: &str, env: &CommandEnv, working_dir: &Path)
        -> EngineResult<i32>;

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        let search_path = env::var_os("PATH")?;
        env::split_paths(&search_path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Maps a finished process to a shell-style exit code; signal deaths report
/// `128 + signal`, so SIGKILL becomes 137.
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Host executor backed by `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl HostExecutor for ShellExecutor {
    fn execute(
        &self,
        command_line: &str,
        env: &CommandEnv,
        working_dir: &Path,
    ) -> EngineResult<i32> {
        debug!(command = command_line, dir = %working_dir.display(), "host exec");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .status()?;
        Ok(exit_code_of(&status))
    }
}

/// Container runtime that drives the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn probe(&self, container_id: &str, flag: &str, path: &Path) -> EngineResult<bool> {
        let mut cmd = self.command();
        cmd.args(["exec", container_id, "test", flag]).arg(path);
        Ok(cmd.output()?.status.success())
    }
}

fn run_checked_command(mut cmd: Command, step: &str) -> EngineResult<Output> {
    let out = cmd.output()?;
    if out.status.success() {
        return Ok(out);
    }
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    let detail = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "command exited non-zero".to_string()
    };
    Err(EngineError::runtime(step, detail))
}

/// `docker cp` reports a missing source path with one of these, depending
/// on the daemon version.
fn is_missing_path_error(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container:path") || stderr.contains("could not find the file")
}

fn image_name(repository: &str, tag: &str) -> String {
    format!("{}:{}", repository, tag)
}

impl ContainerRuntime for DockerCli {
    fn exec_command(
        &self,
        container_id: &str,
        command: &str,
        working_dir: &Path,
        env: &CommandEnv,
    ) -> EngineResult<ExecOutput> {
        let mut cmd = self.command();
        cmd.arg("exec").arg("-w").arg(working_dir);
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        cmd.args([container_id, "/bin/sh", "-c", command]);
        let out = cmd.output()?;
        Ok(ExecOutput {
            exit_code: exit_code_of(&out.status),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    fn start_container(&self, container_id: &str) -> EngineResult<()> {
        let mut cmd = self.command();
        cmd.args(["start", container_id]);
        run_checked_command(cmd, "docker start failed").map(|_| ())
    }

    fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        let mut cmd = self.command();
        cmd.args(["stop", container_id]);
        run_checked_command(cmd, "docker stop failed").map(|_| ())
    }

    fn remove_container(&self, container_id: &str) -> EngineResult<()> {
        let mut cmd = self.command();
        cmd.args(["rm", "-f", container_id]);
        run_checked_command(cmd, "docker rm failed").map(|_| ())
    }

    fn image_exists(&self, repository: &str, tag: &str) -> EngineResult<bool> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", image_name(repository, tag).as_str()]);
        Ok(cmd.output()?.status.success())
    }

    fn pull_image(&self, repository: &str, tag: &str) -> Option<ImageHandle> {
        let mut cmd = self.command();
        cmd.args(["pull", image_name(repository, tag).as_str()]);
        match run_checked_command(cmd, "docker pull failed") {
            Ok(_) => self.get_image(repository, tag).ok(),
            Err(err) => {
                warn!(
                    image = %image_name(repository, tag),
                    "{}",
                    driver_message("container", "docker", &err.to_string())
                );
                None
            }
        }
    }

    fn get_image(&self, repository: &str, tag: &str) -> EngineResult<ImageHandle> {
        let mut cmd = self.command();
        cmd.args([
            "image",
            "inspect",
            "--format",
            "{{.Id}}",
            image_name(repository, tag).as_str(),
        ]);
        let out = run_checked_command(cmd, "docker image inspect failed")?;
        Ok(ImageHandle {
            id: String::from_utf8_lossy(&out.stdout).trim().to_string(),
        })
    }

    fn copy_from_container(
        &self,
        container_id: &str,
        src: &Path,
        dst: &Path,
    ) -> EngineResult<bool> {
        let mut cmd = self.command();
        cmd.arg("cp")
            .arg(format!("{}:{}", container_id, src.display()))
            .arg(dst);
        let out = cmd.output()?;
        if out.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        if is_missing_path_error(&stderr) {
            debug!(container = container_id, src = %src.display(), "{}", stderr);
            return Ok(false);
        }
        Err(EngineError::runtime("docker cp failed", stderr))
    }

    fn read_file(&self, container_id: &str, path: &Path) -> EngineResult<Option<Vec<u8>>> {
        if !self.is_file(container_id, path)? {
            return Ok(None);
        }
        let mut cmd = self.command();
        cmd.args(["exec", container_id, "cat"]).arg(path);
        let out = run_checked_command(cmd, "docker exec cat failed")?;
        Ok(Some(out.stdout))
    }

    fn write_file(
        &self,
        container_id: &str,
        path: &Path,
        contents: &[u8],
        append: bool,
    ) -> EngineResult<()> {
        let redirect = if append { ">>" } else { ">" };
        let script = format!(
            "mkdir -p \"$(dirname \"$0\")\" && cat {} \"$0\"",
            redirect
        );
        let mut child = Command::new(&self.binary)
            .args(["exec", "-i", container_id, "/bin/sh", "-c", &script])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents)?;
        }
        let out = child.wait_with_output()?;
        if out.status.success() {
            Ok(())
        } else {
            Err(EngineError::runtime(
                "docker exec write failed",
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ))
        }
    }

    fn list_dir(&self, container_id: &str, path: &Path) -> EngineResult<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["exec", container_id, "ls", "-1A"]).arg(path);
        let out = run_checked_command(cmd, "docker exec ls failed")?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn is_dir(&self, container_id: &str, path: &Path) -> EngineResult<bool> {
        self.probe(container_id, "-d", path)
    }

    fn is_file(&self, container_id: &str, path: &Path) -> EngineResult<bool> {
        self.probe(container_id, "-f", path)
    }
}
