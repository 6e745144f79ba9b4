use anyhow::{anyhow, Context, Result};
use bench_core::config::load_document;
use bench_core::{DirInfo, DirectoryLayout, EngineConfig, EnvironmentMode};
use bench_runner::{
    ArtifactTargets, CommandEnv, DockerCli, LogTarget, RebuildFlag, ShellExecutor,
    ToolCapabilities, ToolEngine,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bench", version = "0.3.0", about = "Tool execution engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ToolArgs {
    #[arg(long)]
    tool: String,
    /// Image reference; defaults to `<image_prefix>:<tool>`.
    #[arg(long)]
    image: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "docker")]
    docker_bin: String,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Provision the tool image or verify the tool is on PATH")]
    Check {
        #[command(flatten)]
        tool: ToolArgs,
        #[arg(long)]
        local: bool,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Run a command through a tool engine and classify its exit code")]
    Exec {
        #[command(flatten)]
        tool: ToolArgs,
        #[arg(long)]
        dir_info: PathBuf,
        #[arg(long)]
        container_id: Option<String>,
        #[arg(long, default_value = "/dev/null")]
        log: PathBuf,
        #[arg(long)]
        workdir: Option<PathBuf>,
        #[arg(long = "env")]
        env_values: Vec<String>,
        #[arg(long)]
        json: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    #[command(about = "Copy a run's output and logs into the harness directories")]
    Save {
        #[command(flatten)]
        tool: ToolArgs,
        #[arg(long)]
        dir_info: PathBuf,
        #[arg(long)]
        container_id: Option<String>,
        #[arg(long)]
        results: Option<PathBuf>,
        #[arg(long)]
        artifacts: Option<PathBuf>,
        #[arg(long)]
        logs: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Print the working directories resolved for a mode")]
    Resolve {
        #[arg(long)]
        tool: String,
        #[arg(long)]
        dir_info: PathBuf,
        #[arg(long)]
        container: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BENCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Check { tool, local, json } => {
            let mut config = load_config(tool.config.as_deref())?;
            config.use_container = !local;
            let engine = build_engine(&tool, config, RebuildFlag::new());
            let outcome = engine.check_tool_exists()?;
            let rebuild_required = engine.rebuild_flag().is_set();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "tool": engine.name(),
                    "image": engine.image(),
                    "outcome": outcome.map(|o| format!("{:?}", o)),
                    "rebuild_required": rebuild_required,
                })));
            }
            match outcome {
                Some(outcome) => println!("{}: {:?}", engine.name(), outcome),
                None => println!("{}: found on host", engine.name()),
            }
            if rebuild_required {
                println!("rebuild required");
            }
            Ok(None)
        }
        Commands::Exec {
            tool,
            dir_info,
            container_id,
            log,
            workdir,
            env_values,
            json,
            command,
        } => {
            let config = load_config(tool.config.as_deref())?;
            let info = load_dir_info(&dir_info)?;
            let env = parse_env_values(&env_values)?;
            let mut engine = build_engine(&tool, config, RebuildFlag::new());
            engine.update_info(container_id, false, &info)?;
            let status = engine.run_command(
                &command.join(" "),
                &LogTarget::from_path(log),
                workdir.as_deref(),
                &env,
            )?;
            let outcome = engine.process_status(status)?;
            if json {
                return Ok(Some(json!({
                    "ok": outcome.is_success(),
                    "tool": engine.name(),
                    "exit_code": status,
                    "message": outcome.to_string(),
                })));
            }
            println!("{}", outcome);
            Ok(None)
        }
        Commands::Save {
            tool,
            dir_info,
            container_id,
            results,
            artifacts,
            logs,
            json,
        } => {
            let config = load_config(tool.config.as_deref())?;
            let info = load_dir_info(&dir_info)?;
            let mut engine = build_engine(&tool, config, RebuildFlag::new());
            engine.update_info(container_id, false, &info)?;
            let targets = ArtifactTargets {
                results: results.unwrap_or_default(),
                artifacts: artifacts.unwrap_or_default(),
                logs: logs.unwrap_or_default(),
            };
            let saved = engine.save_artifacts(&targets)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "tool": engine.name(),
                    "copies": saved,
                })));
            }
            for copy in &saved {
                println!("{} -> {}", copy.src.display(), copy.dst.display());
            }
            Ok(None)
        }
        Commands::Resolve {
            tool,
            dir_info,
            container,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let info = load_dir_info(&dir_info)?;
            let mode = if container {
                EnvironmentMode::Container
            } else {
                EnvironmentMode::Local
            };
            let layout = DirectoryLayout::resolve(&tool, &info, mode, &config.dir_experiments)?;
            Ok(Some(serde_json::to_value(layout)?))
        }
    }
}

fn build_engine(args: &ToolArgs, config: EngineConfig, rebuild: RebuildFlag) -> ToolEngine {
    let capabilities = ToolCapabilities {
        runtime: Arc::new(DockerCli::new(&args.docker_bin)),
        host: Arc::new(ShellExecutor),
        rebuild,
    };
    let engine = ToolEngine::new(&args.tool, config, capabilities);
    match &args.image {
        Some(image) => engine.with_image(Some(image.clone())),
        None => engine,
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_dir_info(path: &Path) -> Result<DirInfo> {
    load_document(path).with_context(|| format!("failed to load dir info {}", path.display()))
}

fn parse_env_values(values: &[String]) -> Result<CommandEnv> {
    let mut env = CommandEnv::new();
    for raw in values {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("--env expects KEY=VALUE, got '{}'", raw))?;
        if key.is_empty() {
            return Err(anyhow!("--env key must not be empty: '{}'", raw));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Check { json, .. } | Commands::Exec { json, .. } | Commands::Save { json, .. } => {
            *json
        }
        Commands::Resolve { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_parse_into_sorted_map() {
        let env = parse_env_values(&["B=2".to_string(), "A=x=y".to_string()]).expect("parse");
        assert_eq!(env.get("A").map(String::as_str), Some("x=y"));
        assert_eq!(env.get("B").map(String::as_str), Some("2"));
    }

    #[test]
    fn env_values_reject_missing_separator() {
        assert!(parse_env_values(&["NOVALUE".to_string()]).is_err());
        assert!(parse_env_values(&["=v".to_string()]).is_err());
    }

    #[test]
    fn exec_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "bench",
            "exec",
            "--tool",
            "Foo",
            "--dir-info",
            "dirs.json",
            "--container-id",
            "c1",
            "--",
            "echo",
            "hi",
        ])
        .expect("parse");
        match cli.command {
            Commands::Exec {
                tool,
                container_id,
                command,
                log,
                ..
            } => {
                assert_eq!(tool.tool, "Foo");
                assert_eq!(container_id.as_deref(), Some("c1"));
                assert_eq!(command, vec!["echo".to_string(), "hi".to_string()]);
                assert_eq!(LogTarget::from_path(log), LogTarget::Discard);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn build_engine_honours_image_override() {
        let args = ToolArgs {
            tool: "Foo".to_string(),
            image: Some("registry/foo:2".to_string()),
            config: None,
            docker_bin: "docker".to_string(),
        };
        let engine = build_engine(&args, EngineConfig::default(), RebuildFlag::new());
        assert_eq!(engine.image(), Some("registry/foo:2"));
    }
}
