//! Image provisioning for container mode and executable lookup for local mode.

use crate::runtime::{ContainerRuntime, HostExecutor};
use bench_core::{EngineError, EngineResult, DEFAULT_IMAGE_TAG};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared "containers must be rebuilt" signal. It only ever moves from
/// unset to set; clones observe the same cell.
#[derive(Debug, Clone, Default)]
pub struct RebuildFlag(Arc<AtomicBool>);

impl RebuildFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Splits `repo[:tag]`; a colon before the last `/` belongs to a
    /// registry host, not a tag.
    pub fn parse(raw: &str) -> Self {
        let name_start = raw.rfind('/').map_or(0, |idx| idx + 1);
        match raw[name_start..].rfind(':') {
            Some(idx) => Self {
                repository: raw[..name_start + idx].to_string(),
                tag: raw[name_start + idx + 1..].to_string(),
            },
            None => Self {
                repository: raw.to_string(),
                tag: DEFAULT_IMAGE_TAG.to_string(),
            },
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Image was missing locally and pulled from the registry.
    Pulled,
    /// Local image matches the registry copy.
    UpToDate,
    /// Registry unreachable; the local image is used as-is.
    Offline,
    /// Registry holds a different image; the rebuild flag was set.
    Stale,
}

pub struct ImageProvisioner<'a> {
    runtime: &'a dyn ContainerRuntime,
    rebuild: &'a RebuildFlag,
}

impl<'a> ImageProvisioner<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, rebuild: &'a RebuildFlag) -> Self {
        Self { runtime, rebuild }
    }

    pub fn ensure(&self, tool: &str, image: Option<&str>) -> EngineResult<ProvisionOutcome> {
        let raw = image
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| {
                EngineError::configuration(tool, format!("{} does not provide a Docker image", tool))
            })?;
        let reference = ImageReference::parse(raw);
        let (repository, tag) = (reference.repository.as_str(), reference.tag.as_str());

        if !self.runtime.image_exists(repository, tag)? {
            warn!(tool, image = %reference, "docker image not found locally");
            return match self.runtime.pull_image(repository, tag) {
                Some(_) => {
                    info!(tool, image = %reference, "docker image pulled");
                    Ok(ProvisionOutcome::Pulled)
                }
                None => Err(EngineError::provisioning(
                    tool,
                    format!("{} does not provide a Docker image in the registry", tool),
                )),
            };
        }

        info!(tool, image = %reference, "docker image found locally");
        let local = self.runtime.get_image(repository, tag)?;
        match self.runtime.pull_image(repository, tag) {
            None => {
                warn!(tool, image = %reference, "registry unreachable, using local image");
                Ok(ProvisionOutcome::Offline)
            }
            Some(remote) if remote.id != local.id => {
                info!(
                    tool,
                    image = %reference,
                    "docker image differs from the registry copy, rebuild required"
                );
                self.rebuild.mark();
                Ok(ProvisionOutcome::Stale)
            }
            Some(_) => Ok(ProvisionOutcome::UpToDate),
        }
    }
}

/// Local mode: the tool's lowercase name must resolve on `PATH`.
pub fn verify_host_tool(tool: &str, host: &dyn HostExecutor) -> EngineResult<PathBuf> {
    host.find_executable(&tool.to_lowercase())
        .ok_or_else(|| EngineError::configuration(tool, format!("{} not found", tool)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ShellExecutor;
    use crate::testing::{FakeContainerRuntime, RuntimeCall};

    #[test]
    fn image_reference_defaults_tag_and_respects_registry_ports() {
        assert_eq!(
            ImageReference::parse("rshariffdeen/astor"),
            ImageReference {
                repository: "rshariffdeen/astor".to_string(),
                tag: "latest".to_string()
            }
        );
        assert_eq!(
            ImageReference::parse("cerberus:foo"),
            ImageReference {
                repository: "cerberus".to_string(),
                tag: "foo".to_string()
            }
        );
        let with_port = ImageReference::parse("registry:5000/tools/foo");
        assert_eq!(with_port.repository, "registry:5000/tools/foo");
        assert_eq!(with_port.tag, "latest");
        assert_eq!(with_port.to_string(), "registry:5000/tools/foo:latest");
    }

    #[test]
    fn missing_image_reference_is_configuration_error() {
        let runtime = FakeContainerRuntime::new();
        let flag = RebuildFlag::new();
        let err = ImageProvisioner::new(&runtime, &flag)
            .ensure("Foo", None)
            .expect_err("no image must fail");
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert!(err.to_string().contains("Foo does not provide a Docker image"));
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn absent_locally_and_pull_succeeds_is_present_without_rebuild() {
        let runtime = FakeContainerRuntime::new();
        runtime.add_registry_image("cerberus:foo", "sha256:aaa");
        let flag = RebuildFlag::new();
        let outcome = ImageProvisioner::new(&runtime, &flag)
            .ensure("foo", Some("cerberus:foo"))
            .expect("provision");
        assert_eq!(outcome, ProvisionOutcome::Pulled);
        assert!(!flag.is_set());
        assert!(runtime.image_exists("cerberus", "foo").expect("exists"));
    }

    #[test]
    fn absent_everywhere_is_provisioning_error() {
        let runtime = FakeContainerRuntime::new();
        let flag = RebuildFlag::new();
        let err = ImageProvisioner::new(&runtime, &flag)
            .ensure("foo", Some("cerberus:foo"))
            .expect_err("must fail");
        assert!(matches!(err, EngineError::Provisioning { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn present_and_registry_unreachable_is_accepted() {
        let runtime = FakeContainerRuntime::new();
        runtime.add_local_image("cerberus:foo", "sha256:local");
        let flag = RebuildFlag::new();
        let outcome = ImageProvisioner::new(&runtime, &flag)
            .ensure("foo", Some("cerberus:foo"))
            .expect("provision");
        assert_eq!(outcome, ProvisionOutcome::Offline);
        assert!(!flag.is_set());
    }

    #[test]
    fn present_and_identical_registry_copy_is_up_to_date() {
        let runtime = FakeContainerRuntime::new();
        runtime.add_local_image("cerberus:foo", "sha256:same");
        runtime.add_registry_image("cerberus:foo", "sha256:same");
        let flag = RebuildFlag::new();
        let outcome = ImageProvisioner::new(&runtime, &flag)
            .ensure("foo", Some("cerberus:foo"))
            .expect("provision");
        assert_eq!(outcome, ProvisionOutcome::UpToDate);
        assert!(!flag.is_set());
        let calls = runtime.calls();
        assert_eq!(
            calls,
            vec![
                RuntimeCall::ImageExists("cerberus:foo".to_string()),
                RuntimeCall::GetImage("cerberus:foo".to_string()),
                RuntimeCall::Pull("cerberus:foo".to_string()),
            ]
        );
    }

    #[test]
    fn stale_image_sets_rebuild_flag_monotonically() {
        let runtime = FakeContainerRuntime::new();
        runtime.add_local_image("cerberus:foo", "sha256:old");
        runtime.add_registry_image("cerberus:foo", "sha256:new");
        runtime.add_local_image("cerberus:bar", "sha256:bar");
        runtime.add_registry_image("cerberus:bar", "sha256:bar");
        let flag = RebuildFlag::new();
        let shared = flag.clone();
        let provisioner = ImageProvisioner::new(&runtime, &flag);
        assert_eq!(
            provisioner.ensure("foo", Some("cerberus:foo")).expect("foo"),
            ProvisionOutcome::Stale
        );
        assert!(shared.is_set());
        assert_eq!(
            provisioner.ensure("bar", Some("cerberus:bar")).expect("bar"),
            ProvisionOutcome::UpToDate
        );
        assert!(shared.is_set());
    }

    #[test]
    fn host_tool_lookup_uses_lowercase_name() {
        assert!(verify_host_tool("SH", &ShellExecutor).is_ok());
        let err = verify_host_tool("NoSuchBenchTool", &ShellExecutor).expect_err("missing");
        assert!(err.to_string().contains("NoSuchBenchTool not found"));
    }
}
