use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The two shapes a checked-out branch can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    /// A multi-service compose descriptor, started and stopped as a unit.
    Compose,
    /// A single buildable image (Dockerfile at the workdir root).
    Image,
}

impl std::fmt::Display for StackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackKind::Compose => write!(f, "compose"),
            StackKind::Image => write!(f, "image"),
        }
    }
}

/// Driver configuration, environment-supplied through the core config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverConfig {
    /// Driver backend: "docker" or "mock".
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Docker network single-image containers attach to.
    #[serde(default = "default_network")]
    pub network: String,
    /// Compose descriptor filename that marks a multi-service stack.
    #[serde(default = "default_compose_file")]
    pub compose_file: String,
    /// Port services listen on inside the container or stack.
    #[serde(default = "default_container_port")]
    pub container_port: u16,
}

fn default_driver() -> String {
    "docker".to_owned()
}

fn default_network() -> String {
    "preview_net".to_owned()
}

fn default_compose_file() -> String {
    "docker-compose.preview.yml".to_owned()
}

fn default_container_port() -> u16 {
    8080
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            network: default_network(),
            compose_file: default_compose_file(),
            container_port: default_container_port(),
        }
    }
}

/// Builds and runs one environment's stack, and tears it down again.
///
/// `teardown` must be idempotent: tearing down a stack that is already gone
/// (missing container, removed workdir) is success, so Destroy can retry
/// after partial failures.
pub trait StackDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Build and start the stack for `workdir`, publishing `host_port`.
    fn launch(&self, workdir: &Path, env_id: &str, host_port: u16) -> Result<(), RuntimeError>;

    /// Stop and remove whatever `launch` started.
    fn teardown(&self, workdir: &Path, env_id: &str) -> Result<(), RuntimeError>;

    /// The teardown invocation as plain command data, for write-ahead
    /// rollback entries that must survive a crash of this process.
    fn teardown_command(
        &self,
        workdir: &Path,
        env_id: &str,
    ) -> (String, Vec<String>, Option<PathBuf>);
}

/// Which stack shape a workdir holds: a compose descriptor wins over a
/// Dockerfile.
pub fn detect_stack(workdir: &Path, compose_file: &str) -> StackKind {
    if workdir.join(compose_file).exists() {
        StackKind::Compose
    } else {
        StackKind::Image
    }
}

pub fn select_driver(
    config: &DriverConfig,
    kind: StackKind,
) -> Result<Box<dyn StackDriver>, RuntimeError> {
    match config.driver.as_str() {
        "docker" => match kind {
            StackKind::Compose => Ok(Box::new(crate::compose::ComposeDriver::new(config.clone()))),
            StackKind::Image => Ok(Box::new(crate::image::ImageDriver::new(config.clone()))),
        },
        "mock" => Ok(Box::new(crate::mock::MockDriver::new())),
        other => Err(RuntimeError::DriverUnavailable(other.to_owned())),
    }
}
