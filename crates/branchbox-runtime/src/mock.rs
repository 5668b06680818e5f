use crate::stack::StackDriver;
use crate::RuntimeError;
use std::path::{Path, PathBuf};

/// Marker file a launched mock stack leaves in its workdir.
pub const RUNNING_MARKER: &str = ".preview-running";
/// Drop this file into a workdir to make the next launch fail.
pub const FAIL_MARKER: &str = ".fail-launch";

/// Test driver that keeps its state as real files in the workdir, so
/// engine tests exercise the same create/cleanup paths as the docker
/// drivers and state survives across driver instances.
#[derive(Default)]
pub struct MockDriver;

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(workdir: &Path) -> bool {
        workdir.join(RUNNING_MARKER).exists()
    }
}

impl StackDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn launch(&self, workdir: &Path, env_id: &str, host_port: u16) -> Result<(), RuntimeError> {
        if workdir.join(FAIL_MARKER).exists() {
            return Err(RuntimeError::CommandFailed {
                command: format!("mock launch {env_id}"),
                code: 1,
                stdout: String::new(),
                stderr: "injected launch failure\n".to_owned(),
            });
        }
        std::fs::write(
            workdir.join(RUNNING_MARKER),
            format!("{env_id}:{host_port}"),
        )?;
        Ok(())
    }

    fn teardown(&self, workdir: &Path, _env_id: &str) -> Result<(), RuntimeError> {
        let marker = workdir.join(RUNNING_MARKER);
        if marker.exists() {
            std::fs::remove_file(marker)?;
        }
        Ok(())
    }

    fn teardown_command(
        &self,
        workdir: &Path,
        _env_id: &str,
    ) -> (String, Vec<String>, Option<PathBuf>) {
        (
            "rm".to_owned(),
            vec![
                "-f".to_owned(),
                workdir.join(RUNNING_MARKER).to_string_lossy().into_owned(),
            ],
            None,
        )
    }
}
