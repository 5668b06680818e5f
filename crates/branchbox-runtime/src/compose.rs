use crate::proc::{run_in, run_with_env};
use crate::stack::{DriverConfig, StackDriver};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Multi-service stacks described by a compose file.
///
/// The whole descriptor is built and started as one unit. The allocated
/// host port reaches the descriptor as `PREVIEW_PORT` so its published-port
/// mapping can follow the allocator instead of hardcoding a host port.
pub struct ComposeDriver {
    config: DriverConfig,
}

impl ComposeDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }
}

impl StackDriver for ComposeDriver {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn launch(&self, workdir: &Path, env_id: &str, host_port: u16) -> Result<(), RuntimeError> {
        info!("compose up for {env_id} on port {host_port}");
        let port_env = host_port.to_string();
        run_with_env(
            workdir,
            &[("PREVIEW_PORT", port_env.as_str())],
            "docker",
            &[
                "compose",
                "-f",
                &self.config.compose_file,
                "up",
                "-d",
                "--build",
            ],
        )?;
        Ok(())
    }

    fn teardown(&self, workdir: &Path, env_id: &str) -> Result<(), RuntimeError> {
        // Nothing to stop if the descriptor (or the whole workdir) is gone
        if !workdir.join(&self.config.compose_file).exists() {
            return Ok(());
        }
        info!("compose down for {env_id}");
        run_in(
            workdir,
            "docker",
            &["compose", "-f", &self.config.compose_file, "down", "-v"],
        )?;
        Ok(())
    }

    fn teardown_command(
        &self,
        workdir: &Path,
        _env_id: &str,
    ) -> (String, Vec<String>, Option<PathBuf>) {
        (
            "docker".to_owned(),
            vec![
                "compose".to_owned(),
                "-f".to_owned(),
                self.config.compose_file.clone(),
                "down".to_owned(),
                "-v".to_owned(),
            ],
            Some(workdir.to_path_buf()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_without_descriptor_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ComposeDriver::new(DriverConfig::default());
        driver.teardown(dir.path(), "env-1").unwrap();
    }

    #[test]
    fn teardown_command_runs_in_workdir() {
        let driver = ComposeDriver::new(DriverConfig::default());
        let (program, args, cwd) = driver.teardown_command(Path::new("/tmp/envs/e1"), "e1");
        assert_eq!(program, "docker");
        assert_eq!(args[0], "compose");
        assert!(args.contains(&"down".to_owned()));
        assert_eq!(cwd, Some(PathBuf::from("/tmp/envs/e1")));
    }
}
