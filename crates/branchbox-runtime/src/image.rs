use crate::network::ensure_network;
use crate::proc::{run, run_in};
use crate::stack::{DriverConfig, StackDriver};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Single buildable image: `docker build` the workdir, then run the
/// container detached with an explicit port mapping, attached to the
/// configured network. The container is named after the environment id so
/// teardown needs nothing but the id.
pub struct ImageDriver {
    config: DriverConfig,
}

impl ImageDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    fn image_tag(env_id: &str) -> String {
        format!("{env_id}:preview")
    }

    /// docker reports a missing container in a few phrasings; all of them
    /// mean teardown already happened.
    fn already_gone(stderr: &str) -> bool {
        let msg = stderr.to_lowercase();
        msg.contains("no such container") || msg.contains("not found")
    }
}

impl StackDriver for ImageDriver {
    fn name(&self) -> &'static str {
        "image"
    }

    fn launch(&self, workdir: &Path, env_id: &str, host_port: u16) -> Result<(), RuntimeError> {
        ensure_network(&self.config.network)?;

        let tag = Self::image_tag(env_id);
        info!("building image {tag}");
        run_in(workdir, "docker", &["build", "-t", &tag, "."])?;

        let mapping = format!("{host_port}:{}", self.config.container_port);
        info!("starting container {env_id} ({mapping})");
        run(
            "docker",
            &[
                "run",
                "-d",
                "--name",
                env_id,
                "--network",
                &self.config.network,
                "-p",
                &mapping,
                &tag,
            ],
        )?;
        Ok(())
    }

    fn teardown(&self, _workdir: &Path, env_id: &str) -> Result<(), RuntimeError> {
        info!("removing container {env_id}");
        match run("docker", &["rm", "-f", env_id]) {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { ref stderr, .. }) if Self::already_gone(stderr) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn teardown_command(
        &self,
        _workdir: &Path,
        env_id: &str,
    ) -> (String, Vec<String>, Option<PathBuf>) {
        (
            "docker".to_owned(),
            vec!["rm".to_owned(), "-f".to_owned(), env_id.to_owned()],
            None,
        )
    }
}
