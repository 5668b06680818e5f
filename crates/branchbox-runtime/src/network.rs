use crate::proc::run;
use crate::RuntimeError;
use tracing::debug;

/// Ensure the docker network exists, creating it on first use.
pub fn ensure_network(name: &str) -> Result<(), RuntimeError> {
    if run("docker", &["network", "inspect", name]).is_ok() {
        return Ok(());
    }
    debug!("creating docker network {name}");
    run("docker", &["network", "create", name])?;
    Ok(())
}
