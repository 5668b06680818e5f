//! Execution layer for Branchbox environments.
//!
//! This crate implements the external-process side of provisioning: a
//! synchronous [`proc`] runner with captured output and typed failure, the
//! pluggable [`StackDriver`] trait with compose-descriptor and single-image
//! docker drivers, docker network management, and a mock driver for engine
//! tests.

pub mod compose;
pub mod image;
pub mod mock;
pub mod network;
pub mod proc;
pub mod stack;

pub use proc::{run, run_in, run_with_env, RunOutput};
pub use stack::{detect_stack, select_driver, DriverConfig, StackDriver, StackKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command failed: {command} (exit {code})\n{stdout}{stderr}")]
    CommandFailed {
        command: String,
        /// Process exit code; -1 when terminated by a signal.
        code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("stack driver '{0}' is not available")]
    DriverUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display_carries_output() {
        let e = RuntimeError::CommandFailed {
            command: "docker build -t x .".to_owned(),
            code: 1,
            stdout: "step 1/3\n".to_owned(),
            stderr: "no Dockerfile\n".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("docker build"));
        assert!(msg.contains("exit 1"));
        assert!(msg.contains("no Dockerfile"));
    }

    #[test]
    fn driver_unavailable_display() {
        let e = RuntimeError::DriverUnavailable("podman".to_owned());
        assert!(e.to_string().contains("podman"));
    }
}
