//! Lifecycle engine for Branchbox preview environments.
//!
//! This crate ties together the state store, stack drivers, VCS client, and
//! tunnel provider into the `Engine` — the central API for provisioning,
//! destroying, listing, and garbage-collecting environments. It also
//! provides configuration loading, the lifecycle state machine, environment
//! identity derivation, store locking, and signal handling.

pub mod concurrency;
pub mod config;
pub mod engine;
pub mod identity;
pub mod lifecycle;

pub use concurrency::{install_signal_handler, shutdown_requested, StoreLock};
pub use config::Config;
pub use engine::{Engine, EnvSummary, GcFailure, GcReport, ProvisionReceipt};
pub use identity::derive_env_id;
pub use lifecycle::validate_transition;

use branchbox_runtime::RuntimeError;
use branchbox_store::StoreError;
use branchbox_tunnel::TunnelError;
use branchbox_vcs::VcsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("environment not found: {0}")]
    EnvNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("vcs error: {0}")]
    Vcs(#[from] VcsError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("rollback incomplete for '{env_id}': {detail}")]
    RollbackFailed { env_id: String, detail: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable error classification for transports (HTTP status, CLI exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    CommandFailed,
    TunnelUnavailable,
    RollbackFailed,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::CommandFailed => write!(f, "command_failed"),
            ErrorKind::TunnelUnavailable => write!(f, "tunnel_unavailable"),
            ErrorKind::RollbackFailed => write!(f, "rollback_failed"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) | CoreError::Config(_) => ErrorKind::InvalidInput,
            CoreError::EnvNotFound(_) => ErrorKind::NotFound,
            CoreError::Store(e) => match e {
                StoreError::EnvNotFound(_) => ErrorKind::NotFound,
                StoreError::Conflict(_) | StoreError::PortsExhausted { .. } => ErrorKind::Conflict,
                StoreError::InvalidName(_) => ErrorKind::InvalidInput,
                _ => ErrorKind::Internal,
            },
            CoreError::Vcs(e) => match e {
                VcsError::BranchNotFound(_) => ErrorKind::NotFound,
                VcsError::Config(_) => ErrorKind::InvalidInput,
                VcsError::Runtime(RuntimeError::CommandFailed { .. }) => ErrorKind::CommandFailed,
                _ => ErrorKind::Internal,
            },
            CoreError::Runtime(e) => match e {
                RuntimeError::CommandFailed { .. } => ErrorKind::CommandFailed,
                _ => ErrorKind::Internal,
            },
            CoreError::Tunnel(e) => match e {
                TunnelError::Unavailable { .. } => ErrorKind::TunnelUnavailable,
                TunnelError::Config(_) => ErrorKind::InvalidInput,
                _ => ErrorKind::Internal,
            },
            CoreError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            CoreError::InvalidTransition { .. }
            | CoreError::Io(_)
            | CoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify_user_errors() {
        assert_eq!(
            CoreError::InvalidInput("bad service".to_owned()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            CoreError::EnvNotFound("x".to_owned()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::Vcs(VcsError::BranchNotFound("b".to_owned())).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn kinds_classify_resource_conflicts() {
        assert_eq!(
            CoreError::Store(StoreError::Conflict("id".to_owned())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CoreError::Store(StoreError::PortsExhausted { lo: 1, hi: 2 }).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn kinds_classify_external_failures() {
        let cmd = RuntimeError::CommandFailed {
            command: "docker build".to_owned(),
            code: 1,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(CoreError::Runtime(cmd).kind(), ErrorKind::CommandFailed);
        assert_eq!(
            CoreError::Tunnel(TunnelError::Unavailable { attempts: 40 }).kind(),
            ErrorKind::TunnelUnavailable
        );
    }

    #[test]
    fn kinds_classify_internal_errors() {
        assert_eq!(
            CoreError::InvalidTransition {
                from: "running".to_owned(),
                to: "provisioning".to_owned()
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::TunnelUnavailable.to_string(), "tunnel_unavailable");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
