//! Durable state for Branchbox preview environments.
//!
//! This crate is the single source of truth for environment records: one
//! fsync'd JSON file per record with an embedded blake3 checksum, a
//! `StateStore` enforcing scan-vs-mutation ordering and atomic create/claim
//! semantics, a port reservation table with RAII leases, and a write-ahead
//! log that rolls back the side effects of operations interrupted by a crash.

pub mod layout;
pub mod ports;
pub mod record;
pub mod store;
pub mod wal;

pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use ports::{first_free_port, PortLease};
pub use record::{validate_service_name, EnvRecord, EnvState};
pub use store::StateStore;
pub use wal::{RollbackStep, WalEntry, WalOpKind, WriteAheadLog};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` or `unlink()` is
/// durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
/// Calling `fsync()` on the parent directory makes the change durable on
/// all filesystems and mount configurations.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("environment not found: {0}")]
    EnvNotFound(String),
    #[error("environment '{0}' already exists")]
    Conflict(String),
    #[error("integrity check failed for record '{env_id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        env_id: String,
        expected: String,
        actual: String,
    },
    #[error("no free port in range {lo}-{hi}")]
    PortsExhausted { lo: u16, hi: u16 },
    #[error("invalid service name: {0}")]
    InvalidName(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}
