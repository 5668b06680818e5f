use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnvState {
    Provisioning,
    Running,
    Destroying,
    Destroyed,
    Failed,
}

impl std::fmt::Display for EnvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvState::Provisioning => write!(f, "provisioning"),
            EnvState::Running => write!(f, "running"),
            EnvState::Destroying => write!(f, "destroying"),
            EnvState::Destroyed => write!(f, "destroyed"),
            EnvState::Failed => write!(f, "failed"),
        }
    }
}

/// One preview environment, as persisted in the store.
///
/// Identity fields (`env_id`, `branch`, `commit`, `service`) and
/// `expires_at` are immutable after creation; only `state` moves, and only
/// forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvRecord {
    pub env_id: String,
    pub branch: String,
    pub commit: String,
    pub service: String,
    pub workdir: PathBuf,
    pub public_url: String,
    pub port: u16,
    /// Pid of the tunnel process forwarding `public_url`, if still tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: EnvState,
    /// blake3 checksum for integrity verification, embedded on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl EnvRecord {
    /// Compute the checksum over the record content (excluding the checksum
    /// field itself).
    pub(crate) fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        // Serialize without the checksum field (skip_serializing_if = None)
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whole minutes until expiry, clamped at zero.
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_minutes().max(0)
    }
}

/// A service name must be short, flat, and shell-safe: it ends up in image
/// tags and container names.
pub fn validate_service_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 32 {
        return Err(StoreError::InvalidName(
            "service name must be 1-32 characters".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(
            "service name must match [a-zA-Z0-9_-]".to_owned(),
        ));
    }
    Ok(())
}
