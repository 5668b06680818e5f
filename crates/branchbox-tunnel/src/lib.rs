//! Public tunnel management for Branchbox.
//!
//! Exposes a locally published port through an ngrok tunnel: spawn the
//! tunnel process detached, poll the local control API until the forwarding
//! session for that port appears, and hand back the public URL. The
//! [`TunnelProvider`] trait keeps the engine independent of ngrok;
//! [`MockTunnel`] serves the test suites.

pub mod mock;
pub mod ngrok;

pub use mock::MockTunnel;
pub use ngrok::{NgrokTunnel, TunnelConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no tunnel came up within {attempts} attempts")]
    Unavailable { attempts: u32 },
    #[error("tunnel configuration error: {0}")]
    Config(String),
    #[error("tunnel control API error: {0}")]
    Http(String),
}

/// An established tunnel session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedTunnel {
    pub public_url: String,
    /// Pid of the spawned tunnel process, when one exists to reclaim later.
    pub pid: Option<u32>,
}

/// Opens and closes public tunnels to local ports.
pub trait TunnelProvider: Send + Sync {
    /// Expose `port` publicly, waiting a bounded time for the tunnel to
    /// come up. On the failure path no spawned process may survive.
    fn open(&self, port: u16) -> Result<OpenedTunnel, TunnelError>;

    /// Best-effort termination of a tunnel process from a prior `open`.
    fn close(&self, pid: u32);
}
