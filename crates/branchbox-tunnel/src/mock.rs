use crate::{OpenedTunnel, TunnelError, TunnelProvider};
use std::sync::Mutex;

/// Test provider: synthetic URLs, optional forced failure, and a log of
/// closed pids so destroy paths can be asserted.
pub struct MockTunnel {
    fail: bool,
    closed: Mutex<Vec<u32>>,
}

impl MockTunnel {
    pub fn new() -> Self {
        Self {
            fail: false,
            closed: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn closed_pids(&self) -> Vec<u32> {
        match self.closed.lock() {
            Ok(closed) => closed.clone(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for MockTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelProvider for MockTunnel {
    fn open(&self, port: u16) -> Result<OpenedTunnel, TunnelError> {
        if self.fail {
            return Err(TunnelError::Unavailable { attempts: 0 });
        }
        Ok(OpenedTunnel {
            public_url: format!("https://preview-{port}.mock.example"),
            pid: Some(u32::from(port)),
        })
    }

    fn close(&self, pid: u32) {
        if let Ok(mut closed) = self.closed.lock() {
            closed.push(pid);
        }
    }
}
