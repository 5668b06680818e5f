use crate::{OpenedTunnel, TunnelError, TunnelProvider};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// Tunnel provider configuration, environment-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authtoken: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Local ngrok control endpoint.
    #[serde(default = "default_control_url")]
    pub control_url: String,
    /// Polling budget: attempts x interval bounds the whole wait.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Binary to spawn; tests substitute a no-op.
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_region() -> String {
    "us".to_owned()
}

fn default_control_url() -> String {
    "http://127.0.0.1:4040".to_owned()
}

fn default_max_attempts() -> u32 {
    40
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_binary() -> String {
    "ngrok".to_owned()
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            authtoken: None,
            region: default_region(),
            control_url: default_control_url(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            binary: default_binary(),
        }
    }
}

/// Shape of `GET /api/tunnels` on the local control endpoint.
#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    #[serde(default)]
    proto: String,
    #[serde(default)]
    public_url: String,
    #[serde(default)]
    config: ForwardConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ForwardConfig {
    /// Forwarded address, e.g. "http://localhost:8105".
    #[serde(default)]
    addr: String,
}

pub struct NgrokTunnel {
    config: TunnelConfig,
    agent: ureq::Agent,
}

impl NgrokTunnel {
    pub fn new(config: TunnelConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn fetch_tunnels(&self) -> Result<TunnelList, TunnelError> {
        let url = format!("{}/api/tunnels", self.config.control_url);
        let resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| TunnelError::Http(e.to_string()))?;
        let mut body = String::new();
        resp.into_body()
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|e| TunnelError::Http(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| TunnelError::Http(e.to_string()))
    }
}

/// Match the session forwarding to `port` among possibly many concurrent
/// tunnels. The original grabbed the first http tunnel, which hands one
/// environment another environment's URL once two are up.
fn match_tunnel(list: &TunnelList, port: u16) -> Option<String> {
    let suffix = format!(":{port}");
    list.tunnels
        .iter()
        .filter(|t| t.proto == "http" || t.proto == "https")
        .find(|t| t.config.addr.ends_with(&suffix))
        .map(|t| t.public_url.clone())
}

impl TunnelProvider for NgrokTunnel {
    fn open(&self, port: u16) -> Result<OpenedTunnel, TunnelError> {
        let Some(authtoken) = self.config.authtoken.as_deref().filter(|t| !t.is_empty()) else {
            return Err(TunnelError::Config("NGROK_AUTHTOKEN must be set".to_owned()));
        };

        // Idempotent; failure here surfaces on the spawn below anyway
        let _ = Command::new(&self.config.binary)
            .args(["config", "add-authtoken", authtoken])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let port_arg = port.to_string();
        let mut child = Command::new(&self.config.binary)
            .args(["http", port_arg.as_str(), "--region", self.config.region.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id();
        debug!("spawned {} (pid {pid}) for port {port}", self.config.binary);

        for attempt in 0..self.config.max_attempts {
            match self.fetch_tunnels() {
                Ok(list) => {
                    if let Some(url) = match_tunnel(&list, port) {
                        debug!("tunnel up after {attempt} polls: {url}");
                        return Ok(OpenedTunnel {
                            public_url: url,
                            pid: Some(pid),
                        });
                    }
                }
                Err(e) => {
                    // Control endpoint not up yet; keep polling
                    debug!("tunnel poll {attempt}: {e}");
                }
            }
            std::thread::sleep(Duration::from_millis(self.config.poll_interval_ms));
        }

        // Budget exhausted: the spawned process must not outlive the failure
        if let Err(e) = child.kill() {
            warn!("failed to kill tunnel process {pid}: {e}");
        }
        let _ = child.wait();
        Err(TunnelError::Unavailable {
            attempts: self.config.max_attempts,
        })
    }

    fn close(&self, pid: u32) {
        let status = Command::new("kill")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => debug!("terminated tunnel process {pid}"),
            Ok(_) => debug!("tunnel process {pid} already gone"),
            Err(e) => warn!("failed to signal tunnel process {pid}: {e}"),
        }
    }
}
