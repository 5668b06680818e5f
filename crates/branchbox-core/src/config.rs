use crate::CoreError;
use branchbox_runtime::DriverConfig;
use branchbox_store::validate_service_name;
use branchbox_tunnel::TunnelConfig;
use branchbox_vcs::VcsConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Engine configuration, environment-first with an optional JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for state and environment workdirs.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// TTL applied when the caller passes none (or a non-positive value).
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: i64,
    /// Closed allow-list of service kinds callers may request.
    #[serde(default = "default_allowed_services")]
    pub allowed_services: Vec<String>,
    /// Inclusive host port range the allocator assigns from.
    #[serde(default = "default_port_range")]
    pub port_range: (u16, u16),
    #[serde(default)]
    pub vcs: VcsConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

fn default_base_dir() -> PathBuf {
    if let Ok(home) = env::var("HOME") {
        PathBuf::from(home).join(".local/share/branchbox")
    } else {
        PathBuf::from("/tmp/branchbox")
    }
}

fn default_ttl_minutes() -> i64 {
    120
}

fn default_allowed_services() -> Vec<String> {
    vec!["web".to_owned(), "api".to_owned()]
}

fn default_port_range() -> (u16, u16) {
    (8100, 8199)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            default_ttl_minutes: default_ttl_minutes(),
            allowed_services: default_allowed_services(),
            port_range: default_port_range(),
            vcs: VcsConfig::default(),
            driver: DriverConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Config {
    /// Build configuration from process environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Ok(v) = env::var("BASE_WORKDIR") {
            config.base_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("DEFAULT_TTL_MINUTES") {
            config.default_ttl_minutes = v
                .parse()
                .map_err(|_| CoreError::Config(format!("invalid DEFAULT_TTL_MINUTES '{v}'")))?;
        }
        if let Ok(v) = env::var("ALLOWED_SERVICES") {
            config.allowed_services = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Ok(v) = env::var("PORT_RANGE") {
            config.port_range = parse_port_range(&v)?;
        }
        if let Ok(v) = env::var("GITHUB_OWNER") {
            config.vcs.owner = v;
        }
        if let Ok(v) = env::var("GITHUB_REPO") {
            config.vcs.repo = v;
        }
        if let Ok(v) = env::var("GITHUB_TOKEN") {
            config.vcs.token = Some(v);
        }
        if let Ok(v) = env::var("DOCKER_NETWORK") {
            config.driver.network = v;
        }
        if let Ok(v) = env::var("COMPOSE_FILE") {
            config.driver.compose_file = v;
        }
        if let Ok(v) = env::var("STACK_DRIVER") {
            config.driver.driver = v;
        }
        if let Ok(v) = env::var("NGROK_AUTHTOKEN") {
            config.tunnel.authtoken = Some(v);
        }
        if let Ok(v) = env::var("NGROK_REGION") {
            config.tunnel.region = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.default_ttl_minutes <= 0 {
            return Err(CoreError::Config(
                "default TTL must be positive".to_owned(),
            ));
        }
        if self.allowed_services.is_empty() {
            return Err(CoreError::Config(
                "at least one allowed service is required".to_owned(),
            ));
        }
        for service in &self.allowed_services {
            validate_service_name(service)
                .map_err(|e| CoreError::Config(format!("allowed service '{service}': {e}")))?;
        }
        let (lo, hi) = self.port_range;
        if lo == 0 || lo > hi {
            return Err(CoreError::Config(format!(
                "invalid port range {lo}-{hi}"
            )));
        }
        Ok(())
    }

    /// The TTL a provision actually gets: the caller's value when positive,
    /// the configured default otherwise.
    pub fn effective_ttl(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(ttl) if ttl > 0 => ttl,
            _ => self.default_ttl_minutes,
        }
    }
}

fn parse_port_range(raw: &str) -> Result<(u16, u16), CoreError> {
    let invalid = || CoreError::Config(format!("invalid PORT_RANGE '{raw}' (expected LO-HI)"));
    let (lo, hi) = raw.split_once('-').ok_or_else(invalid)?;
    let lo: u16 = lo.trim().parse().map_err(|_| invalid())?;
    let hi: u16 = hi.trim().parse().map_err(|_| invalid())?;
    Ok((lo, hi))
}
