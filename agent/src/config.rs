//! Agent configuration: loaded once at startup from a TOML file.
//! A parse or validation failure is a fatal `ConfigError` per §7 —
//! the agent refuses to start rather than run with a partial config.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding `agent.id`, `agent.db`, and `<module>_policy.json`.
    pub data_dir: PathBuf,

    pub server: ServerConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub monitors: MonitorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    pub ca_path: PathBuf,
    pub client_cert_path: PathBuf,
    pub client_key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_secs(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    60
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Worker thread count; 0 means "use the CPU count" (§5 default).
    #[serde(default)]
    pub workers: usize,

    #[serde(default = "default_scan_deadline_secs")]
    pub scan_deadline_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            scan_deadline_secs: default_scan_deadline_secs(),
        }
    }
}

fn default_scan_deadline_secs() -> u64 {
    30
}

impl ScannerConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn scan_deadline(&self) -> Duration {
        Duration::from_secs(self.scan_deadline_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorsConfig {
    #[serde(default = "default_integrity_interval_secs")]
    pub integrity_interval_secs: u64,

    #[serde(default = "default_netguard_interval_secs")]
    pub netguard_interval_secs: u64,

    #[serde(default)]
    pub netguard_whitelist: Vec<String>,

    #[serde(default)]
    pub netguard_target_pids: Vec<u32>,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            integrity_interval_secs: default_integrity_interval_secs(),
            netguard_interval_secs: default_netguard_interval_secs(),
            netguard_whitelist: Vec::new(),
            netguard_target_pids: Vec::new(),
        }
    }
}

fn default_integrity_interval_secs() -> u64 {
    5 * 60
}

fn default_netguard_interval_secs() -> u64 {
    1
}

impl MonitorsConfig {
    pub fn integrity_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_interval_secs)
    }

    pub fn netguard_interval(&self) -> Duration {
        Duration::from_secs(self.netguard_interval_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url must not be empty".into()));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat.interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_base_url() {
        let toml_src = r#"
            data_dir = "/tmp/classifyd"
            [server]
            base_url = ""
            ca_path = "/tmp/ca.pem"
            client_cert_path = "/tmp/client.pem"
            client_key_path = "/tmp/client.key"
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_count_falls_back_to_cpu_count() {
        let scanner = ScannerConfig::default();
        assert!(scanner.worker_count() >= 1);
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let toml_src = r#"
            data_dir = "/var/lib/classifyd"
            [server]
            base_url = "https://c2.example.com"
            ca_path = "/etc/classifyd/ca.pem"
            client_cert_path = "/etc/classifyd/client.pem"
            client_key_path = "/etc/classifyd/client.key"
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.heartbeat.interval_secs, 60);
        assert_eq!(config.monitors.netguard_interval_secs, 1);
    }
}
