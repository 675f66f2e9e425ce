//! Exporter configuration

use anyhow::{bail, Context, Result};
use exporter_lib::delta::DEFAULT_CPU_TICKS_PER_SECOND;
use exporter_lib::runtime::DEFAULT_DOCKER_SOCKET;
use exporter_lib::LabelMode;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Port serving /metrics, /healthz and /readyz
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use the pod/namespace label set instead of raw container labels
    #[serde(default)]
    pub orchestrator_mode: bool,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,

    /// Upper bound on every runtime call
    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout_secs: u64,

    /// Time the HTTP server gets to drain after shutdown is signalled
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Runtime CPU ticks per exported second
    #[serde(default = "default_cpu_ticks_per_second")]
    pub cpu_ticks_per_second: f64,

    /// Node name from the downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_node_os")]
    pub node_os: String,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_port() -> u16 {
    8080
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from(DEFAULT_DOCKER_SOCKET)
}

fn default_runtime_timeout() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_cpu_ticks_per_second() -> f64 {
    DEFAULT_CPU_TICKS_PER_SECOND
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_default()
}

fn default_node_os() -> String {
    std::env::consts::OS.to_string()
}

impl ExporterConfig {
    /// Load configuration from an optional config file and the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("EXPORTER").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs < 1 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.runtime_timeout_secs < 1 {
            bail!("runtime_timeout_secs must be at least 1");
        }
        if !(self.cpu_ticks_per_second > 0.0) {
            bail!("cpu_ticks_per_second must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn label_mode(&self) -> LabelMode {
        if self.orchestrator_mode {
            LabelMode::Orchestrator {
                node_name: self.node_name.clone(),
                node_os: self.node_os.clone(),
            }
        } else {
            LabelMode::Standard
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(yaml: &str) -> Result<ExporterConfig> {
        let config = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        ExporterConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}").unwrap();

        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.port, 8080);
        assert!(!config.orchestrator_mode);
        assert_eq!(config.docker_socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(config.runtime_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.cpu_ticks_per_second, 10_000_000.0);
        assert_eq!(config.label_mode(), LabelMode::Standard);
    }

    #[test]
    fn test_overrides() {
        let config = parse(
            "poll_interval_secs: 30\nport: 9100\norchestrator_mode: true\nnode_name: worker-3\nnode_os: linux\n",
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.port, 9100);
        assert_eq!(
            config.label_mode(),
            LabelMode::Orchestrator {
                node_name: "worker-3".into(),
                node_os: "linux".into(),
            }
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = parse("poll_interval_secs: 0").unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_non_positive_cpu_scale_rejected() {
        assert!(parse("cpu_ticks_per_second: 0").is_err());
    }

    #[test]
    fn test_malformed_value_rejected() {
        assert!(parse("port: not-a-port").is_err());
    }
}
