//! Service configuration
//!
//! Values come from an optional TOML file (path in `MONITOR_CONFIG`,
//! default `monitor.toml`) overlaid by `MONITOR_*` environment variables.
//! Nested keys use `__`, e.g. `MONITOR_MACHINES__0__THRESHOLD`.

use anyhow::{bail, Context, Result};
use monitor_lib::MachineId;
use serde::Deserialize;
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "monitor.toml";

/// Per-machine settings
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    /// Scores at or above this are anomalies
    pub threshold: f64,
    /// SQLite file holding this machine's rollups
    pub rollup_db: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Port for the ingest, history, health and metrics API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Samples per inference batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Length every raw chunk is resampled to before batching
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: usize,

    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,

    /// Capacity of the ingest queue in front of the worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_machines")]
    pub machines: Vec<MachineConfig>,

    #[serde(default = "default_anomaly_db")]
    pub anomaly_db: PathBuf,

    /// ONNX scoring model; the RMS fallback is used when unset
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// JSON min/max table; readings pass through unscaled when unset
    #[serde(default)]
    pub normalization_path: Option<PathBuf>,

    #[serde(default = "default_raw_directory")]
    pub raw_directory: PathBuf,

    /// Where yesterday's raw CSV files are moved
    #[serde(default)]
    pub external_directory: Option<PathBuf>,

    /// Daily-rotated log files in addition to stdout
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Site label attached to structured domain events
    #[serde(default = "default_site")]
    pub site: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_batch_size() -> usize {
    10
}

fn default_sampling_rate() -> usize {
    100
}

fn default_inference_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_machines() -> Vec<MachineConfig> {
    MachineId::ALL
        .iter()
        .map(|id| MachineConfig {
            name: id.name().to_string(),
            threshold: 10.0,
            rollup_db: PathBuf::from(format!("data/{}.db", id.name())),
        })
        .collect()
}

fn default_anomaly_db() -> PathBuf {
    PathBuf::from("data/anomaly.db")
}

fn default_raw_directory() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_site() -> String {
    "local".to_string()
}

impl MonitorConfig {
    /// Load from the file named by `MONITOR_CONFIG` and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (optional) and the environment
    pub fn load_from(path: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.sampling_rate == 0 {
            bail!("sampling_rate must be positive");
        }
        for id in MachineId::ALL {
            self.machine(id)?;
        }
        Ok(())
    }

    /// Settings for one of the two monitored machines
    pub fn machine(&self, id: MachineId) -> Result<&MachineConfig> {
        self.machines
            .iter()
            .find(|m| m.name == id.name())
            .with_context(|| format!("No configuration for {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = MonitorConfig::load_from("/nonexistent/monitor.toml").unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.sampling_rate, 100);
        assert_eq!(config.channel_capacity, 1024);
        assert_eq!(config.machine(MachineId::Machine2).unwrap().threshold, 10.0);
        assert!(config.model_path.is_none());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let file = write_config(
            r#"
            batch_size = 32
            raw_directory = "/var/lib/monitor/raw"
            external_directory = "/mnt/share"

            [[machines]]
            name = "machine1"
            threshold = 7.5
            rollup_db = "m1.db"

            [[machines]]
            name = "machine2"
            threshold = 12
            rollup_db = "m2.db"
            "#,
        );

        let config = MonitorConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.machine(MachineId::Machine1).unwrap().threshold, 7.5);
        assert_eq!(
            config.machine(MachineId::Machine2).unwrap().rollup_db,
            PathBuf::from("m2.db")
        );
        assert_eq!(config.external_directory, Some(PathBuf::from("/mnt/share")));
    }

    #[test]
    fn test_missing_machine_is_rejected() {
        let file = write_config(
            r#"
            [[machines]]
            name = "machine1"
            threshold = 1.0
            rollup_db = "m1.db"
            "#,
        );

        assert!(MonitorConfig::load_from(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let file = write_config("batch_size = 0\n");
        assert!(MonitorConfig::load_from(file.path().to_str().unwrap()).is_err());
    }
}
