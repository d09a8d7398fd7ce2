use clap::Parser;
use serde::Deserialize;

use output_clickhouse::ClickHouseConfig;

use crate::error::RelayError;

#[derive(Parser)]
#[command(name = "metrics-relay", about = "Relay JSON metrics from stdin into ClickHouse")]
pub struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "relay.toml", env = "RELAY_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySettings,
    pub clickhouse: ClickHouseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    /// Metrics per write; a full batch is flushed immediately.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pending metrics are flushed at least this often.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_batch_size() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    10_000
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl RelaySettings {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.batch_size == 0 {
            return Err(RelayError::Config {
                context: "relay",
                detail: "batch_size must be at least 1".into(),
            });
        }
        if self.flush_interval_ms == 0 {
            return Err(RelayError::Config {
                context: "relay",
                detail: "flush_interval_ms must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl RelayConfig {
    pub fn load(path: &str) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| RelayError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
