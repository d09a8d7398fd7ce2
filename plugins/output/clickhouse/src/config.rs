use serde::Deserialize;

use crate::error::SinkError;
use crate::schema::validate_identifier;

/// ClickHouse output configuration.
///
/// Arrives as JSON over the plugin FFI boundary or as a TOML table in the
/// relay config; both go through serde with the defaults below.
#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    // ── Connection ──
    pub host: String,
    /// HTTP interface port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Per-request timeout in seconds (ping, DDL, describe, insert).
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    // ── Schema ──
    /// Issue `CREATE TABLE IF NOT EXISTS` for every table in a batch.
    #[serde(default)]
    pub create_table: bool,
    /// Tag keys in partition-key order. Unlisted tags sort after listed ones.
    #[serde(default)]
    pub key_priority: Vec<String>,
    /// Tag keys left out of the partition/order key.
    #[serde(default, alias = "exclude_key")]
    pub exclude_keys: Vec<String>,

    // ── Admission ──
    /// Metric names to write. `"*"` admits everything.
    #[serde(default = "default_allow_list", alias = "white_list")]
    pub allow_list: Vec<String>,

    // ── Concurrency ──
    /// Maximum tables inserted concurrently within one batch.
    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: usize,
}

fn default_port() -> u16 { 8123 }
fn default_user() -> String { "default".into() }
fn default_database() -> String { "telegraf".into() }
fn default_write_timeout_secs() -> u64 { 10 }
fn default_allow_list() -> Vec<String> { vec![crate::allow_list::WILDCARD.into()] }
fn default_max_parallel_tables() -> usize { 8 }

impl ClickHouseConfig {
    /// Minimal config pointing at `host`, everything else defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            tls: false,
            accept_invalid_certs: false,
            write_timeout_secs: default_write_timeout_secs(),
            create_table: false,
            key_priority: Vec::new(),
            exclude_keys: Vec::new(),
            allow_list: default_allow_list(),
            max_parallel_tables: default_max_parallel_tables(),
        }
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.host.is_empty() {
            return Err(SinkError::Config("host is empty".into()));
        }
        validate_identifier(&self.database, "database")?;
        if self.max_parallel_tables == 0 {
            return Err(SinkError::Config("max_parallel_tables must be at least 1".into()));
        }
        if self.write_timeout_secs == 0 {
            return Err(SinkError::Config("write_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// `http(s)://host:port` of the ClickHouse HTTP interface.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg: ClickHouseConfig = serde_json::from_str(r#"{"host":"127.0.0.1"}"#).unwrap();
        assert_eq!(cfg.port, 8123);
        assert_eq!(cfg.user, "default");
        assert_eq!(cfg.database, "telegraf");
        assert_eq!(cfg.write_timeout_secs, 10);
        assert!(!cfg.create_table);
        assert_eq!(cfg.allow_list, vec!["*".to_string()]);
        assert_eq!(cfg.max_parallel_tables, 8);
        assert_eq!(cfg.base_url(), "http://127.0.0.1:8123");
        cfg.validate().unwrap();
    }

    #[test]
    fn accepts_legacy_key_names() {
        let cfg: ClickHouseConfig = serde_json::from_str(
            r#"{"host":"ch","tls":true,"port":8443,"exclude_key":["path"],"white_list":["cpu"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.exclude_keys, vec!["path".to_string()]);
        assert_eq!(cfg.allow_list, vec!["cpu".to_string()]);
        assert_eq!(cfg.base_url(), "https://ch:8443");
    }

    #[test]
    fn rejects_bad_database_name() {
        let mut cfg = ClickHouseConfig::new("ch");
        cfg.database = "metrics; DROP".into();
        assert!(matches!(cfg.validate(), Err(SinkError::InvalidIdentifier(_))));

        let mut cfg = ClickHouseConfig::new("ch");
        cfg.max_parallel_tables = 0;
        assert!(matches!(cfg.validate(), Err(SinkError::Config(_))));
    }
}
