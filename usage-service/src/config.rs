use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// When set, every fetched snapshot is appended here as one NDJSON line.
    #[serde(default)]
    pub record_path: Option<PathBuf>,
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            uri: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkingSetConfig {
    /// Cycles an untouched, clean entity survives before it is dropped from
    /// memory. Zero keeps everything.
    #[serde(default = "default_retention_cycles")]
    pub retention_cycles: u64,
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            retention_cycles: default_retention_cycles(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimezoneConfig {
    /// IANA zone answered for any coordinate. Without it, local time is UTC.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub working_set: WorkingSetConfig,
    #[serde(default)]
    pub timezone: TimezoneConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_retry_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_max_connections() -> u32 {
    5
}

fn default_retention_cycles() -> u64 {
    5760
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("USAGE_CONFIG").unwrap_or_else(|_| "usage-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.store.kind == StoreKind::Postgres && cfg.store.uri.is_empty() {
            anyhow::bail!("store.uri is required for the postgres store");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [feed]
            url = "https://example.test/sites"

            [store]
            uri = "postgres://localhost/usage"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.feed.poll_interval(), Duration::from_secs(15));
        assert_eq!(cfg.feed.retry_interval(), Duration::from_secs(30));
        assert_eq!(cfg.feed.request_timeout(), Duration::from_secs(20));
        assert!(cfg.feed.record_path.is_none());
        assert_eq!(cfg.store.kind, StoreKind::Postgres);
        assert_eq!(cfg.store.max_connections, 5);
        assert_eq!(cfg.working_set.retention_cycles, 5760);
        assert!(cfg.timezone.default.is_none());
        assert!(cfg.metrics.is_none());
    }

    #[test]
    fn full_config_overrides_everything() {
        let cfg = AppConfig::parse(
            r#"
            [feed]
            url = "https://example.test/sites"
            poll_interval_secs = 5
            retry_interval_secs = 10
            request_timeout_secs = 3
            record_path = "/tmp/snapshots.ndjson"

            [store]
            kind = "memory"

            [working_set]
            retention_cycles = 0

            [timezone]
            default = "America/Chicago"

            [metrics]
            bind_addr = "0.0.0.0:9100"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.feed.poll_interval_secs, 5);
        assert_eq!(cfg.feed.record_path.as_deref(), Some(std::path::Path::new("/tmp/snapshots.ndjson")));
        assert_eq!(cfg.store.kind, StoreKind::Memory);
        assert_eq!(cfg.working_set.retention_cycles, 0);
        assert_eq!(cfg.timezone.default.as_deref(), Some("America/Chicago"));
        assert_eq!(cfg.metrics.unwrap().bind_addr, "0.0.0.0:9100");
    }

    #[test]
    fn postgres_store_requires_uri() {
        let err = AppConfig::parse(
            r#"
            [feed]
            url = "https://example.test/sites"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("store.uri"));
    }
}
