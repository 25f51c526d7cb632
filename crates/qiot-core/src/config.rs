//! Unified configuration loading.
//!
//! Configuration sources, lowest priority first:
//! 1. Built-in defaults (see [`defaults`])
//! 2. `qiot.toml` (TOML format)
//! 3. Environment variables (see [`env_vars`]), including the legacy
//!    `EMQX_*` / `INFLUX_*` names used by existing deployments.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    pub const CONFIG_FILE: &str = "qiot.toml";
    pub const STORAGE_PATH: &str = "data/qiot.redb";
    pub const TOPIC_PREFIX: &str = "qiot";
    pub const BUCKET: &str = "iotproject_bucket";
    pub const CONNECTOR: &str = "Influx1";
    pub const BROKER_TIMEOUT_SECS: u64 = 30;
    pub const INFLUX_TIMEOUT_SECS: u64 = 50;
    /// Dashboard look-back window.
    pub const WINDOW_SECS: u64 = 5;
    pub const SYNC_CONCURRENCY: usize = 4;
}

/// Environment variable names.
pub mod env_vars {
    pub const EMQX_HOST: &str = "EMQX_HOST";
    pub const EMQX_API_PORT: &str = "EMQX_API_PORT";
    pub const EMQX_USER_TOKEN: &str = "EMQX_USER_TOKEN";
    pub const EMQX_TOKEN: &str = "EMQX_TOKEN";
    pub const INFLUX_URI: &str = "INFLUX_URI";
    pub const INFLUX_TOKEN: &str = "INFLUX_TOKEN";
    pub const INFLUX_ORG: &str = "INFLUX_ORG";
    pub const STORAGE_PATH: &str = "QIOT_STORAGE_PATH";
    pub const TOPIC_PREFIX: &str = "QIOT_TOPIC_PREFIX";
    pub const SYNC_CONCURRENCY: &str = "QIOT_SYNC_CONCURRENCY";
    pub const LOG_JSON: &str = "QIOT_LOG_JSON";
}

/// Whether generated broker resource names carry the experiment id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingScope {
    /// `action_<measurement>_<experimentId>`
    Experiment,
    /// `action_<measurement>`
    Global,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub influx: InfluxConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Document store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(defaults::STORAGE_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// EMQX management API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Base URL of the management API, e.g. `http://emqx:18083`.
    pub base_url: Option<String>,
    /// API key used as the basic-auth user.
    #[serde(default)]
    pub user: String,
    /// API secret used as the basic-auth password.
    #[serde(default)]
    pub password: String,
    /// Name of the InfluxDB connector the actions write through.
    #[serde(default = "default_connector")]
    pub connector: String,
    #[serde(default = "default_broker_timeout")]
    pub timeout_secs: u64,
}

fn default_connector() -> String {
    defaults::CONNECTOR.to_string()
}

fn default_broker_timeout() -> u64 {
    defaults::BROKER_TIMEOUT_SECS
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user: String::new(),
            password: String::new(),
            connector: default_connector(),
            timeout_secs: default_broker_timeout(),
        }
    }
}

/// InfluxDB v2 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub org: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_influx_timeout")]
    pub timeout_secs: u64,
}

fn default_bucket() -> String {
    defaults::BUCKET.to_string()
}

fn default_window() -> u64 {
    defaults::WINDOW_SECS
}

fn default_influx_timeout() -> u64 {
    defaults::INFLUX_TIMEOUT_SECS
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            org: String::new(),
            bucket: default_bucket(),
            window_secs: default_window(),
            timeout_secs: default_influx_timeout(),
        }
    }
}

/// Topic and resource naming policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Scope for resources compiled from service characteristics.
    #[serde(default = "default_structured_scope")]
    pub structured_scope: NamingScope,
    /// Scope for resources compiled from whiteboard measures.
    #[serde(default = "default_whiteboard_scope")]
    pub whiteboard_scope: NamingScope,
}

fn default_topic_prefix() -> String {
    defaults::TOPIC_PREFIX.to_string()
}

fn default_structured_scope() -> NamingScope {
    NamingScope::Experiment
}

// Whiteboard resources have always been created without the experiment
// suffix; kept until product decides on a single scope.
fn default_whiteboard_scope() -> NamingScope {
    NamingScope::Global
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            structured_scope: default_structured_scope(),
            whiteboard_scope: default_whiteboard_scope(),
        }
    }
}

/// Broker synchronisation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of measurement sources reconciled at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    defaults::SYNC_CONCURRENCY
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (if it exists), then apply the process
    /// environment and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(defaults::CONFIG_FILE));
        let mut config = if path.exists() {
            info!(category = "config", "Loading config from: {}", path.display());
            Self::from_toml_file(path)?
        } else {
            info!(
                category = "config",
                "No config file at {}, using defaults and environment",
                path.display()
            );
            Self::default()
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without consulting the environment.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Overlay values from an environment lookup function.
    ///
    /// Takes a lookup closure so tests can supply a fixed environment.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty(env_vars::EMQX_HOST) {
            let base = match non_empty(env_vars::EMQX_API_PORT) {
                Some(port) => format!("http://{}:{}", host, port),
                None => format!("http://{}", host),
            };
            self.broker.base_url = Some(base);
        }
        if let Some(user) = non_empty(env_vars::EMQX_USER_TOKEN) {
            self.broker.user = user;
        }
        if let Some(password) = non_empty(env_vars::EMQX_TOKEN) {
            self.broker.password = password;
        }
        if let Some(url) = non_empty(env_vars::INFLUX_URI) {
            self.influx.url = Some(url);
        }
        if let Some(token) = non_empty(env_vars::INFLUX_TOKEN) {
            self.influx.token = Some(token);
        }
        if let Some(org) = non_empty(env_vars::INFLUX_ORG) {
            self.influx.org = org;
        }
        if let Some(path) = non_empty(env_vars::STORAGE_PATH) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(prefix) = non_empty(env_vars::TOPIC_PREFIX) {
            self.naming.topic_prefix = prefix;
        }
        if let Some(concurrency) =
            non_empty(env_vars::SYNC_CONCURRENCY).and_then(|v| v.parse().ok())
        {
            self.sync.concurrency = concurrency;
        }
    }

    /// Check value ranges.
    ///
    /// Remote targets are optional here so commands that never reach the
    /// broker or InfluxDB work without them; [`BrokerConfig::target`] and
    /// [`InfluxConfig::target`] fail when a client is built without one.
    pub fn validate(&self) -> Result<()> {
        if self.naming.topic_prefix.trim().is_empty() {
            return Err(Error::Config("naming.topic_prefix must not be empty".into()));
        }
        if self.sync.concurrency == 0 {
            return Err(Error::Config("sync.concurrency must be > 0".into()));
        }
        if self.influx.window_secs == 0 {
            return Err(Error::Config("influx.window_secs must be > 0".into()));
        }
        if self.broker.timeout_secs == 0 || self.influx.timeout_secs == 0 {
            return Err(Error::Config("timeouts must be > 0".into()));
        }
        Ok(())
    }
}

impl BrokerConfig {
    /// Broker base URL, or a configuration error if none is set.
    pub fn target(&self) -> Result<&str> {
        self.base_url.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "broker.base_url is not set (or set {} and {})",
                env_vars::EMQX_HOST,
                env_vars::EMQX_API_PORT
            ))
        })
    }
}

impl InfluxConfig {
    /// InfluxDB URL and token, or a configuration error if either is missing.
    pub fn target(&self) -> Result<(&str, &str)> {
        match (self.url.as_deref(), self.token.as_deref()) {
            (Some(url), Some(token)) => Ok((url, token)),
            _ => Err(Error::Config(format!(
                "{} and {} must be set",
                env_vars::INFLUX_URI,
                env_vars::INFLUX_TOKEN
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_preserve_legacy_naming() {
        let config = AppConfig::default();
        assert_eq!(config.naming.topic_prefix, "qiot");
        assert_eq!(config.naming.structured_scope, NamingScope::Experiment);
        assert_eq!(config.naming.whiteboard_scope, NamingScope::Global);
        assert_eq!(config.influx.bucket, "iotproject_bucket");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [broker]
            base_url = "http://emqx:18083"
            user = "key"
            password = "secret"

            [naming]
            whiteboard_scope = "experiment"

            [sync]
            concurrency = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.broker.target().unwrap(), "http://emqx:18083");
        assert_eq!(config.broker.connector, "Influx1");
        assert_eq!(config.naming.whiteboard_scope, NamingScope::Experiment);
        assert_eq!(config.sync.concurrency, 8);
    }

    #[test]
    fn test_legacy_env_overrides() {
        let vars = env(&[
            ("EMQX_HOST", "broker.local"),
            ("EMQX_API_PORT", "18083"),
            ("EMQX_USER_TOKEN", "user"),
            ("EMQX_TOKEN", "pass"),
            ("INFLUX_URI", "http://influx:8086"),
            ("INFLUX_TOKEN", "tok"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env_from(|k| vars.get(k).cloned());

        assert_eq!(config.broker.target().unwrap(), "http://broker.local:18083");
        assert_eq!(config.broker.user, "user");
        assert_eq!(config.broker.password, "pass");
        assert_eq!(
            config.influx.target().unwrap(),
            ("http://influx:8086", "tok")
        );
    }

    #[test]
    fn test_missing_targets_are_config_errors() {
        let config = AppConfig::default();
        assert!(matches!(config.broker.target(), Err(Error::Config(_))));
        assert!(matches!(config.influx.target(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = AppConfig::default();
        config.sync.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qiot.toml");
        std::fs::write(&path, "[influx]\nbucket = \"lab\"\nwindow_secs = 60\n").unwrap();

        let config = AppConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.influx.bucket, "lab");
        assert_eq!(config.influx.window_secs, 60);
    }
}
