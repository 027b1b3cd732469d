use crate::error::RotationError;
use serde::Deserialize;

/// Root application configuration. Loaded from an optional config file and
/// environment variables with the prefix `BANNER_ROTATION__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotationConfig {
    /// Impressions an arm needs before it is judged by its CTR.
    #[serde(default = "default_warm_threshold")]
    pub warm_threshold: u64,
    /// Fixed seed for reproducible selection. `None` draws from a
    /// per-thread generator.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_nats_enabled")]
    pub enabled: bool,
    #[serde(default = "default_nats_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_show_subject")]
    pub show_subject: String,
    #[serde(default = "default_click_subject")]
    pub click_subject: String,
    #[serde(default = "default_nats_max_reconnects")]
    pub max_reconnects: usize,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8088
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_warm_threshold() -> u64 {
    50
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_key_prefix() -> String {
    "banner_rotation".to_string()
}
fn default_nats_enabled() -> bool {
    false
}
fn default_nats_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}
fn default_stream_name() -> String {
    "banner-events".to_string()
}
fn default_show_subject() -> String {
    "show".to_string()
}
fn default_click_subject() -> String {
    "click".to_string()
}
fn default_nats_max_reconnects() -> usize {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            warm_threshold: default_warm_threshold(),
            seed: None,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            connect_timeout_ms: default_connect_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_nats_enabled(),
            urls: default_nats_urls(),
            stream_name: default_stream_name(),
            show_subject: default_show_subject(),
            click_subject: default_click_subject(),
            max_reconnects: default_nats_max_reconnects(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            rotation: RotationConfig::default(),
            store: StoreConfig::default(),
            redis: RedisConfig::default(),
            nats: NatsConfig::default(),
        }
    }
}

impl NatsConfig {
    /// Full subject for an action kind, e.g. `banner-events.click`.
    pub fn subject(&self, kind: crate::types::ActionKind) -> String {
        let leaf = match kind {
            crate::types::ActionKind::Show => &self.show_subject,
            crate::types::ActionKind::Click => &self.click_subject,
        };
        format!("{}.{}", self.stream_name, leaf)
    }
}

impl AppConfig {
    /// Load configuration from an optional config file, then environment
    /// variables (which take precedence).
    pub fn load(config_file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            tracing::debug!(path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("BANNER_ROTATION")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("redis.urls")
                    .with_list_parse_key("nats.urls"),
            )
            .build()?;
        config.try_deserialize()
    }

    /// Configuration for startup. A file given explicitly must load; without
    /// one, unusable environment settings fall back to the defaults.
    pub fn resolve(config_file: Option<&str>) -> Result<Self, RotationError> {
        match (Self::load(config_file), config_file) {
            (Ok(config), _) => Ok(config),
            (Err(e), Some(path)) => Err(RotationError::Config(format!("{path}: {e}"))),
            (Err(e), None) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ActionKind;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.rotation.warm_threshold, 50);
        assert_eq!(config.rotation.seed, None);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.api.http_port, 8088);
        assert!(!config.nats.enabled);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"rotation": {"warm_threshold": 10, "seed": 7}, "store": {"backend": "redis"}}"#,
        )
        .unwrap();
        assert_eq!(config.rotation.warm_threshold, 10);
        assert_eq!(config.rotation.seed, Some(7));
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.redis.key_prefix, "banner_rotation");
        assert_eq!(config.node_id, "node-01");
    }

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "banner-rotation-{}-{name}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_explicit_file_loads() {
        let path = write_config("valid", r#"{"store": {"backend": "redis"}}"#);
        let config = AppConfig::resolve(path.to_str()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_invalid_explicit_file_is_an_error() {
        let path = write_config("typo", r#"{"store": {"backend": "rediss"}}"#);
        let result = AppConfig::resolve(path.to_str());
        assert!(matches!(result, Err(RotationError::Config(_))));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("banner-rotation-does-not-exist.json");
        assert!(matches!(
            AppConfig::resolve(path.to_str()),
            Err(RotationError::Config(_))
        ));
    }

    #[test]
    fn test_nats_subjects() {
        let nats = NatsConfig::default();
        assert_eq!(nats.subject(ActionKind::Show), "banner-events.show");
        assert_eq!(nats.subject(ActionKind::Click), "banner-events.click");
    }
}
