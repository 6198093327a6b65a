use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `ROTATOR__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Period of the streaming statistics feed.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// `ucb1` or `random`.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmitterConfig {
    #[serde(default = "default_emitter_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Number of recent event ids remembered to drop redeliveries.
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// `memory` or `nats`.
    #[serde(default = "default_queue_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_nats_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_queue_group")]
    pub queue_group: String,
    #[serde(default = "default_nats_max_reconnects")]
    pub max_reconnects: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "rotator-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_stats_interval_secs() -> u64 {
    5
}
fn default_algorithm() -> String {
    "ucb1".to_string()
}
fn default_emitter_capacity() -> usize {
    10_000
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_dedupe_window() -> usize {
    100_000
}
fn default_queue_backend() -> String {
    "memory".to_string()
}
fn default_nats_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}
fn default_subject() -> String {
    "rotator.events".to_string()
}
fn default_queue_group() -> String {
    "aggregators".to_string()
}
fn default_nats_max_reconnects() -> usize {
    60
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
        }
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            capacity: default_emitter_capacity(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            dedupe_window: default_dedupe_window(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: default_nats_urls(),
            subject: default_subject(),
            queue_group: default_queue_group(),
            max_reconnects: default_nats_max_reconnects(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            engine: EngineConfig::default(),
            emitter: EmitterConfig::default(),
            ingest: IngestConfig::default(),
            queue: QueueConfig::default(),
            nats: NatsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("ROTATOR")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("nats.urls"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
