// Configuration management with layered configuration (file, env)

use crate::errors::ConfigurationError;
use crate::store::RequeuePosition;
use config::{Config, Environment, File, Map};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all validated configuration options
#[derive(Debug, Clone)]
pub struct Settings {
    pub scan: ScanConfig,
    pub store: StoreConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Seconds between sweep ticks
    pub interval_seconds: u64,
    /// Monitored work-queue names, deduplicated
    pub queues: BTreeSet<String>,
    /// Seconds without a progress update before a claimed entry is abandoned
    pub stale_time_seconds: u64,
    /// Prefix of processing-queue keys (`{prefix}-{queue}` and `{prefix}-{queue}:*`)
    pub processing_prefix: String,
    pub requeue_at: RequeuePosition,
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on any single store interaction
    pub timeout_seconds: u64,
    /// How long the store may stay unreachable at startup before the process gives up
    pub startup_grace_seconds: u64,
}

impl StoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

/// Flat key/value view of the environment, before validation
#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default = "default_queue")]
    queues: String,
    #[serde(default = "default_queue")]
    queue: String,
    #[serde(default = "default_delimiter")]
    queue_delimiter: String,
    #[serde(default = "default_store_host")]
    store_host: String,
    #[serde(default = "default_store_port")]
    store_port: u16,
    #[serde(default = "default_stale_time")]
    stale_time: u64,
    #[serde(default = "default_store_timeout")]
    store_timeout: u64,
    #[serde(default = "default_startup_grace")]
    startup_grace: u64,
    #[serde(default = "default_processing_prefix")]
    processing_prefix: String,
    #[serde(default = "default_requeue_at")]
    requeue_at: String,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    metrics_port: Option<u16>,
}

fn default_interval() -> u64 {
    20
}

fn default_queue() -> String {
    "predict".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_store_host() -> String {
    "redis-master".to_string()
}

fn default_store_port() -> u16 {
    6379
}

fn default_stale_time() -> u64 {
    600
}

fn default_store_timeout() -> u64 {
    5
}

fn default_startup_grace() -> u64 {
    30
}

fn default_processing_prefix() -> String {
    "processing".to_string()
}

fn default_requeue_at() -> String {
    "head".to_string()
}

/// Split a delimited queue list and merge the deprecated single-queue name into it.
///
/// Names are trimmed; empty names are dropped.
pub fn parse_queue_names(queues: &str, delimiter: &str, deprecated: Option<&str>) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = queues
        .split(delimiter)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(name) = deprecated.map(str::trim).filter(|name| !name.is_empty()) {
        names.insert(name.to_string());
    }

    names
}

impl Settings {
    /// Load configuration with layered precedence: file → env
    pub fn load() -> Result<Self, ConfigurationError> {
        Self::load_from("config", None)
    }

    /// Load configuration from a specific directory.
    ///
    /// `env` replaces the process environment when given.
    pub fn load_from<P: AsRef<Path>>(
        config_dir: P,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigurationError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Values stay strings; numeric fields are converted on deserialize so
            // queue names like "007" keep their spelling
            .add_source(Environment::default().source(env));

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigurationError> {
        if raw.queue_delimiter.is_empty() {
            return Err(ConfigurationError::invalid(
                "QUEUE_DELIMITER",
                "delimiter cannot be empty",
            ));
        }

        let requeue_at = raw
            .requeue_at
            .parse::<RequeuePosition>()
            .map_err(|reason| ConfigurationError::invalid("REQUEUE_AT", reason))?;

        let log_level = raw.log_level.unwrap_or_else(|| {
            if raw.debug {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

        let settings = Settings {
            scan: ScanConfig {
                interval_seconds: raw.interval,
                queues: parse_queue_names(&raw.queues, &raw.queue_delimiter, Some(&raw.queue)),
                stale_time_seconds: raw.stale_time,
                processing_prefix: raw.processing_prefix,
                requeue_at,
            },
            store: StoreConfig {
                host: raw.store_host,
                port: raw.store_port,
                timeout_seconds: raw.store_timeout,
                startup_grace_seconds: raw.startup_grace,
            },
            observability: ObservabilityConfig {
                log_level,
                metrics_port: raw.metrics_port,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.scan.interval_seconds == 0 {
            return Err(ConfigurationError::invalid("INTERVAL", "must be greater than 0"));
        }
        if self.scan.stale_time_seconds == 0 {
            return Err(ConfigurationError::invalid("STALE_TIME", "must be greater than 0"));
        }
        if self.scan.queues.is_empty() {
            return Err(ConfigurationError::NoQueues);
        }
        if self.scan.processing_prefix.is_empty() {
            return Err(ConfigurationError::invalid(
                "PROCESSING_PREFIX",
                "prefix cannot be empty",
            ));
        }

        if self.store.host.is_empty() {
            return Err(ConfigurationError::invalid("STORE_HOST", "host cannot be empty"));
        }
        if self.store.port == 0 {
            return Err(ConfigurationError::invalid("STORE_PORT", "must be greater than 0"));
        }
        if self.store.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid("STORE_TIMEOUT", "must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan: ScanConfig {
                interval_seconds: default_interval(),
                queues: BTreeSet::from([default_queue()]),
                stale_time_seconds: default_stale_time(),
                processing_prefix: default_processing_prefix(),
                requeue_at: RequeuePosition::Head,
            },
            store: StoreConfig {
                host: default_store_host(),
                port: default_store_port(),
                timeout_seconds: default_store_timeout(),
                startup_grace_seconds: default_startup_grace(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
            },
        }
    }
}
