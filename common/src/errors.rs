// Error handling framework

use thiserror::Error;

/// Store-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Store script failed: {0}")]
    Script(String),
}

impl StoreError {
    /// Whether retrying on a later tick can succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

/// Configuration errors, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("No queues configured to monitor")]
    NoQueues,
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Process-level errors raised while bringing the janitor up
#[derive(Error, Debug)]
pub enum JanitorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Store unreachable after {attempts} attempts over {waited_seconds}s: {source}")]
    StoreUnavailable {
        attempts: u32,
        waited_seconds: u64,
        #[source]
        source: StoreError,
    },

    #[error("Telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}
