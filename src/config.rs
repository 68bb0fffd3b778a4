use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ingestd server.
///
/// Scheduler tunables (concurrency, queue depth, retry backoff) are
/// implementation-defined and therefore all overridable from the environment;
/// the defaults below are the shipped baseline.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Maximum number of jobs allowed in the running state at once.
    pub max_concurrent_jobs: usize,
    /// Capacity of the document slot pool shared by all running jobs.
    pub slot_capacity: usize,
    /// Maximum number of jobs the pending queue will hold before rejecting
    /// submissions with backpressure.
    pub max_queue_depth: usize,
    /// Total processor runs allowed per job before it is marked failed.
    pub max_attempts: u32,
    /// Base delay applied before the first retry.
    pub retry_base_delay: Duration,
    /// Upper bound on the exponential retry backoff.
    pub retry_max_delay: Duration,
    /// Batches with at most this many files run through the streaming path.
    pub streaming_threshold: usize,
    /// How long terminal jobs and trackers remain queryable before purging.
    pub job_retention: Duration,
    /// Optional override for the automatic chunk size selection.
    pub chunk_size: Option<usize>,
    /// Sliding token overlap applied between adjacent chunks.
    pub chunk_overlap: usize,
    /// Dimensionality of the vectors produced by the default sink.
    pub embedding_dimension: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_concurrent_jobs: load_parsed("INGESTD_MAX_CONCURRENT_JOBS")?.unwrap_or(4),
            slot_capacity: load_parsed("INGESTD_SLOT_CAPACITY")?.unwrap_or(8),
            max_queue_depth: load_parsed("INGESTD_MAX_QUEUE_DEPTH")?.unwrap_or(256),
            max_attempts: load_parsed("INGESTD_MAX_ATTEMPTS")?.unwrap_or(3),
            retry_base_delay: Duration::from_millis(
                load_parsed("INGESTD_RETRY_BASE_DELAY_MS")?.unwrap_or(500),
            ),
            retry_max_delay: Duration::from_millis(
                load_parsed("INGESTD_RETRY_MAX_DELAY_MS")?.unwrap_or(30_000),
            ),
            streaming_threshold: load_parsed("INGESTD_STREAMING_THRESHOLD")?.unwrap_or(3),
            job_retention: Duration::from_secs(
                load_parsed("INGESTD_JOB_RETENTION_SECS")?.unwrap_or(3_600),
            ),
            chunk_size: load_parsed("INGESTD_CHUNK_SIZE")?,
            chunk_overlap: load_parsed("INGESTD_CHUNK_OVERLAP")?.unwrap_or(0),
            embedding_dimension: load_parsed("INGESTD_EMBEDDING_DIMENSION")?.unwrap_or(384),
            server_port: load_parsed("INGESTD_SERVER_PORT")?,
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        slot_capacity = config.slot_capacity,
        max_queue_depth = config.max_queue_depth,
        max_attempts = config.max_attempts,
        streaming_threshold = config.streaming_threshold,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
