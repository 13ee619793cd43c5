use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use mempool_flow::{FlowError, FlowEstimator};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::persistence::DEFAULT_SUMMARY_TTL_SECS;
use crate::service::SummaryEngineConfig;

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bitcoin_rpc: BitcoinRpcConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub estimation: EstimationConfig,
    pub logger: LoggerConfig,
    pub output: OutputConfig,
}

/// Bitcoin RPC configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitcoinRpcConfig {
    /// RPC URL (default: http://localhost:8332)
    pub url: String,
    /// RPC username
    pub username: String,
    /// RPC password
    pub password: String,
    /// Concurrent RPC workers (default: 8)
    pub workers: usize,
    /// Calls that may wait for a worker (default: 10000)
    pub queue_capacity: usize,
}

impl Default for BitcoinRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8332".to_string(),
            username: String::new(),
            password: String::new(),
            workers: 8,
            queue_capacity: 10_000,
        }
    }
}

/// Where summaries, the transaction log and history are kept
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Storage configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Backend (default: sqlite)
    pub backend: StorageBackend,
    /// SQLite database file (default: mempool_flow.db)
    pub path: String,
    /// Lifetime of cached summaries in seconds (default: 2 days)
    pub summary_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: "mempool_flow.db".to_string(),
            summary_ttl_secs: DEFAULT_SUMMARY_TTL_SECS,
        }
    }
}

/// Summary engine configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Summary constructions running at once (default: 1000)
    pub max_in_flight: usize,
    /// Ids per cache query (default: 100000)
    pub cache_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1_000,
            cache_batch_size: 100_000,
        }
    }
}

/// Estimator configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EstimationConfig {
    /// Confirmation windows in minutes
    pub windows_minutes: Vec<u32>,
    /// Confidence levels in (0, 1]
    pub confidences: Vec<f64>,
    /// Flow of a window is measured over `window × multiplier` minutes (default: 2)
    pub flow_timespan_multiplier: u32,
    /// Weight one block clears (default: 4000000)
    pub block_capacity_wu: f64,
    /// Mean minutes between blocks (default: 10)
    pub block_interval_minutes: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            windows_minutes: FlowEstimator::DEFAULT_WINDOWS_MINUTES.to_vec(),
            confidences: FlowEstimator::DEFAULT_CONFIDENCES.to_vec(),
            flow_timespan_multiplier: 2,
            block_capacity_wu: FlowEstimator::BLOCK_CAPACITY_WU,
            block_interval_minutes: FlowEstimator::TARGET_BLOCK_INTERVAL_MINUTES,
        }
    }
}

/// Mempool logger configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggerConfig {
    /// Seconds between mempool polls (default: 60)
    pub poll_interval_secs: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
        }
    }
}

/// Output configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct OutputConfig {
    /// File the run output is written to, if any
    pub path: Option<String>,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;

        // Load from config file if specified via environment variable
        if let Ok(config_file) = std::env::var("FLOW_CONFIG_FILE") {
            builder = builder.add_source(File::from(Path::new(&config_file)));
        } else {
            // Try to load default config files
            builder = builder
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config").required(false));
        }

        Self::with_env(builder)?.build()?.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = Self::defaults()?.add_source(File::from(path.as_ref()));

        // Still allow environment overrides
        Self::with_env(builder)?.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let windows: Vec<i64> = FlowEstimator::DEFAULT_WINDOWS_MINUTES
            .iter()
            .map(|&w| i64::from(w))
            .collect();

        Config::builder()
            .set_default("bitcoin_rpc.url", "http://localhost:8332")?
            .set_default("bitcoin_rpc.username", "")?
            .set_default("bitcoin_rpc.password", "")?
            .set_default("bitcoin_rpc.workers", 8)?
            .set_default("bitcoin_rpc.queue_capacity", 10_000)?
            .set_default("storage.backend", "sqlite")?
            .set_default("storage.path", "mempool_flow.db")?
            .set_default("storage.summary_ttl_secs", DEFAULT_SUMMARY_TTL_SECS as i64)?
            .set_default("engine.max_in_flight", 1_000)?
            .set_default("engine.cache_batch_size", 100_000)?
            .set_default("estimation.windows_minutes", windows)?
            .set_default("estimation.confidences", FlowEstimator::DEFAULT_CONFIDENCES.to_vec())?
            .set_default("estimation.flow_timespan_multiplier", 2)?
            .set_default("estimation.block_capacity_wu", FlowEstimator::BLOCK_CAPACITY_WU)?
            .set_default(
                "estimation.block_interval_minutes",
                FlowEstimator::TARGET_BLOCK_INTERVAL_MINUTES,
            )?
            .set_default("logger.poll_interval_secs", 60)
    }

    /// `FLOW_<SECTION>__<KEY>` overrides any setting, and the usual
    /// `BITCOIN_RPC_URL`, `BITCOIN_RPC_USERNAME` and `BITCOIN_RPC_PASSWORD`
    /// take precedence for node credentials.
    fn with_env(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .add_source(
                Environment::with_prefix("FLOW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("bitcoin_rpc.url", std::env::var("BITCOIN_RPC_URL").ok())?
            .set_override_option(
                "bitcoin_rpc.username",
                std::env::var("BITCOIN_RPC_USERNAME").ok(),
            )?
            .set_override_option(
                "bitcoin_rpc.password",
                std::env::var("BITCOIN_RPC_PASSWORD").ok(),
            )
    }

    /// Convert to Bitcoin RPC config for the RPC client
    pub fn to_bitcoin_rpc_config(&self) -> crate::bitcoin::BitcoinRpcConfig {
        crate::bitcoin::BitcoinRpcConfig {
            url: self.bitcoin_rpc.url.clone(),
            username: self.bitcoin_rpc.username.clone(),
            password: self.bitcoin_rpc.password.clone(),
            workers: self.bitcoin_rpc.workers,
            queue_capacity: self.bitcoin_rpc.queue_capacity,
        }
    }

    pub fn engine_config(&self) -> SummaryEngineConfig {
        SummaryEngineConfig {
            max_in_flight: self.engine.max_in_flight,
            cache_batch_size: self.engine.cache_batch_size,
        }
    }

    /// Builds the estimator, validating the estimation settings
    pub fn estimator(&self) -> Result<FlowEstimator, FlowError> {
        FlowEstimator::with_config(
            self.estimation.windows_minutes.clone(),
            self.estimation.confidences.clone(),
            self.estimation.block_capacity_wu,
            self.estimation.block_interval_minutes,
        )
    }

    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.storage.summary_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.logger.poll_interval_secs.max(1))
    }
}
