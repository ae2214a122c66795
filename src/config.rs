//! Runner configuration.
//!
//! A TOML or JSON file, overlaid with `POOL_SYNC_*` environment variables. Nested keys use a
//! double underscore, so `POOL_SYNC_LOGS__BLOCKS_PER_REQUEST=2000` overrides
//! `logs.blocks_per_request`.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::{BatchConfig, LogsConfig, RetryPolicy};
use crate::merkle::Element;
use crate::sync::{StreamKey, StreamKind, StreamTarget, SyncError};

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "POOL_SYNC";

/// Default values for optional configuration keys.
pub mod defaults {
    use std::path::PathBuf;

    /// Cache directory, relative to the working directory.
    pub fn data_dir() -> PathBuf {
        PathBuf::from(".pool-sync")
    }
    /// Depth of the commitment tree.
    pub const fn tree_levels() -> usize {
        crate::merkle::DEFAULT_TREE_LEVELS
    }
    pub fn zero_element() -> String {
        crate::merkle::DEFAULT_ZERO_ELEMENT.to_string()
    }
    /// Trees are built on the blocking pool unless disabled.
    pub const fn off_thread_tree() -> bool {
        true
    }
    pub const fn request_timeout_secs() -> u64 {
        30
    }
    pub const fn batch_size() -> usize {
        10
    }
    pub const fn batch_concurrency_size() -> usize {
        10
    }
    pub const fn batch_stagger_ms() -> u64 {
        40
    }
    /// Blocks covered by one `eth_getLogs` request.
    pub const fn blocks_per_request() -> u64 {
        5_000
    }
    pub const fn logs_concurrency_size() -> usize {
        10
    }
    pub const fn logs_stagger_ms() -> u64 {
        10
    }
    /// Total attempts per batch or window.
    pub const fn retry_max() -> usize {
        5
    }
    pub const fn retry_on_ms() -> u64 {
        500
    }
    /// Records per relayer page.
    pub const fn page_limit() -> usize {
        5_000
    }
    pub const fn relayer_enabled() -> bool {
        true
    }
}

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Unsupported configuration file {0}, expected .toml or .json")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// JSON-RPC endpoint of the ledger.
    pub rpc_url: String,
    pub net_id: u64,
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    /// Base URL of the remote snapshot tier, if any.
    #[serde(default)]
    pub static_base: Option<String>,
    #[serde(default = "defaults::tree_levels")]
    pub tree_levels: usize,
    #[serde(default = "defaults::zero_element")]
    pub zero_element: String,
    #[serde(default = "defaults::off_thread_tree")]
    pub off_thread_tree: bool,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub logs: LogSettings,
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Trusted relayer used instead of the ledger for live events.
    #[serde(default)]
    pub relayer: Option<RelayerConfig>,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

/// Block, transaction and receipt lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    #[serde(default = "defaults::batch_concurrency_size")]
    pub concurrency_size: usize,
    #[serde(default = "defaults::retry_max")]
    pub retry_max: usize,
    #[serde(default = "defaults::retry_on_ms")]
    pub retry_on_ms: u64,
    #[serde(default = "defaults::batch_stagger_ms")]
    pub stagger_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            concurrency_size: defaults::batch_concurrency_size(),
            retry_max: defaults::retry_max(),
            retry_on_ms: defaults::retry_on_ms(),
            stagger_ms: defaults::batch_stagger_ms(),
        }
    }
}

/// Windowed log queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "defaults::blocks_per_request")]
    pub blocks_per_request: u64,
    #[serde(default = "defaults::logs_concurrency_size")]
    pub concurrency_size: usize,
    #[serde(default = "defaults::retry_max")]
    pub retry_max: usize,
    #[serde(default = "defaults::retry_on_ms")]
    pub retry_on_ms: u64,
    #[serde(default = "defaults::logs_stagger_ms")]
    pub stagger_ms: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            blocks_per_request: defaults::blocks_per_request(),
            concurrency_size: defaults::logs_concurrency_size(),
            retry_max: defaults::retry_max(),
            retry_on_ms: defaults::retry_on_ms(),
            stagger_ms: defaults::logs_stagger_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub url: String,
    /// Network the relayer serves. Must match the top-level `net_id`.
    pub net_id: u64,
    #[serde(default = "defaults::page_limit")]
    pub page_limit: usize,
    #[serde(default = "defaults::relayer_enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::retry_max")]
    pub retry_max: usize,
    #[serde(default = "defaults::retry_on_ms")]
    pub retry_on_ms: u64,
}

impl RelayerConfig {
    /// Retry policy for each page request.
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max, Duration::from_millis(self.retry_on_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub kind: StreamKind,
    /// Pool currency, required for deposit and withdrawal streams.
    #[serde(default)]
    pub currency: Option<String>,
    /// Pool denomination, required for deposit and withdrawal streams.
    #[serde(default)]
    pub amount: Option<String>,
    /// Contract emitting the stream's events.
    pub address: String,
    #[serde(default)]
    pub deployed_block: u64,
    /// Pinned `sha384-...` digest of the remote snapshot.
    #[serde(default)]
    pub snapshot_digest: Option<String>,
}

impl StreamConfig {
    /// Resolve into a [`StreamTarget`] on network `net_id`.
    pub fn target(&self, net_id: u64) -> Result<StreamTarget, ConfigError> {
        let key = match (self.kind.is_pool_stream(), &self.currency, &self.amount) {
            (true, Some(currency), Some(amount)) if !currency.is_empty() && !amount.is_empty() => {
                StreamKey::pool(self.kind, net_id, currency, amount)
            }
            (true, _, _) => {
                return Err(ConfigError::Invalid(format!(
                    "{} stream needs a currency and an amount",
                    self.kind
                )));
            }
            (false, None, None) => StreamKey::network(self.kind, net_id),
            (false, _, _) => {
                return Err(ConfigError::Invalid(format!(
                    "{} stream is network-wide and takes no currency or amount",
                    self.kind
                )));
            }
        };

        let digits = self.address.strip_prefix("0x").unwrap_or_default();
        if digits.len() != 40 || hex::decode(digits).is_err() {
            return Err(ConfigError::Invalid(format!(
                "{} has an invalid contract address {:?}",
                key, self.address
            )));
        }

        let target = StreamTarget::new(key, self.address.to_ascii_lowercase(), self.deployed_block);
        Ok(match &self.snapshot_digest {
            Some(digest) if digest.starts_with("sha384-") => target.with_snapshot_digest(digest),
            Some(digest) => {
                return Err(ConfigError::Invalid(format!(
                    "{} snapshot digest {:?} is not a sha384- digest",
                    target.key, digest
                )));
            }
            None => target,
        })
    }
}

impl SyncConfig {
    /// Load from `path`, overlaid with the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, environment())
    }

    /// Load from `path`, overlaid with the given environment source.
    pub fn load_with_env(path: impl AsRef<Path>, env: Environment) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::trace!("Loading config file: {}", path.display());

        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        let cfg = Config::builder()
            .add_source(File::from(path).format(format))
            .add_source(env)
            .build()?;
        let config: SyncConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid("rpc_url is empty".into()));
        }
        if self.tree_levels == 0 || self.tree_levels > 32 {
            return Err(ConfigError::Invalid(format!(
                "tree_levels must be within 1..=32, got {}",
                self.tree_levels
            )));
        }
        if self.logs.blocks_per_request == 0 || self.batch.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "blocks_per_request and batch_size must be positive".into(),
            ));
        }
        self.zero_element()?;
        self.stream_targets()?;
        Ok(())
    }

    pub fn zero_element(&self) -> Result<Element, ConfigError> {
        Element::from_hex(&self.zero_element)
            .map_err(|e| ConfigError::Invalid(format!("zero_element: {e}")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch.batch_size,
            concurrency_size: self.batch.concurrency_size,
            retry: RetryPolicy::new(
                self.batch.retry_max,
                Duration::from_millis(self.batch.retry_on_ms),
            ),
            stagger: Duration::from_millis(self.batch.stagger_ms),
        }
    }

    pub fn logs_config(&self) -> LogsConfig {
        LogsConfig {
            blocks_per_request: self.logs.blocks_per_request,
            concurrency_size: self.logs.concurrency_size,
            retry: RetryPolicy::new(
                self.logs.retry_max,
                Duration::from_millis(self.logs.retry_on_ms),
            ),
            stagger: Duration::from_millis(self.logs.stagger_ms),
        }
    }

    /// The relayer, when one is configured and enabled.
    pub fn active_relayer(&self) -> Option<&RelayerConfig> {
        self.relayer.as_ref().filter(|relayer| relayer.enabled)
    }

    /// Every configured stream, resolved on this network.
    pub fn stream_targets(&self) -> Result<Vec<StreamTarget>, ConfigError> {
        let targets = self
            .streams
            .iter()
            .map(|stream| stream.target(self.net_id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys: Vec<String> = targets.iter().map(|t| t.key.cache_key()).collect();
        keys.sort();
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(format!("stream {} is configured twice", pair[0])));
        }
        Ok(targets)
    }
}

/// `POOL_SYNC_*` overrides, nested keys separated by `__`.
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
