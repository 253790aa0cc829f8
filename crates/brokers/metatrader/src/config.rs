use mt5bridge_core::DEFAULT_MAGIC_NUMBER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Symbol traded when nothing else is configured.
pub const DEFAULT_SYMBOL: &str = "XAUUSD";

/// Decoration some brokers append to otherwise identical tickers.
pub const BROKER_SUFFIX: char = '!';

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for the file bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Shared `MQL5/Files` directory. Takes priority over the hint file.
    pub files_dir: Option<PathBuf>,
    /// File holding an absolute directory path, consulted when `files_dir` is unset.
    pub path_hint_file: PathBuf,
    /// Preferred trading symbol; may be replaced by a broker-specific variant.
    pub primary_symbol: String,
    /// Explicit price file name inside the files directory.
    pub price_file: Option<String>,
    /// Price file age after which the link is reported stale.
    pub connection_timeout_secs: u64,
    /// Health monitor polling cadence.
    pub monitor_interval_secs: u64,
    /// Start tailing the trade log at end-of-file on connect.
    pub skip_historical_trade_log: bool,
    /// Magic number stamped on orders.
    pub magic_number: i64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            files_dir: None,
            path_hint_file: PathBuf::from("examples/path.hint.txt"),
            primary_symbol: DEFAULT_SYMBOL.to_string(),
            price_file: None,
            connection_timeout_secs: 30,
            monitor_interval_secs: 5,
            skip_historical_trade_log: true,
            magic_number: DEFAULT_MAGIC_NUMBER,
        }
    }
}

impl BridgeConfig {
    /// Config pointing at an explicit files directory, defaults elsewhere.
    pub fn for_directory(files_dir: impl Into<PathBuf>) -> Self {
        Self {
            files_dir: Some(files_dir.into()),
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}
