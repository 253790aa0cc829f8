//! Shared-directory and symbol resolution.
//!
//! The platform names its price file after the broker's symbol, which may
//! carry a suffix (`XAUUSD!`). Everything else hangs off the directory and
//! symbol resolved here.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, BROKER_SUFFIX, DEFAULT_SYMBOL};

pub const PRICE_FILE_SUFFIX: &str = "_price.json";

pub const COMMANDS_FILE: &str = "commands.json";
pub const TRADE_LOG_FILE: &str = "trade_results.txt";
pub const ACCOUNT_INFO_FILE: &str = "account_info.json";
pub const CLOSED_TRADES_FILE: &str = "closed_trades.json";
pub const POSITIONS_FILE: &str = "positions.json";
pub const SYMBOL_INFO_FILE: &str = "symbol_info.json";
pub const ORDERS_FILE: &str = "orders.json";
pub const RATES_M1_FILE: &str = "rates_M1.json";

/// Resolved files directory, primary symbol, and every path derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocator {
    files_dir: PathBuf,
    symbol: String,
    price_file: PathBuf,
}

impl FileLocator {
    /// Locator for a known directory and symbol, without any probing.
    pub fn new(files_dir: impl Into<PathBuf>, symbol: &str) -> Self {
        let files_dir = files_dir.into();
        let price_file = files_dir.join(price_file_name(symbol));
        Self {
            files_dir,
            symbol: symbol.to_string(),
            price_file,
        }
    }

    /// Resolve using the working and home directories as last resorts.
    pub fn resolve(config: &BridgeConfig) -> Self {
        Self::resolve_with_fallbacks(config, &default_fallback_dirs())
    }

    /// Resolve the files directory, symbol and price file.
    ///
    /// `fallback_dirs` are scanned for any `*_price.json` only when the
    /// configured directory yields nothing; a hit there becomes the
    /// effective files directory.
    pub fn resolve_with_fallbacks(config: &BridgeConfig, fallback_dirs: &[PathBuf]) -> Self {
        let files_dir = resolve_files_dir(config);
        let symbol = config.primary_symbol.clone();

        if let Some(name) = &config.price_file {
            let path = files_dir.join(name);
            if path.is_file() {
                let symbol = symbol_from_price_file(&path).unwrap_or(symbol);
                info!(path = %path.display(), %symbol, "Using configured price file");
                return Self {
                    files_dir,
                    symbol,
                    price_file: path,
                };
            }
            warn!(
                path = %path.display(),
                "Configured price file not found, probing symbol variants"
            );
        }

        let candidates: Vec<PathBuf> = price_file_candidates(&symbol)
            .iter()
            .map(|name| files_dir.join(name))
            .filter(|path| path.is_file())
            .collect();

        let chosen = freshest(candidates).or_else(|| {
            let scanned = scan_price_files(&files_dir);
            if !scanned.is_empty() {
                debug!(
                    dir = %files_dir.display(),
                    found = scanned.len(),
                    "No symbol variant found, scanned for price files"
                );
            }
            freshest(scanned)
        });

        if let Some(path) = chosen {
            return Self::from_price_file(files_dir, path, &symbol);
        }

        for dir in fallback_dirs {
            if dir == &files_dir {
                continue;
            }
            if let Some(path) = freshest(scan_price_files(dir)) {
                warn!(
                    configured = %files_dir.display(),
                    dir = %dir.display(),
                    "No price file in configured directory, switching files directory"
                );
                return Self::from_price_file(dir.clone(), path, &symbol);
            }
        }

        let price_file = match &config.price_file {
            Some(name) => files_dir.join(name),
            None => files_dir.join(price_file_name(&symbol)),
        };
        debug!(path = %price_file.display(), "No price file found yet");
        Self {
            files_dir,
            symbol,
            price_file,
        }
    }

    fn from_price_file(files_dir: PathBuf, price_file: PathBuf, configured_symbol: &str) -> Self {
        let symbol =
            symbol_from_price_file(&price_file).unwrap_or_else(|| configured_symbol.to_string());
        if symbol != configured_symbol {
            info!(from = %configured_symbol, to = %symbol, "Resolved broker symbol");
        }
        info!(path = %price_file.display(), "Resolved price file");
        Self {
            files_dir,
            symbol,
            price_file,
        }
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// The resolved primary symbol, including any broker suffix.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn price_file(&self) -> &Path {
        &self.price_file
    }

    pub fn commands_file(&self) -> PathBuf {
        self.files_dir.join(COMMANDS_FILE)
    }

    pub fn trade_log_file(&self) -> PathBuf {
        self.files_dir.join(TRADE_LOG_FILE)
    }

    pub fn account_info_file(&self) -> PathBuf {
        self.files_dir.join(ACCOUNT_INFO_FILE)
    }

    pub fn closed_trades_file(&self) -> PathBuf {
        self.files_dir.join(CLOSED_TRADES_FILE)
    }

    pub fn positions_file(&self) -> PathBuf {
        self.files_dir.join(POSITIONS_FILE)
    }

    pub fn tick_file(&self) -> PathBuf {
        self.files_dir.join(format!("{}_tick.json", self.symbol))
    }

    pub fn orderbook_file(&self) -> PathBuf {
        self.files_dir.join(format!("{}_orderbook.json", self.symbol))
    }

    pub fn symbol_info_file(&self) -> PathBuf {
        self.files_dir.join(SYMBOL_INFO_FILE)
    }

    pub fn orders_file(&self) -> PathBuf {
        self.files_dir.join(ORDERS_FILE)
    }

    pub fn rates_m1_file(&self) -> PathBuf {
        self.files_dir.join(RATES_M1_FILE)
    }
}

/// Explicit override, then an absolute directory named by the hint file,
/// then the working directory.
pub fn resolve_files_dir(config: &BridgeConfig) -> PathBuf {
    if let Some(dir) = &config.files_dir {
        return dir.clone();
    }
    if let Some(dir) = read_path_hint(&config.path_hint_file) {
        info!(
            hint = %config.path_hint_file.display(),
            dir = %dir.display(),
            "Files directory from path hint"
        );
        return dir;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn read_path_hint(hint_file: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(hint_file).ok()?;
    let dir = PathBuf::from(content.trim());
    if dir.as_os_str().is_empty() || !dir.is_absolute() || !dir.is_dir() {
        debug!(hint = %hint_file.display(), "Ignoring path hint");
        return None;
    }
    Some(dir)
}

fn default_fallback_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        dirs.push(PathBuf::from(home));
    }
    dirs
}

pub fn price_file_name(symbol: &str) -> String {
    format!("{}{}", symbol, PRICE_FILE_SUFFIX)
}

/// `XAUUSD` <-> `XAUUSD!`.
pub fn toggle_broker_suffix(symbol: &str) -> String {
    if symbol.contains(BROKER_SUFFIX) {
        symbol.replace(BROKER_SUFFIX, "")
    } else {
        format!("{}{}", symbol, BROKER_SUFFIX)
    }
}

/// Price file names to probe for `symbol`, in priority order, without duplicates.
pub fn price_file_candidates(symbol: &str) -> Vec<String> {
    let mut symbols = vec![symbol.to_string(), toggle_broker_suffix(symbol)];
    if symbol != DEFAULT_SYMBOL {
        symbols.push(DEFAULT_SYMBOL.to_string());
        symbols.push(format!("{}{}", DEFAULT_SYMBOL, BROKER_SUFFIX));
    }

    let mut names: Vec<String> = Vec::with_capacity(symbols.len());
    for s in symbols {
        let name = price_file_name(&s);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn symbol_from_price_file(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let symbol = name.strip_suffix(PRICE_FILE_SUFFIX)?;
    (!symbol.is_empty()).then(|| symbol.to_string())
}

/// Every `*_price.json` regular file directly inside `dir`.
fn scan_price_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Cannot scan directory");
            return Vec::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && symbol_from_price_file(path).is_some())
        .collect()
}

/// Most recently modified path; ties go to the lexicographically greatest path.
fn freshest(paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths
        .into_iter()
        .filter_map(|path| {
            let modified: SystemTime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max()
        .map(|(_, path)| path)
}
