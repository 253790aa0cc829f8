//! Typed readers for the JSON documents the platform writes.
//!
//! Scalar documents are all-or-nothing: one bad field discards the file.
//! List documents are validated per element, so one bad entry is skipped
//! and the rest are still returned.

use mt5bridge_core::*;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, error, warn};

use crate::protocol::*;

/// Default cap on closed trades returned per read.
pub const DEFAULT_CLOSED_TRADES_LIMIT: usize = 1000;

/// Parses and validates one shared file type.
pub trait SchemaReader {
    type Output;

    /// Human-readable document name for logs.
    fn name(&self) -> &'static str;

    /// Turn raw file contents into a validated record.
    fn parse(&self, path: &Path, raw: &str) -> Result<Self::Output, ReadError>;

    fn read(&self, path: &Path) -> Result<Self::Output, ReadError> {
        if !path.exists() {
            return Err(ReadError::Absent(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(path, &raw)
    }

    /// Like [`read`](Self::read), but logs the failure and yields `None`.
    fn read_or_log(&self, path: &Path) -> Option<Self::Output> {
        match self.read(path) {
            Ok(output) => Some(output),
            Err(e) => {
                report(self.name(), &e);
                None
            }
        }
    }
}

/// Log a read failure at the level its kind deserves.
pub fn report(what: &str, err: &ReadError) {
    match err {
        ReadError::Absent(path) => debug!(path = %path.display(), "{} file does not exist", what),
        ReadError::Malformed { .. } => warn!("Error parsing {}: {}", what, err),
        ReadError::Io { .. } => error!("Error reading {}: {}", what, err),
    }
}

fn parse_document<T: DeserializeOwned>(path: &Path, raw: &str) -> Result<T, ReadError> {
    serde_json::from_str(raw).map_err(|e| ReadError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Validate each element independently, skipping (and logging) the bad ones.
fn parse_elements<E, T>(what: &str, elements: Vec<Value>) -> Vec<T>
where
    E: DeserializeOwned,
    T: TryFrom<E, Error = String>,
{
    let mut out = Vec::with_capacity(elements.len());
    for element in elements {
        let parsed = serde_json::from_value::<E>(element.clone())
            .map_err(|e| e.to_string())
            .and_then(T::try_from);
        match parsed {
            Ok(item) => out.push(item),
            Err(reason) => warn!("Skipping invalid {} entry ({}): {}", what, reason, element),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Core documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketDataReader;

impl SchemaReader for MarketDataReader {
    type Output = MarketData;

    fn name(&self) -> &'static str {
        "price data"
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<MarketData, ReadError> {
        let doc: PriceDocument = parse_document(path, raw)?;
        Ok(doc.into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountReader;

impl SchemaReader for AccountReader {
    type Output = AccountInfo;

    fn name(&self) -> &'static str {
        "account info"
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<AccountInfo, ReadError> {
        let doc: AccountDocument = parse_document(path, raw)?;
        Ok(doc.into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PositionsReader;

impl SchemaReader for PositionsReader {
    type Output = Vec<Position>;

    fn name(&self) -> &'static str {
        "positions"
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<Vec<Position>, ReadError> {
        let doc: PositionsDocument = parse_document(path, raw)?;
        let positions = parse_elements::<PositionEntry, Position>("position", doc.positions);
        debug!(count = positions.len(), "Retrieved open positions");
        Ok(positions)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClosedTradesReader {
    /// Only the first `limit` elements of the history are considered.
    pub limit: usize,
}

impl Default for ClosedTradesReader {
    fn default() -> Self {
        Self {
            limit: DEFAULT_CLOSED_TRADES_LIMIT,
        }
    }
}

impl SchemaReader for ClosedTradesReader {
    type Output = Vec<ClosedTrade>;

    fn name(&self) -> &'static str {
        "closed trades"
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<Vec<ClosedTrade>, ReadError> {
        let mut doc: ClosedTradesDocument = parse_document(path, raw)?;
        doc.trades.truncate(self.limit);
        let trades = parse_elements::<ClosedTradeEntry, ClosedTrade>("closed trade", doc.trades);
        debug!(count = trades.len(), "Retrieved closed trades");
        Ok(trades)
    }
}

// ---------------------------------------------------------------------------
// Auxiliary documents (best effort)
// ---------------------------------------------------------------------------

/// Any JSON object, optionally required to carry a given key.
#[derive(Debug, Clone, Copy)]
pub struct JsonObjectReader {
    pub name: &'static str,
    pub required_key: Option<&'static str>,
}

impl JsonObjectReader {
    pub const TICK: Self = Self {
        name: "tick data",
        required_key: None,
    };
    pub const ORDER_BOOK: Self = Self {
        name: "order book",
        required_key: None,
    };
    pub const SYMBOL_INFO: Self = Self {
        name: "symbol info",
        required_key: None,
    };
    pub const RATES_M1: Self = Self {
        name: "M1 rates",
        required_key: Some("bars"),
    };
}

impl SchemaReader for JsonObjectReader {
    type Output = Map<String, Value>;

    fn name(&self) -> &'static str {
        self.name
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<Map<String, Value>, ReadError> {
        let object: Map<String, Value> = parse_document(path, raw)?;
        if let Some(key) = self.required_key {
            if !object.contains_key(key) {
                return Err(ReadError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("missing '{}'", key),
                });
            }
        }
        Ok(object)
    }
}

/// The `orders` array of `orders.json`; a missing key means no orders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingOrdersReader;

impl SchemaReader for PendingOrdersReader {
    type Output = Vec<Value>;

    fn name(&self) -> &'static str {
        "pending orders"
    }

    fn parse(&self, path: &Path, raw: &str) -> Result<Vec<Value>, ReadError> {
        let mut object: Map<String, Value> = parse_document(path, raw)?;
        match object.remove("orders") {
            None => Ok(Vec::new()),
            Some(Value::Array(orders)) => Ok(orders),
            Some(_) => Err(ReadError::Malformed {
                path: path.to_path_buf(),
                reason: "'orders' is not an array".to_string(),
            }),
        }
    }
}
