//! On-disk document shapes written by the platform.
//!
//! These mirror the JSON the expert advisor emits, including its field
//! names (`type`, `sl`, `tp`). They are converted into the core models
//! after validation.

use chrono::Utc;
use mt5bridge_core::*;
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Integer field that may arrive as a number, a float, or a numeric string.
/// Floats are truncated toward zero.
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce_i64(&value)
        .ok_or_else(|| de::Error::custom(format!("expected an integer, found {}", value)))
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

fn default_leverage() -> i64 {
    100
}

fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// {SYM}_price.json
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PriceDocument {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default)]
    pub spread: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub volume: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub timestamp: i64,
    #[serde(default)]
    pub server_time: Option<String>,
}

impl From<PriceDocument> for MarketData {
    fn from(doc: PriceDocument) -> Self {
        MarketData {
            spread: doc.spread.unwrap_or(doc.ask - doc.bid),
            symbol: doc.symbol,
            bid: doc.bid,
            ask: doc.ask,
            volume: doc.volume,
            timestamp: doc.timestamp,
            server_time: doc.server_time.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// account_info.json
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AccountDocument {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub profit: Decimal,
    #[serde(default = "default_leverage", deserialize_with = "lenient_i64")]
    pub leverage: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "now_timestamp", deserialize_with = "lenient_i64")]
    pub timestamp: i64,
    #[serde(default)]
    pub server_time: Option<String>,
}

impl From<AccountDocument> for AccountInfo {
    fn from(doc: AccountDocument) -> Self {
        AccountInfo {
            balance: doc.balance,
            equity: doc.equity,
            margin: doc.margin,
            free_margin: doc.free_margin,
            profit: doc.profit,
            leverage: doc.leverage,
            currency: doc.currency.unwrap_or_else(|| "USD".to_string()),
            timestamp: doc.timestamp,
            server_time: doc.server_time.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// positions.json
// ---------------------------------------------------------------------------

/// `{"positions": [...]}`. Elements stay untyped so each can be validated alone.
#[derive(Debug, Deserialize)]
pub struct PositionsDocument {
    pub positions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PositionEntry {
    #[serde(deserialize_with = "lenient_i64")]
    pub ticket: i64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: String,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    #[serde(default)]
    pub sl: Decimal,
    #[serde(default)]
    pub tp: Decimal,
    pub profit: Decimal,
    #[serde(default)]
    pub swap: Decimal,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub magic: i64,
    #[serde(default)]
    pub comment: Option<String>,
    pub time_open: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub time_open_timestamp: i64,
}

impl TryFrom<PositionEntry> for Position {
    type Error = String;

    fn try_from(entry: PositionEntry) -> Result<Self, Self::Error> {
        Ok(Position {
            ticket: entry.ticket,
            side: entry.side.parse()?,
            symbol: entry.symbol,
            volume: entry.volume,
            price_open: entry.price_open,
            price_current: entry.price_current,
            stop_loss: entry.sl,
            take_profit: entry.tp,
            profit: entry.profit,
            swap: entry.swap,
            magic: entry.magic,
            comment: entry.comment.unwrap_or_default(),
            time_open: entry.time_open,
            time_open_timestamp: entry.time_open_timestamp,
        })
    }
}

// ---------------------------------------------------------------------------
// closed_trades.json
// ---------------------------------------------------------------------------

/// `{"trades": [...]}`.
#[derive(Debug, Deserialize)]
pub struct ClosedTradesDocument {
    pub trades: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ClosedTradeEntry {
    #[serde(deserialize_with = "lenient_i64")]
    pub ticket: i64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: String,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    #[serde(default)]
    pub sl: Decimal,
    #[serde(default)]
    pub tp: Decimal,
    pub profit: Decimal,
    pub change_percent: Decimal,
    pub close_time: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub close_timestamp: i64,
}

impl TryFrom<ClosedTradeEntry> for ClosedTrade {
    type Error = String;

    fn try_from(entry: ClosedTradeEntry) -> Result<Self, Self::Error> {
        Ok(ClosedTrade {
            ticket: entry.ticket,
            side: entry.side.parse()?,
            symbol: entry.symbol,
            volume: entry.volume,
            entry_price: entry.entry_price,
            exit_price: entry.exit_price,
            stop_loss: entry.sl,
            take_profit: entry.tp,
            profit: entry.profit,
            change_percent: entry.change_percent,
            close_time: entry.close_time,
            close_timestamp: entry.close_timestamp,
        })
    }
}
