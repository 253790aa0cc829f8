use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ticker of the metal pair whose spread is quoted in tenths (1 pip = 0.1).
pub const METAL_TICKER: &str = "XAUUSD";

/// Convert epoch seconds to a UTC timestamp, if representable.
fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Direction of a position or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Side::Buy),
            "sell" | "short" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A price snapshot exported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Defaults to `ask - bid` when the platform omits it.
    pub spread: Decimal,
    pub volume: i64,
    /// Epoch seconds.
    pub timestamp: i64,
    pub server_time: String,
}

impl MarketData {
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Spread expressed in pips. Metal quotes use 1 pip = 0.1.
    pub fn spread_pips(&self) -> Decimal {
        if self.symbol.starts_with(METAL_TICKER) {
            self.spread * Decimal::TEN
        } else {
            self.spread
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.timestamp)
    }

    /// Seconds elapsed between the quote timestamp and `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().saturating_sub(self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Snapshot of the trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub profit: Decimal,
    pub leverage: i64,
    pub currency: String,
    pub timestamp: i64,
    pub server_time: String,
}

impl AccountInfo {
    /// Margin level in percent, or zero when no margin is in use.
    pub fn margin_level(&self) -> Decimal {
        if self.margin <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.equity / self.margin * Decimal::ONE_HUNDRED
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// An open position as reported by the platform.
///
/// `ticket` is the platform's identifier and is never generated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub profit: Decimal,
    pub swap: Decimal,
    pub magic: i64,
    pub comment: String,
    pub time_open: String,
    pub time_open_timestamp: i64,
}

impl Position {
    /// Floating PnL including swap.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.profit + self.swap
    }

    pub fn open_datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.time_open_timestamp)
    }
}

// ---------------------------------------------------------------------------
// Closed Trade
// ---------------------------------------------------------------------------

/// A trade from the platform's closed-deal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub profit: Decimal,
    pub change_percent: Decimal,
    pub close_time: String,
    pub close_timestamp: i64,
}

impl ClosedTrade {
    pub fn close_datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.close_timestamp)
    }

    pub fn is_winner(&self) -> bool {
        self.profit > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Trade Log
// ---------------------------------------------------------------------------

/// Execution outcome recorded in the trade log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOutcome {
    Success,
    Fail,
}

impl TradeOutcome {
    /// Anything other than `SUCCESS` counts as a failure.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("SUCCESS") {
            TradeOutcome::Success
        } else {
            TradeOutcome::Fail
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TradeOutcome::Success)
    }
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOutcome::Success => f.pad("SUCCESS"),
            TradeOutcome::Fail => f.pad("FAIL"),
        }
    }
}

/// One execution event parsed from a trade-log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub action: String,
    pub symbol: String,
    pub result: TradeOutcome,
    /// Platform-formatted time, e.g. `2025.07.29 17:05`.
    pub timestamp: String,
    pub order_id: Option<i64>,
    pub price: Option<Decimal>,
    pub error_message: Option<String>,
    pub trade_id: Option<String>,
    /// Position ticket, for modify/close results.
    pub ticket: Option<i64>,
}

/// A trade-log line rendered for display, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeHistoryEntry {
    pub timestamp: String,
    /// `MM/DD HH:MM` when the timestamp is in platform format, else the raw timestamp.
    pub formatted_time: String,
    pub action: String,
    pub result: TradeOutcome,
    pub lot_size: Decimal,
    pub symbol: String,
    pub trade_id: String,
}
