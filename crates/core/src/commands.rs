use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::traits::CommandError;

/// Magic number stamped on orders placed through the bridge.
pub const DEFAULT_MAGIC_NUMBER: i64 = 12345;

fn default_magic_number() -> i64 {
    DEFAULT_MAGIC_NUMBER
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// The action tag carried by every command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Modify,
    Close,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Modify => "modify",
            TradeAction::Close => "close",
        }
    }

    /// Opening actions (`buy`/`sell`), as opposed to ticket-addressed ones.
    pub fn is_entry(&self) -> bool {
        matches!(self, TradeAction::Buy | TradeAction::Sell)
    }
}

impl FromStr for TradeAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            "modify" => Ok(TradeAction::Modify),
            "close" => Ok(TradeAction::Close),
            _ => Err(CommandError::Invalid(format!("Invalid trade action: {}", s))),
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Command records
// ---------------------------------------------------------------------------

/// Open a market position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCommand {
    pub action: TradeAction,
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub lot_size: Decimal,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub stop_loss: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "default_magic_number")]
    pub magic_number: i64,
    /// Epoch seconds; zero means "not yet stamped".
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub trade_id: Option<String>,
}

impl TradeCommand {
    pub fn new(action: TradeAction, symbol: &str, lot_size: Decimal) -> Self {
        Self {
            action,
            symbol: symbol.to_string(),
            lot_size,
            stop_loss: None,
            take_profit: None,
            comment: String::new(),
            magic_number: DEFAULT_MAGIC_NUMBER,
            timestamp: Utc::now().timestamp(),
            trade_id: None,
        }
    }

    pub fn buy(symbol: &str, lot_size: Decimal) -> Self {
        Self::new(TradeAction::Buy, symbol, lot_size)
    }

    pub fn sell(symbol: &str, lot_size: Decimal) -> Self {
        Self::new(TradeAction::Sell, symbol, lot_size)
    }

    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn with_trade_id(mut self, trade_id: Option<String>) -> Self {
        self.trade_id = trade_id;
        self
    }
}

/// Change stop-loss / take-profit of an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyCommand {
    pub action: TradeAction,
    pub ticket: i64,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub stop_loss: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl ModifyCommand {
    pub fn new(ticket: i64, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        Self {
            action: TradeAction::Modify,
            ticket,
            stop_loss,
            take_profit,
            comment: String::new(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Close an open position, fully or partially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseCommand {
    pub action: TradeAction,
    pub ticket: i64,
    /// Partial-close volume; `None` closes the whole position.
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub close_volume: Option<Decimal>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl CloseCommand {
    pub fn new(ticket: i64, close_volume: Option<Decimal>) -> Self {
        Self {
            action: TradeAction::Close,
            ticket,
            close_volume,
            comment: String::new(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Any record that can occupy the command mailbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Trade(TradeCommand),
    Modify(ModifyCommand),
    Close(CloseCommand),
}

impl Command {
    pub fn action(&self) -> TradeAction {
        match self {
            Command::Trade(c) => c.action,
            Command::Modify(c) => c.action,
            Command::Close(c) => c.action,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Command::Trade(c) => c.timestamp,
            Command::Modify(c) => c.timestamp,
            Command::Close(c) => c.timestamp,
        }
    }

    /// Stamp the command with `now` if it was built without a timestamp.
    pub fn ensure_timestamp(&mut self, now: i64) {
        let ts = match self {
            Command::Trade(c) => &mut c.timestamp,
            Command::Modify(c) => &mut c.timestamp,
            Command::Close(c) => &mut c.timestamp,
        };
        if *ts == 0 {
            *ts = now;
        }
    }

    /// Check the command before it is allowed anywhere near the mailbox.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Command::Trade(c) => {
                if !c.action.is_entry() {
                    return Err(CommandError::Invalid(format!(
                        "Ticket required for {} command",
                        c.action
                    )));
                }
                if c.lot_size <= Decimal::ZERO {
                    return Err(CommandError::Invalid(format!(
                        "Invalid lot size: {}",
                        c.lot_size
                    )));
                }
                if c.symbol.trim().is_empty() {
                    return Err(CommandError::Invalid(format!(
                        "Symbol required for {} command",
                        c.action
                    )));
                }
            }
            Command::Modify(c) => {
                if c.action != TradeAction::Modify {
                    return Err(CommandError::Invalid(format!(
                        "Modify record tagged as {}",
                        c.action
                    )));
                }
                if c.ticket == 0 {
                    return Err(CommandError::Invalid(
                        "Ticket required for modify command".to_string(),
                    ));
                }
            }
            Command::Close(c) => {
                if c.action != TradeAction::Close {
                    return Err(CommandError::Invalid(format!(
                        "Close record tagged as {}",
                        c.action
                    )));
                }
                if c.ticket == 0 {
                    return Err(CommandError::Invalid(
                        "Ticket required for close command".to_string(),
                    ));
                }
                if let Some(volume) = c.close_volume {
                    if volume <= Decimal::ZERO {
                        return Err(CommandError::Invalid(format!(
                            "Invalid close volume: {}",
                            volume
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Compact JSON in declaration field order, as the platform expects.
    pub fn to_json(&self) -> Result<String, CommandError> {
        let json = match self {
            Command::Trade(c) => serde_json::to_string(c)?,
            Command::Modify(c) => serde_json::to_string(c)?,
            Command::Close(c) => serde_json::to_string(c)?,
        };
        Ok(json)
    }

    /// Parse a command file body, dispatching on its `action` tag.
    pub fn from_json(json: &str) -> Result<Self, CommandError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let action = value
            .get("action")
            .and_then(|a| a.as_str())
            .ok_or_else(|| CommandError::Invalid("Command has no action".to_string()))?
            .parse::<TradeAction>()?;

        let command = match action {
            TradeAction::Buy | TradeAction::Sell => Command::Trade(serde_json::from_value(value)?),
            TradeAction::Modify => Command::Modify(serde_json::from_value(value)?),
            TradeAction::Close => Command::Close(serde_json::from_value(value)?),
        };
        Ok(command)
    }
}

impl From<TradeCommand> for Command {
    fn from(c: TradeCommand) -> Self {
        Command::Trade(c)
    }
}

impl From<ModifyCommand> for Command {
    fn from(c: ModifyCommand) -> Self {
        Command::Modify(c)
    }
}

impl From<CloseCommand> for Command {
    fn from(c: CloseCommand) -> Self {
        Command::Close(c)
    }
}

// ---------------------------------------------------------------------------
// Untyped caller input
// ---------------------------------------------------------------------------

/// Loosely-typed command input, e.g. from a CLI or an upstream service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    pub action: String,
    pub symbol: Option<String>,
    pub lot_size: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub comment: Option<String>,
    pub trade_id: Option<String>,
    pub ticket: Option<i64>,
    pub close_volume: Option<Decimal>,
    pub magic_number: Option<i64>,
}

impl TryFrom<CommandRequest> for Command {
    type Error = CommandError;

    fn try_from(req: CommandRequest) -> Result<Self, Self::Error> {
        let action: TradeAction = req.action.parse()?;
        let comment = req.comment.unwrap_or_default();

        let command = match action {
            TradeAction::Buy | TradeAction::Sell => {
                let symbol = req.symbol.unwrap_or_default();
                let lot_size = req.lot_size.unwrap_or(Decimal::ZERO);
                let mut cmd = TradeCommand::new(action, &symbol, lot_size)
                    .with_stops(req.stop_loss, req.take_profit)
                    .with_comment(&comment)
                    .with_trade_id(req.trade_id);
                if let Some(magic) = req.magic_number {
                    cmd.magic_number = magic;
                }
                Command::Trade(cmd)
            }
            TradeAction::Modify => {
                let mut cmd =
                    ModifyCommand::new(req.ticket.unwrap_or(0), req.stop_loss, req.take_profit);
                cmd.comment = comment;
                Command::Modify(cmd)
            }
            TradeAction::Close => {
                let mut cmd = CloseCommand::new(req.ticket.unwrap_or(0), req.close_volume);
                cmd.comment = comment;
                Command::Close(cmd)
            }
        };

        command.validate()?;
        Ok(command)
    }
}
