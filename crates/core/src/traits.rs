use crate::commands::Command;
use crate::models::*;
use async_trait::async_trait;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a shared data file could not be turned into a record.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The platform has not produced the file (yet). Not an error condition.
    #[error("File not found: {}", .0.display())]
    Absent(PathBuf),
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Unparseable document, missing required field, or failed numeric coercion.
    #[error("Malformed {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl ReadError {
    pub fn is_absent(&self) -> bool {
        matches!(self, ReadError::Absent(_))
    }
}

/// Why a command did not reach the mailbox.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Rejected by validation; nothing was written.
    #[error("Invalid command: {0}")]
    Invalid(String),
    #[error("Command serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write command file {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors establishing the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Files directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Bridge Trait
// ---------------------------------------------------------------------------

/// A link to a trading platform that exchanges state through shared files.
///
/// Reads never fail: missing or malformed data surfaces as `None` or an
/// empty collection. Implementations are not internally synchronised; callers
/// sharing one instance across threads must serialise access themselves.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Verify the shared directory and start health monitoring.
    async fn connect(&mut self) -> Result<(), BridgeError>;

    /// Stop health monitoring and mark the link as down.
    async fn disconnect(&mut self);

    /// Locally tracked connection flag; no live verification.
    fn is_connected(&self) -> bool;

    /// Latest price snapshot.
    fn market_data(&mut self) -> Option<MarketData>;

    /// Latest account snapshot.
    fn account_info(&self) -> Option<AccountInfo>;

    /// All open positions, re-read in full.
    fn positions(&self) -> Vec<Position>;

    /// Execution results appended to the trade log since the previous call.
    fn trade_results(&mut self) -> Vec<TradeResult>;

    /// Validate and post a command to the platform.
    fn send_command(&mut self, command: Command) -> Result<(), CommandError>;
}
