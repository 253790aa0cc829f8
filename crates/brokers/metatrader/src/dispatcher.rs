//! Outbound command mailbox.
//!
//! `commands.json` holds exactly one command. The platform polls it, executes
//! whatever it finds, and reports in the trade log. Writing a second command
//! before the platform has picked up the first replaces the first: the
//! earlier command is lost. This is a known limitation of the protocol and is
//! deliberately left as is; callers that fire commands in quick succession
//! should wait for the matching trade-log result between writes.

use chrono::Utc;
use mt5bridge_core::*;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Validates commands and writes them to the single-slot command file.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    path: PathBuf,
}

impl CommandDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate `command`, rewrite entry orders onto `broker_symbol`, and
    /// replace the mailbox contents with it. Returns the command as written.
    pub fn dispatch(
        &self,
        mut command: Command,
        broker_symbol: &str,
    ) -> Result<Command, CommandError> {
        if let Err(e) = command.validate() {
            error!("{}", e);
            return Err(e);
        }

        if let Command::Trade(trade) = &mut command {
            if !broker_symbol.is_empty() && trade.symbol != broker_symbol {
                info!(from = %trade.symbol, to = %broker_symbol, "Normalizing trade symbol");
                trade.symbol = broker_symbol.to_string();
            }
        }

        command.ensure_timestamp(Utc::now().timestamp());
        let body = command.to_json()?;

        if let Err(e) = self.write_atomic(&body) {
            error!("Error writing command: {}", e);
            return Err(e);
        }

        info!(action = %command.action(), "Command sent");
        Ok(command)
    }

    /// Empty the mailbox. A missing file is left missing.
    pub fn clear(&self) -> Result<(), CommandError> {
        if !self.path.exists() {
            return Ok(());
        }
        std::fs::write(&self.path, b"").map_err(|source| CommandError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!("Command file cleared");
        Ok(())
    }

    /// Write to a sibling temp file, then rename over the mailbox so the
    /// platform never observes a half-written command.
    fn write_atomic(&self, body: &str) -> Result<(), CommandError> {
        let tmp = self.path.with_extension("json.tmp");
        let write_failed = |source| CommandError::WriteFailed {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&tmp, body).map_err(write_failed)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            write_failed(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn mailbox(dir: &Path) -> CommandDispatcher {
        CommandDispatcher::new(dir.join("commands.json"))
    }

    fn read_back(dispatcher: &CommandDispatcher) -> Command {
        let raw = std::fs::read_to_string(dispatcher.path()).unwrap();
        Command::from_json(&raw).unwrap()
    }

    #[test]
    fn test_written_command_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = mailbox(dir.path());
        let cmd: Command = TradeCommand::buy("XAUUSD!", dec!(0.05))
            .with_stops(Some(dec!(2390.5)), Some(dec!(2420)))
            .with_comment("breakout")
            .with_trade_id(Some("t-7".to_string()))
            .into();

        let written = dispatcher.dispatch(cmd.clone(), "XAUUSD!").unwrap();
        assert_eq!(written, cmd);
        assert_eq!(read_back(&dispatcher), cmd);
        assert!(!dir.path().join("commands.json.tmp").exists());
    }

    #[test]
    fn test_zero_lot_sell_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = mailbox(dir.path());
        let cmd: Command = TradeCommand::sell("XAUUSD", Decimal::ZERO).into();

        let err = dispatcher.dispatch(cmd, "XAUUSD").unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
        assert!(!dispatcher.path().exists());
    }

    #[test]
    fn test_symbol_normalized_for_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = mailbox(dir.path());

        dispatcher
            .dispatch(TradeCommand::buy("XAUUSD", dec!(0.01)).into(), "XAUUSD!")
            .unwrap();
        match read_back(&dispatcher) {
            Command::Trade(t) => assert_eq!(t.symbol, "XAUUSD!"),
            other => panic!("Expected trade command, got {:?}", other),
        }

        let close: Command = CloseCommand::new(77, None).into();
        dispatcher.dispatch(close.clone(), "XAUUSD!").unwrap();
        assert_eq!(read_back(&dispatcher), close);
    }

    #[test]
    fn test_second_write_replaces_first() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = mailbox(dir.path());
        dispatcher
            .dispatch(TradeCommand::buy("XAUUSD", dec!(0.01)).into(), "XAUUSD")
            .unwrap();
        let modify: Command = ModifyCommand::new(11, Some(dec!(2395)), None).into();
        dispatcher.dispatch(modify.clone(), "XAUUSD").unwrap();
        assert_eq!(read_back(&dispatcher), modify);
    }

    #[test]
    fn test_unset_timestamp_is_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = mailbox(dir.path());
        let mut cmd = ModifyCommand::new(11, None, Some(dec!(2450)));
        cmd.timestamp = 0;
        let written = dispatcher.dispatch(cmd.into(), "XAUUSD").unwrap();
        assert!(written.timestamp() > 0);
    }

    #[test]
    fn test_missing_directory_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = CommandDispatcher::new(dir.path().join("gone").join("commands.json"));
        let err = dispatcher
            .dispatch(TradeCommand::buy("XAUUSD", dec!(0.01)).into(), "XAUUSD")
            .unwrap_err();
        assert!(matches!(err, CommandError::WriteFailed { .. }));
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = mailbox(dir.path());
        dispatcher.clear().unwrap();
        assert!(!dispatcher.path().exists());

        dispatcher
            .dispatch(CloseCommand::new(3, None).into(), "XAUUSD")
            .unwrap();
        dispatcher.clear().unwrap();
        assert_eq!(std::fs::read_to_string(dispatcher.path()).unwrap(), "");
    }
}
