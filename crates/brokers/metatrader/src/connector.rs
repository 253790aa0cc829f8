use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mt5bridge_core::*;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::dispatcher::CommandDispatcher;
use crate::locator::FileLocator;
use crate::monitor::ConnectionMonitor;
use crate::readers::*;
use crate::tailer::TradeLogTailer;

/// Quotes retained in memory, oldest dropped first.
pub const PRICE_HISTORY_CAPACITY: usize = 1000;

/// Maximum quote age accepted by [`MetaTraderConnector::test_connection`].
pub const STALE_QUOTE_SECS: i64 = 60;

/// Point-in-time view of the bridge's state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub symbol: String,
    pub last_price_update: Option<DateTime<Utc>>,
    pub price_history_len: usize,
    pub files_dir: PathBuf,
    pub price_file_exists: bool,
    pub command_file_exists: bool,
    pub trade_log_exists: bool,
    pub positions_file_exists: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// MetaTrader 5 bridge over a shared `MQL5/Files` directory.
///
/// The platform's expert advisor exports prices, account state and
/// positions as JSON files, appends execution results to a text log, and
/// polls `commands.json` for orders. This type ties the locator, readers,
/// tailer, dispatcher and health monitor together.
///
/// Paths are resolved once, at construction. Not internally synchronised:
/// share an instance across tasks only behind a lock.
pub struct MetaTraderConnector {
    config: BridgeConfig,
    locator: FileLocator,
    dispatcher: CommandDispatcher,
    tailer: TradeLogTailer,
    monitor: ConnectionMonitor,
    connected: bool,
    last_price: Option<MarketData>,
    price_history: VecDeque<MarketData>,
}

impl MetaTraderConnector {
    /// Resolve paths from `config` and build a disconnected connector.
    pub fn new(config: BridgeConfig) -> Self {
        let locator = FileLocator::resolve(&config);
        Self::with_locator(config, locator)
    }

    /// Build a connector around already resolved paths.
    pub fn with_locator(config: BridgeConfig, locator: FileLocator) -> Self {
        let dispatcher = CommandDispatcher::new(locator.commands_file());
        let tailer = TradeLogTailer::new(locator.trade_log_file(), locator.symbol());
        let monitor = ConnectionMonitor::new(
            locator.price_file(),
            config.connection_timeout(),
            config.monitor_interval(),
        );
        Self {
            config,
            locator,
            dispatcher,
            tailer,
            monitor,
            connected: false,
            last_price: None,
            price_history: VecDeque::with_capacity(PRICE_HISTORY_CAPACITY),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn locator(&self) -> &FileLocator {
        &self.locator
    }

    /// The broker's spelling of the primary symbol.
    pub fn symbol(&self) -> &str {
        self.locator.symbol()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Verify the files directory and start health monitoring.
    ///
    /// Missing or malformed market data does not fail the connect; the
    /// platform may simply not have exported anything yet.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        let dir = self.locator.files_dir().to_path_buf();
        if !dir.is_dir() {
            error!(dir = %dir.display(), "MT5 files directory not found");
            return Err(BridgeError::DirectoryNotFound(dir));
        }

        match self.market_data() {
            Some(md) => info!(
                symbol = %md.symbol,
                bid = %md.bid,
                ask = %md.ask,
                "Initial market data received"
            ),
            None => warn!("No market data available yet, continuing"),
        }

        if self.config.skip_historical_trade_log {
            match self.tailer.seek_to_end() {
                Ok(cursor) => info!(cursor, "Skipping historical trade log entries"),
                Err(e) => debug!("Could not skip trade log history: {}", e),
            }
        }

        self.connected = true;
        self.monitor.start();
        info!(dir = %dir.display(), symbol = %self.symbol(), "Connected to MT5");
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.monitor.stop().await;
        self.connected = false;
        info!("Disconnected from MT5");
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    // -- Reads --------------------------------------------------------------

    /// Read the price file, recording the quote in the history buffer.
    pub fn market_data(&mut self) -> Option<MarketData> {
        let md = MarketDataReader.read_or_log(self.locator.price_file())?;
        if self.price_history.len() == PRICE_HISTORY_CAPACITY {
            self.price_history.pop_front();
        }
        self.price_history.push_back(md.clone());
        self.last_price = Some(md.clone());
        Some(md)
    }

    pub fn last_market_data(&self) -> Option<&MarketData> {
        self.last_price.as_ref()
    }

    /// Up to `limit` most recent quotes, oldest first.
    pub fn price_history(&self, limit: usize) -> Vec<MarketData> {
        let skip = self.price_history.len().saturating_sub(limit);
        self.price_history.iter().skip(skip).cloned().collect()
    }

    pub fn account_info(&self) -> Option<AccountInfo> {
        AccountReader.read_or_log(&self.locator.account_info_file())
    }

    pub fn positions(&self) -> Vec<Position> {
        PositionsReader
            .read_or_log(&self.locator.positions_file())
            .unwrap_or_default()
    }

    pub fn closed_trades(&self, limit: usize) -> Vec<ClosedTrade> {
        ClosedTradesReader { limit }
            .read_or_log(&self.locator.closed_trades_file())
            .unwrap_or_default()
    }

    /// Trade-log lines appended since the previous call.
    pub fn trade_results(&mut self) -> Vec<TradeResult> {
        match self.tailer.poll() {
            Ok(results) => {
                for r in &results {
                    info!(
                        action = %r.action,
                        result = %r.result,
                        symbol = %r.symbol,
                        "Trade result"
                    );
                }
                results
            }
            Err(e) => {
                report("trade log", &e);
                Vec::new()
            }
        }
    }

    /// Last `limit` trade-log lines, most recent first. Leaves the tail cursor alone.
    pub fn trade_history(&self, limit: usize) -> Vec<TradeHistoryEntry> {
        self.tailer.history(limit).unwrap_or_else(|e| {
            report("trade history", &e);
            Vec::new()
        })
    }

    pub fn tick_data(&self) -> Option<Map<String, Value>> {
        JsonObjectReader::TICK.read_or_log(&self.locator.tick_file())
    }

    pub fn order_book(&self) -> Option<Map<String, Value>> {
        JsonObjectReader::ORDER_BOOK.read_or_log(&self.locator.orderbook_file())
    }

    pub fn symbol_info(&self) -> Option<Map<String, Value>> {
        JsonObjectReader::SYMBOL_INFO.read_or_log(&self.locator.symbol_info_file())
    }

    pub fn rates_m1(&self) -> Option<Map<String, Value>> {
        JsonObjectReader::RATES_M1.read_or_log(&self.locator.rates_m1_file())
    }

    pub fn pending_orders(&self) -> Vec<Value> {
        PendingOrdersReader
            .read_or_log(&self.locator.orders_file())
            .unwrap_or_default()
    }

    // -- Commands -----------------------------------------------------------

    /// Validate and post a command. Entry orders are rewritten onto the
    /// resolved broker symbol.
    pub fn send_command(&mut self, command: Command) -> Result<(), CommandError> {
        self.dispatcher.dispatch(command, self.locator.symbol())?;
        Ok(())
    }

    /// Validate a loosely-typed request and post it.
    pub fn send_request(&mut self, request: CommandRequest) -> Result<(), CommandError> {
        let command = Command::try_from(request).inspect_err(|e| error!("{}", e))?;
        self.send_command(command)
    }

    pub fn place_buy_order(
        &mut self,
        lot_size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        comment: &str,
        trade_id: Option<String>,
    ) -> Result<(), CommandError> {
        let cmd = self.entry_order(
            TradeAction::Buy,
            lot_size,
            stop_loss,
            take_profit,
            comment,
            trade_id,
        );
        self.send_command(cmd)
    }

    pub fn place_sell_order(
        &mut self,
        lot_size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        comment: &str,
        trade_id: Option<String>,
    ) -> Result<(), CommandError> {
        let cmd = self.entry_order(
            TradeAction::Sell,
            lot_size,
            stop_loss,
            take_profit,
            comment,
            trade_id,
        );
        self.send_command(cmd)
    }

    fn entry_order(
        &self,
        action: TradeAction,
        lot_size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        comment: &str,
        trade_id: Option<String>,
    ) -> Command {
        let mut cmd = TradeCommand::new(action, self.locator.symbol(), lot_size)
            .with_stops(stop_loss, take_profit)
            .with_comment(comment)
            .with_trade_id(trade_id);
        cmd.magic_number = self.config.magic_number;
        cmd.into()
    }

    pub fn modify_position(
        &mut self,
        ticket: i64,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), CommandError> {
        self.send_command(ModifyCommand::new(ticket, stop_loss, take_profit).into())
    }

    /// Close `ticket`, fully or by `volume` lots.
    pub fn close_position(
        &mut self,
        ticket: i64,
        volume: Option<Decimal>,
    ) -> Result<(), CommandError> {
        self.send_command(CloseCommand::new(ticket, volume).into())
    }

    pub fn clear_command_file(&self) -> Result<(), CommandError> {
        self.dispatcher.clear()
    }

    // -- Status -------------------------------------------------------------

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connected: self.connected,
            symbol: self.locator.symbol().to_string(),
            last_price_update: self.last_price.as_ref().and_then(|md| md.datetime()),
            price_history_len: self.price_history.len(),
            files_dir: self.locator.files_dir().to_path_buf(),
            price_file_exists: self.locator.price_file().exists(),
            command_file_exists: self.locator.commands_file().exists(),
            trade_log_exists: self.locator.trade_log_file().exists(),
            positions_file_exists: self.locator.positions_file().exists(),
            last_heartbeat: self.monitor.last_heartbeat(),
        }
    }

    /// Synchronous end-to-end check. Returns success plus a status line.
    pub fn test_connection(&mut self) -> (bool, String) {
        self.test_connection_at(Utc::now())
    }

    fn test_connection_at(&mut self, now: DateTime<Utc>) -> (bool, String) {
        let dir = self.locator.files_dir();
        if !dir.is_dir() {
            return (false, format!("Files directory not found: {}", dir.display()));
        }
        let price_file = self.locator.price_file();
        if !price_file.is_file() {
            return (false, format!("Price file not found: {}", price_file.display()));
        }
        let Some(md) = self.market_data() else {
            return (false, "Cannot read market data".to_string());
        };
        let age = md.age_secs(now);
        if age > STALE_QUOTE_SECS {
            return (false, format!("Market data is stale ({}s old)", age));
        }
        (
            true,
            format!("Connection OK - {} bid {} ask {} ({}s old)", md.symbol, md.bid, md.ask, age),
        )
    }
}

impl fmt::Display for MetaTraderConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.connected { "Connected" } else { "Disconnected" };
        match &self.last_price {
            Some(md) => write!(f, "MetaTraderConnector(status={}, last_price={})", status, md.bid),
            None => write!(f, "MetaTraderConnector(status={}, last_price=N/A)", status),
        }
    }
}

#[async_trait]
impl Bridge for MetaTraderConnector {
    async fn connect(&mut self) -> Result<(), BridgeError> {
        MetaTraderConnector::connect(self).await
    }

    async fn disconnect(&mut self) {
        MetaTraderConnector::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn market_data(&mut self) -> Option<MarketData> {
        MetaTraderConnector::market_data(self)
    }

    fn account_info(&self) -> Option<AccountInfo> {
        MetaTraderConnector::account_info(self)
    }

    fn positions(&self) -> Vec<Position> {
        MetaTraderConnector::positions(self)
    }

    fn trade_results(&mut self) -> Vec<TradeResult> {
        MetaTraderConnector::trade_results(self)
    }

    fn send_command(&mut self, command: Command) -> Result<(), CommandError> {
        MetaTraderConnector::send_command(self, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;

    fn write_price(dir: &Path, symbol: &str, bid: &str, ask: &str, ts: i64) {
        let body = format!(
            r#"{{"symbol":"{symbol}","bid":{bid},"ask":{ask},"volume":3,"timestamp":{ts},"server_time":"2025.07.29 17:05:00"}}"#
        );
        std::fs::write(dir.join(format!("{symbol}_price.json")), body).unwrap();
    }

    fn append_log(dir: &Path, line: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("trade_results.txt"))
            .unwrap();
        writeln!(f, "{}", line).unwrap();
    }

    fn connector_in(dir: &Path, symbol: &str) -> MetaTraderConnector {
        let config = BridgeConfig::for_directory(dir);
        MetaTraderConnector::with_locator(config, FileLocator::new(dir, symbol))
    }

    #[tokio::test]
    async fn test_connect_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = connector_in(dir.path(), "XAUUSD");

        bridge.connect().await.unwrap();
        assert!(bridge.is_connected());
        assert!(bridge.is_monitoring());
        assert!(bridge.last_market_data().is_none());
        assert_eq!(bridge.to_string(), "MetaTraderConnector(status=Connected, last_price=N/A)");

        bridge.disconnect().await;
        assert!(!bridge.is_connected());
        assert!(!bridge.is_monitoring());
        bridge.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = connector_in(&dir.path().join("missing"), "XAUUSD");
        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::DirectoryNotFound(_)));
        assert!(!bridge.is_connected());
    }

    #[tokio::test]
    async fn test_connect_seeds_price_and_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        write_price(dir.path(), "XAUUSD!", "2400.25", "2400.55", Utc::now().timestamp());
        append_log(dir.path(), "2025.07.29 17:05 | buy | SUCCESS | 0.01 | XAUUSD! | old");

        let mut bridge = connector_in(dir.path(), "XAUUSD!");
        bridge.connect().await.unwrap();
        assert_eq!(bridge.last_market_data().map(|md| md.bid), Some(dec!(2400.25)));
        assert_eq!(
            bridge.to_string(),
            "MetaTraderConnector(status=Connected, last_price=2400.25)"
        );
        assert!(bridge.trade_results().is_empty());

        append_log(dir.path(), "2025.07.29 17:06 | close | SUCCESS | ticket:99 | XAUUSD! | new");
        let results = bridge.trade_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ticket, Some(99));
        assert!(bridge.trade_results().is_empty());

        // history needs a numeric lot size; the close line is skipped there
        assert_eq!(bridge.trade_history(10).len(), 1);
        append_log(dir.path(), "2025.07.29 17:07 | sell | SUCCESS | 0.02 | XAUUSD! | next");
        assert_eq!(bridge.trade_history(10).len(), 2);
        assert_eq!(bridge.trade_results().len(), 1);

        bridge.disconnect().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_trade_log_does_not_block_connect() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("trade_results.txt");
        // self-referencing symlink: metadata fails with a loop error
        std::os::unix::fs::symlink(&log, &log).unwrap();
        assert!(std::fs::metadata(&log).is_err());

        let mut bridge = connector_in(dir.path(), "XAUUSD");
        bridge.connect().await.unwrap();
        assert!(bridge.is_connected());
        assert!(bridge.trade_results().is_empty());
        bridge.disconnect().await;
    }

    #[tokio::test]
    async fn test_replay_history_when_not_skipping() {
        let dir = tempfile::tempdir().unwrap();
        append_log(dir.path(), "2025.07.29 17:05 | sell | FAIL");
        let mut config = BridgeConfig::for_directory(dir.path());
        config.skip_historical_trade_log = false;
        let mut bridge =
            MetaTraderConnector::with_locator(config, FileLocator::new(dir.path(), "XAUUSD"));

        bridge.connect().await.unwrap();
        let results = bridge.trade_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "XAUUSD");
        bridge.disconnect().await;
    }

    #[test]
    fn test_reads_are_soft() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = connector_in(dir.path(), "XAUUSD");
        std::fs::write(dir.path().join("account_info.json"), "{not json").unwrap();

        assert!(bridge.market_data().is_none());
        assert!(bridge.account_info().is_none());
        assert!(bridge.positions().is_empty());
        assert!(bridge.closed_trades(DEFAULT_CLOSED_TRADES_LIMIT).is_empty());
        assert!(bridge.trade_results().is_empty());
        assert!(bridge.trade_history(50).is_empty());
        assert!(bridge.tick_data().is_none());
        assert!(bridge.order_book().is_none());
        assert!(bridge.symbol_info().is_none());
        assert!(bridge.rates_m1().is_none());
        assert!(bridge.pending_orders().is_empty());
    }

    #[test]
    fn test_price_history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = connector_in(dir.path(), "XAUUSD");
        for i in 0..(PRICE_HISTORY_CAPACITY + 5) {
            let (bid, ask) = (2000 + i, 2001 + i);
            write_price(dir.path(), "XAUUSD", &bid.to_string(), &ask.to_string(), 1);
            assert!(bridge.market_data().is_some());
        }
        assert_eq!(bridge.connection_info().price_history_len, PRICE_HISTORY_CAPACITY);

        let recent = bridge.price_history(3);
        let bids: Vec<Decimal> = recent.iter().map(|md| md.bid).collect();
        assert_eq!(bids, vec![dec!(3002), dec!(3003), dec!(3004)]);
        assert_eq!(bridge.price_history(usize::MAX).first().map(|md| md.bid), Some(dec!(2005)));
    }

    #[test]
    fn test_orders_use_broker_symbol_and_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BridgeConfig::for_directory(dir.path());
        config.magic_number = 777;
        let mut bridge =
            MetaTraderConnector::with_locator(config, FileLocator::new(dir.path(), "XAUUSD!"));

        bridge
            .place_sell_order(dec!(0.02), Some(dec!(2410)), None, "fade", Some("t-1".into()))
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join("commands.json")).unwrap();
        match Command::from_json(&raw).unwrap() {
            Command::Trade(t) => {
                assert_eq!(t.action, TradeAction::Sell);
                assert_eq!(t.symbol, "XAUUSD!");
                assert_eq!(t.magic_number, 777);
                assert_eq!(t.trade_id.as_deref(), Some("t-1"));
            }
            other => panic!("Expected trade command, got {:?}", other),
        }

        assert!(bridge.place_buy_order(Decimal::ZERO, None, None, "", None).is_err());
        assert!(bridge.modify_position(0, Some(dec!(1)), None).is_err());
        bridge.close_position(42, Some(dec!(0.01))).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("commands.json")).unwrap();
        assert!(matches!(Command::from_json(&raw).unwrap(), Command::Close(c) if c.ticket == 42));

        bridge.clear_command_file().unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("commands.json")).unwrap(), "");
    }

    #[test]
    fn test_send_request_rejects_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = connector_in(dir.path(), "XAUUSD");
        let request = CommandRequest {
            action: "hedge".into(),
            ..Default::default()
        };
        assert!(matches!(bridge.send_request(request), Err(CommandError::Invalid(_))));
        assert!(!dir.path().join("commands.json").exists());
    }

    #[test]
    fn test_test_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = connector_in(dir.path(), "XAUUSD");
        let (ok, msg) = bridge.test_connection();
        assert!(!ok);
        assert!(msg.starts_with("Price file not found"));

        let now = Utc::now();
        write_price(dir.path(), "XAUUSD", "2400.10", "2400.40", now.timestamp() - 120);
        let (ok, msg) = bridge.test_connection_at(now);
        assert!(!ok, "{}", msg);
        assert!(msg.contains("stale"));

        write_price(dir.path(), "XAUUSD", "2400.10", "2400.40", now.timestamp() - 5);
        let (ok, msg) = bridge.test_connection_at(now);
        assert!(ok, "{}", msg);
    }

    #[test]
    fn test_test_connection_survives_extreme_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("XAUUSD_price.json"),
            r#"{"symbol":"XAUUSD","bid":2400.1,"ask":2400.4,"timestamp":"-9223372036854775808"}"#,
        )
        .unwrap();
        let mut bridge = connector_in(dir.path(), "XAUUSD");
        let (ok, msg) = bridge.test_connection();
        assert!(!ok);
        assert!(msg.contains("stale"), "{}", msg);
    }

    #[test]
    fn test_connection_info_reports_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("positions.json"), r#"{"positions":[]}"#).unwrap();
        let bridge = connector_in(dir.path(), "XAUUSD");

        let info = bridge.connection_info();
        assert!(!info.connected);
        assert!(info.positions_file_exists);
        assert!(!info.price_file_exists);
        assert!(!info.command_file_exists);
        assert!(info.last_price_update.is_none());
        assert!(info.last_heartbeat.is_some());
        assert_eq!(info.files_dir, dir.path());
    }

    #[tokio::test]
    async fn test_usable_through_bridge_trait() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge: Box<dyn Bridge> = Box::new(connector_in(dir.path(), "XAUUSD"));
        bridge.connect().await.unwrap();
        assert!(bridge.is_connected());
        bridge
            .send_command(CloseCommand::new(5, None).into())
            .unwrap();
        bridge.disconnect().await;
        assert!(!bridge.is_connected());
    }
}
