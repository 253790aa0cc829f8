//! MetaTrader 5 bridge over a shared files directory.
//!
//! An MQL5 expert advisor running inside the terminal exports market state as
//! JSON files and polls a command file; this crate is the other end of that
//! exchange.

pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod locator;
pub mod monitor;
pub mod protocol;
pub mod readers;
pub mod tailer;

#[cfg(test)]
mod test_support;

pub use config::{BridgeConfig, ConfigError};
pub use connector::{ConnectionInfo, MetaTraderConnector};
pub use dispatcher::CommandDispatcher;
pub use locator::FileLocator;
pub use monitor::{ConnectionMonitor, HealthCheck};
pub use readers::SchemaReader;
pub use tailer::TradeLogTailer;
