use anyhow::Result;
use clap::{Parser, Subcommand};
use mt5bridge_core::*;
use mt5bridge_metatrader::{BridgeConfig, MetaTraderConnector};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "mt5bridge")]
#[command(about = "Drive a MetaTrader 5 terminal through its shared files directory")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TOML config file; explicit flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQL5/Files directory shared with the terminal
    #[arg(long, env = "MT5_FILES_DIR")]
    files_dir: Option<PathBuf>,

    /// Primary symbol (e.g. "XAUUSD", "XAUUSD!")
    #[arg(long, env = "MT5_PRIMARY_SYMBOL")]
    symbol: Option<String>,

    /// Explicit price file name inside the files directory
    #[arg(long, env = "MT5_PRICE_FILE")]
    price_file: Option<String>,

    /// Seconds without a price update before the link is reported stale
    #[arg(long, env = "MT5_TIMEOUT_SEC")]
    timeout: Option<u64>,

    /// Skip trade log entries written before connecting (1/0, yes/no, true/false, on/off)
    #[arg(long, env = "MT5_SKIP_HIST_LOG", value_parser = clap::builder::BoolishValueParser::new())]
    skip_hist_log: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print market data and bridge status
    Status,

    /// Run the end-to-end connection check
    Test,

    /// List open positions
    Positions,

    /// Show account balance and margin
    Account,

    /// Open a long position
    Buy(OrderArgs),

    /// Open a short position
    Sell(OrderArgs),

    /// Change stop-loss / take-profit of an open position
    Modify {
        /// Position ticket
        ticket: i64,

        #[arg(long)]
        sl: Option<Decimal>,

        #[arg(long)]
        tp: Option<Decimal>,
    },

    /// Close an open position
    Close {
        /// Position ticket
        ticket: i64,

        /// Partial close volume in lots (default: whole position)
        #[arg(long)]
        volume: Option<Decimal>,
    },

    /// Print trade results as the terminal reports them, until Ctrl-C
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

#[derive(clap::Args)]
struct OrderArgs {
    /// Lot size
    lots: Decimal,

    #[arg(long)]
    sl: Option<Decimal>,

    #[arg(long)]
    tp: Option<Decimal>,

    #[arg(long, default_value = "")]
    comment: String,

    /// Correlation id echoed in the trade log (default: random UUID)
    #[arg(long)]
    trade_id: Option<String>,
}

impl Cli {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_toml_file(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(dir) = &self.files_dir {
            config.files_dir = Some(dir.clone());
        }
        if let Some(symbol) = &self.symbol {
            config.primary_symbol = symbol.clone();
        }
        if let Some(price_file) = &self.price_file {
            config.price_file = Some(price_file.clone());
        }
        if let Some(timeout) = self.timeout {
            config.connection_timeout_secs = timeout;
        }
        if let Some(skip) = self.skip_hist_log {
            config.skip_historical_trade_log = skip;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.bridge_config()?;
    let mut bridge = MetaTraderConnector::new(config);

    match cli.command {
        Commands::Status => {
            bridge.connect().await?;
            match bridge.market_data() {
                Some(md) => print_market_data(&md),
                None => println!("No market data available"),
            }
            println!("{}", serde_json::to_string_pretty(&bridge.connection_info())?);
            println!("{}", bridge);
            bridge.disconnect().await;
        }
        Commands::Test => {
            let (ok, message) = bridge.test_connection();
            println!("{}", message);
            if !ok {
                anyhow::bail!("Connection test failed");
            }
        }
        Commands::Positions => {
            let positions = bridge.positions();
            if positions.is_empty() {
                println!("No open positions");
            }
            for p in positions {
                println!(
                    "#{:<10} {:<10} {:<4} {:>6} @ {:<10} now {:<10} sl {:<10} tp {:<10} pnl {:.2}",
                    p.ticket,
                    p.symbol,
                    p.side,
                    p.volume,
                    p.price_open,
                    p.price_current,
                    p.stop_loss,
                    p.take_profit,
                    p.unrealized_pnl()
                );
            }
        }
        Commands::Account => match bridge.account_info() {
            Some(a) => {
                println!("  Balance:     {:.2} {}", a.balance, a.currency);
                println!("  Equity:      {:.2}", a.equity);
                println!("  Margin:      {:.2}", a.margin);
                println!("  Free Margin: {:.2}", a.free_margin);
                println!("  Margin Lvl:  {:.1}%", a.margin_level());
                println!("  Profit:      {:.2}", a.profit);
                println!("  Leverage:    1:{}", a.leverage);
            }
            None => anyhow::bail!("Account info not available"),
        },
        Commands::Buy(order) => {
            let trade_id = order.trade_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            bridge.place_buy_order(
                order.lots,
                order.sl,
                order.tp,
                &order.comment,
                Some(trade_id.clone()),
            )?;
            println!("Buy {} {} sent (trade id {})", order.lots, bridge.symbol(), trade_id);
        }
        Commands::Sell(order) => {
            let trade_id = order.trade_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            bridge.place_sell_order(
                order.lots,
                order.sl,
                order.tp,
                &order.comment,
                Some(trade_id.clone()),
            )?;
            println!("Sell {} {} sent (trade id {})", order.lots, bridge.symbol(), trade_id);
        }
        Commands::Modify { ticket, sl, tp } => {
            bridge.modify_position(ticket, sl, tp)?;
            println!("Modify #{} sent", ticket);
        }
        Commands::Close { ticket, volume } => {
            bridge.close_position(ticket, volume)?;
            println!("Close #{} sent", ticket);
        }
        Commands::Watch { interval_ms } => {
            bridge.connect().await?;
            watch(&mut bridge, Duration::from_millis(interval_ms.max(50))).await;
            bridge.disconnect().await;
        }
    }

    Ok(())
}

fn print_market_data(md: &MarketData) {
    println!(
        "{} bid {} ask {} spread {} pips, mid {} (server {})",
        md.symbol,
        md.bid,
        md.ask,
        md.spread_pips(),
        md.mid_price(),
        md.server_time
    );
}

async fn watch(bridge: &mut MetaTraderConnector, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    tracing::info!(symbol = %bridge.symbol(), "Watching trade log, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                for r in bridge.trade_results() {
                    let detail = r
                        .ticket
                        .map(|t| format!(" ticket {}", t))
                        .or_else(|| r.error_message.as_ref().map(|e| format!(" ({})", e)))
                        .unwrap_or_default();
                    println!(
                        "{} {:<6} {:<7} {} id={}{}",
                        r.timestamp,
                        r.action,
                        r.result,
                        r.symbol,
                        r.trade_id.as_deref().unwrap_or("N/A"),
                        detail
                    );
                }
            }
        }
    }
}
