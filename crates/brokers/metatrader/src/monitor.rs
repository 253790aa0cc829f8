//! Link health inferred from how recently the platform rewrote its price file.

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long `stop` waits for the task before giving up on it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// Price file updated within the timeout; heartbeat advanced.
    Fresh { age: Duration },
    /// Price file older than the timeout; heartbeat untouched.
    Stale { age: Duration },
    /// No price file at all; heartbeat untouched.
    Missing,
}

/// Background task polling the price file's modification time.
pub struct ConnectionMonitor {
    price_file: PathBuf,
    timeout: Duration,
    interval: Duration,
    /// Epoch milliseconds of the last fresh check.
    last_heartbeat: Arc<AtomicI64>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionMonitor {
    pub fn new(price_file: impl Into<PathBuf>, timeout: Duration, interval: Duration) -> Self {
        Self {
            price_file: price_file.into(),
            timeout,
            interval,
            last_heartbeat: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
            shutdown: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.last_heartbeat.load(Ordering::Relaxed))
            .single()
    }

    /// Run a single check synchronously.
    pub fn check_once(&self) -> std::io::Result<HealthCheck> {
        check_price_file(&self.price_file, self.timeout, &self.last_heartbeat)
    }

    /// Spawn the polling task on the current tokio runtime. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let (tx, rx) = watch::channel(false);
        let price_file = self.price_file.clone();
        let heartbeat = Arc::clone(&self.last_heartbeat);
        let timeout = self.timeout;
        let interval = self.interval;

        self.task = Some(tokio::spawn(run(price_file, timeout, interval, heartbeat, rx)));
        self.shutdown = Some(tx);
        info!("Connection monitoring started");
    }

    /// Signal the task to stop and wait up to [`SHUTDOWN_GRACE`] for it.
    /// Returns either way. No-op if not running.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("Connection monitor did not exit within {:?}", SHUTDOWN_GRACE);
        }
        info!("Connection monitoring stopped");
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    price_file: PathBuf,
    timeout: Duration,
    interval: Duration,
    heartbeat: Arc<AtomicI64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = check_price_file(&price_file, timeout, &heartbeat) {
                    error!("Error in connection monitoring: {}", e);
                }
            }
        }
    }
}

fn check_price_file(
    price_file: &Path,
    timeout: Duration,
    heartbeat: &AtomicI64,
) -> std::io::Result<HealthCheck> {
    let modified = match std::fs::metadata(price_file) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %price_file.display(), "Price file does not exist");
            return Ok(HealthCheck::Missing);
        }
        Err(e) => return Err(e),
    };

    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);

    if age > timeout {
        warn!("No price updates for {:.1} seconds", age.as_secs_f64());
        Ok(HealthCheck::Stale { age })
    } else {
        heartbeat.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Ok(HealthCheck::Fresh { age })
    }
}
