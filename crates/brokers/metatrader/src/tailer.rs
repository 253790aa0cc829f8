//! Incremental reader for the platform's append-only trade log.
//!
//! Line formats:
//!
//! ```text
//! 2025.07.29 17:05 | buy | SUCCESS | 0.05 | XAUUSD! | t-42
//! 2025.07.29 17:06 | close | SUCCESS | ticket:123456 | XAUUSD! | t-42
//! 2025.07.29 17:07 | sell | FAIL
//! ```
//!
//! A poll that ends in the middle of a line (the platform is still writing
//! it) consumes only up to the last newline; the partial line is read again,
//! complete, on a later poll.

use chrono::NaiveDateTime;
use mt5bridge_core::*;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FIELD_SEPARATOR: char = '|';
const TICKET_MARKER: &str = "ticket:";
const PLATFORM_TIME_FORMAT: &str = "%Y.%m.%d %H:%M";
const DISPLAY_TIME_FORMAT: &str = "%m/%d %H:%M";

/// Tracks a byte cursor into the trade log so each line is delivered once.
#[derive(Debug, Clone)]
pub struct TradeLogTailer {
    path: PathBuf,
    cursor: u64,
    /// Symbol assigned to legacy lines that do not name one.
    default_symbol: String,
}

impl TradeLogTailer {
    pub fn new(path: impl Into<PathBuf>, default_symbol: &str) -> Self {
        Self {
            path: path.into(),
            cursor: 0,
            default_symbol: default_symbol.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread line.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Skip everything currently in the log. A missing log leaves the cursor at 0.
    pub fn seek_to_end(&mut self) -> std::io::Result<u64> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                self.cursor = meta.len();
                Ok(self.cursor)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self.cursor),
            Err(e) => Err(e),
        }
    }

    /// Read and parse everything appended since the previous poll.
    pub fn poll(&mut self) -> Result<Vec<TradeResult>, ReadError> {
        let io_err = |source| ReadError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::Absent(self.path.clone()))
            }
            Err(e) => return Err(io_err(e)),
        };

        let len = file.metadata().map_err(io_err)?.len();
        if len < self.cursor {
            debug!(len, cursor = self.cursor, "Trade log shorter than cursor, nothing to read");
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.cursor)).map_err(io_err)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(io_err)?;

        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => last_newline + 1,
            None => 0,
        };
        if complete < buf.len() {
            debug!(pending = buf.len() - complete, "Trade log ends mid-line, holding it back");
        }
        buf.truncate(complete);
        self.cursor += buf.len() as u64;

        let text = String::from_utf8_lossy(&buf);
        let results: Vec<TradeResult> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let parsed = parse_line(line, &self.default_symbol);
                if parsed.is_none() {
                    warn!("Unrecognised trade log line: '{}'", line);
                }
                parsed
            })
            .collect();
        Ok(results)
    }

    /// The last `limit` lines of the log, most recent first. Does not move the cursor.
    pub fn history(&self, limit: usize) -> Result<Vec<TradeHistoryEntry>, ReadError> {
        let text = match std::fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::Absent(self.path.clone()))
            }
            Err(source) => {
                return Err(ReadError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(limit);
        let entries = lines[start..]
            .iter()
            .rev()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(parse_history_line)
            .collect();
        Ok(entries)
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(FIELD_SEPARATOR).map(str::trim).collect()
}

/// Parse one log line; `None` if it has fewer than three fields.
pub fn parse_line(line: &str, default_symbol: &str) -> Option<TradeResult> {
    let parts = split_fields(line);
    if parts.len() < 3 {
        return None;
    }

    let action = parts[1].to_string();
    let result = TradeOutcome::parse(parts[2]);
    let mut trade = TradeResult {
        action,
        symbol: default_symbol.to_string(),
        result,
        timestamp: parts[0].to_string(),
        order_id: None,
        price: None,
        error_message: None,
        trade_id: None,
        ticket: None,
    };

    if parts.len() >= 6 {
        let details = parts[3];
        trade.symbol = parts[4].to_string();
        trade.trade_id = Some(parts[5].to_string()).filter(|id| !id.is_empty());

        if matches!(trade.action.as_str(), "modify" | "close") {
            trade.ticket = extract_ticket(details);
        }
        if !result.is_success() && !details.is_empty() {
            trade.error_message = Some(details.to_string());
        }
    }

    Some(trade)
}

/// `ticket:123456` anywhere in the details field.
pub fn extract_ticket(details: &str) -> Option<i64> {
    let (_, rest) = details.split_once(TICKET_MARKER)?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn parse_history_line(line: &str) -> Option<TradeHistoryEntry> {
    let parts = split_fields(line);
    if parts.len() < 5 {
        return None;
    }
    let lot_size: Decimal = match parts[3].parse() {
        Ok(lot) => lot,
        Err(_) => {
            warn!("Error parsing trade history line '{}': bad lot size", line);
            return None;
        }
    };
    let timestamp = parts[0].to_string();
    let formatted_time = NaiveDateTime::parse_from_str(&timestamp, PLATFORM_TIME_FORMAT)
        .map(|dt| dt.format(DISPLAY_TIME_FORMAT).to_string())
        .unwrap_or_else(|_| timestamp.clone());

    Some(TradeHistoryEntry {
        timestamp,
        formatted_time,
        action: parts[1].to_string(),
        result: TradeOutcome::parse(parts[2]),
        lot_size,
        symbol: parts[4].to_string(),
        trade_id: parts
            .get(5)
            .filter(|id| !id.is_empty())
            .map(|id| id.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_each_line_delivered_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_results.txt");
        let mut tailer = TradeLogTailer::new(&path, "XAUUSD");

        let mut seen = Vec::new();
        for batch in 0..4 {
            for i in 0..(batch + 1) {
                append(
                    &path,
                    &format!(
                        "2025.07.29 17:0{batch} | buy | SUCCESS | 0.01 | XAUUSD | t-{batch}-{i}\n"
                    ),
                );
            }
            seen.extend(tailer.poll().unwrap());
            assert!(tailer.poll().unwrap().is_empty());
        }

        let ids: Vec<String> = seen.into_iter().filter_map(|r| r.trade_id).collect();
        let expected: Vec<String> = (0..4)
            .flat_map(|b| (0..(b + 1)).map(move |i| format!("t-{b}-{i}")))
            .collect();
        assert_eq!(ids, expected);
        assert_eq!(tailer.cursor(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_partial_line_delivered_once_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_results.txt");
        let mut tailer = TradeLogTailer::new(&path, "XAUUSD");

        append(&path, "2025.07.29 17:06 | close | SUCC");
        assert!(tailer.poll().unwrap().is_empty());
        assert_eq!(tailer.cursor(), 0);

        append(&path, "ESS | ticket:99 | XAUUSD | t-1\n");
        let results = tailer.poll().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].action, "close");
        assert_eq!(results[0].result, TradeOutcome::Success);
        assert_eq!(results[0].ticket, Some(99));
        assert_eq!(tailer.cursor(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_seek_to_end_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_results.txt");
        append(&path, "2025.07.29 17:05 | buy | SUCCESS | 0.01 | XAUUSD | old\n");

        let mut tailer = TradeLogTailer::new(&path, "XAUUSD");
        tailer.seek_to_end().unwrap();
        append(&path, "2025.07.29 17:06 | sell | SUCCESS | 0.01 | XAUUSD | new\n");

        let results = tailer.poll().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].trade_id.as_deref(), Some("new"));
    }

    #[test]
    fn test_missing_log_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = TradeLogTailer::new(dir.path().join("none.txt"), "XAUUSD");
        assert_eq!(tailer.seek_to_end().unwrap(), 0);
        assert!(tailer.poll().unwrap_err().is_absent());
    }

    #[test]
    fn test_legacy_line_uses_default_symbol() {
        let r = parse_line("2025.07.29 17:07 | sell | FAIL", "XAUUSD!").unwrap();
        assert_eq!(r.symbol, "XAUUSD!");
        assert_eq!(r.result, TradeOutcome::Fail);
        assert!(r.trade_id.is_none());
        assert!(parse_line("garbage", "XAUUSD").is_none());
    }

    #[test]
    fn test_ticket_extraction() {
        let r = parse_line(
            "2025.07.29 17:06 | close | SUCCESS | ticket:123456 | XAUUSD | t-1",
            "XAUUSD",
        )
        .unwrap();
        assert_eq!(r.ticket, Some(123456));

        let r = parse_line(
            "2025.07.29 17:06 | modify | SUCCESS | ticket:abc | XAUUSD | t-1",
            "XAUUSD",
        )
        .unwrap();
        assert_eq!(r.ticket, None);

        let r = parse_line(
            "2025.07.29 17:06 | buy | SUCCESS | ticket:5 | XAUUSD | t-1",
            "XAUUSD",
        )
        .unwrap();
        assert_eq!(r.ticket, None);
    }

    #[test]
    fn test_failure_details_become_error_message() {
        let r = parse_line(
            "2025.07.29 17:06 | buy | FAIL | not enough money | XAUUSD | t-9",
            "XAUUSD",
        )
        .unwrap();
        assert_eq!(r.error_message.as_deref(), Some("not enough money"));
    }

    #[test]
    fn test_history_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_results.txt");
        append(
            &path,
            "# header\n\
             2025.07.29 17:05 | buy | SUCCESS | 0.02 | XAUUSD | a\n\
             2025.07.29 17:06 | sell | SUCCESS | oops | XAUUSD | b\n\
             2025.07.31 18:56 | sell | SUCCESS | 0.03 | XAUUSD\n",
        );
        let tailer = TradeLogTailer::new(&path, "XAUUSD");
        let history = tailer.history(50).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].formatted_time, "07/31 18:56");
        assert_eq!(history[0].trade_id, "N/A");
        assert_eq!(history[1].lot_size, dec!(0.02));
        assert_eq!(tailer.cursor(), 0);

        assert_eq!(tailer.history(1).unwrap().len(), 1);
    }
}
