use super::SqliteStore;
use rusqlite::{Connection, ErrorCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;
use tracing::debug;

// Every worker thread opens its own connection to the same database file,
// so short busy spells under WAL are expected. A contended write walks this
// ladder before the error is surfaced.
const WRITE_BACKOFF_LADDER_MS: &[u64] = &[50, 150, 400, 900];

static WRITE_RETRY_TOTAL: AtomicU64 = AtomicU64::new(0);
static BUSY_ERROR_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Process-wide counters for sqlite lock contention, reported with the
/// heartbeat so a noisy database shows up without a debugger attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteContentionSnapshot {
    pub write_retry_total: u64,
    pub busy_error_total: u64,
}

pub fn sqlite_contention_snapshot() -> SqliteContentionSnapshot {
    SqliteContentionSnapshot {
        write_retry_total: WRITE_RETRY_TOTAL.load(Ordering::Relaxed),
        busy_error_total: BUSY_ERROR_TOTAL.load(Ordering::Relaxed),
    }
}

impl SqliteStore {
    /// Runs a write, sleeping through the backoff ladder while sqlite
    /// reports the database busy or locked. Any other error is returned
    /// immediately.
    pub(crate) fn execute_with_retry<F>(&self, mut write: F) -> rusqlite::Result<usize>
    where
        F: FnMut(&Connection) -> rusqlite::Result<usize>,
    {
        let mut ladder = WRITE_BACKOFF_LADDER_MS.iter();
        loop {
            let error = match write(&self.conn) {
                Ok(changed) => return Ok(changed),
                Err(error) => error,
            };
            if !sqlite_error_is_contention(&error) {
                return Err(error);
            }
            BUSY_ERROR_TOTAL.fetch_add(1, Ordering::Relaxed);
            let Some(pause_ms) = ladder.next() else {
                return Err(error);
            };
            WRITE_RETRY_TOTAL.fetch_add(1, Ordering::Relaxed);
            debug!(pause_ms, "sqlite write contended, backing off");
            std::thread::sleep(StdDuration::from_millis(*pause_ms));
        }
    }
}

fn sqlite_error_is_contention(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(code, message) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) || message.as_deref().is_some_and(message_reports_lock)
        }
        other => message_reports_lock(&other.to_string()),
    }
}

fn message_reports_lock(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("database is locked")
        || lowered.contains("database is busy")
        || lowered.contains("database table is locked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    #[test]
    fn busy_code_counts_as_contention() {
        let error = rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            Some("database is busy".to_string()),
        );
        assert!(sqlite_error_is_contention(&error));
    }

    #[test]
    fn constraint_violation_is_not_contention() {
        let error = rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed: campaigns.campaign_id".to_string()),
        );
        assert!(!sqlite_error_is_contention(&error));
    }
}
