//! Append-only authentication log.
//!
//! The log is the only record the two-factor checks consult: the replay
//! guard reads the most recent success, and the rate limiter counts recent
//! failures. There is no separate in-memory counter.
//!
//! Attempts turned away by either check are recorded as throttled failures.
//! They stay in the audit trail but are not counted by
//! [`AuthLog::failures_since`], so retrying while locked out never extends
//! the lockout.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TipguardError};

/// One login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationLogEntry {
    pub user_id: i64,
    pub successful: bool,
    /// Code accepted on a successful OTP login
    pub otp_code: Option<String>,
    /// Time-step the code was accepted in
    pub time_step: Option<u64>,
    /// Rejected by the replay guard or rate limiter before the code was checked
    #[serde(default)]
    pub throttled: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuthenticationLogEntry {
    pub fn success(user_id: i64, otp_code: &str, time_step: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id,
            successful: true,
            otp_code: Some(otp_code.to_string()),
            time_step: Some(time_step),
            throttled: false,
            timestamp,
        }
    }

    pub fn failure(user_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id,
            successful: false,
            otp_code: None,
            time_step: None,
            throttled: false,
            timestamp,
        }
    }

    pub fn throttled(user_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            throttled: true,
            ..Self::failure(user_id, timestamp)
        }
    }
}

/// Storage for [`AuthenticationLogEntry`] records.
pub trait AuthLog: Send + Sync {
    fn append(&self, entry: &AuthenticationLogEntry) -> Result<()>;

    /// Most recent successful entry for `user_id`.
    fn last_success(&self, user_id: i64) -> Result<Option<AuthenticationLogEntry>>;

    /// Failed, non-throttled attempts for `user_id` strictly after `since`.
    fn failures_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<u32>;

    /// Every entry for `user_id`, oldest first.
    fn entries(&self, user_id: i64) -> Result<Vec<AuthenticationLogEntry>>;
}

/// Log held in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuthLog {
    entries: Mutex<Vec<AuthenticationLogEntry>>,
}

impl MemoryAuthLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<AuthenticationLogEntry>>> {
        self.entries
            .lock()
            .map_err(|_| TipguardError::Storage("Authentication log poisoned".to_string()))
    }
}

impl AuthLog for MemoryAuthLog {
    fn append(&self, entry: &AuthenticationLogEntry) -> Result<()> {
        self.lock()?.push(entry.clone());
        Ok(())
    }

    fn last_success(&self, user_id: i64) -> Result<Option<AuthenticationLogEntry>> {
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.user_id == user_id && e.successful)
            .max_by_key(|(index, e)| (e.timestamp, *index))
            .map(|(_, e)| e.clone()))
    }

    fn failures_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<u32> {
        let entries = self.lock()?;
        let count = entries
            .iter()
            .filter(|e| {
                e.user_id == user_id && !e.successful && !e.throttled && e.timestamp > since
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn entries(&self, user_id: i64) -> Result<Vec<AuthenticationLogEntry>> {
        let mut entries: Vec<_> = self
            .lock()?
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

/// Log stored in an `authentication_logs` SQLite table.
pub struct SqliteAuthLog {
    conn: Mutex<Connection>,
}

impl SqliteAuthLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS authentication_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                successful INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                otp_code TEXT,
                timecode INTEGER,
                throttled INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_authentication_logs_user_id_timestamp_successful
                ON authentication_logs(user_id, timestamp, successful);
            "#,
        )?;
        Self::add_throttled_column(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Logs created before throttled attempts were flagged lack the column.
    fn add_throttled_column(conn: &Connection) -> Result<()> {
        let columns = {
            let mut stmt = conn.prepare("PRAGMA table_info(authentication_logs)")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };
        if !columns.iter().any(|name| name == "throttled") {
            conn.execute(
                "ALTER TABLE authentication_logs ADD COLUMN throttled INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TipguardError::Storage("SQLite connection poisoned".to_string()))
    }
}

impl std::fmt::Debug for SqliteAuthLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAuthLog").finish_non_exhaustive()
    }
}

/// Fixed-width UTC text, so string order matches time order.
fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| TipguardError::Storage(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc))
}

/// Raw row from `authentication_logs`, before parsing.
struct LogRow {
    user_id: i64,
    successful: bool,
    timestamp: String,
    otp_code: Option<String>,
    timecode: Option<i64>,
    throttled: bool,
}

impl LogRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            successful: row.get(1)?,
            timestamp: row.get(2)?,
            otp_code: row.get(3)?,
            timecode: row.get(4)?,
            throttled: row.get(5)?,
        })
    }
}

impl TryFrom<LogRow> for AuthenticationLogEntry {
    type Error = TipguardError;

    fn try_from(row: LogRow) -> Result<Self> {
        let time_step = row
            .timecode
            .map(|step| {
                u64::try_from(step)
                    .map_err(|_| TipguardError::Storage(format!("Invalid timecode: {}", step)))
            })
            .transpose()?;
        Ok(Self {
            user_id: row.user_id,
            successful: row.successful,
            otp_code: row.otp_code,
            time_step,
            throttled: row.throttled,
            timestamp: decode_timestamp(&row.timestamp)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT user_id, successful, timestamp, otp_code, timecode, throttled FROM authentication_logs";

impl AuthLog for SqliteAuthLog {
    fn append(&self, entry: &AuthenticationLogEntry) -> Result<()> {
        let timecode = entry
            .time_step
            .map(|step| {
                i64::try_from(step)
                    .map_err(|_| TipguardError::Validation(format!("Time-step out of range: {}", step)))
            })
            .transpose()?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO authentication_logs (user_id, successful, timestamp, otp_code, timecode, throttled) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.user_id,
                entry.successful,
                encode_timestamp(entry.timestamp),
                entry.otp_code,
                timecode,
                entry.throttled,
            ],
        )?;
        Ok(())
    }

    fn last_success(&self, user_id: i64) -> Result<Option<AuthenticationLogEntry>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "{} WHERE user_id = ?1 AND successful = 1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                [user_id],
                LogRow::from_row,
            )
            .optional()?;
        row.map(AuthenticationLogEntry::try_from).transpose()
    }

    fn failures_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(id) FROM authentication_logs WHERE user_id = ?1 AND successful = 0 AND throttled = 0 AND timestamp > ?2",
            params![user_id, encode_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn entries(&self, user_id: i64) -> Result<Vec<AuthenticationLogEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE user_id = ?1 ORDER BY timestamp ASC, id ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([user_id], LogRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(AuthenticationLogEntry::try_from)
            .collect()
    }
}
