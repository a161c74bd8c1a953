//! Event store for fs-audit
//!
//! Owns the `events` log and the `file_history` access ledger. Every write
//! goes through [`EventStore::record`], which classifies the event and
//! persists it in one transaction.

pub mod schema;

use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use schema::{
    DATE_FORMAT, EVENT_COLUMNS, INIT_SQL, INSERT_EVENT_SQL, SCHEMA_VERSION, TIMESTAMP_FORMAT,
    UPSERT_HISTORY_SQL, VERSION_SQL,
};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("storage unavailable at '{path}': {reason}")]
    StorageUnavailable { path: String, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
}

impl DatabaseError {
    fn unavailable(path: &Path, reason: impl fmt::Display) -> Self {
        DatabaseError::StorageUnavailable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classify a failed write: conditions a retry of the same write cannot
    /// clear become `StorageUnavailable`.
    fn from_write(location: &str, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked,
            ) => DatabaseError::StorageUnavailable {
                path: location.to_string(),
                reason: err.to_string(),
            },
            _ => DatabaseError::SqliteError(err),
        }
    }
}

/// Kind of filesystem action recorded in an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Created,
        Action::Modified,
        Action::Deleted,
        Action::Moved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "CREATED",
            Action::Modified => "MODIFIED",
            Action::Deleted => "DELETED",
            Action::Moved => "MOVED",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown action '{0}'")]
pub struct ParseActionError(pub String);

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Action::Created),
            "MODIFIED" => Ok(Action::Modified),
            "DELETED" => Ok(Action::Deleted),
            "MOVED" => Ok(Action::Moved),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

impl ToSql for Action {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Action {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Audit event record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub id: i64,
    pub timestamp: String,
    pub user: String,
    pub action: Action,
    pub path: String,
    pub suspicious: bool,
}

impl Event {
    /// Time-of-day portion of the timestamp, or the whole timestamp if it has none
    pub fn time_of_day(&self) -> &str {
        self.timestamp
            .split_once(' ')
            .map(|(_, time)| time)
            .unwrap_or(self.timestamp.as_str())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Event {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            user: row.get(2)?,
            action: row.get(3)?,
            path: row.get(4)?,
            suspicious: row.get::<_, i32>(5)? != 0,
        })
    }
}

/// Access ledger entry for one (path, user) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    pub path: String,
    pub user: String,
    pub hit_count: i64,
}

/// Aggregate counts over the whole event log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_events: i64,
    pub suspicious_events: i64,
    pub distinct_users: i64,
}

/// Single-writer event store over one SQLite file
pub struct EventStore {
    conn: Mutex<Connection>,
    location: String,
}

impl EventStore {
    /// Open or create a store, creating the schema if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| DatabaseError::unavailable(path, e))?;
        Self::with_connection(conn, path.display().to_string()).map_err(|e| match e {
            DatabaseError::SqliteError(err) => DatabaseError::unavailable(path, err),
            other => other,
        })
    }

    /// Open a store that must already exist on disk
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DatabaseError::unavailable(path, "database file does not exist"));
        }
        Self::open(path)
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, location: String) -> Result<Self, DatabaseError> {
        // Other processes (monitor vs. scheduler) may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
            location,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute_batch(INIT_SQL)?;
        conn.execute(VERSION_SQL, params![SCHEMA_VERSION])?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction rolls the transaction back on drop, so the
        // connection is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where this store lives (file path or `:memory:`)
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Classify and persist one action, stamped with the local clock.
    ///
    /// Returns `true` when this is the first action ever seen for the
    /// (path, user) pair.
    pub fn record(&self, user: &str, action: Action, path: &str) -> Result<bool, DatabaseError> {
        self.record_at(user, action, path, Local::now().naive_local())
    }

    /// Classify and persist one action with an explicit timestamp
    pub fn record_at(
        &self,
        user: &str,
        action: Action,
        path: &str,
        at: NaiveDateTime,
    ) -> Result<bool, DatabaseError> {
        if user.is_empty() {
            return Err(DatabaseError::InvalidInput("user must not be empty".to_string()));
        }
        if path.is_empty() {
            return Err(DatabaseError::InvalidInput("path must not be empty".to_string()));
        }

        let mut conn = self.conn();
        Self::classify_and_insert(&mut conn, user, action, path, at)
            .map_err(|e| DatabaseError::from_write(&self.location, e))
    }

    fn classify_and_insert(
        conn: &mut Connection,
        user: &str,
        action: Action,
        path: &str,
        at: NaiveDateTime,
    ) -> rusqlite::Result<bool> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let hit_count: i64 =
            tx.query_row(UPSERT_HISTORY_SQL, params![path, user], |row| row.get(0))?;
        let suspicious = hit_count == 1;

        tx.execute(
            INSERT_EVENT_SQL,
            params![
                at.format(TIMESTAMP_FORMAT).to_string(),
                user,
                action,
                path,
                suspicious as i32,
            ],
        )?;
        tx.commit()?;

        Ok(suspicious)
    }

    /// Get statistics
    pub fn statistics(&self) -> Result<Statistics, DatabaseError> {
        let conn = self.conn();

        let total_events: i64 =
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;

        let suspicious_events: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE suspicious = 1",
            [],
            |row| row.get(0),
        )?;

        let distinct_users: i64 =
            conn.query_row("SELECT COUNT(DISTINCT user) FROM events", [], |row| row.get(0))?;

        Ok(Statistics {
            total_events,
            suspicious_events,
            distinct_users,
        })
    }

    /// Most recent suspicious events, newest first
    pub fn suspicious_events(&self, limit: usize) -> Result<Vec<Event>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE suspicious = 1
             ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let events = stmt
            .query_map([limit], Event::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// All events of one calendar day, newest first
    pub fn events_for_day(&self, date: NaiveDate) -> Result<Vec<Event>, DatabaseError> {
        self.query_day(date, false)
    }

    /// Suspicious events of one calendar day, newest first
    pub fn suspicious_events_for_day(&self, date: NaiveDate) -> Result<Vec<Event>, DatabaseError> {
        self.query_day(date, true)
    }

    fn query_day(&self, date: NaiveDate, only_suspicious: bool) -> Result<Vec<Event>, DatabaseError> {
        let conn = self.conn();
        let filter = if only_suspicious { " AND suspicious = 1" } else { "" };
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE timestamp LIKE ?1{filter}
             ORDER BY timestamp DESC, id DESC"
        ))?;

        let prefix = format!("{}%", date.format(DATE_FORMAT));
        let events = stmt
            .query_map([prefix], Event::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Look up the access ledger entry for a (path, user) pair
    pub fn access_record(&self, path: &str, user: &str) -> Result<Option<AccessRecord>, DatabaseError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT path, user, hit_count FROM file_history WHERE path = ?1 AND user = ?2",
                params![path, user],
                |row| {
                    Ok(AccessRecord {
                        path: row.get(0)?,
                        user: row.get(1)?,
                        hit_count: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Wipe every event and access record
    pub fn reset(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DELETE FROM events;
             DELETE FROM file_history;
             DELETE FROM sqlite_sequence WHERE name IN ('events', 'file_history');",
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
