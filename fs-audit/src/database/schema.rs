//! Database schema module

/// Schema constants and initialization SQL
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Timestamp layout stored in `events.timestamp` (local time, second resolution)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date layout used for per-day queries and report file names
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Initialize database with schema version tracking
pub const INIT_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Audit events, append-only
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    user TEXT,
    action TEXT,
    path TEXT,
    suspicious INTEGER
);

-- Per (path, user) access ledger
CREATE TABLE IF NOT EXISTS file_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT,
    user TEXT,
    hit_count INTEGER DEFAULT 1,
    UNIQUE(path, user)
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_suspicious ON events(suspicious);
"#;

/// Record the schema version once
pub const VERSION_SQL: &str = "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)";

/// Atomic first-access check: inserts a fresh ledger row or bumps the existing
/// one, returning the resulting hit count (1 means first access).
pub const UPSERT_HISTORY_SQL: &str = "INSERT INTO file_history (path, user) VALUES (?1, ?2)
     ON CONFLICT(path, user) DO UPDATE SET hit_count = hit_count + 1
     RETURNING hit_count";

pub const INSERT_EVENT_SQL: &str = "INSERT INTO events (timestamp, user, action, path, suspicious)
     VALUES (?1, ?2, ?3, ?4, ?5)";

pub const EVENT_COLUMNS: &str = "id, timestamp, user, action, path, suspicious";
