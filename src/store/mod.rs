//! SQLite persistence for knowledge entries, chat sessions, and messages.
//!
//! [`Db`] holds only the database path; every operation opens its own
//! connection (WAL + foreign-keys + busy timeout), so the handle is `Clone +
//! Send + Sync` and no lock is ever held across an await point.  Knowledge
//! operations live in [`knowledge`], session operations in [`sessions`].
//!
//! The `(category, question)` dedup key is enforced by a UNIQUE constraint;
//! an absent question is stored as the empty string so that SQLite's
//! "NULLs are distinct" rule cannot break the single-identity invariant.

pub mod knowledge;
pub mod sessions;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::AppError;

/// SQLite database file name under the working directory.
pub(crate) const DB_FILENAME: &str = "kenbot.db";

/// Schema version stored in `PRAGMA user_version`.
/// Increment when the DDL changes; add a migration path in `init_schema`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Handle to the on-disk store. Cheap to clone; connections are per-op.
#[derive(Debug, Clone)]
pub struct Db {
    db_path: PathBuf,
}

impl Db {
    /// Open (creating if needed) the store under `work_dir`.
    pub fn open(work_dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(work_dir)
            .map_err(|e| AppError::Store(format!("create {}: {e}", work_dir.display())))?;
        let db_path = work_dir.join(DB_FILENAME);
        let conn = open_conn(&db_path)?;
        init_schema(&conn)?;
        Ok(Self { db_path })
    }

    pub(crate) fn conn(&self) -> Result<Connection, AppError> {
        open_conn(&self.db_path)
    }
}

/// Open a SQLite connection to `db_path` and apply recommended pragmas.
///
/// Pragmas applied:
/// - `journal_mode = WAL` — allows concurrent readers alongside a writer.
/// - `foreign_keys = ON` — messages must reference an existing session.
/// - `busy_timeout = 5000` — wait up to 5 s before returning `SQLITE_BUSY`.
pub(crate) fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Store(format!("open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Store(format!("set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Store(format!("set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Store(format!("set busy_timeout: {e}")))?;

    Ok(conn)
}

/// Execute the v1 schema DDL. Idempotent; sets `PRAGMA user_version`.
fn init_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS knowledge (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            question TEXT NOT NULL DEFAULT '',
            answer TEXT NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (category, question)
        );

        CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES chat_sessions(session_id),
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON chat_messages(session_id, created_at);

        PRAGMA user_version = {SCHEMA_VERSION};
        ",
    ))
    .map_err(|e| AppError::Store(format!("initialize schema: {e}")))
}

/// Return the current UTC time as an RFC 3339 string with microsecond
/// precision, e.g. `"2026-04-01T12:00:00.000123Z"`.  Fixed-width fractional
/// seconds keep lexicographic order equal to chronological order; exact
/// same-instant writes are resolved by SQLite rowid, which is monotonic for
/// append-only tables.
pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
