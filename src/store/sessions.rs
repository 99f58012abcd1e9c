//! Chat sessions and their append-only message transcripts.
//!
//! A session is created lazily on first contact and never closes — it only
//! ages.  Messages are totally ordered by `(created_at, rowid)`; nothing is
//! ever edited or removed.  Session creation tolerates the concurrent
//! first-message race with `INSERT OR IGNORE` followed by a re-read, so two
//! racing creators converge on the same row instead of erroring.

use std::fmt;

use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use super::{Db, now_iso8601};
use crate::error::AppError;

// ── Role ──────────────────────────────────────────────────────────────────────

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(AppError::Parse(format!("unknown role: '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// One persisted chat message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// A resolved session together with its windowed recent history
/// (oldest → newest).
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<ChatMessage>,
}

/// Listing row for `list_sessions` — no message bodies, just the count.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: u64,
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(2)?;
    let role = Role::parse(&role).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Db {
    /// Resolve (or lazily create) a session.
    ///
    /// - `Some(id)` matching an existing session → that session plus its
    ///   most recent `window` messages, oldest-first.
    /// - `Some(id)` with no match → a new session under exactly that id.
    /// - `None` → a new session under a freshly minted UUID.
    pub fn resolve_session(
        &self,
        session_id: Option<&str>,
        window: usize,
    ) -> Result<Session, AppError> {
        let id = match session_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        if let Some(session) = self.load_session(&id, window)? {
            return Ok(session);
        }

        // Not found — create. OR IGNORE absorbs the race where another
        // first-message created the row between our read and this write.
        let conn = self.conn()?;
        let now = now_iso8601();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO chat_sessions (session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?2)",
                params![id, now],
            )
            .map_err(|e| AppError::Store(format!("create session: {e}")))?;
        if inserted > 0 {
            debug!(session_id = %id, "session created");
        }

        self.load_session(&id, window)?
            .ok_or_else(|| AppError::Conflict(format!("session '{id}' vanished after create")))
    }

    fn load_session(&self, session_id: &str, window: usize) -> Result<Option<Session>, AppError> {
        let conn = self.conn()?;
        let head = conn
            .query_row(
                "SELECT session_id, created_at, updated_at FROM chat_sessions WHERE session_id = ?1",
                params![session_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| AppError::Store(format!("load session: {e}")))?;

        let Some((sid, created_at, updated_at)) = head else {
            return Ok(None);
        };

        // Most recent `window` rows, then flipped back to oldest-first.
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, content, created_at FROM chat_messages
                 WHERE session_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Store(format!("prepare history: {e}")))?;
        let mut messages = stmt
            .query_map(params![sid, window as i64], row_to_message)
            .map_err(|e| AppError::Store(format!("load history: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Store(format!("read message row: {e}")))?;
        messages.reverse();

        Ok(Some(Session { session_id: sid, created_at, updated_at, messages }))
    }

    /// Append a message to a session and bump the session's `updated_at`,
    /// in one transaction.  The session must already exist.
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("begin append: {e}")))?;

        let now = now_iso8601();
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now.clone(),
        };

        tx.execute(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![message.id, message.session_id, role.as_str(), content, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::NotFound(format!("session '{session_id}'"))
            }
            other => AppError::Store(format!("append message: {other}")),
        })?;

        tx.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE session_id = ?2",
            params![now, session_id],
        )
        .map_err(|e| AppError::Store(format!("bump session: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Store(format!("commit append: {e}")))?;

        Ok(message)
    }

    /// List sessions, most-recently-updated first, each with its message
    /// count.  `limit` is clamped to `cap` no matter what the caller asks.
    pub fn list_sessions(&self, limit: usize, cap: usize) -> Result<Vec<SessionSummary>, AppError> {
        let conn = self.conn()?;
        let take = limit.min(cap);
        let mut stmt = conn
            .prepare(
                "SELECT s.session_id, s.created_at, s.updated_at,
                        (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.session_id)
                 FROM chat_sessions s
                 ORDER BY s.updated_at DESC, s.rowid DESC
                 LIMIT ?1",
            )
            .map_err(|e| AppError::Store(format!("prepare list: {e}")))?;
        let rows = stmt
            .query_map(params![take as i64], |r| {
                Ok(SessionSummary {
                    session_id: r.get(0)?,
                    created_at: r.get(1)?,
                    updated_at: r.get(2)?,
                    message_count: r.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(|e| AppError::Store(format!("list sessions: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Store(format!("read session row: {e}")))
    }

    /// Full ordered transcript for a named session.
    /// Errors with `NotFound` when the session does not exist.
    pub fn session_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let conn = self.conn()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT session_id FROM chat_sessions WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| AppError::Store(format!("check session: {e}")))?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("session '{session_id}'")));
        }

        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, content, created_at FROM chat_messages
                 WHERE session_id = ?1
                 ORDER BY created_at, rowid",
            )
            .map_err(|e| AppError::Store(format!("prepare transcript: {e}")))?;
        let rows = stmt
            .query_map(params![session_id], row_to_message)
            .map_err(|e| AppError::Store(format!("load transcript: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Store(format!("read message row: {e}")))
    }

    /// Most frequently asked user messages, by exact content.
    pub fn most_asked(&self, limit: usize) -> Result<Vec<(String, u64)>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT content, COUNT(*) AS n FROM chat_messages
                 WHERE role = 'user'
                 GROUP BY content
                 ORDER BY n DESC, content
                 LIMIT ?1",
            )
            .map_err(|e| AppError::Store(format!("prepare analytics: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
            })
            .map_err(|e| AppError::Store(format!("load analytics: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AppError::Store(format!("read analytics row: {e}")))
    }
}
