// Conversation sessions keyed by the claude CLI's own session id
//
// The store exposes create and update separately; callers decide which
// one a turn needs (see conversation.rs).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{time_column, Store};

/// Continuity handle for a multi-turn conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Session id reported by the claude CLI
    pub id: String,
    /// Originating surface ("ask", "chat")
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub message_count: i64,
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        started_at: time_column(row, 2)?,
        last_active: time_column(row, 3)?,
        message_count: row.get(4)?,
    })
}

fn fetch_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    conn.query_row(
        "SELECT id, title, started_at, last_active, message_count FROM sessions WHERE id = ?1",
        [id],
        session_from_row,
    )
    .optional()
    .with_context(|| format!("Failed to load session {}", id))
}

impl Store {
    /// Record a new session. Creating an id that already exists is a no-op
    /// and returns the stored row unchanged.
    pub async fn create_session(&self, id: &str, title: Option<&str>) -> Result<Session> {
        if id.trim().is_empty() {
            bail!("Session id must not be empty");
        }

        let conn = self.db.lock().await;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sessions (id, title) VALUES (?1, ?2)",
                params![id, title],
            )
            .context("Failed to insert session")?;

        if inserted == 0 {
            tracing::debug!(session_id = id, "Session already recorded");
        }

        fetch_session(&conn, id)?.ok_or_else(|| anyhow::anyhow!("Session {} missing after insert", id))
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.db.lock().await;
        fetch_session(&conn, id)
    }

    /// Bump last-active and the message count. `false` if the id is unknown.
    pub async fn update_session(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = conn
            .execute(
                "UPDATE sessions
                 SET last_active = datetime('now'),
                     message_count = message_count + 1
                 WHERE id = ?1",
                [id],
            )
            .with_context(|| format!("Failed to update session {}", id))?;
        Ok(changed == 1)
    }

    /// Most recently active first
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, title, started_at, last_active, message_count FROM sessions
             ORDER BY last_active DESC, started_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let sessions = stmt
            .query_map([limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }
}
