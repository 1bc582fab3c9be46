// Append-only memory entries

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{time_column, Store};

/// A learned fact about the user or their context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: i64,
    pub category: String,
    pub content: String,
    /// Provenance tag, e.g. "task-12", "chat", "cli"
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: row.get(0)?,
        category: row.get(1)?,
        content: row.get(2)?,
        source: row.get(3)?,
        created_at: time_column(row, 4)?,
    })
}

/// Escape LIKE wildcards so user queries match literally
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl Store {
    pub async fn create_memory(
        &self,
        category: &str,
        content: &str,
        source: Option<&str>,
    ) -> Result<Memory> {
        let category = category.trim();
        let content = content.trim();
        if category.is_empty() || content.is_empty() {
            bail!("Memory category and content must not be empty");
        }

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO memories (category, content, source) VALUES (?1, ?2, ?3)",
            params![category, content, source],
        )
        .context("Failed to insert memory")?;

        let id = conn.last_insert_rowid();
        let memory = conn
            .query_row(
                "SELECT id, category, content, source, created_at FROM memories WHERE id = ?1",
                [id],
                memory_from_row,
            )
            .map_err(|e| anyhow!("Memory {} missing after insert: {}", id, e))?;

        tracing::debug!(memory_id = id, category = %memory.category, "Memory stored");
        Ok(memory)
    }

    /// Newest first, optionally restricted to one category
    pub async fn list_memories(&self, category: Option<&str>, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.db.lock().await;
        let limit = limit as i64;
        let memories = match category {
            Some(category) => {
                let mut stmt = conn.prepare(
                    "SELECT id, category, content, source, created_at FROM memories
                     WHERE category = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![category, limit], memory_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, category, content, source, created_at FROM memories
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], memory_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(memories)
    }

    /// Case-insensitive substring match over content and category
    pub async fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let pattern = like_pattern(query.trim());
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, category, content, source, created_at FROM memories
             WHERE content LIKE ?1 ESCAPE '\\' OR category LIKE ?1 ESCAPE '\\'
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let memories = stmt
            .query_map(params![pattern, limit as i64], memory_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to search memories")?;

        tracing::debug!("Memory search '{}' returned {} results", query, memories.len());
        Ok(memories)
    }

    pub async fn count_memories(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_trims_and_tags_source() {
        let store = Store::open_in_memory().unwrap();
        let memory = store
            .create_memory("  fact ", " Lives somewhere sunny ", Some("task-1"))
            .await
            .unwrap();
        assert_eq!(memory.category, "fact");
        assert_eq!(memory.content, "Lives somewhere sunny");
        assert_eq!(memory.source.as_deref(), Some("task-1"));
    }

    #[tokio::test]
    async fn test_create_memory_requires_category_and_content() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.create_memory("", "x", None).await.is_err());
        assert!(store.create_memory("x", "  ", None).await.is_err());
        assert_eq!(store.count_memories().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_memories_newest_first_with_filter() {
        let store = Store::open_in_memory().unwrap();
        store.create_memory("fact", "one", None).await.unwrap();
        store.create_memory("pref", "two", None).await.unwrap();
        store.create_memory("fact", "three", None).await.unwrap();

        let all = store.list_memories(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "three");

        let facts = store.list_memories(Some("fact"), 10).await.unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|m| m.category == "fact"));

        assert_eq!(store.list_memories(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_literal() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_memory("preference", "Prefers Rust over Go", None)
            .await
            .unwrap();
        store
            .create_memory("fact", "Discount is 100% off", None)
            .await
            .unwrap();

        let hits = store.search_memories("rust", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "preference");

        let by_category = store.search_memories("PREFER", 10).await.unwrap();
        assert_eq!(by_category.len(), 1);

        // '%' must not act as a wildcard
        let literal = store.search_memories("0%", 10).await.unwrap();
        assert_eq!(literal.len(), 1);
        assert!(store.search_memories("x%y", 10).await.unwrap().is_empty());
    }
}
