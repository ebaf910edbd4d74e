// ABOUTME: Message history contract consumed by the turn loop, with SQLite and in-memory stores.
// ABOUTME: Chats are keyed by platform plus chat id; sort keys are strictly monotonic per store.

use crate::router::normalize;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Speaker recorded in history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for HistoryRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => anyhow::bail!("Unknown history role: {}", s),
        }
    }
}

/// A stored message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryItem {
    pub platform: String,
    pub chat_id: String,
    pub sort_key: i64,
    pub role: HistoryRole,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

/// A message waiting to be stored; the store assigns its sort key
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub platform: String,
    pub chat_id: String,
    pub role: HistoryRole,
    pub message: String,
    pub thread: Option<String>,
    pub image_urls: Vec<String>,
}

impl HistoryEntry {
    pub fn new(
        platform: &str,
        chat_id: impl Into<String>,
        role: HistoryRole,
        message: impl Into<String>,
    ) -> Self {
        Self {
            platform: normalize(platform),
            chat_id: chat_id.into(),
            role,
            message: message.into(),
            thread: None,
            image_urls: Vec::new(),
        }
    }

    pub fn user(platform: &str, chat_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(platform, chat_id, HistoryRole::User, message)
    }

    pub fn assistant(
        platform: &str,
        chat_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(platform, chat_id, HistoryRole::Assistant, message)
    }

    pub fn with_thread(mut self, thread: Option<String>) -> Self {
        self.thread = thread;
        self
    }

    pub fn with_images(mut self, image_urls: Vec<String>) -> Self {
        self.image_urls = image_urls;
        self
    }

    fn into_item(self, sort_key: i64) -> HistoryItem {
        HistoryItem {
            platform: self.platform,
            chat_id: self.chat_id,
            sort_key,
            role: self.role,
            message: self.message,
            thread: self.thread,
            image_urls: self.image_urls,
        }
    }
}

/// Message history, one chat per (platform, chat id) pair.
///
/// Platform ids are compared case-insensitively, the same way the router does.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store one message and return it with its assigned sort key
    async fn append(&self, entry: HistoryEntry) -> Result<HistoryItem>;

    /// Latest `limit` messages of a chat, oldest first
    async fn recent(&self, platform: &str, chat_id: &str, limit: usize) -> Result<Vec<HistoryItem>>;

    async fn summary(&self, platform: &str, chat_id: &str) -> Result<Option<String>>;

    async fn set_summary(&self, platform: &str, chat_id: &str, summary: &str) -> Result<()>;
}

// =============================================================================
// SQLite
// =============================================================================

#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        let store = Self::init(conn)?;
        tracing::info!(db = %path.display(), "HistoryStore initialized");
        Ok(store)
    }

    /// Ephemeral database, for tests and throwaway runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // AUTOINCREMENT keeps sort keys strictly increasing even after deletes
        conn.execute(
            "CREATE TABLE IF NOT EXISTS history (
                sort_key INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                message TEXT NOT NULL,
                thread TEXT,
                image_urls TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_chat ON history (platform, chat_id, sort_key)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS summaries (
                platform TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (platform, chat_id)
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn parse_row(row: &rusqlite::Row) -> rusqlite::Result<(HistoryItem, String)> {
        let role: String = row.get(3)?;
        let item = HistoryItem {
            sort_key: row.get(0)?,
            platform: row.get(1)?,
            chat_id: row.get(2)?,
            role: role.parse().unwrap_or(HistoryRole::User),
            message: row.get(4)?,
            thread: row.get(5)?,
            image_urls: Vec::new(),
        };
        Ok((item, row.get(6)?))
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<HistoryItem> {
        let images = serde_json::to_string(&entry.image_urls)?;
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "INSERT INTO history (platform, chat_id, role, message, thread, image_urls, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.platform,
                entry.chat_id,
                entry.role.as_str(),
                entry.message,
                entry.thread,
                images,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to append history item")?;
        let sort_key = db.last_insert_rowid();
        Ok(entry.into_item(sort_key))
    }

    async fn recent(&self, platform: &str, chat_id: &str, limit: usize) -> Result<Vec<HistoryItem>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = db.prepare(
            "SELECT sort_key, platform, chat_id, role, message, thread, image_urls
             FROM history WHERE platform = ?1 AND chat_id = ?2
             ORDER BY sort_key DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![normalize(platform), chat_id, limit as i64],
            Self::parse_row,
        )?;

        let mut items = Vec::new();
        for row in rows {
            let (mut item, images) = row.context("Failed to read history row")?;
            item.image_urls = serde_json::from_str(&images).unwrap_or_default();
            items.push(item);
        }
        items.reverse();
        Ok(items)
    }

    async fn summary(&self, platform: &str, chat_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.query_row(
            "SELECT summary FROM summaries WHERE platform = ?1 AND chat_id = ?2",
            params![normalize(platform), chat_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read history summary")
    }

    async fn set_summary(&self, platform: &str, chat_id: &str, summary: &str) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "INSERT INTO summaries (platform, chat_id, summary, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(platform, chat_id) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
            params![
                normalize(platform),
                chat_id,
                summary,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to store history summary")?;
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryState {
    next_key: i64,
    items: Vec<HistoryItem>,
    summaries: HashMap<(String, String), String>,
}

/// Process-local history, lost on restart
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored item of a chat, oldest first
    pub fn all(&self, platform: &str, chat_id: &str) -> Vec<HistoryItem> {
        let platform = normalize(platform);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .items
            .iter()
            .filter(|i| i.platform == platform && i.chat_id == chat_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<HistoryItem> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_key += 1;
        let item = entry.into_item(state.next_key);
        state.items.push(item.clone());
        Ok(item)
    }

    async fn recent(&self, platform: &str, chat_id: &str, limit: usize) -> Result<Vec<HistoryItem>> {
        let all = self.all(platform, chat_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn summary(&self, platform: &str, chat_id: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .summaries
            .get(&(normalize(platform), chat_id.to_string()))
            .cloned())
    }

    async fn set_summary(&self, platform: &str, chat_id: &str, summary: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.summaries.insert(
            (normalize(platform), chat_id.to_string()),
            summary.to_string(),
        );
        Ok(())
    }
}
