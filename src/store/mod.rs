//! # Local Store
//!
//! Best-effort persistent cache for messages and conversation summaries.
//!
//! ## Role
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        LOCAL STORE ROLE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │   Sync Engine   │   writes every successful remote result back,     │
//! │  └────────┬────────┘   reads only as an offline fallback               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   LocalStore    │   trait seam — fakes substitute here in tests     │
//! │  │   (this file)   │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SqliteStore   │   rusqlite behind a single-writer mutex,          │
//! │  │                 │   in-memory for tests, file for production        │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Semantics
//!
//! The cache is a convenience, not a source of truth. Every I/O error is
//! logged and surfaces as "cache unavailable": reads return empty, writes
//! become silent no-ops. Nothing here ever fails a user-visible operation.

mod schema;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{ChatMessage, ConversationKey, ConversationSummary, MessageState};

/// Keyed, scope-partitioned cache for messages and summaries.
///
/// Implementations must tolerate concurrent callers; mutating calls are
/// serialized internally.
pub trait LocalStore: Send + Sync {
    /// Insert or replace messages within a scope. Last write wins by id.
    fn batch_upsert(&self, scope: &str, messages: &[ChatMessage]);

    /// Read a page of messages for a scope, ordered by `created_at`
    /// descending. Returns empty when the cache is unavailable.
    fn get_range(&self, scope: &str, limit: usize, offset: usize) -> Vec<ChatMessage>;

    /// Delete one message by id within a scope. No-op when absent.
    fn delete_by_key(&self, scope: &str, id: &str);

    /// Drop every cached message in a scope.
    fn clear_scope(&self, scope: &str);

    /// Replace the entire summary projection.
    fn replace_summaries(&self, rows: &[ConversationSummary]);

    /// Read the cached summary projection, newest conversation first.
    fn get_summaries(&self) -> Vec<ConversationSummary>;
}

/// SQLite-backed cache.
///
/// All access goes through one connection behind a mutex, which serializes
/// writers; SQLite itself handles durability.
pub struct SqliteStore {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a cache database.
    ///
    /// If `path` is `None`, creates an in-memory database (useful for
    /// testing and for profiles that disable persistence).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::Cache(format!("Failed to open cache database: {}", e)))?,
            None => Connection::open_in_memory()
                .map_err(|e| Error::Cache(format!("Failed to create in-memory cache: {}", e)))?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;

        Ok(store)
    }

    /// Initialize or migrate the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::Cache(format!("Failed to create tables: {}", e)))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::Cache(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Cache schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::info!(
                    "Cache schema version {} is older than current {}, running migrations",
                    v,
                    schema::SCHEMA_VERSION
                );

                if v < 2 {
                    tracing::info!("Running migration v1 → v2");
                    conn.execute_batch(schema::MIGRATE_V1_TO_V2)
                        .map_err(|e| Error::Cache(format!("Migration v1→v2 failed: {}", e)))?;
                }

                conn.execute(
                    "UPDATE schema_version SET version = ?",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::Cache(format!("Failed to bump schema version: {}", e)))?;
            }
            Some(v) => {
                tracing::debug!("Cache schema version: {}", v);
            }
        }

        Ok(())
    }

    // ========================================================================
    // FALLIBLE INNER OPERATIONS
    //
    // The LocalStore impl below maps every error from these to the
    // log-and-degrade contract.
    // ========================================================================

    fn try_batch_upsert(&self, scope: &str, messages: &[ChatMessage]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Cache(format!("Failed to begin upsert: {}", e)))?;

        for message in messages {
            let media = message
                .media
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let (pending, failed) = match &message.state {
                MessageState::Pending { failed, .. } => (1, i64::from(*failed)),
                MessageState::Confirmed { .. } => (0, 0),
            };

            tx.execute(
                "INSERT OR REPLACE INTO messages
                 (id, conversation_id, sender_id, recipient_id, body, media, reply_to, created_at, pending, failed)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    message.id(),
                    scope,
                    message.sender_id,
                    message.recipient_id,
                    message.body,
                    media,
                    message.reply_to,
                    message.created_at(),
                    pending,
                    failed,
                ],
            )
            .map_err(|e| Error::Cache(format!("Failed to upsert message: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::Cache(format!("Failed to commit upsert: {}", e)))?;

        Ok(())
    }

    fn try_get_range(&self, scope: &str, limit: usize, offset: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT sender_id, recipient_id, body, media, reply_to, id, created_at, pending, failed
                 FROM messages WHERE conversation_id = ?
                 ORDER BY created_at DESC
                 LIMIT ? OFFSET ?",
            )
            .map_err(|e| Error::Cache(format!("Failed to prepare range query: {}", e)))?;

        let rows = stmt
            .query_map(params![scope, limit as i64, offset as i64], |row| {
                Ok(RawMessageRow {
                    sender_id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    body: row.get(2)?,
                    media: row.get(3)?,
                    reply_to: row.get(4)?,
                    id: row.get(5)?,
                    created_at: row.get(6)?,
                    pending: row.get(7)?,
                    failed: row.get(8)?,
                })
            })
            .map_err(|e| Error::Cache(format!("Failed to query messages: {}", e)))?;

        let mut messages = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| Error::Cache(format!("Failed to read message row: {}", e)))?;
            messages.push(raw.into_message()?);
        }

        Ok(messages)
    }

    fn try_delete_by_key(&self, scope: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ? AND id = ?",
            params![scope, id],
        )
        .map_err(|e| Error::Cache(format!("Failed to delete message: {}", e)))?;

        Ok(())
    }

    fn try_clear_scope(&self, scope: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?",
            params![scope],
        )
        .map_err(|e| Error::Cache(format!("Failed to clear scope: {}", e)))?;

        Ok(())
    }

    fn try_replace_summaries(&self, rows: &[ConversationSummary]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Cache(format!("Failed to begin summary replace: {}", e)))?;

        tx.execute("DELETE FROM summaries", [])
            .map_err(|e| Error::Cache(format!("Failed to clear summaries: {}", e)))?;

        for row in rows {
            tx.execute(
                "INSERT INTO summaries (peer_id, peer_name, preview, last_message_at, last_sender_id)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    row.peer_id,
                    row.peer_name,
                    row.preview,
                    row.last_message_at,
                    row.last_sender_id,
                ],
            )
            .map_err(|e| Error::Cache(format!("Failed to insert summary: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::Cache(format!("Failed to commit summaries: {}", e)))?;

        Ok(())
    }

    fn try_get_summaries(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT peer_id, peer_name, preview, last_message_at, last_sender_id
                 FROM summaries ORDER BY last_message_at DESC",
            )
            .map_err(|e| Error::Cache(format!("Failed to prepare summary query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ConversationSummary {
                    peer_id: row.get(0)?,
                    peer_name: row.get(1)?,
                    preview: row.get(2)?,
                    last_message_at: row.get(3)?,
                    last_sender_id: row.get(4)?,
                })
            })
            .map_err(|e| Error::Cache(format!("Failed to query summaries: {}", e)))?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries
                .push(row.map_err(|e| Error::Cache(format!("Failed to read summary row: {}", e)))?);
        }

        Ok(summaries)
    }
}

impl LocalStore for SqliteStore {
    fn batch_upsert(&self, scope: &str, messages: &[ChatMessage]) {
        if messages.is_empty() {
            return;
        }
        if let Err(e) = self.try_batch_upsert(scope, messages) {
            tracing::warn!(scope, error = %e, "Message cache upsert failed");
        }
    }

    fn get_range(&self, scope: &str, limit: usize, offset: usize) -> Vec<ChatMessage> {
        match self.try_get_range(scope, limit, offset) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(scope, error = %e, "Message cache read failed");
                Vec::new()
            }
        }
    }

    fn delete_by_key(&self, scope: &str, id: &str) {
        if let Err(e) = self.try_delete_by_key(scope, id) {
            tracing::warn!(scope, id, error = %e, "Message cache delete failed");
        }
    }

    fn clear_scope(&self, scope: &str) {
        if let Err(e) = self.try_clear_scope(scope) {
            tracing::warn!(scope, error = %e, "Message cache clear failed");
        }
    }

    fn replace_summaries(&self, rows: &[ConversationSummary]) {
        if let Err(e) = self.try_replace_summaries(rows) {
            tracing::warn!(error = %e, "Summary cache replace failed");
        }
    }

    fn get_summaries(&self) -> Vec<ConversationSummary> {
        match self.try_get_summaries() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Summary cache read failed");
                Vec::new()
            }
        }
    }
}

/// Raw row shape pulled out of the messages table
struct RawMessageRow {
    sender_id: String,
    recipient_id: String,
    body: Option<String>,
    media: Option<String>,
    reply_to: Option<String>,
    id: String,
    created_at: i64,
    pending: i64,
    failed: i64,
}

impl RawMessageRow {
    fn into_message(self) -> Result<ChatMessage> {
        let media = self
            .media
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let state = if self.pending != 0 {
            MessageState::Pending {
                temp_id: self.id,
                queued_at: self.created_at,
                failed: self.failed != 0,
            }
        } else {
            MessageState::Confirmed {
                id: self.id,
                created_at: self.created_at,
            }
        };

        Ok(ChatMessage {
            key: ConversationKey::new(self.sender_id.clone(), self.recipient_id.clone()),
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            body: self.body,
            media,
            reply_to: self.reply_to,
            state,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
