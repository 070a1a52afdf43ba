//! # Cache Schema
//!
//! SQL schema definitions for the local message cache.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CACHE SCHEMA                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌─────────────────────┐                │
//! │  │      messages       │        │      summaries      │                │
//! │  ├─────────────────────┤        ├─────────────────────┤                │
//! │  │ id                  │        │ peer_id             │                │
//! │  │ conversation_id     │        │ peer_name           │                │
//! │  │ sender_id           │        │ preview             │                │
//! │  │ recipient_id        │        │ last_message_at     │                │
//! │  │ body                │        │ last_sender_id      │                │
//! │  │ media               │        └─────────────────────┘                │
//! │  │ reply_to            │                                               │
//! │  │ created_at          │        Summaries are a wholesale-replaced     │
//! │  │ pending             │        projection; messages are keyed by id   │
//! │  │ failed              │        and scoped by conversation.            │
//! │  └─────────────────────┘                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Cached messages
-- One row per message, keyed by its current id (temporary id while
-- pending, server id once confirmed). Upserts are last-write-wins by id.
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    -- Cache scope: the conversation's storage id
    conversation_id TEXT NOT NULL,
    -- Who sent this message
    sender_id TEXT NOT NULL,
    -- Who it was addressed to
    recipient_id TEXT NOT NULL,
    -- Text body (NULL for media-only messages)
    body TEXT,
    -- Structured media payload as JSON (NULL when absent)
    media TEXT,
    -- Id of the message this one replies to
    reply_to TEXT,
    -- Ordering key, milliseconds (local clock while pending)
    created_at INTEGER NOT NULL,
    -- 1 while awaiting server confirmation
    pending INTEGER NOT NULL DEFAULT 0,
    -- 1 when a send attempt for a pending message has failed
    failed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, created_at DESC);

-- Conversation list projection
-- One row per peer, derived from the latest message. Replaced wholesale
-- on every successful refresh.
CREATE TABLE IF NOT EXISTS summaries (
    peer_id TEXT PRIMARY KEY,
    peer_name TEXT NOT NULL,
    preview TEXT NOT NULL,
    last_message_at INTEGER NOT NULL,
    last_sender_id TEXT NOT NULL
);
"#;

/// Migration from v1 to v2: track failed send attempts on cached rows
pub const MIGRATE_V1_TO_V2: &str = r#"
ALTER TABLE messages ADD COLUMN failed INTEGER NOT NULL DEFAULT 0;
"#;
