//! # Kindred Chat Core
//!
//! Offline-first message-synchronization core for the chat feature of the
//! Kindred social app. Reconciles a local persistent cache, a pull-based
//! remote API, and a push-based realtime stream into one consistent
//! per-conversation view, with optimistic sends and deletes that are later
//! confirmed, reverted, or deduplicated against server state.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CHAT CORE MODULES                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                    ┌──────────────────┐                                 │
//! │   presentation ──► │  ChatStateStore  │  snapshots + change events      │
//! │                    └────────┬─────────┘                                 │
//! │                             │                                           │
//! │         ┌───────────────────┼──────────────────────┐                    │
//! │         ▼                   ▼                      ▼                    │
//! │  ┌─────────────┐   ┌─────────────────┐   ┌──────────────────┐          │
//! │  │ SyncEngine  │   │ SummaryAggreg.  │   │  RealtimeRouter  │          │
//! │  │             │   │                 │   │                  │          │
//! │  │ load/send/  │   │ latest message  │   │ single active    │          │
//! │  │ delete/poll │   │ per peer        │   │ push subscription│          │
//! │  └──────┬──────┘   └────────┬────────┘   └────────┬─────────┘          │
//! │         │                   │                     │                     │
//! │         ▼                   ▼                     ▼                     │
//! │  ┌─────────────────────────────────┐   ┌──────────────────────┐        │
//! │  │    LocalStore (SQLite cache)    │   │  RemoteMessageSource │        │
//! │  │    best-effort, never a        │   │  + RealtimeChannel   │        │
//! │  │    source of truth             │   │  + PushDispatcher    │        │
//! │  └─────────────────────────────────┘   └──────────────────────┘        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`model`] - Messages, conversation keys, summaries
//! - [`store`] - Best-effort local cache (SQLite)
//! - [`remote`] - Remote query/mutation API seam
//! - [`realtime`] - Push subscription seam and router
//! - [`sync`] - The sync engine and its change events
//! - [`summary`] - Conversation list projection
//! - [`state`] - Presentation-facing observable state store
//!
//! ## Consistency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CONSISTENCY MODEL                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  The server is the source of truth. The cache only ever fills gaps     │
//! │  while the network is away, and a truthful empty answer from the       │
//! │  network beats any cached rows.                                        │
//! │                                                                         │
//! │  Optimistic mutations are visible before their remote call starts     │
//! │  and are reconciled afterwards: confirmed (entry swapped), reverted   │
//! │  (delete rolled back), or retained-with-error (failed send).          │
//! │                                                                         │
//! │  Poll and push both funnel into one mutex-guarded reducer, so the     │
//! │  same message arriving on both paths lands exactly once.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod error;
pub mod model;
pub mod realtime;
pub mod remote;
pub mod state;
pub mod store;
pub mod summary;
pub mod sync;
/// Time utilities for pending-message timestamps.
pub mod time;

#[cfg(test)]
pub(crate) mod testkit;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use error::{Error, Result};
pub use model::{ChatMessage, ConversationKey, ConversationSummary, MessageDraft, MessageState};
pub use state::ChatStateStore;
pub use sync::{ChangeEvent, SyncEngine};

use std::time::Duration;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for assembling the chat core
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The signed-in user the core operates for
    pub actor_id: String,
    /// How many messages a full conversation load fetches
    pub page_size: usize,
    /// How many recent ids polling compares for deletion detection
    pub recent_window: usize,
    /// How many recent messages a summary refresh scans
    pub summary_scan_limit: usize,
    /// How often the active conversation polls for changes
    pub poll_interval: Duration,
    /// Cache database path; `None` keeps the cache in memory
    pub cache_path: Option<String>,
}

impl ChatConfig {
    /// Defaults for the given actor.
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            page_size: 50,
            recent_window: 100,
            summary_scan_limit: 200,
            poll_interval: Duration::from_secs(5),
            cache_path: None,
        }
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of the chat core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================
