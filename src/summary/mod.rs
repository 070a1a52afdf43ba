//! # Conversation Summary Aggregator
//!
//! Derives the conversation list: one summary row per peer, projected from
//! the actor's most recent messages across all conversations.
//!
//! ## Projection
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SUMMARY PROJECTION                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  one bounded page of recent messages (all conversations)               │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  group by peer id ──► keep max(created_at) per group                   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  derive preview:  text present   → the text                            │
//! │                   media only     → fixed attachment label              │
//! │                   neither        → generic placeholder                 │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  resolve display names (bulk lookup) ──► sort by timestamp desc        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  wholesale-replace the cached projection (idempotent, not a merge)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! On network failure the previously cached projection is served when
//! present; with nothing cached the error propagates.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::ConversationSummary;
use crate::remote::{RemoteMessage, RemoteMessageSource};
use crate::store::LocalStore;
use crate::sync::ChangeEvent;

/// Preview label for messages that carry media and no text
const MEDIA_PREVIEW: &str = "Sent an attachment";

/// Preview label for messages with neither text nor media
const EMPTY_PREVIEW: &str = "New message";

/// Summary aggregator tuning knobs
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// How many recent messages one refresh scans across all conversations
    pub scan_limit: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { scan_limit: 200 }
    }
}

/// Builds and caches the per-peer conversation summary projection.
pub struct SummaryAggregator {
    /// Remote query API
    remote: Arc<dyn RemoteMessageSource>,
    /// Cache holding the persisted projection
    store: Arc<dyn LocalStore>,
    /// Shared change-event channel
    events: broadcast::Sender<ChangeEvent>,
    /// Tuning knobs
    config: SummaryConfig,
}

impl SummaryAggregator {
    /// Create an aggregator over the given collaborators.
    pub fn new(
        remote: Arc<dyn RemoteMessageSource>,
        store: Arc<dyn LocalStore>,
        events: broadcast::Sender<ChangeEvent>,
        config: SummaryConfig,
    ) -> Self {
        Self {
            remote,
            store,
            events,
            config,
        }
    }

    /// The currently cached projection, newest conversation first.
    pub fn cached(&self) -> Vec<ConversationSummary> {
        self.store.get_summaries()
    }

    /// Recompute the summary projection from the server.
    ///
    /// On success the cached set is replaced wholesale. On network failure
    /// the previous projection is returned when present; otherwise the
    /// error propagates.
    pub async fn refresh(&self, actor: &str) -> Result<Vec<ConversationSummary>> {
        let recent = match self
            .remote
            .fetch_recent_across_conversations(actor, self.config.scan_limit)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                let cached = self.store.get_summaries();
                if cached.is_empty() {
                    tracing::warn!(error = %e, "Summary refresh failed with no cached projection");
                    return Err(e);
                }
                tracing::debug!(error = %e, "Summary refresh failed, serving cached projection");
                return Ok(cached);
            }
        };

        let latest = latest_per_peer(actor, recent);
        let peer_ids: Vec<String> = latest.keys().cloned().collect();

        // Name lookup failures degrade to raw peer ids rather than failing
        // the whole refresh
        let names = match self.remote.fetch_display_names(&peer_ids).await {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(error = %e, "Display-name lookup failed");
                HashMap::new()
            }
        };

        let mut summaries: Vec<ConversationSummary> = latest
            .into_iter()
            .map(|(peer_id, message)| {
                let peer_name = names.get(&peer_id).cloned().unwrap_or_else(|| peer_id.clone());
                ConversationSummary {
                    peer_name,
                    preview: preview_of(message.body.as_deref(), message.media.is_some()),
                    last_message_at: message.created_at,
                    last_sender_id: message.sender_id,
                    peer_id,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));

        self.store.replace_summaries(&summaries);
        tracing::info!(count = summaries.len(), "Summary projection refreshed");
        let _ = self.events.send(ChangeEvent::SummariesRefreshed {
            count: summaries.len(),
        });

        Ok(summaries)
    }
}

/// Keep only the newest message per peer.
fn latest_per_peer(actor: &str, messages: Vec<RemoteMessage>) -> HashMap<String, RemoteMessage> {
    let mut latest: HashMap<String, RemoteMessage> = HashMap::new();
    for message in messages {
        let peer = if message.sender_id == actor {
            message.recipient_id.clone()
        } else {
            message.sender_id.clone()
        };
        match latest.get(&peer) {
            Some(held) if held.created_at >= message.created_at => {}
            _ => {
                latest.insert(peer, message);
            }
        }
    }
    latest
}

/// Derive the one-line preview for a message.
///
/// Text wins over media; a message with neither gets a generic placeholder.
pub fn preview_of(body: Option<&str>, has_media: bool) -> String {
    match body {
        Some(text) if !text.is_empty() => text.to_string(),
        _ if has_media => MEDIA_PREVIEW.to_string(),
        _ => EMPTY_PREVIEW.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaPayload;
    use crate::store::SqliteStore;
    use crate::testkit::{remote_msg, ScriptedRemote};

    fn aggregator_with(
        remote: Arc<ScriptedRemote>,
    ) -> (SummaryAggregator, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open(None).unwrap());
        let (events, _) = broadcast::channel(16);
        let aggregator = SummaryAggregator::new(
            remote,
            store.clone(),
            events,
            SummaryConfig::default(),
        );
        (aggregator, store)
    }

    #[test]
    fn test_preview_rules() {
        assert_eq!(preview_of(Some("hello"), false), "hello");
        assert_eq!(preview_of(Some("hello"), true), "hello");
        assert_eq!(preview_of(None, true), MEDIA_PREVIEW);
        assert_eq!(preview_of(Some(""), true), MEDIA_PREVIEW);
        assert_eq!(preview_of(None, false), EMPTY_PREVIEW);
    }

    #[test]
    fn test_latest_per_peer_keeps_maximum() {
        let messages = vec![
            remote_msg("m1", "alice", "bob", "old", 1_000),
            remote_msg("m2", "bob", "alice", "newer", 2_000),
            remote_msg("m3", "alice", "charlie", "hey", 1_500),
        ];

        let latest = latest_per_peer("alice", messages);

        assert_eq!(latest.len(), 2);
        assert_eq!(latest.get("bob").unwrap().id, "m2");
        assert_eq!(latest.get("charlie").unwrap().id, "m3");
    }

    #[tokio::test]
    async fn test_refresh_projects_and_sorts() {
        let remote = ScriptedRemote::new();
        remote.seed(remote_msg("m1", "alice", "bob", "to bob", 1_000));
        remote.seed(remote_msg("m2", "bob", "alice", "from bob", 3_000));
        remote.seed(remote_msg("m3", "charlie", "alice", "from charlie", 2_000));
        remote.set_name("bob", "Bob");
        remote.set_name("charlie", "Charlie");
        let (aggregator, _store) = aggregator_with(remote);

        let summaries = aggregator.refresh("alice").await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].peer_id, "bob");
        assert_eq!(summaries[0].peer_name, "Bob");
        assert_eq!(summaries[0].preview, "from bob");
        assert_eq!(summaries[0].last_message_at, 3_000);
        assert_eq!(summaries[0].last_sender_id, "bob");
        assert_eq!(summaries[1].peer_id, "charlie");
    }

    #[tokio::test]
    async fn test_refresh_derives_media_preview() {
        let remote = ScriptedRemote::new();
        let mut msg = remote_msg("m1", "bob", "alice", "", 1_000);
        msg.body = None;
        msg.media = Some(MediaPayload::image("https://cdn/pic.png"));
        remote.seed(msg);
        let (aggregator, _store) = aggregator_with(remote);

        let summaries = aggregator.refresh("alice").await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].preview, MEDIA_PREVIEW);
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_peer_id_without_name() {
        let remote = ScriptedRemote::new();
        remote.seed(remote_msg("m1", "bob", "alice", "hi", 1_000));
        let (aggregator, _store) = aggregator_with(remote);

        let summaries = aggregator.refresh("alice").await.unwrap();
        assert_eq!(summaries[0].peer_name, "bob");
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache_wholesale() {
        let remote = ScriptedRemote::new();
        remote.seed(remote_msg("m1", "bob", "alice", "hi", 1_000));
        let (aggregator, store) = aggregator_with(remote.clone());

        aggregator.refresh("alice").await.unwrap();
        assert_eq!(store.get_summaries().len(), 1);

        // bob's conversation disappears server-side; the projection follows
        remote.remove_row("m1");
        remote.seed(remote_msg("m2", "dana", "alice", "yo", 2_000));

        let summaries = aggregator.refresh("alice").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].peer_id, "dana");
        assert_eq!(store.get_summaries().len(), 1);
        assert_eq!(store.get_summaries()[0].peer_id, "dana");
    }

    #[tokio::test]
    async fn test_refresh_failure_serves_cached_projection() {
        let remote = ScriptedRemote::new();
        remote.seed(remote_msg("m1", "bob", "alice", "hi", 1_000));
        let (aggregator, _store) = aggregator_with(remote.clone());

        aggregator.refresh("alice").await.unwrap();

        remote.set_offline(true);
        let summaries = aggregator.refresh("alice").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].peer_id, "bob");
    }

    #[tokio::test]
    async fn test_refresh_failure_without_cache_propagates() {
        let remote = ScriptedRemote::new();
        remote.set_offline(true);
        let (aggregator, _store) = aggregator_with(remote);

        let err = aggregator.refresh("alice").await.unwrap_err();
        assert!(err.is_network());
    }
}
