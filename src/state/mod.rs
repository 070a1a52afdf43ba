//! # Observable State Store
//!
//! The presentation layer's single point of contact: snapshot reads, change
//! notifications, and conversation activation.
//!
//! ## Responsibilities
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     STATE STORE WIRING                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  presentation layer                                                    │
//! │        │  snapshots, subscribe(), open/close, send/delete              │
//! │        ▼                                                                │
//! │  ┌───────────────────┐                                                 │
//! │  │   ChatStateStore  │                                                 │
//! │  └───────┬───────────┘                                                 │
//! │          │                                                              │
//! │          ├──► SyncEngine          per-conversation lists + lifecycle   │
//! │          ├──► SummaryAggregator   conversation list projection         │
//! │          ├──► RealtimeRouter      single active push subscription      │
//! │          └──► poll timer task     periodic poll_for_changes            │
//! │                                                                         │
//! │  Opening a conversation: load → subscribe push → start poll timer.    │
//! │  Closing: stop timer → unsubscribe. A remote response landing after   │
//! │  close may still update cache and state in the background, but        │
//! │  nothing re-activates the conversation.                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::model::{ChatMessage, ConversationKey, ConversationSummary, MessageDraft};
use crate::realtime::{RealtimeChannel, RealtimeRouter};
use crate::remote::{PushDispatcher, RemoteMessageSource};
use crate::store::SqliteStore;
use crate::summary::{SummaryAggregator, SummaryConfig};
use crate::sync::{ChangeEvent, SyncConfig, SyncEngine};
use crate::ChatConfig;

/// Presentation-facing facade over the sync engine, summary aggregator,
/// and realtime router.
pub struct ChatStateStore {
    /// Per-conversation state owner
    engine: Arc<SyncEngine>,
    /// Conversation list projection
    aggregator: SummaryAggregator,
    /// Single active push subscription
    router: RealtimeRouter,
    /// Poll timer for the active conversation
    poll_task: Mutex<Option<JoinHandle<()>>>,
    /// How often the active conversation polls
    poll_interval: Duration,
}

impl ChatStateStore {
    /// Assemble the full stack from a configuration and the injected
    /// transport collaborators.
    pub fn open(
        config: ChatConfig,
        remote: Arc<dyn RemoteMessageSource>,
        channel: Arc<dyn RealtimeChannel>,
        push: Arc<dyn PushDispatcher>,
    ) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config.cache_path.as_deref())?);
        let engine = SyncEngine::new(
            config.actor_id.clone(),
            remote.clone(),
            store.clone(),
            push,
            SyncConfig {
                page_size: config.page_size,
                recent_window: config.recent_window,
                ..SyncConfig::default()
            },
        );
        let aggregator = SummaryAggregator::new(
            remote,
            store,
            engine.event_sender(),
            SummaryConfig {
                scan_limit: config.summary_scan_limit,
            },
        );
        let router = RealtimeRouter::new(channel, engine.clone());

        Ok(Self {
            engine,
            aggregator,
            router,
            poll_task: Mutex::new(None),
            poll_interval: config.poll_interval,
        })
    }

    /// Subscribe to change events.
    ///
    /// One event per atomic state transition; coalescing is left to the
    /// consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.engine.subscribe()
    }

    /// The engine backing this store.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Snapshot of one conversation's messages, newest first.
    pub fn messages(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        self.engine.messages(key)
    }

    /// The cached conversation list projection, newest first.
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.aggregator.cached()
    }

    /// The conversation currently holding the realtime subscription.
    pub fn active_conversation(&self) -> Option<ConversationKey> {
        self.router.active_key()
    }

    /// Make `key` the active conversation.
    ///
    /// Loads it (cache fallback on failure), switches the realtime
    /// subscription over, and starts the poll timer. The load outcome is
    /// returned; a load failure still leaves the conversation active with
    /// degraded state.
    pub async fn open_conversation(&self, key: &ConversationKey) -> Result<()> {
        self.close_conversation().await;

        let load_outcome = self.engine.load(key).await;
        self.router.activate(key).await?;

        let engine = self.engine.clone();
        let poll_key = key.clone();
        let interval = self.poll_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it, load just ran
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = engine.poll_for_changes(&poll_key).await {
                    tracing::debug!(error = %e, "Background poll failed");
                }
            }
        });
        *self.poll_task.lock() = Some(task);

        load_outcome
    }

    /// Deactivate the current conversation: stop its poll timer and tear
    /// down the realtime subscription.
    pub async fn close_conversation(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
        self.router.deactivate().await;
    }

    /// Send a message optimistically; see [`SyncEngine::send`].
    pub fn send(&self, key: &ConversationKey, draft: MessageDraft) -> Result<ChatMessage> {
        self.engine.clone().send(key, draft)
    }

    /// Retry a failed pending message; see [`SyncEngine::retry_send`].
    pub fn retry_send(&self, key: &ConversationKey, temp_id: &str) -> Result<ChatMessage> {
        self.engine.clone().retry_send(key, temp_id)
    }

    /// Delete a message optimistically; see [`SyncEngine::delete`].
    pub fn delete(&self, key: &ConversationKey, id: &str) -> Result<()> {
        self.engine.clone().delete(key, id)
    }

    /// Refresh the conversation list projection from the server.
    pub async fn refresh_summaries(&self) -> Result<Vec<ConversationSummary>> {
        self.aggregator.refresh(self.engine.actor_id()).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RealtimeEvent;
    use crate::testkit::{remote_msg, wait_for_event, RecordingPush, ScriptedChannel, ScriptedRemote};

    fn key() -> ConversationKey {
        ConversationKey::new("alice", "bob")
    }

    struct Fixture {
        remote: Arc<ScriptedRemote>,
        channel: Arc<ScriptedChannel>,
        store: ChatStateStore,
    }

    fn fixture() -> Fixture {
        let remote = ScriptedRemote::new();
        let channel = ScriptedChannel::new();
        let store = ChatStateStore::open(
            ChatConfig::new("alice"),
            remote.clone(),
            channel.clone(),
            RecordingPush::new(),
        )
        .unwrap();
        Fixture {
            remote,
            channel,
            store,
        }
    }

    #[tokio::test]
    async fn test_open_conversation_loads_and_subscribes() {
        let f = fixture();
        f.remote.seed(remote_msg("m1", "bob", "alice", "hi", 1_000));

        f.store.open_conversation(&key()).await.unwrap();

        assert_eq!(f.store.messages(&key()).len(), 1);
        assert_eq!(f.store.active_conversation(), Some(key()));
        assert_eq!(f.channel.subscribed(), vec![key()]);
    }

    #[tokio::test]
    async fn test_switching_conversations_moves_subscription() {
        let f = fixture();
        let other = ConversationKey::new("alice", "charlie");

        f.store.open_conversation(&key()).await.unwrap();
        f.store.open_conversation(&other).await.unwrap();

        assert_eq!(f.store.active_conversation(), Some(other.clone()));
        assert_eq!(f.channel.unsubscribed(), vec![key()]);
        assert_eq!(f.channel.subscribed(), vec![key(), other]);
    }

    #[tokio::test]
    async fn test_close_conversation_stops_everything() {
        let f = fixture();

        f.store.open_conversation(&key()).await.unwrap();
        f.store.close_conversation().await;

        assert_eq!(f.store.active_conversation(), None);
        assert_eq!(f.channel.unsubscribed(), vec![key()]);
    }

    #[tokio::test]
    async fn test_open_conversation_survives_offline_load() {
        let f = fixture();
        f.remote.set_offline(true);

        let err = f.store.open_conversation(&key()).await.unwrap_err();
        assert!(err.is_network());

        // degraded but active: push subscription is in place for recovery
        assert_eq!(f.store.active_conversation(), Some(key()));
    }

    #[tokio::test]
    async fn test_push_events_reach_snapshots() {
        let f = fixture();
        f.store.open_conversation(&key()).await.unwrap();

        f.channel.emit(RealtimeEvent::MessageInserted(remote_msg(
            "m1", "bob", "alice", "over push", 1_000,
        )));
        tokio::task::yield_now().await;

        let messages = f.store.messages(&key());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body.as_deref(), Some("over push"));
    }

    #[tokio::test]
    async fn test_send_confirmation_lands_after_close() {
        let f = fixture();
        f.store.open_conversation(&key()).await.unwrap();
        let mut rx = f.store.subscribe();

        f.store.send(&key(), MessageDraft::text("bye")).unwrap();
        f.store.close_conversation().await;

        // the detached confirmation still completes and updates state,
        // but the conversation stays closed
        wait_for_event(&mut rx, |e| {
            matches!(e, ChangeEvent::MessageConfirmed { .. })
        })
        .await;

        assert_eq!(f.store.active_conversation(), None);
        let messages = f.store.messages(&key());
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_pending());
    }

    #[tokio::test]
    async fn test_summary_refresh_through_store() {
        let f = fixture();
        f.remote.seed(remote_msg("m1", "bob", "alice", "hello", 1_000));
        f.remote.set_name("bob", "Bob");

        let summaries = f.store.refresh_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].peer_name, "Bob");

        // cached projection serves snapshot reads
        assert_eq!(f.store.summaries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timer_reconciles_active_conversation() {
        let f = fixture();
        f.remote.seed(remote_msg("m1", "bob", "alice", "one", 1_000));
        f.store.open_conversation(&key()).await.unwrap();

        // let the timer task register its interval before advancing time
        tokio::task::yield_now().await;

        // a new message appears server-side; the timer picks it up
        f.remote.seed(remote_msg("m2", "bob", "alice", "two", 2_000));
        tokio::time::advance(f.store.poll_interval).await;
        tokio::task::yield_now().await;

        assert_eq!(f.store.messages(&key()).len(), 2);
    }
}
