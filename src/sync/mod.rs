//! # Sync Engine
//!
//! Orchestrates loads, sends, deletes, and incremental reconciliation for
//! each conversation against the remote source and the local cache.
//!
//! ## Reconciliation Paths
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     RECONCILIATION PATHS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   polling                      realtime push                           │
//! │   ───────                      ─────────────                           │
//! │   poll_for_changes(key)        apply_insert_event / apply_delete_event │
//! │        │                              │                                 │
//! │        │   newly added + removed ids  │   single insert / delete       │
//! │        └──────────────┬───────────────┘                                 │
//! │                       ▼                                                 │
//! │          one mutex-guarded reducer                                     │
//! │          - dedupe inserts by id                                        │
//! │          - removing an absent id is a no-op                            │
//! │          - watermark advances only on confirmed additions              │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │          cache write-back + one ChangeEvent per transition             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Per-Conversation State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CONVERSATION LIFECYCLE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Idle ──load──► Loading ──ok──► Loaded ◄────────────┐                 │
//! │                     │                │               │                 │
//! │                     └──err──► Error  └──reload───────┘                 │
//! │                                                                         │
//! │   One operation per conversation at a time (per-key busy flag);        │
//! │   different conversations proceed independently.                      │
//! │                                                                         │
//! │   Send and delete return right after the optimistic mutation; the     │
//! │   remote confirmation finishes on a detached task and re-enters the   │
//! │   state through the same mutex every other mutator uses.              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod events;

pub use events::ChangeEvent;

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::model::{ChatMessage, ConversationKey, MessageDraft};
use crate::remote::{OutgoingMessage, PushDispatcher, PushNote, RemoteMessage, RemoteMessageSource};
use crate::store::LocalStore;
use crate::summary::preview_of;

/// Sync engine tuning knobs
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How many messages a full load fetches
    pub page_size: usize,
    /// How many recent ids polling compares for deletion detection.
    /// Deletions older than this window are not detected by polling.
    pub recent_window: usize,
    /// Capacity of the change-event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            recent_window: 100,
            event_capacity: 64,
        }
    }
}

/// Load phase of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Never loaded
    Idle,
    /// A load is in flight
    Loading,
    /// A network load has succeeded; the list is server-grounded
    Loaded,
    /// The last load failed with nothing but cache to show
    Error,
}

/// Per-conversation state guarded by the engine mutex
struct ConversationState {
    /// In-memory list, `created_at` descending
    messages: Vec<ChatMessage>,
    /// Highest confirmed `created_at` synced from the network; gates polling
    watermark: Option<i64>,
    /// Where this conversation is in the load lifecycle
    phase: LoadPhase,
    /// Whether the last remote attempt failed with a network error
    offline: bool,
    /// Per-key single-flight flag
    busy: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            watermark: None,
            phase: LoadPhase::Idle,
            offline: false,
            busy: false,
        }
    }
}

/// The sync engine: owns per-conversation state and the optimistic-update
/// lifecycle.
///
/// All collaborators are injected; tests substitute scripted fakes.
pub struct SyncEngine {
    /// Remote query/mutation API
    remote: Arc<dyn RemoteMessageSource>,
    /// Best-effort local cache
    store: Arc<dyn LocalStore>,
    /// Post-confirmation notification dispatch
    push: Arc<dyn PushDispatcher>,
    /// The signed-in user on whose behalf the engine operates
    actor_id: String,
    /// Tuning knobs
    config: SyncConfig,
    /// Per-conversation state, the single serialization point for mutation
    conversations: Mutex<HashMap<ConversationKey, ConversationState>>,
    /// Change-event broadcaster
    events: broadcast::Sender<ChangeEvent>,
}

impl SyncEngine {
    /// Create an engine for `actor_id` over the given collaborators.
    pub fn new(
        actor_id: impl Into<String>,
        remote: Arc<dyn RemoteMessageSource>,
        store: Arc<dyn LocalStore>,
        push: Arc<dyn PushDispatcher>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            remote,
            store,
            push,
            actor_id: actor_id.into(),
            config,
            conversations: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Clone the event sender so sibling components emit on the same channel.
    pub fn event_sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.events.clone()
    }

    /// The user this engine operates for.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Snapshot of one conversation's list, `created_at` descending.
    pub fn messages(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        self.conversations
            .lock()
            .get(key)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Current load phase of one conversation.
    pub fn phase(&self, key: &ConversationKey) -> LoadPhase {
        self.conversations
            .lock()
            .get(key)
            .map(|s| s.phase)
            .unwrap_or(LoadPhase::Idle)
    }

    /// Whether the last remote attempt for this conversation hit the network.
    pub fn is_offline(&self, key: &ConversationKey) -> bool {
        self.conversations
            .lock()
            .get(key)
            .map(|s| s.offline)
            .unwrap_or(false)
    }

    /// The conversation's poll watermark, when established.
    pub fn watermark(&self, key: &ConversationKey) -> Option<i64> {
        self.conversations.lock().get(key).and_then(|s| s.watermark)
    }

    fn emit(&self, event: ChangeEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn clear_busy(&self, key: &ConversationKey) {
        let mut conversations = self.conversations.lock();
        if let Some(state) = conversations.get_mut(key) {
            state.busy = false;
        }
    }

    // ========================================================================
    // LOAD
    // ========================================================================

    /// Load the most recent page of a conversation from the network.
    ///
    /// Silent no-op while another operation for the same key is in flight.
    /// On network failure an already-loaded list is kept (offline flag set);
    /// otherwise the cache is read as a fallback display. A cache read never
    /// establishes a watermark.
    pub async fn load(&self, key: &ConversationKey) -> Result<()> {
        let was_loaded = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            if state.busy {
                tracing::debug!("Load skipped, conversation busy");
                return Ok(());
            }
            state.busy = true;
            let was_loaded = state.phase == LoadPhase::Loaded;
            state.phase = LoadPhase::Loading;
            was_loaded
        };

        let scope = key.storage_id();
        match self
            .remote
            .fetch_page(key, self.config.page_size, None)
            .await
        {
            Ok(page) => {
                let mut messages: Vec<ChatMessage> =
                    page.into_iter().map(RemoteMessage::into_message).collect();
                messages.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
                let watermark = messages.first().map(|m| m.created_at());

                {
                    let mut conversations = self.conversations.lock();
                    let state = conversations.entry(key.clone()).or_default();
                    state.messages = messages.clone();
                    state.watermark = watermark;
                    state.phase = LoadPhase::Loaded;
                    state.offline = false;
                    state.busy = false;
                }

                self.store.batch_upsert(&scope, &messages);
                tracing::info!(conversation = %scope, count = messages.len(), "Conversation loaded");
                self.emit(ChangeEvent::ConversationLoaded { key: key.clone() });
                Ok(())
            }
            Err(e) => {
                let need_fallback = {
                    let mut conversations = self.conversations.lock();
                    let state = conversations.entry(key.clone()).or_default();
                    state.busy = false;
                    state.offline = e.is_network();
                    if was_loaded {
                        // keep the server-grounded list we already have
                        state.phase = LoadPhase::Loaded;
                        false
                    } else {
                        state.phase = LoadPhase::Error;
                        true
                    }
                };

                if need_fallback {
                    let cached = self.store.get_range(&scope, self.config.page_size, 0);
                    let mut conversations = self.conversations.lock();
                    let state = conversations.entry(key.clone()).or_default();
                    if state.messages.is_empty() {
                        state.messages = cached;
                    }
                }

                tracing::warn!(conversation = %scope, error = %e, "Conversation load failed");
                self.emit(ChangeEvent::ConversationLoadFailed {
                    key: key.clone(),
                    offline: e.is_network(),
                });
                Err(e)
            }
        }
    }

    // ========================================================================
    // SEND
    // ========================================================================

    /// Send a message optimistically.
    ///
    /// The pending entry is in the list and the cache before this returns;
    /// remote confirmation completes on a detached task and swaps the whole
    /// entry. On failure the entry stays visible, flagged undelivered.
    pub fn send(self: Arc<Self>, key: &ConversationKey, draft: MessageDraft) -> Result<ChatMessage> {
        if draft.is_empty() {
            return Err(Error::InvalidMessage(
                "a message needs text or media".into(),
            ));
        }
        let recipient = key
            .peer_of(&self.actor_id)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "actor {} is not a participant of this conversation",
                    self.actor_id
                ))
            })?
            .to_string();

        let pending = ChatMessage::pending(key.clone(), self.actor_id.clone(), recipient, draft);

        {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            if state.busy {
                return Err(Error::Busy);
            }
            state.busy = true;
            state.messages.insert(0, pending.clone());
        }

        let scope = key.storage_id();
        self.store
            .batch_upsert(&scope, std::slice::from_ref(&pending));
        self.emit(ChangeEvent::MessagePending {
            key: key.clone(),
            temp_id: pending.id().to_string(),
        });

        let task_key = key.clone();
        let task_pending = pending.clone();
        tokio::spawn(async move {
            self.confirm_send(task_key, task_pending).await;
        });

        Ok(pending)
    }

    /// Re-drive a failed pending message through remote confirmation.
    ///
    /// The pending entry keeps its temporary identity until the server
    /// answer replaces it.
    pub fn retry_send(self: Arc<Self>, key: &ConversationKey, temp_id: &str) -> Result<ChatMessage> {
        let pending = {
            let mut conversations = self.conversations.lock();
            let state = conversations
                .get_mut(key)
                .ok_or_else(|| Error::NotFound(temp_id.to_string()))?;
            if state.busy {
                return Err(Error::Busy);
            }
            let entry = state
                .messages
                .iter()
                .find(|m| m.is_pending() && m.id() == temp_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(temp_id.to_string()))?;
            state.busy = true;
            entry
        };

        self.emit(ChangeEvent::MessagePending {
            key: key.clone(),
            temp_id: temp_id.to_string(),
        });

        let task_key = key.clone();
        let task_pending = pending.clone();
        tokio::spawn(async move {
            self.confirm_send(task_key, task_pending).await;
        });

        Ok(pending)
    }

    async fn confirm_send(self: Arc<Self>, key: ConversationKey, pending: ChatMessage) {
        let temp_id = pending.id().to_string();
        let scope = key.storage_id();
        let outgoing = OutgoingMessage::from_pending(&pending);

        match self.remote.insert(&outgoing).await {
            Ok(confirmed_remote) => {
                let confirmed = confirmed_remote.into_message();
                let server_id = confirmed.id().to_string();

                {
                    let mut conversations = self.conversations.lock();
                    let state = conversations.entry(key.clone()).or_default();
                    let already_present =
                        state.messages.iter().any(|m| m.id() == server_id);
                    if let Some(pos) =
                        state.messages.iter().position(|m| m.id() == temp_id)
                    {
                        if already_present {
                            // a poll or push delivered the confirmed row first
                            state.messages.remove(pos);
                        } else {
                            state.messages[pos] = confirmed.clone();
                        }
                    } else if !already_present {
                        state.messages.insert(0, confirmed.clone());
                    }
                    if state
                        .watermark
                        .map_or(false, |w| confirmed.created_at() > w)
                    {
                        state.watermark = Some(confirmed.created_at());
                    }
                    state.busy = false;
                    state.offline = false;
                }

                self.store.delete_by_key(&scope, &temp_id);
                self.store
                    .batch_upsert(&scope, std::slice::from_ref(&confirmed));
                tracing::debug!(conversation = %scope, id = %server_id, "Message confirmed");
                self.emit(ChangeEvent::MessageConfirmed {
                    key: key.clone(),
                    temp_id,
                    id: server_id,
                });

                self.dispatch_push(&confirmed).await;
            }
            Err(e) => {
                {
                    let mut conversations = self.conversations.lock();
                    let state = conversations.entry(key.clone()).or_default();
                    if let Some(pos) =
                        state.messages.iter().position(|m| m.id() == temp_id)
                    {
                        if let Some(failed) = state.messages[pos].clone().into_failed() {
                            state.messages[pos] = failed;
                        }
                    }
                    state.busy = false;
                    if e.is_network() {
                        state.offline = true;
                    }
                }

                if let Some(failed) = pending.into_failed() {
                    self.store
                        .batch_upsert(&scope, std::slice::from_ref(&failed));
                }
                tracing::warn!(
                    conversation = %scope,
                    temp_id = %temp_id,
                    error = %e,
                    "Message send failed, pending entry retained"
                );
                self.emit(ChangeEvent::MessageSendFailed { key, temp_id });
            }
        }
    }

    async fn dispatch_push(&self, confirmed: &ChatMessage) {
        let note = PushNote {
            recipient_id: confirmed.recipient_id.clone(),
            sender_id: confirmed.sender_id.clone(),
            message_id: confirmed.id().to_string(),
            preview: preview_of(confirmed.body.as_deref(), confirmed.media.is_some()),
            has_media: confirmed.media.is_some(),
        };
        if let Err(e) = self.push.dispatch(&note).await {
            tracing::warn!(message_id = %note.message_id, error = %e, "Push dispatch failed");
        }
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    /// Delete a message optimistically.
    ///
    /// The entry leaves the list before the remote call starts. A server
    /// rejection reinserts it at its old position unless the server turns
    /// out to have deleted it through another path in the meantime.
    pub fn delete(self: Arc<Self>, key: &ConversationKey, id: &str) -> Result<()> {
        let (removed, index) = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            if state.busy {
                return Err(Error::Busy);
            }
            match state.messages.iter().position(|m| m.id() == id) {
                Some(pos) => {
                    state.busy = true;
                    (state.messages.remove(pos), pos)
                }
                None => {
                    tracing::debug!(id, "Delete skipped, message not held locally");
                    return Ok(());
                }
            }
        };

        let scope = key.storage_id();
        self.emit(ChangeEvent::MessageDeleted {
            key: key.clone(),
            id: id.to_string(),
        });

        if removed.is_pending() {
            // the server never saw this message; nothing to confirm
            self.store.delete_by_key(&scope, id);
            self.clear_busy(key);
            return Ok(());
        }

        let task_key = key.clone();
        let task_id = id.to_string();
        tokio::spawn(async move {
            self.finish_delete(task_key, task_id, removed, index).await;
        });

        Ok(())
    }

    async fn finish_delete(
        self: Arc<Self>,
        key: ConversationKey,
        id: String,
        removed: ChatMessage,
        index: usize,
    ) {
        let scope = key.storage_id();
        match self.remote.delete_by_id(&id, &self.actor_id).await {
            Ok(true) => {
                self.store.delete_by_key(&scope, &id);
                self.clear_busy(&key);
                tracing::debug!(conversation = %scope, id = %id, "Message deleted");
            }
            Ok(false) => {
                // A refusal is ambiguous: rejected for authorization, or the
                // id is already gone. fetch_single disambiguates.
                match self.remote.fetch_single(&id).await {
                    Ok(None) => {
                        self.store.delete_by_key(&scope, &id);
                        self.clear_busy(&key);
                        tracing::debug!(id = %id, "Delete target already gone, state is consistent");
                    }
                    Ok(Some(_)) => {
                        self.revert_delete(&key, &id, removed, index, "rejected by the server");
                    }
                    Err(e) => {
                        self.revert_delete(&key, &id, removed, index, "rejection check failed");
                        tracing::debug!(error = %e, "Could not verify delete target existence");
                    }
                }
            }
            Err(Error::NotFound(_)) => {
                // vanished between the optimistic removal and confirmation
                self.store.delete_by_key(&scope, &id);
                self.clear_busy(&key);
            }
            Err(e) => {
                if e.is_network() {
                    let mut conversations = self.conversations.lock();
                    if let Some(state) = conversations.get_mut(&key) {
                        state.offline = true;
                    }
                }
                self.revert_delete(&key, &id, removed, index, "delete call failed");
                tracing::warn!(id = %id, error = %e, "Message delete failed");
            }
        }
    }

    fn revert_delete(
        &self,
        key: &ConversationKey,
        id: &str,
        removed: ChatMessage,
        index: usize,
        reason: &str,
    ) {
        let reinserted = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            state.busy = false;
            if state.messages.iter().any(|m| m.id() == id) {
                // another path already brought the entry back
                false
            } else {
                let pos = index.min(state.messages.len());
                state.messages.insert(pos, removed);
                true
            }
        };

        if reinserted {
            tracing::warn!(id, reason, "Optimistic delete reverted");
            self.emit(ChangeEvent::MessageDeleteReverted {
                key: key.clone(),
                id: id.to_string(),
            });
        }
    }

    // ========================================================================
    // POLL RECONCILIATION
    // ========================================================================

    /// Reconcile one conversation against the server incrementally.
    ///
    /// No-op without a watermark (only a successful non-empty load
    /// establishes network trust) and while the key is busy. Additions and
    /// removals apply as one atomic state update. Deletions older than the
    /// recent window are not detected here.
    pub async fn poll_for_changes(&self, key: &ConversationKey) -> Result<()> {
        let watermark = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            if state.busy {
                return Ok(());
            }
            let Some(watermark) = state.watermark else {
                tracing::debug!("Poll skipped, no watermark for conversation");
                return Ok(());
            };
            state.busy = true;
            watermark
        };

        let news_fut = self
            .remote
            .fetch_page(key, self.config.recent_window, Some(watermark));
        let recent_fut = self.remote.fetch_page(key, self.config.recent_window, None);
        let (news, recent) = match tokio::join!(news_fut, recent_fut) {
            (Ok(news), Ok(recent)) => (news, recent),
            (Err(e), _) | (_, Err(e)) => {
                {
                    let mut conversations = self.conversations.lock();
                    if let Some(state) = conversations.get_mut(key) {
                        state.busy = false;
                        if e.is_network() {
                            state.offline = true;
                        }
                    }
                }
                tracing::debug!(error = %e, "Poll failed");
                return Err(e);
            }
        };

        let recent_ids: HashSet<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        // Only messages inside the recent window are eligible for removal;
        // older deletions are invisible to polling.
        let window_floor = recent.iter().map(|m| m.created_at).min();

        let (added, removed_ids) = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();

            let local_ids: HashSet<String> =
                state.messages.iter().map(|m| m.id().to_string()).collect();
            let mut added: Vec<ChatMessage> = news
                .into_iter()
                .filter(|m| !local_ids.contains(&m.id))
                .map(RemoteMessage::into_message)
                .collect();
            added.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

            let removed_ids: HashSet<String> = state
                .messages
                .iter()
                .filter(|m| !m.is_pending())
                .filter(|m| window_floor.map_or(true, |floor| m.created_at() >= floor))
                .filter(|m| !recent_ids.contains(m.id()))
                .map(|m| m.id().to_string())
                .collect();

            if !removed_ids.is_empty() {
                state.messages.retain(|m| !removed_ids.contains(m.id()));
            }
            if !added.is_empty() {
                let tail = std::mem::take(&mut state.messages);
                state.messages = added.iter().cloned().chain(tail).collect();
                if let Some(max_ts) = added.iter().map(|m| m.created_at()).max() {
                    if state.watermark.map_or(true, |w| max_ts > w) {
                        state.watermark = Some(max_ts);
                    }
                }
            }

            state.busy = false;
            state.offline = false;
            (added, removed_ids)
        };

        let scope = key.storage_id();
        self.store.batch_upsert(&scope, &added);
        for id in &removed_ids {
            self.store.delete_by_key(&scope, id);
        }

        if !added.is_empty() || !removed_ids.is_empty() {
            tracing::debug!(
                conversation = %scope,
                added = added.len(),
                removed = removed_ids.len(),
                "Poll reconciled"
            );
            self.emit(ChangeEvent::MessagesReconciled {
                key: key.clone(),
                added: added.len(),
                removed: removed_ids.len(),
            });
        }

        Ok(())
    }

    // ========================================================================
    // REALTIME RECONCILIATION
    // ========================================================================

    /// Apply a realtime insert for the given conversation.
    ///
    /// Events whose participant pair does not match `key` are dropped
    /// (scope-leak defense). An id already held locally is a silent no-op.
    pub fn apply_insert_event(&self, key: &ConversationKey, message: RemoteMessage) {
        if message.conversation_key() != *key {
            tracing::warn!(id = %message.id, "Realtime insert for another conversation, dropping");
            return;
        }

        let confirmed = message.into_message();
        let inserted = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            if state.messages.iter().any(|m| m.id() == confirmed.id()) {
                false
            } else {
                state.messages.insert(0, confirmed.clone());
                if state
                    .watermark
                    .map_or(false, |w| confirmed.created_at() > w)
                {
                    state.watermark = Some(confirmed.created_at());
                }
                true
            }
        };

        if inserted {
            self.store
                .batch_upsert(&key.storage_id(), std::slice::from_ref(&confirmed));
            self.emit(ChangeEvent::MessagesReconciled {
                key: key.clone(),
                added: 1,
                removed: 0,
            });
        }
    }

    /// Apply a realtime delete for the given conversation.
    ///
    /// Removes the id from the in-memory list and this conversation's cache
    /// scope; an id that is already gone is a silent no-op.
    pub fn apply_delete_event(&self, key: &ConversationKey, id: &str) {
        let removed = {
            let mut conversations = self.conversations.lock();
            let state = conversations.entry(key.clone()).or_default();
            match state.messages.iter().position(|m| m.id() == id) {
                Some(pos) => {
                    state.messages.remove(pos);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.store.delete_by_key(&key.storage_id(), id);
            self.emit(ChangeEvent::MessagesReconciled {
                key: key.clone(),
                added: 0,
                removed: 1,
            });
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
