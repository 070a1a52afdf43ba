//! Shared test doubles for the injected collaborator traits.
//!
//! All fakes are scripted through plain setters so tests stay deterministic:
//! the remote assigns sequential server ids and timestamps, and connectivity
//! is toggled rather than simulated.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};
use crate::model::ConversationKey;
use crate::realtime::{RealtimeChannel, RealtimeEvent};
use crate::remote::{
    OutgoingMessage, PushDispatcher, PushNote, RemoteMessage, RemoteMessageSource,
};
use crate::sync::ChangeEvent;

/// Base timestamp for server-assigned ids in tests
const SERVER_EPOCH_MS: i64 = 1_700_000_000_000;

/// Build a confirmed remote message with explicit identity and timestamp.
pub(crate) fn remote_msg(
    id: &str,
    sender: &str,
    recipient: &str,
    body: &str,
    created_at: i64,
) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        body: Some(body.to_string()),
        media: None,
        reply_to: None,
        created_at,
    }
}

/// In-memory server table with toggleable connectivity.
pub(crate) struct ScriptedRemote {
    rows: Mutex<Vec<RemoteMessage>>,
    names: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
    yield_on_fetch: AtomicBool,
    next_seq: AtomicU64,
}

impl ScriptedRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            yield_on_fetch: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
        })
    }

    /// Place a message in the server table.
    pub(crate) fn seed(&self, message: RemoteMessage) {
        self.rows.lock().push(message);
    }

    /// Remove a message from the server table, as another client would.
    pub(crate) fn remove_row(&self, id: &str) {
        self.rows.lock().retain(|m| m.id != id);
    }

    /// Toggle connectivity; while offline every call fails with a network
    /// error.
    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make fetch calls yield to the scheduler once before answering, so a
    /// test can interleave another producer mid-poll.
    pub(crate) fn set_yield_on_fetch(&self, yield_on_fetch: bool) {
        self.yield_on_fetch.store(yield_on_fetch, Ordering::SeqCst);
    }

    /// Register a display name.
    pub(crate) fn set_name(&self, user_id: &str, name: &str) {
        self.names
            .lock()
            .insert(user_id.to_string(), name.to_string());
    }

    /// Snapshot of the server table.
    pub(crate) fn rows(&self) -> Vec<RemoteMessage> {
        self.rows.lock().clone()
    }

    fn guard(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::Network("scripted offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteMessageSource for ScriptedRemote {
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        limit: usize,
        since: Option<i64>,
    ) -> Result<Vec<RemoteMessage>> {
        if self.yield_on_fetch.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.guard()?;
        let rows = self.rows.lock();
        let mut page: Vec<RemoteMessage> = rows
            .iter()
            .filter(|m| m.conversation_key() == *key)
            .cloned()
            .collect();
        match since {
            Some(ts) => {
                page.retain(|m| m.created_at > ts);
                page.sort_by_key(|m| m.created_at);
            }
            None => {
                page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            }
        }
        page.truncate(limit);
        Ok(page)
    }

    async fn insert(&self, outgoing: &OutgoingMessage) -> Result<RemoteMessage> {
        self.guard()?;
        let n = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let message = RemoteMessage {
            id: format!("srv-{}", n),
            sender_id: outgoing.sender_id.clone(),
            recipient_id: outgoing.recipient_id.clone(),
            body: outgoing.body.clone(),
            media: outgoing.media.clone(),
            reply_to: outgoing.reply_to.clone(),
            created_at: SERVER_EPOCH_MS + (n as i64) * 1_000,
        };
        self.rows.lock().push(message.clone());
        Ok(message)
    }

    async fn delete_by_id(&self, id: &str, requester: &str) -> Result<bool> {
        self.guard()?;
        let mut rows = self.rows.lock();
        let Some(pos) = rows.iter().position(|m| m.id == id) else {
            return Ok(false);
        };
        if rows[pos].sender_id != requester {
            return Ok(false);
        }
        rows.remove(pos);
        Ok(true)
    }

    async fn fetch_single(&self, id: &str) -> Result<Option<RemoteMessage>> {
        self.guard()?;
        Ok(self.rows.lock().iter().find(|m| m.id == id).cloned())
    }

    async fn fetch_recent_across_conversations(
        &self,
        actor: &str,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>> {
        self.guard()?;
        let rows = self.rows.lock();
        let mut page: Vec<RemoteMessage> = rows
            .iter()
            .filter(|m| m.sender_id == actor || m.recipient_id == actor)
            .cloned()
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        page.truncate(limit);
        Ok(page)
    }

    async fn fetch_display_names(
        &self,
        user_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        self.guard()?;
        let names = self.names.lock();
        Ok(user_ids
            .iter()
            .filter_map(|id| names.get(id).map(|n| (id.clone(), n.clone())))
            .collect())
    }
}

/// Scripted push transport: one subscription slot, manual event emission.
pub(crate) struct ScriptedChannel {
    active: Mutex<Option<(ConversationKey, mpsc::Sender<RealtimeEvent>)>>,
    subscribed: Mutex<Vec<ConversationKey>>,
    unsubscribed: Mutex<Vec<ConversationKey>>,
}

impl ScriptedChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(None),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
        })
    }

    /// Deliver an event to the live subscriber.
    ///
    /// Returns `false` when no subscription is open.
    pub(crate) fn emit(&self, event: RealtimeEvent) -> bool {
        let active = self.active.lock();
        match active.as_ref() {
            Some((_, tx)) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Every key subscribe was called with, in order.
    pub(crate) fn subscribed(&self) -> Vec<ConversationKey> {
        self.subscribed.lock().clone()
    }

    /// Every key unsubscribe was called with, in order.
    pub(crate) fn unsubscribed(&self) -> Vec<ConversationKey> {
        self.unsubscribed.lock().clone()
    }
}

#[async_trait]
impl RealtimeChannel for ScriptedChannel {
    async fn subscribe(&self, key: &ConversationKey) -> Result<mpsc::Receiver<RealtimeEvent>> {
        let (tx, rx) = mpsc::channel(16);
        *self.active.lock() = Some((key.clone(), tx));
        self.subscribed.lock().push(key.clone());
        Ok(rx)
    }

    async fn unsubscribe(&self, key: &ConversationKey) {
        let mut active = self.active.lock();
        if active.as_ref().map_or(false, |(k, _)| k == key) {
            *active = None;
        }
        self.unsubscribed.lock().push(key.clone());
    }
}

/// Push dispatcher that records every note.
pub(crate) struct RecordingPush {
    notes: Mutex<Vec<PushNote>>,
    fail: AtomicBool,
}

impl RecordingPush {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            notes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Every note dispatched so far.
    pub(crate) fn notes(&self) -> Vec<PushNote> {
        self.notes.lock().clone()
    }

    /// Make subsequent dispatches fail.
    pub(crate) fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushDispatcher for RecordingPush {
    async fn dispatch(&self, note: &PushNote) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Network("scripted push failure".into()));
        }
        self.notes.lock().push(note.clone());
        Ok(())
    }
}

/// Await the first change event matching `pred`, with a deadline.
pub(crate) async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<ChangeEvent>,
    mut pred: F,
) -> ChangeEvent
where
    F: FnMut(&ChangeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("change-event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for change event")
}
