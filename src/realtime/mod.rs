//! # Realtime Channel
//!
//! Push-event subscription for the active conversation.
//!
//! ## Subscription Discipline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SUBSCRIPTION DISCIPLINE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  At most ONE conversation holds a push subscription at a time.         │
//! │                                                                         │
//! │  activate(B) while A is active:                                        │
//! │    1. abort A's pump task                                              │
//! │    2. unsubscribe(A)                                                   │
//! │    3. subscribe(B)                                                     │
//! │    4. spawn B's pump task                                              │
//! │                                                                         │
//! │  The pump forwards every event into the sync engine's reducer — the    │
//! │  same one polling uses — so push and poll can never interleave         │
//! │  partial writes to a conversation list.                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::model::ConversationKey;
use crate::remote::RemoteMessage;
use crate::sync::SyncEngine;

/// Discrete push events delivered for a subscribed conversation
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// A message was inserted server-side
    MessageInserted(RemoteMessage),

    /// A message was deleted server-side
    MessageDeleted {
        /// The deleted message's id
        id: String,
        /// Who had sent the deleted message
        sender_id: String,
        /// Who it was addressed to
        recipient_id: String,
    },
}

impl RealtimeEvent {
    /// The id of the message this event concerns.
    pub fn message_id(&self) -> &str {
        match self {
            Self::MessageInserted(message) => &message.id,
            Self::MessageDeleted { id, .. } => id,
        }
    }

    /// The conversation this event belongs to, derived from its
    /// participant pair.
    pub fn conversation_key(&self) -> ConversationKey {
        match self {
            Self::MessageInserted(message) => message.conversation_key(),
            Self::MessageDeleted {
                sender_id,
                recipient_id,
                ..
            } => ConversationKey::new(sender_id.clone(), recipient_id.clone()),
        }
    }

    /// Check if this is an insert event.
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::MessageInserted(_))
    }

    /// Check if this is a delete event.
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::MessageDeleted { .. })
    }
}

/// Push-subscription transport for one conversation at a time.
///
/// Implementations wrap whatever the host application uses for server push
/// (websocket topic, realtime database channel). Injected at construction
/// so tests substitute a scripted fake.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Open a push subscription scoped to one conversation.
    async fn subscribe(&self, key: &ConversationKey) -> Result<mpsc::Receiver<RealtimeEvent>>;

    /// Tear down the subscription for one conversation.
    async fn unsubscribe(&self, key: &ConversationKey);
}

/// The currently active subscription and its event pump
struct ActiveSubscription {
    /// Which conversation the subscription is scoped to
    key: ConversationKey,
    /// Task draining channel events into the engine reducer
    pump: JoinHandle<()>,
}

/// Owns the single active realtime subscription.
///
/// Switching conversations always tears the old subscription down before
/// opening the new one; background conversations get no fan-out.
pub struct RealtimeRouter {
    /// The push transport
    channel: Arc<dyn RealtimeChannel>,
    /// The engine whose reducer consumes the events
    engine: Arc<SyncEngine>,
    /// Currently active subscription, if any
    active: Mutex<Option<ActiveSubscription>>,
}

impl RealtimeRouter {
    /// Create a router over the given channel and engine.
    pub fn new(channel: Arc<dyn RealtimeChannel>, engine: Arc<SyncEngine>) -> Self {
        Self {
            channel,
            engine,
            active: Mutex::new(None),
        }
    }

    /// Make `key` the active conversation.
    ///
    /// Any previous subscription is torn down first.
    pub async fn activate(&self, key: &ConversationKey) -> Result<()> {
        self.deactivate().await;

        let mut rx = self.channel.subscribe(key).await?;
        let engine = self.engine.clone();
        let pump_key = key.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    RealtimeEvent::MessageInserted(message) => {
                        engine.apply_insert_event(&pump_key, message);
                    }
                    RealtimeEvent::MessageDeleted { id, .. } => {
                        engine.apply_delete_event(&pump_key, &id);
                    }
                }
            }
        });

        *self.active.lock() = Some(ActiveSubscription {
            key: key.clone(),
            pump,
        });
        tracing::debug!("Realtime subscription opened");
        Ok(())
    }

    /// Tear down the active subscription, if any.
    pub async fn deactivate(&self) {
        let prior = self.active.lock().take();
        if let Some(subscription) = prior {
            subscription.pump.abort();
            self.channel.unsubscribe(&subscription.key).await;
            tracing::debug!("Realtime subscription closed");
        }
    }

    /// The conversation currently holding the subscription, if any.
    pub fn active_key(&self) -> Option<ConversationKey> {
        self.active.lock().as_ref().map(|s| s.key.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================
