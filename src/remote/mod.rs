//! # Remote Message Source
//!
//! Abstraction over the server's paginated query/insert/delete API.
//!
//! ## Contract
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      REMOTE SOURCE CONTRACT                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  fetch_page      Errors mean "unreachable". An EMPTY page is a valid,  │
//! │                  truthful answer and is NOT a failure — it replaces    │
//! │                  stale cache contents.                                 │
//! │                                                                         │
//! │  insert          The server assigns id and created_at. The client     │
//! │                  never invents either for a confirmed message.        │
//! │                                                                         │
//! │  delete_by_id    Authorization (sender-only delete) is enforced       │
//! │                  server-side. Rejection and missing-id both come back  │
//! │                  as Ok(false), not as errors; fetch_single             │
//! │                  disambiguates the two.                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The concrete transport lives in the host application; this crate only
//! sees the trait object injected at construction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{ChatMessage, ConversationKey, MediaPayload, MessageState};

/// A server-confirmed message as returned by the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Server-assigned message id
    pub id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Recipient's user id
    pub recipient_id: String,
    /// Text body, when present
    pub body: Option<String>,
    /// Media payload, when present
    pub media: Option<MediaPayload>,
    /// Id of the message this one replies to
    pub reply_to: Option<String>,
    /// Server-assigned creation timestamp, milliseconds
    pub created_at: i64,
}

impl RemoteMessage {
    /// The conversation this message belongs to.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id.clone(), self.recipient_id.clone())
    }

    /// Convert into the confirmed in-memory representation.
    pub fn into_message(self) -> ChatMessage {
        let key = self.conversation_key();
        ChatMessage {
            key,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            body: self.body,
            media: self.media,
            reply_to: self.reply_to,
            state: MessageState::Confirmed {
                id: self.id,
                created_at: self.created_at,
            },
        }
    }
}

/// An outgoing message submitted for insertion
///
/// Carries everything the server needs; the server answers with the
/// confirmed [`RemoteMessage`] including its assigned id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Sender's user id
    pub sender_id: String,
    /// Recipient's user id
    pub recipient_id: String,
    /// Text body, when present
    pub body: Option<String>,
    /// Media payload, when present
    pub media: Option<MediaPayload>,
    /// Id of the message this one replies to
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    /// Build the outgoing form of a pending message.
    pub fn from_pending(message: &ChatMessage) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            body: message.body.clone(),
            media: message.media.clone(),
            reply_to: message.reply_to.clone(),
        }
    }
}

/// Remote query/mutation API for messages.
///
/// Injected at construction so tests substitute a scripted fake.
#[async_trait]
pub trait RemoteMessageSource: Send + Sync {
    /// Fetch a page of messages for one conversation.
    ///
    /// With `since` unset, returns the most recent `limit` messages in
    /// descending `created_at` order. With `since` set, returns messages
    /// strictly newer than the timestamp in ascending order.
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        limit: usize,
        since: Option<i64>,
    ) -> Result<Vec<RemoteMessage>>;

    /// Insert a message; the server assigns id and created_at.
    async fn insert(&self, outgoing: &OutgoingMessage) -> Result<RemoteMessage>;

    /// Delete a message by id on behalf of `requester`.
    ///
    /// Returns `false` when the server refuses (requester is not the
    /// sender) or the id no longer exists — not an error either way.
    async fn delete_by_id(&self, id: &str, requester: &str) -> Result<bool>;

    /// Fetch a single message by id, `None` when it does not exist.
    async fn fetch_single(&self, id: &str) -> Result<Option<RemoteMessage>>;

    /// Fetch the actor's most recent messages across all conversations,
    /// descending by `created_at`.
    async fn fetch_recent_across_conversations(
        &self,
        actor: &str,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>>;

    /// Bulk display-name lookup for a set of user ids.
    ///
    /// Ids missing from the result have no known display name.
    async fn fetch_display_names(&self, user_ids: &[String]) -> Result<HashMap<String, String>>;
}

/// Payload handed to the push-notification dispatcher after a confirmed send
#[derive(Debug, Clone, PartialEq)]
pub struct PushNote {
    /// Who should be notified
    pub recipient_id: String,
    /// Who sent the message
    pub sender_id: String,
    /// Server id of the confirmed message
    pub message_id: String,
    /// Preview text for the notification body
    pub preview: String,
    /// Whether the message carries media
    pub has_media: bool,
}

/// Fire-and-forget push-notification dispatch.
///
/// Invoked only after a send's remote confirmation succeeds. Failures are
/// logged by the caller and never block or roll back the send path.
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    /// Dispatch one notification.
    async fn dispatch(&self, note: &PushNote) -> Result<()>;
}

/// Dispatcher that drops every notification.
///
/// For host applications that handle notification fan-out elsewhere.
pub struct NoopPushDispatcher;

#[async_trait]
impl PushDispatcher for NoopPushDispatcher {
    async fn dispatch(&self, note: &PushNote) -> Result<()> {
        tracing::debug!(message_id = %note.message_id, "Push dispatch disabled, dropping note");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, sender: &str, recipient: &str, ts: i64) -> RemoteMessage {
        RemoteMessage {
            id: id.to_string(),
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            body: Some("hello".to_string()),
            media: None,
            reply_to: None,
            created_at: ts,
        }
    }

    #[test]
    fn test_remote_message_conversion() {
        let msg = remote("srv-1", "alice", "bob", 5_000).into_message();

        assert!(!msg.is_pending());
        assert_eq!(msg.id(), "srv-1");
        assert_eq!(msg.created_at(), 5_000);
        assert_eq!(msg.key, ConversationKey::new("alice", "bob"));
    }

    #[test]
    fn test_outgoing_from_pending_carries_content() {
        let key = ConversationKey::new("alice", "bob");
        let pending = ChatMessage::pending(
            key,
            "alice",
            "bob",
            crate::model::MessageDraft::text("hi").in_reply_to("srv-9"),
        );

        let outgoing = OutgoingMessage::from_pending(&pending);
        assert_eq!(outgoing.sender_id, "alice");
        assert_eq!(outgoing.recipient_id, "bob");
        assert_eq!(outgoing.body.as_deref(), Some("hi"));
        assert_eq!(outgoing.reply_to.as_deref(), Some("srv-9"));
    }
}
