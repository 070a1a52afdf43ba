//! # Data Model
//!
//! Core message and conversation types.
//!
//! ## Message Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       MESSAGE LIFECYCLE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  send intent                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────┐      remote insert ok                    │
//! │  │ Pending                  │  ──────────────────────►  ┌────────────┐ │
//! │  │  temp_id (client UUID)   │                           │ Confirmed  │ │
//! │  │  queued_at (local clock) │                           │  id        │ │
//! │  │  failed = false          │  ◄── remote insert err    │  created_at│ │
//! │  └──────────────────────────┘      (failed = true,      └────────────┘ │
//! │                                     entry stays visible)               │
//! │                                                                         │
//! │  Confirmation is a whole-entry replacement: the pending entry is       │
//! │  removed and a confirmed entry takes its place. The two states never   │
//! │  coexist for one message and no field is mutated in place.            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Within a conversation, display order is `created_at` descending (newest
//! first). Incremental fetches from the server arrive ascending.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation key: the unordered pair of participant ids.
///
/// Both participants derive the same key regardless of argument order, so
/// either side of a conversation addresses the same cache scope and the
/// same realtime subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Lexicographically smaller participant id
    first: String,
    /// Lexicographically larger participant id
    second: String,
}

impl ConversationKey {
    /// Create a key from two participant ids, in either order.
    pub fn new(user_a: impl Into<String>, user_b: impl Into<String>) -> Self {
        let (a, b) = (user_a.into(), user_b.into());
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// Both participant ids, in canonical order.
    pub fn participants(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }

    /// Check whether `user` is one of the two participants.
    pub fn contains(&self, user: &str) -> bool {
        self.first == user || self.second == user
    }

    /// The other participant, given one of the two.
    ///
    /// Returns `None` when `user` is not a participant of this conversation.
    pub fn peer_of(&self, user: &str) -> Option<&str> {
        if self.first == user {
            Some(&self.second)
        } else if self.second == user {
            Some(&self.first)
        } else {
            None
        }
    }

    /// Derive the stable storage scope id for this conversation.
    ///
    /// Hashes the canonical participant pair so both parties derive the
    /// same scope without coordination.
    pub fn storage_id(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.first.as_bytes());
        hasher.update(b"|");
        hasher.update(self.second.as_bytes());

        let hash = hasher.finalize();
        hex::encode(&hash[..16])
    }
}

/// Kind of media attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Voice or audio clip
    Audio,
    /// Generic file attachment
    File,
}

/// Structured media payload attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// What kind of media this is
    pub kind: MediaKind,
    /// Where the media content lives
    pub url: String,
    /// Pixel width, when known
    pub width: Option<u32>,
    /// Pixel height, when known
    pub height: Option<u32>,
    /// Optional caption entered by the sender
    pub caption: Option<String>,
}

impl MediaPayload {
    /// Create an image payload without dimensions or caption.
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
            width: None,
            height: None,
            caption: None,
        }
    }
}

/// Delivery state of a message: pending confirmation or server-confirmed.
///
/// A message is exactly one of the two. Confirmation swaps the entire
/// message entry rather than editing id/timestamp fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    /// Created locally, not yet acknowledged by the server
    Pending {
        /// Client-generated temporary id (UUID v4)
        temp_id: String,
        /// Local timestamp at send intent, milliseconds
        queued_at: i64,
        /// Whether a remote insert attempt has failed
        failed: bool,
    },
    /// Acknowledged by the server
    Confirmed {
        /// Server-assigned id
        id: String,
        /// Server-assigned creation timestamp, milliseconds
        created_at: i64,
    },
}

/// A chat message between two participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Conversation this message belongs to
    pub key: ConversationKey,
    /// Sender's user id
    pub sender_id: String,
    /// Recipient's user id
    pub recipient_id: String,
    /// Text body, when present
    pub body: Option<String>,
    /// Media payload, when present
    pub media: Option<MediaPayload>,
    /// Id of the message this one replies to, when present
    pub reply_to: Option<String>,
    /// Delivery state (pending or confirmed)
    pub state: MessageState,
}

impl ChatMessage {
    /// Create a new pending message at send intent.
    ///
    /// Assigns a temporary client id and the local clock; both are replaced
    /// wholesale on confirmation.
    pub fn pending(
        key: ConversationKey,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        draft: MessageDraft,
    ) -> Self {
        Self {
            key,
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            body: draft.body,
            media: draft.media,
            reply_to: draft.reply_to,
            state: MessageState::Pending {
                temp_id: Uuid::new_v4().to_string(),
                queued_at: crate::time::now_timestamp_millis(),
                failed: false,
            },
        }
    }

    /// The message id: temporary while pending, server-assigned once confirmed.
    pub fn id(&self) -> &str {
        match &self.state {
            MessageState::Pending { temp_id, .. } => temp_id,
            MessageState::Confirmed { id, .. } => id,
        }
    }

    /// The ordering timestamp: local clock while pending, server clock once
    /// confirmed.
    pub fn created_at(&self) -> i64 {
        match &self.state {
            MessageState::Pending { queued_at, .. } => *queued_at,
            MessageState::Confirmed { created_at, .. } => *created_at,
        }
    }

    /// Check whether this message is still awaiting server confirmation.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, MessageState::Pending { .. })
    }

    /// Check whether this is a pending message whose send attempt failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, MessageState::Pending { failed: true, .. })
    }

    /// Check whether this message was sent by `user`.
    pub fn is_outgoing(&self, user: &str) -> bool {
        self.sender_id == user
    }

    /// Build the confirmed replacement for this message.
    ///
    /// Produces a whole new entry carrying the server id and timestamp; the
    /// caller swaps it for the pending entry atomically.
    pub fn into_confirmed(self, id: impl Into<String>, created_at: i64) -> Self {
        Self {
            state: MessageState::Confirmed {
                id: id.into(),
                created_at,
            },
            ..self
        }
    }

    /// Build the failed-pending replacement for this message.
    ///
    /// Returns `None` when the message is already confirmed.
    pub fn into_failed(self) -> Option<Self> {
        match &self.state {
            MessageState::Pending {
                temp_id, queued_at, ..
            } => {
                let state = MessageState::Pending {
                    temp_id: temp_id.clone(),
                    queued_at: *queued_at,
                    failed: true,
                };
                Some(Self { state, ..self })
            }
            MessageState::Confirmed { .. } => None,
        }
    }
}

/// Content of a message as composed by the user, before routing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDraft {
    /// Text body
    pub body: Option<String>,
    /// Media payload
    pub media: Option<MediaPayload>,
    /// Id of the message being replied to
    pub reply_to: Option<String>,
}

impl MessageDraft {
    /// Create a plain text draft.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// Create a media-only draft.
    pub fn media(media: MediaPayload) -> Self {
        Self {
            media: Some(media),
            ..Self::default()
        }
    }

    /// Mark this draft as a reply to an existing message.
    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// A draft with neither text nor media carries nothing to send.
    pub fn is_empty(&self) -> bool {
        self.body.as_deref().map_or(true, str::is_empty) && self.media.is_none()
    }
}

/// One row of the conversation list: the latest message per peer.
///
/// Summaries are a derived projection. They are recomputed from the most
/// recent messages and wholesale-replaced on refresh, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The peer this summary row describes
    pub peer_id: String,
    /// Peer's display name
    pub peer_name: String,
    /// Preview text derived from the latest message
    pub preview: String,
    /// Timestamp of the latest message, milliseconds
    pub last_message_at: i64,
    /// Who sent the latest message
    pub last_sender_id: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_is_unordered() {
        let k1 = ConversationKey::new("alice", "bob");
        let k2 = ConversationKey::new("bob", "alice");

        assert_eq!(k1, k2);
        assert_eq!(k1.storage_id(), k2.storage_id());

        let k3 = ConversationKey::new("alice", "charlie");
        assert_ne!(k1, k3);
        assert_ne!(k1.storage_id(), k3.storage_id());
    }

    #[test]
    fn test_conversation_key_participants() {
        let key = ConversationKey::new("bob", "alice");

        assert_eq!(key.participants(), ("alice", "bob"));
        assert!(key.contains("alice"));
        assert!(key.contains("bob"));
        assert!(!key.contains("charlie"));

        assert_eq!(key.peer_of("alice"), Some("bob"));
        assert_eq!(key.peer_of("bob"), Some("alice"));
        assert_eq!(key.peer_of("charlie"), None);
    }

    #[test]
    fn test_pending_message_has_temp_identity() {
        let key = ConversationKey::new("alice", "bob");
        let msg = ChatMessage::pending(key, "alice", "bob", MessageDraft::text("hi"));

        assert!(msg.is_pending());
        assert!(!msg.is_failed());
        assert!(!msg.id().is_empty());
        assert!(msg.created_at() > 0);
        assert!(msg.is_outgoing("alice"));
        assert!(!msg.is_outgoing("bob"));
    }

    #[test]
    fn test_confirmation_replaces_identity() {
        let key = ConversationKey::new("alice", "bob");
        let pending = ChatMessage::pending(key, "alice", "bob", MessageDraft::text("hi"));
        let temp_id = pending.id().to_string();

        let confirmed = pending.into_confirmed("srv-1", 1_700_000_000_000);

        assert!(!confirmed.is_pending());
        assert_eq!(confirmed.id(), "srv-1");
        assert_eq!(confirmed.created_at(), 1_700_000_000_000);
        assert_ne!(confirmed.id(), temp_id);
        assert_eq!(confirmed.body.as_deref(), Some("hi"));
    }

    #[test]
    fn test_failed_marking_preserves_temp_identity() {
        let key = ConversationKey::new("alice", "bob");
        let pending = ChatMessage::pending(key, "alice", "bob", MessageDraft::text("hi"));
        let temp_id = pending.id().to_string();
        let queued_at = pending.created_at();

        let failed = pending.into_failed().unwrap();

        assert!(failed.is_pending());
        assert!(failed.is_failed());
        assert_eq!(failed.id(), temp_id);
        assert_eq!(failed.created_at(), queued_at);
    }

    #[test]
    fn test_failed_marking_rejects_confirmed() {
        let key = ConversationKey::new("alice", "bob");
        let confirmed = ChatMessage::pending(key, "alice", "bob", MessageDraft::text("hi"))
            .into_confirmed("srv-1", 1_700_000_000_000);

        assert!(confirmed.into_failed().is_none());
    }

    #[test]
    fn test_draft_emptiness() {
        assert!(MessageDraft::default().is_empty());
        assert!(MessageDraft::text("").is_empty());
        assert!(!MessageDraft::text("hi").is_empty());
        assert!(!MessageDraft::media(MediaPayload::image("https://cdn/img.png")).is_empty());
    }

    #[test]
    fn test_media_payload_serde_roundtrip() {
        let media = MediaPayload {
            kind: MediaKind::Video,
            url: "https://cdn/clip.mp4".into(),
            width: Some(1280),
            height: Some(720),
            caption: Some("clip".into()),
        };

        let json = serde_json::to_string(&media).unwrap();
        let restored: MediaPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(media, restored);
    }
}
