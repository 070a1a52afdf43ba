//! # Change Events
//!
//! Events emitted by the sync engine after each atomic state transition.
//!
//! One event per transition, no coalescing: debouncing is left to the
//! consumer. Observers receive these over a broadcast channel and read the
//! new state through snapshot accessors.

use crate::model::ConversationKey;

/// Events emitted by the sync engine and its collaborators
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A conversation finished loading from the network
    ConversationLoaded {
        /// The conversation that loaded
        key: ConversationKey,
    },

    /// A conversation load failed; cached or previous state is showing
    ConversationLoadFailed {
        /// The conversation that failed to load
        key: ConversationKey,
        /// Whether the failure was a network failure (offline)
        offline: bool,
    },

    /// An optimistic send placed a pending message in the list
    MessagePending {
        /// The conversation the message belongs to
        key: ConversationKey,
        /// The pending message's temporary id
        temp_id: String,
    },

    /// A pending message was confirmed by the server
    MessageConfirmed {
        /// The conversation the message belongs to
        key: ConversationKey,
        /// The temporary id the pending entry carried
        temp_id: String,
        /// The server-assigned id of the confirmed entry
        id: String,
    },

    /// A send attempt failed; the pending entry remains, flagged
    MessageSendFailed {
        /// The conversation the message belongs to
        key: ConversationKey,
        /// The pending message's temporary id
        temp_id: String,
    },

    /// A message was removed from a conversation
    MessageDeleted {
        /// The conversation the message belonged to
        key: ConversationKey,
        /// The removed message's id
        id: String,
    },

    /// An optimistic delete was rolled back after server rejection
    MessageDeleteReverted {
        /// The conversation the message belongs to
        key: ConversationKey,
        /// The reinstated message's id
        id: String,
    },

    /// Poll or push reconciliation changed a conversation's list
    MessagesReconciled {
        /// The conversation that changed
        key: ConversationKey,
        /// How many messages were added
        added: usize,
        /// How many messages were removed
        removed: usize,
    },

    /// The conversation summary projection was refreshed
    SummariesRefreshed {
        /// How many summary rows the new projection holds
        count: usize,
    },
}

impl ChangeEvent {
    /// The conversation this event concerns, if any.
    pub fn key(&self) -> Option<&ConversationKey> {
        match self {
            Self::ConversationLoaded { key } => Some(key),
            Self::ConversationLoadFailed { key, .. } => Some(key),
            Self::MessagePending { key, .. } => Some(key),
            Self::MessageConfirmed { key, .. } => Some(key),
            Self::MessageSendFailed { key, .. } => Some(key),
            Self::MessageDeleted { key, .. } => Some(key),
            Self::MessageDeleteReverted { key, .. } => Some(key),
            Self::MessagesReconciled { key, .. } => Some(key),
            Self::SummariesRefreshed { .. } => None,
        }
    }

    /// Check if this event describes the send lifecycle of one message.
    pub fn is_send_event(&self) -> bool {
        matches!(
            self,
            Self::MessagePending { .. }
                | Self::MessageConfirmed { .. }
                | Self::MessageSendFailed { .. }
        )
    }

    /// Check if this event describes a load outcome.
    pub fn is_load_event(&self) -> bool {
        matches!(
            self,
            Self::ConversationLoaded { .. } | Self::ConversationLoadFailed { .. }
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new("alice", "bob")
    }

    #[test]
    fn test_event_key() {
        let event = ChangeEvent::ConversationLoaded { key: key() };
        assert_eq!(event.key(), Some(&key()));

        let event = ChangeEvent::SummariesRefreshed { count: 3 };
        assert_eq!(event.key(), None);
    }

    #[test]
    fn test_send_event_categorization() {
        let send_events = vec![
            ChangeEvent::MessagePending {
                key: key(),
                temp_id: "tmp-1".into(),
            },
            ChangeEvent::MessageConfirmed {
                key: key(),
                temp_id: "tmp-1".into(),
                id: "srv-1".into(),
            },
            ChangeEvent::MessageSendFailed {
                key: key(),
                temp_id: "tmp-1".into(),
            },
        ];

        for event in &send_events {
            assert!(event.is_send_event(), "Should be send event: {:?}", event);
            assert!(!event.is_load_event(), "Should not be load event: {:?}", event);
        }
    }

    #[test]
    fn test_load_event_categorization() {
        let load_events = vec![
            ChangeEvent::ConversationLoaded { key: key() },
            ChangeEvent::ConversationLoadFailed {
                key: key(),
                offline: true,
            },
        ];

        for event in &load_events {
            assert!(event.is_load_event(), "Should be load event: {:?}", event);
            assert!(!event.is_send_event(), "Should not be send event: {:?}", event);
        }
    }

    #[test]
    fn test_reconciliation_events_are_neither() {
        let event = ChangeEvent::MessagesReconciled {
            key: key(),
            added: 2,
            removed: 1,
        };
        assert!(!event.is_send_event());
        assert!(!event.is_load_event());
        assert_eq!(event.key(), Some(&key()));
    }
}
