//! Events published to observers
//!
//! Every event carries a read-only projection of the changed record, so an
//! observer never needs to call back into the producer to render it.

use crate::ids::{DocumentId, SessionId, TurnId};
use crate::types::{Document, DocumentStatus, Message, Participant};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kinds observers subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A document was ingested
    DocumentCreated,
    /// A document moved to a new status
    DocumentStatusChanged,
    /// A message was appended to a session log
    MessageAppended,
    /// An assistant call failed or timed out
    AssistantReplyFailed,
    /// A participant joined or changed presence
    PresenceChanged,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 5] = [
        EventKind::DocumentCreated,
        EventKind::DocumentStatusChanged,
        EventKind::MessageAppended,
        EventKind::AssistantReplyFailed,
        EventKind::PresenceChanged,
    ];

    #[inline]
    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DocumentCreated => "document_created",
            Self::DocumentStatusChanged => "document_status_changed",
            Self::MessageAppended => "message_appended",
            Self::AssistantReplyFailed => "assistant_reply_failed",
            Self::PresenceChanged => "presence_changed",
        })
    }
}

/// Set of event kinds, stored as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventKinds(u8);

impl EventKinds {
    /// Every kind
    #[must_use]
    pub fn all() -> Self {
        EventKind::ALL.into_iter().collect()
    }

    /// Whether `kind` is in the set
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<EventKind> for EventKinds {
    fn from(kind: EventKind) -> Self {
        Self(kind.bit())
    }
}

impl FromIterator<EventKind> for EventKinds {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        Self(iter.into_iter().fold(0, |mask, kind| mask | kind.bit()))
    }
}

/// Event delivered through the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A document was ingested in `Queued` state
    DocumentCreated {
        /// Snapshot at creation
        document: Document,
    },
    /// A document changed status
    DocumentStatusChanged {
        /// Snapshot after the transition
        document: Document,
        /// Status before the transition
        previous: DocumentStatus,
    },
    /// A message was appended
    MessageAppended {
        /// Owning session
        session_id: SessionId,
        /// The appended message
        message: Message,
    },
    /// An assistant turn ended without a reply
    AssistantReplyFailed {
        /// Owning session
        session_id: SessionId,
        /// Failed turn
        turn: TurnId,
        /// Failure reason
        reason: String,
    },
    /// A participant joined or changed presence
    PresenceChanged {
        /// Owning session
        session_id: SessionId,
        /// Participant after the change
        participant: Participant,
    },
}

impl HubEvent {
    /// Kind of this event
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DocumentCreated { .. } => EventKind::DocumentCreated,
            Self::DocumentStatusChanged { .. } => EventKind::DocumentStatusChanged,
            Self::MessageAppended { .. } => EventKind::MessageAppended,
            Self::AssistantReplyFailed { .. } => EventKind::AssistantReplyFailed,
            Self::PresenceChanged { .. } => EventKind::PresenceChanged,
        }
    }

    /// Document the event is about, if any
    #[must_use]
    pub fn document_id(&self) -> Option<DocumentId> {
        match self {
            Self::DocumentCreated { document } | Self::DocumentStatusChanged { document, .. } => {
                Some(document.id())
            }
            _ => None,
        }
    }

    /// Session the event is about, if any
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::MessageAppended { session_id, .. }
            | Self::AssistantReplyFailed { session_id, .. }
            | Self::PresenceChanged { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}
