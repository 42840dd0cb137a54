//! Identifiers and the identifier generator
//!
//! Documents, messages and sessions are keyed by ULIDs so that ids sort by
//! creation time. [`IdGenerator`] hands out strictly increasing ULIDs even when
//! many are requested within the same millisecond.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use ulid::{Generator, Ulid};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Wrap an existing ULID
            #[inline]
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map(Self)
            }
        }
    };
}

ulid_id!(
    /// Unique document identifier
    DocumentId
);
ulid_id!(
    /// Unique chat message identifier
    MessageId
);
ulid_id!(
    /// Unique chat session identifier
    SessionId
);

/// Participant identifier, owned by the identity provider outside this core
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create a participant id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Sequence number of one assistant turn within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Handle returned by [`crate::bus::EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Monotonic id source shared by the pipeline and the chat sessions
///
/// Backed by [`ulid::Generator`], which increments the random component
/// when two ids fall into the same millisecond.
pub struct IdGenerator {
    generator: Mutex<Generator>,
    issued: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            generator: Mutex::new(Generator::new()),
            issued: AtomicU64::new(0),
        }
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("issued", &self.issued())
            .finish_non_exhaustive()
    }
}

impl IdGenerator {
    /// Create a new generator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next document id
    pub fn next_document_id(&self) -> DocumentId {
        DocumentId(self.next_ulid())
    }

    /// Next message id
    pub fn next_message_id(&self) -> MessageId {
        MessageId(self.next_ulid())
    }

    /// Next session id
    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_ulid())
    }

    /// Number of ids handed out so far
    #[inline]
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    fn next_ulid(&self) -> Ulid {
        let mut generator = self.generator.lock();
        let ulid = match generator.generate() {
            Ok(ulid) => ulid,
            Err(err) => {
                // Random component exhausted within one millisecond; the
                // generator recovers on the next tick.
                tracing::warn!(error = %err, "ulid generator overflow, falling back to fresh ulid");
                Ulid::new()
            }
        };
        self.issued.fetch_add(1, Ordering::Relaxed);
        ulid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generator_ids_are_strictly_increasing() {
        let ids = IdGenerator::new();
        let mut previous = ids.next_document_id();
        for _ in 0..1_000 {
            let next = ids.next_document_id();
            assert!(next > previous, "{next} should sort after {previous}");
            previous = next;
        }
        assert_eq!(ids.issued(), 1_001);
    }

    #[test]
    fn generator_ids_are_unique_across_threads() {
        let ids = std::sync::Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| ids.next_message_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 1_000);
    }

    #[test]
    fn document_id_round_trips_through_display() {
        let id = IdGenerator::new().next_document_id();
        let parsed: DocumentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
