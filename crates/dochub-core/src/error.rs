//! Error types for DocHub
//!
//! Synchronous validation errors are returned to the caller as [`HubError`].
//! Failures of the asynchronous collaborators ([`AnalysisFailure`],
//! [`AssistantFailure`]) never surface through an unrelated call stack; they
//! end up in document state or on the event stream. Late or repeated
//! callbacks are reported as [`CallbackOutcome::Ignored`].

use crate::ids::{DocumentId, ParticipantId, SessionId, TurnId};
use crate::types::DocumentStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result alias for synchronous hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Main DocHub error type
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Empty or malformed input; nothing was mutated
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown document id
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Unknown session id
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Unknown participant id
    #[error("participant not found: {0}")]
    ParticipantNotFound(ParticipantId),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl HubError {
    /// Create an invalid input error
    #[inline]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Caller-side faults that a retry with the same input will not fix
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::DocumentNotFound(_)
                | Self::SessionNotFound(_)
                | Self::ParticipantNotFound(_)
        )
    }

    /// Whether this is a lookup miss
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound(_) | Self::SessionNotFound(_) | Self::ParticipantNotFound(_)
        )
    }
}

/// Illegal document status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    /// Current status
    pub from: DocumentStatus,
    /// Requested status
    pub to: DocumentStatus,
}

/// Failure reported by the analysis service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("analysis failed: {reason}")]
pub struct AnalysisFailure {
    /// Human-readable reason
    pub reason: String,
}

impl AnalysisFailure {
    /// Create a failure with a reason
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Failure produced when the bounded wait elapses
    #[must_use]
    pub fn timed_out(after: Duration) -> Self {
        Self::new(format!("analysis timed out after {}ms", after.as_millis()))
    }
}

/// Failure reported by the assistant responder
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("assistant failed: {reason}")]
pub struct AssistantFailure {
    /// Human-readable reason
    pub reason: String,
}

impl AssistantFailure {
    /// Create a failure with a reason
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Failure produced when the bounded wait elapses
    #[must_use]
    pub fn timed_out(after: Duration) -> Self {
        Self::new(format!("assistant reply timed out after {}ms", after.as_millis()))
    }
}

/// What a completion callback did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The callback changed state and published an event
    Applied,
    /// Duplicate or late callback; state untouched
    Ignored(IgnoreReason),
}

impl CallbackOutcome {
    /// Whether the callback changed state
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Why a callback was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No document with that id
    UnknownDocument,
    /// Document already `Completed` or `Failed`
    AlreadyTerminal(DocumentStatus),
    /// Session has no outstanding assistant call
    NoPendingTurn,
    /// Reply belongs to an earlier turn
    StaleTurn {
        /// Turn currently outstanding
        pending: TurnId,
        /// Turn named by the callback
        received: TurnId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdGenerator;

    #[test]
    fn client_error_classification() {
        assert!(HubError::invalid_input("empty").is_client_error());
        assert!(HubError::DocumentNotFound(IdGenerator::new().next_document_id()).is_not_found());
        assert!(!HubError::Config("bad".into()).is_client_error());
    }

    #[test]
    fn timeout_failures_mention_duration() {
        let failure = AnalysisFailure::timed_out(Duration::from_millis(1500));
        assert_eq!(failure.reason, "analysis timed out after 1500ms");
        assert_eq!(
            AssistantFailure::timed_out(Duration::from_secs(2)).to_string(),
            "assistant failed: assistant reply timed out after 2000ms"
        );
    }

    #[test]
    fn transition_error_display() {
        let err = TransitionError {
            from: DocumentStatus::Completed,
            to: DocumentStatus::Processing,
        };
        assert_eq!(err.to_string(), "illegal transition completed -> processing");
    }
}
