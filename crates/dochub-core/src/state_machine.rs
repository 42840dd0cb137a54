//! Document status transition table

use crate::error::TransitionError;
use crate::types::DocumentStatus;

/// Validates a document status transition.
///
/// `Queued -> Processing -> {Completed, Failed}`; terminal states have no
/// successors.
pub fn validate_transition(from: DocumentStatus, to: DocumentStatus) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Legal successors of `from`.
#[must_use]
pub fn allowed_transitions(from: DocumentStatus) -> &'static [DocumentStatus] {
    match from {
        DocumentStatus::Queued => &[DocumentStatus::Processing],
        DocumentStatus::Processing => &[DocumentStatus::Completed, DocumentStatus::Failed],
        DocumentStatus::Completed | DocumentStatus::Failed => &[],
    }
}
