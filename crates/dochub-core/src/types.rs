//! Core data model
//!
//! Defines the records owned by the pipeline and the chat sessions:
//! - Documents, their media kind, status and insights
//! - Chat messages and their authors
//! - Participants and presence
//!
//! Records are handed to observers by value. Only the owning component
//! calls the mutating methods on its own copy.

use crate::error::TransitionError;
use crate::ids::{DocumentId, MessageId, ParticipantId, SessionId};
use crate::state_machine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Media kind of an ingested document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// PDF documents
    Pdf,
    /// Word processor documents (doc, docx)
    Word,
    /// Plain text
    Text,
    /// Raster images (scanned invoices, photos)
    Image,
    /// Spreadsheets (xls, xlsx)
    Spreadsheet,
    /// Anything else
    Other,
}

impl MediaKind {
    /// Infer the kind from a MIME content type such as `application/pdf`
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime.starts_with("image/") {
            return Self::Image;
        }
        if mime.contains("spreadsheet") || mime.contains("excel") {
            return Self::Spreadsheet;
        }
        match mime.as_str() {
            "application/pdf" => Self::Pdf,
            "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Self::Word
            }
            "text/plain" => Self::Text,
            _ => Self::Other,
        }
    }

    /// Infer the kind from a file extension
    #[must_use]
    pub fn from_file_name(name: &str) -> Self {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("doc" | "docx") => Self::Word,
            Some("txt") => Self::Text,
            Some("jpg" | "jpeg" | "png") => Self::Image,
            Some("xls" | "xlsx") => Self::Spreadsheet,
            _ => Self::Other,
        }
    }

    /// Content type first, then the file name when the content type is
    /// missing or unrecognised
    #[must_use]
    pub fn infer(content_type: Option<&str>, file_name: &str) -> Self {
        match content_type.map(Self::from_content_type) {
            Some(kind) if kind != Self::Other => kind,
            _ => Self::from_file_name(file_name),
        }
    }

    /// Short lowercase label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Text => "text",
            Self::Image => "image",
            Self::Spreadsheet => "spreadsheet",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Accepted, analysis not started
    Queued,
    /// Analysis call outstanding
    Processing,
    /// Analysis succeeded; insights present
    Completed,
    /// Analysis failed or timed out
    Failed,
}

impl DocumentStatus {
    /// No automatic transition leaves a terminal state
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state
    #[inline]
    #[must_use]
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        state_machine::validate_transition(*self, next).is_ok()
    }

    /// Short lowercase label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Insights {
    /// Free-text summary
    pub summary: String,
    /// Follow-ups, in the order the service produced them
    pub action_items: Vec<String>,
    /// Warnings, in the order the service produced them
    pub alerts: Vec<String>,
}

impl Insights {
    /// Create insights with a summary and no items
    #[inline]
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            action_items: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// With action items
    #[must_use]
    pub fn with_action_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.action_items = items.into_iter().map(Into::into).collect();
        self
    }

    /// With alerts
    #[must_use]
    pub fn with_alerts<I, S>(mut self, alerts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alerts = alerts.into_iter().map(Into::into).collect();
        self
    }

    /// Number of alerts
    #[inline]
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    fn matches(&self, needle: &str) -> bool {
        contains_ci(&self.summary, needle)
            || self.action_items.iter().any(|item| contains_ci(item, needle))
            || self.alerts.iter().any(|alert| contains_ci(alert, needle))
    }
}

/// A document tracked by the pipeline
///
/// `insights` is present if and only if `status` is
/// [`DocumentStatus::Completed`]; the only way to set it is
/// [`Document::complete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    name: String,
    media_kind: MediaKind,
    size_bytes: u64,
    uploaded_at: DateTime<Utc>,
    status: DocumentStatus,
    insights: Option<Insights>,
    failure_reason: Option<String>,
}

impl Document {
    /// Create a queued document
    #[must_use]
    pub fn new(
        id: DocumentId,
        name: impl Into<String>,
        media_kind: MediaKind,
        size_bytes: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            media_kind,
            size_bytes,
            uploaded_at,
            status: DocumentStatus::Queued,
            insights: None,
            failure_reason: None,
        }
    }

    /// Document id
    #[inline]
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Display name, usually the file name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Media kind
    #[inline]
    #[must_use]
    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    /// Content size at ingestion
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Ingestion time
    #[inline]
    #[must_use]
    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.uploaded_at
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    /// Insights, present only once completed
    #[inline]
    #[must_use]
    pub fn insights(&self) -> Option<&Insights> {
        self.insights.as_ref()
    }

    /// Failure reason, present only once failed
    #[inline]
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Whether the document reached `Completed` or `Failed`
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Queued -> Processing`
    ///
    /// # Errors
    /// `TransitionError` when the document is not queued.
    pub fn start_processing(&mut self) -> Result<DocumentStatus, TransitionError> {
        self.transition(DocumentStatus::Processing)
    }

    /// `Processing -> Completed`, storing the insights
    ///
    /// # Errors
    /// `TransitionError` when the document is not processing.
    pub fn complete(&mut self, insights: Insights) -> Result<DocumentStatus, TransitionError> {
        let previous = self.transition(DocumentStatus::Completed)?;
        self.insights = Some(insights);
        Ok(previous)
    }

    /// `Processing -> Failed`, recording the reason
    ///
    /// # Errors
    /// `TransitionError` when the document is not processing.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<DocumentStatus, TransitionError> {
        let previous = self.transition(DocumentStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(previous)
    }

    /// Case-insensitive match on name and insights
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        contains_ci(&self.name, &needle)
            || self.insights.as_ref().is_some_and(|i| i.matches(&needle))
    }

    fn transition(&mut self, next: DocumentStatus) -> Result<DocumentStatus, TransitionError> {
        state_machine::validate_transition(self.status, next)?;
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }
}

/// Who wrote a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "participant", rename_all = "snake_case")]
pub enum Author {
    /// A human participant
    Human(ParticipantId),
    /// The automated responder
    Assistant,
}

impl Author {
    /// Human author shortcut
    #[inline]
    #[must_use]
    pub fn human(id: impl Into<String>) -> Self {
        Self::Human(ParticipantId::new(id))
    }

    /// Whether this is the assistant
    #[inline]
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant)
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human(id) => write!(f, "{id}"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One entry in a session's append-only log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: MessageId,
    /// Owning session
    pub session_id: SessionId,
    /// Position in the session log, starting at 0
    pub sequence: u64,
    /// Author
    pub author: Author,
    /// Text content
    pub content: String,
    /// Append time, strictly increasing within a session
    pub sent_at: DateTime<Utc>,
}

/// Participant presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Connected and active
    #[default]
    Online,
    /// Connected, idle
    Away,
    /// Disconnected
    Offline,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        })
    }
}

/// A human member of a chat session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant id
    pub id: ParticipantId,
    /// Name shown next to messages
    pub display_name: String,
    /// Current presence
    pub presence: Presence,
}

impl Participant {
    /// Create an online participant
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
            presence: Presence::Online,
        }
    }

    /// Two-letter initials used as avatar fallback
    #[must_use]
    pub fn initials(&self) -> String {
        self.display_name
            .split_whitespace()
            .filter_map(|part| part.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect()
    }
}

fn contains_ci(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_lowercase().contains(lowered_needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdGenerator;
    use pretty_assertions::assert_eq;

    fn queued() -> Document {
        Document::new(
            IdGenerator::new().next_document_id(),
            "report.pdf",
            MediaKind::Pdf,
            1024,
            Utc::now(),
        )
    }

    #[test]
    fn media_kind_from_content_type() {
        assert_eq!(MediaKind::from_content_type("application/pdf"), MediaKind::Pdf);
        assert_eq!(MediaKind::from_content_type("image/jpeg"), MediaKind::Image);
        assert_eq!(
            MediaKind::from_content_type(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            MediaKind::Spreadsheet
        );
        assert_eq!(MediaKind::from_content_type("application/vnd.ms-excel"), MediaKind::Spreadsheet);
        assert_eq!(MediaKind::from_content_type("text/plain; charset=utf-8"), MediaKind::Text);
        assert_eq!(MediaKind::from_content_type("application/zip"), MediaKind::Other);
    }

    #[test]
    fn media_kind_falls_back_to_extension() {
        assert_eq!(MediaKind::infer(None, "Q4 Maintenance.DOCX"), MediaKind::Word);
        assert_eq!(
            MediaKind::infer(Some("application/octet-stream"), "invoice.png"),
            MediaKind::Image
        );
        assert_eq!(MediaKind::infer(Some("application/pdf"), "notes.txt"), MediaKind::Pdf);
        assert_eq!(MediaKind::infer(None, "archive"), MediaKind::Other);
    }

    #[test]
    fn new_document_is_queued_without_insights() {
        let doc = queued();
        assert_eq!(doc.status(), DocumentStatus::Queued);
        assert!(doc.insights().is_none());
        assert!(!doc.is_terminal());
    }

    #[test]
    fn complete_stores_insights() {
        let mut doc = queued();
        doc.start_processing().unwrap();
        let insights = Insights::new("S").with_action_items(["A1", "A2"]);
        let previous = doc.complete(insights.clone()).unwrap();

        assert_eq!(previous, DocumentStatus::Processing);
        assert_eq!(doc.status(), DocumentStatus::Completed);
        assert_eq!(doc.insights(), Some(&insights));
    }

    #[test]
    fn terminal_document_rejects_further_transitions() {
        let mut doc = queued();
        doc.start_processing().unwrap();
        doc.fail("service unavailable").unwrap();

        assert!(doc.complete(Insights::new("late")).is_err());
        assert!(doc.start_processing().is_err());
        assert_eq!(doc.status(), DocumentStatus::Failed);
        assert!(doc.insights().is_none());
        assert_eq!(doc.failure_reason(), Some("service unavailable"));
    }

    #[test]
    fn queued_document_cannot_complete_directly() {
        let mut doc = queued();
        assert!(doc.complete(Insights::new("S")).is_err());
        assert_eq!(doc.status(), DocumentStatus::Queued);
        assert!(doc.insights().is_none());
    }

    #[test]
    fn document_search_covers_insights() {
        let mut doc = queued();
        doc.start_processing().unwrap();
        doc.complete(Insights::new("Uptime 98.7%").with_alerts(["Escalator #12 needs attention"]))
            .unwrap();

        assert!(doc.matches("REPORT"));
        assert!(doc.matches("escalator"));
        assert!(!doc.matches("monsoon"));
        assert!(!doc.matches("   "));
    }

    #[test]
    fn participant_initials() {
        assert_eq!(Participant::new("u1", "Rahul Mehta").initials(), "RM");
        assert_eq!(Participant::new("u2", "maya").initials(), "M");
    }

    #[test]
    fn author_serializes_with_tag() {
        let json = serde_json::to_string(&Author::human("u1")).unwrap();
        assert_eq!(json, r#"{"kind":"human","participant":"u1"}"#);
        let json = serde_json::to_string(&Author::Assistant).unwrap();
        assert_eq!(json, r#"{"kind":"assistant"}"#);
    }
}
