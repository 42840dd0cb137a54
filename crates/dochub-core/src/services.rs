//! Contracts of the external collaborators
//!
//! The analysis service and the assistant responder are opaque, asynchronous
//! and may fail. The pipeline and the chat sessions only see these traits.
//! [`CannedAnalysis`] and [`CannedResponder`] return fixed output after a
//! configurable latency; they stand in for real inference in demos.

use crate::error::{AnalysisFailure, AssistantFailure};
use crate::ids::DocumentId;
use crate::types::{Insights, MediaKind, Message};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Input to one analysis call
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Document being analyzed
    pub document_id: DocumentId,
    /// Display name
    pub name: String,
    /// Media kind
    pub media_kind: MediaKind,
    /// Raw content
    pub content: Arc<[u8]>,
}

/// Successful assistant response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    /// Reply text
    pub content: String,
}

impl AssistantReply {
    /// Create a reply
    #[inline]
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Produces insights for a document
///
/// Invoked at most once per ingested document.
#[async_trait]
pub trait AnalysisService: Send + Sync + Debug {
    /// Analyze the document content
    async fn analyze(&self, request: AnalysisRequest) -> Result<Insights, AnalysisFailure>;
}

/// Produces the assistant's next message
///
/// At most one call is outstanding per session.
#[async_trait]
pub trait AssistantResponder: Send + Sync + Debug {
    /// Reply to the conversation so far, oldest message first
    async fn reply(&self, history: Vec<Message>) -> Result<AssistantReply, AssistantFailure>;
}

/// Analysis service returning fixed insights
#[derive(Debug, Clone)]
pub struct CannedAnalysis {
    latency: Duration,
    insights: Insights,
}

impl CannedAnalysis {
    /// Fixed insights after `latency`
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            insights: Insights::new(
                "AI analysis completed successfully. Document processed and insights generated.",
            )
            .with_action_items([
                "Review AI-generated insights",
                "Share with relevant team members",
            ])
            .with_alerts(["No critical issues detected"]),
        }
    }

    /// Replace the canned insights
    #[must_use]
    pub fn with_insights(mut self, insights: Insights) -> Self {
        self.insights = insights;
        self
    }
}

impl Default for CannedAnalysis {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl AnalysisService for CannedAnalysis {
    async fn analyze(&self, request: AnalysisRequest) -> Result<Insights, AnalysisFailure> {
        if request.content.is_empty() {
            return Err(AnalysisFailure::new("document has no content"));
        }
        tokio::time::sleep(self.latency).await;
        Ok(self.insights.clone())
    }
}

/// Responder returning a fixed reply
#[derive(Debug, Clone)]
pub struct CannedResponder {
    latency: Duration,
    reply: String,
}

impl CannedResponder {
    /// Fixed reply after `latency`
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            reply: "I understand your query. Let me analyze the relevant documents and provide \
                    you with the most accurate information. Based on current data patterns, \
                    here are my recommendations..."
                .to_string(),
        }
    }

    /// Replace the canned reply
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }
}

impl Default for CannedResponder {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl AssistantResponder for CannedResponder {
    async fn reply(&self, history: Vec<Message>) -> Result<AssistantReply, AssistantFailure> {
        if history.is_empty() {
            return Err(AssistantFailure::new("nothing to reply to"));
        }
        tokio::time::sleep(self.latency).await;
        Ok(AssistantReply::new(self.reply.clone()))
    }
}
