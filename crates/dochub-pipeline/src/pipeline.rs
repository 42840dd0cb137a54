//! Document pipeline
//!
//! Owns every [`Document`] record. A document is created `Queued`, moved to
//! `Processing` by a background task that then calls the analysis service,
//! and settles as `Completed` or `Failed` when the result arrives through
//! [`DocumentPipeline::on_analysis_result`].
//!
//! Each record sits behind its own mutex; a transition and the event that
//! announces it happen under that mutex, so observers see one document's
//! history in transition order. Different documents never contend.

use crate::stats::PipelineStats;
use dashmap::DashMap;
use dochub_core::{
    AnalysisFailure, AnalysisRequest, AnalysisService, CallbackOutcome, Clock, Document,
    DocumentId, DocumentStatus, EventBus, EventKind, HubError, HubEvent, IdGenerator,
    IgnoreReason, Insights, MediaKind, PipelineConfig, Result, Scheduler, SystemClock,
    TokioScheduler, TransitionError,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::Instrument;

type Entry = Arc<Mutex<Document>>;

struct PipelineInner {
    config: PipelineConfig,
    analysis: Arc<dyn AnalysisService>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    ids: Arc<IdGenerator>,
    documents: DashMap<DocumentId, Entry>,
    /// Ingestion order, oldest first
    order: RwLock<Vec<DocumentId>>,
}

/// Ingests documents and tracks their analysis
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct DocumentPipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for DocumentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentPipeline")
            .field("documents", &self.inner.documents.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DocumentPipeline`]
#[derive(Debug)]
pub struct PipelineBuilder {
    analysis: Arc<dyn AnalysisService>,
    bus: EventBus,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    ids: Arc<IdGenerator>,
}

impl PipelineBuilder {
    /// Pipeline settings
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for `uploaded_at`
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where analysis tasks run
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Share an id generator with other components
    #[must_use]
    pub fn id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> DocumentPipeline {
        DocumentPipeline {
            inner: Arc::new(PipelineInner {
                config: self.config,
                analysis: self.analysis,
                bus: self.bus,
                clock: self.clock,
                scheduler: self.scheduler,
                ids: self.ids,
                documents: DashMap::new(),
                order: RwLock::new(Vec::new()),
            }),
        }
    }
}

impl DocumentPipeline {
    /// Pipeline with default settings, wall clock and tokio scheduler
    #[must_use]
    pub fn new(analysis: Arc<dyn AnalysisService>, bus: EventBus) -> Self {
        Self::builder(analysis, bus).build()
    }

    /// Start building a pipeline
    #[must_use]
    pub fn builder(analysis: Arc<dyn AnalysisService>, bus: EventBus) -> PipelineBuilder {
        PipelineBuilder {
            analysis,
            bus,
            config: PipelineConfig::default(),
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            ids: Arc::new(IdGenerator::new()),
        }
    }

    /// Register a document and start its analysis in the background
    ///
    /// Returns as soon as the `Queued` record exists and `DocumentCreated`
    /// has been published.
    ///
    /// # Errors
    /// `HubError::InvalidInput` for a blank name, empty content or content
    /// larger than `max_content_bytes`. Nothing is stored in that case.
    pub fn ingest(
        &self,
        name: impl Into<String>,
        media_kind: MediaKind,
        content: impl Into<Arc<[u8]>>,
    ) -> Result<DocumentId> {
        let name = name.into();
        let content = content.into();
        self.validate(&name, &content)?;

        let id = self.inner.ids.next_document_id();
        let document = Document::new(
            id,
            name.trim(),
            media_kind,
            content.len() as u64,
            self.inner.clock.now(),
        );
        let entry: Entry = Arc::new(Mutex::new(document));

        {
            let document = entry.lock();
            self.inner.documents.insert(id, Arc::clone(&entry));
            self.inner.order.write().push(id);
            self.inner.bus.publish(HubEvent::DocumentCreated {
                document: document.clone(),
            });
            tracing::info!(
                document_id = %id,
                name = document.name(),
                media_kind = %media_kind,
                size_bytes = content.len(),
                "document ingested"
            );
        }

        let request = AnalysisRequest {
            document_id: id,
            name: name.trim().to_string(),
            media_kind,
            content,
        };
        let pipeline = self.clone();
        self.inner.scheduler.spawn_after(
            self.inner.config.queue_delay(),
            Box::pin(async move { pipeline.run_analysis(request).await }),
        );

        Ok(id)
    }

    /// Like [`ingest`](Self::ingest), inferring the media kind from the
    /// upload's content type or, failing that, its file name
    ///
    /// # Errors
    /// See [`ingest`](Self::ingest).
    pub fn ingest_upload(
        &self,
        name: impl Into<String>,
        content_type: Option<&str>,
        content: impl Into<Arc<[u8]>>,
    ) -> Result<DocumentId> {
        let name = name.into();
        let media_kind = MediaKind::infer(content_type, &name);
        self.ingest(name, media_kind, content)
    }

    /// Apply the analysis outcome for `id`
    ///
    /// Unknown ids and documents already `Completed` or `Failed` are left
    /// untouched. A document still `Queued` is moved through `Processing`
    /// first so its history stays linear.
    pub fn on_analysis_result(
        &self,
        id: DocumentId,
        result: std::result::Result<Insights, AnalysisFailure>,
    ) -> CallbackOutcome {
        let Some(entry) = self.entry(id) else {
            tracing::warn!(document_id = %id, "analysis result for unknown document ignored");
            return CallbackOutcome::Ignored(IgnoreReason::UnknownDocument);
        };

        let mut document = entry.lock();
        if document.is_terminal() {
            tracing::warn!(
                document_id = %id,
                status = %document.status(),
                "late analysis result ignored"
            );
            return CallbackOutcome::Ignored(IgnoreReason::AlreadyTerminal(document.status()));
        }

        if document.status() == DocumentStatus::Queued {
            self.apply(&mut document, Document::start_processing);
        }

        match result {
            Ok(insights) => {
                let action_items = insights.action_items.len();
                let alerts = insights.alert_count();
                if self.apply(&mut document, |doc| doc.complete(insights)) {
                    tracing::info!(document_id = %id, action_items, alerts, "analysis completed");
                }
            }
            Err(failure) => {
                if self.apply(&mut document, |doc| doc.fail(failure.reason.clone())) {
                    tracing::info!(document_id = %id, reason = %failure.reason, "analysis failed");
                }
            }
        }
        CallbackOutcome::Applied
    }

    /// Snapshot of one document
    ///
    /// # Errors
    /// `HubError::DocumentNotFound` for an unknown id.
    pub fn get(&self, id: DocumentId) -> Result<Document> {
        self.entry(id)
            .map(|entry| entry.lock().clone())
            .ok_or(HubError::DocumentNotFound(id))
    }

    /// Every document, most recently ingested first
    #[must_use]
    pub fn list(&self) -> Vec<Document> {
        self.snapshots(|_| true)
    }

    /// Documents whose name or insights contain `query`, case-insensitively,
    /// most recently ingested first
    ///
    /// A blank query matches nothing.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Document> {
        self.snapshots(|doc| doc.matches(query))
    }

    /// Counts per status and insight totals
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let entries: Vec<Entry> = self
            .inner
            .documents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats = PipelineStats::default();
        for entry in entries {
            stats.record(&entry.lock());
        }
        stats
    }

    /// Number of documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.documents.len()
    }

    /// Whether nothing was ingested yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.documents.is_empty()
    }

    /// Bus the pipeline publishes to
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Wait until the document is `Completed` or `Failed`
    ///
    /// # Errors
    /// `HubError::DocumentNotFound` for an unknown id.
    pub async fn settled(&self, id: DocumentId) -> Result<Document> {
        let mut changes = self.inner.bus.subscribe(EventKind::DocumentStatusChanged);
        let current = self.get(id)?;
        if current.is_terminal() {
            return Ok(current);
        }
        while let Some(event) = changes.recv().await {
            if let HubEvent::DocumentStatusChanged { document, .. } = event {
                if document.id() == id && document.is_terminal() {
                    return Ok(document);
                }
            }
            // The mailbox drops oldest first, so our terminal event may have
            // been evicted by the one just received.
            let current = self.get(id)?;
            if current.is_terminal() {
                return Ok(current);
            }
        }
        // Bus closed; report whatever the store holds
        self.get(id)
    }

    fn validate(&self, name: &str, content: &[u8]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(HubError::invalid_input("document name is empty"));
        }
        if content.is_empty() {
            return Err(HubError::invalid_input("document content is empty"));
        }
        let max = self.inner.config.max_content_bytes;
        if content.len() > max {
            return Err(HubError::invalid_input(format!(
                "document is {} bytes, limit is {max}",
                content.len()
            )));
        }
        Ok(())
    }

    fn entry(&self, id: DocumentId) -> Option<Entry> {
        self.inner
            .documents
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn snapshots(&self, mut keep: impl FnMut(&Document) -> bool) -> Vec<Document> {
        let order = self.inner.order.read();
        order
            .iter()
            .rev()
            .filter_map(|id| self.entry(*id))
            .filter_map(|entry| {
                let document = entry.lock();
                keep(&document).then(|| document.clone())
            })
            .collect()
    }

    /// Run one transition and publish it; caller holds the document lock
    fn apply(
        &self,
        document: &mut Document,
        transition: impl FnOnce(&mut Document) -> std::result::Result<DocumentStatus, TransitionError>,
    ) -> bool {
        match transition(document) {
            Ok(previous) => {
                tracing::debug!(
                    document_id = %document.id(),
                    from = %previous,
                    to = %document.status(),
                    "document transitioned"
                );
                self.inner.bus.publish(HubEvent::DocumentStatusChanged {
                    document: document.clone(),
                    previous,
                });
                true
            }
            Err(e) => {
                tracing::warn!(document_id = %document.id(), error = %e, "transition rejected");
                false
            }
        }
    }

    /// Move to `Processing`; `false` when the document already settled
    fn begin_processing(&self, id: DocumentId) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut document = entry.lock();
        match document.status() {
            DocumentStatus::Queued => self.apply(&mut document, Document::start_processing),
            DocumentStatus::Processing => true,
            DocumentStatus::Completed | DocumentStatus::Failed => {
                tracing::debug!(document_id = %id, "document settled before analysis started");
                false
            }
        }
    }

    async fn run_analysis(self, request: AnalysisRequest) {
        let id = request.document_id;
        let span = tracing::info_span!("analysis", document_id = %id);

        async move {
            if !self.begin_processing(id) {
                return;
            }
            tracing::info!("analysis started");

            let analysis = Arc::clone(&self.inner.analysis);
            let result = match self.inner.config.analysis_timeout() {
                Some(limit) => tokio::time::timeout(limit, analysis.analyze(request))
                    .await
                    .unwrap_or_else(|_| {
                        tracing::warn!(
                            timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                            "analysis timed out"
                        );
                        Err(AnalysisFailure::timed_out(limit))
                    }),
                None => analysis.analyze(request).await,
            };

            self.on_analysis_result(id, result);
        }
        .instrument(span)
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dochub_test_utils::{sample_insights, HangingAnalysis, ManualClock};
    use pretty_assertions::assert_eq;

    fn pipeline() -> DocumentPipeline {
        DocumentPipeline::builder(Arc::new(HangingAnalysis), EventBus::default())
            .clock(Arc::new(ManualClock::default()))
            .config(PipelineConfig::default().with_max_content_bytes(16))
            .build()
    }

    #[tokio::test]
    async fn ingest_creates_queued_record() {
        let pipeline = pipeline();
        let id = pipeline.ingest("report.pdf", MediaKind::Pdf, b"content".to_vec()).unwrap();

        let document = pipeline.get(id).unwrap();
        assert_eq!(document.status(), DocumentStatus::Queued);
        assert_eq!(document.name(), "report.pdf");
        assert_eq!(document.size_bytes(), 7);
        assert_eq!(document.uploaded_at(), ManualClock::default().now());
        assert!(document.insights().is_none());
    }

    #[tokio::test]
    async fn ingest_rejects_bad_input() {
        let pipeline = pipeline();

        for (name, content) in [("  ", &b"x"[..]), ("a.txt", &b""[..]), ("big.txt", &[0u8; 17][..])] {
            let err = pipeline.ingest(name, MediaKind::Text, content.to_vec()).unwrap_err();
            assert!(matches!(err, HubError::InvalidInput(_)), "{name}: {err}");
        }
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.bus().stats().published, 0);
    }

    #[tokio::test]
    async fn ingest_upload_infers_media_kind() {
        let pipeline = pipeline();
        let by_type = pipeline
            .ingest_upload("scan", Some("image/png"), b"px".to_vec())
            .unwrap();
        let by_name = pipeline.ingest_upload("notes.docx", None, b"w".to_vec()).unwrap();

        assert_eq!(pipeline.get(by_type).unwrap().media_kind(), MediaKind::Image);
        assert_eq!(pipeline.get(by_name).unwrap().media_kind(), MediaKind::Word);
    }

    #[tokio::test]
    async fn list_is_most_recent_first() {
        let pipeline = pipeline();
        let ids: Vec<_> = ["a.txt", "b.txt", "c.txt"]
            .into_iter()
            .map(|name| pipeline.ingest(name, MediaKind::Text, b"x".to_vec()).unwrap())
            .collect();

        let listed: Vec<_> = pipeline.list().iter().map(Document::id).collect();
        assert_eq!(listed, ids.into_iter().rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let pipeline = pipeline();
        let stray = IdGenerator::new().next_document_id();
        assert!(matches!(pipeline.get(stray), Err(HubError::DocumentNotFound(id)) if id == stray));
    }

    #[tokio::test]
    async fn result_for_unknown_document_is_ignored() {
        let pipeline = pipeline();
        let stray = IdGenerator::new().next_document_id();
        assert_eq!(
            pipeline.on_analysis_result(stray, Ok(sample_insights())),
            CallbackOutcome::Ignored(IgnoreReason::UnknownDocument)
        );
    }

    #[tokio::test]
    async fn result_on_queued_document_passes_through_processing() {
        let pipeline = pipeline();
        let mut changes = pipeline.bus().subscribe(EventKind::DocumentStatusChanged);
        let id = pipeline.ingest("a.txt", MediaKind::Text, b"x".to_vec()).unwrap();

        assert!(pipeline.on_analysis_result(id, Ok(sample_insights())).is_applied());

        let statuses: Vec<_> = changes
            .drain()
            .into_iter()
            .map(|event| match event {
                HubEvent::DocumentStatusChanged { document, previous } => (previous, document.status()),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                (DocumentStatus::Queued, DocumentStatus::Processing),
                (DocumentStatus::Processing, DocumentStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn search_and_stats() {
        let pipeline = pipeline();
        let report = pipeline.ingest("Q3 Report.pdf", MediaKind::Pdf, b"x".to_vec()).unwrap();
        let memo = pipeline.ingest("memo.txt", MediaKind::Text, b"x".to_vec()).unwrap();
        pipeline.on_analysis_result(memo, Ok(Insights::new("budget review").with_alerts(["late"])));

        assert_eq!(pipeline.search("report").iter().map(Document::id).collect::<Vec<_>>(), vec![report]);
        assert_eq!(pipeline.search("BUDGET").iter().map(Document::id).collect::<Vec<_>>(), vec![memo]);
        assert!(pipeline.search("  ").is_empty());

        let stats = pipeline.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.alerts, 1);
    }
}
