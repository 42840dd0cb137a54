//! Aggregate figures over the document store

use dochub_core::{Document, DocumentStatus};
use serde::Serialize;

/// Document counts per status plus insight totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Documents ingested
    pub total: usize,
    /// Waiting for analysis
    pub queued: usize,
    /// Analysis outstanding
    pub processing: usize,
    /// Analysis succeeded
    pub completed: usize,
    /// Analysis failed or timed out
    pub failed: usize,
    /// Action items across completed documents
    pub action_items: usize,
    /// Alerts across completed documents
    pub alerts: usize,
}

impl PipelineStats {
    pub(crate) fn record(&mut self, document: &Document) {
        self.total += 1;
        match document.status() {
            DocumentStatus::Queued => self.queued += 1,
            DocumentStatus::Processing => self.processing += 1,
            DocumentStatus::Completed => self.completed += 1,
            DocumentStatus::Failed => self.failed += 1,
        }
        if let Some(insights) = document.insights() {
            self.action_items += insights.action_items.len();
            self.alerts += insights.alert_count();
        }
    }

    /// Documents not yet in a terminal state
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queued + self.processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dochub_core::{IdGenerator, Insights, MediaKind};

    fn document() -> Document {
        Document::new(
            IdGenerator::new().next_document_id(),
            "q3.xlsx",
            MediaKind::Spreadsheet,
            10,
            Utc::now(),
        )
    }

    #[test]
    fn counts_each_status_and_insight_totals() {
        let queued = document();

        let mut processing = document();
        processing.start_processing().unwrap();

        let mut completed = document();
        completed.start_processing().unwrap();
        completed
            .complete(Insights::new("S").with_action_items(["A1", "A2"]).with_alerts(["X"]))
            .unwrap();

        let mut failed = document();
        failed.start_processing().unwrap();
        failed.fail("boom").unwrap();

        let mut stats = PipelineStats::default();
        for doc in [&queued, &processing, &completed, &failed] {
            stats.record(doc);
        }

        assert_eq!(
            stats,
            PipelineStats {
                total: 4,
                queued: 1,
                processing: 1,
                completed: 1,
                failed: 1,
                action_items: 2,
                alerts: 1,
            }
        );
        assert_eq!(stats.in_flight(), 2);
    }
}
