//! Pipeline lifecycle tests
//!
//! Run with: cargo test -p dochub-pipeline --test pipeline_tests

use dochub_core::{
    AnalysisFailure, CallbackOutcome, Document, DocumentStatus, EventBus, EventKind, HubEvent,
    IgnoreReason, Insights, MediaKind, PipelineConfig,
};
use dochub_pipeline::DocumentPipeline;
use dochub_test_utils::{
    collect_events, sample_insights, GatedAnalysis, HangingAnalysis, InstantAnalysis,
    ManualScheduler, EVENT_TIMEOUT,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn status_path(events: &[HubEvent]) -> Vec<DocumentStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            HubEvent::DocumentCreated { document } => Some(document.status()),
            HubEvent::DocumentStatusChanged { document, .. } => Some(document.status()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn report_is_analyzed_to_completion() {
    let analysis = GatedAnalysis::new();
    let pipeline = DocumentPipeline::new(analysis.clone(), EventBus::default());
    let mut events = pipeline.bus().subscribe_all();

    let id = pipeline.ingest("report.pdf", MediaKind::Pdf, b"%PDF-1.7".to_vec()).unwrap();
    assert_eq!(pipeline.get(id).unwrap().status(), DocumentStatus::Queued);

    analysis.wait_for_outstanding(1).await;
    assert_eq!(pipeline.get(id).unwrap().status(), DocumentStatus::Processing);

    assert!(analysis.resolve(id, Ok(sample_insights())));
    let document = pipeline.settled(id).await.unwrap();

    assert_eq!(document.status(), DocumentStatus::Completed);
    let insights = document.insights().unwrap();
    assert_eq!(insights.summary, "S");
    assert_eq!(insights.action_items, vec!["A1".to_string(), "A2".to_string()]);
    assert!(insights.alerts.is_empty());

    let seen = collect_events(&mut events, 3).await;
    assert_eq!(
        status_path(&seen),
        vec![DocumentStatus::Queued, DocumentStatus::Processing, DocumentStatus::Completed]
    );
    assert_eq!(analysis.calls(), 1);
}

#[tokio::test]
async fn failure_is_terminal_and_stale_success_is_ignored() {
    let analysis = GatedAnalysis::new();
    let pipeline = DocumentPipeline::new(analysis.clone(), EventBus::default());

    let id = pipeline.ingest("scan.png", MediaKind::Image, b"png".to_vec()).unwrap();
    analysis.wait_for_outstanding(1).await;
    analysis.resolve(id, Err(AnalysisFailure::new("unreadable")));

    let document = pipeline.settled(id).await.unwrap();
    assert_eq!(document.status(), DocumentStatus::Failed);
    assert_eq!(document.failure_reason(), Some("unreadable"));
    assert!(document.insights().is_none());

    let outcome = pipeline.on_analysis_result(id, Ok(sample_insights()));
    assert_eq!(
        outcome,
        CallbackOutcome::Ignored(IgnoreReason::AlreadyTerminal(DocumentStatus::Failed))
    );
    let document = pipeline.get(id).unwrap();
    assert_eq!(document.status(), DocumentStatus::Failed);
    assert!(document.insights().is_none());
}

#[tokio::test]
async fn duplicate_success_applies_once() {
    let analysis = GatedAnalysis::new();
    let pipeline = DocumentPipeline::new(analysis.clone(), EventBus::default());
    let mut changes = pipeline.bus().subscribe(EventKind::DocumentStatusChanged);

    let id = pipeline.ingest("notes.txt", MediaKind::Text, b"hello".to_vec()).unwrap();
    analysis.wait_for_outstanding(1).await;
    analysis.resolve(id, Ok(sample_insights()));
    let first = pipeline.settled(id).await.unwrap();

    let again = pipeline.on_analysis_result(id, Ok(Insights::new("other")));
    assert!(!again.is_applied());

    assert_eq!(pipeline.get(id).unwrap(), first);
    // Processing + Completed, nothing for the duplicate
    assert_eq!(changes.drain().len(), 2);
}

#[tokio::test]
async fn identical_success_delivered_twice_applies_once() {
    let analysis = GatedAnalysis::new();
    let pipeline = DocumentPipeline::new(analysis.clone(), EventBus::default());
    let mut changes = pipeline.bus().subscribe(EventKind::DocumentStatusChanged);

    let id = pipeline.ingest("invoice.pdf", MediaKind::Pdf, b"x".to_vec()).unwrap();
    analysis.wait_for_outstanding(1).await;
    assert_eq!(analysis.resolve_next(Ok(sample_insights())), Some(id));
    let first = pipeline.settled(id).await.unwrap();

    assert_eq!(
        pipeline.on_analysis_result(id, Ok(sample_insights())),
        CallbackOutcome::Ignored(IgnoreReason::AlreadyTerminal(DocumentStatus::Completed))
    );
    assert_eq!(pipeline.get(id).unwrap(), first);
    assert_eq!(first.insights(), Some(&sample_insights()));
    assert_eq!(changes.drain().len(), 2);
}

#[tokio::test]
async fn settled_returns_when_its_event_was_evicted() {
    let scheduler = ManualScheduler::new();
    let pipeline = DocumentPipeline::builder(InstantAnalysis::new(), EventBus::new(1))
        .scheduler(scheduler.clone())
        .build();
    let first = pipeline.ingest("first.txt", MediaKind::Text, b"x".to_vec()).unwrap();
    pipeline.ingest("second.txt", MediaKind::Text, b"x".to_vec()).unwrap();

    let waiter = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.settled(first).await })
    };
    tokio::task::yield_now().await;

    // Both documents settle before the waiter runs again; its one-slot
    // mailbox only keeps the second document's last event.
    assert_eq!(scheduler.run_all().await, 2);
    assert_eq!(pipeline.get(first).unwrap().status(), DocumentStatus::Completed);

    let document = tokio::time::timeout(EVENT_TIMEOUT, waiter)
        .await
        .expect("settled should notice the stored terminal state")
        .unwrap()
        .unwrap();
    assert_eq!(document.id(), first);
    assert_eq!(document.status(), DocumentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn unanswered_analysis_times_out() {
    let pipeline = DocumentPipeline::builder(Arc::new(HangingAnalysis), EventBus::default())
        .config(PipelineConfig::default().with_analysis_timeout(Duration::from_millis(50)))
        .build();

    let id = pipeline.ingest("slow.pdf", MediaKind::Pdf, b"x".to_vec()).unwrap();
    let document = pipeline.settled(id).await.unwrap();

    assert_eq!(document.status(), DocumentStatus::Failed);
    assert!(document.failure_reason().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn queue_delay_holds_document_in_queued() {
    let pipeline = DocumentPipeline::builder(InstantAnalysis::new(), EventBus::default())
        .config(PipelineConfig::default().with_queue_delay(Duration::from_secs(1)))
        .build();

    let id = pipeline.ingest("memo.txt", MediaKind::Text, b"x".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pipeline.get(id).unwrap().status(), DocumentStatus::Queued);

    let document = pipeline.settled(id).await.unwrap();
    assert_eq!(document.status(), DocumentStatus::Completed);
}

#[tokio::test]
async fn early_result_skips_the_analysis_call() {
    let analysis = InstantAnalysis::new();
    let scheduler = ManualScheduler::new();
    let pipeline = DocumentPipeline::builder(analysis.clone(), EventBus::default())
        .scheduler(scheduler.clone())
        .build();

    let id = pipeline.ingest("a.txt", MediaKind::Text, b"x".to_vec()).unwrap();
    assert!(pipeline.on_analysis_result(id, Ok(Insights::new("external"))).is_applied());
    assert_eq!(scheduler.run_all().await, 1);

    assert_eq!(analysis.calls(), 0);
    let document = pipeline.get(id).unwrap();
    assert_eq!(document.insights().unwrap().summary, "external");
}

#[tokio::test]
async fn failing_names_fail_and_others_complete() {
    let analysis = InstantAnalysis::new();
    let scheduler = ManualScheduler::new();
    let pipeline = DocumentPipeline::builder(analysis.clone(), EventBus::default())
        .scheduler(scheduler.clone())
        .build();

    let ok = pipeline.ingest("fine.pdf", MediaKind::Pdf, b"x".to_vec()).unwrap();
    let bad = pipeline.ingest("fail.pdf", MediaKind::Pdf, b"x".to_vec()).unwrap();
    assert_eq!(pipeline.stats().queued, 2);

    scheduler.run_all().await;

    assert_eq!(pipeline.get(ok).unwrap().status(), DocumentStatus::Completed);
    assert_eq!(pipeline.get(bad).unwrap().status(), DocumentStatus::Failed);
    let stats = pipeline.stats();
    assert_eq!((stats.completed, stats.failed, stats.in_flight()), (1, 1, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingests_settle_independently() {
    let analysis = InstantAnalysis::new();
    let pipeline = DocumentPipeline::new(analysis.clone(), EventBus::default());

    let mut handles = Vec::new();
    for worker in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            (0..10)
                .map(|n| {
                    pipeline
                        .ingest(format!("w{worker}-{n}.txt"), MediaKind::Text, b"x".to_vec())
                        .unwrap()
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.await.unwrap());
    }
    for id in &ids {
        let document = pipeline.settled(*id).await.unwrap();
        assert_eq!(document.status(), DocumentStatus::Completed);
    }

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 80);
    assert_eq!(pipeline.list().len(), 80);
    assert_eq!(analysis.calls(), 80);
    assert_eq!(pipeline.stats().completed, 80);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_callbacks_apply_exactly_once() {
    let analysis = GatedAnalysis::new();
    let pipeline = DocumentPipeline::new(analysis.clone(), EventBus::default());
    let mut changes = pipeline.bus().subscribe(EventKind::DocumentStatusChanged);

    let id = pipeline.ingest("race.pdf", MediaKind::Pdf, b"x".to_vec()).unwrap();
    analysis.wait_for_outstanding(1).await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let result = if n % 2 == 0 {
                Ok(Insights::new(format!("run {n}")))
            } else {
                Err(AnalysisFailure::new(format!("run {n}")))
            };
            pipeline.on_analysis_result(id, result).is_applied()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    analysis.resolve(id, Ok(sample_insights()));
    let document = pipeline.settled(id).await.unwrap();
    assert!(document.is_terminal());
    assert_eq!(document.insights().is_some(), document.status() == DocumentStatus::Completed);

    // Processing, then exactly one terminal transition
    tokio::time::sleep(Duration::from_millis(20)).await;
    let terminal: Vec<Document> = changes
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            HubEvent::DocumentStatusChanged { document, .. } if document.is_terminal() => {
                Some(document)
            }
            _ => None,
        })
        .collect();
    assert_eq!(terminal.len(), 1);
}

#[derive(Debug, Clone)]
enum Callback {
    Success(String),
    Failure(String),
    Run,
}

fn callback() -> impl Strategy<Value = Callback> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(Callback::Success),
        "[a-z]{1,8}".prop_map(Callback::Failure),
        Just(Callback::Run),
    ]
}

proptest! {
    #[test]
    fn observed_history_is_always_linear(steps in prop::collection::vec(callback(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let scheduler = ManualScheduler::new();
            let pipeline = DocumentPipeline::builder(InstantAnalysis::new(), EventBus::default())
                .scheduler(scheduler.clone())
                .build();
            let mut events = pipeline.bus().subscribe_all();
            let id = pipeline.ingest("doc.txt", MediaKind::Text, b"x".to_vec()).unwrap();

            let mut applied = 0;
            for step in steps {
                match step {
                    Callback::Success(summary) => {
                        applied += usize::from(pipeline.on_analysis_result(id, Ok(Insights::new(summary))).is_applied());
                    }
                    Callback::Failure(reason) => {
                        applied += usize::from(pipeline.on_analysis_result(id, Err(AnalysisFailure::new(reason))).is_applied());
                    }
                    Callback::Run => {
                        scheduler.run_all().await;
                    }
                }
            }
            scheduler.run_all().await;

            let path = status_path(&events.drain());
            prop_assert_eq!(path.first(), Some(&DocumentStatus::Queued));
            prop_assert!(path.windows(2).all(|pair| pair[0].can_transition_to(pair[1])));
            prop_assert!(applied <= 1);

            let document = pipeline.get(id).unwrap();
            prop_assert!(document.is_terminal());
            prop_assert_eq!(document.insights().is_some(), document.status() == DocumentStatus::Completed);
            Ok(())
        })?;
    }
}
