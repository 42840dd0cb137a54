//! Testing utilities for DocHub workspace
//!
//! Shared doubles, fixtures, and event helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dochub_core::{
    AnalysisFailure, AnalysisRequest, AnalysisService, AssistantFailure, AssistantReply,
    AssistantResponder, Clock, DocumentId, EventKind, HubEvent, Insights, Message, Scheduler,
    Subscription, Task,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Scheduler that parks tasks until the test runs them
///
/// Delays are ignored; tasks run in submission order.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<VecDeque<Task>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run parked tasks, including any they schedule, until none remain
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.lock().pop_front();
            match next {
                Some(task) => {
                    task.await;
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Drop parked tasks without running them
    pub fn discard(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let count = tasks.len();
        tasks.clear();
        count
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn spawn(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    fn spawn_after(&self, _delay: Duration, task: Task) {
        self.spawn(task);
    }
}

pub fn sample_insights() -> Insights {
    Insights::new("S").with_action_items(["A1", "A2"])
}

/// Analysis service whose calls stay outstanding until the test resolves them
#[derive(Debug, Default)]
pub struct GatedAnalysis {
    pending: Mutex<VecDeque<(AnalysisRequest, oneshot::Sender<Result<Insights, AnalysisFailure>>)>>,
    arrived: Notify,
    calls: AtomicUsize,
}

impl GatedAnalysis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait until at least `n` calls are outstanding
    pub async fn wait_for_outstanding(&self, n: usize) {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let notified = self.arrived.notified();
                if self.outstanding() >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("analysis calls did not arrive in time");
    }

    /// Resolve the outstanding call for `id`; returns `false` if none
    pub fn resolve(&self, id: DocumentId, outcome: Result<Insights, AnalysisFailure>) -> bool {
        let sender = {
            let mut pending = self.pending.lock();
            let index = pending.iter().position(|(req, _)| req.document_id == id);
            index.and_then(|i| pending.remove(i)).map(|(_, tx)| tx)
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Resolve the oldest outstanding call
    pub fn resolve_next(&self, outcome: Result<Insights, AnalysisFailure>) -> Option<DocumentId> {
        let (request, tx) = self.pending.lock().pop_front()?;
        let _ = tx.send(outcome);
        Some(request.document_id)
    }
}

#[async_trait]
impl AnalysisService for GatedAnalysis {
    async fn analyze(&self, request: AnalysisRequest) -> Result<Insights, AnalysisFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push_back((request, tx));
        self.arrived.notify_waiters();
        rx.await
            .unwrap_or_else(|_| Err(AnalysisFailure::new("gate dropped")))
    }
}

/// Analysis service that answers immediately, failing for names containing
/// `fail`
#[derive(Debug, Default)]
pub struct InstantAnalysis {
    calls: AtomicUsize,
}

impl InstantAnalysis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for InstantAnalysis {
    async fn analyze(&self, request: AnalysisRequest) -> Result<Insights, AnalysisFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.name.contains("fail") {
            Err(AnalysisFailure::new("unreadable document"))
        } else {
            Ok(Insights::new(format!("summary of {}", request.name)))
        }
    }
}

/// Analysis service that never answers
#[derive(Debug, Default)]
pub struct HangingAnalysis;

#[async_trait]
impl AnalysisService for HangingAnalysis {
    async fn analyze(&self, _request: AnalysisRequest) -> Result<Insights, AnalysisFailure> {
        std::future::pending().await
    }
}

/// Responder whose calls stay outstanding until released; records how many
/// calls were in flight at once
#[derive(Debug, Default)]
pub struct GatedResponder {
    pending: Mutex<VecDeque<oneshot::Sender<Result<AssistantReply, AssistantFailure>>>>,
    histories: Mutex<Vec<Vec<Message>>>,
    arrived: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl GatedResponder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }

    /// History passed to each call, in call order
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().clone()
    }

    /// Wait until the responder has been called `n` times in total
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let notified = self.arrived.notified();
                if self.calls() >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("responder calls did not arrive in time");
    }

    /// Complete the oldest outstanding call; returns `false` if none
    pub fn release(&self, outcome: Result<AssistantReply, AssistantFailure>) -> bool {
        let sender = self.pending.lock().pop_front();
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn reply_with(&self, content: &str) -> bool {
        self.release(Ok(AssistantReply::new(content)))
    }
}

#[async_trait]
impl AssistantResponder for GatedResponder {
    async fn reply(&self, history: Vec<Message>) -> Result<AssistantReply, AssistantFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.histories.lock().push(history);
        self.pending.lock().push_back(tx);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_waiters();

        let outcome = rx
            .await
            .unwrap_or_else(|_| Err(AssistantFailure::new("gate dropped")));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Responder echoing the last message immediately
#[derive(Debug, Default)]
pub struct EchoResponder;

#[async_trait]
impl AssistantResponder for EchoResponder {
    async fn reply(&self, history: Vec<Message>) -> Result<AssistantReply, AssistantFailure> {
        history
            .last()
            .map(|m| AssistantReply::new(format!("echo: {}", m.content)))
            .ok_or_else(|| AssistantFailure::new("empty history"))
    }
}

/// Responder that always fails
#[derive(Debug, Default)]
pub struct FailingResponder;

#[async_trait]
impl AssistantResponder for FailingResponder {
    async fn reply(&self, _history: Vec<Message>) -> Result<AssistantReply, AssistantFailure> {
        Err(AssistantFailure::new("model unavailable"))
    }
}

/// Responder that never answers
#[derive(Debug, Default)]
pub struct HangingResponder;

#[async_trait]
impl AssistantResponder for HangingResponder {
    async fn reply(&self, _history: Vec<Message>) -> Result<AssistantReply, AssistantFailure> {
        std::future::pending().await
    }
}

/// Next event or panic after [`EVENT_TIMEOUT`]
pub async fn next_event(subscription: &mut Subscription) -> HubEvent {
    tokio::time::timeout(EVENT_TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed")
}

/// Skip events until one of `kind` arrives
pub async fn next_of_kind(subscription: &mut Subscription, kind: EventKind) -> HubEvent {
    loop {
        let event = next_event(subscription).await;
        if event.kind() == kind {
            return event;
        }
    }
}

/// Collect `n` events
pub async fn collect_events(subscription: &mut Subscription, n: usize) -> Vec<HubEvent> {
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        events.push(next_event(subscription).await);
    }
    events
}
