//! Time and task scheduling seams
//!
//! [`Clock`] supplies timestamps; [`Scheduler`] runs detached work, optionally
//! after a delay. Components take both as trait objects so tests can pin time
//! and observe spawned work.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::time::Duration;

/// Detached unit of work
pub type Task = BoxFuture<'static, ()>;

/// Source of the current time
pub trait Clock: Send + Sync + Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Issues detached tasks and delayed callbacks
pub trait Scheduler: Send + Sync + Debug {
    /// Run `task` in the background
    fn spawn(&self, task: Task);

    /// Run `task` in the background once `delay` has elapsed
    fn spawn_after(&self, delay: Duration, task: Task) {
        if delay.is_zero() {
            self.spawn(task);
        } else {
            self.spawn(Box::pin(async move {
                tokio::time::sleep(delay).await;
                task.await;
            }));
        }
    }
}

/// Scheduler backed by the ambient tokio runtime
///
/// Must be used from within a runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    /// Create new scheduler
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: Task) {
        tokio::spawn(task);
    }
}
