//! Registry of chat sessions
//!
//! Sessions share the responder, bus, clock, scheduler and id generator
//! but nothing else; posting to one never waits on another.

use crate::session::ChatSession;
use dashmap::DashMap;
use dochub_core::{
    AssistantResponder, ChatConfig, Clock, EventBus, HubError, IdGenerator, Result, Scheduler,
    SessionId, SystemClock, TokioScheduler,
};
use parking_lot::RwLock;
use std::sync::Arc;

struct HubInner {
    config: ChatConfig,
    responder: Arc<dyn AssistantResponder>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    ids: Arc<IdGenerator>,
    sessions: DashMap<SessionId, ChatSession>,
    order: RwLock<Vec<SessionId>>,
}

/// Creates and looks up chat sessions
#[derive(Clone)]
pub struct ChatHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for ChatHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHub")
            .field("sessions", &self.inner.sessions.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ChatHub {
    /// Hub with default settings, wall clock and tokio scheduler
    #[must_use]
    pub fn new(responder: Arc<dyn AssistantResponder>, bus: EventBus) -> Self {
        Self::with_parts(
            responder,
            bus,
            ChatConfig::default(),
            Arc::new(SystemClock),
            Arc::new(TokioScheduler),
            Arc::new(IdGenerator::new()),
        )
    }

    /// Hub from explicit collaborators
    #[must_use]
    pub fn with_parts(
        responder: Arc<dyn AssistantResponder>,
        bus: EventBus,
        config: ChatConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                responder,
                bus,
                clock,
                scheduler,
                ids,
                sessions: DashMap::new(),
                order: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Open a new session
    ///
    /// # Errors
    /// `HubError::InvalidInput` for a blank title.
    pub fn create_session(&self, title: &str) -> Result<ChatSession> {
        let title = title.trim();
        if title.is_empty() {
            return Err(HubError::invalid_input("session title is empty"));
        }

        let session = ChatSession::builder(Arc::clone(&self.inner.responder), self.inner.bus.clone())
            .title(title)
            .config(self.inner.config.clone())
            .clock(Arc::clone(&self.inner.clock))
            .scheduler(Arc::clone(&self.inner.scheduler))
            .id_generator(Arc::clone(&self.inner.ids))
            .build();

        let mut order = self.inner.order.write();
        self.inner.sessions.insert(session.id(), session.clone());
        order.push(session.id());
        Ok(session)
    }

    /// Look up a session
    ///
    /// # Errors
    /// `HubError::SessionNotFound` for an unknown id.
    pub fn session(&self, id: SessionId) -> Result<ChatSession> {
        self.inner
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(HubError::SessionNotFound(id))
    }

    /// Sessions in creation order
    #[must_use]
    pub fn sessions(&self) -> Vec<ChatSession> {
        self.inner
            .order
            .read()
            .iter()
            .filter_map(|id| self.inner.sessions.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    /// Number of sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether no session exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Bus the sessions publish to
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dochub_test_utils::{HangingResponder, ManualClock, ManualScheduler};

    fn hub() -> ChatHub {
        ChatHub::with_parts(
            Arc::new(HangingResponder),
            EventBus::default(),
            ChatConfig::default(),
            Arc::new(ManualClock::default()),
            ManualScheduler::new(),
            Arc::new(IdGenerator::new()),
        )
    }

    #[test]
    fn sessions_are_listed_in_creation_order() {
        let hub = hub();
        let general = hub.create_session("General").unwrap();
        let finance = hub.create_session("  Finance ").unwrap();

        let titles: Vec<String> = hub.sessions().iter().map(|s| s.title().to_string()).collect();
        assert_eq!(titles, vec!["General".to_string(), "Finance".to_string()]);
        assert_eq!(hub.session(general.id()).unwrap().id(), general.id());
        assert_eq!(hub.session(finance.id()).unwrap().title(), "Finance");
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn blank_title_rejected() {
        let hub = hub();
        assert!(matches!(hub.create_session(" "), Err(HubError::InvalidInput(_))));
        assert!(hub.is_empty());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let hub = hub();
        let stray = IdGenerator::new().next_session_id();
        assert!(matches!(hub.session(stray), Err(HubError::SessionNotFound(id)) if id == stray));
    }

    #[test]
    fn sessions_keep_separate_logs() {
        let hub = hub();
        let a = hub.create_session("A").unwrap();
        let b = hub.create_session("B").unwrap();

        a.post_message("u1", "only in A").unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert!(!b.pending_assistant_reply());
    }
}
