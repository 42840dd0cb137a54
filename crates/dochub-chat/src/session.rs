//! Chat session
//!
//! A session owns an append-only message log, its participants and the
//! assistant turn state. All three live behind one mutex; every append and
//! the `MessageAppended` event announcing it happen under that mutex, so
//! subscribers see messages in log order.
//!
//! At most one assistant call is outstanding per session. A human post that
//! arrives meanwhile is always appended; whether it earns a reply of its own
//! is decided by the session's [`TurnPolicy`].

use chrono::{DateTime, Duration as TimeDelta, Utc};
use dochub_core::{
    AssistantFailure, AssistantReply, AssistantResponder, Author, CallbackOutcome, ChatConfig,
    Clock, EventBus, EventKind, HubError, HubEvent, IdGenerator, IgnoreReason, Message,
    Participant, ParticipantId, Presence, Result, Scheduler, SessionId, SystemClock,
    TokioScheduler, TurnId, TurnPolicy,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Debug, Default)]
struct SessionState {
    messages: Vec<Message>,
    participants: IndexMap<ParticipantId, Participant>,
    pending: Option<TurnId>,
    /// A post arrived while `pending` was set (coalesce policy only)
    deferred: bool,
    turns_issued: u64,
    last_sent_at: Option<DateTime<Utc>>,
}

struct SessionInner {
    id: SessionId,
    title: String,
    created_at: DateTime<Utc>,
    config: ChatConfig,
    responder: Arc<dyn AssistantResponder>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    ids: Arc<IdGenerator>,
    state: Mutex<SessionState>,
}

/// One conversation between participants and the assistant
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChatSession")
            .field("id", &self.inner.id)
            .field("title", &self.inner.title)
            .field("messages", &state.messages.len())
            .field("pending", &state.pending)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ChatSession`]
#[derive(Debug)]
pub struct SessionBuilder {
    responder: Arc<dyn AssistantResponder>,
    bus: EventBus,
    title: String,
    config: ChatConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    ids: Arc<IdGenerator>,
}

impl SessionBuilder {
    /// Session title
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Chat settings
    #[must_use]
    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for `sent_at`
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where assistant calls run
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

    /// Create the session, appending the configured greeting if any
    #[must_use]
    pub fn build(self) -> ChatSession {
        let session = ChatSession {
            inner: Arc::new(SessionInner {
                id: self.ids.next_session_id(),
                title: self.title,
                created_at: self.clock.now(),
                config: self.config,
                responder: self.responder,
                bus: self.bus,
                clock: self.clock,
                scheduler: self.scheduler,
                ids: self.ids,
                state: Mutex::new(SessionState::default()),
            }),
        };
        tracing::info!(session_id = %session.id(), title = %session.title(), "session created");

        if let Some(greeting) = session.inner.config.greeting.clone() {
            let mut state = session.inner.state.lock();
            session.append(&mut state, Author::Assistant, greeting);
        }
        session
    }
}

impl ChatSession {
    /// Session with default settings, wall clock and tokio scheduler
    #[must_use]
    pub fn new(responder: Arc<dyn AssistantResponder>, bus: EventBus) -> Self {
        Self::builder(responder, bus).build()
    }

    /// Start building a session
    #[must_use]
    pub fn builder(responder: Arc<dyn AssistantResponder>, bus: EventBus) -> SessionBuilder {
        SessionBuilder {
            responder,
            bus,
            title: "Team Chat".to_string(),
            config: ChatConfig::default(),
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            ids: Arc::new(IdGenerator::new()),
        }
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Session title
    #[inline]
    #[must_use]
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Creation time
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Bus the session publishes to
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Append a human message and, if no assistant call is outstanding,
    /// request a reply
    ///
    /// An unknown `author` joins the session as `Online`, displayed by id.
    ///
    /// # Errors
    /// `HubError::InvalidInput` for empty or whitespace-only content; the log
    /// is left unchanged.
    pub fn post_message(
        &self,
        author: impl Into<ParticipantId>,
        content: impl Into<String>,
    ) -> Result<Message> {
        let author = author.into();
        let content = content.into();
        if content.trim().is_empty() {
            return Err(HubError::invalid_input("message content is empty"));
        }
        if author.as_str().trim().is_empty() {
            return Err(HubError::invalid_input("participant id is empty"));
        }

        let mut state = self.inner.state.lock();
        if !state.participants.contains_key(&author) {
            let participant = Participant::new(author.as_str(), author.as_str());
            self.upsert_participant(&mut state, participant);
        }
        let message = self.append(&mut state, Author::Human(author), content);

        let pending = state.pending;
        let follow_up = match pending {
            None => Some(self.begin_turn(&mut state)),
            Some(pending) => {
                match self.inner.config.turn_policy {
                    TurnPolicy::Coalesce => state.deferred = true,
                    TurnPolicy::Suppress => {}
                }
                tracing::debug!(
                    session_id = %self.id(),
                    %pending,
                    policy = ?self.inner.config.turn_policy,
                    "reply outstanding, post held back"
                );
                None
            }
        };
        drop(state);

        if let Some((turn, history)) = follow_up {
            self.request_reply(turn, history);
        }
        Ok(message)
    }

    /// Apply the responder's outcome for `turn`
    ///
    /// A success appends the assistant's message; a failure appends nothing
    /// and publishes `AssistantReplyFailed`. Either way the turn ends, and a
    /// post held back under [`TurnPolicy::Coalesce`] starts the next one.
    /// Replies for a turn that is not outstanding are ignored.
    pub fn on_assistant_reply(
        &self,
        turn: TurnId,
        result: std::result::Result<AssistantReply, AssistantFailure>,
    ) -> CallbackOutcome {
        let mut state = self.inner.state.lock();
        let pending = state.pending;
        match pending {
            None => {
                tracing::warn!(session_id = %self.id(), %turn, "reply with no outstanding turn ignored");
                return CallbackOutcome::Ignored(IgnoreReason::NoPendingTurn);
            }
            Some(pending) if pending != turn => {
                tracing::warn!(session_id = %self.id(), %turn, %pending, "stale reply ignored");
                return CallbackOutcome::Ignored(IgnoreReason::StaleTurn {
                    pending,
                    received: turn,
                });
            }
            Some(_) => {}
        }

        let result = result.and_then(|reply| {
            if reply.content.trim().is_empty() {
                Err(AssistantFailure::new("assistant returned an empty reply"))
            } else {
                Ok(reply)
            }
        });

        match result {
            Ok(reply) => {
                self.append(&mut state, Author::Assistant, reply.content);
                tracing::info!(session_id = %self.id(), %turn, "assistant replied");
            }
            Err(failure) => {
                tracing::warn!(session_id = %self.id(), %turn, reason = %failure.reason, "assistant reply failed");
                self.inner.bus.publish(HubEvent::AssistantReplyFailed {
                    session_id: self.id(),
                    turn,
                    reason: failure.reason,
                });
            }
        }
        state.pending = None;

        let follow_up = std::mem::take(&mut state.deferred).then(|| self.begin_turn(&mut state));
        drop(state);

        if let Some((turn, history)) = follow_up {
            self.request_reply(turn, history);
        }
        CallbackOutcome::Applied
    }

    /// Messages, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.inner.state.lock().messages.clone()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().messages.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an assistant call is outstanding
    #[must_use]
    pub fn pending_assistant_reply(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }

    /// The outstanding assistant turn, if any
    #[must_use]
    pub fn pending_turn(&self) -> Option<TurnId> {
        self.inner.state.lock().pending
    }

    /// Wait until no assistant call is outstanding
    ///
    /// A turn ends by appending the reply or by publishing
    /// `AssistantReplyFailed`; either wakes the waiter, which then checks the
    /// turn state again. A coalesced follow-up keeps it waiting.
    pub async fn idle(&self) {
        let mut events = self
            .inner
            .bus
            .subscribe_many([EventKind::MessageAppended, EventKind::AssistantReplyFailed]);
        while self.pending_assistant_reply() {
            if events.recv().await.is_none() {
                return;
            }
        }
    }

    /// Messages containing `query`, case-insensitively, oldest first
    ///
    /// A blank query matches nothing.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Message> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.inner
            .state
            .lock()
            .messages
            .iter()
            .filter(|message| message.content.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Add a participant, or rename one already present, as `Online`
    ///
    /// # Errors
    /// `HubError::InvalidInput` for a blank id or display name.
    pub fn join(
        &self,
        id: impl Into<ParticipantId>,
        display_name: impl Into<String>,
    ) -> Result<Participant> {
        let id = id.into();
        let display_name = display_name.into();
        if id.as_str().trim().is_empty() || display_name.trim().is_empty() {
            return Err(HubError::invalid_input("participant id and name are required"));
        }

        let participant = Participant {
            id,
            display_name: display_name.trim().to_string(),
            presence: Presence::Online,
        };
        let mut state = self.inner.state.lock();
        self.upsert_participant(&mut state, participant.clone());
        Ok(participant)
    }

    /// Change a participant's presence
    ///
    /// Publishes `PresenceChanged` only when the presence differs.
    ///
    /// # Errors
    /// `HubError::ParticipantNotFound` for an id that never joined.
    pub fn set_presence(&self, id: &ParticipantId, presence: Presence) -> Result<Participant> {
        let mut state = self.inner.state.lock();
        let participant = state
            .participants
            .get_mut(id)
            .ok_or_else(|| HubError::ParticipantNotFound(id.clone()))?;
        if participant.presence == presence {
            return Ok(participant.clone());
        }
        participant.presence = presence;
        let participant = participant.clone();

        tracing::debug!(session_id = %self.id(), participant = %id, %presence, "presence changed");
        self.inner.bus.publish(HubEvent::PresenceChanged {
            session_id: self.id(),
            participant: participant.clone(),
        });
        Ok(participant)
    }

    /// Participants in join order
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.inner.state.lock().participants.values().cloned().collect()
    }

    /// Participants currently `Online`
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .participants
            .values()
            .filter(|p| p.presence == Presence::Online)
            .count()
    }

    fn upsert_participant(&self, state: &mut SessionState, participant: Participant) {
        if state.participants.get(&participant.id) == Some(&participant) {
            return;
        }
        tracing::debug!(session_id = %self.id(), participant = %participant.id, "participant joined");
        state
            .participants
            .insert(participant.id.clone(), participant.clone());
        self.inner.bus.publish(HubEvent::PresenceChanged {
            session_id: self.id(),
            participant,
        });
    }

    /// Append and publish; caller holds the state lock
    fn append(&self, state: &mut SessionState, author: Author, content: String) -> Message {
        let mut sent_at = self.inner.clock.now();
        if let Some(last) = state.last_sent_at {
            if sent_at <= last {
                sent_at = last + TimeDelta::microseconds(1);
            }
        }
        state.last_sent_at = Some(sent_at);

        let message = Message {
            id: self.inner.ids.next_message_id(),
            session_id: self.id(),
            sequence: state.messages.len() as u64,
            author,
            content,
            sent_at,
        };
        state.messages.push(message.clone());
        tracing::debug!(
            session_id = %self.id(),
            sequence = message.sequence,
            author = %message.author,
            "message appended"
        );
        self.inner.bus.publish(HubEvent::MessageAppended {
            session_id: self.id(),
            message: message.clone(),
        });
        message
    }

    /// Mark a new turn outstanding and snapshot the history it answers
    fn begin_turn(&self, state: &mut SessionState) -> (TurnId, Vec<Message>) {
        state.turns_issued += 1;
        let turn = TurnId(state.turns_issued);
        state.pending = Some(turn);
        state.deferred = false;
        (turn, state.messages.clone())
    }

    fn request_reply(&self, turn: TurnId, history: Vec<Message>) {
        let session = self.clone();
        let span = tracing::info_span!("assistant_turn", session_id = %self.id(), %turn);

        self.inner.scheduler.spawn(Box::pin(
            async move {
                tracing::info!(messages = history.len(), "assistant reply requested");
                let responder = Arc::clone(&session.inner.responder);
                let result = match session.inner.config.reply_timeout() {
                    Some(limit) => tokio::time::timeout(limit, responder.reply(history))
                        .await
                        .unwrap_or_else(|_| {
                            tracing::warn!(
                                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                                "assistant reply timed out"
                            );
                            Err(AssistantFailure::timed_out(limit))
                        }),
                    None => responder.reply(history).await,
                };
                session.on_assistant_reply(turn, result);
            }
            .instrument(span),
        ));
    }
}
