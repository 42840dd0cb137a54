//! DocHub Core
//!
//! Shared foundation for the document pipeline and the team chat:
//! - Data model (documents, insights, messages, participants)
//! - Identifier generation, clock and scheduler seams
//! - Error taxonomy and configuration
//! - Notification bus delivering events to observers
//! - Contracts of the analysis service and the assistant responder
//!
//! # Example
//!
//! ```rust,ignore
//! use dochub_core::prelude::*;
//!
//! let bus = EventBus::default();
//! let mut events = bus.subscribe(EventKind::DocumentStatusChanged);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod services;
pub mod state_machine;
pub mod types;

// Re-exports for convenience
pub use bus::{BusStats, EventBus, Subscription};
pub use clock::{Clock, Scheduler, SystemClock, Task, TokioScheduler};
pub use config::{BusConfig, ChatConfig, HubConfig, PipelineConfig, TurnPolicy};
pub use error::{
    AnalysisFailure, AssistantFailure, CallbackOutcome, HubError, IgnoreReason, Result,
    TransitionError,
};
pub use event::{EventKind, EventKinds, HubEvent};
pub use ids::{DocumentId, IdGenerator, MessageId, ParticipantId, SessionId, SubscriptionId, TurnId};
pub use services::{
    AnalysisRequest, AnalysisService, AssistantReply, AssistantResponder, CannedAnalysis,
    CannedResponder,
};
pub use types::{Author, Document, DocumentStatus, Insights, MediaKind, Message, Participant, Presence};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with DocHub
    pub use crate::{
        AnalysisService, AssistantResponder, Author, Document, DocumentId, DocumentStatus,
        EventBus, EventKind, HubConfig, HubError, HubEvent, Insights, MediaKind, Message,
        SessionId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
