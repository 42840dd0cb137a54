//! DocHub Chat
//!
//! Team chat sessions with a serialized assistant participant.
//!
//! # Example
//!
//! ```rust,ignore
//! use dochub_chat::ChatHub;
//! use dochub_core::{CannedResponder, EventBus};
//!
//! let hub = ChatHub::new(Arc::new(CannedResponder::default()), EventBus::default());
//! let session = hub.create_session("General")?;
//! session.post_message("u1", "hello")?;
//! ```

#![warn(unreachable_pub)]

pub mod hub;
pub mod session;

pub use hub::ChatHub;
pub use session::{ChatSession, SessionBuilder};
