//! Hub configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! [pipeline]
//! queue_delay_ms = 0
//! analysis_timeout_ms = 30000
//!
//! [chat]
//! turn_policy = "coalesce"
//! greeting = "Hello! How can I help?"
//!
//! [bus]
//! mailbox_capacity = 256
//! ```

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Document pipeline settings
    pub pipeline: PipelineConfig,
    /// Chat session settings
    pub chat: ChatConfig,
    /// Notification bus settings
    pub bus: BusConfig,
}

impl HubConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `HubError::Config` on malformed TOML or invalid values.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `HubError::Config` when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| HubError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Reject values the components cannot work with
    ///
    /// # Errors
    /// `HubError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.bus.mailbox_capacity == 0 {
            return Err(HubError::Config("bus.mailbox_capacity must be at least 1".into()));
        }
        if self.pipeline.max_content_bytes == 0 {
            return Err(HubError::Config("pipeline.max_content_bytes must be at least 1".into()));
        }
        if self.pipeline.analysis_timeout_ms == Some(0) {
            return Err(HubError::Config("pipeline.analysis_timeout_ms must be positive".into()));
        }
        if self.chat.reply_timeout_ms == Some(0) {
            return Err(HubError::Config("chat.reply_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// With pipeline settings
    #[inline]
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// With chat settings
    #[inline]
    #[must_use]
    pub fn with_chat(mut self, chat: ChatConfig) -> Self {
        self.chat = chat;
        self
    }

    /// With bus settings
    #[inline]
    #[must_use]
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }
}

/// Document pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Delay between `Queued` and `Processing`
    pub queue_delay_ms: u64,
    /// Bounded wait for the analysis service; `None` waits forever
    pub analysis_timeout_ms: Option<u64>,
    /// Largest accepted document
    pub max_content_bytes: usize,
}

impl PipelineConfig {
    /// Queue delay as a duration
    #[inline]
    #[must_use]
    pub fn queue_delay(&self) -> Duration {
        Duration::from_millis(self.queue_delay_ms)
    }

    /// Analysis timeout as a duration
    #[inline]
    #[must_use]
    pub fn analysis_timeout(&self) -> Option<Duration> {
        self.analysis_timeout_ms.map(Duration::from_millis)
    }

    /// With queue delay
    #[inline]
    #[must_use]
    pub fn with_queue_delay(mut self, delay: Duration) -> Self {
        self.queue_delay_ms = duration_ms(delay);
        self
    }

    /// With analysis timeout
    #[inline]
    #[must_use]
    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// With max content size
    #[inline]
    #[must_use]
    pub fn with_max_content_bytes(mut self, max: usize) -> Self {
        self.max_content_bytes = max;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_delay_ms: 0,
            analysis_timeout_ms: None,
            max_content_bytes: 25 * 1024 * 1024,
        }
    }
}

/// What happens to a human post while an assistant reply is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPolicy {
    /// Remember the post; once the outstanding call resolves, issue one more
    /// call with the accumulated history
    #[default]
    Coalesce,
    /// Append the post but request no reply for it
    Suppress,
}

/// Chat session settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Bounded wait for the responder; `None` waits forever
    pub reply_timeout_ms: Option<u64>,
    /// Policy for posts arriving during an outstanding reply
    pub turn_policy: TurnPolicy,
    /// Assistant message appended when a session is created
    pub greeting: Option<String>,
}

impl ChatConfig {
    /// Reply timeout as a duration
    #[inline]
    #[must_use]
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    /// With reply timeout
    #[inline]
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// With turn policy
    #[inline]
    #[must_use]
    pub fn with_turn_policy(mut self, policy: TurnPolicy) -> Self {
        self.turn_policy = policy;
        self
    }

    /// With greeting
    #[inline]
    #[must_use]
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }
}

/// Notification bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events buffered per subscriber before the oldest is dropped
    pub mailbox_capacity: usize,
}

impl BusConfig {
    /// With mailbox capacity
    #[inline]
    #[must_use]
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
