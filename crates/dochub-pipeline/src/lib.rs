//! DocHub Pipeline
//!
//! Document ingestion and asynchronous analysis.
//!
//! # Example
//!
//! ```rust,ignore
//! use dochub_core::{CannedAnalysis, EventBus, MediaKind};
//! use dochub_pipeline::DocumentPipeline;
//!
//! let pipeline = DocumentPipeline::new(Arc::new(CannedAnalysis::default()), EventBus::default());
//! let id = pipeline.ingest("report.pdf", MediaKind::Pdf, bytes)?;
//! let settled = pipeline.settled(id).await?;
//! ```

#![warn(unreachable_pub)]

pub mod pipeline;
pub mod stats;

pub use pipeline::{DocumentPipeline, PipelineBuilder};
pub use stats::PipelineStats;
