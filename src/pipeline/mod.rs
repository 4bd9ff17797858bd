//! Record-to-artifact pipeline orchestration.
//!
//! - [`PipelineBuilder`]: validates [`RunOptions`] and wires the collaborators
//! - [`DocumentPipeline`]: runs one ingestion (batch, streaming or single document)
//! - [`RendererPool`]: bounded pool of renderer sessions over a crash-prone engine
//! - [`ConcurrencyGate`]: backpressure between streaming ingestion and rendering
//! - [`RunProgress`]: progress bar with throughput and ETA
//! - [`JobSummary`]: what a run reports
//!
//! # Example
//!
//! ```ignore
//! use quire::{PipelineBuilder, RunOptions};
//!
//! let options = RunOptions::new("invoices.xml", "invoice.hbs", "out");
//! let summary = PipelineBuilder::new(options).build().await?.run().await?;
//! println!("{} documents written", summary.processed);
//! ```

mod builder;
pub mod concurrency;
pub mod config;
pub mod context;
mod orchestrator;
pub mod output;
pub mod page_count;
pub mod pool;
pub mod progress;
pub mod summary;
pub(crate) mod worker;

pub use builder::PipelineBuilder;
pub use concurrency::{ConcurrencyGate, GatePermit};
pub use config::{DEFAULT_ASSET_CACHE_MB, DEFAULT_OUT_NAME, Mode, RunOptions};
pub use context::PipelineContext;
pub use orchestrator::DocumentPipeline;
pub use output::{ArtifactSink, FsSink, output_file_name, single_file_name};
pub use page_count::count_pages;
pub use pool::{PoolStats, RendererLease, RendererPool};
pub use progress::RunProgress;
pub use summary::{JobSummary, MAX_REPORTED_FAILURES, RecordFailure, RunStatus};
