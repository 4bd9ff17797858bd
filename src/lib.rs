//! Concurrent batch rendering of XML/JSON records into PDF documents.
//!
//! Records are pulled from an input file (all at once, or streamed element by
//! element), rendered through a Handlebars template into HTML, and handed to a
//! pooled external rendering engine. Each record is an isolated job: its failure is
//! recorded in the [`JobSummary`] and never stops the others.

pub mod error;
pub mod pipeline;
pub mod templating;

pub use error::{JobError, PipelineError, PoolError};
pub use pipeline::{DocumentPipeline, JobSummary, Mode, PipelineBuilder, RunOptions, RunStatus};
pub use templating::{HandlebarsTemplate, RecordTemplate, TemplateError};

pub use quire_source::Record;

/// Runs one job with the default collaborators.
pub async fn run(options: RunOptions) -> Result<JobSummary, PipelineError> {
    PipelineBuilder::new(options).build().await?.run().await
}
