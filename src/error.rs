// src/error.rs
use std::path::PathBuf;

use quire_source::SourceError;
use quire_traits::RenderError;
use thiserror::Error;

use crate::templating::TemplateError;

/// A fatal error of a whole run. Nothing is rendered, or ingestion stopped midway.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read records: {0}")]
    Source(#[from] SourceError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Renderer error: {0}")]
    Render(#[from] RenderError),

    #[error("Renderer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Validation problems are reported differently from runtime failures by the CLI.
    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}

/// Failure of a single record. Recorded in the summary, never aborts the run.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Could not decode record: {0}")]
    Decode(#[from] SourceError),

    #[error("Template failed: {0}")]
    Template(#[from] TemplateError),

    #[error("No renderer available: {0}")]
    Pool(#[from] PoolError),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// Errors handed out by the renderer pool.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool capacity must be at least 1")]
    ZeroCapacity,

    #[error("Renderer pool has been shut down")]
    Closed,

    #[error("Could not start renderer: {0}")]
    Launch(RenderError),

    #[error("Could not open renderer session: {0}")]
    Session(RenderError),
}
