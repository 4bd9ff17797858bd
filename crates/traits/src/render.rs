//! The external rendering engine as seen by the pipeline.
//!
//! An [`EngineLauncher`] starts one engine "process". The engine hands out
//! [`RenderSession`]s (think: one browser page each), which turn a markup document
//! into artifact bytes. Engines can die at any time; the pool watches
//! [`RenderEngine::disconnected`] and relaunches on demand.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::SubresourceLoader;

/// Errors produced by an engine or one of its sessions.
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("Failed to launch renderer: {0}")]
    Launch(String),

    #[error("Renderer process disconnected")]
    Disconnected,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("{0}")]
    Other(String),
}

/// Per-run rendering options shared by every job.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Markup repeated at the top of every page.
    pub header_template: Option<String>,
    /// Markup repeated at the bottom of every page.
    pub footer_template: Option<String>,
    /// Absolute URL relative references are resolved against.
    pub base_url: Option<String>,
}

/// One document to render.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub markup: &'a str,
    pub options: &'a RenderOptions,
}

impl<'a> RenderRequest<'a> {
    pub fn new(markup: &'a str, options: &'a RenderOptions) -> Self {
        Self { markup, options }
    }
}

/// A single renderer handle. Owned by exactly one job at a time.
#[async_trait]
pub trait RenderSession: Send {
    /// Renders one document. Sub-resources are fetched through `loader`.
    async fn render(
        &mut self,
        request: RenderRequest<'_>,
        loader: &dyn SubresourceLoader,
    ) -> Result<Vec<u8>, RenderError>;

    /// Brings the session back to a blank state so it can be reused.
    async fn reset(&mut self) -> Result<(), RenderError>;

    /// Closes the session. Best effort, never fails.
    async fn close(self: Box<Self>);
}

/// A running engine process.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError>;

    fn is_connected(&self) -> bool;

    /// Resolves once the engine has gone away, for whatever reason.
    async fn disconnected(&self);

    async fn shutdown(&self);

    fn name(&self) -> &'static str;
}

/// Starts engine processes.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError>;
}
