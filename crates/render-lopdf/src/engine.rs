//! In-process renderer engine with a process-like lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};
use quire_traits::{
    EngineLauncher, RenderEngine, RenderError, RenderRequest, RenderSession, SubresourceLoader,
};
use tokio::sync::Notify;
use url::Url;

use crate::document::{PageDecorations, PageMetrics, paginate, write_pdf};
use crate::markup::{ResourceKind, inline_text, parse_markup};

static NEXT_ENGINE_ID: AtomicUsize = AtomicUsize::new(1);

/// Starts [`LopdfEngine`]s.
#[derive(Debug, Default)]
pub struct LopdfLauncher {
    launches: AtomicUsize,
}

impl LopdfLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many engines this launcher has started.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLauncher for LopdfLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let engine = LopdfEngine::new();
        info!("[ENGINE-{}] lopdf engine started", engine.id);
        Ok(Arc::new(engine))
    }
}

struct EngineState {
    alive: AtomicBool,
    gone: Notify,
    open_sessions: AtomicUsize,
}

impl EngineState {
    fn terminate(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        if was_alive {
            self.gone.notify_waiters();
        }
        was_alive
    }
}

/// The "renderer process". Sessions stop working once it is shut down or killed.
pub struct LopdfEngine {
    id: usize,
    state: Arc<EngineState>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(EngineState {
                alive: AtomicBool::new(true),
                gone: Notify::new(),
                open_sessions: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Simulates the process dying underneath its sessions.
    pub fn kill(&self) {
        if self.state.terminate() {
            warn!("[ENGINE-{}] engine process terminated unexpectedly", self.id);
        }
    }
}

impl Default for LopdfEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderEngine for LopdfEngine {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        if !self.is_connected() {
            return Err(RenderError::Disconnected);
        }
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        debug!("[ENGINE-{}] session opened", self.id);
        Ok(Box::new(LopdfSession {
            engine_id: self.id,
            state: self.state.clone(),
            rendered: 0,
        }))
    }

    fn is_connected(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    async fn disconnected(&self) {
        loop {
            let notified = self.state.gone.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    async fn shutdown(&self) {
        if self.state.terminate() {
            info!("[ENGINE-{}] engine shut down", self.id);
        }
    }

    fn name(&self) -> &'static str {
        "lopdf"
    }
}

/// One rendering context of a [`LopdfEngine`].
pub struct LopdfSession {
    engine_id: usize,
    state: Arc<EngineState>,
    rendered: usize,
}

impl LopdfSession {
    fn ensure_connected(&self) -> Result<(), RenderError> {
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RenderError::Disconnected)
        }
    }
}

fn resolve_reference(base: Option<&str>, href: &str) -> String {
    match base.and_then(|b| Url::parse(b).ok()) {
        Some(base) => base
            .join(href)
            .map(String::from)
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

#[async_trait]
impl RenderSession for LopdfSession {
    async fn render(
        &mut self,
        request: RenderRequest<'_>,
        loader: &dyn SubresourceLoader,
    ) -> Result<Vec<u8>, RenderError> {
        self.ensure_connected()?;

        let parsed = parse_markup(request.markup);
        let base = parsed
            .base_href
            .as_deref()
            .or(request.options.base_url.as_deref());

        // Sub-resources are requested the way a browser would; failures only
        // degrade the output.
        for resource in &parsed.resources {
            let url = resolve_reference(base, &resource.href);
            match loader.fetch(&url) {
                Ok(asset) => debug!(
                    "[SESSION] fetched {} ({} bytes, {})",
                    url,
                    asset.body.len(),
                    asset.content_type
                ),
                Err(e) => match resource.kind {
                    ResourceKind::Image => warn!("[SESSION] image not loaded: {}", e),
                    ResourceKind::Stylesheet => warn!("[SESSION] stylesheet not loaded: {}", e),
                },
            }
        }

        let decorations = PageDecorations {
            header: request.options.header_template.as_deref().map(inline_text),
            footer: request.options.footer_template.as_deref().map(inline_text),
        };
        let blocks = parsed.blocks;

        let bytes = tokio::task::spawn_blocking(move || {
            let pages = paginate(&blocks, PageMetrics::default());
            write_pdf(&pages, &decorations)
        })
        .await
        .map_err(|e| RenderError::Render(format!("layout task failed: {e}")))?
        .map_err(|e| RenderError::Render(e.to_string()))?;

        // The engine may have died while we were busy.
        self.ensure_connected()?;
        self.rendered += 1;
        Ok(bytes)
    }

    async fn reset(&mut self) -> Result<(), RenderError> {
        self.ensure_connected()?;
        debug!(
            "[ENGINE-{}] session reset after {} documents",
            self.engine_id, self.rendered
        );
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        debug!("[ENGINE-{}] session closed", self.engine_id);
    }
}
