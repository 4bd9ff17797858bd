//! A scriptable renderer engine that counts what the pipeline does with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quire_traits::{
    EngineLauncher, RenderEngine, RenderError, RenderRequest, RenderSession, SubresourceLoader,
};
use tokio::sync::Notify;

/// Markup containing this marker makes the render call fail.
pub const RENDER_FAILURE_MARKER: &str = "FAIL-RENDER";

#[derive(Debug, Default)]
pub struct MockStats {
    pub launches: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub renders: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl MockStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct MockLauncher {
    stats: Arc<MockStats>,
    render_delay: Duration,
}

impl MockLauncher {
    pub fn new(render_delay: Duration) -> (Arc<Self>, Arc<MockStats>) {
        let stats = Arc::new(MockStats::default());
        let launcher = Arc::new(Self {
            stats: stats.clone(),
            render_delay,
        });
        (launcher, stats)
    }
}

#[async_trait]
impl EngineLauncher for MockLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, RenderError> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockEngine {
            stats: self.stats.clone(),
            render_delay: self.render_delay,
            alive: AtomicBool::new(true),
            gone: Notify::new(),
        }))
    }
}

struct MockEngine {
    stats: Arc<MockStats>,
    render_delay: Duration,
    alive: AtomicBool,
    gone: Notify,
}

#[async_trait]
impl RenderEngine for MockEngine {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        if !self.is_connected() {
            return Err(RenderError::Disconnected);
        }
        self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            stats: self.stats.clone(),
            render_delay: self.render_delay,
        }))
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn disconnected(&self) {
        loop {
            let notified = self.gone.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    async fn shutdown(&self) {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        self.gone.notify_waiters();
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockSession {
    stats: Arc<MockStats>,
    render_delay: Duration,
}

#[async_trait]
impl RenderSession for MockSession {
    async fn render(
        &mut self,
        request: RenderRequest<'_>,
        _loader: &dyn SubresourceLoader,
    ) -> Result<Vec<u8>, RenderError> {
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.render_delay).await;
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.renders.fetch_add(1, Ordering::SeqCst);

        if request.markup.contains(RENDER_FAILURE_MARKER) {
            return Err(RenderError::Render("scripted failure".to_string()));
        }
        let pages = request.markup.matches(r#"class="page-break""#).count() + 1;
        Ok(format!("%PDF-1.7\n1 0 obj << /Type /Pages /Count {pages} >>\n%%EOF").into_bytes())
    }

    async fn reset(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.stats.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}
