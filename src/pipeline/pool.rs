//! A fixed-capacity pool of renderer sessions on top of one engine process.
//!
//! `live` counts every session that exists or is being created, checked out or
//! idle, and never exceeds `capacity`. When a session comes back it goes to the
//! oldest waiter first. When a slot is freed (failed reset, failed open, engine
//! gone) while someone is waiting, the slot itself moves to that waiter, which
//! then opens a replacement session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use log::{debug, info, warn};
use quire_traits::{
    EngineLauncher, RenderEngine, RenderError, RenderRequest, RenderSession, SubresourceLoader,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::error::PoolError;

struct IdleSession {
    session: Box<dyn RenderSession>,
    generation: u64,
    engine: Arc<dyn RenderEngine>,
}

impl IdleSession {
    /// True when the engine behind this session is gone, whether or not the
    /// disconnect monitor has caught up yet.
    fn is_stale(&self, stale_through: u64) -> bool {
        self.generation <= stale_through || !self.engine.is_connected()
    }
}

enum Grant {
    Session(IdleSession),
    Slot,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<IdleSession>,
    live: usize,
    waiters: VecDeque<oneshot::Sender<Grant>>,
    draining: bool,
    /// Sessions of this engine generation or older belong to a dead process.
    stale_through: u64,
}

impl PoolState {
    /// Gives a freed slot to the oldest waiter still listening, or forgets it.
    fn free_slot(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(Grant::Slot).is_ok() {
                return;
            }
        }
        self.live = self.live.saturating_sub(1);
    }

    /// Gives up the slot of a session whose engine died.
    fn retire(&mut self, idle: &IdleSession) {
        self.stale_through = self.stale_through.max(idle.generation);
        self.free_slot();
    }
}

#[derive(Default)]
struct EngineSlot {
    generation: u64,
    engine: Option<Arc<dyn RenderEngine>>,
}

struct PoolInner {
    capacity: usize,
    launcher: Arc<dyn EngineLauncher>,
    engine: tokio::sync::Mutex<EngineSlot>,
    state: Mutex<PoolState>,
}

/// Diagnostic snapshot of a [`RendererPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub live: usize,
    pub idle: usize,
    pub waiting: usize,
}

/// Bounded pool of renderer sessions. Cheap to clone.
#[derive(Clone)]
pub struct RendererPool {
    inner: Arc<PoolInner>,
}

/// A checked-out session. Hand it back with [`RendererPool::release`]; a lease
/// that is simply dropped is returned in the background.
pub struct RendererLease {
    session: Option<Box<dyn RenderSession>>,
    generation: u64,
    engine: Arc<dyn RenderEngine>,
    pool: Arc<PoolInner>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("[POOL] state lock was poisoned, continuing");
            poisoned.into_inner()
        })
    }

    fn free_slot(&self) {
        self.lock().free_slot();
    }

    /// The current engine, launching a new one if there is none or it died.
    async fn engine(self: &Arc<Self>) -> Result<(Arc<dyn RenderEngine>, u64), PoolError> {
        let mut slot = self.engine.lock().await;
        let draining = self.lock().draining;
        if draining {
            return Err(PoolError::Closed);
        }
        if let Some(engine) = &slot.engine {
            if engine.is_connected() {
                return Ok((engine.clone(), slot.generation));
            }
            warn!(
                "[POOL] renderer engine generation {} is gone, relaunching",
                slot.generation
            );
        }

        let started = Instant::now();
        let engine = self.launcher.launch().await.map_err(PoolError::Launch)?;
        slot.generation += 1;
        slot.engine = Some(engine.clone());
        let generation = slot.generation;
        info!(
            "[POOL] launched '{}' engine (generation {}) in {:?}",
            engine.name(),
            generation,
            started.elapsed()
        );
        self.spawn_monitor(engine.clone(), generation);
        Ok((engine, generation))
    }

    fn spawn_monitor(self: &Arc<Self>, engine: Arc<dyn RenderEngine>, generation: u64) {
        let pool: Weak<PoolInner> = Arc::downgrade(self);
        tokio::spawn(async move {
            engine.disconnected().await;
            drop(engine);
            if let Some(pool) = pool.upgrade() {
                pool.purge_generation(generation).await;
            }
        });
    }

    /// Drops idle sessions of a dead engine and frees their slots.
    async fn purge_generation(&self, generation: u64) {
        let stale: Vec<IdleSession> = {
            let mut state = self.lock();
            if state.draining {
                return;
            }
            let (stale, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|idle| idle.generation == generation);
            state.idle = keep;
            state.stale_through = state.stale_through.max(generation);
            for _ in &stale {
                state.free_slot();
            }
            stale
        };
        warn!(
            "[POOL] engine generation {} disconnected, discarded {} idle sessions",
            generation,
            stale.len()
        );
        for idle in stale {
            idle.session.close().await;
        }
    }

    /// Opens a session for a slot the caller already reserved. The slot is
    /// released again on failure.
    async fn open_in_slot(self: &Arc<Self>) -> Result<IdleSession, PoolError> {
        let (engine, generation) = match self.engine().await {
            Ok(found) => found,
            Err(e) => {
                self.free_slot();
                return Err(e);
            }
        };
        match engine.open_session().await {
            Ok(session) => Ok(IdleSession {
                session,
                generation,
                engine,
            }),
            Err(e) => {
                warn!("[POOL] could not open session: {}", e);
                self.free_slot();
                Err(PoolError::Session(e))
            }
        }
    }

    /// Puts a healthy session back: to the oldest waiter, else the idle set.
    async fn hand_back(&self, mut idle: IdleSession) {
        let closing = {
            let mut state = self.lock();
            if state.draining {
                state.live = state.live.saturating_sub(1);
                Some(idle)
            } else if idle.is_stale(state.stale_through) {
                state.retire(&idle);
                Some(idle)
            } else {
                loop {
                    match state.waiters.pop_front() {
                        Some(waiter) => match waiter.send(Grant::Session(idle)) {
                            Ok(()) => break None,
                            Err(Grant::Session(returned)) => idle = returned,
                            Err(Grant::Slot) => break None,
                        },
                        None => {
                            state.idle.push(idle);
                            break None;
                        }
                    }
                }
            }
        };
        if let Some(idle) = closing {
            idle.session.close().await;
        }
    }

    async fn give_back(&self, mut idle: IdleSession) {
        let draining = self.lock().draining;
        if draining {
            idle.session.close().await;
            let mut state = self.lock();
            state.live = state.live.saturating_sub(1);
            return;
        }
        match idle.session.reset().await {
            Ok(()) => self.hand_back(idle).await,
            Err(e) => {
                warn!("[POOL] session reset failed, discarding it: {}", e);
                idle.session.close().await;
                self.free_slot();
            }
        }
    }
}

impl RendererPool {
    pub fn new(capacity: usize, launcher: Arc<dyn EngineLauncher>) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                capacity,
                launcher,
                engine: tokio::sync::Mutex::new(EngineSlot::default()),
                state: Mutex::new(PoolState::default()),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Opens every missing session up front, in parallel.
    ///
    /// Sessions that fail to open leave their slot free for a later `acquire`;
    /// only a pool that ends up with no session at all is an error.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let started = Instant::now();
        self.inner.engine().await?;

        let missing = {
            let mut state = self.inner.lock();
            if state.draining {
                return Err(PoolError::Closed);
            }
            let missing = self.inner.capacity - state.live;
            state.live += missing;
            missing
        };

        let mut tasks = JoinSet::new();
        for _ in 0..missing {
            let inner = self.inner.clone();
            tasks.spawn(async move { inner.open_in_slot().await });
        }

        let mut opened = 0;
        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(idle)) => {
                    opened += 1;
                    self.inner.hand_back(idle).await;
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(e) => {
                    self.inner.free_slot();
                    last_error = Some(PoolError::Session(RenderError::Other(e.to_string())));
                }
            }
        }

        match last_error {
            Some(e) if opened == 0 && self.stats().live == 0 => Err(e),
            Some(e) => {
                warn!(
                    "[POOL] warmed {}/{} sessions, last failure: {}",
                    opened, missing, e
                );
                Ok(())
            }
            None => {
                info!(
                    "[POOL] warmed {} sessions in {:?}",
                    opened,
                    started.elapsed()
                );
                Ok(())
            }
        }
    }

    /// Checks out a session, waiting in line when all `capacity` are busy.
    pub async fn acquire(&self) -> Result<RendererLease, PoolError> {
        enum Next {
            Ready(IdleSession),
            Open,
            Wait(oneshot::Receiver<Grant>),
        }

        let (next, stale) = {
            let mut state = self.inner.lock();
            if state.draining {
                return Err(PoolError::Closed);
            }
            let mut stale = Vec::new();
            let mut ready = None;
            while let Some(idle) = state.idle.pop() {
                if idle.is_stale(state.stale_through) {
                    state.retire(&idle);
                    stale.push(idle);
                } else {
                    ready = Some(idle);
                    break;
                }
            }
            let next = if let Some(idle) = ready {
                Next::Ready(idle)
            } else if state.live < self.inner.capacity {
                state.live += 1;
                Next::Open
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!("[POOL] all sessions busy, {} waiting", state.waiters.len());
                Next::Wait(rx)
            };
            (next, stale)
        };

        if !stale.is_empty() {
            warn!(
                "[POOL] skipped {} idle sessions of a disconnected engine",
                stale.len()
            );
            for idle in stale {
                idle.session.close().await;
            }
        }

        let idle = match next {
            Next::Ready(idle) => idle,
            Next::Open => self.inner.open_in_slot().await?,
            Next::Wait(rx) => match rx.await {
                Ok(Grant::Session(idle)) => idle,
                Ok(Grant::Slot) => self.inner.open_in_slot().await?,
                Err(_) => return Err(PoolError::Closed),
            },
        };
        Ok(RendererLease {
            session: Some(idle.session),
            generation: idle.generation,
            engine: idle.engine,
            pool: self.inner.clone(),
        })
    }

    /// Returns a session: reset and reused, or discarded and its slot freed.
    pub async fn release(&self, mut lease: RendererLease) {
        if let Some(idle) = lease.take_idle() {
            lease.pool.give_back(idle).await;
        }
    }

    /// Stops handing out sessions, closes the idle ones, fails every waiter and
    /// shuts the engine down. Leases still out are closed when they come back.
    pub async fn destroy(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.lock();
            state.draining = true;
            let idle = std::mem::take(&mut state.idle);
            state.live = state.live.saturating_sub(idle.len());
            (idle, std::mem::take(&mut state.waiters))
        };
        let failed_waiters = waiters.len();
        drop(waiters);

        let closed = idle.len();
        for idle in idle {
            idle.session.close().await;
        }

        let engine = self.inner.engine.lock().await.engine.take();
        if let Some(engine) = engine {
            engine.shutdown().await;
        }
        info!(
            "[POOL] destroyed: closed {} idle sessions, failed {} waiters",
            closed, failed_waiters
        );
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            capacity: self.inner.capacity,
            live: state.live,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
        }
    }
}

impl RendererLease {
    fn take_idle(&mut self) -> Option<IdleSession> {
        let session = self.session.take()?;
        Some(IdleSession {
            session,
            generation: self.generation,
            engine: self.engine.clone(),
        })
    }

    pub async fn render(
        &mut self,
        request: RenderRequest<'_>,
        loader: &dyn SubresourceLoader,
    ) -> Result<Vec<u8>, RenderError> {
        match self.session.as_mut() {
            Some(session) => session.render(request, loader).await,
            None => Err(RenderError::Session("lease already released".to_string())),
        }
    }
}

impl Drop for RendererLease {
    fn drop(&mut self) {
        let Some(idle) = self.take_idle() else {
            return;
        };
        debug!("[POOL] lease dropped without release, returning it in the background");
        let pool = self.pool.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { pool.give_back(idle).await });
            }
            Err(_) => {
                drop(idle);
                pool.free_slot();
            }
        }
    }
}
