use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PoolSection;

use super::backend::{BrowserBackend, BrowserInstance, PageTab};
use super::error::{BrowserError, BrowserResult};
use super::metrics::PoolStats;

/// Owns the single shared browser process.
///
/// Launches are serialized behind the slot lock, so callers that arrive
/// while a launch is in flight wait for it and then reuse its result. Every
/// handed-out [`BrowserLease`] pins the browser against the idle reaper.
#[derive(Clone)]
pub struct BrowserPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    backend: Arc<dyn BrowserBackend>,
    config: PoolSection,
    slot: AsyncMutex<Option<Arc<PooledBrowser>>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    launches: AtomicU64,
    reuses: AtomicU64,
    failed_probes: AtomicU64,
    idle_teardowns: AtomicU64,
}

struct PooledBrowser {
    id: Uuid,
    instance: Arc<dyn BrowserInstance>,
    leases: AtomicUsize,
    epoch: Instant,
    last_used_ms: AtomicU64,
}

impl PooledBrowser {
    fn new(instance: Arc<dyn BrowserInstance>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance,
            leases: AtomicUsize::new(0),
            epoch: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_used_ms.store(elapsed, Ordering::SeqCst);
    }

    fn idle_for(&self) -> Duration {
        let last_used = Duration::from_millis(self.last_used_ms.load(Ordering::SeqCst));
        self.epoch.elapsed().saturating_sub(last_used)
    }

    fn active_leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }
}

impl BrowserPool {
    /// Creates the pool and starts its idle reaper. Must be called from
    /// within a tokio runtime. No browser is launched until the first
    /// [`acquire`](Self::acquire).
    pub fn new(backend: Arc<dyn BrowserBackend>, config: PoolSection) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(PoolInner {
            backend,
            config,
            slot: AsyncMutex::new(None),
            closed: AtomicBool::new(false),
            shutdown,
            launches: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            failed_probes: AtomicU64::new(0),
            idle_teardowns: AtomicU64::new(0),
        });
        spawn_reaper(Arc::downgrade(&inner), shutdown_rx);
        Self { inner }
    }

    /// Returns a lease on a live browser, launching one when none is cached
    /// or the cached one fails its liveness probe. Launch failures propagate.
    pub async fn acquire(&self) -> BrowserResult<BrowserLease> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Unexpected("browser pool is shut down".into()));
        }
        let mut slot = self.inner.slot.lock().await;
        // Shutdown may have run while this call waited on the slot.
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Unexpected("browser pool is shut down".into()));
        }

        if let Some(current) = slot.as_ref() {
            match current.instance.probe().await {
                Ok(()) => {
                    self.inner.reuses.fetch_add(1, Ordering::Relaxed);
                    debug!(browser = %current.id, "reusing pooled browser");
                    return Ok(BrowserLease::new(Arc::clone(current)));
                }
                Err(err) => {
                    self.inner.failed_probes.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        browser = %current.id,
                        error = %err,
                        "pooled browser failed liveness probe; relaunching"
                    );
                    if let Some(stale) = slot.take() {
                        retire(stale);
                    }
                }
            }
        }

        let instance = self.inner.backend.launch().await?;
        self.inner.launches.fetch_add(1, Ordering::Relaxed);
        let pooled = Arc::new(PooledBrowser::new(instance));
        info!(browser = %pooled.id, "browser launched into pool");
        let lease = BrowserLease::new(Arc::clone(&pooled));
        *slot = Some(pooled);
        Ok(lease)
    }

    /// Tears the browser down when it has no leases and has been idle past
    /// the configured timeout. Returns whether a teardown happened.
    pub async fn sweep_idle(&self) -> bool {
        let mut slot = self.inner.slot.lock().await;
        let expired = slot.as_ref().is_some_and(|browser| {
            browser.active_leases() == 0 && browser.idle_for() >= self.inner.config.idle_timeout()
        });
        if !expired {
            return false;
        }
        if let Some(browser) = slot.take() {
            info!(
                browser = %browser.id,
                idle_secs = browser.idle_for().as_secs(),
                "closing browser after inactivity"
            );
            if let Err(err) = browser.instance.close().await {
                warn!(browser = %browser.id, error = %err, "failed to close idle browser");
            }
            self.inner.idle_teardowns.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Stops the reaper and closes the browser. Subsequent acquires fail.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.inner.shutdown.send(true);
        let browser = self.inner.slot.lock().await.take();
        if let Some(browser) = browser {
            info!(
                browser = %browser.id,
                active_leases = browser.active_leases(),
                "closing pooled browser on shutdown"
            );
            if let Err(err) = browser.instance.close().await {
                warn!(
                    browser = %browser.id,
                    error = %err,
                    "failed to close browser on shutdown"
                );
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let slot = self.inner.slot.lock().await;
        PoolStats {
            launches: self.inner.launches.load(Ordering::Relaxed),
            reuses: self.inner.reuses.load(Ordering::Relaxed),
            failed_probes: self.inner.failed_probes.load(Ordering::Relaxed),
            idle_teardowns: self.inner.idle_teardowns.load(Ordering::Relaxed),
            active_leases: slot.as_ref().map_or(0, |browser| browser.active_leases()),
            browser_running: slot.is_some(),
        }
    }
}

fn retire(stale: Arc<PooledBrowser>) {
    tokio::spawn(async move {
        if let Err(err) = stale.instance.close().await {
            debug!(browser = %stale.id, error = %err, "failed to close stale browser");
        }
    });
}

fn spawn_reaper(pool: Weak<PoolInner>, mut shutdown: watch::Receiver<bool>) {
    let Some(period) = pool
        .upgrade()
        .map(|inner| inner.config.sweep_interval().max(Duration::from_millis(1)))
    else {
        return;
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let Some(inner) = pool.upgrade() else {
                break;
            };
            BrowserPool { inner }.sweep_idle().await;
        }
        debug!("browser pool reaper stopped");
    });
}

/// Shared use of the pooled browser; dropping it releases the pin and
/// refreshes the idle clock.
pub struct BrowserLease {
    browser: Arc<PooledBrowser>,
}

impl BrowserLease {
    fn new(browser: Arc<PooledBrowser>) -> Self {
        browser.leases.fetch_add(1, Ordering::SeqCst);
        browser.touch();
        Self { browser }
    }

    pub fn browser_id(&self) -> Uuid {
        self.browser.id
    }

    pub async fn open_tab(&self) -> BrowserResult<Box<dyn PageTab>> {
        self.browser.instance.open_tab().await
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        self.browser.touch();
        self.browser.leases.fetch_sub(1, Ordering::SeqCst);
    }
}
