mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use streamprobe_core::browser::{BrowserError, BrowserPool};
use streamprobe_core::config::PoolSection;

use support::FakeBackend;

fn pool_section() -> PoolSection {
    PoolSection {
        idle_timeout_seconds: 300,
        sweep_interval_seconds: 60,
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_share_one_launch() {
    let mut backend = FakeBackend::empty();
    backend.launch_delay = Duration::from_millis(250);
    let backend = Arc::new(backend);
    let pool = BrowserPool::new(backend.clone(), pool_section());

    let leases = join_all((0..5).map(|_| pool.acquire())).await;
    let leases = leases
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("all acquires succeed");

    assert_eq!(backend.counters.launches(), 1);
    let id = leases[0].browser_id();
    assert!(leases.iter().all(|lease| lease.browser_id() == id));
    let stats = pool.stats().await;
    assert_eq!(stats.active_leases, 5);
    assert_eq!(stats.reuses, 4);
}

#[tokio::test(start_paused = true)]
async fn idle_sweep_waits_for_leases() {
    let backend = Arc::new(FakeBackend::empty());
    // Keep the background reaper out of the way; sweeps are driven by hand.
    let section = PoolSection {
        sweep_interval_seconds: 3600,
        ..pool_section()
    };
    let pool = BrowserPool::new(backend.clone(), section);

    let lease = pool.acquire().await.expect("acquire");
    tokio::time::advance(Duration::from_secs(900)).await;
    assert!(!pool.sweep_idle().await, "leased browser must survive the sweep");

    drop(lease);
    assert!(!pool.sweep_idle().await, "release refreshes the idle clock");

    tokio::time::advance(Duration::from_secs(301)).await;
    assert!(pool.sweep_idle().await);
    assert_eq!(backend.counters.browsers_closed(), 1);
    assert!(!pool.stats().await.browser_running);
}

#[tokio::test(start_paused = true)]
async fn reaper_tears_down_idle_browser_and_next_acquire_relaunches() {
    let backend = Arc::new(FakeBackend::empty());
    let pool = BrowserPool::new(backend.clone(), pool_section());

    drop(pool.acquire().await.expect("acquire"));
    tokio::time::sleep(Duration::from_secs(400)).await;

    let stats = pool.stats().await;
    assert!(!stats.browser_running);
    assert_eq!(stats.idle_teardowns, 1);
    assert_eq!(backend.counters.browsers_closed(), 1);

    let _lease = pool.acquire().await.expect("relaunch");
    assert_eq!(backend.counters.launches(), 2);
}

#[tokio::test]
async fn failed_probe_replaces_browser() {
    let backend = Arc::new(FakeBackend::empty());
    let pool = BrowserPool::new(backend.clone(), pool_section());

    let first = pool.acquire().await.expect("acquire").browser_id();
    backend.healthy.store(false, Ordering::SeqCst);
    let second = pool.acquire().await.expect("relaunch").browser_id();

    assert_ne!(first, second);
    assert_eq!(backend.counters.launches(), 2);
    assert_eq!(pool.stats().await.failed_probes, 1);
}

#[tokio::test]
async fn healthy_browser_is_reused() {
    let backend = Arc::new(FakeBackend::empty());
    let pool = BrowserPool::new(backend.clone(), pool_section());

    let first = pool.acquire().await.expect("acquire").browser_id();
    let second = pool.acquire().await.expect("acquire").browser_id();

    assert_eq!(first, second);
    assert_eq!(backend.counters.launches(), 1);
    assert_eq!(pool.stats().await.reuses, 1);
}

#[tokio::test]
async fn launch_failure_is_returned_and_not_cached() {
    let mut backend = FakeBackend::empty();
    backend.fail_launch = true;
    let pool = BrowserPool::new(Arc::new(backend), pool_section());

    assert!(matches!(pool.acquire().await, Err(BrowserError::Launch(_))));
    assert!(!pool.stats().await.browser_running);
}

#[tokio::test]
async fn shutdown_closes_browser_and_rejects_acquires() {
    let backend = Arc::new(FakeBackend::empty());
    let pool = BrowserPool::new(backend.clone(), pool_section());

    drop(pool.acquire().await.expect("acquire"));
    pool.shutdown().await;

    assert_eq!(backend.counters.browsers_closed(), 1);
    assert!(pool.acquire().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn acquire_waiting_on_launch_is_rejected_by_shutdown() {
    let mut backend = FakeBackend::empty();
    backend.launch_delay = Duration::from_secs(1);
    let backend = Arc::new(backend);
    let pool = BrowserPool::new(backend.clone(), pool_section());

    let first = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(drop) }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let queued = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(drop) }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let closing = tokio::spawn({
        let pool = pool.clone();
        async move { pool.shutdown().await }
    });

    assert!(first.await.unwrap().is_ok());
    assert!(queued.await.unwrap().is_err());
    closing.await.unwrap();

    assert_eq!(backend.counters.launches(), 1);
    assert_eq!(backend.counters.browsers_closed(), 1);
    assert!(!pool.stats().await.browser_running);
}
