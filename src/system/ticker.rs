//! Generic periodic background task runner
//!
//! Both the Coordinator's liveness monitor and the Runner's heartbeat/
//! self-check loop are one ticker-driven async task apiece; this module
//! gives them a common shape with enable/disable and run statistics.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error};

#[derive(Debug, Clone, Default)]
pub struct TickerStats {
    pub run_count: u64,
    pub failure_count: u64,
    pub last_run: Option<Instant>,
    pub last_duration_ms: u64,
}

struct Ticker {
    name: String,
    enabled: AtomicBool,
    stats: RwLock<TickerStats>,
}

/// Handle to a running periodic task, used to stop it.
pub struct TickerHandle {
    name: String,
    ticker: Arc<Ticker>,
    cancelled: Arc<AtomicBool>,
}

impl TickerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enable(&self) {
        self.ticker.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.ticker.enabled.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub async fn stats(&self) -> TickerStats {
        self.ticker.stats.read().await.clone()
    }
}

/// Spawn a periodic background task. The first tick fires after `interval`,
/// not immediately, matching the teacher's default job behavior.
pub fn spawn_periodic<F, Fut>(name: impl Into<String>, interval: Duration, task: F) -> TickerHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    let ticker = Arc::new(Ticker {
        name: name.clone(),
        enabled: AtomicBool::new(true),
        stats: RwLock::new(TickerStats::default()),
    });
    let cancelled = Arc::new(AtomicBool::new(false));

    let handle = TickerHandle {
        name: name.clone(),
        ticker: ticker.clone(),
        cancelled: cancelled.clone(),
    };

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        loop {
            interval_timer.tick().await;

            if cancelled.load(Ordering::SeqCst) {
                debug!(ticker = %ticker.name, "stopping");
                break;
            }
            if !ticker.enabled.load(Ordering::SeqCst) {
                continue;
            }

            let start = Instant::now();
            let result = tokio::spawn(task()).await;
            let mut stats = ticker.stats.write().await;
            stats.run_count += 1;
            stats.last_run = Some(Instant::now());
            stats.last_duration_ms = start.elapsed().as_millis() as u64;
            if let Err(e) = result {
                stats.failure_count += 1;
                error!(ticker = %ticker.name, error = %e, "periodic task panicked");
            }
        }
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn ticks_run_on_schedule() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let handle = spawn_periodic("test", Duration::from_millis(20), move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.stop();

        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn disable_suppresses_runs() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let handle = spawn_periodic("test", Duration::from_millis(20), move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.disable();
        let count_before = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let count_after = counter.load(Ordering::SeqCst);
        handle.stop();

        assert_eq!(count_before, count_after);
    }
}
