use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Bounded reconciliation loop: runs `tick` every `interval` until `duration`
/// has elapsed, `tick` returns false, or the handle is cancelled.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
    ticks: Arc<AtomicUsize>,
}

impl PollHandle {
    /// Spawn on the ambient tokio runtime. Returns `None` outside a runtime,
    /// for a zero interval, or when the bound runs past the clock's range.
    pub fn spawn<F>(interval: Duration, duration: Duration, tick: F) -> Option<Self>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        if interval.is_zero() {
            return None;
        }
        let start = Instant::now();
        let deadline = start.checked_add(duration)?;
        let first_tick = start.checked_add(interval)?;
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let finished = tokio::time::timeout_at(deadline, async {
                loop {
                    ticker.tick().await;
                    counter.fetch_add(1, Ordering::Relaxed);
                    if !tick() {
                        break;
                    }
                }
            })
            .await;

            tracing::debug!(
                target: "layerscope-core::poll",
                "late-creation poll stopped after {} ticks ({})",
                counter.load(Ordering::Relaxed),
                if finished.is_ok() { "released" } else { "bound elapsed" }
            );
        });

        Some(Self { task, ticks })
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_outside_runtime_is_none() {
        assert!(PollHandle::spawn(Duration::from_millis(10), Duration::from_secs(1), || true).is_none());
    }

    #[test]
    fn unusable_timing_is_refused() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert!(PollHandle::spawn(Duration::ZERO, Duration::from_secs(1), || true).is_none());
            assert!(PollHandle::spawn(Duration::from_millis(10), Duration::MAX, || true).is_none());
        });
    }
}
