use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Single-shot reply timer. `start` arms it, `clear` disarms it.
///
/// Clones share the same timer. A `start` while armed replaces the previous
/// timer; callers are expected to `clear` first.
#[derive(Debug, Clone)]
pub struct Watchdog {
    duration: Duration,
    generation: Arc<AtomicU64>,
    slot: Arc<Mutex<Option<(u64, CancellationToken)>>>,
}

impl Watchdog {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            generation: Arc::new(AtomicU64::new(0)),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Arm the timer; `on_timeout` runs once if it expires before `clear`.
    pub fn start<F>(&self, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        {
            let Ok(mut slot) = self.slot.lock() else { return };
            if let Some((_, old)) = slot.replace((generation, token.clone())) {
                old.cancel();
            }
        }

        let slot = self.slot.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let fired = match slot.lock() {
                        Ok(mut s) if s.as_ref().is_some_and(|(g, _)| *g == generation) => {
                            s.take();
                            true
                        }
                        _ => false,
                    };
                    if fired {
                        on_timeout();
                    }
                }
            }
        });
    }

    /// Disarm. Safe when never started or already cleared.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some((_, token)) = slot.take() {
                token.cancel();
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        (hits, move || -> Box<dyn FnOnce() + Send> {
            let h = h.clone();
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let (hits, cb) = counter();
        let w = Watchdog::new(Duration::from_secs(60));
        w.start(cb());
        assert!(w.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!w.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_prevents_firing() {
        let (hits, cb) = counter();
        let w = Watchdog::new(Duration::from_secs(60));
        w.clear();
        w.start(cb());
        w.clear();
        w.clear();
        assert!(!w.is_armed());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_clear_uses_new_deadline() {
        let (hits, cb) = counter();
        let w = Watchdog::new(Duration::from_secs(10));
        w.start(cb());
        tokio::time::sleep(Duration::from_secs(8)).await;
        w.clear();
        w.start(cb());
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
