use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Keeps OCR calls at least `min_interval` apart across every thread that
/// shares it.
///
/// A caller claims the next slot under the mutex. If the previous call was
/// too recent it sleeps on the condition variable until the slot opens.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    slot_free: Condvar,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
            slot_free: Condvar::new(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until a call may be made and records it as made now.
    pub fn acquire(&self) {
        let mut last_call = self.lock();
        loop {
            let now = Instant::now();
            let wait = match *last_call {
                Some(previous) => self.min_interval.saturating_sub(now.duration_since(previous)),
                None => Duration::ZERO,
            };
            if wait.is_zero() {
                *last_call = Some(now);
                // Other waiters recompute their deadline from the new slot.
                self.slot_free.notify_all();
                return;
            }
            last_call = match self.slot_free.wait_timeout(last_call, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        // A poisoned timestamp is still a valid timestamp.
        self.last_call.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_call_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();
        limiter.acquire();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_spacing_between_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire();
        }
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_spacing_across_threads() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(40)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    limiter.acquire();
                    Instant::now()
                })
            })
            .collect();

        let last = handles.into_iter().map(|h| h.join().unwrap()).max().unwrap();
        assert!(last.duration_since(start) >= Duration::from_millis(120));
    }
}
