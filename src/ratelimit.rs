use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Enforces a fixed floor between consecutive calls to one external service.
///
/// Shared by every thread using the adapter; callers queue on the lock, so
/// concurrent jobs never burst past the floor together.
#[derive(Debug)]
pub struct MinIntervalLimiter {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl MinIntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the floor has elapsed since the previous call.
    pub fn wait(&self) {
        let mut last_call = self
            .last_call
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_does_not_wait() {
        let limiter = MinIntervalLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn consecutive_calls_respect_floor() {
        let limiter = MinIntervalLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
