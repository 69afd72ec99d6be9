use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// A monotonic time source that can also block for a while.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn delay(&self, duration: Duration);
}

/// The wall clock. Delays sleep the calling thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn delay(&self, duration: Duration) {
        if duration < Duration::from_micros(100) {
            // Short waits spin, sleep granularity is far coarser.
            let start = Instant::now();
            while start.elapsed() < duration {
                std::hint::spin_loop();
            }
        } else {
            std::thread::sleep(duration);
        }
    }
}

/// A virtual clock. Delays advance time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    fn delay(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn delay(&self, duration: Duration) {
        (**self).delay(duration)
    }
}

/// How to wait for firmware to complete a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first check.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Upper bound on the total wait, whichever of this and `max_attempts` hits first.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_micros(5),
            poll_interval: Duration::from_micros(10),
            max_attempts: 10_000,
            deadline: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Polls `done` until it returns `true` or the policy is exhausted. Returns whether
    /// the condition was met.
    pub fn poll<C: Clock + ?Sized>(&self, clock: &C, mut done: impl FnMut() -> bool) -> bool {
        clock.delay(self.initial_delay);
        let start = clock.now();

        for _ in 0..self.max_attempts {
            if done() {
                return true;
            }
            if clock.now().saturating_sub(start) >= self.deadline {
                return false;
            }
            clock.delay(self.poll_interval);
        }

        done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_stops_at_deadline() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::default();
        let mut checks = 0;
        assert!(!policy.poll(&clock, || {
            checks += 1;
            false
        }));

        // 100ms deadline at a 10us interval
        assert_eq!(checks, 10_001);
        assert_eq!(clock.now(), Duration::from_micros(5) + Duration::from_millis(100));
    }

    #[test]
    fn poll_stops_at_max_attempts() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::default().with_max_attempts(3);
        let mut checks = 0;
        assert!(!policy.poll(&clock, || {
            checks += 1;
            false
        }));
        assert_eq!(checks, 4);
    }

    #[test]
    fn poll_succeeds_early() {
        let clock = ManualClock::new();
        let mut checks = 0;
        assert!(RetryPolicy::default().poll(&clock, || {
            checks += 1;
            checks == 3
        }));
        assert_eq!(clock.now(), Duration::from_micros(25));
    }
}
