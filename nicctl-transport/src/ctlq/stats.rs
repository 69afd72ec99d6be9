use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one control queue.
#[derive(Debug, Default)]
pub struct CtlqStats {
    /// Commands posted to the send queue
    sent: AtomicUsize,
    /// Commands firmware completed with a non-zero return code
    cmd_errors: AtomicUsize,
    timeouts: AtomicUsize,
    /// Events drained from the receive queue
    events: AtomicUsize,
    busy_retries: AtomicUsize,
}

impl CtlqStats {
    #[inline]
    pub(crate) fn increment_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_cmd_errors(&self) {
        self.cmd_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_events(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_busy_retries(&self) {
        self.busy_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cmd_errors(&self) -> usize {
        self.cmd_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events(&self) -> usize {
        self.events.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn busy_retries(&self) -> usize {
        self.busy_retries.load(Ordering::Relaxed)
    }
}
