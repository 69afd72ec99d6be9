use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one scheduler.
#[derive(Debug, Default)]
pub struct SchedStats {
    /// Commands sent to firmware
    commands: AtomicUsize,
    /// Commands that failed in transport or firmware
    cmd_errors: AtomicUsize,
    nodes_added: AtomicUsize,
    nodes_removed: AtomicUsize,
    profiles_added: AtomicUsize,
    profiles_removed: AtomicUsize,
}

impl SchedStats {
    #[inline]
    pub(crate) fn increment_commands(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_cmd_errors(&self) {
        self.cmd_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_nodes_added(&self, n: usize) {
        self.nodes_added.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_nodes_removed(&self, n: usize) {
        self.nodes_removed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_profiles_added(&self) {
        self.profiles_added.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_profiles_removed(&self) {
        self.profiles_removed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cmd_errors(&self) -> usize {
        self.cmd_errors.load(Ordering::Relaxed)
    }

    /// Elements created in firmware through add commands.
    #[inline]
    pub fn nodes_added(&self) -> usize {
        self.nodes_added.load(Ordering::Relaxed)
    }

    /// Elements deleted from firmware.
    #[inline]
    pub fn nodes_removed(&self) -> usize {
        self.nodes_removed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn profiles_added(&self) -> usize {
        self.profiles_added.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn profiles_removed(&self) -> usize {
        self.profiles_removed.load(Ordering::Relaxed)
    }
}
