use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

/// Process-wide counters for the Bifrost runtime.
///
/// Updated from hot paths (allocator, store, log stash, hook engine), so
/// every field is atomic; there is no lock protecting this struct as a
/// whole.
pub struct Metrics {
    pub start_time: SystemTime,

    arena_bytes_allocated: AtomicU64,
    arena_bytes_freed: AtomicU64,
    arena_exhausted_total: AtomicU64,

    store_writes_total: AtomicU64,
    store_reads_total: AtomicU64,

    log_pushed_total: AtomicU64,
    log_dropped_total: AtomicU64,
    log_consumed_total: AtomicU64,

    hooks_installed: AtomicUsize,
    hooks_removed_total: AtomicU64,
    hook_chain_max_depth: AtomicUsize,

    remote_thread_timeouts: AtomicU64,
    remote_thread_failures: AtomicU64,

    backoff_spins: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            arena_bytes_allocated: AtomicU64::new(0),
            arena_bytes_freed: AtomicU64::new(0),
            arena_exhausted_total: AtomicU64::new(0),
            store_writes_total: AtomicU64::new(0),
            store_reads_total: AtomicU64::new(0),
            log_pushed_total: AtomicU64::new(0),
            log_dropped_total: AtomicU64::new(0),
            log_consumed_total: AtomicU64::new(0),
            hooks_installed: AtomicUsize::new(0),
            hooks_removed_total: AtomicU64::new(0),
            hook_chain_max_depth: AtomicUsize::new(0),
            remote_thread_timeouts: AtomicU64::new(0),
            remote_thread_failures: AtomicU64::new(0),
            backoff_spins: AtomicU64::new(0),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    pub fn record_allocation(&self, bytes: u64) {
        self.arena_bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_deallocation(&self, bytes: u64) {
        self.arena_bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_arena_exhausted(&self) {
        self.arena_exhausted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn arena_bytes_in_use(&self) -> u64 {
        self.arena_bytes_allocated
            .load(Ordering::Relaxed)
            .saturating_sub(self.arena_bytes_freed.load(Ordering::Relaxed))
    }

    pub fn inc_store_write(&self) {
        self.store_writes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_read(&self) {
        self.store_reads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_log_pushed(&self) {
        self.log_pushed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_log_dropped(&self) {
        self.log_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_log_consumed(&self, n: u64) {
        self.log_consumed_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn log_dropped_total(&self) -> u64 {
        self.log_dropped_total.load(Ordering::Relaxed)
    }

    pub fn set_hooks_installed(&self, n: usize) {
        self.hooks_installed.store(n, Ordering::Relaxed);
    }

    pub fn hooks_installed(&self) -> usize {
        self.hooks_installed.load(Ordering::Relaxed)
    }

    pub fn inc_hooks_removed(&self) {
        self.hooks_removed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_chain_depth(&self, depth: usize) {
        self.hook_chain_max_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn hook_chain_max_depth(&self) -> usize {
        self.hook_chain_max_depth.load(Ordering::Relaxed)
    }

    pub fn inc_remote_thread_timeout(&self) {
        self.remote_thread_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_remote_thread_failure(&self) {
        self.remote_thread_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_backoff_spins(&self, n: u64) {
        self.backoff_spins.fetch_add(n, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_bytes_in_use_tracks_allocations_and_frees() {
        let m = Metrics::new();
        m.record_allocation(128);
        m.record_allocation(64);
        assert_eq!(m.arena_bytes_in_use(), 192);
        m.record_deallocation(64);
        assert_eq!(m.arena_bytes_in_use(), 128);
    }

    #[test]
    fn chain_depth_tracks_the_maximum_observed() {
        let m = Metrics::new();
        m.observe_chain_depth(2);
        m.observe_chain_depth(5);
        m.observe_chain_depth(3);
        assert_eq!(m.hook_chain_max_depth(), 5);
    }
}
