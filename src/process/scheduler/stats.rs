/*!
 * Lock-Free Scheduler Statistics
 * Atomic counters for zero-contention stats tracking in hot scheduling paths
 */

use crate::process::types::SchedulerStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Atomic scheduler statistics for lock-free updates
#[repr(C, align(64))]
pub struct AtomicSchedulerStats {
    total_scheduled: AtomicU64,
    preemptions: AtomicU64,
    quota_suspensions: AtomicU64,
    page_faults_resolved: AtomicU64,
    completed: AtomicU64,
    errors: AtomicU64,
    active_processes: AtomicUsize,
    clock: AtomicU64,
}

impl AtomicSchedulerStats {
    pub fn new() -> Self {
        Self {
            total_scheduled: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            quota_suspensions: AtomicU64::new(0),
            page_faults_resolved: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            active_processes: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn inc_scheduled(&self) {
        self.total_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_preemptions(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_quota_suspensions(&self) {
        self.quota_suspensions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_page_faults_resolved(&self) {
        self.page_faults_resolved.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_active(&self) {
        self.active_processes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn dec_active(&self) {
        self.active_processes.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn set_clock(&self, clock: u64) {
        self.clock.store(clock, Ordering::Relaxed);
    }

    /// Snapshot of current stats
    ///
    /// Counter values may not be perfectly consistent with each other under
    /// concurrent updates, but each individual value is accurate.
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            total_scheduled: self.total_scheduled.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            quota_suspensions: self.quota_suspensions.load(Ordering::Relaxed),
            page_faults_resolved: self.page_faults_resolved.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_processes: self.active_processes.load(Ordering::Relaxed),
            clock: self.clock.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicSchedulerStats {
    fn default() -> Self {
        Self::new()
    }
}
