/*!
 * Scheduler Entry Types
 * Ready-queue entries with aging-adjusted effective priority
 */

use crate::core::types::{AdmissionSeq, Pid, Priority, Tick};

/// Ready-queue entry
#[derive(Debug, Clone, Copy)]
pub(super) struct ReadyEntry {
    pub pid: Pid,
    pub priority: Priority,
    pub admission_seq: AdmissionSeq,
    /// Clock value when this entry (re-)joined the ready queue
    pub enqueued_tick: Tick,
}

impl ReadyEntry {
    pub fn new(pid: Pid, priority: Priority, admission_seq: AdmissionSeq, now: Tick) -> Self {
        Self {
            pid,
            priority,
            admission_seq,
            enqueued_tick: now,
        }
    }

    /// Effective priority after aging: each tick spent waiting improves the
    /// value by `increment`, bounded by `limit` so the improvement cannot
    /// grow without bound. Lower is more urgent; the floor is 0, so no
    /// process starves indefinitely.
    pub fn effective_priority(&self, now: Tick, increment: Priority, limit: Priority) -> Priority {
        let waited = now.saturating_sub(self.enqueued_tick);
        let aged = waited.saturating_mul(increment as Tick).min(limit as Tick) as Priority;
        self.priority.saturating_sub(aged)
    }

    /// Deterministic selection key: effective priority first, earliest
    /// admission wins ties.
    pub fn selection_key(
        &self,
        now: Tick,
        increment: Priority,
        limit: Priority,
    ) -> (Priority, AdmissionSeq) {
        (
            self.effective_priority(now, increment, limit),
            self.admission_seq,
        )
    }
}
