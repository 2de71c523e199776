/*!
 * Agent Scheduler
 * Priority scheduling with aging, step-granular time slices, and quota
 * enforcement. Preemption is only observable at step boundaries because the
 * external step call itself is not preemptable.
 */

use super::process::AgentProcess;
use crate::core::config::KernelConfig;
use crate::core::types::{Pid, Priority, Tick};
use ahash::RandomState;
use dashmap::DashMap;
use log::info;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::Arc;

mod entry;
mod operations;
mod stats;

use entry::ReadyEntry;
use stats::AtomicSchedulerStats;

/// Queue state guarded by a single mutex
///
/// Held only for short critical sections; never across a storage or
/// executor call.
struct RunState {
    ready: Vec<ReadyEntry>,
    running: HashSet<Pid>,
    clock: Tick,
}

/// Scheduling parameters lifted from the kernel config at construction
#[derive(Debug, Clone, Copy)]
struct SchedulerParams {
    time_slice_steps: u32,
    aging_increment: Priority,
    aging_limit: Priority,
    max_concurrent: usize,
}

/// Agent scheduler
///
/// Exclusively owns the process control blocks and every state transition.
/// Selection is deterministic: minimum aging-adjusted effective priority,
/// with earliest admission winning ties.
pub struct Scheduler {
    processes: Arc<DashMap<Pid, AgentProcess, RandomState>>,
    queue: Arc<Mutex<RunState>>,
    next_pid: Arc<AtomicU32>,
    next_seq: Arc<AtomicU64>,
    params: SchedulerParams,
    stats: Arc<AtomicSchedulerStats>,
}

impl Scheduler {
    pub fn new(config: &KernelConfig) -> Self {
        info!(
            "Scheduler initialized: slice={} steps, aging={}/tick (limit {}), max_concurrent={}",
            config.time_slice_steps,
            config.aging_increment,
            config.aging_limit,
            config.max_concurrent_agents
        );

        Self {
            processes: Arc::new(DashMap::with_hasher(RandomState::new())),
            queue: Arc::new(Mutex::new(RunState {
                ready: Vec::new(),
                running: HashSet::new(),
                clock: 0,
            })),
            next_pid: Arc::new(AtomicU32::new(1)),
            next_seq: Arc::new(AtomicU64::new(0)),
            params: SchedulerParams {
                time_slice_steps: config.time_slice_steps,
                aging_increment: config.aging_increment,
                aging_limit: config.aging_limit,
                max_concurrent: config.max_concurrent_agents,
            },
            stats: Arc::new(AtomicSchedulerStats::new()),
        }
    }
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            processes: Arc::clone(&self.processes),
            queue: Arc::clone(&self.queue),
            next_pid: Arc::clone(&self.next_pid),
            next_seq: Arc::clone(&self.next_seq),
            params: self.params,
            stats: Arc::clone(&self.stats),
        }
    }
}
