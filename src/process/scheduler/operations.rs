/*!
 * Scheduler Core Operations
 * Spawn, schedule, tick, terminate, and state transitions
 */

use super::entry::ReadyEntry;
use super::Scheduler;
use crate::core::errors::KernelError;
use crate::core::types::{now_micros, KernelResult, Pid, Priority, Tick, PRIORITY_MAX};
use crate::process::process::AgentProcess;
use crate::process::types::{
    AgentState, ProcessInfo, QuotaUsage, ResourceQuota, SchedulerStats, StepCost,
};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;

impl Scheduler {
    /// Create a new process and admit it to the ready queue
    pub fn spawn(
        &self,
        name: String,
        priority: Priority,
        quota: ResourceQuota,
    ) -> KernelResult<Pid> {
        if name.is_empty() {
            return Err(KernelError::Validation("process name must not be empty".into()));
        }
        if priority > PRIORITY_MAX {
            return Err(KernelError::Validation(format!(
                "priority {} out of range 0..={}",
                priority, PRIORITY_MAX
            )));
        }
        quota.validate().map_err(KernelError::Validation)?;

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut process = AgentProcess::new(pid, name, priority, quota, seq);
        process.state = AgentState::Ready;

        let mut queue = self.queue.lock();
        let clock = queue.clock;
        queue.ready.push(ReadyEntry::new(pid, priority, seq, clock));
        self.processes.insert(pid, process);
        drop(queue);

        self.stats.inc_active();
        info!("Spawned process {} (priority {})", pid, priority);
        Ok(pid)
    }

    /// Re-admit a restored process with usage carried over from a snapshot.
    /// Used by the checkpoint coordinator; always gets a fresh pid.
    pub(crate) fn admit_restored(
        &self,
        name: String,
        priority: Priority,
        quota: ResourceQuota,
        usage: QuotaUsage,
    ) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut process = AgentProcess::new(pid, name, priority, quota, seq);
        process.state = AgentState::Ready;
        process.usage = usage;

        let mut queue = self.queue.lock();
        let clock = queue.clock;
        queue.ready.push(ReadyEntry::new(pid, priority, seq, clock));
        self.processes.insert(pid, process);
        drop(queue);

        self.stats.inc_active();
        info!("Restored process admitted as pid {}", pid);
        pid
    }

    /// Select the next process to run, or None if nothing is Ready or all
    /// execution slots are taken
    pub fn schedule(&self) -> Option<Pid> {
        let mut queue = self.queue.lock();
        if queue.running.len() >= self.params.max_concurrent {
            return None;
        }

        // Drop stale entries left behind by terminate/suspend
        let processes = &self.processes;
        queue.ready.retain(|e| {
            processes
                .get(&e.pid)
                .map(|p| p.state == AgentState::Ready)
                .unwrap_or(false)
        });

        let now = queue.clock;
        let (increment, limit) = (self.params.aging_increment, self.params.aging_limit);
        let idx = queue
            .ready
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.selection_key(now, increment, limit))
            .map(|(i, _)| i)?;

        let entry = queue.ready.swap_remove(idx);
        let pid = entry.pid;

        if let Some(mut process) = self.processes.get_mut(&pid) {
            process.state = AgentState::Running;
            process.time_slice_remaining = self.params.time_slice_steps;
            process.last_run_micros = now_micros();
        }
        queue.running.insert(pid);
        drop(queue);

        self.stats.inc_scheduled();
        debug!("Scheduled process {}", pid);
        Some(pid)
    }

    /// Account one completed step and apply the resulting transition.
    ///
    /// Advances the logical clock, charges the step cost against the quota,
    /// and decrements the time slice. Returns the state the process ended up
    /// in so the caller can react: Running (keep stepping), Ready (slice
    /// expired), or Suspended (quota exceeded).
    pub fn tick(&self, pid: Pid, cost: StepCost) -> KernelResult<AgentState> {
        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;

        if process.state != AgentState::Running {
            return Err(KernelError::invalid_state(
                pid,
                format!("tick requires Running, process is {}", process.state),
            ));
        }

        // Only accounted steps advance the logical clock
        queue.clock += 1;
        self.stats.set_clock(queue.clock);

        process.usage.tokens += cost.tokens;
        process.usage.iterations += 1;
        process.usage.wall_clock += cost.wall_clock;
        process.usage.memory_peak = process.usage.memory_peak.max(cost.resident_tokens);

        if let Some(dimension) = process.usage.exceeded(&process.quota) {
            process.state = AgentState::Suspended;
            process.suspended_on = Some(dimension);
            queue.running.remove(&pid);
            self.stats.inc_quota_suspensions();
            warn!("Process {} suspended: {} quota exceeded", pid, dimension);
            return Ok(AgentState::Suspended);
        }

        process.time_slice_remaining = process.time_slice_remaining.saturating_sub(1);
        if process.time_slice_remaining == 0 {
            process.state = AgentState::Ready;
            let entry = ReadyEntry::new(pid, process.priority, process.admission_seq, queue.clock);
            drop(process);
            queue.running.remove(&pid);
            queue.ready.push(entry);
            self.stats.inc_preemptions();
            debug!("Process {} preempted: time slice expired", pid);
            return Ok(AgentState::Ready);
        }

        Ok(AgentState::Running)
    }

    /// Park a Running process on a page fault
    pub fn begin_wait(&self, pid: Pid) -> KernelResult<()> {
        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;

        if process.state != AgentState::Running {
            return Err(KernelError::invalid_state(
                pid,
                format!("wait requires Running, process is {}", process.state),
            ));
        }

        process.state = AgentState::Waiting;
        queue.running.remove(&pid);
        debug!("Process {} waiting on page fault", pid);
        Ok(())
    }

    /// Wake a Waiting process once its swap-in completed.
    ///
    /// Re-enqueued at its current priority with the original admission
    /// sequence, so it keeps its place among equals rather than going to the
    /// back unconditionally.
    pub fn wake(&self, pid: Pid) -> KernelResult<()> {
        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;

        if process.state != AgentState::Waiting {
            return Err(KernelError::invalid_state(
                pid,
                format!("wake requires Waiting, process is {}", process.state),
            ));
        }

        process.state = AgentState::Ready;
        let entry = ReadyEntry::new(pid, process.priority, process.admission_seq, queue.clock);
        drop(process);
        queue.ready.push(entry);
        self.stats.inc_page_faults_resolved();
        debug!("Process {} woken, page fault resolved", pid);
        Ok(())
    }

    /// Suspend an active process (operator action or storage-failure demotion)
    pub fn suspend(&self, pid: Pid) -> KernelResult<()> {
        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;

        match process.state {
            AgentState::Terminated => Err(KernelError::invalid_state(
                pid,
                "cannot suspend a terminated process",
            )),
            AgentState::Suspended => Ok(()),
            _ => {
                process.state = AgentState::Suspended;
                drop(process);
                queue.running.remove(&pid);
                queue.ready.retain(|e| e.pid != pid);
                info!("Process {} suspended", pid);
                Ok(())
            }
        }
    }

    /// Resume a Suspended process back to Ready
    pub fn resume(&self, pid: Pid) -> KernelResult<()> {
        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;

        if process.state != AgentState::Suspended {
            return Err(KernelError::invalid_state(
                pid,
                format!("resume requires Suspended, process is {}", process.state),
            ));
        }

        process.state = AgentState::Ready;
        process.suspended_on = None;
        let entry = ReadyEntry::new(pid, process.priority, process.admission_seq, queue.clock);
        drop(process);
        queue.ready.push(entry);
        info!("Process {} resumed", pid);
        Ok(())
    }

    /// Replace a process's quota (e.g. to lift a suspension cause)
    pub fn set_quota(&self, pid: Pid, quota: ResourceQuota) -> KernelResult<()> {
        quota.validate().map_err(KernelError::Validation)?;
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        if process.state == AgentState::Terminated {
            return Err(KernelError::invalid_state(pid, "process is terminated"));
        }
        process.quota = quota;
        Ok(())
    }

    /// Terminate a process; idempotent
    pub fn terminate(&self, pid: Pid) -> KernelResult<()> {
        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;

        if process.state == AgentState::Terminated {
            return Ok(());
        }

        process.state = AgentState::Terminated;
        drop(process);
        queue.running.remove(&pid);
        queue.ready.retain(|e| e.pid != pid);
        drop(queue);

        self.stats.dec_active();
        self.stats.inc_completed();
        info!("Process {} terminated", pid);
        Ok(())
    }

    /// Update priority; takes effect on the next scheduling decision
    pub fn set_priority(&self, pid: Pid, priority: Priority) -> KernelResult<()> {
        if priority > PRIORITY_MAX {
            return Err(KernelError::Validation(format!(
                "priority {} out of range 0..={}",
                priority, PRIORITY_MAX
            )));
        }

        let mut queue = self.queue.lock();
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        if process.state == AgentState::Terminated {
            return Err(KernelError::invalid_state(pid, "process is terminated"));
        }

        process.priority = priority;
        drop(process);
        if let Some(entry) = queue.ready.iter_mut().find(|e| e.pid == pid) {
            entry.priority = priority;
        }
        info!("Process {} priority set to {}", pid, priority);
        Ok(())
    }

    /// Record a non-fatal step error; returns the running error count
    pub fn note_step_error(&self, pid: Pid) -> KernelResult<u32> {
        let mut process = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        process.step_errors += 1;
        self.stats.inc_errors();
        Ok(process.step_errors)
    }

    /// Consistent copy of a PCB; blocks out tick for the duration
    pub fn snapshot_process(&self, pid: Pid) -> KernelResult<AgentProcess> {
        let _queue = self.queue.lock();
        self.processes
            .get(&pid)
            .map(|p| p.clone())
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub fn state(&self, pid: Pid) -> KernelResult<AgentState> {
        self.processes
            .get(&pid)
            .map(|p| p.state)
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub fn info(&self, pid: Pid) -> KernelResult<ProcessInfo> {
        self.processes
            .get(&pid)
            .map(|p| p.info())
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        self.processes.iter().map(|r| r.value().info()).collect()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Logical clock value (ticks so far)
    pub fn clock(&self) -> Tick {
        self.queue.lock().clock
    }

    /// Number of non-terminated processes
    pub fn len(&self) -> usize {
        self.processes
            .iter()
            .filter(|r| r.value().state.is_active())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }
}
