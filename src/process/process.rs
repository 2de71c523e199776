/*!
 * Agent Process Control Block
 * The schedulable unit: identity, priority, quota accounting, state
 */

use super::types::{AgentState, ProcessInfo, QuotaDimension, QuotaUsage, ResourceQuota};
use crate::core::types::{now_micros, AdmissionSeq, Pid, Priority};
use serde::{Deserialize, Serialize};

/// Agent process control block
///
/// Owned exclusively by the scheduler; its page table lives in the context
/// manager's arena keyed by the same pid (no back-pointers between the two).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentProcess {
    pub pid: Pid,
    pub name: String,
    pub priority: Priority,
    pub state: AgentState,
    pub quota: ResourceQuota,
    pub usage: QuotaUsage,
    /// Steps left in the current dispatch
    pub time_slice_remaining: u32,
    /// Assigned once at spawn; preserved across re-enqueues so a process
    /// returning from Waiting keeps its place among equals
    pub admission_seq: AdmissionSeq,
    pub created_at_micros: u64,
    pub last_run_micros: u64,
    /// Non-fatal step errors accumulated so far
    pub step_errors: u32,
    /// Dimension that caused the last quota suspension, if any
    pub suspended_on: Option<QuotaDimension>,
}

impl AgentProcess {
    pub fn new(
        pid: Pid,
        name: String,
        priority: Priority,
        quota: ResourceQuota,
        admission_seq: AdmissionSeq,
    ) -> Self {
        Self {
            pid,
            name,
            priority,
            state: AgentState::New,
            quota,
            usage: QuotaUsage::default(),
            time_slice_remaining: 0,
            admission_seq,
            created_at_micros: now_micros(),
            last_run_micros: 0,
            step_errors: 0,
            suspended_on: None,
        }
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            quota: self.quota,
            usage: self.usage,
            suspended_on: self.suspended_on,
        }
    }
}
