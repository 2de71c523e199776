/*!
 * Process Types
 * Common types for agent process management
 */

use crate::core::types::{Pid, Priority, Tokens};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Agent process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Created but not yet admitted
    New,
    /// Admitted, waiting to be dispatched
    Ready,
    /// Currently executing steps
    Running,
    /// Parked on a page fault or storage operation
    Waiting,
    /// Quota exhausted or explicitly paused; resumable
    Suspended,
    /// Terminal state
    Terminated,
}

impl AgentState {
    /// Whether the process still participates in scheduling
    pub fn is_active(&self) -> bool {
        !matches!(self, AgentState::Terminated)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::New => "new",
            AgentState::Ready => "ready",
            AgentState::Running => "running",
            AgentState::Waiting => "waiting",
            AgentState::Suspended => "suspended",
            AgentState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Per-process resource ceilings; None means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceQuota {
    pub max_tokens: Option<Tokens>,
    pub max_iterations: Option<u64>,
    pub max_wall_clock: Option<Duration>,
    pub max_memory: Option<Tokens>,
}

impl ResourceQuota {
    /// Unlimited quota
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max: Tokens) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_max_wall_clock(mut self, max: Duration) -> Self {
        self.max_wall_clock = Some(max);
        self
    }

    pub fn with_max_memory(mut self, max: Tokens) -> Self {
        self.max_memory = Some(max);
        self
    }

    /// A quota is malformed if any dimension is set to zero
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be positive when set".into());
        }
        if self.max_iterations == Some(0) {
            return Err("max_iterations must be positive when set".into());
        }
        if self.max_wall_clock == Some(Duration::ZERO) {
            return Err("max_wall_clock must be positive when set".into());
        }
        if self.max_memory == Some(0) {
            return Err("max_memory must be positive when set".into());
        }
        Ok(())
    }
}

/// Quota dimension that tripped a suspension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    Tokens,
    Iterations,
    WallClock,
    Memory,
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaDimension::Tokens => "tokens",
            QuotaDimension::Iterations => "iterations",
            QuotaDimension::WallClock => "wall_clock",
            QuotaDimension::Memory => "memory",
        };
        f.write_str(s)
    }
}

/// Accumulated resource usage; monotonically non-decreasing until
/// termination or checkpoint restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QuotaUsage {
    pub tokens: Tokens,
    pub iterations: u64,
    pub wall_clock: Duration,
    /// Peak resident-token footprint observed at step boundaries
    pub memory_peak: Tokens,
}

impl QuotaUsage {
    /// First quota dimension exceeded by this usage, if any
    pub fn exceeded(&self, quota: &ResourceQuota) -> Option<QuotaDimension> {
        if let Some(max) = quota.max_tokens {
            if self.tokens > max {
                return Some(QuotaDimension::Tokens);
            }
        }
        if let Some(max) = quota.max_iterations {
            if self.iterations > max {
                return Some(QuotaDimension::Iterations);
            }
        }
        if let Some(max) = quota.max_wall_clock {
            if self.wall_clock > max {
                return Some(QuotaDimension::WallClock);
            }
        }
        if let Some(max) = quota.max_memory {
            if self.memory_peak > max {
                return Some(QuotaDimension::Memory);
            }
        }
        None
    }
}

/// Cost of one completed step, reported to `tick()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StepCost {
    pub tokens: Tokens,
    pub wall_clock: Duration,
    /// Current resident-token footprint (a gauge; usage tracks its peak)
    pub resident_tokens: Tokens,
}

impl StepCost {
    pub fn new(tokens: Tokens, wall_clock: Duration) -> Self {
        Self {
            tokens,
            wall_clock,
            resident_tokens: 0,
        }
    }

    pub fn with_resident_tokens(mut self, resident: Tokens) -> Self {
        self.resident_tokens = resident;
        self
    }
}

/// Process metadata snapshot exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessInfo {
    pub pid: Pid,
    pub name: String,
    pub state: AgentState,
    pub priority: Priority,
    pub quota: ResourceQuota,
    pub usage: QuotaUsage,
    /// Dimension that caused the last quota suspension, if any
    pub suspended_on: Option<QuotaDimension>,
}

/// Scheduler statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub preemptions: u64,
    pub quota_suspensions: u64,
    pub page_faults_resolved: u64,
    pub completed: u64,
    pub errors: u64,
    pub active_processes: usize,
    pub clock: u64,
}
