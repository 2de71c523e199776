/*!
 * Kernel Configuration
 * One explicit config struct handed to the kernel at init; no ambient globals
 */

use super::types::{Priority, Tokens};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Context capacity enforcement mode
///
/// The source material for this kernel was ambiguous about whether the
/// resident-token budget applies per process or globally; both modes are
/// supported and the choice is explicit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityMode {
    /// Each process gets its own resident-token budget
    PerProcess(Tokens),
    /// One budget shared across all processes
    Global(Tokens),
}

impl CapacityMode {
    pub fn capacity(&self) -> Tokens {
        match self {
            CapacityMode::PerProcess(n) | CapacityMode::Global(n) => *n,
        }
    }
}

/// Weights for the eviction score terms
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EvictionWeights {
    pub importance: f64,
    pub recency: f64,
    pub frequency: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            importance: 0.4,
            recency: 0.3,
            frequency: 0.3,
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KernelConfig {
    /// Resident context budget and its enforcement mode
    pub capacity: CapacityMode,
    /// Steps granted per dispatch before forced preemption
    pub time_slice_steps: u32,
    /// Effective-priority improvement per tick spent waiting
    pub aging_increment: Priority,
    /// Upper bound on total aging improvement
    pub aging_limit: Priority,
    /// Maximum number of processes Running at once
    pub max_concurrent_agents: usize,
    /// Swap retries before demoting the owner to Suspended
    pub swap_retry_limit: u32,
    /// Backoff between swap retries
    pub swap_retry_backoff: Duration,
    /// Non-fatal step errors tolerated before termination
    pub max_step_errors: u32,
    /// Eviction score weights
    pub eviction_weights: EvictionWeights,
    /// Half-life for the recency decay term of the eviction score
    pub recency_half_life: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            capacity: CapacityMode::PerProcess(128_000),
            time_slice_steps: 8,
            aging_increment: 1,
            aging_limit: 50,
            max_concurrent_agents: 4,
            swap_retry_limit: 3,
            swap_retry_backoff: Duration::from_millis(10),
            max_step_errors: 3,
            eviction_weights: EvictionWeights::default(),
            recency_half_life: Duration::from_secs(600),
        }
    }
}

impl KernelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: CapacityMode) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_time_slice(mut self, steps: u32) -> Self {
        self.time_slice_steps = steps;
        self
    }

    pub fn with_aging(mut self, increment: Priority, limit: Priority) -> Self {
        self.aging_increment = increment;
        self.aging_limit = limit;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_agents = max;
        self
    }

    pub fn with_swap_retries(mut self, limit: u32, backoff: Duration) -> Self {
        self.swap_retry_limit = limit;
        self.swap_retry_backoff = backoff;
        self
    }

    pub fn with_eviction_weights(mut self, weights: EvictionWeights) -> Self {
        self.eviction_weights = weights;
        self
    }
}
