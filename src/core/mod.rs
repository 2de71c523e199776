/*!
 * Core Module
 * Shared types, errors, and configuration
 */

pub mod config;
pub mod errors;
pub mod types;

pub use config::{CapacityMode, EvictionWeights, KernelConfig};
pub use errors::KernelError;
pub use types::{
    AdmissionSeq, CheckpointId, KernelResult, PageId, Pid, Priority, Tick, Tokens, PRIORITY_MAX,
};
