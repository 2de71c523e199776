/*!
 * Kernel Facade
 * One handle over the scheduler, context manager, and checkpoint coordinator
 */

use crate::checkpoint::{CheckpointCoordinator, CheckpointInfo};
use crate::core::config::KernelConfig;
use crate::core::errors::KernelError;
use crate::core::types::{CheckpointId, KernelResult, PageId, Pid, Priority, Tokens};
use crate::exec::StepExecutor;
use crate::memory::types::{PageInfo, PageType, PagingStats};
use crate::memory::ContextManager;
use crate::process::types::{
    AgentState, ProcessInfo, QuotaUsage, ResourceQuota, SchedulerStats, StepCost,
};
use crate::process::Scheduler;
use crate::storage::{InMemoryStorage, StorageBackend};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod task;

pub use task::{KernelCommand, KernelTask};

/// Rough token estimate for caller-supplied content
fn estimate_tokens(content: &str) -> Tokens {
    ((content.chars().count() as u64 + 3) / 4).max(1)
}

/// Status view for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentStatus {
    pub pid: Pid,
    pub name: String,
    pub state: AgentState,
    pub priority: Priority,
    pub quota: ResourceQuota,
    pub usage: QuotaUsage,
    pub resident_tokens: Tokens,
    pub resident_pages: Vec<PageInfo>,
}

/// Combined kernel statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KernelStats {
    pub scheduler: SchedulerStats,
    pub paging: PagingStats,
}

/// Builder for [`Kernel`]
///
/// Storage defaults to the in-memory backend; a step executor must be
/// supplied before `build()`.
pub struct KernelBuilder {
    config: KernelConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    executor: Option<Arc<dyn StepExecutor>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            storage: None,
            executor: None,
        }
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> KernelResult<Kernel> {
        let executor = self
            .executor
            .ok_or_else(|| KernelError::Validation("a step executor is required".into()))?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));

        let scheduler = Scheduler::new(&self.config);
        let memory = ContextManager::new(&self.config, Arc::clone(&storage));
        let checkpoints = CheckpointCoordinator::new(
            scheduler.clone(),
            memory.clone(),
            Arc::clone(&storage),
        );

        info!("Kernel initialized");
        Ok(Kernel {
            config: self.config,
            scheduler,
            memory,
            checkpoints,
            executor,
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The agent kernel
///
/// Cheap to clone; all clones share the same internal state.
pub struct Kernel {
    config: KernelConfig,
    scheduler: Scheduler,
    memory: ContextManager,
    checkpoints: CheckpointCoordinator,
    executor: Arc<dyn StepExecutor>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    // Process lifecycle

    pub fn spawn_agent(
        &self,
        name: impl Into<String>,
        priority: Priority,
        quota: ResourceQuota,
    ) -> KernelResult<Pid> {
        let pid = self.scheduler.spawn(name.into(), priority, quota)?;
        self.memory.create_table(pid);
        Ok(pid)
    }

    /// Terminate an agent and release every page it owns. Idempotent.
    pub fn terminate_agent(&self, pid: Pid) -> KernelResult<()> {
        self.scheduler.terminate(pid)?;
        self.memory.release_table(pid);
        Ok(())
    }

    pub fn suspend_agent(&self, pid: Pid) -> KernelResult<()> {
        self.scheduler.suspend(pid)
    }

    pub fn resume_agent(&self, pid: Pid) -> KernelResult<()> {
        self.scheduler.resume(pid)
    }

    pub fn set_priority(&self, pid: Pid, priority: Priority) -> KernelResult<()> {
        self.scheduler.set_priority(pid, priority)
    }

    pub fn set_quota(&self, pid: Pid, quota: ResourceQuota) -> KernelResult<()> {
        self.scheduler.set_quota(pid, quota)
    }

    pub fn get_status(&self, pid: Pid) -> KernelResult<AgentStatus> {
        let info = self.scheduler.info(pid)?;
        let pages = self.memory.list_pages(pid).unwrap_or_default();
        let resident_pages: Vec<PageInfo> =
            pages.into_iter().filter(|p| p.resident).collect();
        let resident_tokens = self.memory.resident_tokens(pid).unwrap_or(0);
        Ok(AgentStatus {
            pid: info.pid,
            name: info.name,
            state: info.state,
            priority: info.priority,
            quota: info.quota,
            usage: info.usage,
            resident_tokens,
            resident_pages,
        })
    }

    pub fn list_agents(&self) -> Vec<ProcessInfo> {
        self.scheduler.list()
    }

    // Context paging

    /// Allocate a context page; the token count is estimated from content
    pub fn allocate_page(
        &self,
        pid: Pid,
        content: impl Into<String>,
        importance: f64,
        page_type: PageType,
    ) -> KernelResult<PageId> {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        self.memory.allocate(pid, content, tokens, importance, page_type)
    }

    /// Allocate with an exact token count supplied by the caller
    pub fn allocate_page_sized(
        &self,
        pid: Pid,
        content: impl Into<String>,
        token_count: Tokens,
        importance: f64,
        page_type: PageType,
    ) -> KernelResult<PageId> {
        self.memory
            .allocate(pid, content.into(), token_count, importance, page_type)
    }

    /// Read page content, resolving a fault if the page is swapped out.
    ///
    /// On a fault the owner parks in Waiting for the duration of the swap-in
    /// and is woken afterwards. If storage keeps timing out past the retry
    /// budget, the owner is suspended; its data stays in storage.
    pub fn access_page(&self, page_id: PageId) -> KernelResult<String> {
        if let Some(content) = self.memory.try_access(page_id)? {
            return Ok(content);
        }

        let owner = self.memory.owner_of(page_id)?;
        let parked = self.scheduler.state(owner)? == AgentState::Running
            && self.scheduler.begin_wait(owner).is_ok();

        match self.memory.swap_in(page_id) {
            Ok(content) => {
                if parked {
                    self.scheduler.wake(owner)?;
                }
                Ok(content)
            }
            Err(err @ KernelError::StorageTimeout(_)) => {
                warn!("Suspending process {} after swap-in retries failed", owner);
                self.scheduler.suspend(owner)?;
                Err(err)
            }
            Err(err) => {
                if parked {
                    self.scheduler.wake(owner)?;
                }
                Err(err)
            }
        }
    }

    pub fn release_page(&self, pid: Pid, page_id: PageId) -> KernelResult<()> {
        if self.memory.owner_of(page_id)? != pid {
            return Err(KernelError::PageNotFound(page_id));
        }
        self.memory.release(page_id)
    }

    pub fn update_importance(&self, page_id: PageId, importance: f64) -> KernelResult<()> {
        self.memory.update_importance(page_id, importance)
    }

    /// Resident page contents in assembly order (pinned first, then by
    /// insertion order)
    pub fn get_agent_context(&self, pid: Pid) -> KernelResult<Vec<String>> {
        self.memory.agent_context(pid)
    }

    /// Metadata for every page the process owns, resident or not
    pub fn list_pages(&self, pid: Pid) -> KernelResult<Vec<PageInfo>> {
        self.memory.list_pages(pid)
    }

    // Checkpoints

    pub fn create_checkpoint(&self, pid: Pid, description: &str) -> KernelResult<CheckpointId> {
        self.checkpoints.checkpoint(pid, description)
    }

    pub fn restore_checkpoint(&self, checkpoint_id: CheckpointId) -> KernelResult<Pid> {
        self.checkpoints.restore(checkpoint_id)
    }

    pub fn checkpoint_info(&self, checkpoint_id: CheckpointId) -> KernelResult<CheckpointInfo> {
        self.checkpoints.info(checkpoint_id)
    }

    pub fn list_checkpoints(&self) -> KernelResult<Vec<CheckpointId>> {
        self.checkpoints.list()
    }

    pub fn delete_checkpoint(&self, checkpoint_id: CheckpointId) -> KernelResult<()> {
        self.checkpoints.delete(checkpoint_id)
    }

    // Execution

    /// Dispatch the next ready process and drive it until it leaves Running
    /// (preemption, suspension, wait, completion). Returns the pid and the
    /// state it ended in, or None when nothing is dispatchable.
    pub fn run_once(&self) -> KernelResult<Option<(Pid, AgentState)>> {
        let Some(pid) = self.scheduler.schedule() else {
            return Ok(None);
        };

        let mut state = AgentState::Running;
        while state == AgentState::Running {
            state = self.step_agent(pid)?;
        }
        Ok(Some((pid, state)))
    }

    /// Run dispatches until the scheduler goes idle or the budget runs out.
    /// Returns the number of dispatches performed.
    pub fn run(&self, max_dispatches: usize) -> KernelResult<usize> {
        let mut dispatched = 0;
        while dispatched < max_dispatches {
            if self.run_once()?.is_none() {
                break;
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Execute one step for a Running process and account its cost
    fn step_agent(&self, pid: Pid) -> KernelResult<AgentState> {
        let context = self.memory.agent_context(pid)?;
        let outcome = self.executor.step(pid, &context);

        // The process may have been terminated or re-queued while the step
        // call was in flight; its result is discarded then.
        let state = self.scheduler.state(pid)?;
        if state != AgentState::Running {
            return Ok(state);
        }

        match outcome {
            Ok(outcome) => {
                let resident = self.memory.resident_tokens(pid).unwrap_or(0);
                let cost = outcome.cost.with_resident_tokens(resident);
                let state = self.scheduler.tick(pid, cost)?;
                if outcome.done {
                    self.terminate_agent(pid)?;
                    return Ok(AgentState::Terminated);
                }
                Ok(state)
            }
            Err(err) if err.fatal => {
                warn!("Process {} hit a fatal step error: {}", pid, err.message);
                self.scheduler.note_step_error(pid)?;
                self.terminate_agent(pid)?;
                Ok(AgentState::Terminated)
            }
            Err(err) => {
                let errors = self.scheduler.note_step_error(pid)?;
                warn!(
                    "Process {} step error {}/{}: {}",
                    pid, errors, self.config.max_step_errors, err.message
                );
                if errors > self.config.max_step_errors {
                    self.terminate_agent(pid)?;
                    return Ok(AgentState::Terminated);
                }
                // A failed step still consumes an iteration
                let resident = self.memory.resident_tokens(pid).unwrap_or(0);
                let cost = StepCost::default().with_resident_tokens(resident);
                self.scheduler.tick(pid, cost)
            }
        }
    }

    // Introspection

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            scheduler: self.scheduler.stats(),
            paging: self.memory.stats(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_empty()
    }
}

impl Clone for Kernel {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            memory: self.memory.clone(),
            checkpoints: self.checkpoints.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}
