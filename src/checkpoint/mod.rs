/*!
 * Checkpoint Coordinator
 * Snapshot and restore of a process together with its page table
 */

use crate::core::errors::KernelError;
use crate::core::types::{now_micros, CheckpointId, KernelResult, PageId, Pid, Tokens, PRIORITY_MAX};
use crate::memory::types::{ContextPage, PageType};
use crate::memory::ContextManager;
use crate::process::types::{AgentState, QuotaUsage, ResourceQuota};
use crate::process::Scheduler;
use crate::storage::{StorageBackend, StorageError};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Recorded process state, minus identity and timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessSnapshot {
    pub name: String,
    pub priority: u8,
    pub quota: ResourceQuota,
    pub usage: QuotaUsage,
}

/// One recorded page, content included whether or not it was resident
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PageSnapshot {
    pub id: PageId,
    pub owner: Pid,
    pub content: String,
    pub token_count: Tokens,
    pub importance: f64,
    pub page_type: PageType,
    pub resident: bool,
    pub access_count: u64,
}

/// A complete checkpoint payload, serialized to JSON in storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointSnapshot {
    pub id: CheckpointId,
    pub source_pid: Pid,
    pub created_at_micros: u64,
    pub description: String,
    pub process: ProcessSnapshot,
    pub resident_tokens: Tokens,
    pub pages: Vec<PageSnapshot>,
}

impl CheckpointSnapshot {
    /// Structural validation before a restore is attempted.
    ///
    /// Restore admits the process without re-running spawn's checks, so the
    /// process fields are vetted here too.
    fn validate(&self) -> Result<(), String> {
        if self.process.name.is_empty() {
            return Err("process name must not be empty".into());
        }
        if self.process.priority > PRIORITY_MAX {
            return Err(format!(
                "priority {} out of range 0..={}",
                self.process.priority, PRIORITY_MAX
            ));
        }
        for page in &self.pages {
            if page.owner != self.source_pid {
                return Err(format!(
                    "page {} owned by {} but snapshot source is {}",
                    page.id, page.owner, self.source_pid
                ));
            }
            if !(0.0..=1.0).contains(&page.importance) {
                return Err(format!(
                    "page {} importance {} outside [0, 1]",
                    page.id, page.importance
                ));
            }
            if page.token_count == 0 {
                return Err(format!("page {} has zero token_count", page.id));
            }
        }

        let resident_sum: Tokens = self
            .pages
            .iter()
            .filter(|p| p.resident)
            .map(|p| p.token_count)
            .sum();
        if resident_sum != self.resident_tokens {
            return Err(format!(
                "resident token total {} does not match page sum {}",
                self.resident_tokens, resident_sum
            ));
        }
        self.process.quota.validate()
    }
}

/// Checkpoint metadata, without the page payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointInfo {
    pub id: CheckpointId,
    pub source_pid: Pid,
    pub created_at_micros: u64,
    pub description: String,
    pub pages: usize,
}

/// Checkpoint coordinator
///
/// Bridges the scheduler and context manager to persistent snapshots.
/// Checkpoints are immutable once written; deletion is caller-driven only.
pub struct CheckpointCoordinator {
    scheduler: Scheduler,
    memory: ContextManager,
    storage: Arc<dyn StorageBackend>,
}

impl CheckpointCoordinator {
    pub fn new(scheduler: Scheduler, memory: ContextManager, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            scheduler,
            memory,
            storage,
        }
    }

    /// Snapshot a process and its full page table.
    ///
    /// The caller guarantees no tick interleaves for this pid (it holds the
    /// pid's execution slot or the process is parked).
    pub fn checkpoint(&self, pid: Pid, description: &str) -> KernelResult<CheckpointId> {
        let process = self.scheduler.snapshot_process(pid)?;
        if process.state == AgentState::Terminated {
            return Err(KernelError::invalid_state(
                pid,
                "cannot checkpoint a terminated process",
            ));
        }

        let table = self.memory.snapshot_table(pid)?;
        let mut pages = Vec::with_capacity(table.len());
        let mut resident_tokens = 0;
        for page in table {
            let content = if page.resident {
                resident_tokens += page.token_count;
                page.content
            } else {
                // Swapped content lives in storage
                self.storage
                    .swap_in(page.id)
                    .map_err(|e| Self::map_page_error(e, page.id))?
            };
            pages.push(PageSnapshot {
                id: page.id,
                owner: pid,
                content,
                token_count: page.token_count,
                importance: page.importance,
                page_type: page.page_type,
                resident: page.resident,
                access_count: page.access_count,
            });
        }

        let snapshot = CheckpointSnapshot {
            id: CheckpointId::generate(),
            source_pid: pid,
            created_at_micros: now_micros(),
            description: description.to_string(),
            process: ProcessSnapshot {
                name: process.name,
                priority: process.priority,
                quota: process.quota,
                usage: process.usage,
            },
            resident_tokens,
            pages,
        };

        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| KernelError::CheckpointCorrupt(format!("serialization failed: {}", e)))?;
        self.storage
            .persist_checkpoint(snapshot.id, &bytes)
            .map_err(Self::map_storage_error)?;

        info!(
            "Checkpoint {} created for process {} ({} pages)",
            snapshot.id,
            pid,
            snapshot.pages.len()
        );
        Ok(snapshot.id)
    }

    /// Rebuild a checkpointed process under a fresh pid, admitted Ready with
    /// the recorded quota usage.
    pub fn restore(&self, checkpoint_id: CheckpointId) -> KernelResult<Pid> {
        let bytes = self
            .storage
            .load_checkpoint(checkpoint_id)
            .map_err(Self::map_storage_error)?;
        let snapshot: CheckpointSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| KernelError::CheckpointCorrupt(format!("deserialization failed: {}", e)))?;
        snapshot.validate().map_err(KernelError::CheckpointCorrupt)?;

        let pid = self.scheduler.admit_restored(
            snapshot.process.name,
            snapshot.process.priority,
            snapshot.process.quota,
            snapshot.process.usage,
        );
        self.memory.create_table(pid);

        // Pages get fresh ids; the source process may still be alive with
        // the recorded ones. Every page is seeded to storage first so that
        // anything left non-resident can be faulted in later.
        let mut pages = Vec::with_capacity(snapshot.pages.len());
        for recorded in snapshot.pages {
            let mut page = ContextPage::new(
                pid,
                recorded.content,
                recorded.token_count,
                recorded.importance,
                recorded.page_type,
            );
            page.resident = recorded.resident;
            page.access_count = recorded.access_count;

            if let Err(e) = self
                .storage
                .swap_out(page.id, &page.content)
                .map_err(Self::map_storage_error)
            {
                self.scheduler.terminate(pid)?;
                self.memory.release_table(pid);
                return Err(e);
            }
            if !page.resident {
                page.content = String::new();
            }
            pages.push(page);
        }

        if let Err(e) = self.memory.install_table(pid, pages) {
            self.scheduler.terminate(pid)?;
            self.memory.release_table(pid);
            return Err(e);
        }

        info!(
            "Checkpoint {} restored as process {} (source {})",
            checkpoint_id, pid, snapshot.source_pid
        );
        Ok(pid)
    }

    pub fn info(&self, checkpoint_id: CheckpointId) -> KernelResult<CheckpointInfo> {
        let bytes = self
            .storage
            .load_checkpoint(checkpoint_id)
            .map_err(Self::map_storage_error)?;
        let snapshot: CheckpointSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| KernelError::CheckpointCorrupt(format!("deserialization failed: {}", e)))?;
        Ok(CheckpointInfo {
            id: snapshot.id,
            source_pid: snapshot.source_pid,
            created_at_micros: snapshot.created_at_micros,
            description: snapshot.description,
            pages: snapshot.pages.len(),
        })
    }

    pub fn list(&self) -> KernelResult<Vec<CheckpointId>> {
        self.storage.list_checkpoints().map_err(Self::map_storage_error)
    }

    pub fn delete(&self, checkpoint_id: CheckpointId) -> KernelResult<()> {
        self.storage
            .delete_checkpoint(checkpoint_id)
            .map_err(Self::map_storage_error)?;
        info!("Checkpoint {} deleted", checkpoint_id);
        Ok(())
    }

    fn map_storage_error(e: StorageError) -> KernelError {
        match e {
            StorageError::Timeout(msg) => KernelError::StorageTimeout(msg),
            StorageError::NotFound(msg) => KernelError::Validation(format!("not found: {}", msg)),
        }
    }

    fn map_page_error(e: StorageError, page_id: PageId) -> KernelError {
        match e {
            StorageError::Timeout(msg) => KernelError::StorageTimeout(msg),
            StorageError::NotFound(_) => KernelError::PageNotFound(page_id),
        }
    }
}

impl Clone for CheckpointCoordinator {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            memory: self.memory.clone(),
            storage: Arc::clone(&self.storage),
        }
    }
}
