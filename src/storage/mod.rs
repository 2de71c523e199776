/*!
 * Storage Backend
 * Swap and checkpoint persistence contract, plus the in-memory backend used
 * by tests and demos
 */

use crate::core::types::{CheckpointId, PageId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Storage failures as seen by the kernel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence contract consumed by the paging and checkpoint subsystems
///
/// Implementations must be safe to call from multiple threads. Calls are
/// synchronous; the kernel bounds them with its own retry policy rather than
/// expecting the backend to retry internally.
pub trait StorageBackend: Send + Sync {
    /// Persist page content before the page is marked non-resident.
    /// Overwrites any previous copy for the same id.
    fn swap_out(&self, page_id: PageId, content: &str) -> StorageResult<()>;

    /// Fetch page content. The copy stays in storage until overwritten, so
    /// repeated reads of the same id are legal.
    fn swap_in(&self, page_id: PageId) -> StorageResult<String>;

    fn persist_checkpoint(&self, id: CheckpointId, bytes: &[u8]) -> StorageResult<()>;

    fn load_checkpoint(&self, id: CheckpointId) -> StorageResult<Vec<u8>>;

    fn delete_checkpoint(&self, id: CheckpointId) -> StorageResult<()>;

    fn list_checkpoints(&self) -> StorageResult<Vec<CheckpointId>>;
}

/// In-memory backend for tests and demos
///
/// Supports injecting a bounded number of timeout failures to exercise the
/// kernel's retry and suspension paths.
#[derive(Default)]
pub struct InMemoryStorage {
    pages: Mutex<HashMap<PageId, String>>,
    checkpoints: Mutex<HashMap<CheckpointId, Vec<u8>>>,
    swap_failures: AtomicU32,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` swap operations fail with a timeout
    pub fn with_swap_failures(self, count: u32) -> Self {
        self.swap_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Arm `count` timeout failures on an already-shared instance
    pub fn inject_swap_failures(&self, count: u32) {
        self.swap_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.swap_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StorageBackend for InMemoryStorage {
    fn swap_out(&self, page_id: PageId, content: &str) -> StorageResult<()> {
        if self.take_failure() {
            return Err(StorageError::Timeout("injected swap-out failure".into()));
        }
        self.pages.lock().insert(page_id, content.to_string());
        Ok(())
    }

    fn swap_in(&self, page_id: PageId) -> StorageResult<String> {
        if self.take_failure() {
            return Err(StorageError::Timeout("injected swap-in failure".into()));
        }
        self.pages
            .lock()
            .get(&page_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("page {}", page_id)))
    }

    fn persist_checkpoint(&self, id: CheckpointId, bytes: &[u8]) -> StorageResult<()> {
        self.checkpoints.lock().insert(id, bytes.to_vec());
        Ok(())
    }

    fn load_checkpoint(&self, id: CheckpointId) -> StorageResult<Vec<u8>> {
        self.checkpoints
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("checkpoint {}", id)))
    }

    fn delete_checkpoint(&self, id: CheckpointId) -> StorageResult<()> {
        self.checkpoints
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("checkpoint {}", id)))
    }

    fn list_checkpoints(&self) -> StorageResult<Vec<CheckpointId>> {
        Ok(self.checkpoints.lock().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_round_trip() {
        let storage = InMemoryStorage::new();
        let id = PageId::generate();
        storage.swap_out(id, "page content").unwrap();
        assert_eq!(storage.swap_in(id).unwrap(), "page content");
        // Content stays until overwritten
        assert_eq!(storage.swap_in(id).unwrap(), "page content");
    }

    #[test]
    fn test_swap_in_missing() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            storage.swap_in(PageId::generate()),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_injected_failures_are_bounded() {
        let storage = InMemoryStorage::new().with_swap_failures(2);
        let id = PageId::generate();
        assert!(storage.swap_out(id, "x").is_err());
        assert!(storage.swap_out(id, "x").is_err());
        assert!(storage.swap_out(id, "x").is_ok());
    }

    #[test]
    fn test_checkpoint_store() {
        let storage = InMemoryStorage::new();
        let id = CheckpointId::generate();
        storage.persist_checkpoint(id, b"snapshot").unwrap();
        assert_eq!(storage.load_checkpoint(id).unwrap(), b"snapshot");
        assert_eq!(storage.list_checkpoints().unwrap(), vec![id]);
        storage.delete_checkpoint(id).unwrap();
        assert!(storage.load_checkpoint(id).is_err());
    }
}
