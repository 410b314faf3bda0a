//! In-memory implementation of InstanceStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::{InstanceStore, StoreError};
use crate::workflow::{ExecutionState, Signal};

/// Internal record for one instance
struct InstanceRecord {
    state: ExecutionState,
    pending: Vec<Signal>,
}

/// In-memory implementation of InstanceStore
///
/// Stores all data behind a single lock. Primarily for testing and for
/// embedding the engine without external infrastructure; state survives
/// engine restarts as long as the store value itself is kept alive.
///
/// # Example
///
/// ```
/// use creditflow_durable::InMemoryInstanceStore;
///
/// let store = InMemoryInstanceStore::new();
/// ```
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<String, InstanceRecord>>,

    /// Number of upcoming saves to fail with `Unavailable` (test hook)
    fail_saves: AtomicU32,
}

impl InMemoryInstanceStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            fail_saves: AtomicU32::new(0),
        }
    }

    /// Get the number of instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Make the next `count` saves fail with `Unavailable` (for testing)
    pub fn fail_next_saves(&self, count: u32) {
        self.fail_saves.store(count, Ordering::SeqCst);
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.instances.write().clear();
    }

    fn consume_save_failure(&self) -> bool {
        self.fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create_instance(&self, state: &ExecutionState) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        if instances.contains_key(&state.instance_id) {
            return Err(StoreError::AlreadyExists(state.instance_id.clone()));
        }
        instances.insert(
            state.instance_id.clone(),
            InstanceRecord {
                state: state.clone(),
                pending: vec![],
            },
        );
        Ok(())
    }

    async fn save_instance(&self, state: &ExecutionState) -> Result<(), StoreError> {
        if self.consume_save_failure() {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }
        let mut instances = self.instances.write();
        let record = instances
            .get_mut(&state.instance_id)
            .ok_or_else(|| StoreError::NotFound(state.instance_id.clone()))?;
        record.state = state.clone();
        Ok(())
    }

    async fn load_instance(&self, instance_id: &str) -> Result<ExecutionState, StoreError> {
        let instances = self.instances.read();
        instances
            .get(instance_id)
            .map(|record| record.state.clone())
            .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
    }

    async fn list_active(&self) -> Result<Vec<String>, StoreError> {
        let instances = self.instances.read();
        Ok(instances
            .values()
            .filter(|record| !record.state.is_terminal())
            .map(|record| record.state.instance_id.clone())
            .collect())
    }

    async fn put_signal(&self, instance_id: &str, signal: Signal) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))?;
        // Last write wins per source.
        record.pending.retain(|s| s.source != signal.source);
        record.pending.push(signal);
        Ok(())
    }

    async fn take_signals(&self, instance_id: &str) -> Result<Vec<Signal>, StoreError> {
        let mut instances = self.instances.write();
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))?;
        Ok(std::mem::take(&mut record.pending))
    }
}
