//! InstanceStore trait definition

use async_trait::async_trait;

use crate::workflow::{ExecutionState, Signal};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// Instance not found
    #[error("instance not found: {0}")]
    NotFound(String),

    /// Instance already exists
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    /// Backing store temporarily unavailable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Store for execution state and pending signals
///
/// Implementations must be thread-safe and support concurrent access.
/// The engine assumes two properties:
/// - a completed `save_instance` is durable (visible to a later load,
///   including after a process restart)
/// - `take_signals` atomically removes what it returns, so no signal is
///   consumed twice
#[async_trait]
pub trait InstanceStore: Send + Sync + 'static {
    /// Create a new instance record
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the instance ID is taken.
    async fn create_instance(&self, state: &ExecutionState) -> Result<(), StoreError>;

    /// Persist the current state of an instance
    async fn save_instance(&self, state: &ExecutionState) -> Result<(), StoreError>;

    /// Load the persisted state of an instance
    async fn load_instance(&self, instance_id: &str) -> Result<ExecutionState, StoreError>;

    /// List the IDs of instances that have not reached a terminal outcome
    async fn list_active(&self) -> Result<Vec<String>, StoreError>;

    /// Record a pending signal for an instance
    ///
    /// A second signal from the same source before the first is consumed
    /// replaces it (last write wins per source).
    async fn put_signal(&self, instance_id: &str, signal: Signal) -> Result<(), StoreError>;

    /// Atomically take all pending signals, in delivery order
    async fn take_signals(&self, instance_id: &str) -> Result<Vec<Signal>, StoreError>;
}
