//! Durable signal delivery
//!
//! The [`SignalInbox`] is the path an external approval callback takes
//! into a running instance. Delivery is two-phase: the signal is written
//! to the store first, then the instance's control loop is woken to
//! drain it. A signal that was persisted but not yet drained survives a
//! restart and is folded in on recovery.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

use crate::persistence::{InstanceStore, StoreError};
use crate::workflow::Signal;

/// Error type for signal delivery
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    /// No live, non-terminal instance with this ID
    #[error("unknown or completed instance: {0}")]
    UnknownInstance(String),

    /// Store failure while recording the signal
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Durable mailbox plus wake-up channel for waiting instances
pub struct SignalInbox<S> {
    store: Arc<S>,
    waiters: DashMap<String, Arc<Notify>>,
}

impl<S: InstanceStore> SignalInbox<S> {
    /// Create a new inbox over a store
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            waiters: DashMap::new(),
        }
    }

    /// Register an instance's wake-up handle
    ///
    /// The control loop subscribes once at startup and awaits the
    /// returned [`Notify`] whenever it suspends.
    pub fn subscribe(&self, instance_id: &str) -> Arc<Notify> {
        self.waiters
            .entry(instance_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop an instance's wake-up handle once it terminates
    pub fn forget(&self, instance_id: &str) {
        self.waiters.remove(instance_id);
    }

    /// Deliver a signal to a waiting instance
    ///
    /// Persists the signal, then wakes the instance's control loop.
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::UnknownInstance`] if the instance does not
    /// exist or has already reached a terminal outcome. Late callbacks
    /// to a completed instance are rejected, never queued.
    pub async fn deliver(&self, instance_id: &str, signal: Signal) -> Result<(), InboxError> {
        let state = self.store.load_instance(instance_id).await.map_err(|err| {
            match err {
                StoreError::NotFound(id) => InboxError::UnknownInstance(id),
                other => InboxError::Store(other),
            }
        })?;
        if state.is_terminal() {
            return Err(InboxError::UnknownInstance(instance_id.to_string()));
        }

        self.store.put_signal(instance_id, signal.clone()).await?;
        debug!(
            instance_id,
            source = %signal.source,
            "signal persisted, waking instance"
        );

        if let Some(notify) = self.waiters.get(instance_id) {
            notify.notify_one();
        }
        Ok(())
    }

    /// Take all pending signals for an instance, in delivery order
    pub async fn drain(&self, instance_id: &str) -> Result<Vec<Signal>, StoreError> {
        self.store.take_signals(instance_id).await
    }
}
