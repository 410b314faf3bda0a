//! Application facade

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use creditflow_durable::orchestrator::{phase, Phase};
use creditflow_durable::{
    ApprovalSource, ApprovalStatus, Engine, EngineConfig, EngineError, InMemoryInstanceStore,
    InstanceStore, Outcome, WorkflowInputs,
};

use crate::activities::CreditActivities;

/// A point-in-time view of one credit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// The instance being reported on
    pub instance_id: String,

    /// Where the workflow currently is
    pub phase: Phase,

    /// Terminal result, once reached
    pub outcome: Option<Outcome>,
}

/// The register-credit application
///
/// Thin wrapper over the engine that owns ID generation and exposes the
/// operations the outer application needs: start, approve or reject,
/// inspect, await, shut down.
pub struct App<S> {
    engine: Engine<S, CreditActivities>,
}

impl App<InMemoryInstanceStore> {
    /// Build an app over a fresh in-memory store with default config
    pub fn in_memory(activities: CreditActivities) -> Self {
        Self::new(
            Arc::new(InMemoryInstanceStore::new()),
            activities,
            EngineConfig::default(),
        )
    }
}

impl<S: InstanceStore> App<S> {
    /// Build an app over an existing store
    pub fn new(store: Arc<S>, activities: CreditActivities, config: EngineConfig) -> Self {
        Self {
            engine: Engine::new(store, Arc::new(activities), config),
        }
    }

    /// Resume instances left in flight by a previous process
    ///
    /// Call once at startup, before serving traffic. Returns the number
    /// of instances resumed.
    pub async fn init(&self) -> Result<usize, EngineError> {
        self.engine.recover().await
    }

    /// Start a new credit request, returning its generated instance ID
    pub async fn start(&self, amount: i64, initiator: &str) -> Result<String, EngineError> {
        let instance_id = Uuid::now_v7().to_string();
        self.engine
            .start(&instance_id, WorkflowInputs::new(amount, initiator))
            .await?;
        info!(instance_id, initiator, amount, "credit request started");
        Ok(instance_id)
    }

    /// Start a new credit request under a caller-chosen instance ID
    ///
    /// Useful when the caller already has an idempotency key.
    pub async fn start_with_id(
        &self,
        instance_id: &str,
        amount: i64,
        initiator: &str,
    ) -> Result<(), EngineError> {
        self.engine
            .start(instance_id, WorkflowInputs::new(amount, initiator))
            .await?;
        Ok(())
    }

    /// Record an approval from one approver
    pub async fn approve(
        &self,
        instance_id: &str,
        source: ApprovalSource,
    ) -> Result<(), EngineError> {
        self.engine
            .signal(instance_id, source, ApprovalStatus::Approved)
            .await
    }

    /// Record a rejection from one approver
    pub async fn reject(
        &self,
        instance_id: &str,
        source: ApprovalSource,
    ) -> Result<(), EngineError> {
        self.engine
            .signal(instance_id, source, ApprovalStatus::Rejected)
            .await
    }

    /// Report where a request currently stands
    pub async fn status(&self, instance_id: &str) -> Result<InstanceStatus, EngineError> {
        let state = self.engine.get_instance(instance_id).await?;
        Ok(InstanceStatus {
            instance_id: state.instance_id.clone(),
            phase: phase(&state),
            outcome: state.outcome,
        })
    }

    /// Wait for a request's terminal outcome
    pub async fn await_result(&self, instance_id: &str) -> Result<Outcome, EngineError> {
        self.engine.await_result(instance_id).await
    }

    /// Shut down gracefully, suspending in-flight requests
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
