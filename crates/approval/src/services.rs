//! Collaborator service traits
//!
//! Each trait covers one external dependency of the workflow. The real
//! application wires in clients for its mail gateway, verification
//! backend, ledger, and notification channel; tests substitute stubs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use creditflow_durable::{ActivityError, ApprovalSource, ServiceResult};

/// A request to dispatch an approval to one approver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Workflow instance awaiting the decision
    pub instance_id: String,

    /// Which approver to ask
    pub approver: ApprovalSource,

    /// Who initiated the credit request
    pub initiator: String,

    /// Requested credit amount
    pub amount: i64,
}

/// A request to verify an approved credit registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub instance_id: String,
    pub initiator: String,
    pub amount: i64,
}

/// A request to persist a verified credit registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRequest {
    pub instance_id: String,
    pub initiator: String,
    pub amount: i64,
}

/// A request to notify the initiator that registration completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub instance_id: String,
    pub initiator: String,
    pub amount: i64,
}

/// Dispatches approval requests to approvers
#[async_trait]
pub trait ApprovalService: Send + Sync + 'static {
    /// Ask one approver for a decision
    ///
    /// Dispatch only; the decision itself arrives later as a signal.
    async fn request_approval(
        &self,
        request: ApprovalRequest,
    ) -> Result<ServiceResult, ActivityError>;
}

/// Verifies approved credit registrations
#[async_trait]
pub trait VerificationService: Send + Sync + 'static {
    async fn verify(&self, request: VerificationRequest) -> Result<ServiceResult, ActivityError>;
}

/// Persists verified credit registrations
#[async_trait]
pub trait PersistenceService: Send + Sync + 'static {
    async fn persist(&self, request: PersistenceRequest) -> Result<ServiceResult, ActivityError>;
}

/// Notifies initiators about completed registrations
#[async_trait]
pub trait NotificationService: Send + Sync + 'static {
    async fn notify(&self, request: NotificationRequest) -> Result<ServiceResult, ActivityError>;
}
