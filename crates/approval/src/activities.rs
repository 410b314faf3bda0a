//! Step handler over the collaborator services

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use creditflow_durable::{
    ActivityContext, ActivityError, ApprovalSource, ServiceResult, StepHandler, StepName,
};

use crate::services::{
    ApprovalRequest, ApprovalService, NotificationRequest, NotificationService,
    PersistenceRequest, PersistenceService, VerificationRequest, VerificationService,
};

/// Maps workflow steps onto collaborator service calls
///
/// The engine knows only step names; this is the single place where a
/// step name turns into a call against a real dependency.
pub struct CreditActivities {
    approvals: Arc<dyn ApprovalService>,
    verification: Arc<dyn VerificationService>,
    persistence: Arc<dyn PersistenceService>,
    notifications: Arc<dyn NotificationService>,
}

impl CreditActivities {
    /// Wire up the four collaborators
    pub fn new(
        approvals: Arc<dyn ApprovalService>,
        verification: Arc<dyn VerificationService>,
        persistence: Arc<dyn PersistenceService>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            approvals,
            verification,
            persistence,
            notifications,
        }
    }

    fn approval_request(&self, ctx: &ActivityContext, approver: ApprovalSource) -> ApprovalRequest {
        ApprovalRequest {
            instance_id: ctx.instance_id.clone(),
            approver,
            initiator: ctx.initiator.clone(),
            amount: ctx.amount,
        }
    }
}

#[async_trait]
impl StepHandler for CreditActivities {
    async fn execute(
        &self,
        step: StepName,
        ctx: &ActivityContext,
    ) -> Result<ServiceResult, ActivityError> {
        debug!(
            instance_id = %ctx.instance_id,
            %step,
            attempt = ctx.attempt,
            "dispatching step to collaborator"
        );
        match step {
            StepName::SendCompanyApproval => {
                self.approvals
                    .request_approval(self.approval_request(ctx, ApprovalSource::Company))
                    .await
            }
            StepName::SendCustodianApproval => {
                self.approvals
                    .request_approval(self.approval_request(ctx, ApprovalSource::Custodian))
                    .await
            }
            StepName::Verify => {
                self.verification
                    .verify(VerificationRequest {
                        instance_id: ctx.instance_id.clone(),
                        initiator: ctx.initiator.clone(),
                        amount: ctx.amount,
                    })
                    .await
            }
            StepName::Persist => {
                self.persistence
                    .persist(PersistenceRequest {
                        instance_id: ctx.instance_id.clone(),
                        initiator: ctx.initiator.clone(),
                        amount: ctx.amount,
                    })
                    .await
            }
            StepName::Notify => {
                self.notifications
                    .notify(NotificationRequest {
                        instance_id: ctx.instance_id.clone(),
                        initiator: ctx.initiator.clone(),
                        amount: ctx.amount,
                    })
                    .await
            }
        }
    }
}
