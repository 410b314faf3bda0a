//! Workflow step identifiers

use serde::{Deserialize, Serialize};

/// The steps of the register-credit approval workflow
///
/// Step names are stable identifiers: completed results are recorded
/// against them, and re-entry after a restart skips any step that
/// already has a recorded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Dispatch the approval request to the company approver
    SendCompanyApproval,

    /// Dispatch the approval request to the custodian approver
    SendCustodianApproval,

    /// Verify the credit request after both approvals
    Verify,

    /// Persist the verified request
    Persist,

    /// Notify the initiator of the result
    Notify,
}

impl StepName {
    /// The two independent approval-request sends
    ///
    /// Order across the two is unspecified; both must complete before
    /// the workflow proceeds.
    pub const APPROVAL_SENDS: [StepName; 2] =
        [Self::SendCompanyApproval, Self::SendCustodianApproval];

    /// The sequential tail of the workflow, in execution order
    pub const SEQUENTIAL: [StepName; 3] = [Self::Verify, Self::Persist, Self::Notify];

    /// Stable string identifier for this step
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendCompanyApproval => "send_company_approval",
            Self::SendCustodianApproval => "send_custodian_approval",
            Self::Verify => "verify",
            Self::Persist => "persist",
            Self::Notify => "notify",
        }
    }

    /// Failure reason reported when this step fails after retries are exhausted
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::SendCompanyApproval | Self::SendCustodianApproval => {
                "failed to send approval requests"
            }
            Self::Verify => "verification failed",
            Self::Persist => "persistence failed",
            Self::Notify => "notification failed",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
