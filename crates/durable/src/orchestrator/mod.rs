//! Pure orchestration logic
//!
//! [`decide`] maps an [`ExecutionState`] to the next [`Decision`] without
//! performing any I/O, reading any clock, or generating any randomness.
//! Replaying the same state always yields the same decision, which is
//! what makes crash recovery safe: after a restart the engine reloads
//! the persisted state and simply asks again.

use serde::{Deserialize, Serialize};

use crate::workflow::{ApprovalStatus, ExecutionState, Outcome, StepName};

/// What the engine should do next for an instance
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run these steps, record their results, then decide again
    ///
    /// Multiple steps in one decision may run concurrently; they are
    /// independent of each other.
    RunSteps(Vec<StepName>),

    /// Suspend until an approval signal arrives or the deadline passes
    AwaitApprovals,

    /// The instance is finished with this outcome
    Complete(Outcome),
}

/// Coarse progress phase derived from the execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Dispatching the approval requests
    RequestingApprovals,

    /// Suspended on the dual approval wait
    AwaitingApprovals,

    /// Running the verify step
    Verifying,

    /// Running the persist step
    Persisting,

    /// Running the notify step
    Notifying,

    /// Terminal, outcome available
    Completed,
}

/// Decide the next action for an instance
///
/// The decision procedure, in order:
/// 1. an already-set outcome is final
/// 2. both approval requests must be sent; a failed send fails the run
/// 3. the dual wait: timeout beats rejection beats waiting
/// 4. the sequential tail runs one step at a time; the first failed
///    step fails the run with its step-specific reason
pub fn decide(state: &ExecutionState) -> Decision {
    if let Some(outcome) = &state.outcome {
        return Decision::Complete(outcome.clone());
    }

    // Both approval-request sends must be recorded before waiting.
    let missing: Vec<StepName> = StepName::APPROVAL_SENDS
        .into_iter()
        .filter(|step| state.step_result(*step).is_none())
        .collect();
    if !missing.is_empty() {
        return Decision::RunSteps(missing);
    }
    for step in StepName::APPROVAL_SENDS {
        if let Some(result) = state.step_result(step) {
            if !result.success {
                return Decision::Complete(Outcome::Failure(step.failure_reason().to_string()));
            }
        }
    }

    // The dual approval wait. Timeout is checked before rejection so
    // that a wait that expired with one rejection already in hand still
    // reports the timeout.
    let statuses = [state.company_approval, state.custodian_approval];
    if statuses.contains(&ApprovalStatus::Timeout) {
        return Decision::Complete(Outcome::Failure("approval timeout".to_string()));
    }
    if statuses.contains(&ApprovalStatus::Waiting) {
        return Decision::AwaitApprovals;
    }
    if statuses.contains(&ApprovalStatus::Rejected) {
        return Decision::Complete(Outcome::Failure(
            "register credit request is rejected".to_string(),
        ));
    }

    // Both approved: run the sequential tail, one step at a time.
    for step in StepName::SEQUENTIAL {
        match state.step_result(step) {
            None => return Decision::RunSteps(vec![step]),
            Some(result) if !result.success => {
                return Decision::Complete(Outcome::Failure(step.failure_reason().to_string()));
            }
            Some(_) => {}
        }
    }

    Decision::Complete(Outcome::Success("Workflow completed successfully".to_string()))
}

/// Report the progress phase of an instance
///
/// Derived from the same state [`decide`] reads, so the reported phase
/// always matches what the engine will do next.
pub fn phase(state: &ExecutionState) -> Phase {
    match decide(state) {
        Decision::Complete(_) => Phase::Completed,
        Decision::AwaitApprovals => Phase::AwaitingApprovals,
        Decision::RunSteps(steps) => match steps.first() {
            Some(StepName::Verify) => Phase::Verifying,
            Some(StepName::Persist) => Phase::Persisting,
            Some(StepName::Notify) => Phase::Notifying,
            _ => Phase::RequestingApprovals,
        },
    }
}
