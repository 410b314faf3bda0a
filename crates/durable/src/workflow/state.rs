//! Durable execution state for one workflow instance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::ApprovalSource;
use super::step::StepName;

/// Status of one approver's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// No callback received yet
    Waiting,

    /// Approver accepted the request
    Approved,

    /// Approver declined the request
    Rejected,

    /// The approval wait deadline elapsed before a callback arrived
    Timeout,
}

impl ApprovalStatus {
    /// Whether this status still awaits a callback
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }
}

/// Immutable inputs captured when an instance is started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInputs {
    /// Credit amount being requested
    pub amount: i64,

    /// Name of the person who initiated the request
    pub initiator: String,
}

impl WorkflowInputs {
    /// Create new workflow inputs
    pub fn new(amount: i64, initiator: impl Into<String>) -> Self {
        Self {
            amount,
            initiator: initiator.into(),
        }
    }
}

/// The recorded result of one completed step
///
/// Mirrors the collaborator Result shape (`success`/`content`/`error`)
/// plus the number of attempts the invocation consumed. A failed result
/// always carries the last error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Whether the step succeeded
    pub success: bool,

    /// Content returned by the collaborator
    pub content: String,

    /// Error detail for failed steps
    pub error: Option<String>,

    /// Attempts consumed (1-based; includes the final one)
    pub attempts: u32,
}

impl StepResult {
    /// Create a successful step result
    pub fn succeeded(content: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
            attempts,
        }
    }

    /// Create a failed step result carrying the last error
    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
            attempts,
        }
    }
}

/// Terminal outcome of a workflow instance
///
/// Business-level failures (rejection, timeout, exhausted retries) are
/// outcomes, not errors: `await_result` returns them instead of raising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    /// The workflow ran all steps to completion
    Success(String),

    /// The workflow terminated early with a reason
    Failure(String),
}

impl Outcome {
    /// Whether this is a success outcome
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The reason/message carried by the outcome
    pub fn message(&self) -> &str {
        match self {
            Self::Success(msg) | Self::Failure(msg) => msg,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(msg) => write!(f, "Success: {msg}"),
            Self::Failure(msg) => write!(f, "Failure: {msg}"),
        }
    }
}

/// The durable record of one workflow instance
///
/// Mutated exclusively by the engine acting on orchestrator decisions;
/// signal delivery only lands in the inbox and is folded into the two
/// approval-status fields by the owning control loop.
///
/// Invariants enforced here:
/// - once `outcome` is set, no further mutation is permitted
/// - `completed_steps` never contains two entries for the same step
/// - approval statuses freeze once the dual wait is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Caller-supplied, globally unique instance identifier
    pub instance_id: String,

    /// Inputs captured at start (immutable)
    pub inputs: WorkflowInputs,

    /// Company approver's decision
    pub company_approval: ApprovalStatus,

    /// Custodian approver's decision
    pub custodian_approval: ApprovalStatus,

    /// Ordered, append-only record of completed steps
    pub completed_steps: Vec<(StepName, StepResult)>,

    /// Deadline of the current approval wait, if suspended
    pub suspended_at: Option<DateTime<Utc>>,

    /// Terminal result, set exactly once
    pub outcome: Option<Outcome>,

    /// When the instance was created
    pub created_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Create a fresh execution state for a new instance
    pub fn new(instance_id: impl Into<String>, inputs: WorkflowInputs) -> Self {
        Self {
            instance_id: instance_id.into(),
            inputs,
            company_approval: ApprovalStatus::Waiting,
            custodian_approval: ApprovalStatus::Waiting,
            completed_steps: Vec::new(),
            suspended_at: None,
            outcome: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the instance has reached its terminal outcome
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// The recorded status for one approval source
    pub fn status(&self, source: ApprovalSource) -> ApprovalStatus {
        match source {
            ApprovalSource::Company => self.company_approval,
            ApprovalSource::Custodian => self.custodian_approval,
        }
    }

    /// The recorded result for a step, if it has completed
    pub fn step_result(&self, step: StepName) -> Option<&StepResult> {
        self.completed_steps
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, result)| result)
    }

    /// Record a step result
    ///
    /// Idempotent per step name: a step that already has a recorded
    /// result keeps its first result. Returns whether the state changed.
    pub fn record_step(&mut self, step: StepName, result: StepResult) -> bool {
        if self.is_terminal() || self.step_result(step).is_some() {
            return false;
        }
        self.completed_steps.push((step, result));
        true
    }

    /// Whether the dual approval wait has resolved
    ///
    /// The wait resolves when both statuses have left `Waiting`, whether
    /// by callback or by deadline timeout.
    pub fn approvals_resolved(&self) -> bool {
        !self.company_approval.is_waiting() && !self.custodian_approval.is_waiting()
    }

    /// Fold a delivered signal into the approval-status fields
    ///
    /// Last write wins while the dual wait is unresolved; once both
    /// statuses have left `Waiting` they freeze, so a late callback can
    /// never change the branch taken. Returns whether the state changed.
    pub fn apply_signal(&mut self, source: ApprovalSource, status: ApprovalStatus) -> bool {
        if self.is_terminal() || self.approvals_resolved() {
            return false;
        }
        let field = match source {
            ApprovalSource::Company => &mut self.company_approval,
            ApprovalSource::Custodian => &mut self.custodian_approval,
        };
        if *field == status {
            return false;
        }
        *field = status;
        true
    }

    /// Mark any still-waiting statuses as timed out
    ///
    /// Recording the timeout in the state (rather than branching on the
    /// clock) keeps replay deterministic. Returns whether the state
    /// changed.
    pub fn mark_wait_timed_out(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        let mut changed = false;
        if self.company_approval.is_waiting() {
            self.company_approval = ApprovalStatus::Timeout;
            changed = true;
        }
        if self.custodian_approval.is_waiting() {
            self.custodian_approval = ApprovalStatus::Timeout;
            changed = true;
        }
        if changed {
            self.suspended_at = None;
        }
        changed
    }

    /// Set the terminal outcome, exactly once
    ///
    /// Returns whether the state changed; a second outcome is ignored.
    pub fn set_outcome(&mut self, outcome: Outcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.suspended_at = None;
        self.outcome = Some(outcome);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        ExecutionState::new("wf-1", WorkflowInputs::new(100, "alice"))
    }

    #[test]
    fn test_new_state_is_waiting() {
        let state = state();
        assert_eq!(state.company_approval, ApprovalStatus::Waiting);
        assert_eq!(state.custodian_approval, ApprovalStatus::Waiting);
        assert!(!state.is_terminal());
        assert!(!state.approvals_resolved());
        assert!(state.completed_steps.is_empty());
    }

    #[test]
    fn test_record_step_is_idempotent() {
        let mut state = state();
        assert!(state.record_step(StepName::Verify, StepResult::succeeded("ok", 1)));
        assert!(!state.record_step(StepName::Verify, StepResult::failed("again", 3)));

        assert_eq!(state.completed_steps.len(), 1);
        // The first recorded result wins.
        assert!(state.step_result(StepName::Verify).unwrap().success);
    }

    #[test]
    fn test_apply_signal_last_write_wins_while_unresolved() {
        let mut state = state();
        assert!(state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved));
        // Custodian still waiting, so the company value may be overwritten.
        assert!(state.apply_signal(ApprovalSource::Company, ApprovalStatus::Rejected));
        assert_eq!(state.company_approval, ApprovalStatus::Rejected);
    }

    #[test]
    fn test_apply_signal_duplicate_is_noop() {
        let mut state = state();
        assert!(state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved));
        assert!(!state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved));
    }

    #[test]
    fn test_statuses_freeze_once_resolved() {
        let mut state = state();
        state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved);
        state.apply_signal(ApprovalSource::Custodian, ApprovalStatus::Approved);
        assert!(state.approvals_resolved());

        assert!(!state.apply_signal(ApprovalSource::Company, ApprovalStatus::Rejected));
        assert_eq!(state.company_approval, ApprovalStatus::Approved);
    }

    #[test]
    fn test_mark_wait_timed_out() {
        let mut state = state();
        state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved);
        state.suspended_at = Some(Utc::now());

        assert!(state.mark_wait_timed_out());
        assert_eq!(state.company_approval, ApprovalStatus::Approved);
        assert_eq!(state.custodian_approval, ApprovalStatus::Timeout);
        assert!(state.suspended_at.is_none());

        // Nothing left waiting.
        assert!(!state.mark_wait_timed_out());
    }

    #[test]
    fn test_no_mutation_after_terminal_outcome() {
        let mut state = state();
        assert!(state.set_outcome(Outcome::Failure("approval timeout".into())));

        assert!(!state.set_outcome(Outcome::Success("late".into())));
        assert!(!state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved));
        assert!(!state.record_step(StepName::Verify, StepResult::succeeded("ok", 1)));
        assert!(!state.mark_wait_timed_out());

        assert_eq!(
            state.outcome,
            Some(Outcome::Failure("approval timeout".into()))
        );
    }

    #[test]
    fn test_outcome_display() {
        let outcome = Outcome::Success("Workflow completed successfully".into());
        assert_eq!(
            outcome.to_string(),
            "Success: Workflow completed successfully"
        );

        let outcome = Outcome::Failure("register credit request is rejected".into());
        assert_eq!(
            outcome.to_string(),
            "Failure: register credit request is rejected"
        );
    }

    #[test]
    fn test_state_serialization_round_trip() {
        let mut state = state();
        state.apply_signal(ApprovalSource::Company, ApprovalStatus::Approved);
        state.record_step(
            StepName::SendCompanyApproval,
            StepResult::succeeded("sent", 2),
        );
        state.suspended_at = Some(Utc::now());

        let json = serde_json::to_string(&state).unwrap();
        let parsed: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, parsed);
    }
}
