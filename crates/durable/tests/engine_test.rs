//! End-to-end engine tests over the in-memory store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use creditflow_durable::orchestrator::{phase, Phase};
use creditflow_durable::prelude::*;

/// Scripted step handler for tests
///
/// Steps succeed by default; individual steps can be scripted to fail a
/// number of times before succeeding, fail permanently, or return a
/// business failure.
#[derive(Default)]
struct ScriptedHandler {
    /// Remaining retryable failures per step
    transient_failures: Mutex<HashMap<StepName, u32>>,

    /// Steps that always raise a non-retryable error
    fatal: Mutex<Vec<StepName>>,

    /// Steps that return a failed service result
    business_failures: Mutex<Vec<StepName>>,

    /// Every context the handler saw, in call order
    calls: Mutex<Vec<(StepName, ActivityContext)>>,
}

impl ScriptedHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail_transiently(&self, step: StepName, times: u32) {
        self.transient_failures.lock().insert(step, times);
    }

    fn fail_fatally(&self, step: StepName) {
        self.fatal.lock().push(step);
    }

    fn fail_business(&self, step: StepName) {
        self.business_failures.lock().push(step);
    }

    fn calls_for(&self, step: StepName) -> usize {
        self.calls.lock().iter().filter(|(s, _)| *s == step).count()
    }
}

#[async_trait]
impl StepHandler for ScriptedHandler {
    async fn execute(
        &self,
        step: StepName,
        ctx: &ActivityContext,
    ) -> Result<ServiceResult, ActivityError> {
        self.calls.lock().push((step, ctx.clone()));

        if self.fatal.lock().contains(&step) {
            return Err(ActivityError::non_retryable("permanent failure"));
        }
        if self.business_failures.lock().contains(&step) {
            return Ok(ServiceResult::failed("declined by collaborator"));
        }

        let mut failures = self.transient_failures.lock();
        if let Some(remaining) = failures.get_mut(&step) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ActivityError::retryable("transient failure"));
            }
        }
        Ok(ServiceResult::succeeded(format!("{step} ok")))
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(1), 3))
        .with_persistence_backoff(RetryPolicy::fixed(Duration::from_millis(1), 10))
}

fn engine_with(
    handler: Arc<ScriptedHandler>,
    config: EngineConfig,
) -> (
    Arc<InMemoryInstanceStore>,
    Engine<InMemoryInstanceStore, ScriptedHandler>,
) {
    let store = Arc::new(InMemoryInstanceStore::new());
    let engine = Engine::new(store.clone(), handler, config);
    (store, engine)
}

/// Wait until the instance state satisfies a predicate
async fn wait_for_state<S, H, F>(engine: &Engine<S, H>, id: &str, mut predicate: F) -> ExecutionState
where
    S: InstanceStore,
    H: StepHandler,
    F: FnMut(&ExecutionState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = engine.get_instance(id).await.unwrap();
            if predicate(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("state predicate not reached in time")
}

#[test_log::test(tokio::test)]
async fn test_happy_path_completes() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(500, "alice"))
        .await
        .unwrap();

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert_eq!(
        outcome.to_string(),
        "Success: Workflow completed successfully"
    );

    // Every step ran exactly once, with the workflow inputs threaded
    // through the context.
    for step in StepName::APPROVAL_SENDS.into_iter().chain(StepName::SEQUENTIAL) {
        assert_eq!(handler.calls_for(step), 1, "step {step} call count");
    }
    let calls = handler.calls.lock();
    assert!(calls.iter().all(|(_, ctx)| ctx.amount == 500 && ctx.initiator == "alice"));
}

#[tokio::test]
async fn test_rejection_fails_the_run() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "bob"))
        .await
        .unwrap();

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Rejected)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert_eq!(
        outcome.to_string(),
        "Failure: register credit request is rejected"
    );

    // The sequential tail never ran.
    for step in StepName::SEQUENTIAL {
        assert_eq!(handler.calls_for(step), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_approval_wait_times_out() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "carol"))
        .await
        .unwrap();

    // No signals arrive; paused time fast-forwards to the deadline.
    let outcome = handle.await_result().await.unwrap();
    assert_eq!(outcome.to_string(), "Failure: approval timeout");

    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(state.company_approval, ApprovalStatus::Timeout);
    assert_eq!(state.custodian_approval, ApprovalStatus::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_one_approval_then_timeout() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "dave"))
        .await
        .unwrap();

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert_eq!(outcome.to_string(), "Failure: approval timeout");

    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(state.company_approval, ApprovalStatus::Approved);
    assert_eq!(state.custodian_approval, ApprovalStatus::Timeout);
}

#[tokio::test]
async fn test_transient_step_failure_is_retried() {
    let handler = ScriptedHandler::new();
    handler.fail_transiently(StepName::Verify, 2);
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "erin"))
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(handler.calls_for(StepName::Verify), 3);

    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(state.step_result(StepName::Verify).unwrap().attempts, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_with_step_reason() {
    let handler = ScriptedHandler::new();
    handler.fail_transiently(StepName::Verify, 10);
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "frank"))
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert_eq!(outcome.to_string(), "Failure: verification failed");

    // The recorded result still carries the underlying error.
    let state = engine.get_instance("wf-1").await.unwrap();
    let result = state.step_result(StepName::Verify).unwrap();
    assert_eq!(result.error.as_deref(), Some("transient failure"));
    assert_eq!(result.attempts, 3);

    // Later steps never ran.
    assert_eq!(handler.calls_for(StepName::Persist), 0);
    assert_eq!(handler.calls_for(StepName::Notify), 0);
}

#[tokio::test]
async fn test_failed_send_short_circuits() {
    let handler = ScriptedHandler::new();
    handler.fail_fatally(StepName::SendCustodianApproval);
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "grace"))
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert_eq!(outcome.to_string(), "Failure: failed to send approval requests");

    // A non-retryable error consumed a single attempt.
    assert_eq!(handler.calls_for(StepName::SendCustodianApproval), 1);
}

#[tokio::test]
async fn test_business_failure_is_not_retried() {
    let handler = ScriptedHandler::new();
    handler.fail_business(StepName::Persist);
    let (_, engine) = engine_with(handler.clone(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "heidi"))
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert_eq!(outcome.to_string(), "Failure: persistence failed");
    assert_eq!(handler.calls_for(StepName::Persist), 1);

    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(
        state.step_result(StepName::Persist).unwrap().error.as_deref(),
        Some("declined by collaborator")
    );
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler, fast_config());

    engine
        .start("wf-1", WorkflowInputs::new(100, "ivan"))
        .await
        .unwrap();
    let err = engine
        .start("wf-1", WorkflowInputs::new(200, "ivan"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateInstance(id) if id == "wf-1"));
}

#[tokio::test]
async fn test_signal_validation() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler, fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "judy"))
        .await
        .unwrap();

    // Only approved/rejected are acceptable decisions.
    let err = engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Waiting)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignal { .. }));

    // Unknown instances are rejected.
    let err = engine
        .signal("missing", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownInstance(_)));

    // Completed instances no longer accept signals.
    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();
    handle.await_result().await.unwrap();

    let err = engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownInstance(_)));
}

#[tokio::test]
async fn test_duplicate_signal_is_idempotent() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler, fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "kim"))
        .await
        .unwrap();

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    assert!(handle.await_result().await.unwrap().is_success());
}

#[test_log::test(tokio::test)]
async fn test_restart_resumes_waiting_instance() {
    let store = Arc::new(InMemoryInstanceStore::new());

    // First engine: start an instance and let it reach the approval
    // wait, then shut down.
    let engine = Engine::new(store.clone(), ScriptedHandler::new(), fast_config());
    engine
        .start("wf-1", WorkflowInputs::new(100, "lena"))
        .await
        .unwrap();
    let suspended = wait_for_state(&engine, "wf-1", |s| s.suspended_at.is_some()).await;
    let deadline = suspended.suspended_at.unwrap();
    engine.shutdown().await;

    // Second engine over the same store: recovery respawns the
    // instance with its original deadline.
    let engine = Engine::new(store.clone(), ScriptedHandler::new(), fast_config());
    assert_eq!(engine.recover().await.unwrap(), 1);

    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(state.suspended_at, Some(deadline));

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = engine.await_result("wf-1").await.unwrap();
    assert_eq!(
        outcome.to_string(),
        "Success: Workflow completed successfully"
    );

    // Sends recorded before the restart were not re-executed.
    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(state.step_result(StepName::SendCompanyApproval).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_signal_delivered_while_stopped_is_applied_on_recovery() {
    let store = Arc::new(InMemoryInstanceStore::new());

    let engine = Engine::new(store.clone(), ScriptedHandler::new(), fast_config());
    engine
        .start("wf-1", WorkflowInputs::new(100, "mike"))
        .await
        .unwrap();
    wait_for_state(&engine, "wf-1", |s| s.suspended_at.is_some()).await;
    engine.shutdown().await;

    // Signals land durably even with no engine running.
    let inbox = SignalInbox::new(store.clone());
    inbox
        .deliver("wf-1", Signal::approved(ApprovalSource::Company))
        .await
        .unwrap();
    inbox
        .deliver("wf-1", Signal::approved(ApprovalSource::Custodian))
        .await
        .unwrap();

    let engine = Engine::new(store.clone(), ScriptedHandler::new(), fast_config());
    engine.recover().await.unwrap();

    let outcome = engine.await_result("wf-1").await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_recover_skips_completed_instances() {
    let store = Arc::new(InMemoryInstanceStore::new());
    let engine = Engine::new(store.clone(), ScriptedHandler::new(), fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "nina"))
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();
    handle.await_result().await.unwrap();
    engine.shutdown().await;

    let engine = Engine::new(store, ScriptedHandler::new(), fast_config());
    assert_eq!(engine.recover().await.unwrap(), 0);

    // The outcome is still readable from the store.
    let outcome = engine.await_result("wf-1").await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_transient_store_outage_is_survived() {
    let handler = ScriptedHandler::new();
    let (store, engine) = engine_with(handler, fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "omar"))
        .await
        .unwrap();

    // The next saves fail; the control loop retries until the store
    // comes back.
    store.fail_next_saves(3);

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();

    let outcome = handle.await_result().await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_phase_reporting() {
    let handler = ScriptedHandler::new();
    let (_, engine) = engine_with(handler, fast_config());

    let handle = engine
        .start("wf-1", WorkflowInputs::new(100, "pam"))
        .await
        .unwrap();

    let state = wait_for_state(&engine, "wf-1", |s| s.suspended_at.is_some()).await;
    assert_eq!(phase(&state), Phase::AwaitingApprovals);

    engine
        .signal("wf-1", ApprovalSource::Company, ApprovalStatus::Approved)
        .await
        .unwrap();
    engine
        .signal("wf-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
        .await
        .unwrap();
    handle.await_result().await.unwrap();

    let state = engine.get_instance("wf-1").await.unwrap();
    assert_eq!(phase(&state), Phase::Completed);
}
