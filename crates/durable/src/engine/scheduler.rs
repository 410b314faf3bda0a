//! Engine and per-instance control loops

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{watch, Notify};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::activity::{ActivityContext, ActivityInvoker, StepHandler, StepOptions, StepOverrides};
use crate::inbox::{InboxError, SignalInbox};
use crate::orchestrator::{decide, Decision};
use crate::persistence::{InstanceStore, StoreError};
use crate::reliability::RetryPolicy;
use crate::workflow::{
    ApprovalSource, ApprovalStatus, ExecutionState, Outcome, Signal, StepName, WorkflowInputs,
};

use super::slots::WorkerSlots;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum instances executing steps concurrently
    pub max_concurrency: usize,

    /// Deadline for the dual approval wait
    pub approval_timeout: Duration,

    /// Per-attempt timeout for ordinary steps
    pub step_timeout: Duration,

    /// Per-attempt timeout for the approval-request sends
    ///
    /// Dispatching an approval request may involve a slow human-facing
    /// channel, so it gets a longer budget than the other steps.
    pub approval_send_timeout: Duration,

    /// Retry policy applied to steps without an override
    pub retry_policy: RetryPolicy,

    /// Per-step option overrides
    pub step_overrides: StepOverrides,

    /// Backoff between retries of a failed state save
    pub persistence_backoff: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            approval_timeout: Duration::from_secs(180),
            step_timeout: Duration::from_secs(10),
            approval_send_timeout: Duration::from_secs(180),
            retry_policy: RetryPolicy::exponential(),
            step_overrides: StepOverrides::new(),
            persistence_backoff: RetryPolicy::exponential()
                .with_initial_interval(Duration::from_millis(100))
                .with_max_interval(Duration::from_secs(5)),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from environment variables
    ///
    /// Recognized variables, all optional:
    /// - `CREDITFLOW_MAX_CONCURRENCY`
    /// - `CREDITFLOW_APPROVAL_TIMEOUT_SECS`
    /// - `CREDITFLOW_STEP_TIMEOUT_SECS`
    /// - `CREDITFLOW_MAX_ATTEMPTS`
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_parse::<usize>("CREDITFLOW_MAX_CONCURRENCY") {
            config.max_concurrency = value.max(1);
        }
        if let Some(secs) = env_parse::<u64>("CREDITFLOW_APPROVAL_TIMEOUT_SECS") {
            config.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CREDITFLOW_STEP_TIMEOUT_SECS") {
            config.step_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("CREDITFLOW_MAX_ATTEMPTS") {
            config.retry_policy = config.retry_policy.with_max_attempts(attempts.max(1));
        }
        config
    }

    /// Set the maximum step concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the approval wait deadline
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Set the per-attempt timeout for ordinary steps
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Set the per-attempt timeout for the approval-request sends
    pub fn with_approval_send_timeout(mut self, timeout: Duration) -> Self {
        self.approval_send_timeout = timeout;
        self
    }

    /// Set the default retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the options for one step
    pub fn with_step_options(mut self, step: StepName, options: StepOptions) -> Self {
        self.step_overrides.insert(step, options);
        self
    }

    /// Set the backoff for failed state saves
    pub fn with_persistence_backoff(mut self, policy: RetryPolicy) -> Self {
        self.persistence_backoff = policy;
        self
    }

    /// Resolve the invocation options for one step
    pub fn step_options(&self, step: StepName) -> StepOptions {
        if let Some(options) = self.step_overrides.get(&step) {
            return options.clone();
        }
        let timeout = if StepName::APPROVAL_SENDS.contains(&step) {
            self.approval_send_timeout
        } else {
            self.step_timeout
        };
        StepOptions {
            retry_policy: self.retry_policy.clone(),
            timeout,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No instance with this ID
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// An instance with this ID already exists
    #[error("instance already exists: {0}")]
    DuplicateInstance(String),

    /// Signal carried a status that is not a decision
    #[error("signal for {instance_id} must be approved or rejected, got {status:?}")]
    InvalidSignal {
        instance_id: String,
        status: ApprovalStatus,
    },

    /// The instance exists but no control loop is driving it
    #[error("instance is not running: {0}")]
    NotRunning(String),

    /// The engine has shut down
    #[error("engine is shut down")]
    ShutDown,

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to one started workflow instance
#[derive(Debug)]
pub struct WorkflowHandle {
    /// The instance this handle tracks
    pub instance_id: String,

    outcome_rx: watch::Receiver<Option<Outcome>>,
}

impl WorkflowHandle {
    /// Wait for the instance's terminal outcome
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutDown`] if the engine stops before the
    /// instance completes.
    pub async fn await_result(mut self) -> Result<Outcome, EngineError> {
        loop {
            if let Some(outcome) = self.outcome_rx.borrow_and_update().clone() {
                return Ok(outcome);
            }
            if self.outcome_rx.changed().await.is_err() {
                return Err(EngineError::ShutDown);
            }
        }
    }
}

/// The workflow engine
///
/// Spawns one control loop per started instance and keeps every
/// transition durable: state is persisted before the next action runs,
/// so [`recover`](Engine::recover) after a restart resumes each
/// non-terminal instance exactly where it stopped.
pub struct Engine<S, H> {
    store: Arc<S>,
    invoker: ActivityInvoker<H>,
    inbox: Arc<SignalInbox<S>>,
    config: EngineConfig,
    slots: WorkerSlots,
    instances: Arc<DashMap<String, watch::Sender<Option<Outcome>>>>,
    shutdown_tx: watch::Sender<bool>,
    tracker: TaskTracker,
}

impl<S: InstanceStore, H: StepHandler> Engine<S, H> {
    /// Create a new engine over a store and a step handler
    pub fn new(store: Arc<S>, handler: Arc<H>, config: EngineConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inbox: Arc::new(SignalInbox::new(store.clone())),
            invoker: ActivityInvoker::new(handler),
            slots: WorkerSlots::new(config.max_concurrency),
            store,
            config,
            instances: Arc::new(DashMap::new()),
            shutdown_tx,
            tracker: TaskTracker::new(),
        }
    }

    /// Access the signal inbox
    pub fn inbox(&self) -> &Arc<SignalInbox<S>> {
        &self.inbox
    }

    /// Start a new workflow instance
    ///
    /// The instance is persisted before its control loop spawns, so a
    /// crash immediately after `start` returns is recoverable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateInstance`] if the ID is taken.
    #[instrument(skip(self, inputs))]
    pub async fn start(
        &self,
        instance_id: &str,
        inputs: WorkflowInputs,
    ) -> Result<WorkflowHandle, EngineError> {
        if *self.shutdown_tx.borrow() {
            return Err(EngineError::ShutDown);
        }

        let state = ExecutionState::new(instance_id, inputs);
        self.store.create_instance(&state).await.map_err(|err| match err {
            StoreError::AlreadyExists(id) => EngineError::DuplicateInstance(id),
            other => EngineError::Store(other),
        })?;

        info!(instance_id, "workflow instance started");
        Ok(self.spawn_instance(state))
    }

    /// Deliver an approval signal to a waiting instance
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSignal`] unless the status is
    /// `Approved` or `Rejected`, and [`EngineError::UnknownInstance`]
    /// if the instance does not exist or already completed.
    pub async fn signal(
        &self,
        instance_id: &str,
        source: ApprovalSource,
        status: ApprovalStatus,
    ) -> Result<(), EngineError> {
        if !matches!(status, ApprovalStatus::Approved | ApprovalStatus::Rejected) {
            return Err(EngineError::InvalidSignal {
                instance_id: instance_id.to_string(),
                status,
            });
        }

        self.inbox
            .deliver(instance_id, Signal::new(source, status))
            .await
            .map_err(|err| match err {
                InboxError::UnknownInstance(id) => EngineError::UnknownInstance(id),
                InboxError::Store(store) => EngineError::Store(store),
            })
    }

    /// Load a snapshot of an instance's persisted state
    pub async fn get_instance(&self, instance_id: &str) -> Result<ExecutionState, EngineError> {
        self.store
            .load_instance(instance_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(id) => EngineError::UnknownInstance(id),
                other => EngineError::Store(other),
            })
    }

    /// Wait for an instance's terminal outcome
    ///
    /// Works for instances started by this engine and for recovered
    /// ones. An already-completed instance resolves immediately from
    /// the store.
    pub async fn await_result(&self, instance_id: &str) -> Result<Outcome, EngineError> {
        let handle = self.instances.get(instance_id).map(|sender| WorkflowHandle {
            instance_id: instance_id.to_string(),
            outcome_rx: sender.subscribe(),
        });
        if let Some(handle) = handle {
            return handle.await_result().await;
        }

        let state = self.get_instance(instance_id).await?;
        state
            .outcome
            .ok_or_else(|| EngineError::NotRunning(instance_id.to_string()))
    }

    /// Resume every non-terminal instance found in the store
    ///
    /// Instances already driven by this engine are skipped. Returns the
    /// number of instances resumed.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let mut resumed = 0;
        for instance_id in self.store.list_active().await? {
            if self.instances.contains_key(&instance_id) {
                continue;
            }
            let state = self.store.load_instance(&instance_id).await?;
            if state.is_terminal() {
                continue;
            }
            info!(instance_id = %state.instance_id, "recovering instance");
            self.spawn_instance(state);
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "recovery complete");
        }
        Ok(resumed)
    }

    /// Shut down gracefully
    ///
    /// Running control loops suspend at their next persistence point;
    /// nothing is lost, and a new engine over the same store can
    /// [`recover`](Engine::recover) everything in flight.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        let _ = self.shutdown_tx.send(true);
        self.tracker.close();
        self.tracker.wait().await;
        info!("engine stopped");
    }

    fn spawn_instance(&self, state: ExecutionState) -> WorkflowHandle {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        self.instances
            .insert(state.instance_id.clone(), outcome_tx.clone());

        let instance_loop = InstanceLoop {
            store: self.store.clone(),
            inbox: self.inbox.clone(),
            invoker: self.invoker.clone(),
            config: self.config.clone(),
            slots: self.slots.clone(),
            notify: self.inbox.subscribe(&state.instance_id),
            shutdown_rx: self.shutdown_tx.subscribe(),
            outcome_tx,
            instances: self.instances.clone(),
        };
        let instance_id = state.instance_id.clone();
        self.tracker.spawn(instance_loop.run(state));

        WorkflowHandle {
            instance_id,
            outcome_rx,
        }
    }
}

/// Marker for a control loop that must stop without an outcome
struct Stopped;

/// The control loop driving one instance
struct InstanceLoop<S, H> {
    store: Arc<S>,
    inbox: Arc<SignalInbox<S>>,
    invoker: ActivityInvoker<H>,
    config: EngineConfig,
    slots: WorkerSlots,
    notify: Arc<Notify>,
    shutdown_rx: watch::Receiver<bool>,
    outcome_tx: watch::Sender<Option<Outcome>>,
    instances: Arc<DashMap<String, watch::Sender<Option<Outcome>>>>,
}

impl<S: InstanceStore, H: StepHandler> InstanceLoop<S, H> {
    #[instrument(skip_all, fields(instance_id = %state.instance_id))]
    async fn run(mut self, mut state: ExecutionState) {
        debug!("control loop running");
        loop {
            if *self.shutdown_rx.borrow() {
                debug!("suspending for shutdown");
                self.detach(&state.instance_id);
                return;
            }

            if self.fold_signals(&mut state).await.is_err() {
                self.detach(&state.instance_id);
                return;
            }

            let outcome = match decide(&state) {
                Decision::RunSteps(steps) => {
                    if self.run_steps(&mut state, steps).await.is_err() {
                        self.detach(&state.instance_id);
                        return;
                    }
                    continue;
                }
                Decision::AwaitApprovals => {
                    if self.await_approvals(&mut state).await.is_err() {
                        self.detach(&state.instance_id);
                        return;
                    }
                    continue;
                }
                Decision::Complete(outcome) => outcome,
            };

            if state.set_outcome(outcome.clone()) {
                if self.persist(&state).await.is_err() {
                    self.detach(&state.instance_id);
                    return;
                }
            }
            info!(%outcome, "instance completed");
            let _ = self.outcome_tx.send(Some(outcome));
            self.detach(&state.instance_id);
            return;
        }
    }

    /// Execute a batch of independent steps under one concurrency slot
    async fn run_steps(
        &mut self,
        state: &mut ExecutionState,
        steps: Vec<StepName>,
    ) -> Result<(), Stopped> {
        let _permit = self.slots.acquire().await;
        debug!(?steps, "running steps");

        let ctx = ActivityContext::new(state.instance_id.clone(), &state.inputs);
        let invocations = steps.into_iter().map(|step| {
            let options = self.config.step_options(step);
            let invoker = self.invoker.clone();
            let ctx = ctx.clone();
            async move { (step, invoker.invoke(step, &ctx, &options).await) }
        });

        let mut changed = false;
        for (step, result) in join_all(invocations).await {
            changed |= state.record_step(step, result);
        }
        if changed {
            self.persist(state).await?;
        }
        Ok(())
    }

    /// Suspend until a signal arrives or the wait deadline passes
    ///
    /// The deadline is persisted on first entry, so re-entry after a
    /// restart keeps the original deadline instead of extending it.
    async fn await_approvals(&mut self, state: &mut ExecutionState) -> Result<(), Stopped> {
        let deadline = match state.suspended_at {
            Some(deadline) => deadline,
            None => {
                let deadline = Utc::now()
                    + chrono::Duration::from_std(self.config.approval_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(180));
                state.suspended_at = Some(deadline);
                self.persist(state).await?;
                deadline
            }
        };

        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(remaining_ms = remaining.as_millis() as u64, "awaiting approvals");

        let notify = self.notify.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let deadline_hit = tokio::select! {
            _ = notify.notified() => false,
            _ = tokio::time::sleep(remaining) => true,
            _ = shutdown_rx.wait_for(|stop| *stop) => false,
        };

        if deadline_hit {
            // Drain once more: a callback that raced the deadline
            // still counts.
            self.fold_signals(state).await?;
            if !state.approvals_resolved() && state.mark_wait_timed_out() {
                warn!("approval wait timed out");
                self.persist(state).await?;
            }
        }
        Ok(())
    }

    /// Fold pending signals into the approval-status fields
    async fn fold_signals(&mut self, state: &mut ExecutionState) -> Result<(), Stopped> {
        let signals = self.drain_signals(&state.instance_id).await?;
        let mut changed = false;
        for signal in signals {
            debug!(source = %signal.source, status = ?signal.status, "applying signal");
            changed |= state.apply_signal(signal.source, signal.status);
        }
        if changed {
            if state.approvals_resolved() {
                state.suspended_at = None;
            }
            self.persist(state).await?;
        }
        Ok(())
    }

    async fn drain_signals(&mut self, instance_id: &str) -> Result<Vec<Signal>, Stopped> {
        let mut attempt = 1u32;
        loop {
            match self.inbox.drain(instance_id).await {
                Ok(signals) => return Ok(signals),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    warn!(attempt, "signal drain failed, retrying: {err}");
                    self.backoff(attempt).await?;
                }
                Err(err) => {
                    error!("signal drain failed: {err}");
                    return Err(Stopped);
                }
            }
        }
    }

    /// Persist the state, retrying transient store outages indefinitely
    ///
    /// The loop makes no progress past an unsaved transition; it would
    /// rather stall than act on state the store has not accepted.
    async fn persist(&mut self, state: &ExecutionState) -> Result<(), Stopped> {
        let mut attempt = 1u32;
        loop {
            match self.store.save_instance(state).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    warn!(attempt, "state save failed, retrying: {err}");
                    self.backoff(attempt).await?;
                }
                Err(err) => {
                    error!("state save failed permanently: {err}");
                    return Err(Stopped);
                }
            }
        }
    }

    /// Sleep the persistence backoff, bailing out on shutdown
    async fn backoff(&mut self, attempt: u32) -> Result<(), Stopped> {
        let delay = self.config.persistence_backoff.delay_for_attempt(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.shutdown_rx.wait_for(|stop| *stop) => Err(Stopped),
        }
    }

    fn detach(&self, instance_id: &str) {
        self.inbox.forget(instance_id);
        self.instances.remove(instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.approval_timeout, Duration::from_secs(180));
        assert_eq!(config.step_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_policy.max_attempts, 5);
    }

    #[test]
    fn test_step_options_give_sends_the_long_timeout() {
        let config = EngineConfig::default();

        let send = config.step_options(StepName::SendCompanyApproval);
        assert_eq!(send.timeout, Duration::from_secs(180));

        let verify = config.step_options(StepName::Verify);
        assert_eq!(verify.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_step_override_wins() {
        let config = EngineConfig::default().with_step_options(
            StepName::Persist,
            StepOptions::default()
                .with_timeout(Duration::from_secs(30))
                .with_retry_policy(RetryPolicy::no_retry()),
        );

        let options = config.step_options(StepName::Persist);
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.retry_policy.max_attempts, 1);
    }
}
