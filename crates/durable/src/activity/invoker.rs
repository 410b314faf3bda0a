//! Step invocation with timeout and retry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::reliability::{duration_millis, RetryPolicy};
use crate::workflow::{StepName, StepResult};

use super::ActivityContext;

/// Error type for step failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors immediately fail the step without further
    /// retry attempts.
    pub retryable: bool,
}

impl ActivityError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// The result a collaborator call reports back
///
/// A returned result is authoritative and consumes the invocation: the
/// invoker retries only on raised [`ActivityError`]s and timeouts, never
/// on a result the collaborator chose to return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceResult {
    /// Whether the call succeeded
    pub success: bool,

    /// Content returned by the collaborator
    pub content: String,

    /// Error detail for failed calls
    pub error: Option<String>,
}

impl ServiceResult {
    /// Create a successful result
    pub fn succeeded(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    /// Create a failed result carrying the error
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }
}

/// A handler executes the collaborator call behind one workflow step
///
/// # Example
///
/// ```ignore
/// use creditflow_durable::prelude::*;
///
/// struct CreditHandlers { /* collaborator clients */ }
///
/// #[async_trait]
/// impl StepHandler for CreditHandlers {
///     async fn execute(
///         &self,
///         step: StepName,
///         ctx: &ActivityContext,
///     ) -> Result<ServiceResult, ActivityError> {
///         match step {
///             StepName::Verify => self.verify(ctx).await,
///             // ...
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    /// Execute one step
    ///
    /// # Errors
    ///
    /// Return `ActivityError::retryable()` for transient failures that
    /// should be retried. Return `ActivityError::non_retryable()` for
    /// permanent failures.
    async fn execute(
        &self,
        step: StepName,
        ctx: &ActivityContext,
    ) -> Result<ServiceResult, ActivityError>;
}

/// Per-step invocation options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOptions {
    /// Retry policy for raised errors and timeouts
    pub retry_policy: RetryPolicy,

    /// Timeout applied to each individual attempt
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::exponential(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl StepOptions {
    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Per-step overrides keyed by step name
pub type StepOverrides = HashMap<StepName, StepOptions>;

/// Invokes step handlers with per-attempt timeout and retry
///
/// The invoker never returns an error: every invocation reduces to a
/// [`StepResult`], success or failure, so the caller can record it
/// durably and move on.
pub struct ActivityInvoker<H> {
    handler: Arc<H>,
}

impl<H> Clone for ActivityInvoker<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H: StepHandler> ActivityInvoker<H> {
    /// Create a new invoker around a handler
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Run one step to a recorded result
    ///
    /// Attempts the handler up to `retry_policy.max_attempts` times,
    /// sleeping the policy's backoff delay between attempts. A timed-out
    /// attempt counts against the budget like a raised retryable error.
    pub async fn invoke(
        &self,
        step: StepName,
        ctx: &ActivityContext,
        options: &StepOptions,
    ) -> StepResult {
        let max_attempts = options.retry_policy.max_attempts.max(1);
        let mut last_error = String::new();
        let mut attempt = 1;

        loop {
            let delay = options.retry_policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(
                    instance_id = %ctx.instance_id,
                    %step,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let attempt_ctx = ctx.for_attempt(attempt, max_attempts);
            match tokio::time::timeout(options.timeout, self.handler.execute(step, &attempt_ctx))
                .await
            {
                Ok(Ok(result)) => {
                    debug!(
                        instance_id = %ctx.instance_id,
                        %step,
                        attempt,
                        success = result.success,
                        "step returned a result"
                    );
                    return if result.success {
                        StepResult::succeeded(result.content, attempt)
                    } else {
                        StepResult::failed(
                            result
                                .error
                                .unwrap_or_else(|| "collaborator reported failure".to_string()),
                            attempt,
                        )
                    };
                }
                Ok(Err(error)) => {
                    warn!(
                        instance_id = %ctx.instance_id,
                        %step,
                        attempt,
                        retryable = error.retryable,
                        "step attempt failed: {error}"
                    );
                    last_error = error.message;
                    if !error.retryable {
                        return StepResult::failed(last_error, attempt);
                    }
                }
                Err(_) => {
                    warn!(
                        instance_id = %ctx.instance_id,
                        %step,
                        attempt,
                        timeout_ms = options.timeout.as_millis() as u64,
                        "step attempt timed out"
                    );
                    last_error = format!(
                        "timed out after {}ms",
                        options.timeout.as_millis()
                    );
                }
            }

            if attempt >= max_attempts {
                return StepResult::failed(last_error, attempt);
            }
            attempt += 1;
        }
    }
}
