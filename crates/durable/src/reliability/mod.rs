//! Retry policies and backoff

mod retry;

pub use retry::{duration_millis, RetryPolicy};
