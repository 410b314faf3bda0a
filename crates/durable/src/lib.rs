//! # Durable Approval Execution Engine
//!
//! A workflow execution core for a multi-party approval process with
//! asynchronous external callbacks. It runs each workflow instance as a
//! deterministic sequence of steps, suspends while waiting for two
//! independent approval signals (with a bounded deadline), and executes
//! side-effecting collaborator calls with automatic retry, surviving
//! process restarts without losing or duplicating progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  (drives instance control loops, persists every transition)  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                      │
//!          ▼                    ▼                      ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌───────────────────┐
//! │  Orchestrator  │  │   SignalInbox    │  │  ActivityInvoker  │
//! │ (pure decision │  │ (durable mailbox │  │ (timeout + retry  │
//! │    logic)      │  │  + wake-ups)     │  │  per collaborator │
//! │                │  │                  │  │  call)            │
//! └────────────────┘  └──────────────────┘  └───────────────────┘
//!          │                    │                      │
//!          └────────────────────┴──────────────────────┘
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │      InstanceStore       │
//!                  │ (execution state + pending│
//!                  │  signals, resumable)     │
//!                  └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use creditflow_durable::prelude::*;
//!
//! let store = Arc::new(InMemoryInstanceStore::new());
//! let engine = Engine::new(store, handler, EngineConfig::default());
//!
//! let handle = engine
//!     .start("instance-1", WorkflowInputs::new(100, "alice"))
//!     .await?;
//!
//! engine
//!     .signal("instance-1", ApprovalSource::Company, ApprovalStatus::Approved)
//!     .await?;
//! engine
//!     .signal("instance-1", ApprovalSource::Custodian, ApprovalStatus::Approved)
//!     .await?;
//!
//! let outcome = handle.await_result().await?;
//! assert!(outcome.is_success());
//! ```

pub mod activity;
pub mod engine;
pub mod inbox;
pub mod orchestrator;
pub mod persistence;
pub mod reliability;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        ActivityContext, ActivityError, ActivityInvoker, ServiceResult, StepHandler, StepOptions,
    };
    pub use crate::engine::{Engine, EngineConfig, EngineError, WorkflowHandle};
    pub use crate::inbox::{InboxError, SignalInbox};
    pub use crate::orchestrator::{decide, phase, Decision, Phase};
    pub use crate::persistence::{InMemoryInstanceStore, InstanceStore, StoreError};
    pub use crate::reliability::RetryPolicy;
    pub use crate::workflow::{
        ApprovalSource, ApprovalStatus, ExecutionState, Outcome, Signal, StepName, StepResult,
        WorkflowInputs,
    };
}

// Re-export key types at crate root
pub use activity::{
    ActivityContext, ActivityError, ActivityInvoker, ServiceResult, StepHandler, StepOptions,
};
pub use engine::{Engine, EngineConfig, EngineError, WorkflowHandle};
pub use inbox::{InboxError, SignalInbox};
pub use orchestrator::{Decision, Phase};
pub use persistence::{InMemoryInstanceStore, InstanceStore, StoreError};
pub use reliability::RetryPolicy;
pub use workflow::{
    ApprovalSource, ApprovalStatus, ExecutionState, Outcome, Signal, StepName, StepResult,
    WorkflowInputs,
};
