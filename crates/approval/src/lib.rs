//! # Register-Credit Approval Application
//!
//! The business layer of the approval workflow. It binds the durable
//! engine's step names to concrete collaborator services and exposes a
//! small facade for the surrounding application:
//!
//! - [`services`]: the four collaborator traits (approval dispatch,
//!   verification, persistence, notification) and their request types
//! - [`activities`]: the [`StepHandler`] mapping each workflow step to
//!   a collaborator call
//! - [`app`]: the [`App`] facade: start a request, feed in approval
//!   callbacks, observe progress, wait for the outcome
//!
//! ## Example
//!
//! ```ignore
//! use creditflow_approval::prelude::*;
//!
//! let activities = CreditActivities::new(approvals, verification, persistence, notifications);
//! let app = App::in_memory(activities);
//!
//! let instance_id = app.start(500, "alice").await?;
//! app.approve(&instance_id, ApprovalSource::Company).await?;
//! app.approve(&instance_id, ApprovalSource::Custodian).await?;
//!
//! let outcome = app.await_result(&instance_id).await?;
//! println!("{outcome}");
//! ```

pub mod activities;
pub mod app;
pub mod services;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activities::CreditActivities;
    pub use crate::app::{App, InstanceStatus};
    pub use crate::services::{
        ApprovalRequest, ApprovalService, NotificationRequest, NotificationService,
        PersistenceRequest, PersistenceService, VerificationRequest, VerificationService,
    };
    pub use creditflow_durable::prelude::*;
}

pub use activities::CreditActivities;
pub use app::{App, InstanceStatus};
pub use services::{
    ApprovalRequest, ApprovalService, NotificationRequest, NotificationService,
    PersistenceRequest, PersistenceService, VerificationRequest, VerificationService,
};

// Re-export the engine vocabulary the facade surfaces.
pub use creditflow_durable::{
    ActivityError, ApprovalSource, ApprovalStatus, EngineConfig, EngineError, Outcome,
    ServiceResult, StepHandler,
};
