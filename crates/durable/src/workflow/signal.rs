//! External approval signals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ApprovalStatus;

/// Which approver a callback originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSource {
    Company,
    Custodian,
}

impl ApprovalSource {
    /// Stable string identifier for this source
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Custodian => "custodian",
        }
    }
}

impl std::fmt::Display for ApprovalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An approval callback delivered to a specific waiting instance
///
/// Signals are immutable once recorded. Delivering a second signal for
/// the same source before the first is consumed overwrites the pending
/// value rather than queuing (last write wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Which approver sent the callback
    pub source: ApprovalSource,

    /// The approval decision carried by the callback
    pub status: ApprovalStatus,

    /// When the signal was received
    pub received_at: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal
    pub fn new(source: ApprovalSource, status: ApprovalStatus) -> Self {
        Self {
            source,
            status,
            received_at: Utc::now(),
        }
    }

    /// Create an approval signal
    pub fn approved(source: ApprovalSource) -> Self {
        Self::new(source, ApprovalStatus::Approved)
    }

    /// Create a rejection signal
    pub fn rejected(source: ApprovalSource) -> Self {
        Self::new(source, ApprovalStatus::Rejected)
    }
}
