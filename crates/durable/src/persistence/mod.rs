//! Execution state persistence
//!
//! The engine persists state before acting on it: every transition is
//! written through the [`InstanceStore`] before the next step runs, so
//! a crash between any two operations can be recovered by reloading and
//! re-deciding.

mod memory;
mod store;

pub use memory::InMemoryInstanceStore;
pub use store::{InstanceStore, StoreError};
