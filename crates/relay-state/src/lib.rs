//! State persistence for the Relay workflow orchestrator.
//!
//! Run and step records live behind the [`StateStore`] trait so backends can
//! be swapped; [`InMemoryStateStore`] is the default. Updates merge partial
//! patches with last-writer-wins semantics.

pub mod memory;
pub mod models;
pub mod store;

pub use memory::InMemoryStateStore;
pub use models::{RunPatch, RunRecord, RunStatus, StepPatch, StepRecord, StepStatus};
pub use store::{Result, StateStore, StateStoreRef, StoreError};
