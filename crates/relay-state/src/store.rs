use crate::models::{RunPatch, RunRecord, StepPatch, StepRecord};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Error type for state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing store failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// CRUD over run and step records.
///
/// Updates against an unknown id are a no-op and return `None`; reads of an
/// unknown id return `None`. A completed `update_run`/`update_step` must be
/// visible to all subsequent calls on the same instance.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert a run record.
    async fn insert_run(&self, record: RunRecord) -> Result<RunRecord>;

    /// Merge a patch into a run record, returning the updated row.
    async fn update_run(&self, id: Uuid, patch: RunPatch) -> Result<Option<RunRecord>>;

    /// Fetch a run record by id.
    async fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>>;

    /// Insert a step record.
    async fn insert_step(&self, record: StepRecord) -> Result<StepRecord>;

    /// Merge a patch into a step record, returning the updated row.
    async fn update_step(&self, id: Uuid, patch: StepPatch) -> Result<Option<StepRecord>>;

    /// Fetch all step records for a run, in insertion order.
    async fn get_steps_by_run_id(&self, run_id: Uuid) -> Result<Vec<StepRecord>>;
}

/// Type alias for Arc-wrapped StateStore.
pub type StateStoreRef = Arc<dyn StateStore>;
