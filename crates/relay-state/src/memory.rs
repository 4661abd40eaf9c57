use crate::models::{RunPatch, RunRecord, StepPatch, StepRecord};
use crate::store::{Result, StateStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Default in-memory state store.
///
/// Step insertion order is preserved per run so `get_steps_by_run_id`
/// returns steps in workflow-authored order.
#[derive(Default)]
pub struct InMemoryStateStore {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
    steps: RwLock<HashMap<Uuid, StepRecord>>,
    step_order: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn insert_run(&self, record: RunRecord) -> Result<RunRecord> {
        self.runs.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_run(&self, id: Uuid, patch: RunPatch) -> Result<Option<RunRecord>> {
        let mut runs = self.runs.write();
        match runs.get_mut(&id) {
            Some(record) => {
                patch.apply(record);
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().get(&id).cloned())
    }

    async fn insert_step(&self, record: StepRecord) -> Result<StepRecord> {
        self.steps.write().insert(record.id, record.clone());
        self.step_order
            .write()
            .entry(record.run_id)
            .or_default()
            .push(record.id);
        Ok(record)
    }

    async fn update_step(&self, id: Uuid, patch: StepPatch) -> Result<Option<StepRecord>> {
        let mut steps = self.steps.write();
        match steps.get_mut(&id) {
            Some(record) => {
                patch.apply(record);
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn get_steps_by_run_id(&self, run_id: Uuid) -> Result<Vec<StepRecord>> {
        let order = self.step_order.read();
        let steps = self.steps.read();
        let ids = match order.get(&run_id) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids.iter().filter_map(|id| steps.get(id).cloned()).collect())
    }
}
