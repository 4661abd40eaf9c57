// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Run and step lifecycle primitives.
//!
//! The coordinator owns run-level transitions; the engine owns step
//! mutation during execution and calls through here so every transition
//! sets timestamps, persists, and emits its typed event exactly once.

use crate::error::{RelayError, Result};
use crate::events::{EngineEvent, EventBus};
use chrono::Utc;
use relay_state::{
    RunPatch, RunRecord, RunStatus, StateStoreRef, StepPatch, StepRecord, StepStatus,
};
use uuid::Uuid;

/// Thin facade over the state store for lifecycle transitions.
pub struct Coordinator {
    store: StateStoreRef,
    events: EventBus,
}

impl Coordinator {
    /// Create a coordinator.
    pub fn new(store: StateStoreRef, events: EventBus) -> Self {
        Self { store, events }
    }

    /// The event bus transitions are announced on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The underlying store.
    pub fn store(&self) -> &StateStoreRef {
        &self.store
    }

    /// Insert a pending run record.
    pub async fn create_run(&self, record: RunRecord) -> Result<RunRecord> {
        let record = self.store.insert_run(record).await?;
        self.events.emit(EngineEvent::RunCreated { run_id: record.id });
        Ok(record)
    }

    /// Transition a run `pending → running`.
    pub async fn start_run(&self, id: Uuid) -> Result<RunRecord> {
        let run = self.require_run(id).await?;
        if run.status != RunStatus::Pending {
            return Err(RelayError::State(format!(
                "cannot start run {} from status {}",
                id,
                run.status.as_str()
            )));
        }

        let updated = self
            .store
            .update_run(
                id,
                RunPatch::new()
                    .with_status(RunStatus::Running)
                    .with_started_at(Utc::now()),
            )
            .await?
            .ok_or_else(|| RelayError::State(format!("run {} vanished", id)))?;
        self.events.emit(EngineEvent::RunStarted { run_id: id });
        Ok(updated)
    }

    /// Transition a run `running → completed`.
    pub async fn complete_run(&self, id: Uuid) -> Result<RunRecord> {
        let updated = self
            .transition_run(id, RunStatus::Running, RunStatus::Completed, None)
            .await?;
        self.events.emit(EngineEvent::RunCompleted { run_id: id });
        Ok(updated)
    }

    /// Transition a run `running → failed`.
    pub async fn fail_run(&self, id: Uuid, error: &str) -> Result<RunRecord> {
        let updated = self
            .transition_run(id, RunStatus::Running, RunStatus::Failed, Some(error))
            .await?;
        self.events.emit(EngineEvent::RunFailed {
            run_id: id,
            error: error.to_string(),
        });
        Ok(updated)
    }

    /// Cancel a run. Cancelling a cancelled run is a no-op returning the
    /// same row; other terminal states reject.
    pub async fn cancel_run(&self, id: Uuid) -> Result<RunRecord> {
        let run = self.require_run(id).await?;
        match run.status {
            RunStatus::Cancelled => return Ok(run),
            RunStatus::Completed | RunStatus::Failed => {
                return Err(RelayError::State(format!(
                    "cannot cancel run {} from status {}",
                    id,
                    run.status.as_str()
                )))
            }
            RunStatus::Pending | RunStatus::Running => {}
        }

        let updated = self
            .store
            .update_run(
                id,
                RunPatch::new()
                    .with_status(RunStatus::Cancelled)
                    .with_completed_at(Utc::now()),
            )
            .await?
            .ok_or_else(|| RelayError::State(format!("run {} vanished", id)))?;
        self.events.emit(EngineEvent::RunCancelled { run_id: id });
        Ok(updated)
    }

    /// Resume a `running` or `failed` run: failed steps reset to pending
    /// and the run re-enters `running`.
    pub async fn resume_run(&self, id: Uuid) -> Result<RunRecord> {
        let run = self.require_run(id).await?;
        if !matches!(run.status, RunStatus::Running | RunStatus::Failed) {
            return Err(RelayError::State(format!(
                "cannot resume run {} from status {}",
                id,
                run.status.as_str()
            )));
        }

        for step in self.store.get_steps_by_run_id(id).await? {
            if step.status == StepStatus::Failed {
                self.store
                    .update_step(
                        step.id,
                        StepPatch::new()
                            .with_status(StepStatus::Pending)
                            .with_error(None),
                    )
                    .await?;
            }
        }

        let updated = self
            .store
            .update_run(
                id,
                RunPatch::new()
                    .with_status(RunStatus::Running)
                    .with_error(None),
            )
            .await?
            .ok_or_else(|| RelayError::State(format!("run {} vanished", id)))?;
        Ok(updated)
    }

    /// Insert a pending step record.
    pub async fn create_step(&self, record: StepRecord) -> Result<StepRecord> {
        Ok(self.store.insert_step(record).await?)
    }

    /// Mark a step running. Re-entering `running` on a retry attempt is
    /// allowed.
    pub async fn start_step(&self, step: &StepRecord) -> Result<StepRecord> {
        let current = self.require_step(step).await?;
        if !matches!(current.status, StepStatus::Pending | StepStatus::Running) {
            return Err(RelayError::State(format!(
                "cannot start step \"{}\" from status {}",
                current.step_name,
                current.status.as_str()
            )));
        }

        let mut patch = StepPatch::new().with_status(StepStatus::Running);
        if current.started_at.is_none() {
            patch = patch.with_started_at(Utc::now());
        }
        let updated = self.update_step(step.id, patch).await?;
        self.events.emit(EngineEvent::StepStarted {
            run_id: updated.run_id,
            step: updated.step_name.clone(),
        });
        Ok(updated)
    }

    /// Mark a step completed with its output.
    pub async fn complete_step(&self, step: &StepRecord, output: &str) -> Result<StepRecord> {
        let current = self.require_step(step).await?;
        if current.status != StepStatus::Running {
            return Err(RelayError::State(format!(
                "cannot complete step \"{}\" from status {}",
                current.step_name,
                current.status.as_str()
            )));
        }

        let updated = self
            .update_step(
                step.id,
                StepPatch::new()
                    .with_status(StepStatus::Completed)
                    .with_output(Some(output.to_string()))
                    .with_completed_at(Utc::now()),
            )
            .await?;
        self.events.emit(EngineEvent::StepCompleted {
            run_id: updated.run_id,
            step: updated.step_name.clone(),
        });
        Ok(updated)
    }

    /// Mark a step failed.
    pub async fn fail_step(&self, step: &StepRecord, error: &str) -> Result<StepRecord> {
        let current = self.require_step(step).await?;
        if current.status.is_terminal() {
            return Err(RelayError::State(format!(
                "cannot fail step \"{}\" from status {}",
                current.step_name,
                current.status.as_str()
            )));
        }

        let updated = self
            .update_step(
                step.id,
                StepPatch::new()
                    .with_status(StepStatus::Failed)
                    .with_error(Some(error.to_string()))
                    .with_completed_at(Utc::now()),
            )
            .await?;
        self.events.emit(EngineEvent::StepFailed {
            run_id: updated.run_id,
            step: updated.step_name.clone(),
            error: error.to_string(),
        });
        Ok(updated)
    }

    /// Mark a pending step skipped.
    pub async fn skip_step(&self, step: &StepRecord, reason: &str) -> Result<StepRecord> {
        let current = self.require_step(step).await?;
        if current.status != StepStatus::Pending {
            return Err(RelayError::State(format!(
                "cannot skip step \"{}\" from status {}",
                current.step_name,
                current.status.as_str()
            )));
        }

        let updated = self
            .update_step(
                step.id,
                StepPatch::new()
                    .with_status(StepStatus::Skipped)
                    .with_completed_at(Utc::now()),
            )
            .await?;
        self.events.emit(EngineEvent::StepSkipped {
            run_id: updated.run_id,
            step: updated.step_name.clone(),
            reason: reason.to_string(),
        });
        Ok(updated)
    }

    /// Record a retry attempt.
    pub async fn retry_step(&self, step: &StepRecord, attempt: u32, error: &str) -> Result<StepRecord> {
        let updated = self
            .update_step(step.id, StepPatch::new().with_retry_count(attempt))
            .await?;
        self.events.emit(EngineEvent::StepRetrying {
            run_id: updated.run_id,
            step: updated.step_name.clone(),
            attempt,
        });
        tracing::warn!(step = %updated.step_name, attempt, error, "Retrying step");
        Ok(updated)
    }

    async fn transition_run(
        &self,
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
        error: Option<&str>,
    ) -> Result<RunRecord> {
        let run = self.require_run(id).await?;
        if run.status != from {
            return Err(RelayError::State(format!(
                "cannot move run {} from {} to {}",
                id,
                run.status.as_str(),
                to.as_str()
            )));
        }

        let mut patch = RunPatch::new()
            .with_status(to)
            .with_completed_at(Utc::now());
        if let Some(error) = error {
            patch = patch.with_error(Some(error.to_string()));
        }
        self.store
            .update_run(id, patch)
            .await?
            .ok_or_else(|| RelayError::State(format!("run {} vanished", id)))
    }

    async fn require_run(&self, id: Uuid) -> Result<RunRecord> {
        self.store
            .get_run(id)
            .await?
            .ok_or_else(|| RelayError::State(format!("unknown run {}", id)))
    }

    async fn require_step(&self, step: &StepRecord) -> Result<StepRecord> {
        let steps = self.store.get_steps_by_run_id(step.run_id).await?;
        steps
            .into_iter()
            .find(|s| s.id == step.id)
            .ok_or_else(|| RelayError::State(format!("unknown step \"{}\"", step.step_name)))
    }

    async fn update_step(&self, id: Uuid, patch: StepPatch) -> Result<StepRecord> {
        self.store
            .update_step(id, patch)
            .await?
            .ok_or_else(|| RelayError::State(format!("step {} vanished", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::collect;
    use relay_state::InMemoryStateStore;
    use std::sync::Arc;

    fn coordinator() -> (Coordinator, Arc<parking_lot::Mutex<Vec<EngineEvent>>>) {
        let events = EventBus::new();
        let collected = collect(&events);
        let store: StateStoreRef = Arc::new(InMemoryStateStore::new());
        (Coordinator::new(store, events), collected)
    }

    fn run_record() -> RunRecord {
        RunRecord::new("ws", "wf", "dag", serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_run_happy_path_events() {
        let (coord, events) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        coord.start_run(run.id).await.unwrap();
        coord.complete_run(run.id).await.unwrap();

        let names: Vec<&str> = events.lock().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["run:created", "run:started", "run:completed"]);
    }

    #[tokio::test]
    async fn test_start_running_run_is_state_error() {
        let (coord, _) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        coord.start_run(run.id).await.unwrap();

        let err = coord.start_run(run.id).await.unwrap_err();
        assert!(matches!(err, RelayError::State(_)));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (coord, events) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        coord.start_run(run.id).await.unwrap();

        let first = coord.cancel_run(run.id).await.unwrap();
        assert_eq!(first.status, RunStatus::Cancelled);

        let second = coord.cancel_run(run.id).await.unwrap();
        assert_eq!(second.status, RunStatus::Cancelled);
        assert_eq!(second.id, first.id);

        // Only one run:cancelled event.
        let cancels = events
            .lock()
            .iter()
            .filter(|e| e.name() == "run:cancelled")
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn test_cancel_completed_run_rejected() {
        let (coord, _) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        coord.start_run(run.id).await.unwrap();
        coord.complete_run(run.id).await.unwrap();

        assert!(coord.cancel_run(run.id).await.is_err());
    }

    #[tokio::test]
    async fn test_step_lifecycle() {
        let (coord, events) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        let step = coord
            .create_step(StepRecord::new(run.id, "plan", "planner", "t", vec![]))
            .await
            .unwrap();

        let step = coord.start_step(&step).await.unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert!(step.started_at.is_some());

        let step = coord.complete_step(&step, "the plan").await.unwrap();
        assert_eq!(step.output.as_deref(), Some("the plan"));
        assert!(step.completed_at >= step.started_at);

        let names: Vec<&str> = events
            .lock()
            .iter()
            .filter(|e| e.step().is_some())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["step:started", "step:completed"]);
    }

    #[tokio::test]
    async fn test_complete_pending_step_is_state_error() {
        let (coord, _) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        let step = coord
            .create_step(StepRecord::new(run.id, "a", "x", "t", vec![]))
            .await
            .unwrap();

        assert!(coord.complete_step(&step, "out").await.is_err());
    }

    #[tokio::test]
    async fn test_skip_only_from_pending() {
        let (coord, _) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        let step = coord
            .create_step(StepRecord::new(run.id, "a", "x", "t", vec![]))
            .await
            .unwrap();

        let running = coord.start_step(&step).await.unwrap();
        assert!(coord.skip_step(&running, "upstream failed").await.is_err());
    }

    #[tokio::test]
    async fn test_resume_resets_failed_steps() {
        let (coord, _) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        coord.start_run(run.id).await.unwrap();

        let step = coord
            .create_step(StepRecord::new(run.id, "a", "x", "t", vec![]))
            .await
            .unwrap();
        let step = coord.start_step(&step).await.unwrap();
        coord.fail_step(&step, "boom").await.unwrap();
        coord.fail_run(run.id, "step a failed").await.unwrap();

        let resumed = coord.resume_run(run.id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Running);

        let steps = coord.store().get_steps_by_run_id(run.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert!(steps[0].error.is_none());
    }

    #[tokio::test]
    async fn test_resume_completed_run_rejected() {
        let (coord, _) = coordinator();
        let run = coord.create_run(run_record()).await.unwrap();
        coord.start_run(run.id).await.unwrap();
        coord.complete_run(run.id).await.unwrap();

        assert!(coord.resume_run(run.id).await.is_err());
    }
}
