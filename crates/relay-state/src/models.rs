use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a run.
///
/// Terminal states are immutable; only `resume` may revive a `Failed` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run record exists but execution has not begun.
    Pending,

    /// The scheduling loop is active.
    Running,

    /// Every step reached a terminal-ok state.
    Completed,

    /// A step failure terminated the run.
    Failed,

    /// The run was aborted by the caller.
    Cancelled,
}

impl RunStatus {
    /// Get the string representation of the status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting for dependencies.
    Pending,

    /// An agent is executing the step.
    Running,

    /// The step finished and produced output.
    Completed,

    /// The step exhausted its retries.
    Failed,

    /// An upstream failure made the step unreachable. Only reachable
    /// from `Pending`.
    Skipped,
}

impl StepStatus {
    /// Get the string representation of the status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Check whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Check whether a dependency in this state unblocks its dependents.
    pub fn is_terminal_ok(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Persistent record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Unique run identifier.
    pub id: Uuid,

    /// Workspace the run executes under.
    pub workspace_id: String,

    /// Name of the workflow being executed.
    pub workflow_name: String,

    /// Swarm pattern chosen for the run.
    pub pattern: String,

    /// Current lifecycle status.
    pub status: RunStatus,

    /// Snapshot of the configuration the run was started with.
    pub config: serde_json::Value,

    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message for failed runs.
    pub error: Option<String>,

    /// Opaque engine state snapshot, used by resume.
    pub state_snapshot: Option<serde_json::Value>,

    /// Record creation time.
    pub created_at: DateTime<Utc>,

    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Create a new pending run record.
    pub fn new(
        workspace_id: impl Into<String>,
        workflow_name: impl Into<String>,
        pattern: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            workflow_name: workflow_name.into(),
            pattern: pattern.into(),
            status: RunStatus::Pending,
            config,
            started_at: None,
            completed_at: None,
            error: None,
            state_snapshot: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistent record of one workflow step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Unique step record identifier.
    pub id: Uuid,

    /// Run this step belongs to.
    pub run_id: Uuid,

    /// Step name, unique within the workflow.
    pub step_name: String,

    /// Name of the agent assigned to the step.
    pub agent_name: String,

    /// Current lifecycle status.
    pub status: StepStatus,

    /// Task text, with load-time templates already resolved.
    pub task: String,

    /// Names of the steps this step depends on.
    pub depends_on: Vec<String>,

    /// Captured output. Defined iff status is `Completed`.
    pub output: Option<String>,

    /// Error message for failed steps.
    pub error: Option<String>,

    /// When the step entered `Running`.
    pub started_at: Option<DateTime<Utc>>,

    /// When the step reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of retry attempts performed. Monotonically increasing.
    pub retry_count: u32,

    /// Record creation time.
    pub created_at: DateTime<Utc>,

    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    /// Create a new pending step record.
    pub fn new(
        run_id: Uuid,
        step_name: impl Into<String>,
        agent_name: impl Into<String>,
        task: impl Into<String>,
        depends_on: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_name: step_name.into(),
            agent_name: agent_name.into(),
            status: StepStatus::Pending,
            task: task.into(),
            depends_on,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to a [`RunRecord`]. `None` fields are left
/// untouched; set fields overwrite (last-writer-wins).
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<Option<String>>,
    pub state_snapshot: Option<Option<serde_json::Value>>,
}

impl RunPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status.
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the start timestamp.
    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Set the completion timestamp.
    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Set (or clear) the error message.
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    /// Set (or clear) the engine state snapshot.
    pub fn with_state_snapshot(mut self, snapshot: Option<serde_json::Value>) -> Self {
        self.state_snapshot = Some(snapshot);
        self
    }

    /// Apply the patch to a record, bumping `updated_at`.
    pub fn apply(self, record: &mut RunRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(at) = self.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            record.completed_at = Some(at);
        }
        if let Some(error) = self.error {
            record.error = error;
        }
        if let Some(snapshot) = self.state_snapshot {
            record.state_snapshot = snapshot;
        }
        record.updated_at = Utc::now();
    }
}

/// Partial update applied to a [`StepRecord`].
#[derive(Debug, Clone, Default)]
pub struct StepPatch {
    pub status: Option<StepStatus>,
    pub task: Option<String>,
    pub output: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: Option<u32>,
}

impl StepPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status.
    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the resolved task text.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Set (or clear) the captured output.
    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = Some(output);
        self
    }

    /// Set (or clear) the error message.
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    /// Set the start timestamp.
    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Set the completion timestamp.
    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Set the retry count.
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Apply the patch to a record, bumping `updated_at`.
    pub fn apply(self, record: &mut StepRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(task) = self.task {
            record.task = task;
        }
        if let Some(output) = self.output {
            record.output = output;
        }
        if let Some(error) = self.error {
            record.error = error;
        }
        if let Some(at) = self.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            record.completed_at = Some(at);
        }
        if let Some(count) = self.retry_count {
            record.retry_count = count;
        }
        record.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_record_creation() {
        let record = RunRecord::new("ws-1", "deploy", "pipeline", serde_json::json!({}));

        assert_eq!(record.status, RunStatus::Pending);
        assert_eq!(record.workflow_name, "deploy");
        assert_eq!(record.pattern, "pipeline");
        assert!(record.started_at.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_step_record_creation() {
        let run_id = Uuid::new_v4();
        let record = StepRecord::new(run_id, "build", "builder", "compile it", vec![]);

        assert_eq!(record.run_id, run_id);
        assert_eq!(record.status, StepStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.output.is_none());
    }

    #[test]
    fn test_run_patch_merge() {
        let mut record = RunRecord::new("ws-1", "deploy", "dag", serde_json::json!({}));
        let created = record.created_at;

        RunPatch::new()
            .with_status(RunStatus::Running)
            .with_started_at(Utc::now())
            .apply(&mut record);

        assert_eq!(record.status, RunStatus::Running);
        assert!(record.started_at.is_some());
        assert!(record.updated_at >= created);
        // Untouched fields survive.
        assert!(record.error.is_none());
    }

    #[test]
    fn test_step_patch_clears_error() {
        let mut record = StepRecord::new(Uuid::new_v4(), "a", "agent", "t", vec![]);

        StepPatch::new()
            .with_error(Some("boom".to_string()))
            .apply(&mut record);
        assert_eq!(record.error.as_deref(), Some("boom"));

        StepPatch::new().with_error(None).apply(&mut record);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_status_terminality() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());

        assert!(StepStatus::Skipped.is_terminal_ok());
        assert!(StepStatus::Completed.is_terminal_ok());
        assert!(!StepStatus::Failed.is_terminal_ok());
        assert!(StepStatus::Failed.is_terminal());
    }
}
