use crate::models::{
    confidence, Chapter, EventKind, Retrospective, StepOutcome, Trajectory, TrajectoryEvent,
    TrajectoryStatus,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Agent name chapters are attributed to when no single agent owns them.
const ORCHESTRATOR: &str = "orchestrator";

/// Records a run's trajectory to disk.
///
/// Files live under `<dir>/active/<id>.json` while the run is in flight and
/// move to `<dir>/completed/<id>.json` on terminal status. Every flush is
/// best-effort: I/O failures are logged and swallowed, never surfaced to
/// the engine.
pub struct TrajectoryRecorder {
    dir: PathBuf,
    enabled: bool,
    inner: Mutex<Option<Trajectory>>,
}

impl TrajectoryRecorder {
    /// Create a recorder rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
            inner: Mutex::new(None),
        }
    }

    /// Create a recorder that drops everything.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
            inner: Mutex::new(None),
        }
    }

    /// Check whether recording is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Begin tracing a run. Opens the *Planning* chapter.
    pub fn start(&self, id: Uuid, workflow_name: &str, step_count: usize, dag_info: Option<&str>) {
        if !self.enabled {
            return;
        }

        let mut traj = Trajectory::new(id, workflow_name, "workflow");
        let mut planning = Chapter::open("Planning", ORCHESTRATOR);
        planning.events.push(TrajectoryEvent::now(
            EventKind::Note,
            format!("Planned {} steps for workflow \"{}\"", step_count, workflow_name),
        ));
        if let Some(info) = dag_info {
            planning
                .events
                .push(TrajectoryEvent::now(EventKind::Note, info.to_string()));
        }
        traj.chapters.push(planning);

        *self.inner.lock() = Some(traj);
        self.flush();
    }

    /// Record the agents participating in the run.
    pub fn set_agents(&self, agents: &[String]) {
        self.with_trajectory(|traj| {
            traj.agents = agents.to_vec();
        });
    }

    /// Close the current chapter and open a parallel-track chapter for a
    /// batch of concurrently scheduled steps.
    pub fn begin_track(&self, names: &[String]) {
        let title = format!("Track: {}", names.join(", "));
        self.begin_chapter(title, ORCHESTRATOR.to_string());
    }

    /// Close the current chapter and open a convergence chapter.
    pub fn begin_convergence(&self, label: &str) {
        self.begin_chapter(format!("Convergence: {}", label), ORCHESTRATOR.to_string());
    }

    /// Append a `note` event for a step entering execution.
    pub fn step_started(&self, step_name: &str, agent_name: &str) {
        self.append(
            TrajectoryEvent::now(
                EventKind::Note,
                format!("Step \"{}\" started on agent \"{}\"", step_name, agent_name),
            ),
        );
    }

    /// Append a `finding` event for a completed step.
    pub fn step_completed(&self, step_name: &str, output_preview: &str) {
        self.append(
            TrajectoryEvent::now(EventKind::Finding, format!("Step \"{}\" completed", step_name))
                .with_raw(truncate(output_preview, 400)),
        );
    }

    /// Append an `error` event for a failed step.
    pub fn step_failed(&self, step_name: &str, error: &str) {
        self.append(TrajectoryEvent::now(
            EventKind::Error,
            format!("Step \"{}\" failed: {}", step_name, error),
        ));
    }

    /// Append a `note` event for a skipped step.
    pub fn step_skipped(&self, step_name: &str, reason: &str) {
        self.append(TrajectoryEvent::now(
            EventKind::Note,
            format!("Step \"{}\" skipped: {}", step_name, reason),
        ));
    }

    /// Append a `note` event for a retry attempt.
    pub fn step_retrying(&self, step_name: &str, attempt: u32, error: &str) {
        self.append(TrajectoryEvent::now(
            EventKind::Note,
            format!(
                "Step \"{}\" retrying (attempt {}): {}",
                step_name, attempt, error
            ),
        ));
    }

    /// Append a free-form `note` event.
    pub fn note(&self, content: &str) {
        self.append(TrajectoryEvent::now(EventKind::Note, content.to_string()));
    }

    /// Append a `decision` event.
    pub fn decide(&self, content: &str) {
        self.append(TrajectoryEvent::now(EventKind::Decision, content.to_string()));
    }

    /// Append a `reflection` event with a confidence.
    pub fn reflect(&self, content: &str, confidence: f64) {
        self.append(
            TrajectoryEvent::now(EventKind::Reflection, content.to_string())
                .with_significance(confidence),
        );
    }

    /// Synthesize a reflection over a converged parallel batch.
    ///
    /// Names every step in the batch with its outcome and lists the steps
    /// the batch unblocked, then emits a `reflection` scored by
    /// [`confidence`].
    pub fn synthesize_and_reflect(&self, outcomes: &[StepOutcome], unblocks: &[String]) {
        if !self.enabled {
            return;
        }

        let parts: Vec<String> = outcomes
            .iter()
            .map(|o| {
                let mut part = format!(
                    "{} {}",
                    o.name,
                    if o.completed { "completed" } else { "failed" }
                );
                if o.retries > 0 {
                    part.push_str(&format!(" after {} retries", o.retries));
                }
                part
            })
            .collect();

        let mut synthesis = format!("Parallel batch converged: {}", parts.join(", "));
        if !unblocks.is_empty() {
            synthesis.push_str(&format!("; unblocked: {}", unblocks.join(", ")));
        }

        self.reflect(&synthesis, confidence(outcomes));
    }

    /// Finish the trajectory: open a *Retrospective* chapter, emit the final
    /// reflection, set retrospective fields, and move the file to
    /// `completed/`.
    pub fn complete(&self, summary: &str, confidence: f64, meta: Option<serde_json::Value>) {
        self.finish(TrajectoryStatus::Completed, summary, confidence, meta);
    }

    /// Abandon the trajectory with a reason and move the file to
    /// `completed/`.
    pub fn abandon(&self, reason: &str) {
        if !self.enabled {
            return;
        }
        self.append(TrajectoryEvent::now(EventKind::Error, reason.to_string()));
        self.finish(TrajectoryStatus::Abandoned, reason, 0.0, None);
    }

    fn finish(
        &self,
        status: TrajectoryStatus,
        summary: &str,
        confidence: f64,
        meta: Option<serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }

        let id = {
            let mut guard = self.inner.lock();
            let traj = match guard.as_mut() {
                Some(traj) => traj,
                None => return,
            };

            let now = Utc::now();
            if let Some(current) = traj.chapters.last_mut() {
                if current.ended_at.is_none() {
                    current.ended_at = Some(now);
                }
            }

            let mut retro = Chapter::open("Retrospective", ORCHESTRATOR);
            retro.events.push(
                TrajectoryEvent::now(EventKind::Reflection, summary.to_string())
                    .with_significance(confidence),
            );
            retro.ended_at = Some(now);
            traj.chapters.push(retro);

            traj.retrospective = Some(Retrospective {
                summary: summary.to_string(),
                confidence,
                meta,
            });
            traj.status = status;
            traj.completed_at = Some(now);
            traj.id
        };

        self.flush();
        self.move_to_completed(id);
    }

    /// Path of the active file for a trajectory id.
    pub fn active_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("active").join(format!("{}.json", id))
    }

    /// Path of the completed file for a trajectory id.
    pub fn completed_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("completed").join(format!("{}.json", id))
    }

    fn begin_chapter(&self, title: String, agent_name: String) {
        self.with_trajectory(|traj| {
            let now = Utc::now();
            if let Some(current) = traj.chapters.last_mut() {
                if current.ended_at.is_none() {
                    current.ended_at = Some(now);
                }
            }
            traj.chapters.push(Chapter::open(title, agent_name));
        });
    }

    fn append(&self, event: TrajectoryEvent) {
        self.with_trajectory(|traj| {
            if let Some(current) = traj.chapters.last_mut() {
                current.events.push(event);
            }
        });
    }

    fn with_trajectory(&self, f: impl FnOnce(&mut Trajectory)) {
        if !self.enabled {
            return;
        }
        {
            let mut guard = self.inner.lock();
            match guard.as_mut() {
                Some(traj) => f(traj),
                None => return,
            }
        }
        self.flush();
    }

    fn flush(&self) {
        if !self.enabled {
            return;
        }
        let guard = self.inner.lock();
        let traj = match guard.as_ref() {
            Some(traj) => traj,
            None => return,
        };

        let path = self.active_path(traj.id);
        if let Err(e) = write_json(&path, traj) {
            tracing::warn!(path = %path.display(), error = %e, "Trajectory flush failed");
        }
    }

    fn move_to_completed(&self, id: Uuid) {
        let from = self.active_path(id);
        let to = self.completed_path(id);

        if let Some(parent) = to.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(error = %e, "Failed to create completed trajectory dir");
                return;
            }
        }
        if let Err(e) = fs::rename(&from, &to) {
            tracing::warn!(
                from = %from.display(),
                to = %to.display(),
                error = %e,
                "Failed to move trajectory to completed"
            );
        }
    }
}

fn write_json(path: &Path, traj: &Trajectory) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(traj)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(path, json)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
