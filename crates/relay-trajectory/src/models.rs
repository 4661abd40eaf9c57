use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document format version written into every trajectory file.
pub const TRAJECTORY_VERSION: u32 = 1;

/// Lifecycle status of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryStatus {
    /// The run is in flight; the file lives under `active/`.
    Active,

    /// The run finished; the file lives under `completed/`.
    Completed,

    /// The run failed or was cancelled; the file lives under `completed/`.
    Abandoned,
}

/// Kind of a trajectory event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Narrative progress marker.
    Note,

    /// A concrete result, typically a completed step.
    Finding,

    /// A synthesis over several outcomes, carries a confidence.
    Reflection,

    /// A recorded decision (e.g. retries exhausted).
    Decision,

    /// A failure.
    Error,
}

/// One timestamped entry inside a chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    /// When the event happened.
    pub ts: DateTime<Utc>,

    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Human-readable content.
    pub content: String,

    /// Confidence or importance in [0, 1], where meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<f64>,

    /// Unprocessed payload backing the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl TrajectoryEvent {
    /// Create an event with the current timestamp.
    pub fn now(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            kind,
            content: content.into(),
            significance: None,
            raw: None,
        }
    }

    /// Attach a significance value.
    pub fn with_significance(mut self, significance: f64) -> Self {
        self.significance = Some(significance);
        self
    }

    /// Attach a raw payload.
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// A contiguous phase of the run: planning, a parallel track, a
/// convergence, or the retrospective.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Chapter identifier.
    pub id: Uuid,

    /// Chapter title, e.g. `Planning` or `Track: a, b, c`.
    pub title: String,

    /// Agent the chapter is attributed to, or `orchestrator`.
    pub agent_name: String,

    /// When the chapter opened.
    pub started_at: DateTime<Utc>,

    /// When the chapter closed. `None` while current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Events appended while the chapter was current.
    pub events: Vec<TrajectoryEvent>,
}

impl Chapter {
    /// Open a new chapter.
    pub fn open(title: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            agent_name: agent_name.into(),
            started_at: Utc::now(),
            ended_at: None,
            events: Vec::new(),
        }
    }
}

/// What the run is working on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Short task title, usually the workflow name.
    pub title: String,

    /// Where the task came from.
    pub source: String,
}

/// Closing summary of a finished trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retrospective {
    /// One-paragraph summary of what happened.
    pub summary: String,

    /// Overall confidence in [0, 1].
    pub confidence: f64,

    /// Extra structured metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Append-only structured trace of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    /// Trajectory id; matches the run id.
    pub id: Uuid,

    /// Document format version.
    pub version: u32,

    /// The task being traced.
    pub task: TaskInfo,

    /// Lifecycle status.
    pub status: TrajectoryStatus,

    /// When tracing started.
    pub started_at: DateTime<Utc>,

    /// When tracing ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Agents that participated.
    pub agents: Vec<String>,

    /// Phases of the run, in order.
    pub chapters: Vec<Chapter>,

    /// Closing summary, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrospective: Option<Retrospective>,
}

impl Trajectory {
    /// Create an active trajectory for a run.
    pub fn new(id: Uuid, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id,
            version: TRAJECTORY_VERSION,
            task: TaskInfo {
                title: title.into(),
                source: source.into(),
            },
            status: TrajectoryStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
            agents: Vec::new(),
            chapters: Vec::new(),
            retrospective: None,
        }
    }
}

/// Per-step outcome fed into confidence scoring.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Step name.
    pub name: String,

    /// Whether the step ended `completed`.
    pub completed: bool,

    /// Retry attempts the step consumed.
    pub retries: u32,

    /// Whether a verification predicate passed for the step.
    pub verified: bool,
}

impl StepOutcome {
    /// Outcome for a step that completed cleanly on the first attempt.
    pub fn clean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            completed: true,
            retries: 0,
            verified: false,
        }
    }
}

/// Confidence over a set of outcomes.
///
/// `min(1, 0.5·C/N + 0.25·F/N + 0.25·V/N)` where C counts completed steps,
/// F completions on the first attempt, and V verified passes. An empty set
/// scores 0.7.
pub fn confidence(outcomes: &[StepOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 0.7;
    }
    let n = outcomes.len() as f64;
    let c = outcomes.iter().filter(|o| o.completed).count() as f64;
    let f = outcomes
        .iter()
        .filter(|o| o.completed && o.retries == 0)
        .count() as f64;
    let v = outcomes.iter().filter(|o| o.verified).count() as f64;

    (0.5 * c / n + 0.25 * f / n + 0.25 * v / n).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_empty_set() {
        assert_eq!(confidence(&[]), 0.7);
    }

    #[test]
    fn test_confidence_all_clean_unverified() {
        let outcomes = vec![StepOutcome::clean("a"), StepOutcome::clean("b")];
        // 0.5 + 0.25 with no verification credit.
        assert!((confidence(&outcomes) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_never_exceeds_one() {
        let outcomes = vec![StepOutcome {
            name: "a".to_string(),
            completed: true,
            retries: 0,
            verified: true,
        }];
        assert_eq!(confidence(&outcomes), 1.0);
    }

    #[test]
    fn test_confidence_monotonic_under_added_failure() {
        let mut outcomes = vec![StepOutcome::clean("a"), StepOutcome::clean("b")];
        let before = confidence(&outcomes);

        outcomes.push(StepOutcome {
            name: "c".to_string(),
            completed: false,
            retries: 3,
            verified: false,
        });

        assert!(confidence(&outcomes) <= before);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TrajectoryEvent::now(EventKind::Finding, "step done").with_significance(0.9);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "finding");
        assert_eq!(json["significance"], 0.9);
        assert!(json.get("raw").is_none());
    }

    #[test]
    fn test_trajectory_round_trip() {
        let mut traj = Trajectory::new(Uuid::new_v4(), "deploy", "workflow");
        let mut chapter = Chapter::open("Planning", "orchestrator");
        chapter
            .events
            .push(TrajectoryEvent::now(EventKind::Note, "3 steps planned"));
        traj.chapters.push(chapter);

        let json = serde_json::to_string(&traj).unwrap();
        let back: Trajectory = serde_json::from_str(&json).unwrap();

        assert_eq!(back.chapters.len(), 1);
        assert_eq!(back.chapters[0].events[0].kind, EventKind::Note);
        assert_eq!(back.status, TrajectoryStatus::Active);
    }
}
