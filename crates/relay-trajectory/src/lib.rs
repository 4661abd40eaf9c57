//! Structured run trajectories for the Relay workflow orchestrator.
//!
//! A trajectory is an append-only JSON document structuring a run into
//! chapters (planning, parallel tracks, convergences, retrospective), typed
//! events, and a closing retrospective with a confidence score. Recording is
//! strictly best-effort: a trajectory failure never fails a run.

pub mod models;
pub mod recorder;

pub use models::{
    confidence, Chapter, EventKind, Retrospective, StepOutcome, TaskInfo, Trajectory,
    TrajectoryEvent, TrajectoryStatus, TRAJECTORY_VERSION,
};
pub use recorder::TrajectoryRecorder;
