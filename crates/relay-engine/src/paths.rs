// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Project data directory layout.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// All engine paths under the project data directory.
#[derive(Debug, Clone)]
pub struct DataDirs {
    root: PathBuf,
}

impl DataDirs {
    /// Root the layout at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Worker registry file.
    pub fn workers_file(&self) -> PathBuf {
        self.root.join("team").join("workers.json")
    }

    /// Directory of raw agent logs.
    pub fn worker_logs_dir(&self) -> PathBuf {
        self.root.join("team").join("worker-logs")
    }

    /// Raw log file for one agent.
    pub fn worker_log_file(&self, agent: &str) -> PathBuf {
        self.worker_logs_dir().join(format!("{}.log", agent))
    }

    /// Directory of step outputs for a run.
    pub fn step_outputs_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join("step-outputs").join(run_id.to_string())
    }

    /// ANSI-stripped output file for one step.
    pub fn step_output_file(&self, run_id: Uuid, step: &str) -> PathBuf {
        self.step_outputs_dir(run_id).join(format!("{}.md", step))
    }

    /// Trajectory directory (contains `active/` and `completed/`).
    pub fn trajectories_dir(&self) -> PathBuf {
        self.root.join("trajectories")
    }

    /// Project-local credential cache.
    pub fn credentials_file(&self) -> PathBuf {
        self.root.join(relay_credentials::CACHE_FILE_NAME)
    }
}
