// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! On-disk registry of spawned agents.
//!
//! Other tools read `workers.json` to find or kill running agents. The
//! in-memory map is the authoritative active set; every file write is
//! serialised through a single-writer lock so concurrent registrations
//! cannot interleave read-modify-write cycles.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_broker::AgentCli;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// Longest task preview persisted per worker.
const TASK_PREVIEW_LEN: usize = 120;

/// One spawned agent as persisted in `workers.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEntry {
    /// Agent name.
    pub name: String,

    /// CLI the agent runs.
    pub cli: AgentCli,

    /// Truncated task preview.
    pub task: String,

    /// When the agent was spawned.
    pub spawned_at: DateTime<Utc>,

    /// OS process id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Whether the agent runs interactively.
    pub interactive: bool,

    /// Path of the agent's raw log file.
    pub log_file: String,
}

impl WorkerEntry {
    /// Build an entry, truncating the task to a preview.
    pub fn new(
        name: impl Into<String>,
        cli: AgentCli,
        task: &str,
        pid: Option<u32>,
        interactive: bool,
        log_file: impl Into<String>,
    ) -> Self {
        let mut preview = task.to_string();
        if preview.len() > TASK_PREVIEW_LEN {
            let mut end = TASK_PREVIEW_LEN;
            while !preview.is_char_boundary(end) {
                end -= 1;
            }
            preview.truncate(end);
            preview.push('…');
        }
        Self {
            name: name.into(),
            cli,
            task: preview,
            spawned_at: Utc::now(),
            pid,
            interactive,
            log_file: log_file.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct WorkersFile {
    workers: Vec<WorkerEntry>,
}

/// Registry of active agents, mirrored to disk.
pub struct WorkerRegistry {
    path: PathBuf,
    workers: DashMap<String, WorkerEntry>,
    writer: Mutex<()>,
}

impl WorkerRegistry {
    /// Create a registry backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workers: DashMap::new(),
            writer: Mutex::new(()),
        }
    }

    /// Register a worker and flush.
    pub async fn register(&self, entry: WorkerEntry) -> std::io::Result<()> {
        debug!(worker = %entry.name, "Registering worker");
        self.workers.insert(entry.name.clone(), entry);
        self.flush().await
    }

    /// Remove a worker and flush. Unknown names are a no-op.
    pub async fn unregister(&self, name: &str) -> std::io::Result<()> {
        if self.workers.remove(name).is_some() {
            debug!(worker = %name, "Unregistered worker");
        }
        self.flush().await
    }

    /// Re-key a worker after a broker rename, preserving its entry.
    pub async fn rename(&self, old: &str, new: &str) -> std::io::Result<()> {
        if let Some((_, mut entry)) = self.workers.remove(old) {
            entry.name = new.to_string();
            self.workers.insert(new.to_string(), entry);
        }
        self.flush().await
    }

    /// Snapshot of the active set.
    pub fn active(&self) -> Vec<WorkerEntry> {
        let mut entries: Vec<WorkerEntry> =
            self.workers.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.spawned_at.cmp(&b.spawned_at));
        entries
    }

    async fn flush(&self) -> std::io::Result<()> {
        let _guard = self.writer.lock().await;
        let file = WorkersFile {
            workers: self.active(),
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str) -> WorkerEntry {
        WorkerEntry::new(name, AgentCli::Claude, "do the thing", Some(42), true, "/logs/a.log")
    }

    async fn read_file(path: &PathBuf) -> WorkersFile {
        let content = tokio::fs::read_to_string(path).await.unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_unregister_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("team").join("workers.json");
        let registry = WorkerRegistry::new(&path);

        registry.register(entry("plan-a1b2")).await.unwrap();
        let file = read_file(&path).await;
        assert_eq!(file.workers.len(), 1);
        assert_eq!(file.workers[0].name, "plan-a1b2");
        assert_eq!(file.workers[0].pid, Some(42));

        registry.unregister("plan-a1b2").await.unwrap();
        let file = read_file(&path).await;
        assert!(file.workers.is_empty());
    }

    #[tokio::test]
    async fn test_rename_preserves_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workers.json");
        let registry = WorkerRegistry::new(&path);

        registry.register(entry("old-name")).await.unwrap();
        registry.rename("old-name", "new-name").await.unwrap();

        let active = registry.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "new-name");
        assert_eq!(active[0].pid, Some(42));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_all_land() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workers.json");
        let registry = std::sync::Arc::new(WorkerRegistry::new(&path));

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(entry(&format!("w{}", i))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let file = read_file(&path).await;
        assert_eq!(file.workers.len(), 8);
    }

    #[test]
    fn test_task_preview_truncated() {
        let long = "x".repeat(500);
        let entry = WorkerEntry::new("w", AgentCli::Goose, &long, None, false, "log");
        assert!(entry.task.len() < 500);
        assert!(entry.task.ends_with('…'));
    }
}
