// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! In-process broker and messaging implementations.
//!
//! [`LocalBroker`] runs interactive agents as piped child processes and
//! watches their stdout for the `/exit` self-termination token. It stands in
//! for an external terminal broker in tests and single-host runs.
//! [`RecordingMessaging`] is an idempotent in-memory message fabric.

use crate::command::one_shot_command;
use crate::process::terminate_gracefully;
use crate::traits::{AgentHandle, Broker, HeartbeatGuard, Messaging, OutputSink};
use crate::types::{BrokerError, ExitReason, Result, SpawnOptions, WorkerOutput};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Self-termination token interactive agents print on a line by itself.
pub const EXIT_TOKEN: &str = "/exit";

struct LocalAgentInner {
    name: String,
    pid: Option<u32>,
    child: Mutex<Option<tokio::process::Child>>,
    exit_tx: watch::Sender<Option<ExitReason>>,
    exit_rx: watch::Receiver<Option<ExitReason>>,
}

/// Handle to an agent spawned by [`LocalBroker`].
pub struct LocalAgent {
    inner: Arc<LocalAgentInner>,
}

#[async_trait]
impl AgentHandle for LocalAgent {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    async fn wait_for_exit(&self, timeout: Duration) -> ExitReason {
        let mut rx = self.inner.exit_rx.clone();
        let wait = async {
            loop {
                if let Some(reason) = *rx.borrow_and_update() {
                    return reason;
                }
                if rx.changed().await.is_err() {
                    return ExitReason::Exit;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(reason) => reason,
            Err(_) => ExitReason::Timeout,
        }
    }

    async fn release(&self) {
        self.inner.exit_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(ExitReason::Released);
                true
            } else {
                false
            }
        });

        let mut guard = self.inner.child.lock().await;
        if let Some(child) = guard.as_mut() {
            terminate_gracefully(child).await;
        }
        *guard = None;
    }
}

/// Process-backed broker for tests and single-host runs.
#[derive(Default)]
pub struct LocalBroker {
    sink: RwLock<Option<OutputSink>>,
    agents: DashMap<String, Arc<LocalAgentInner>>,
}

impl LocalBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a unique final name for a requested one. Collisions get a
    /// numeric suffix, which exercises callers' rename re-keying.
    fn assign_name(&self, requested: &str) -> String {
        if !self.agents.contains_key(requested) {
            return requested.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", requested, n);
            if !self.agents.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn spawn_pty(&self, opts: SpawnOptions) -> Result<Box<dyn AgentHandle>> {
        let name = self.assign_name(&opts.name);
        let model = opts.args.first().map(String::as_str);
        let argv = one_shot_command(opts.cli, &opts.task, model)?;

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrokerError::SpawnFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let (exit_tx, exit_rx) = watch::channel(None);

        let inner = Arc::new(LocalAgentInner {
            name: name.clone(),
            pid,
            child: Mutex::new(Some(child)),
            exit_tx,
            exit_rx,
        });
        self.agents.insert(name.clone(), inner.clone());

        info!(agent = %name, cli = %opts.cli, pid = ?pid, "Spawned local agent");

        // Reader task: forward chunks to the sink and watch for the exit
        // token or EOF.
        if let Some(mut stdout) = stdout {
            let sink = self.sink.read().clone();
            let reader_inner = inner.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut line = Vec::new();
                loop {
                    match stdout.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let chunk = &buf[..n];
                            if let Some(sink) = &sink {
                                sink(WorkerOutput {
                                    name: reader_inner.name.clone(),
                                    chunk: chunk.to_vec(),
                                });
                            }
                            for &b in chunk {
                                if b == b'\n' {
                                    if trim_ascii(&line) == EXIT_TOKEN.as_bytes() {
                                        reader_inner.exit_tx.send_if_modified(|current| {
                                            if current.is_none() {
                                                *current = Some(ExitReason::Exit);
                                                true
                                            } else {
                                                false
                                            }
                                        });
                                    }
                                    line.clear();
                                } else {
                                    line.push(b);
                                }
                            }
                        }
                    }
                }
                // EOF: the process is gone.
                reader_inner.exit_tx.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(ExitReason::Exit);
                        true
                    } else {
                        false
                    }
                });
                debug!(agent = %reader_inner.name, "Agent output stream closed");
            });
        }

        Ok(Box::new(LocalAgent { inner }))
    }

    fn set_output_sink(&self, sink: OutputSink) {
        *self.sink.write() = Some(sink);
    }

    async fn shutdown(&self) -> Result<()> {
        let names: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, inner)) = self.agents.remove(&name) {
                let mut guard = inner.child.lock().await;
                if let Some(child) = guard.as_mut() {
                    warn!(agent = %name, "Terminating agent on broker shutdown");
                    terminate_gracefully(child).await;
                }
                *guard = None;
            }
        }
        Ok(())
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// In-memory messaging fabric that records every post.
#[derive(Default)]
pub struct RecordingMessaging {
    channels: DashMap<String, Vec<String>>,
    external_agents: DashMap<String, String>,
    active_heartbeats: Arc<AtomicU64>,
}

impl RecordingMessaging {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages posted to a channel, in order.
    pub fn messages(&self, channel: &str) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Number of heartbeats currently running.
    pub fn active_heartbeats(&self) -> u64 {
        self.active_heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Messaging for RecordingMessaging {
    async fn create_channel(&self, name: &str, _description: Option<&str>) -> Result<()> {
        self.channels.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn join_channel(&self, name: &str) -> Result<()> {
        self.channels.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn invite_to_channel(&self, channel: &str, _agent: &str) -> Result<()> {
        self.channels.entry(channel.to_string()).or_default();
        Ok(())
    }

    async fn send_to_channel(&self, channel: &str, text: &str) -> Result<()> {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn register_external_agent(&self, name: &str, description: &str) -> Result<()> {
        self.external_agents
            .insert(name.to_string(), description.to_string());
        Ok(())
    }

    fn start_heartbeat(&self) -> HeartbeatGuard {
        self.active_heartbeats.fetch_add(1, Ordering::SeqCst);
        let count = self.active_heartbeats.clone();
        HeartbeatGuard::new(move || {
            count.fetch_sub(1, Ordering::SeqCst);
        })
    }
}
