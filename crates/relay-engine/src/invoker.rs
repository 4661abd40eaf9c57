// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Per-step agent invocation.
//!
//! Two execution modes, selected by the agent definition: interactive
//! agents run on the broker's PTYs and self-terminate by printing `/exit`;
//! non-interactive agents run as one-shot child processes whose stdout is
//! the deliverable. Both modes register the agent in the worker registry
//! for the duration of the step and log raw output to the worker log.

use crate::config::{AgentDefinition, VerificationCheck};
use crate::error::{RelayError, Result};
use crate::paths::DataDirs;
use crate::registry::{WorkerEntry, WorkerRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use relay_broker::{
    one_shot_command, terminate_gracefully, BrokerRef, ExitReason, MessagingRef, SpawnOptions,
    WorkerOutput, EXIT_TOKEN,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stderr tail appended to non-zero-exit errors.
const STDERR_TAIL: usize = 500;

/// Appended to interactive tasks so the agent knows how to end its
/// session.
fn self_termination_note() -> String {
    format!(
        "\n\nWhen the task is fully complete, print the line {} on a line by itself to end your session.",
        EXIT_TOKEN
    )
}

/// Appended to non-interactive tasks.
const DELIVERABLE_PROLOGUE: &str = "\n\nYour standard output is the only deliverable of this task. \
Produce the complete result in a single pass: no questions, no follow-ups, no partial drafts.";

/// A step with templates resolved, ready to hand to an agent.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    /// Step name.
    pub name: String,

    /// Fully resolved task text.
    pub task: String,

    /// Verification attached to the step, consulted by the timeout
    /// rescue.
    pub verification: Option<VerificationCheck>,

    /// Wait bound for the agent.
    pub timeout: Duration,
}

/// Run-scoped context threaded into every invocation.
#[derive(Clone)]
pub struct InvokeContext {
    /// Run the step belongs to.
    pub run_id: Uuid,

    /// Workflow channel, if one was created.
    pub channel: Option<String>,

    /// Becomes true when the engine aborts.
    pub abort: watch::Receiver<bool>,
}

/// Executes one step on an agent.
#[async_trait]
pub trait StepInvoker: Send + Sync {
    /// Run the step to completion and return its output.
    async fn invoke(
        &self,
        agent: &AgentDefinition,
        step: &ResolvedStep,
        ctx: &InvokeContext,
    ) -> Result<String>;
}

struct AgentCapture {
    chunks: Vec<String>,
    log_path: PathBuf,
}

/// Broker- and subprocess-backed [`StepInvoker`].
pub struct AgentInvoker {
    broker: BrokerRef,
    messaging: MessagingRef,
    registry: Arc<WorkerRegistry>,
    dirs: DataDirs,
    captures: Arc<DashMap<String, AgentCapture>>,
}

impl AgentInvoker {
    /// Create an invoker and install its output sink on the broker.
    pub fn new(
        broker: BrokerRef,
        messaging: MessagingRef,
        registry: Arc<WorkerRegistry>,
        dirs: DataDirs,
    ) -> Arc<Self> {
        let invoker = Arc::new(Self {
            broker: broker.clone(),
            messaging,
            registry,
            dirs,
            captures: Arc::new(DashMap::new()),
        });

        let captures = invoker.captures.clone();
        broker.set_output_sink(Arc::new(move |output: WorkerOutput| {
            if let Some(mut capture) = captures.get_mut(&output.name) {
                append_log(&capture.log_path, &output.chunk);
                let text = String::from_utf8_lossy(&output.chunk);
                capture.chunks.push(strip_ansi(&text));
            }
        }));

        invoker
    }

    async fn invoke_interactive(
        &self,
        agent: &AgentDefinition,
        step: &ResolvedStep,
        ctx: &InvokeContext,
    ) -> Result<String> {
        let requested = unique_agent_name(&step.name);
        let task = format!("{}{}", step.task, self_termination_note());

        self.captures.insert(
            requested.clone(),
            AgentCapture {
                chunks: Vec::new(),
                log_path: self.dirs.worker_log_file(&requested),
            },
        );

        let mut channels = agent.channels.clone().unwrap_or_default();
        if let Some(channel) = &ctx.channel {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }

        let spawn = self
            .broker
            .spawn_pty(SpawnOptions {
                name: requested.clone(),
                cli: agent.cli,
                args: agent.model().map(String::from).into_iter().collect(),
                channels,
                task: task.clone(),
                idle_threshold_secs: agent
                    .constraints
                    .as_ref()
                    .and_then(|c| c.idle_threshold_secs),
            })
            .await;

        let handle = match spawn {
            Ok(handle) => handle,
            Err(e) => {
                self.captures.remove(&requested);
                return Err(RelayError::AgentExit {
                    step: step.name.clone(),
                    message: e.to_string(),
                });
            }
        };

        // The broker may rename the agent; re-key all per-agent state
        // under the final name.
        let name = handle.name().to_string();
        if name != requested {
            self.rekey_capture(&requested, &name);
        }

        if let Err(e) = self
            .registry
            .register(WorkerEntry::new(
                &name,
                agent.cli,
                &task,
                handle.pid(),
                true,
                self.dirs.worker_log_file(&name).display().to_string(),
            ))
            .await
        {
            warn!(agent = %name, error = %e, "Worker registration failed");
        }

        if let Some(channel) = &ctx.channel {
            if let Err(e) = self.messaging.invite_to_channel(channel, &name).await {
                debug!(agent = %name, error = %e, "Channel invite failed");
            }
        }
        let heartbeat = self.messaging.start_heartbeat();

        info!(step = %step.name, agent = %name, "Waiting for interactive agent");

        let mut abort = ctx.abort.clone();
        let outcome = tokio::select! {
            reason = handle.wait_for_exit(step.timeout) => match reason {
                ExitReason::Exit => Ok(self.collect_output(&name, step, ctx)),
                ExitReason::Timeout => {
                    // Safety net: the agent may have produced its artifact
                    // without ever printing the exit token.
                    if file_exists(step.verification.as_ref()) {
                        info!(step = %step.name, "Timeout rescued by file_exists verification");
                        handle.release().await;
                        Ok(self.collect_output(&name, step, ctx))
                    } else {
                        handle.release().await;
                        Err(RelayError::Timeout {
                            step: step.name.clone(),
                            duration: step.timeout,
                        })
                    }
                }
                ExitReason::Released => Err(RelayError::AgentExit {
                    step: step.name.clone(),
                    message: "agent was released before completing".to_string(),
                }),
            },
            _ = wait_for_abort(&mut abort) => {
                handle.release().await;
                Err(RelayError::Aborted)
            }
        };

        heartbeat.stop();
        self.captures.remove(&name);
        if let Err(e) = self.registry.unregister(&name).await {
            debug!(agent = %name, error = %e, "Worker unregistration failed");
        }

        outcome
    }

    fn rekey_capture(&self, old: &str, new: &str) {
        if let Some((_, mut capture)) = self.captures.remove(old) {
            let new_log = self.dirs.worker_log_file(new);
            if capture.log_path.exists() {
                let _ = std::fs::rename(&capture.log_path, &new_log);
            }
            capture.log_path = new_log;
            self.captures.insert(new.to_string(), capture);
            debug!(old, new, "Re-keyed agent capture after broker rename");
        }
    }

    /// Output fallback chain: in-memory buffer, then the step's summary
    /// file on disk, then a synthesised placeholder.
    fn collect_output(&self, name: &str, step: &ResolvedStep, ctx: &InvokeContext) -> String {
        let buffered: String = self
            .captures
            .get(name)
            .map(|c| c.chunks.concat())
            .unwrap_or_default();
        if !buffered.trim().is_empty() {
            return buffered;
        }

        let summary = self.dirs.step_output_file(ctx.run_id, &step.name);
        if let Ok(content) = std::fs::read_to_string(&summary) {
            if !content.trim().is_empty() {
                return content;
            }
        }

        format!("[no output captured for step \"{}\"]", step.name)
    }

    async fn invoke_subprocess(
        &self,
        agent: &AgentDefinition,
        step: &ResolvedStep,
        ctx: &InvokeContext,
    ) -> Result<String> {
        let task = format!("{}{}", step.task, DELIVERABLE_PROLOGUE);
        let argv =
            one_shot_command(agent.cli, &task, agent.model()).map_err(|e| RelayError::AgentExit {
                step: step.name.clone(),
                message: e.to_string(),
            })?;

        let mut child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::AgentExit {
                step: step.name.clone(),
                message: format!("failed to spawn {}: {}", argv[0], e),
            })?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(RelayError::AgentExit {
                step: step.name.clone(),
                message: "child stdio was not piped".to_string(),
            });
        };

        let name = unique_agent_name(&step.name);
        let log_path = self.dirs.worker_log_file(&name);
        if let Err(e) = self
            .registry
            .register(WorkerEntry::new(
                &name,
                agent.cli,
                &task,
                child.id(),
                false,
                log_path.display().to_string(),
            ))
            .await
        {
            warn!(agent = %name, error = %e, "Worker registration failed");
        }

        let stdout_log = log_path.clone();
        let stdout_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut buf = [0u8; 4096];
            while let Ok(n) = stdout.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                append_log(&stdout_log, &buf[..n]);
                collected.extend_from_slice(&buf[..n]);
            }
            collected
        });
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let _ = stderr.read_to_end(&mut collected).await;
            collected
        });

        enum WaitOutcome {
            Exited(std::process::ExitStatus),
            Aborted,
            TimedOut,
        }

        let mut abort = ctx.abort.clone();
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => {
                    let _ = self.registry.unregister(&name).await;
                    return Err(RelayError::AgentExit {
                        step: step.name.clone(),
                        message: format!("wait failed: {}", e),
                    });
                }
            },
            _ = wait_for_abort(&mut abort) => WaitOutcome::Aborted,
            _ = tokio::time::sleep(step.timeout) => WaitOutcome::TimedOut,
        };

        let result = match outcome {
            WaitOutcome::Exited(status) => {
                let stdout_bytes = stdout_task.await.unwrap_or_default();
                let stderr_bytes = stderr_task.await.unwrap_or_default();
                if status.success() {
                    Ok(strip_ansi(&String::from_utf8_lossy(&stdout_bytes)))
                } else {
                    let stderr_text = String::from_utf8_lossy(&stderr_bytes);
                    let tail: String = stderr_text
                        .chars()
                        .rev()
                        .take(STDERR_TAIL)
                        .collect::<Vec<_>>()
                        .into_iter()
                        .rev()
                        .collect();
                    Err(RelayError::AgentExit {
                        step: step.name.clone(),
                        message: format!("exit code {:?}: {}", status.code(), tail.trim()),
                    })
                }
            }
            WaitOutcome::Aborted => {
                terminate_gracefully(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(RelayError::Aborted)
            }
            WaitOutcome::TimedOut => {
                terminate_gracefully(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(RelayError::Timeout {
                    step: step.name.clone(),
                    duration: step.timeout,
                })
            }
        };

        if let Err(e) = self.registry.unregister(&name).await {
            debug!(agent = %name, error = %e, "Worker unregistration failed");
        }

        result
    }
}

#[async_trait]
impl StepInvoker for AgentInvoker {
    async fn invoke(
        &self,
        agent: &AgentDefinition,
        step: &ResolvedStep,
        ctx: &InvokeContext,
    ) -> Result<String> {
        if agent.is_interactive() {
            self.invoke_interactive(agent, step, ctx).await
        } else {
            self.invoke_subprocess(agent, step, ctx).await
        }
    }
}

/// Wait until the abort flag becomes true. Never resolves otherwise.
pub async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender gone without aborting: stay pending.
    std::future::pending::<()>().await;
}

fn unique_agent_name(step_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", step_name, &id[..6])
}

fn file_exists(check: Option<&VerificationCheck>) -> bool {
    crate::verify::file_exists_target(check)
        .map(|path| std::path::Path::new(path).exists())
        .unwrap_or(false)
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1b(?:\[[0-9;?]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\))").expect("ansi regex")
    })
}

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ansi_re().replace_all(text, "").into_owned()
}

fn append_log(path: &std::path::Path, chunk: &[u8]) {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(chunk)
    };
    if let Err(e) = write() {
        debug!(path = %path.display(), error = %e, "Worker log write failed");
    }
}
