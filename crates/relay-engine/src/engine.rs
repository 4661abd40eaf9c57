// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! The DAG execution loop.
//!
//! One runner drives one run at a time: compute the ready set, execute it
//! in parallel behind a settle-all barrier, apply the failure strategy,
//! and repeat until no step is ready. Steps retry inside their own
//! execution; failures skip their transitive dependents.

use crate::config::{AgentDefinition, ErrorStrategy, RelayConfig, WorkflowDefinition, WorkflowStep};
use crate::coordinator::Coordinator;
use crate::error::{RelayError, Result};
use crate::events::EventBus;
use crate::invoker::{wait_for_abort, InvokeContext, ResolvedStep, StepInvoker};
use crate::notifier::ChannelNotifier;
use crate::paths::DataDirs;
use crate::pattern::{select_pattern, SwarmPattern};
use crate::template::interpolate_step_outputs;
use crate::topology::{build_topology, Topology};
use crate::verify::run_verification;
use dashmap::DashMap;
use relay_state::{RunRecord, StateStoreRef, StepRecord, StepStatus};
use relay_trajectory::{StepOutcome, TrajectoryRecorder};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default per-step timeout when neither step, agent, nor swarm sets one.
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// Default delay between retry attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Collaborators injected into a [`WorkflowRunner`].
pub struct RunnerDeps {
    pub store: StateStoreRef,
    pub invoker: Arc<dyn StepInvoker>,
    pub messaging: relay_broker::MessagingRef,
    pub trajectory: Arc<TrajectoryRecorder>,
    pub dirs: DataDirs,
    pub workspace_id: String,
    pub events: EventBus,
}

/// Drives one workflow run to completion.
pub struct WorkflowRunner {
    config: Arc<RelayConfig>,
    coordinator: Coordinator,
    invoker: Arc<dyn StepInvoker>,
    messaging: relay_broker::MessagingRef,
    notifier: ChannelNotifier,
    trajectory: Arc<TrajectoryRecorder>,
    dirs: DataDirs,
    workspace_id: String,
    step_outputs: Arc<DashMap<String, String>>,
    abort_tx: watch::Sender<bool>,
    abort_rx: watch::Receiver<bool>,
    pause_tx: watch::Sender<bool>,
    pause_rx: watch::Receiver<bool>,
}

impl WorkflowRunner {
    /// Create a runner from a config and its collaborators.
    pub fn new(config: RelayConfig, deps: RunnerDeps) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);
        let (pause_tx, pause_rx) = watch::channel(false);
        let notifier = ChannelNotifier::new(deps.messaging.clone(), config.swarm.channel.clone());

        Self {
            config: Arc::new(config),
            coordinator: Coordinator::new(deps.store, deps.events),
            invoker: deps.invoker,
            messaging: deps.messaging,
            notifier,
            trajectory: deps.trajectory,
            dirs: deps.dirs,
            workspace_id: deps.workspace_id,
            step_outputs: Arc::new(DashMap::new()),
            abort_tx,
            abort_rx,
            pause_tx,
            pause_rx,
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The event bus run and step events are emitted on.
    pub fn events(&self) -> &EventBus {
        self.coordinator.events()
    }

    /// Pattern in effect for this config.
    pub fn pattern(&self) -> SwarmPattern {
        select_pattern(&self.config)
    }

    /// Communication topology for the pattern in effect.
    pub fn topology(&self) -> Topology {
        build_topology(&self.config, self.pattern())
    }

    /// Stop scheduling new batches. In-flight steps are not interrupted.
    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    /// Resume scheduling.
    pub fn unpause(&self) {
        let _ = self.pause_tx.send(false);
    }

    /// Abort the run: in-flight agents are terminated and the run
    /// transitions to `cancelled`.
    pub fn abort(&self) {
        let _ = self.abort_tx.send(true);
    }

    /// Execute a workflow by name and return the terminal run record.
    ///
    /// Setup failures (unknown workflow, store errors) are `Err`; a run
    /// that started returns `Ok` with status `completed`, `failed`, or
    /// `cancelled`.
    pub async fn execute_workflow(&self, workflow_name: &str) -> Result<RunRecord> {
        let workflow = self
            .config
            .workflow(workflow_name)
            .cloned()
            .ok_or_else(|| RelayError::State(format!("unknown workflow \"{}\"", workflow_name)))?;

        let pattern = self.pattern();
        let topology = build_topology(&self.config, pattern);

        if let Some(channel) = &self.config.swarm.channel {
            // Channel setup is best-effort, like every post after it.
            if let Err(e) = self
                .messaging
                .create_channel(channel, self.config.description.as_deref())
                .await
            {
                debug!(channel = %channel, error = %e, "Channel create failed");
            }
            if let Err(e) = self.messaging.join_channel(channel).await {
                debug!(channel = %channel, error = %e, "Channel join failed");
            }
            if let Err(e) = self
                .messaging
                .register_external_agent("relay-orchestrator", "Relay workflow orchestrator")
                .await
            {
                debug!(error = %e, "Orchestrator registration failed");
            }
        }

        let config_snapshot = serde_json::to_value(self.config.as_ref())
            .unwrap_or_else(|_| serde_json::Value::Null);
        let run = self
            .coordinator
            .create_run(RunRecord::new(
                &self.workspace_id,
                workflow_name,
                pattern.as_str(),
                config_snapshot,
            ))
            .await?;

        for step in &workflow.steps {
            self.coordinator
                .create_step(StepRecord::new(
                    run.id,
                    &step.name,
                    &step.agent,
                    &step.task,
                    step.depends_on.clone(),
                ))
                .await?;
        }

        let run = self.coordinator.start_run(run.id).await?;
        info!(run_id = %run.id, workflow = %workflow_name, pattern = %pattern, "Run started");
        self.notifier
            .post(&format!(
                "Run {} started: workflow \"{}\" ({})",
                run.id,
                workflow_name,
                topology.describe()
            ))
            .await;

        self.step_outputs.clear();
        let dep_count = workflow
            .steps
            .iter()
            .filter(|s| !s.depends_on.is_empty())
            .count();
        self.trajectory.start(
            run.id,
            workflow_name,
            workflow.steps.len(),
            Some(&format!(
                "{}; {} of {} steps have dependencies",
                topology.describe(),
                dep_count,
                workflow.steps.len()
            )),
        );
        self.trajectory
            .set_agents(&topology.agents);

        let outcome = self.run_loop(&run, &workflow).await;
        self.finish(&run, workflow_name, outcome).await
    }

    /// Resume a previously failed run of the same workflow.
    pub async fn resume(&self, run_id: Uuid) -> Result<RunRecord> {
        let run = self.coordinator.resume_run(run_id).await?;
        let workflow = self
            .config
            .workflow(&run.workflow_name)
            .cloned()
            .ok_or_else(|| {
                RelayError::State(format!("unknown workflow \"{}\"", run.workflow_name))
            })?;

        // Completed outputs are not reloaded here; template resolution
        // rehydrates them lazily from the on-disk step-output files.
        self.step_outputs.clear();

        self.trajectory.start(
            run.id,
            &run.workflow_name,
            workflow.steps.len(),
            Some("resumed run"),
        );
        let outcome = self.run_loop(&run, &workflow).await;
        self.finish(&run, &run.workflow_name, outcome).await
    }

    async fn finish(
        &self,
        run: &RunRecord,
        workflow_name: &str,
        outcome: Result<Vec<StepOutcome>>,
    ) -> Result<RunRecord> {
        let steps = self.coordinator.store().get_steps_by_run_id(run.id).await?;

        match outcome {
            Ok(outcomes) => {
                let failed: Vec<&StepRecord> = steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Failed)
                    .collect();
                if failed.is_empty() {
                    let updated = self.coordinator.complete_run(run.id).await?;
                    self.notifier.completion_report(workflow_name, &steps).await;
                    let confidence = relay_trajectory::confidence(&outcomes);
                    self.trajectory.complete(
                        &format!(
                            "Workflow \"{}\" completed: {} steps succeeded",
                            workflow_name,
                            outcomes.iter().filter(|o| o.completed).count()
                        ),
                        confidence,
                        Some(serde_json::json!({
                            "runId": updated.id,
                            "pattern": updated.pattern,
                        })),
                    );
                    info!(run_id = %run.id, "Run completed");
                    Ok(updated)
                } else {
                    let error = format!("{} step(s) failed", failed.len());
                    let updated = self.coordinator.fail_run(run.id, &error).await?;
                    self.notifier.failure_report(workflow_name, &steps, &error).await;
                    self.trajectory.abandon(&error);
                    warn!(run_id = %run.id, error = %error, "Run failed");
                    Ok(updated)
                }
            }
            Err(RelayError::Aborted) => {
                let updated = self.coordinator.cancel_run(run.id).await?;
                self.notifier
                    .post(&format!("Run {} cancelled", run.id))
                    .await;
                self.trajectory.abandon("Cancelled by user");
                info!(run_id = %run.id, "Run cancelled");
                Ok(updated)
            }
            Err(e) => {
                let error = e.to_string();
                let updated = self.coordinator.fail_run(run.id, &error).await?;
                self.notifier.failure_report(workflow_name, &steps, &error).await;
                self.trajectory.abandon(&error);
                error!(run_id = %run.id, error = %error, "Run failed");
                Ok(updated)
            }
        }
    }

    async fn run_loop(
        &self,
        run: &RunRecord,
        workflow: &WorkflowDefinition,
    ) -> Result<Vec<StepOutcome>> {
        let strategy = ErrorStrategy::resolve(
            self.config.error_handling.as_ref(),
            workflow.on_error,
        );
        let reflect_on_converge = self
            .config
            .trajectories
            .as_ref()
            .map(|t| t.reflect_on_converge())
            .unwrap_or(true);
        let mut all_outcomes = Vec::new();
        let mut last_batch_parallel = false;

        loop {
            self.check_aborted()?;
            self.wait_if_paused().await?;

            let mut ready = self.ready_steps(run.id).await?;
            if ready.is_empty() {
                break;
            }
            if let Some(max) = self.config.swarm.max_concurrency {
                if max > 0 {
                    ready.truncate(max);
                }
            }

            let names: Vec<String> = ready.iter().map(|s| s.step_name.clone()).collect();
            debug!(run_id = %run.id, batch = ?names, "Scheduling batch");

            let track = ready.len() > 1 && reflect_on_converge;
            if track {
                self.trajectory.begin_track(&names);
            } else if last_batch_parallel && reflect_on_converge {
                // A single step unblocked by a parallel batch is the
                // convergence point.
                self.trajectory.begin_convergence(&names[0]);
            }

            // Settle-all barrier over the batch.
            let results = futures::future::join_all(
                ready
                    .iter()
                    .map(|record| self.execute_step(run, workflow, record.clone())),
            )
            .await;

            let mut batch_outcomes = Vec::new();
            let mut fail_fast_error = None;
            for (record, result) in ready.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        batch_outcomes.push(outcome.clone());
                        all_outcomes.push(outcome);
                    }
                    Err(e) if e.is_aborted() => return Err(RelayError::Aborted),
                    Err(e) => {
                        let outcome = StepOutcome {
                            name: record.step_name.clone(),
                            completed: false,
                            retries: 0,
                            verified: false,
                        };
                        batch_outcomes.push(outcome.clone());
                        all_outcomes.push(outcome);
                        // The whole batch has already settled; every
                        // failure gets its downstream skipped before the
                        // fail-fast throw.
                        self.mark_downstream_skipped(run.id, workflow, &record.step_name)
                            .await?;
                        match strategy {
                            ErrorStrategy::FailFast => {
                                if fail_fast_error.is_none() {
                                    fail_fast_error = Some(e);
                                }
                            }
                            ErrorStrategy::Continue => {
                                warn!(step = %record.step_name, error = %e, "Continuing past failed step");
                            }
                        }
                    }
                }
            }

            if let Some(e) = fail_fast_error {
                return Err(e);
            }

            if track {
                let unblocks: Vec<String> = self
                    .ready_steps(run.id)
                    .await?
                    .iter()
                    .map(|s| s.step_name.clone())
                    .collect();
                self.trajectory
                    .synthesize_and_reflect(&batch_outcomes, &unblocks);
            }
            last_batch_parallel = ready.len() > 1;
        }

        Ok(all_outcomes)
    }

    /// Pending steps whose dependencies are all completed or skipped.
    async fn ready_steps(&self, run_id: Uuid) -> Result<Vec<StepRecord>> {
        let steps = self.coordinator.store().get_steps_by_run_id(run_id).await?;
        let status_by_name: HashMap<&str, StepStatus> = steps
            .iter()
            .map(|s| (s.step_name.as_str(), s.status))
            .collect();

        Ok(steps
            .iter()
            .filter(|step| {
                step.status == StepStatus::Pending
                    && step.depends_on.iter().all(|dep| {
                        status_by_name
                            .get(dep.as_str())
                            .map(|s| s.is_terminal_ok())
                            .unwrap_or(false)
                    })
            })
            .cloned()
            .collect())
    }

    async fn execute_step(
        &self,
        run: &RunRecord,
        workflow: &WorkflowDefinition,
        record: StepRecord,
    ) -> Result<StepOutcome> {
        let step_def = workflow
            .step(&record.step_name)
            .ok_or_else(|| RelayError::State(format!("unknown step \"{}\"", record.step_name)))?;
        let agent_def = self
            .config
            .agent(&record.agent_name)
            .ok_or_else(|| RelayError::State(format!("unknown agent \"{}\"", record.agent_name)))?;

        let max_retries = step_def
            .retries
            .or_else(|| agent_def.constraints.as_ref().and_then(|c| c.retries))
            .or_else(|| {
                self.config
                    .error_handling
                    .as_ref()
                    .and_then(|e| e.max_retries)
            })
            .unwrap_or(0);
        let retry_delay = self
            .config
            .error_handling
            .as_ref()
            .and_then(|e| e.retry_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_DELAY);

        let mut last_error: Option<RelayError> = None;
        for attempt in 0..=max_retries {
            self.check_aborted()?;

            if attempt > 0 {
                let reason = last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.coordinator.retry_step(&record, attempt, &reason).await?;
                self.trajectory
                    .step_retrying(&record.step_name, attempt, &reason);
                self.sleep_racing_abort(retry_delay).await?;
            }

            let running = self.coordinator.start_step(&record).await?;
            self.trajectory
                .step_started(&record.step_name, &record.agent_name);
            self.notifier
                .step_started(&record.step_name, &record.agent_name)
                .await;

            match self.attempt_step(run, workflow, step_def, agent_def, &running).await {
                Ok(output) => {
                    self.coordinator.complete_step(&running, &output).await?;
                    self.step_outputs
                        .insert(record.step_name.clone(), output.clone());
                    self.persist_output(run.id, &record.step_name, &output);
                    self.notifier.step_completed(&record.step_name).await;
                    self.trajectory.step_completed(&record.step_name, &output);
                    return Ok(StepOutcome {
                        name: record.step_name.clone(),
                        completed: true,
                        retries: attempt,
                        verified: step_def.verification.is_some(),
                    });
                }
                Err(e) if e.is_aborted() => return Err(RelayError::Aborted),
                Err(e) => {
                    debug!(step = %record.step_name, attempt, error = %e, "Attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| RelayError::AgentExit {
            step: record.step_name.clone(),
            message: "unknown failure".to_string(),
        });
        let error = last_error.to_string();
        self.trajectory.step_failed(&record.step_name, &error);
        self.trajectory.decide(&format!(
            "Retries exhausted for step \"{}\" after {} attempts",
            record.step_name,
            max_retries + 1
        ));
        self.coordinator.fail_step(&record, &error).await?;
        self.notifier.step_failed(&record.step_name, &error).await;
        Err(last_error)
    }

    /// One attempt: resolve templates, invoke the agent, verify.
    async fn attempt_step(
        &self,
        run: &RunRecord,
        workflow: &WorkflowDefinition,
        step_def: &WorkflowStep,
        agent_def: &AgentDefinition,
        record: &StepRecord,
    ) -> Result<String> {
        let outputs: HashMap<String, String> = self
            .step_outputs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let run_id = run.id;
        let dirs = self.dirs.clone();
        let mut task = interpolate_step_outputs(&record.task, &outputs, |name| {
            std::fs::read_to_string(dirs.step_output_file(run_id, name)).ok()
        });

        if agent_def.is_interactive() {
            if let Some(note) = non_interactive_awareness_note(&self.config, workflow) {
                task.push_str(&note);
            }
        }

        let timeout = step_def
            .timeout_ms
            .or_else(|| agent_def.constraints.as_ref().and_then(|c| c.timeout_ms))
            .or(self.config.swarm.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STEP_TIMEOUT);

        let resolved = ResolvedStep {
            name: step_def.name.clone(),
            task,
            verification: step_def.verification.clone(),
            timeout,
        };
        let ctx = InvokeContext {
            run_id,
            channel: self.config.swarm.channel.clone(),
            abort: self.abort_rx.clone(),
        };

        let output = self.invoker.invoke(agent_def, &resolved, &ctx).await?;
        run_verification(step_def.verification.as_ref(), &output, &step_def.name)?;
        Ok(output)
    }

    /// BFS over the dependency graph, skipping every pending step that
    /// transitively depends on the failed one.
    async fn mark_downstream_skipped(
        &self,
        run_id: Uuid,
        workflow: &WorkflowDefinition,
        failed_step: &str,
    ) -> Result<()> {
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &workflow.steps {
            for dep in &step.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.name.as_str());
            }
        }

        let mut to_skip: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(failed_step);
        while let Some(current) = queue.pop_front() {
            for dependent in dependents.get(current).into_iter().flatten() {
                if to_skip.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        if to_skip.is_empty() {
            return Ok(());
        }

        let reason = format!("Upstream dependency \"{}\" failed", failed_step);
        let steps = self.coordinator.store().get_steps_by_run_id(run_id).await?;
        for step in steps {
            if to_skip.contains(step.step_name.as_str()) && step.status == StepStatus::Pending {
                self.coordinator.skip_step(&step, &reason).await?;
                self.trajectory.step_skipped(&step.step_name, &reason);
                self.notifier
                    .post(&format!("Step \"{}\" skipped: {}", step.step_name, reason))
                    .await;
            }
        }
        Ok(())
    }

    fn persist_output(&self, run_id: Uuid, step_name: &str, output: &str) {
        let path = self.dirs.step_output_file(run_id, step_name);
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, output)
        };
        if let Err(e) = write() {
            warn!(path = %path.display(), error = %e, "Step output persistence failed");
        }
    }

    fn check_aborted(&self) -> Result<()> {
        if *self.abort_rx.borrow() {
            Err(RelayError::Aborted)
        } else {
            Ok(())
        }
    }

    async fn wait_if_paused(&self) -> Result<()> {
        let mut pause = self.pause_rx.clone();
        let mut abort = self.abort_rx.clone();
        while *pause.borrow() {
            tokio::select! {
                changed = pause.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = wait_for_abort(&mut abort) => return Err(RelayError::Aborted),
            }
        }
        Ok(())
    }

    async fn sleep_racing_abort(&self, delay: Duration) -> Result<()> {
        let mut abort = self.abort_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = wait_for_abort(&mut abort) => Err(RelayError::Aborted),
        }
    }
}

/// Note appended to interactive agents' tasks, listing which sibling
/// agents run non-interactively and how to reference their results.
fn non_interactive_awareness_note(
    config: &RelayConfig,
    workflow: &WorkflowDefinition,
) -> Option<String> {
    let handles: Vec<String> = workflow
        .steps
        .iter()
        .filter(|step| {
            config
                .agent(&step.agent)
                .map(|a| !a.is_interactive())
                .unwrap_or(false)
        })
        .map(|step| {
            format!(
                "- \"{}\" (agent {}): {{{{steps.{}.output}}}}",
                step.name, step.agent, step.name
            )
        })
        .collect();

    if handles.is_empty() {
        return None;
    }
    Some(format!(
        "\n\nSome steps run as non-interactive one-shot agents; you cannot message them. \
Their results are available as template handles:\n{}",
        handles.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{agent, config_with, step, workflow};

    #[test]
    fn test_awareness_note_lists_non_interactive_steps() {
        let mut batch = agent("batch");
        batch.interactive = Some(false);
        let config = config_with(
            vec![agent("chat"), batch],
            vec![workflow(
                "wf",
                vec![step("talk", "chat", vec![]), step("crunch", "batch", vec![])],
            )],
        );

        let note = non_interactive_awareness_note(&config, &config.workflows[0]).unwrap();
        assert!(note.contains("{{steps.crunch.output}}"));
        assert!(note.contains("crunch"));
        assert!(!note.contains("{{steps.talk.output}}"));
    }

    #[test]
    fn test_awareness_note_absent_when_all_interactive() {
        let config = config_with(
            vec![agent("a")],
            vec![workflow("wf", vec![step("s", "a", vec![])])],
        );
        assert!(non_interactive_awareness_note(&config, &config.workflows[0]).is_none());
    }
}
