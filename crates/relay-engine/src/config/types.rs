// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Typed configuration surface.
//!
//! The YAML file is deserialized once into these sum types; the engine
//! never branches on raw strings after load.

use crate::pattern::SwarmPattern;
use relay_broker::AgentCli;
use serde::{Deserialize, Serialize};

/// Root of a relay configuration file. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelayConfig {
    /// Config format version.
    pub version: String,

    /// Project name.
    pub name: String,

    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Swarm-level settings.
    pub swarm: SwarmConfig,

    /// Agent fleet, in authored order. Must be non-empty.
    pub agents: Vec<AgentDefinition>,

    /// Workflows, in authored order. May be empty.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,

    /// Coordination settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordination: Option<CoordinationConfig>,

    /// State backend settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateConfig>,

    /// Error handling settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandlingConfig>,

    /// Trajectory recording settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectories: Option<TrajectoryConfig>,
}

impl RelayConfig {
    /// Look up an agent definition by name.
    pub fn agent(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Look up a workflow definition by name.
    pub fn workflow(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.name == name)
    }
}

/// Swarm-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SwarmConfig {
    /// Communication pattern. When absent, the heuristic selector picks
    /// one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<SwarmPattern>,

    /// Channel progress is posted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Upper bound on concurrently running steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Default per-step timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// One agent in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentDefinition {
    /// Unique agent name.
    pub name: String,

    /// CLI the agent runs.
    pub cli: AgentCli,

    /// Role used by pattern selection and topology building.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Standing task for the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Channels the agent joins on spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,

    /// Execution constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<AgentConstraints>,

    /// Interactive PTY mode. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

impl AgentDefinition {
    /// Whether the agent runs in interactive PTY mode.
    pub fn is_interactive(&self) -> bool {
        self.interactive.unwrap_or(true)
    }

    /// Configured model, if any.
    pub fn model(&self) -> Option<&str> {
        self.constraints.as_ref().and_then(|c| c.model.as_deref())
    }
}

/// Per-agent execution constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentConstraints {
    /// Model selector passed to the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Default retry budget for the agent's steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Default timeout for the agent's steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Idle threshold forwarded to the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_threshold_secs: Option<u64>,
}

/// A named sequence of steps forming a DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Workflow name.
    pub name: String,

    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Steps in authored order. Must be non-empty.
    pub steps: Vec<WorkflowStep>,

    /// Failure strategy for the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

impl WorkflowDefinition {
    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// One unit of work assigned to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkflowStep {
    /// Step name, unique within the workflow.
    pub name: String,

    /// Name of the agent that executes the step.
    pub agent: String,

    /// Task text; may contain `{{...}}` templates.
    pub task: String,

    /// Names of steps that must finish first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Verification applied to the step's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationCheck>,

    /// Per-step timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Per-step retry budget override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Verification predicate attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VerificationCheck {
    /// Output must contain the substring.
    OutputContains(String),

    /// Exit code check. A clean exit is implicit proof, so this performs
    /// no additional check.
    ExitCode(i64),

    /// The path, resolved against the working directory, must exist.
    FileExists(String),

    /// Delegated to the caller.
    Custom(serde_json::Value),
}

/// Workflow-level failure strategy as authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Fail,
    Skip,
    Retry,
}

/// Canonical failure strategy the scheduler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Skip downstream and terminate the run on first failure.
    FailFast,

    /// Skip downstream of the failure but keep independent branches
    /// running.
    Continue,
}

impl ErrorStrategy {
    /// Canonicalise the configured strategy: `errorHandling.strategy`
    /// wins, then the workflow's `onError`, then fail-fast.
    pub fn resolve(error_handling: Option<&ErrorHandlingConfig>, on_error: Option<OnError>) -> Self {
        if let Some(strategy) = error_handling.and_then(|e| e.strategy.as_deref()) {
            return Self::canonicalise(strategy);
        }
        match on_error {
            Some(OnError::Skip) => Self::Continue,
            Some(OnError::Fail) | Some(OnError::Retry) | None => Self::FailFast,
        }
    }

    fn canonicalise(strategy: &str) -> Self {
        match strategy {
            "skip" | "continue" => Self::Continue,
            // "fail", "retry", "fail-fast", and anything unrecognised.
            _ => Self::FailFast,
        }
    }
}

/// Coordination settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoordinationConfig {
    /// Named barrier points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barriers: Option<Vec<String>>,

    /// Fraction of agents that must agree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_threshold: Option<f64>,

    /// Consensus strategy name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_strategy: Option<String>,
}

/// State backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StateConfig {
    /// Backend name; the in-memory store is the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Time-to-live for state entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,

    /// Namespace prefix for state keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Error handling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorHandlingConfig {
    /// Strategy name; canonicalised by [`ErrorStrategy::resolve`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Default retry budget when neither step nor agent sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Delay between retry attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    /// Channel failures are reported to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_channel: Option<String>,
}

/// Trajectory recording settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrajectoryConfig {
    /// Master switch. Defaults to enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Reflect when a coordination barrier clears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflect_on_barriers: Option<bool>,

    /// Reflect when a parallel batch converges. Defaults to enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflect_on_converge: Option<bool>,

    /// Record automatic decisions (e.g. retry exhaustion).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_decisions: Option<bool>,
}

impl TrajectoryConfig {
    /// Whether recording is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Whether convergence reflections are on.
    pub fn reflect_on_converge(&self) -> bool {
        self.reflect_on_converge.unwrap_or(true)
    }
}

#[cfg(test)]
pub mod test_support {
    //! Builders shared by unit tests across the crate.

    use super::*;

    pub fn agent(name: &str) -> AgentDefinition {
        AgentDefinition {
            name: name.to_string(),
            cli: AgentCli::Claude,
            role: None,
            task: None,
            channels: None,
            constraints: None,
            interactive: None,
        }
    }

    pub fn agent_with_role(name: &str, role: &str) -> AgentDefinition {
        AgentDefinition {
            role: Some(role.to_string()),
            ..agent(name)
        }
    }

    pub fn step(name: &str, agent: &str, depends_on: Vec<&str>) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            agent: agent.to_string(),
            task: format!("run {}", name),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            verification: None,
            timeout_ms: None,
            retries: None,
        }
    }

    pub fn workflow(name: &str, steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            description: None,
            steps,
            on_error: None,
        }
    }

    pub fn config_with(
        agents: Vec<AgentDefinition>,
        workflows: Vec<WorkflowDefinition>,
    ) -> RelayConfig {
        RelayConfig {
            version: "1".to_string(),
            name: "test".to_string(),
            description: None,
            swarm: SwarmConfig {
                pattern: None,
                channel: None,
                max_concurrency: None,
                timeout_ms: None,
            },
            agents,
            workflows,
            coordination: None,
            state: None,
            error_handling: None,
            trajectories: None,
        }
    }
}
