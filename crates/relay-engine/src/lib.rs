// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Declarative multi-agent workflow engine.
//!
//! A YAML configuration describes a fleet of AI-CLI agents and a set of
//! directed, possibly parallel, step graphs. The engine validates the
//! config, picks a swarm pattern, builds the communication topology,
//! and drives the steps to completion on a broker: parallel ready-set
//! batching, retries, verification, pause/abort, persisted state, and a
//! structured trajectory of the run.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod invoker;
pub mod notifier;
pub mod paths;
pub mod pattern;
pub mod registry;
pub mod template;
pub mod topology;
pub mod verify;

// Re-exports
pub use config::{
    load_config, load_config_str, AgentDefinition, ErrorStrategy, OnError, RelayConfig,
    VerificationCheck, WorkflowDefinition, WorkflowStep,
};
pub use coordinator::Coordinator;
pub use engine::{RunnerDeps, WorkflowRunner};
pub use error::{RelayError, Result};
pub use events::{EngineEvent, EventBus};
pub use invoker::{AgentInvoker, InvokeContext, ResolvedStep, StepInvoker};
pub use notifier::ChannelNotifier;
pub use paths::DataDirs;
pub use pattern::{select_pattern, SwarmPattern};
pub use registry::{WorkerEntry, WorkerRegistry};
pub use topology::{build_topology, Topology};
pub use verify::run_verification;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
