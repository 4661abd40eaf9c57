// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Configuration parsing and validation.

pub mod loader;
pub mod types;

pub use loader::{load_config, load_config_str, validate};
pub use types::{
    AgentConstraints, AgentDefinition, CoordinationConfig, ErrorHandlingConfig, ErrorStrategy,
    OnError, RelayConfig, StateConfig, SwarmConfig, TrajectoryConfig, VerificationCheck,
    WorkflowDefinition, WorkflowStep,
};

#[cfg(test)]
pub use types::test_support;
