// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Engine error taxonomy.

use std::time::Duration;

/// Errors surfaced by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Bad YAML shape, missing required field, unknown dependency, or a
    /// dependency cycle. Fatal at load.
    #[error("Config error in {path}: {message}")]
    Config { path: String, message: String },

    /// Unresolved variable during load-time interpolation. Fatal at load.
    #[error("Template error: {0}")]
    Template(String),

    /// A lifecycle transition was attempted from the wrong status.
    #[error("State error: {0}")]
    State(String),

    /// A verification predicate failed. Counts toward step retries.
    #[error("Verification failed for step \"{step}\": {detail}")]
    Verification { step: String, detail: String },

    /// The agent did not self-terminate within the bound.
    #[error("Step \"{step}\" timed out after {duration:?}")]
    Timeout { step: String, duration: Duration },

    /// Non-zero child exit or spawn failure.
    #[error("Agent failed for step \"{step}\": {message}")]
    AgentExit { step: String, message: String },

    /// The engine was aborted. The run transitions to `cancelled`.
    #[error("Run aborted")]
    Aborted,

    /// Workspace provisioning failed. Fatal before run start.
    #[error("Credential error: {0}")]
    Credential(#[from] relay_credentials::CredentialError),

    /// Broker-side failure.
    #[error("Broker error: {0}")]
    Broker(#[from] relay_broker::BrokerError),

    /// State store failure.
    #[error("Store error: {0}")]
    Store(#[from] relay_state::StoreError),

    /// Filesystem failure outside the best-effort paths.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Build a config error for a source path.
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check whether the error is the abort signal.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
