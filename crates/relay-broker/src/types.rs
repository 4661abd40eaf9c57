// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Shared broker types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The AI CLI an agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCli {
    Claude,
    Codex,
    Gemini,
    Opencode,
    Droid,
    Aider,
    Goose,
    Cursor,
}

impl AgentCli {
    /// Get the executable name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Opencode => "opencode",
            Self::Droid => "droid",
            Self::Aider => "aider",
            Self::Goose => "goose",
            Self::Cursor => "cursor",
        }
    }
}

impl fmt::Display for AgentCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentCli {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            "opencode" => Ok(Self::Opencode),
            "droid" => Ok(Self::Droid),
            "aider" => Ok(Self::Aider),
            "goose" => Ok(Self::Goose),
            "cursor" => Ok(Self::Cursor),
            other => Err(format!("unknown agent cli: {}", other)),
        }
    }
}

/// Options for spawning an interactive agent on the broker.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Requested agent name. The broker may rename; the returned handle
    /// carries the final name.
    pub name: String,

    /// CLI to run.
    pub cli: AgentCli,

    /// Extra argv entries, e.g. a model selector.
    pub args: Vec<String>,

    /// Channels the agent should join.
    pub channels: Vec<String>,

    /// Task text handed to the agent at startup.
    pub task: String,

    /// Seconds of silence after which the broker may consider the agent
    /// idle.
    pub idle_threshold_secs: Option<u64>,
}

/// How an interactive agent left the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The agent self-terminated.
    Exit,

    /// The wait deadline elapsed first.
    Timeout,

    /// The caller released the agent.
    Released,
}

/// One chunk of raw agent output routed through the broker.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    /// Current agent name.
    pub name: String,

    /// Raw bytes as emitted, ANSI sequences included.
    pub chunk: Vec<u8>,
}

/// Error type for broker and messaging operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Spawning the agent process failed.
    #[error("Failed to spawn agent '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The CLI has no command form for the requested mode.
    #[error("CLI '{0}' does not support non-interactive execution")]
    UnsupportedCli(AgentCli),

    /// Channel operation failed.
    #[error("Channel operation failed: {0}")]
    Channel(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
