// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Broker and messaging interfaces for the Relay workflow orchestrator.
//!
//! The engine talks to agents through the [`Broker`] and [`Messaging`]
//! traits; the `local` module provides in-process implementations used by
//! tests and single-host runs.

pub mod command;
pub mod local;
pub mod process;
pub mod traits;
pub mod types;

// Re-exports
pub use command::one_shot_command;
pub use local::{LocalBroker, RecordingMessaging, EXIT_TOKEN};
pub use process::{terminate_gracefully, KILL_GRACE};
pub use traits::{
    AgentHandle, Broker, BrokerRef, HeartbeatGuard, Messaging, MessagingRef, OutputSink,
};
pub use types::{AgentCli, BrokerError, ExitReason, Result, SpawnOptions, WorkerOutput};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
