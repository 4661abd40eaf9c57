// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Broker and messaging trait definitions.

use crate::types::{ExitReason, Result, SpawnOptions, WorkerOutput};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Callback receiving raw output chunks from broker-managed agents.
pub type OutputSink = Arc<dyn Fn(WorkerOutput) + Send + Sync>;

/// Spawns and manages interactive agents.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Spawn an interactive agent. The broker may rename the agent; the
    /// returned handle carries the final name.
    async fn spawn_pty(&self, opts: SpawnOptions) -> Result<Box<dyn AgentHandle>>;

    /// Install the sink that receives every agent's raw output chunks.
    fn set_output_sink(&self, sink: OutputSink);

    /// Tear down all managed agents.
    async fn shutdown(&self) -> Result<()>;
}

/// Handle to one spawned interactive agent.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Final agent name as assigned by the broker.
    fn name(&self) -> &str;

    /// OS process id, if the broker exposes one.
    fn pid(&self) -> Option<u32>;

    /// Wait for the agent to leave, bounded by `timeout`.
    async fn wait_for_exit(&self, timeout: Duration) -> ExitReason;

    /// Release the agent: detach and terminate it.
    async fn release(&self);
}

/// Multi-party message stream the engine posts progress to.
///
/// Every call must be idempotent with respect to re-entry and fast enough
/// for fire-and-forget use.
#[async_trait]
pub trait Messaging: Send + Sync {
    /// Create a channel. Creating an existing channel is a no-op.
    async fn create_channel(&self, name: &str, description: Option<&str>) -> Result<()>;

    /// Join a channel.
    async fn join_channel(&self, name: &str) -> Result<()>;

    /// Invite an agent into a channel.
    async fn invite_to_channel(&self, channel: &str, agent: &str) -> Result<()>;

    /// Post text to a channel.
    async fn send_to_channel(&self, channel: &str, text: &str) -> Result<()>;

    /// Register an agent that lives outside the broker.
    async fn register_external_agent(&self, name: &str, description: &str) -> Result<()>;

    /// Start a liveness heartbeat. Dropping the guard stops it.
    fn start_heartbeat(&self) -> HeartbeatGuard;
}

/// Type alias for Arc-wrapped Broker.
pub type BrokerRef = Arc<dyn Broker>;

/// Type alias for Arc-wrapped Messaging.
pub type MessagingRef = Arc<dyn Messaging>;

/// Stops a heartbeat when invoked or dropped. Stopping twice is a no-op.
pub struct HeartbeatGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl HeartbeatGuard {
    /// Wrap a stop closure.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// A guard that does nothing.
    pub fn noop() -> Self {
        Self { stop: None }
    }

    /// Stop the heartbeat now.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_heartbeat_guard_stops_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let guard = HeartbeatGuard::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        guard.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heartbeat_guard_stops_on_drop() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        {
            let _guard = HeartbeatGuard::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
