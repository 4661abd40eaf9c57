// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Typed engine events.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Every event the engine emits, as a discriminated union.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    RunCreated { run_id: Uuid },
    RunStarted { run_id: Uuid },
    RunCompleted { run_id: Uuid },
    RunFailed { run_id: Uuid, error: String },
    RunCancelled { run_id: Uuid },
    StepStarted { run_id: Uuid, step: String },
    StepCompleted { run_id: Uuid, step: String },
    StepFailed { run_id: Uuid, step: String, error: String },
    StepRetrying { run_id: Uuid, step: String, attempt: u32 },
    StepSkipped { run_id: Uuid, step: String, reason: String },
}

impl EngineEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunCreated { .. } => "run:created",
            Self::RunStarted { .. } => "run:started",
            Self::RunCompleted { .. } => "run:completed",
            Self::RunFailed { .. } => "run:failed",
            Self::RunCancelled { .. } => "run:cancelled",
            Self::StepStarted { .. } => "step:started",
            Self::StepCompleted { .. } => "step:completed",
            Self::StepFailed { .. } => "step:failed",
            Self::StepRetrying { .. } => "step:retrying",
            Self::StepSkipped { .. } => "step:skipped",
        }
    }

    /// Run the event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunCreated { run_id }
            | Self::RunStarted { run_id }
            | Self::RunCompleted { run_id }
            | Self::RunFailed { run_id, .. }
            | Self::RunCancelled { run_id }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::StepRetrying { run_id, .. }
            | Self::StepSkipped { run_id, .. } => *run_id,
        }
    }

    /// Step name for step-scoped events.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepRetrying { step, .. }
            | Self::StepSkipped { step, .. } => Some(step),
            _ => None,
        }
    }
}

type Subscriber = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Synchronous fan-out of engine events to subscribers.
#[derive(Default, Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for all events.
    pub fn subscribe(&self, subscriber: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    /// Deliver an event to every subscriber, in registration order.
    pub fn emit(&self, event: EngineEvent) {
        tracing::debug!(event = event.name(), run_id = %event.run_id(), "Engine event");
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber(&event);
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! Event collection helper for tests.

    use super::*;
    use parking_lot::Mutex;

    /// Subscribe a collector; returns the shared event list.
    pub fn collect(bus: &EventBus) -> Arc<Mutex<Vec<EngineEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(move |event| sink.lock().push(event.clone()));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let id = Uuid::new_v4();
        assert_eq!(EngineEvent::RunStarted { run_id: id }.name(), "run:started");
        assert_eq!(
            EngineEvent::StepSkipped {
                run_id: id,
                step: "s".into(),
                reason: "r".into()
            }
            .name(),
            "step:skipped"
        );
    }

    #[test]
    fn test_emit_reaches_subscribers_in_order() {
        let bus = EventBus::new();
        let events = test_support::collect(&bus);

        let id = Uuid::new_v4();
        bus.emit(EngineEvent::RunStarted { run_id: id });
        bus.emit(EngineEvent::StepStarted {
            run_id: id,
            step: "plan".into(),
        });

        let seen = events.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name(), "run:started");
        assert_eq!(seen[1].step(), Some("plan"));
    }
}
