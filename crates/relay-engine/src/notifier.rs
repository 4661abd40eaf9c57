// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Best-effort progress posts to the run's channel.

use relay_broker::MessagingRef;
use relay_state::{StepRecord, StepStatus};
use tracing::debug;

/// Longest single channel message; longer output is split into numbered
/// chunks.
const MAX_MESSAGE_LEN: usize = 4000;

/// Posts human-readable progress to the external channel. Every transport
/// error is swallowed.
pub struct ChannelNotifier {
    messaging: MessagingRef,
    channel: Option<String>,
}

impl ChannelNotifier {
    /// Create a notifier posting to `channel`. With `None` every post is a
    /// no-op.
    pub fn new(messaging: MessagingRef, channel: Option<String>) -> Self {
        Self { messaging, channel }
    }

    /// Post text, chunking when it exceeds the message limit.
    pub async fn post(&self, text: &str) {
        let Some(channel) = &self.channel else {
            return;
        };

        for chunk in chunk_message(text, MAX_MESSAGE_LEN) {
            if let Err(e) = self.messaging.send_to_channel(channel, &chunk).await {
                debug!(channel = %channel, error = %e, "Channel post failed");
                return;
            }
        }
    }

    /// Announce a step entering execution.
    pub async fn step_started(&self, step: &str, agent: &str) {
        self.post(&format!("Step \"{}\" started on {}", step, agent))
            .await;
    }

    /// Announce a completed step.
    pub async fn step_completed(&self, step: &str) {
        self.post(&format!("Step \"{}\" completed", step)).await;
    }

    /// Announce a failed step.
    pub async fn step_failed(&self, step: &str, error: &str) {
        self.post(&format!("Step \"{}\" failed: {}", step, error))
            .await;
    }

    /// Post the closing report of a successful run.
    pub async fn completion_report(&self, workflow: &str, steps: &[StepRecord]) {
        let mut report = format!("Workflow \"{}\" completed\n", workflow);
        report.push_str(&step_summary(steps, false));
        self.post(&report).await;
    }

    /// Post the closing report of a failed run, with per-step errors.
    pub async fn failure_report(&self, workflow: &str, steps: &[StepRecord], error: &str) {
        let mut report = format!("Workflow \"{}\" FAILED: {}\n", workflow, error);
        report.push_str(&step_summary(steps, true));
        self.post(&report).await;
    }
}

fn step_summary(steps: &[StepRecord], with_errors: bool) -> String {
    let mut lines = Vec::new();
    for step in steps {
        let line = match step.status {
            StepStatus::Completed if step.retry_count > 0 => {
                format!("  ✓ {}: passed ({} retries)", step.step_name, step.retry_count)
            }
            StepStatus::Completed => format!("  ✓ {}: passed", step.step_name),
            StepStatus::Failed => {
                let mut line = format!("  ✗ {}: FAILED", step.step_name);
                if with_errors {
                    if let Some(error) = &step.error {
                        line.push_str(&format!(" ({})", error));
                    }
                }
                line
            }
            StepStatus::Skipped => format!("  - {}: skipped", step.step_name),
            other => format!("  ? {}: {}", step.step_name, other.as_str()),
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Split a message into numbered chunks of at most `max` characters.
fn chunk_message(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = max.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        pieces.push(&rest[..end]);
        rest = &rest[end..];
    }

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| format!("[{}/{}] {}", i + 1, total, piece))
        .collect()
}
