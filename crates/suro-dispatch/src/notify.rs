// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fire-and-forget notification channel.
//!
//! Two topic families are published:
//!
//! - `job:<run_id>` carries the serialized run after every status write.
//! - `optim:log:<run_id>` carries parsed solver log entries while a job runs.
//!
//! Delivery is at-most-once. Publishing with no subscribers drops the message.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::error;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// A message on a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    /// JSON text.
    pub payload: String,
}

/// Topic for run status snapshots.
pub fn job_topic(run_id: &str) -> String {
    format!("job:{run_id}")
}

/// Topic for live solver log entries.
pub fn log_topic(run_id: &str) -> String {
    format!("optim:log:{run_id}")
}

/// In-process fan-out notification bus.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer overflows.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a raw payload.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<String>) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(Notification {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Serialize `value` to JSON and publish it. Serialization failures are
    /// logged and the message is skipped.
    pub fn publish_json<T: Serialize>(&self, topic: impl Into<String>, value: &T) {
        let topic = topic.into();
        match serde_json::to_string(value) {
            Ok(payload) => self.publish(topic, payload),
            Err(e) => error!(topic = %topic, error = %e, "Failed to serialize notification"),
        }
    }

    /// Subscribe to every subsequent notification.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
