//! Fleet event broadcasting.
//!
//! The registry publishes every observable change on a Tokio broadcast
//! channel. Presentation layers call [`EventManager::subscribe`] and receive
//! events in the order the registry emitted them; a status change is always
//! published after the state transition it describes.

use crate::instance::{InstanceId, InstanceSnapshot};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened to an instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "instance", rename_all = "kebab-case")]
pub enum FleetEvent {
    /// Instance was created and registered.
    InstanceAdded(InstanceSnapshot),
    /// Instance was deleted; carries its last snapshot.
    InstanceRemoved(InstanceSnapshot),
    /// Instance changed lifecycle state.
    StatusChanged(InstanceSnapshot),
}

impl FleetEvent {
    pub fn snapshot(&self) -> &InstanceSnapshot {
        match self {
            FleetEvent::InstanceAdded(s)
            | FleetEvent::InstanceRemoved(s)
            | FleetEvent::StatusChanged(s) => s,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.snapshot().id()
    }

    /// Name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::InstanceAdded(_) => "instance-added",
            FleetEvent::InstanceRemoved(_) => "instance-removed",
            FleetEvent::StatusChanged(_) => "status-changed",
        }
    }
}

/// Broadcasts [`FleetEvent`]s to any number of subscribers.
///
/// Slow subscribers lag and miss the oldest events rather than blocking the
/// registry (see [`broadcast::error::RecvError::Lagged`]).
#[derive(Debug)]
pub struct EventManager {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Get a new receiver for fleet events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn send(&self, event: FleetEvent) {
        if self.sender.receiver_count() == 0 {
            tracing::trace!(event = event.kind(), "No fleet event receivers, event dropped");
            return;
        }

        let kind = event.kind();
        let id = event.instance_id();
        if let Err(e) = self.sender.send(event) {
            tracing::debug!(event = kind, instance_id = %id, error = %e, "Failed to broadcast fleet event");
        }
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
