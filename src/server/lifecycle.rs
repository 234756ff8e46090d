use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Maximum number of lifecycle events kept per instance.
pub const MAX_LIFECYCLE_EVENTS: usize = 1000;

/// Lifecycle state of an instance.
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
///                 \          \
///                  +----------+--> Crashed -> Starting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// No process
    #[default]
    Stopped,
    /// Process is being launched
    Starting,
    /// Process is running
    Running,
    /// Stop command sent, waiting for exit
    Stopping,
    /// Start failed or process exited without being asked to
    Crashed,
}

impl InstanceState {
    /// Whether a process exists or is being created/torn down.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Crashed => "crashed",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEvent {
    /// Process spawned
    Started,
    /// Engine reported that initialization completed
    Ready,
    /// Process exited after a stop request
    Stopped {
        /// Whether the process had to be killed
        forced: bool,
    },
    /// Process exited unexpectedly
    Crashed,
    /// Process could not be started
    StartFailed,
}

/// Lifecycle event record
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleRecord {
    /// Event type
    pub event: LifecycleEvent,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event details
    pub details: Option<String>,
}

/// Bounded, per-instance history of lifecycle events.
#[derive(Debug, Default)]
pub struct LifecycleHistory {
    events: Mutex<VecDeque<LifecycleRecord>>,
}

impl LifecycleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, dropping the oldest one past [`MAX_LIFECYCLE_EVENTS`].
    pub fn record_event(&self, event: LifecycleEvent, details: Option<String>) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle events".to_string()))?;

        events.push_back(LifecycleRecord {
            event,
            timestamp: Utc::now(),
            details,
        });
        while events.len() > MAX_LIFECYCLE_EVENTS {
            events.pop_front();
        }

        Ok(())
    }

    /// Recent events, newest first.
    pub fn events(&self, limit: Option<usize>) -> Result<Vec<LifecycleRecord>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle events".to_string()))?;

        let limit = limit.unwrap_or(events.len());
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}
