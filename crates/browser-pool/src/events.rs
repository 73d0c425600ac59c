//! Event Bus - pool lifecycle notifications
//!
//! Design: typed events over a tokio broadcast channel.
//! Publishing never blocks and never fails; slow subscribers just lag.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle transitions published by the resource manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    Connected,
    ConnectionLost,
    ResourceCreated { resource_id: String },
    ResourceClosed { resource_id: String },
    ResourceRecreated { old_resource_id: String, new_resource_id: String },
    PageOpened { resource_id: String, page_id: String },
    PageClosed { resource_id: String, page_id: String },
    CleanedUp,
}

pub struct EventBus {
    tx: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: PoolEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
