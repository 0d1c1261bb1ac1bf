//! Typed publish/subscribe bus for registry events.
//!
//! Uses a [`tokio::sync::broadcast`] channel so that every subscriber
//! receives every event without any single subscriber blocking the others.
//! The bus is attached to the registry as a [`RegistryObserver`]; events
//! leave it in exactly the order the registry applied them.

use fieldhub_types::{RegistryEvent, RegistryObserver};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no subscribers for registry event {0}")]
    NoSubscribers(u64),
}

/// Shared registry-event bus.  Clones share the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers handed the event.
    pub fn publish(&self, event: RegistryEvent) -> Result<usize, BusError> {
        let revision = event.revision;
        self.sender
            .send(event)
            .map_err(|_| BusError::NoSubscribers(revision))
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RegistryObserver for EventBus {
    fn on_event(&self, event: &RegistryEvent) {
        if let Err(e) = self.publish(event.clone()) {
            // Nobody listening yet; the event is simply not observed.
            trace!(error = %e, "registry event dropped");
        }
    }
}
