//! Registry events and the observer interface used to deliver them.

use crate::device::{Address, Device, StateChanges};

/// What happened to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEventKind {
    Added(Device),
    Removed(Address),
    /// Carries only the delta that was applied, never the full state.
    Changed {
        address: Address,
        changes: StateChanges,
    },
}

/// A registry mutation together with the revision it produced.
///
/// Revisions increase by one per event, so a consumer holding a
/// [`RegistrySnapshot`] taken at revision `r` can drop every event with
/// `revision <= r`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEvent {
    pub revision: u64,
    pub kind: RegistryEventKind,
}

/// Point-in-time copy of every registered device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistrySnapshot {
    /// Revision of the last event reflected in `devices`.
    pub revision: u64,
    /// Sorted by unit.
    pub devices: Vec<Device>,
}

/// Receives every registry event synchronously, in mutation order.
///
/// Implementations must not block: the registry calls them while it is
/// being mutated.
pub trait RegistryObserver: Send + Sync {
    fn on_event(&self, event: &RegistryEvent);
}
