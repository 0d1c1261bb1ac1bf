//! [`DeviceRegistry`] – the authoritative map of known devices.
//!
//! Devices are keyed by [`Address`] and bound to a unique [`Unit`].  Every
//! successful mutation bumps the registry revision and is reported to each
//! attached [`RegistryObserver`] before the call returns, so observers see
//! events in exactly the order they were applied.
//!
//! The registry performs no I/O and never suspends.  It is owned by the
//! gateway coordinator; nothing else mutates it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fieldhub_types::{
    Address, Device, DeviceLookup, RegistryError, RegistryEvent, RegistryEventKind,
    RegistryObserver, RegistrySnapshot, StateChanges, Unit,
};
use tracing::debug;

/// In-memory device map with unit and address uniqueness.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<Address, Device>,
    units: HashMap<Unit, Address>,
    observers: Vec<Arc<dyn RegistryObserver>>,
    revision: u64,
}

impl DeviceRegistry {
    /// Create an empty registry with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer.  It receives every event emitted from now on.
    pub fn observe(&mut self, observer: Arc<dyn RegistryObserver>) {
        self.observers.push(observer);
    }

    /// Insert `device` and emit [`RegistryEventKind::Added`].
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnitOccupied`] when the unit is taken, otherwise
    /// [`RegistryError::DuplicateAddress`] when the address is known.  The
    /// registry is unchanged on error and nothing is emitted.
    pub fn add(&mut self, device: Device) -> Result<(), RegistryError> {
        if self.units.contains_key(&device.unit) {
            return Err(RegistryError::UnitOccupied(device.unit));
        }
        if self.devices.contains_key(&device.address) {
            return Err(RegistryError::DuplicateAddress(device.address));
        }

        self.units.insert(device.unit, device.address.clone());
        self.devices.insert(device.address.clone(), device.clone());
        debug!(address = %device.address, unit = %device.unit, "device added");
        self.emit(RegistryEventKind::Added(device));
        Ok(())
    }

    /// Delete the device at `address` and emit [`RegistryEventKind::Removed`].
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no such device exists.
    pub fn remove(&mut self, address: &Address) -> Result<Device, RegistryError> {
        let device = self
            .devices
            .remove(address)
            .ok_or_else(|| RegistryError::NotFound(address.clone().into()))?;
        self.units.remove(&device.unit);
        debug!(address = %address, unit = %device.unit, "device removed");
        self.emit(RegistryEventKind::Removed(address.clone()));
        Ok(device)
    }

    /// Find a device by address or by unit.
    pub fn get(&self, lookup: &DeviceLookup) -> Option<&Device> {
        match lookup {
            DeviceLookup::Address(address) => self.devices.get(address),
            DeviceLookup::Unit(unit) => self.units.get(unit).and_then(|a| self.devices.get(a)),
        }
    }

    /// Whether a device with this address is registered.
    pub fn contains(&self, address: &Address) -> bool {
        self.devices.contains_key(address)
    }

    /// Copy of every device, sorted by unit.
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.unit);
        devices
    }

    /// [`list`](Self::list) paired with the current revision.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            revision: self.revision,
            devices: self.list(),
        }
    }

    /// Merge `changes` into the device's state channel by channel, refresh
    /// `last_seen_at`, and emit [`RegistryEventKind::Changed`] carrying only
    /// `changes`.
    ///
    /// The event is emitted even for an empty change set.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no such device exists.
    pub fn apply_change(
        &mut self,
        address: &Address,
        changes: StateChanges,
    ) -> Result<(), RegistryError> {
        let device = self.device_mut(address)?;
        device.merge(&changes);
        device.last_seen_at = Some(Utc::now());

        self.emit(RegistryEventKind::Changed {
            address: address.clone(),
            changes,
        });
        Ok(())
    }

    /// Refresh `last_seen_at` only.  State is untouched and nothing is
    /// emitted.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no such device exists.
    pub fn touch(&mut self, address: &Address) -> Result<(), RegistryError> {
        self.device_mut(address)?.last_seen_at = Some(Utc::now());
        Ok(())
    }

    fn device_mut(&mut self, address: &Address) -> Result<&mut Device, RegistryError> {
        self.devices
            .get_mut(address)
            .ok_or_else(|| RegistryError::NotFound(address.clone().into()))
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Revision of the most recent event (`0` before any mutation).
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn emit(&mut self, kind: RegistryEventKind) {
        self.revision += 1;
        let event = RegistryEvent {
            revision: self.revision,
            kind,
        };
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}
