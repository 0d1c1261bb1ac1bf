//! Auto-discovery allocator.
//!
//! [`allocate`] binds an unrecognized address to the lowest free unit by
//! attempting [`DeviceRegistry::add`] for every unit from 1 to 255 and
//! stopping at the first success.  Allocation is one-shot: when every unit is
//! taken the report is dropped and nothing is retried.

use fieldhub_types::{Address, Device, DeviceDescriptor, DiscoveryError, RegistryError, Unit};
use tracing::{error, info};

use crate::registry::DeviceRegistry;

/// Result of a successful allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    pub unit: Unit,
    /// Descriptor to append to the persisted config.
    pub descriptor: DeviceDescriptor,
}

/// Register `address` under the first free unit.
///
/// # Errors
///
/// * [`DiscoveryError::AlreadyKnown`] – the address is already registered;
///   nothing changes.
/// * [`DiscoveryError::AllocationExhausted`] – all 255 units are occupied;
///   the registry is left untouched.
pub fn allocate(registry: &mut DeviceRegistry, address: &Address) -> Result<Discovered, DiscoveryError> {
    if registry.contains(address) {
        return Err(DiscoveryError::AlreadyKnown(address.clone()));
    }

    for unit in Unit::all() {
        match registry.add(Device::new(address.clone(), unit)) {
            Ok(()) => {
                let descriptor = DeviceDescriptor::discovered(address.clone(), unit);
                info!(
                    id = descriptor.id.as_deref().unwrap_or_default(),
                    address = %address,
                    unit = %unit,
                    "mapped discovered device"
                );
                return Ok(Discovered { unit, descriptor });
            }
            Err(RegistryError::UnitOccupied(_)) => continue,
            Err(_) => return Err(DiscoveryError::AlreadyKnown(address.clone())),
        }
    }

    error!(address = %address, "failed to add discovered device: no free units");
    Err(DiscoveryError::AllocationExhausted(address.clone()))
}
