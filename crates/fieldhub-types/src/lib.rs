//! `fieldhub-types` – shared vocabulary of the gateway.
//!
//! # Modules
//!
//! - [`device`] – [`Address`], [`Unit`], [`Device`] and its state maps.
//! - [`event`] – [`RegistryEvent`] and the [`RegistryObserver`] interface.
//! - [`envelope`] – the realtime wire format ([`Envelope`],
//!   [`ChangeRequest`]).
//! - [`config`] – the durable [`ConfigDocument`].
//! - [`error`] – error enums shared by the other crates.

pub mod config;
pub mod device;
pub mod envelope;
pub mod error;
pub mod event;

pub use config::{
    AutoDiscovery, ConfigDocument, DeviceDescriptor, HttpSettings, MockSettings,
    PersistenceSettings, WsSettings,
};
pub use device::{Address, Device, DeviceLookup, DeviceState, StateChanges, Unit};
pub use envelope::{ChangeRequest, Envelope};
pub use error::{DiscoveryError, InvalidUnit, MessageError, PersistenceError, RegistryError};
pub use event::{RegistryEvent, RegistryEventKind, RegistryObserver, RegistrySnapshot};
