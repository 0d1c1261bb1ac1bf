//! Error types shared across the gateway crates.
//!
//! None of these are fatal: each is handled where it occurs and at most
//! logged.  The HTTP boundary only ever surfaces them as a 404.

use thiserror::Error;

use crate::device::{Address, DeviceLookup, Unit};

/// A unit number outside `1..=255`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unit {0} is outside 1..=255")]
pub struct InvalidUnit(pub u64);

/// Registry invariant violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unit {0} is already occupied")]
    UnitOccupied(Unit),
    #[error("device {0} is already registered")]
    DuplicateAddress(Address),
    #[error("device {0} not found")]
    NotFound(DeviceLookup),
}

/// Auto-discovery failures.  Each is one-shot: the report is dropped and no
/// retry is scheduled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no free unit left for device {0}")]
    AllocationExhausted(Address),
    #[error("device {0} is already registered")]
    AlreadyKnown(Address),
}

/// Failure to persist the config document.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write config to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A realtime message that could not be understood.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),
}
