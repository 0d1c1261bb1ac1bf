//! `fieldhub-kernel` – coordination and durability.
//!
//! Owns the mutable heart of the gateway and makes sure it is only ever
//! touched from one place at a time.
//!
//! # Modules
//!
//! - [`gateway`] – [`Gateway`]: the coordinator task owning the registry and
//!   the config document, reached through a cloneable [`GatewayHandle`].
//! - [`persistence`] – [`PersistenceScheduler`]: debounced, single-writer
//!   saving of the config document through a [`ConfigStore`].
//! - [`id`] – [`IdGenerator`][id::IdGenerator]: sequential labels for
//!   devices configured without an id.

pub mod gateway;
pub mod id;
pub mod persistence;

pub use gateway::{Gateway, GatewayError, GatewayHandle};
pub use persistence::{ConfigStore, FileStore, PersistenceHandle, PersistenceScheduler, WriteState};
