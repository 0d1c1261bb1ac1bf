//! `fieldhub-hal` – devices and the transports that report them.
//!
//! # Modules
//!
//! - [`registry`] – [`DeviceRegistry`]: the authoritative in-memory device
//!   map, enforcing unique units and addresses and emitting typed events.
//! - [`discovery`] – [`allocate`][discovery::allocate]: binds unknown
//!   addresses to the first free bus unit.
//! - [`source`] – the [`ReportSource`] adapter trait and [`Report`].
//! - [`sim`] – [`SimulatedSource`]: fabricated readings for headless runs.

pub mod discovery;
pub mod registry;
pub mod sim;
pub mod source;

pub use discovery::{Discovered, allocate};
pub use registry::DeviceRegistry;
pub use sim::SimulatedSource;
pub use source::{Report, ReportSource};
