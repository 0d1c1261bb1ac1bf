//! `fieldhub-middleware` – moves registry events to realtime clients.
//!
//! Knows nothing about sockets or HTTP: it turns registry mutations into
//! serialized frames and hands them to whoever subscribes.
//!
//! # Modules
//!
//! - [`bus`] – [`EventBus`], the typed registry-event channel.  Attach it to
//!   the registry as an observer.
//! - [`broadcaster`] – [`Broadcaster`]: serializes events into wire frames,
//!   fans them out to every [`Subscription`] and keeps idle connections
//!   alive with pings.

pub mod broadcaster;
pub mod bus;

pub use broadcaster::{Broadcaster, Delivery, Frame, Subscription};
pub use bus::{BusError, EventBus};
