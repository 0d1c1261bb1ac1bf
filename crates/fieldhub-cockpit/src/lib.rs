//! `fieldhub-cockpit` – HTTP and WebSocket front end.
//!
//! Boots an [axum] server (default `0.0.0.0:8080`) that:
//!
//! 1. **Serves** read-only device introspection under `/devices`
//!    with permissive CORS headers and pretty-printed JSON.
//!
//! 2. **Streams** registry changes to every WebSocket client connected at
//!    `/`, starting with a `device:add` catch-up of the whole registry.
//!
//! 3. **Accepts** `{"device": …, "changes": {…}}` messages from clients and
//!    applies them through the gateway, which echoes the resulting
//!    `device:change` to all clients.
//!
//! The server holds no device state of its own; it only talks to a
//! [`GatewayHandle`][fieldhub_kernel::GatewayHandle] and a
//! [`Broadcaster`][fieldhub_middleware::Broadcaster].

mod routes;
pub mod server;
mod socket;

pub use server::{BoundServer, CockpitServer, ServerError, shares_http_listener};
