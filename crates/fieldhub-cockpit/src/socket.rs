//! The realtime WebSocket channel.
//!
//! A new connection subscribes to the broadcaster *before* asking the
//! gateway for a snapshot.  It then sends the snapshot as one `device:add`
//! and forwards only frames newer than that snapshot, so nothing is lost
//! or seen twice between the two.  When the broadcaster reports lost frames
//! the same catch-up is sent again.
//!
//! Inbound text frames are `{"device": …, "changes": {…}}` requests.  A
//! malformed one is logged and dropped; the connection stays open.

use std::time::Instant;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fieldhub_kernel::{GatewayError, GatewayHandle};
use fieldhub_middleware::{Delivery, Frame, Subscription};
use fieldhub_types::{ChangeRequest, RegistryError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::server::AppState;

/// `GET /` – upgrades to a WebSocket; a plain request gets a 404.
pub(crate) async fn upgrade(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| serve(socket, state)),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve(socket: WebSocket, state: AppState) {
    let id = Uuid::new_v4();
    let connected_at = Instant::now();
    let mut subscription = state.broadcaster.subscribe();
    info!(
        %id,
        subscribers = state.broadcaster.subscriber_count(),
        "subscriber connected"
    );

    let (mut sink, mut stream) = socket.split();
    if catch_up(&state.gateway, &mut subscription, &mut sink, id).await {
        loop {
            tokio::select! {
                delivery = subscription.next() => match delivery {
                    Some(Delivery::Frame(frame)) => {
                        if let Err(e) = sink.send(Message::Text(frame.text().into())).await {
                            debug!(%id, error = %e, "send failed");
                            break;
                        }
                    }
                    Some(Delivery::Resync) => {
                        if !catch_up(&state.gateway, &mut subscription, &mut sink, id).await {
                            break;
                        }
                    }
                    None => break,
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => handle_inbound(&state.gateway, id, text.as_str()).await,
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_inbound(&state.gateway, id, text).await,
                        Err(_) => warn!(%id, "discarding non-UTF-8 binary message"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%id, error = %e, "socket error");
                        break;
                    }
                },
            }
        }
    }

    info!(
        %id,
        seconds = connected_at.elapsed().as_secs_f64(),
        "subscriber disconnected"
    );
}

/// Send the whole registry as one `device:add` and skip every queued frame
/// it already covers.  Returns `false` when the connection should close.
async fn catch_up(
    gateway: &GatewayHandle,
    subscription: &mut Subscription,
    sink: &mut SplitSink<WebSocket, Message>,
    id: Uuid,
) -> bool {
    let snapshot = match gateway.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(%id, error = %e, "no snapshot for subscriber");
            return false;
        }
    };
    subscription.resume_after(snapshot.revision);

    let frame = match Frame::catch_up(&snapshot) {
        Ok(frame) => frame,
        Err(e) => {
            error!(%id, error = %e, "failed to serialize catch-up");
            return false;
        }
    };
    if sink.send(Message::Text(frame.text().into())).await.is_err() {
        return false;
    }
    debug!(%id, devices = snapshot.devices.len(), revision = snapshot.revision, "catch-up sent");
    true
}

/// Apply one inbound change request.  The resulting `device:change`
/// reaches every subscriber, the sender included, through the broadcaster.
async fn handle_inbound(gateway: &GatewayHandle, id: Uuid, text: &str) {
    let request = match ChangeRequest::parse(text) {
        Ok(request) => request,
        Err(e) => {
            warn!(%id, error = %e, "discarding inbound message");
            return;
        }
    };

    let device = request.device.clone();
    match gateway.apply_change(request).await {
        Ok(()) => debug!(%id, %device, "client change applied"),
        Err(GatewayError::Registry(RegistryError::NotFound(_))) => {
            warn!(%id, %device, "change for unknown device ignored");
        }
        Err(e) => warn!(%id, %device, error = %e, "client change rejected"),
    }
}
