//! Read-only device introspection over HTTP.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `GET` | `/devices` | 200, every device sorted by unit |
//! | `GET` | `/devices/{unit\|address}` | 200 with the device, 404 if unknown |
//! | other | either path above | 405 |
//! | any | anything else | 404 |
//!
//! Every response, errors included, carries permissive CORS headers.  JSON
//! bodies are pretty-printed with a two-space indent.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use fieldhub_kernel::GatewayError;
use fieldhub_types::DeviceLookup;
use serde::Serialize;
use tracing::{error, warn};

use crate::server::AppState;

const ALLOW_HEADERS: &str = "Access-Control-Allow-Headers, Origin, Accept, X-Requested-With, \
     Content-Type, Access-Control-Request-Method, Access-Control-Request-Headers";

pub(crate) fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/{key}", get(get_device))
}

async fn list_devices(State(state): State<AppState>) -> Response {
    match state.gateway.list().await {
        Ok(devices) => pretty_json(&devices),
        Err(e) => unavailable(e),
    }
}

async fn get_device(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let Some(lookup) = DeviceLookup::parse(&key) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.gateway.get(lookup).await {
        Ok(Some(device)) => pretty_json(&device),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => unavailable(e),
    }
}

pub(crate) async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Response mapper adding the CORS headers to everything the router emits.
pub(crate) async fn cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_REQUEST_METHOD,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("OPTIONS, GET"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}

fn pretty_json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// The coordinator is gone, which only happens while shutting down.
fn unavailable(error: GatewayError) -> Response {
    warn!(%error, "request during shutdown");
    StatusCode::SERVICE_UNAVAILABLE.into_response()
}
