//! Axum handler for the console endpoint.

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use super::session::Session;
use crate::app_state::AppState;
use crate::error::SidecarError;

/// `GET /v1/vnc` — Upgrade to a WebSocket bridged to the VM's VNC socket.
///
/// The backend socket is resolved and dialed before the upgrade is
/// accepted, so a missing VM is reported as a plain HTTP error.
///
/// # Errors
///
/// Returns [`SidecarError`] if the socket cannot be found or dialed, or the
/// handshake is invalid.
#[utoipa::path(
    get,
    path = "/v1/vnc",
    tag = "VNC",
    operation_id = "v1VNC",
    summary = "Open a websocket connection to connect to VNC.",
    description = "Upgrades the request to a WebSocket using the `plain.kubevirt.io` subprotocol and relays raw bytes to the VM's VNC socket.",
    responses(
        (status = 101, description = "Switching protocols; the connection now carries VNC bytes"),
        (status = 400, description = "Invalid handshake or missing subprotocol", body = crate::error::ErrorResponse),
        (status = 502, description = "VNC socket could not be dialed", body = crate::error::ErrorResponse),
        (status = 503, description = "No VM directory found", body = crate::error::ErrorResponse),
    )
)]
pub async fn vnc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, SidecarError> {
    let mut session = Session::new(state.shutdown.child_token());
    let span = tracing::info_span!("vnc_session", id = %session.id());
    tracing::info!(parent: &span, "inbound VNC request");

    async move {
        let backend = session.connect(&state.locator).await?;
        // On error `backend` is dropped here, closing the dialed socket.
        let upgrade = session.upgrade(&state.upgrader, &headers, upgrade)?;

        let chunk_size = state.upgrader.buffer_size();
        let sessions = state.sessions.clone();
        let session_span = tracing::Span::current();
        let response = upgrade
            .on_failed_upgrade({
                let span = session_span.clone();
                move |err: axum::Error| {
                    span.in_scope(|| tracing::warn!(error = %err, "websocket upgrade failed"));
                }
            })
            .on_upgrade(move |socket| {
                sessions.track_future(
                    async move {
                        // Errors are already logged by the session.
                        let _ = session.stream(socket, backend, chunk_size).await;
                    }
                    .instrument(session_span),
                )
            });
        Ok(response.into_response())
    }
    .instrument(span)
    .await
}
