//! Endpoint handlers and their route tables.

pub mod system;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;
use crate::vnc::handler::vnc_handler;

/// Versioned routes, mounted under `/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/vnc", get(vnc_handler))
}
