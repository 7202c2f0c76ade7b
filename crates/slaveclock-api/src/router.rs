//! Axum router construction for the control API.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router for the control API.
///
/// The router includes:
/// - `GET /api/status` -- clock status
/// - `POST /api/dial` -- declare the dial reading
/// - `POST /api/fast-set` -- request a fast set
/// - `POST /api/stop` -- cancel and force relays off
/// - `POST /api/pulse` -- test pulse
///
/// CORS allows any origin so a page served from elsewhere on the LAN can
/// drive the clock.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/dial", post(handlers::set_dial))
        .route("/api/fast-set", post(handlers::fast_set))
        .route("/api/stop", post(handlers::stop))
        .route("/api/pulse", post(handlers::pulse))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
