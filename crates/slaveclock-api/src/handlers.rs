//! Control API handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | Current clock status |
//! | `POST` | `/api/dial` | Declare the current dial reading |
//! | `POST` | `/api/fast-set` | Request a fast set |
//! | `POST` | `/api/stop` | Cancel a fast set and force the relays off |
//! | `POST` | `/api/pulse` | Ad-hoc test pulse |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use slaveclock_core::control::TestTarget;
use slaveclock_core::state::{ClockStatus, FastSetRequest};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/dial`.
#[derive(Debug, Deserialize)]
pub struct SetDialRequest {
    /// What the dial reads now, as `HH:MM`.
    pub reading: String,
}

/// Request body for `POST /api/pulse`.
#[derive(Debug, Deserialize)]
pub struct PulseRequest {
    /// Which line(s) to pulse, or `burst`.
    pub target: TestTarget,
    /// Pulse width in seconds; clamped to 0.05..=5.0, default 1.0.
    #[serde(default)]
    pub width_seconds: Option<f64>,
}

/// Generic command response.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// Whether the command was applied.
    pub ok: bool,
    /// Human-readable message.
    pub message: String,
}

impl CommandResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Current system time, estimated dial time, and fast-set state.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ClockStatus> {
    Json(state.control.status().await)
}

// ---------------------------------------------------------------------------
// POST /api/dial
// ---------------------------------------------------------------------------

/// Declare what the dial reads now.
///
/// Returns the updated status, or 400 if the reading is malformed.
pub async fn set_dial(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SetDialRequest>, JsonRejection>,
) -> Result<Json<ClockStatus>, ApiError> {
    let Json(request) = body?;
    let status = state.control.set_dial(&request.reading).await?;
    Ok(Json(status))
}

// ---------------------------------------------------------------------------
// POST /api/fast-set
// ---------------------------------------------------------------------------

/// Ask the daemon loop to bring the dial into line.
///
/// A request while a fast set is already running changes nothing.
pub async fn fast_set(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    match state.control.request_fast_set().await {
        FastSetRequest::Accepted => CommandResponse::ok("Fast set requested"),
        FastSetRequest::AlreadyRunning => CommandResponse::ok("Fast set already running"),
    }
}

// ---------------------------------------------------------------------------
// POST /api/stop
// ---------------------------------------------------------------------------

/// Cancel any fast set and force both relays off.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<CommandResponse>, ApiError> {
    state.control.request_stop().await?;
    Ok(CommandResponse::ok("Stop requested; relays off"))
}

// ---------------------------------------------------------------------------
// POST /api/pulse
// ---------------------------------------------------------------------------

/// Emit a test pulse and respond once it has finished.
///
/// Returns 409 while a fast set is running.
pub async fn pulse(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PulseRequest>, JsonRejection>,
) -> Result<Json<CommandResponse>, ApiError> {
    let Json(request) = body?;
    info!(
        pulse_target = ?request.target,
        width_seconds = ?request.width_seconds,
        "Test pulse requested"
    );
    state
        .control
        .test_pulse(request.target, request.width_seconds)
        .await?;
    Ok(CommandResponse::ok(format!("Test pulse {:?} done", request.target)))
}
