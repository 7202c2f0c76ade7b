//! Control API server for the slave clock controller.
//!
//! This crate provides an Axum HTTP server exposing the control-surface
//! operations as JSON endpoints:
//!
//! - **`GET /api/status`** -- system time, estimated dial time, offset,
//!   stall counter, fast-set session state, and the current plan
//! - **`POST /api/dial`** -- declare what the dial currently reads
//! - **`POST /api/fast-set`** / **`POST /api/stop`** -- start or cancel a
//!   fast set
//! - **`POST /api/pulse`** -- ad-hoc test pulse or correction burst
//!
//! # Architecture
//!
//! Handlers only call into [`ClockControl`]. Requests change shared state;
//! the daemon loop does the pulsing. The test pulse endpoint is the one
//! handler that blocks for the pulse width.
//!
//! [`ClockControl`]: slaveclock_core::control::ClockControl

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
