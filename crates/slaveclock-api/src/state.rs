//! Shared state handed to every handler.

use std::sync::Arc;

use slaveclock_core::control::ClockControl;

/// Application state for the control API.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Control-surface facade shared with the daemon loop.
    pub control: Arc<ClockControl>,
}

impl AppState {
    /// Wrap a control handle.
    pub const fn new(control: Arc<ClockControl>) -> Self {
        Self { control }
    }
}
