//! Operations exposed to the control surface.
//!
//! [`ClockControl`] is the only handle the HTTP adapter holds. Mutating
//! operations only change shared state; the daemon loop turns requests into
//! pulses. The exceptions are stop, which forces both lines off on the spot,
//! and the ad-hoc test pulse.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TimingConfig;
use crate::dial::{DialError, DialReading};
use crate::pulse::{BurstSpec, PulseSequencer, PulseTarget};
use crate::relay::RelayError;
use crate::state::{ClockStatus, FastSetRequest, SharedState};

/// Shortest test pulse, in seconds.
pub const MIN_TEST_WIDTH_SECONDS: f64 = 0.05;

/// Longest test pulse, in seconds.
pub const MAX_TEST_WIDTH_SECONDS: f64 = 5.0;

/// Test pulse width used when the caller gives none.
pub const DEFAULT_TEST_WIDTH_SECONDS: f64 = 1.0;

/// Errors returned to the control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The dial reading was malformed or out of range.
    #[error(transparent)]
    Validation(#[from] DialError),

    /// A fast-set session owns the lines.
    #[error("fast set is running; test pulses are refused until it ends")]
    SessionRunning,

    /// A relay could not be switched.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// What an ad-hoc test pulse drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestTarget {
    /// Line A only.
    A,
    /// Line B only.
    B,
    /// Lines A and B together.
    Ab,
    /// The full correction burst, regardless of the hour.
    Burst,
}

/// Clamp a requested test width into the allowed range.
///
/// Non-finite input falls back to the default width.
pub fn clamp_test_width(seconds: f64) -> Duration {
    let seconds = if seconds.is_finite() {
        seconds.clamp(MIN_TEST_WIDTH_SECONDS, MAX_TEST_WIDTH_SECONDS)
    } else {
        DEFAULT_TEST_WIDTH_SECONDS
    };
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::from_secs(1))
}

/// Facade over shared state and the pulse sequencer.
#[derive(Debug)]
pub struct ClockControl {
    shared: Arc<SharedState>,
    pulses: Arc<PulseSequencer>,
    burst: BurstSpec,
}

impl ClockControl {
    /// Create the facade.
    pub const fn new(
        shared: Arc<SharedState>,
        pulses: Arc<PulseSequencer>,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            shared,
            pulses,
            burst: BurstSpec {
                pulses: timing.correction_pulses,
                interval: timing.correction_interval(),
                width: timing.correction_pulse_width(),
            },
        }
    }

    /// Current status.
    pub async fn status(&self) -> ClockStatus {
        self.shared.status().await
    }

    /// Declare the dial reading from `HH:MM` text.
    ///
    /// On a parse failure nothing changes.
    pub async fn set_dial(&self, text: &str) -> Result<ClockStatus, ControlError> {
        let reading: DialReading = text.parse().inspect_err(|e| {
            warn!(input = text, error = %e, "Rejected dial reading");
        })?;
        self.shared.set_dial_reading(reading).await;
        Ok(self.shared.status().await)
    }

    /// Ask the daemon loop to run a fast set.
    pub async fn request_fast_set(&self) -> FastSetRequest {
        let result = self.shared.request_fast_set().await;
        info!(?result, "FAST SET requested");
        result
    }

    /// Cancel any fast set and force both lines off.
    ///
    /// The lines are forced off even when nothing is running.
    pub async fn request_stop(&self) -> Result<(), ControlError> {
        self.shared.request_stop().await;
        info!("STOP requested");
        self.pulses.all_off()?;
        Ok(())
    }

    /// Emit an ad-hoc test pulse, blocking for its width.
    ///
    /// `width_seconds` is clamped to the allowed range; it is ignored for
    /// [`TestTarget::Burst`], which uses the configured burst shape. A burst
    /// holds the pulse lease throughout, so a fast set claimed meanwhile
    /// sends its first pulse only after the burst ends.
    pub async fn test_pulse(
        &self,
        target: TestTarget,
        width_seconds: Option<f64>,
    ) -> Result<(), ControlError> {
        if self.shared.is_running().await {
            warn!(?target, "Test pulse refused: fast set running");
            return Err(ControlError::SessionRunning);
        }

        let width = clamp_test_width(width_seconds.unwrap_or(DEFAULT_TEST_WIDTH_SECONDS));
        info!(?target, width_ms = width.as_millis(), "Test pulse");
        match target {
            TestTarget::A => self.pulses.pulse(PulseTarget::A, width).await?,
            TestTarget::B => self.pulses.pulse(PulseTarget::B, width).await?,
            TestTarget::Ab => self.pulses.pulse(PulseTarget::Ab, width).await?,
            TestTarget::Burst => self.pulses.burst(self.burst).await?,
        }
        Ok(())
    }
}
