//! The daemon loop: sole scheduling authority over the relay lines.
//!
//! Each iteration:
//!
//! 1. give a pending fast set the chance to run to a terminal state (the
//!    loop is blocked for the whole session, so minute ticks never
//!    interleave with convergence pulses);
//! 2. sleep to the next wall-clock second boundary;
//! 3. on second `:00`, run the minute tick for that minute.
//!
//! [`Daemon::run`] repeats this until its shutdown future resolves, then
//! drives both lines off.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use slaveclock_store::StateStore;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cadence::{CadenceScheduler, MinuteOutcome};
use crate::config::{ClockConfig, ConfigError, RelayBackend, RelayConfig, TimingConfig};
use crate::control::ClockControl;
use crate::convergence::ConvergenceController;
use crate::pulse::{PulseSequencer, RELAYS_MAY_BE_ENERGIZED};
use crate::relay::{ActiveLevel, Line, RelayError, RelayLine, RelayPair, SysfsPin};
use crate::state::SharedState;
use crate::time::TimeSource;

/// Nanoseconds in one second.
const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Errors that stop the daemon from starting or shutting down cleanly.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration was rejected.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Relays could not be set up or forced off.
    #[error("relay error: {source}")]
    Relay {
        /// The underlying relay error.
        #[from]
        source: RelayError,
    },
}

/// Build the relay pair described by `config`. Both lines start off.
///
/// # Errors
///
/// Returns [`RelayError`] if a pin cannot be exported, configured, or
/// driven off.
pub fn relay_pair_from_config(config: &RelayConfig) -> Result<RelayPair, RelayError> {
    let level = ActiveLevel::from_active_high(config.active_high);
    match config.backend {
        RelayBackend::Sysfs => {
            let root = Path::new(&config.sysfs_root);
            let pin_a = SysfsPin::open(root, config.line_a_gpio)?;
            let pin_b = SysfsPin::open(root, config.line_b_gpio)?;
            Ok(RelayPair::new(
                RelayLine::new(Line::A, Box::new(pin_a), level)?,
                RelayLine::new(Line::B, Box::new(pin_b), level)?,
            ))
        }
        RelayBackend::Simulated => {
            let (pair, _, _) = crate::relay::simulated_pair(level)?;
            Ok(pair)
        }
    }
}

/// Time to sleep from `nanosecond` past a second to the next boundary.
///
/// Leap-second representations (`>= 1e9`) wait a full second.
fn until_next_second(nanosecond: u32) -> Duration {
    let into = if nanosecond < NANOS_PER_SECOND {
        nanosecond
    } else {
        0
    };
    Duration::from_nanos(u64::from(NANOS_PER_SECOND.saturating_sub(into)))
}

/// The scheduling loop and everything it drives.
#[derive(Debug)]
pub struct Daemon {
    shared: Arc<SharedState>,
    pulses: Arc<PulseSequencer>,
    timing: TimingConfig,
    cadence: CadenceScheduler,
    convergence: ConvergenceController,
}

impl Daemon {
    /// Assemble the loop over existing state and relays.
    pub fn new(
        shared: Arc<SharedState>,
        pulses: Arc<PulseSequencer>,
        timing: TimingConfig,
    ) -> Self {
        let cadence =
            CadenceScheduler::new(Arc::clone(&shared), Arc::clone(&pulses), timing.clone());
        let convergence =
            ConvergenceController::new(Arc::clone(&shared), Arc::clone(&pulses), timing.clone());
        Self {
            shared,
            pulses,
            timing,
            cadence,
            convergence,
        }
    }

    /// Validate `config`, restore state from `store`, and build the relays.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError`] if the configuration is invalid or the relays
    /// cannot be set up.
    pub fn from_config(
        config: &ClockConfig,
        store: Arc<dyn StateStore>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, DaemonError> {
        config.validate()?;
        let shared = Arc::new(SharedState::restore(store, time));
        let relays = relay_pair_from_config(&config.relays)?;
        info!(
            backend = ?config.relays.backend,
            line_a_gpio = config.relays.line_a_gpio,
            line_b_gpio = config.relays.line_b_gpio,
            active_high = config.relays.active_high,
            "Relays ready (both off)"
        );
        let pulses = Arc::new(PulseSequencer::new(Arc::new(relays)));
        Ok(Self::new(shared, pulses, config.timing.clone()))
    }

    /// Control-surface handle sharing this loop's state and relays.
    pub fn control(&self) -> ClockControl {
        ClockControl::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.pulses),
            &self.timing,
        )
    }

    /// Shared controller state.
    pub const fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// The pulse sequencer.
    pub const fn pulses(&self) -> &Arc<PulseSequencer> {
        &self.pulses
    }

    /// One loop iteration. Returns the minute tick's outcome if one ran.
    pub async fn step(&self) -> Option<MinuteOutcome> {
        if let Some(outcome) = self.convergence.run_pending().await {
            debug!(?outcome, "Fast-set session ended");
        }

        tokio::time::sleep(until_next_second(self.shared.now().nanosecond())).await;

        let now = self.shared.now();
        if now.second() != 0 {
            return None;
        }
        match self.cadence.minute_tick(now).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, minute = %now.format("%H:%M"), "Minute tick failed");
                let status = if self.pulses.all_off().is_ok() {
                    format!("Minute tick failed: {e}")
                } else {
                    format!("Minute tick failed: {e}. {RELAYS_MAY_BE_ENERGIZED}")
                };
                self.shared.set_status(status).await;
                None
            }
        }
    }

    /// Run until `shutdown` resolves, then force both lines off.
    ///
    /// A pulse in flight when shutdown arrives is cut short.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Relay`] if the final off write fails.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        info!("Daemon loop started");
        tokio::select! {
            () = shutdown => info!("Shutdown requested"),
            () = self.run_forever() => {}
        }

        if let Err(e) = self.pulses.all_off() {
            warn!(error = %e, "Relays may still be energized");
            return Err(e.into());
        }
        info!("Relays off; daemon loop stopped");
        Ok(())
    }

    async fn run_forever(&self) {
        loop {
            let _ = self.step().await;
        }
    }
}
