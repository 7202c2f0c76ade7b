//! Pulse primitives on the excitation lines.
//!
//! A pulse is on, wait, off. The [`PulseSequencer`] guarantees:
//!
//! - two pulses never overlap (an async lease serializes emission from the
//!   daemon loop and the control surface);
//! - both lines are off when a pulse returns, whether it succeeded, failed
//!   part way, or its future was dropped mid-sleep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::relay::{RelayError, RelayPair};

/// Appended to operator status when forcing the lines off failed.
pub const RELAYS_MAY_BE_ENERGIZED: &str = "Relays may be energized.";

/// Which lines a pulse energizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseTarget {
    /// Line A only.
    A,
    /// Line B only.
    B,
    /// Lines A and B together.
    Ab,
}

impl fmt::Display for PulseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
            Self::Ab => f.write_str("A+B"),
        }
    }
}

/// Shape of a fixed-cadence A-only burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstSpec {
    /// Number of pulses.
    pub pulses: u32,
    /// Start-to-start spacing.
    pub interval: Duration,
    /// On-time of each pulse; less than `interval`.
    pub width: Duration,
}

/// De-energizes both lines when dropped unless disarmed.
struct OffGuard<'a> {
    relays: &'a RelayPair,
    armed: bool,
}

impl<'a> OffGuard<'a> {
    const fn new(relays: &'a RelayPair) -> Self {
        Self {
            relays,
            armed: true,
        }
    }

    fn finish(mut self) -> Result<(), RelayError> {
        self.armed = false;
        self.relays.all_off()
    }
}

impl Drop for OffGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.relays.all_off();
        }
    }
}

/// Emits pulses on the relay pair.
#[derive(Debug)]
pub struct PulseSequencer {
    relays: Arc<RelayPair>,
    lease: Mutex<()>,
}

impl PulseSequencer {
    /// Create a sequencer driving `relays`.
    pub fn new(relays: Arc<RelayPair>) -> Self {
        Self {
            relays,
            lease: Mutex::new(()),
        }
    }

    /// The underlying relays.
    pub const fn relays(&self) -> &Arc<RelayPair> {
        &self.relays
    }

    /// Emit one pulse of `width` on `target`.
    ///
    /// Waits for any pulse already in flight to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if a relay cannot be switched. Both lines
    /// are driven off before returning either way.
    pub async fn pulse(&self, target: PulseTarget, width: Duration) -> Result<(), RelayError> {
        let _lease = self.lease.lock().await;
        self.emit(target, width).await
    }

    /// Emit an A-only burst with pulse starts on fixed deadlines.
    ///
    /// Pulse `i` starts at `start + i * interval`, measured on the monotonic
    /// clock, so pulse widths never accumulate into drift. The lease is held
    /// for the whole burst; other pulses wait until it ends.
    ///
    /// # Errors
    ///
    /// Returns the first [`RelayError`]; the remaining pulses are skipped.
    pub async fn burst(&self, spec: BurstSpec) -> Result<(), RelayError> {
        let _lease = self.lease.lock().await;
        info!(
            pulses = spec.pulses,
            interval_ms = spec.interval.as_millis(),
            width_ms = spec.width.as_millis(),
            "Correction burst starting"
        );
        let start = Instant::now();
        for i in 0..spec.pulses {
            let deadline = spec
                .interval
                .checked_mul(i)
                .and_then(|offset| start.checked_add(offset));
            if let Some(deadline) = deadline {
                tokio::time::sleep_until(deadline).await;
            }
            self.emit(PulseTarget::A, spec.width).await?;
            info!(pulse = i.saturating_add(1), of = spec.pulses, "Correction pulse (A)");
        }
        Ok(())
    }

    /// On, wait, off. The caller holds the lease.
    async fn emit(&self, target: PulseTarget, width: Duration) -> Result<(), RelayError> {
        let guard = OffGuard::new(&self.relays);

        match target {
            PulseTarget::A => self.relays.a().on()?,
            PulseTarget::B => self.relays.b().on()?,
            PulseTarget::Ab => {
                self.relays.a().on()?;
                self.relays.b().on()?;
            }
        }
        tokio::time::sleep(width).await;

        guard.finish()?;
        debug!(%target, width_ms = width.as_millis(), "Pulse emitted");
        Ok(())
    }

    /// De-energize both lines immediately, without waiting for the lease.
    ///
    /// Used by stop requests and shutdown; a pulse in flight is cut short.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if either write fails.
    pub fn all_off(&self) -> Result<(), RelayError> {
        let result = self.relays.all_off();
        if let Err(ref e) = result {
            warn!(error = %e, "Forcing relays off failed");
        }
        result
    }
}
