//! Normal per-minute cadence and the hourly correction burst.
//!
//! Every minute the dial gets an A pulse, plus a B pulse during minutes
//! 0-49 (before the cam starts its hour-rollover selection). At minute 59
//! a burst of A-only pulses guarantees the mechanism is carried through
//! the rollover. While the dial is ahead, minutes are withheld instead.

use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, info};

use crate::config::TimingConfig;
use crate::pulse::{BurstSpec, PulseSequencer, PulseTarget};
use crate::relay::RelayError;
use crate::state::{CalendarMinute, MinuteAction, SharedState};

/// Last minute of the range where both lines are driven.
const LAST_DUAL_LINE_MINUTE: u32 = 49;

/// Minute of the hour that triggers the correction burst.
const CORRECTION_MINUTE: u32 = 59;

/// What a minute tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteOutcome {
    /// The decision taken for this minute.
    pub action: MinuteAction,
    /// Whether the B line was pulsed.
    pub pulsed_b: bool,
    /// Whether the correction burst fired.
    pub burst_fired: bool,
}

/// Runs the normal once-per-minute pulse pattern.
#[derive(Debug)]
pub struct CadenceScheduler {
    shared: Arc<SharedState>,
    pulses: Arc<PulseSequencer>,
    timing: TimingConfig,
}

impl CadenceScheduler {
    /// Create a scheduler over shared state and the pulse sequencer.
    pub const fn new(
        shared: Arc<SharedState>,
        pulses: Arc<PulseSequencer>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            shared,
            pulses,
            timing,
        }
    }

    /// Burst shape from configuration.
    pub const fn burst_spec(&self) -> BurstSpec {
        BurstSpec {
            pulses: self.timing.correction_pulses,
            interval: self.timing.correction_interval(),
            width: self.timing.correction_pulse_width(),
        }
    }

    /// Handle the minute containing `now`.
    ///
    /// Safe to call any number of times per minute; only the first call
    /// does anything.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if a relay cannot be switched.
    pub async fn minute_tick(&self, now: NaiveDateTime) -> Result<MinuteOutcome, RelayError> {
        let minute = CalendarMinute::of(&now);
        let hhmm = now.format("%H:%M");
        let action = self.shared.claim_minute(minute).await;
        let mut outcome = MinuteOutcome {
            action,
            pulsed_b: false,
            burst_fired: false,
        };

        match action {
            MinuteAction::Duplicate => {
                debug!(minute = %hhmm, "Minute already processed");
                return Ok(outcome);
            }
            MinuteAction::SessionRunning => {
                info!(minute = %hhmm, "FAST SET running; skipping normal tick");
                return Ok(outcome);
            }
            MinuteAction::Stalled { remaining } => {
                info!(minute = %hhmm, remaining, "STALL (clock fast); no A/B pulses");
            }
            MinuteAction::Normal => {
                info!(minute = %hhmm, "Minute tick: A pulse");
                let width = self.timing.minute_pulse_width();
                self.pulses.pulse(PulseTarget::A, width).await?;
                if now.minute() <= LAST_DUAL_LINE_MINUTE {
                    info!(minute = %hhmm, "Minute tick: B pulse");
                    self.pulses.pulse(PulseTarget::B, width).await?;
                    outcome.pulsed_b = true;
                }
            }
        }

        if now.minute() == CORRECTION_MINUTE {
            tokio::time::sleep(self.timing.settle()).await;
            outcome.burst_fired = self.correction_burst_once_per_hour(now).await?;
        }
        Ok(outcome)
    }

    /// Fire the correction burst if `now` is minute 59 and this hour's burst
    /// has not fired yet. Returns whether it fired.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if a relay cannot be switched.
    pub async fn correction_burst_once_per_hour(
        &self,
        now: NaiveDateTime,
    ) -> Result<bool, RelayError> {
        if now.minute() != CORRECTION_MINUTE {
            return Ok(false);
        }
        let hour = CalendarMinute::of(&now).hour_key();
        if !self.shared.claim_correction_hour(hour).await {
            debug!(hour = hour.hour, "Correction burst already fired this hour");
            return Ok(false);
        }
        self.pulses.burst(self.burst_spec()).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use slaveclock_store::MemoryStore;

    use super::*;
    use crate::dial::DialReading;
    use crate::relay::{simulated_pair, ActiveLevel};
    use crate::time::{ManualTime, TimeSource};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    struct Fixture {
        shared: Arc<SharedState>,
        pulses: Arc<PulseSequencer>,
        time: Arc<ManualTime>,
        scheduler: CadenceScheduler,
    }

    fn fixture(hour: u32, minute: u32) -> Fixture {
        let time = Arc::new(ManualTime::new(at(hour, minute)));
        let shared = Arc::new(SharedState::new(Arc::new(MemoryStore::new()), time.clone()));
        let (pair, _, _) = simulated_pair(ActiveLevel::Low).unwrap();
        let pulses = Arc::new(PulseSequencer::new(Arc::new(pair)));
        let scheduler =
            CadenceScheduler::new(shared.clone(), pulses.clone(), TimingConfig::default());
        Fixture {
            shared,
            pulses,
            time,
            scheduler,
        }
    }

    fn activations(f: &Fixture) -> (u64, u64) {
        (
            f.pulses.relays().a().activations(),
            f.pulses.relays().b().activations(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn early_minute_pulses_both_lines() {
        let f = fixture(9, 10);
        let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
        assert_eq!(outcome.action, MinuteAction::Normal);
        assert!(outcome.pulsed_b);
        assert_eq!(activations(&f), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn late_minute_pulses_a_only() {
        let f = fixture(9, 50);
        let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
        assert!(!outcome.pulsed_b);
        assert!(!outcome.burst_fired);
        assert_eq!(activations(&f), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn minute_59_adds_correction_burst() {
        let f = fixture(9, 59);
        let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
        assert!(outcome.burst_fired);
        assert_eq!(activations(&f), (18, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_ticks_fire_burst_once_per_hour() {
        let f = fixture(9, 59);
        let now = f.time.now();
        f.scheduler.minute_tick(now).await.unwrap();
        let again = f.scheduler.minute_tick(now).await.unwrap();
        assert_eq!(again.action, MinuteAction::Duplicate);
        assert!(!f.scheduler.correction_burst_once_per_hour(now).await.unwrap());
        let later = now.with_second(30).unwrap();
        assert!(!f.scheduler.correction_burst_once_per_hour(later).await.unwrap());
        assert_eq!(activations(&f), (18, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn stall_withholds_pulses_then_aligns() {
        let f = fixture(12, 0);
        f.shared
            .set_dial_reading(DialReading::new(12, 5).unwrap())
            .await;
        let plan = f.shared.plan().await;
        assert_eq!(plan.stall_minutes, 5);
        f.shared.begin_stall(plan.stall_minutes, "stall").await;

        for expected in (0..5).rev() {
            f.time.advance_minutes(1);
            let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
            assert_eq!(outcome.action, MinuteAction::Stalled { remaining: expected });
        }

        assert_eq!(activations(&f), (0, 0));
        assert!(f.shared.plan().await.is_aligned());

        f.time.advance_minutes(1);
        let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
        assert_eq!(outcome.action, MinuteAction::Normal);
        assert!(f.shared.plan().await.is_aligned());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_minute_59_still_bursts() {
        let f = fixture(10, 58);
        f.shared
            .set_dial_reading(DialReading::new(11, 0).unwrap())
            .await;
        f.shared.begin_stall(2, "stall").await;
        f.time.advance_minutes(1);
        let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
        assert_eq!(outcome.action, MinuteAction::Stalled { remaining: 1 });
        assert!(outcome.burst_fired);
        assert_eq!(activations(&f), (17, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn running_session_skips_tick() {
        let f = fixture(9, 10);
        f.shared.request_fast_set().await;
        assert!(f.shared.claim_session().await);
        let outcome = f.scheduler.minute_tick(f.time.now()).await.unwrap();
        assert_eq!(outcome.action, MinuteAction::SessionRunning);
        assert_eq!(activations(&f), (0, 0));
    }
}
