//! Fast-set convergence: catch a slow dial up, or hand a fast one to stall.
//!
//! A session runs to a terminal [`ConvergenceOutcome`] inside the daemon
//! loop. Each iteration re-plans from the current time, because system
//! time keeps moving while the dial is being driven:
//!
//! 1. wall-clock cap exceeded => [`ConvergenceOutcome::TimedOut`]
//! 2. stop requested => [`ConvergenceOutcome::Cancelled`]
//! 3. dial ahead => hand the stall to the minute tick, [`ConvergenceOutcome::Stalling`]
//! 4. dial aligned => [`ConvergenceOutcome::Completed`]
//! 5. another pulse would exceed the cap => [`ConvergenceOutcome::PulseCapExceeded`]
//! 6. otherwise one A+B pulse, one minute of advance, wait out the interval
//!
//! Every terminal state drives both lines off and returns the session to
//! idle. Nothing is retried automatically.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::TimingConfig;
use crate::pulse::{PulseSequencer, PulseTarget, RELAYS_MAY_BE_ENERGIZED};
use crate::state::SharedState;

/// How a fast-set session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    /// The dial caught up with system time.
    Completed {
        /// Pulses sent.
        pulses: u32,
    },
    /// The dial is ahead; the minute tick will withhold pulses.
    Stalling {
        /// Minutes to withhold.
        stall_minutes: u32,
        /// Pulses sent before the hand-off.
        pulses: u32,
    },
    /// A stop request ended the session.
    Cancelled {
        /// Pulses sent before cancellation.
        pulses: u32,
    },
    /// The wall-clock cap was exceeded.
    TimedOut {
        /// Pulses sent.
        pulses: u32,
        /// Time spent in the session.
        elapsed: Duration,
    },
    /// The dial still needed pulses after the pulse cap was reached.
    PulseCapExceeded {
        /// Pulses sent (equal to the cap).
        pulses: u32,
    },
    /// A relay could not be switched.
    RelayFault {
        /// Pulses sent before the fault.
        pulses: u32,
        /// Description of the relay error.
        message: String,
    },
}

impl ConvergenceOutcome {
    /// Pulses sent during the session.
    pub const fn pulses(&self) -> u32 {
        match self {
            Self::Completed { pulses }
            | Self::Stalling { pulses, .. }
            | Self::Cancelled { pulses }
            | Self::TimedOut { pulses, .. }
            | Self::PulseCapExceeded { pulses }
            | Self::RelayFault { pulses, .. } => *pulses,
        }
    }

    /// Whether the session ended in failure.
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TimedOut { .. } | Self::PulseCapExceeded { .. } | Self::RelayFault { .. }
        )
    }

    /// Status line shown on the control surface.
    pub fn status_text(&self) -> String {
        match self {
            Self::Completed { pulses: 0 } => String::from("Already aligned (no action)."),
            Self::Completed { pulses } => {
                format!("FAST SET complete (pulses sent: {pulses}).")
            }
            Self::Stalling { stall_minutes, .. } => {
                format!("Dial is {stall_minutes} min fast: will STALL until aligned.")
            }
            Self::Cancelled { .. } => String::from("FAST SET cancelled by user."),
            Self::TimedOut { elapsed, .. } => format!(
                "FAST SET error: timeout reached after {}s",
                elapsed.as_secs()
            ),
            Self::PulseCapExceeded { pulses } => {
                format!("FAST SET error: pulse cap reached ({pulses})")
            }
            Self::RelayFault { message, .. } => format!("FAST SET error: {message}"),
        }
    }
}

/// Drives fast-set sessions.
#[derive(Debug)]
pub struct ConvergenceController {
    shared: Arc<SharedState>,
    pulses: Arc<PulseSequencer>,
    timing: TimingConfig,
}

impl ConvergenceController {
    /// Create a controller over shared state and the pulse sequencer.
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

    /// Run a pending fast-set request to completion.
    ///
    /// Returns `None` if nothing was pending (or a session is already
    /// running). Blocks for the whole session otherwise.
    pub async fn run_pending(&self) -> Option<ConvergenceOutcome> {
        if !self.shared.claim_session().await {
            return None;
        }

        let outcome = self.converge().await;

        let lines_off = self.pulses.all_off().is_ok();
        match &outcome {
            ConvergenceOutcome::Completed { pulses } => {
                info!(pulses, "FAST SET complete");
            }
            ConvergenceOutcome::Stalling {
                stall_minutes,
                pulses,
            } => info!(stall_minutes, pulses, "FAST SET: dial is fast -> stalling (no pulses)"),
            ConvergenceOutcome::Cancelled { pulses } => {
                info!(pulses, "FAST SET cancelled by user");
            }
            failure => error!(
                pulses = failure.pulses(),
                status = %failure.status_text(),
                "FAST SET failed"
            ),
        }
        let mut status = outcome.status_text();
        if !lines_off {
            error!("FAST SET ended but the relays could not be forced off");
            status.push(' ');
            status.push_str(RELAYS_MAY_BE_ENERGIZED);
        }
        self.shared.finish_session(status).await;
        Some(outcome)
    }

    async fn converge(&self) -> ConvergenceOutcome {
        let start = Instant::now();
        let cap = self.timing.fast_set_max_duration();
        let max_pulses = self.timing.fast_set_max_pulses;
        let width = self.timing.fast_set_pulse_width();
        let interval = self.timing.fast_set_interval();
        let refresh = self.timing.status_refresh_pulses.max(1);
        let mut pulses: u32 = 0;

        loop {
            let elapsed = start.elapsed();
            if elapsed > cap {
                return ConvergenceOutcome::TimedOut { pulses, elapsed };
            }

            if self.shared.take_cancel().await {
                return ConvergenceOutcome::Cancelled { pulses };
            }

            let plan = self.shared.plan().await;

            if plan.stall_minutes > 0 {
                let outcome = ConvergenceOutcome::Stalling {
                    stall_minutes: plan.stall_minutes,
                    pulses,
                };
                self.shared
                    .begin_stall(plan.stall_minutes, outcome.status_text())
                    .await;
                return outcome;
            }

            if plan.advance_minutes == 0 {
                return ConvergenceOutcome::Completed { pulses };
            }

            if pulses >= max_pulses {
                return ConvergenceOutcome::PulseCapExceeded { pulses };
            }

            if pulses == 0 {
                info!(
                    advance_minutes = plan.advance_minutes,
                    interval_ms = interval.as_millis(),
                    width_ms = width.as_millis(),
                    "FAST SET: dynamic mode (A+B pulses)"
                );
                self.shared
                    .set_status("FAST SET running (dynamic)...")
                    .await;
            }

            let pulse_start = Instant::now();
            if let Err(e) = self.pulses.pulse(PulseTarget::Ab, width).await {
                warn!(error = %e, "FAST SET pulse failed");
                return ConvergenceOutcome::RelayFault {
                    pulses,
                    message: e.to_string(),
                };
            }
            self.shared.record_advance().await;
            pulses = pulses.saturating_add(1);

            if let Some(next) = pulse_start.checked_add(interval) {
                tokio::time::sleep_until(next).await;
            }

            if pulses.checked_rem(refresh) == Some(0) {
                let remaining = plan.advance_minutes.saturating_sub(1);
                info!(pulses, remaining, "FAST SET progress");
                self.shared
                    .set_status(format!("Advancing... pulses={pulses}, remaining~{remaining}"))
                    .await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use slaveclock_store::MemoryStore;

    use super::*;
    use crate::dial::DialReading;
    use crate::relay::{simulated_pair, ActiveLevel, SimulatedPin};
    use crate::time::ManualTime;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    struct Fixture {
        shared: Arc<SharedState>,
        pulses: Arc<PulseSequencer>,
        pin_b: SimulatedPin,
        controller: ConvergenceController,
    }

    fn fixture(timing: TimingConfig) -> Fixture {
        let time = Arc::new(ManualTime::new(at(12, 0)));
        let shared = Arc::new(SharedState::new(Arc::new(MemoryStore::new()), time));
        let (pair, _, pin_b) = simulated_pair(ActiveLevel::Low).unwrap();
        let pulses = Arc::new(PulseSequencer::new(Arc::new(pair)));
        let controller = ConvergenceController::new(shared.clone(), pulses.clone(), timing);
        Fixture {
            shared,
            pulses,
            pin_b,
            controller,
        }
    }

    async fn declare(f: &Fixture, hours: u32, minutes: u32) {
        f.shared
            .set_dial_reading(DialReading::new(hours, minutes).unwrap())
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_pending_does_nothing() {
        let f = fixture(TimingConfig::default());
        assert!(f.controller.run_pending().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dial_gets_exact_pulses() {
        let f = fixture(TimingConfig::default());
        declare(&f, 11, 55).await;
        f.shared.request_fast_set().await;

        let outcome = f.controller.run_pending().await.unwrap();

        assert_eq!(outcome, ConvergenceOutcome::Completed { pulses: 5 });
        assert_eq!(f.pulses.relays().a().activations(), 5);
        assert_eq!(f.pulses.relays().b().activations(), 5);
        assert!(f.shared.plan().await.is_aligned());
        let state = f.shared.snapshot().await;
        assert!(!state.session.running);
        assert_eq!(state.session.status, "FAST SET complete (pulses sent: 5).");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_dial_hands_off_to_stall() {
        let f = fixture(TimingConfig::default());
        declare(&f, 12, 5).await;
        f.shared.request_fast_set().await;

        let outcome = f.controller.run_pending().await.unwrap();

        assert_eq!(
            outcome,
            ConvergenceOutcome::Stalling {
                stall_minutes: 5,
                pulses: 0
            }
        );
        assert_eq!(f.pulses.relays().a().activations(), 0);
        let state = f.shared.snapshot().await;
        assert_eq!(state.stall_remaining_minutes, 5);
        assert!(!state.session.running);
    }

    #[tokio::test(start_paused = true)]
    async fn aligned_dial_completes_without_pulses() {
        let f = fixture(TimingConfig::default());
        f.shared.request_fast_set().await;
        let outcome = f.controller.run_pending().await.unwrap();
        assert_eq!(outcome, ConvergenceOutcome::Completed { pulses: 0 });
        assert_eq!(
            f.shared.snapshot().await.session.status,
            "Already aligned (no action)."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_cap_stops_session() {
        let timing = TimingConfig {
            fast_set_max_pulses: 3,
            ..TimingConfig::default()
        };
        let f = fixture(timing);
        declare(&f, 11, 50).await;
        f.shared.request_fast_set().await;

        let outcome = f.controller.run_pending().await.unwrap();

        assert_eq!(outcome, ConvergenceOutcome::PulseCapExceeded { pulses: 3 });
        assert!(outcome.is_failure());
        assert_eq!(f.shared.plan().await.advance_minutes, 7);
        assert!(!f.pulses.relays().any_on());
    }

    #[tokio::test(start_paused = true)]
    async fn cap_equal_to_need_still_completes() {
        let timing = TimingConfig {
            fast_set_max_pulses: 5,
            ..TimingConfig::default()
        };
        let f = fixture(timing);
        declare(&f, 11, 55).await;
        f.shared.request_fast_set().await;
        let outcome = f.controller.run_pending().await.unwrap();
        assert_eq!(outcome, ConvergenceOutcome::Completed { pulses: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_cap_times_out() {
        let timing = TimingConfig {
            fast_set_max_seconds: 5,
            ..TimingConfig::default()
        };
        let f = fixture(timing);
        declare(&f, 11, 0).await;
        f.shared.request_fast_set().await;

        let outcome = f.controller.run_pending().await.unwrap();

        // Pulses start at 0s, 2s, 4s; the check at 6s exceeds the 5s cap.
        assert!(matches!(
            outcome,
            ConvergenceOutcome::TimedOut { pulses: 3, .. }
        ));
        assert!(f.shared.snapshot().await.session.status.starts_with("FAST SET error"));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_fault_ends_session_with_lines_off() {
        let f = fixture(TimingConfig::default());
        declare(&f, 11, 55).await;
        f.shared.request_fast_set().await;
        f.pin_b.set_failing(true);

        let outcome = f.controller.run_pending().await.unwrap();

        assert!(matches!(outcome, ConvergenceOutcome::RelayFault { pulses: 0, .. }));
        assert!(!f.pulses.relays().a().is_on());
        assert!(!f.shared.is_running().await);
        // Line B still refuses writes, so the final all-off failed too.
        let status = f.shared.snapshot().await.session.status;
        assert!(status.starts_with("FAST SET error"), "{status}");
        assert!(status.ends_with(RELAYS_MAY_BE_ENERGIZED), "{status}");
    }

    #[tokio::test(start_paused = true)]
    async fn clean_finish_has_no_relay_warning() {
        let f = fixture(TimingConfig::default());
        declare(&f, 11, 58).await;
        f.shared.request_fast_set().await;
        f.controller.run_pending().await.unwrap();
        let status = f.shared.snapshot().await.session.status;
        assert!(!status.contains(RELAYS_MAY_BE_ENERGIZED), "{status}");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_within_one_interval() {
        let f = Arc::new(fixture(TimingConfig::default()));
        declare(&f, 11, 0).await;
        f.shared.request_fast_set().await;

        let runner = {
            let f = f.clone();
            tokio::spawn(async move { f.controller.run_pending().await })
        };

        // Let a few pulses go out, then stop.
        tokio::time::sleep(Duration::from_millis(4_100)).await;
        assert!(f.shared.is_running().await);
        f.shared.request_stop().await;
        let stop_at = Instant::now();

        let outcome = runner.await.unwrap().unwrap();

        assert!(stop_at.elapsed() <= Duration::from_secs(2));
        assert!(matches!(outcome, ConvergenceOutcome::Cancelled { .. }));
        let state = f.shared.snapshot().await;
        assert!(!state.session.running);
        assert!(!state.session.requested);
        assert!(!state.session.cancel_requested);
        assert!(!f.pulses.relays().any_on());
    }
}
