//! Shared controller state behind a single lock.
//!
//! The daemon loop and the control surface both touch the dial model, the
//! fast-set session flags, the tick dedupe guards, and the stall counter.
//! All of it lives in one [`ClockState`] behind one [`tokio::sync::Mutex`].
//!
//! Every public operation on [`SharedState`] takes the lock exactly once,
//! does its whole read-modify-write inside that critical section, and
//! releases it before touching the store. No operation calls another
//! locking operation while holding the guard.
//!
//! Records are numbered inside the critical section that produced them. A
//! save that arrives after a newer one has been written is dropped, so the
//! file never falls behind memory when two writers race.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use slaveclock_store::{OffsetRecord, StateStore};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dial::{self, DialOffsetModel, DialReading};
use crate::planner::{self, ConvergencePlan};
use crate::time::TimeSource;

/// A calendar minute, used to process each minute at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalendarMinute {
    /// Calendar date.
    pub date: NaiveDate,
    /// Hour of day, 0-23.
    pub hour: u32,
    /// Minute of hour, 0-59.
    pub minute: u32,
}

impl CalendarMinute {
    /// The minute containing `now`.
    pub fn of(now: &NaiveDateTime) -> Self {
        Self {
            date: now.date(),
            hour: now.hour(),
            minute: now.minute(),
        }
    }

    /// The hour containing this minute.
    pub const fn hour_key(self) -> CalendarHour {
        CalendarHour {
            date: self.date,
            hour: self.hour,
        }
    }
}

/// A calendar hour, used to fire the correction burst at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalendarHour {
    /// Calendar date.
    pub date: NaiveDate,
    /// Hour of day, 0-23.
    pub hour: u32,
}

/// Fast-set session flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceSession {
    /// A fast set was requested and not yet claimed.
    pub requested: bool,
    /// A fast set is executing.
    pub running: bool,
    /// Stop was requested; checked at the top of each iteration.
    pub cancel_requested: bool,
    /// Human-readable status for the control surface.
    pub status: String,
}

impl Default for ConvergenceSession {
    fn default() -> Self {
        Self {
            requested: false,
            running: false,
            cancel_requested: false,
            status: String::from("Idle"),
        }
    }
}

/// Dedupe keys for the minute tick and the hourly burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickGuards {
    /// Last calendar minute processed.
    pub last_minute: Option<CalendarMinute>,
    /// Last calendar hour whose correction burst fired.
    pub last_correction_hour: Option<CalendarHour>,
}

/// Everything guarded by the controller lock.
#[derive(Debug, Clone, Default)]
pub struct ClockState {
    /// Believed dial position relative to system time.
    pub dial: DialOffsetModel,
    /// Fast-set session flags.
    pub session: ConvergenceSession,
    /// Tick dedupe keys.
    pub guards: TickGuards,
    /// Minutes of normal pulsing still to withhold because the dial is ahead.
    pub stall_remaining_minutes: u32,
}

/// Outcome of a fast-set request from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FastSetRequest {
    /// The request was recorded and will be claimed by the daemon loop.
    Accepted,
    /// A session is already running; nothing changed.
    AlreadyRunning,
}

/// What the minute tick should do for a given calendar minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinuteAction {
    /// This minute was already processed.
    Duplicate,
    /// A fast-set session owns the lines; skip the tick.
    SessionRunning,
    /// The dial is ahead; this minute was withheld.
    Stalled {
        /// Stall minutes still to go after this one.
        remaining: u32,
    },
    /// Emit the normal pulse pattern.
    Normal,
}

/// Read-only view for the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockStatus {
    /// Local system time, `YYYY-MM-DD HH:MM:SS`.
    pub system_time: String,
    /// Estimated dial reading on a 12-hour face.
    pub dial_time: String,
    /// System time as dial minutes.
    pub system_minutes: u32,
    /// Estimated dial minutes.
    pub dial_minutes: u32,
    /// Offset in minutes (0 when no reading has been declared).
    pub offset_minutes: u32,
    /// Whether a dial reading has been declared.
    pub has_offset: bool,
    /// Minutes of stall remaining.
    pub stall_remaining_minutes: u32,
    /// Whether a fast-set request is pending.
    pub fast_set_requested: bool,
    /// Whether a fast-set session is running.
    pub fast_set_running: bool,
    /// Fast-set status text.
    pub fast_set_status: String,
    /// Current convergence plan.
    pub plan: ConvergencePlan,
}

/// Controller state shared between the daemon loop and the control surface.
pub struct SharedState {
    state: Mutex<ClockState>,
    store: Arc<dyn StateStore>,
    time: Arc<dyn TimeSource>,
    /// Next record generation; bumped only while `state` is locked.
    next_generation: AtomicU64,
    /// Generation of the record last handed to the store.
    saved_generation: Mutex<u64>,
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState").finish_non_exhaustive()
    }
}

impl SharedState {
    /// Create state with no declared dial reading.
    pub fn new(store: Arc<dyn StateStore>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            state: Mutex::new(ClockState::default()),
            store,
            time,
            next_generation: AtomicU64::new(1),
            saved_generation: Mutex::new(0),
        }
    }

    /// Create state from whatever `store` holds.
    ///
    /// A missing or unreadable record is not fatal: the model starts with no
    /// declared reading.
    pub fn restore(store: Arc<dyn StateStore>, time: Arc<dyn TimeSource>) -> Self {
        let dial = match store.load() {
            Ok(Some(record)) => {
                info!(
                    has_offset = record.has_offset,
                    offset_minutes = record.offset_minutes,
                    saved_at = ?record.saved_at,
                    "State restored"
                );
                DialOffsetModel::from_record(&record)
            }
            Ok(None) => {
                info!("No saved state (first run); set the dial reading to begin tracking");
                DialOffsetModel::new()
            }
            Err(e) => {
                warn!(error = %e, "State restore failed; starting without a dial reading");
                DialOffsetModel::new()
            }
        };

        Self {
            state: Mutex::new(ClockState {
                dial,
                ..ClockState::default()
            }),
            store,
            time,
            next_generation: AtomicU64::new(1),
            saved_generation: Mutex::new(0),
        }
    }

    /// Current local time from the configured source.
    pub fn now(&self) -> NaiveDateTime {
        self.time.now()
    }

    /// Copy of the full guarded state.
    pub async fn snapshot(&self) -> ClockState {
        self.state.lock().await.clone()
    }

    /// Status view at the current time.
    pub async fn status(&self) -> ClockStatus {
        let now = self.now();
        let state = self.state.lock().await;
        let dial_minutes = state.dial.estimate_dial_minutes(&now);
        ClockStatus {
            system_time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            dial_time: dial::format_dial(dial_minutes),
            system_minutes: dial::system_minutes(&now),
            dial_minutes,
            offset_minutes: if state.dial.has_offset() {
                state.dial.offset_minutes()
            } else {
                0
            },
            has_offset: state.dial.has_offset(),
            stall_remaining_minutes: state.stall_remaining_minutes,
            fast_set_requested: state.session.requested,
            fast_set_running: state.session.running,
            fast_set_status: state.session.status.clone(),
            plan: planner::plan(state.dial, &now),
        }
    }

    /// Estimated dial minutes now.
    pub async fn estimate_dial_minutes(&self) -> u32 {
        let now = self.now();
        self.state.lock().await.dial.estimate_dial_minutes(&now)
    }

    /// Fresh convergence plan at the current time.
    pub async fn plan(&self) -> ConvergencePlan {
        let now = self.now();
        planner::plan(self.state.lock().await.dial, &now)
    }

    /// Declare the current dial reading.
    ///
    /// Re-anchors the offset, clears any pending stall, and persists.
    pub async fn set_dial_reading(&self, reading: DialReading) -> DialOffsetModel {
        let now = self.now();
        let (model, generation) = {
            let mut state = self.state.lock().await;
            state.dial.set_dial_reading(reading, &now);
            state.stall_remaining_minutes = 0;
            (state.dial, self.take_generation())
        };
        self.persist(generation, &model.to_record()).await;
        info!(
            %reading,
            offset_minutes = model.offset_minutes(),
            "Dial set (dial = system + offset)"
        );
        model
    }

    /// Record one extra A+B pulse sent during a fast set.
    pub async fn record_advance(&self) {
        let changed = {
            let mut state = self.state.lock().await;
            state
                .dial
                .apply_stall_or_advance(0, 1)
                .then(|| (self.take_generation(), state.dial.to_record()))
        };
        if let Some((generation, record)) = changed {
            self.persist(generation, &record).await;
        }
    }

    // -----------------------------------------------------------------------
    // Fast-set session
    // -----------------------------------------------------------------------

    /// Ask the daemon loop to start a fast set. No-op while one is running.
    pub async fn request_fast_set(&self) -> FastSetRequest {
        let mut state = self.state.lock().await;
        if state.session.running {
            return FastSetRequest::AlreadyRunning;
        }
        state.session.requested = true;
        state.session.cancel_requested = false;
        state.session.status = String::from("FAST SET requested...");
        FastSetRequest::Accepted
    }

    /// Flag a running fast set for cancellation and drop any pending request.
    pub async fn request_stop(&self) {
        let mut state = self.state.lock().await;
        state.session.cancel_requested = true;
        state.session.requested = false;
        state.session.status = String::from("STOP requested...");
    }

    /// Claim a pending fast-set request.
    ///
    /// Returns `true` if this caller now owns a running session.
    pub async fn claim_session(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.session.requested || state.session.running {
            return false;
        }
        state.session.requested = false;
        state.session.running = true;
        state.session.cancel_requested = false;
        state.session.status = String::from("Starting...");
        true
    }

    /// Consume a pending cancellation.
    pub async fn take_cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        std::mem::take(&mut state.session.cancel_requested)
    }

    /// Whether a session is running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.session.running
    }

    /// Replace the session status text.
    pub async fn set_status(&self, status: impl Into<String>) {
        self.state.lock().await.session.status = status.into();
    }

    /// Hand off to the minute tick: withhold `minutes` normal pulses.
    pub async fn begin_stall(&self, minutes: u32, status: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.stall_remaining_minutes = minutes;
        state.session.status = status.into();
    }

    /// End the running session and return to idle.
    pub async fn finish_session(&self, status: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.session.running = false;
        state.session.cancel_requested = false;
        state.session.status = status.into();
    }

    // -----------------------------------------------------------------------
    // Tick guards
    // -----------------------------------------------------------------------

    /// Decide, once per calendar minute, what the minute tick should do.
    ///
    /// The stall branch decrements the counter and moves the offset back
    /// one minute in the same critical section.
    pub async fn claim_minute(&self, minute: CalendarMinute) -> MinuteAction {
        let (action, record) = {
            let mut state = self.state.lock().await;
            if state.guards.last_minute == Some(minute) {
                return MinuteAction::Duplicate;
            }
            state.guards.last_minute = Some(minute);

            if state.session.running {
                return MinuteAction::SessionRunning;
            }
            if state.stall_remaining_minutes == 0 {
                return MinuteAction::Normal;
            }

            state.stall_remaining_minutes = state.stall_remaining_minutes.saturating_sub(1);
            let record = state
                .dial
                .apply_stall_or_advance(1, 0)
                .then(|| (self.take_generation(), state.dial.to_record()));
            (
                MinuteAction::Stalled {
                    remaining: state.stall_remaining_minutes,
                },
                record,
            )
        };
        if let Some((generation, record)) = record {
            self.persist(generation, &record).await;
        }
        action
    }

    /// Claim the correction burst for `hour`. Returns `false` if it already
    /// fired this hour.
    pub async fn claim_correction_hour(&self, hour: CalendarHour) -> bool {
        let mut state = self.state.lock().await;
        if state.guards.last_correction_hour == Some(hour) {
            return false;
        }
        state.guards.last_correction_hour = Some(hour);
        true
    }

    /// Number the record about to leave the critical section.
    ///
    /// Call only while holding the `state` lock.
    fn take_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    async fn persist(&self, generation: u64, record: &OffsetRecord) {
        let mut saved = self.saved_generation.lock().await;
        if generation <= *saved {
            debug!(generation, saved = *saved, "Skipping stale save");
            return;
        }
        if let Err(e) = self.store.save(record) {
            warn!(error = %e, "Persist failed; continuing on in-memory state");
        }
        *saved = generation;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use slaveclock_store::MemoryStore;

    use super::*;
    use crate::time::ManualTime;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn shared(hour: u32, minute: u32) -> (SharedState, Arc<MemoryStore>, Arc<ManualTime>) {
        let store = Arc::new(MemoryStore::new());
        let time = Arc::new(ManualTime::new(at(hour, minute)));
        (
            SharedState::new(store.clone(), time.clone()),
            store,
            time,
        )
    }

    #[tokio::test]
    async fn set_dial_reading_persists_and_clears_stall() {
        let (state, store, _) = shared(12, 0);
        state.begin_stall(3, "stalling").await;

        let model = state.set_dial_reading(DialReading::new(11, 55).unwrap()).await;

        assert_eq!(model.offset_minutes(), 715);
        assert_eq!(state.snapshot().await.stall_remaining_minutes, 0);
        assert_eq!(store.current().unwrap().offset_minutes, 715);
        let status = state.status().await;
        assert_eq!(status.dial_time, "11:55");
        assert_eq!(status.plan.advance_minutes, 5);
    }

    #[tokio::test]
    async fn restore_falls_back_when_store_fails() {
        let store = Arc::new(MemoryStore::with_record(OffsetRecord::now(30, true)));
        store.set_failing(true);
        let state = SharedState::restore(store, Arc::new(ManualTime::new(at(1, 0))));
        assert!(!state.snapshot().await.dial.has_offset());
    }

    #[tokio::test]
    async fn restore_loads_saved_offset() {
        let store = Arc::new(MemoryStore::with_record(OffsetRecord::now(30, true)));
        let state = SharedState::restore(store, Arc::new(ManualTime::new(at(1, 0))));
        assert_eq!(state.estimate_dial_minutes().await, 90);
    }

    #[tokio::test]
    async fn persist_failure_keeps_in_memory_change() {
        let (state, store, _) = shared(12, 0);
        store.set_failing(true);
        state.set_dial_reading(DialReading::new(1, 0).unwrap()).await;
        assert_eq!(state.estimate_dial_minutes().await, 60);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn late_save_never_overwrites_newer_record() {
        let (state, store, _) = shared(12, 0);
        let older = state.take_generation();
        let newer = state.take_generation();

        state.persist(newer, &OffsetRecord::now(20, true)).await;
        state.persist(older, &OffsetRecord::now(10, true)).await;

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.current().unwrap().offset_minutes, 20);
    }

    #[tokio::test]
    async fn racing_writers_leave_latest_offset_on_disk() {
        let (state, store, _) = shared(12, 0);
        let state = Arc::new(state);
        state.set_dial_reading(DialReading::new(11, 0).unwrap()).await;

        let advances = {
            let state = state.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    state.record_advance().await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let redeclare = {
            let state = state.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    state.set_dial_reading(DialReading::new(11, 30).unwrap()).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        advances.await.unwrap();
        redeclare.await.unwrap();

        let in_memory = state.snapshot().await.dial.offset_minutes();
        assert_eq!(store.current().unwrap().offset_minutes, in_memory);
    }

    #[tokio::test]
    async fn second_request_while_running_changes_nothing() {
        let (state, _, _) = shared(12, 0);
        assert_eq!(state.request_fast_set().await, FastSetRequest::Accepted);
        assert!(state.claim_session().await);
        state.set_status("Advancing...").await;
        let before = state.snapshot().await.session;

        assert_eq!(state.request_fast_set().await, FastSetRequest::AlreadyRunning);
        assert_eq!(state.snapshot().await.session, before);
        assert!(!state.claim_session().await);
    }

    #[tokio::test]
    async fn stop_clears_pending_request() {
        let (state, _, _) = shared(12, 0);
        state.request_fast_set().await;
        state.request_stop().await;
        assert!(!state.claim_session().await);
        assert!(state.take_cancel().await);
        assert!(!state.take_cancel().await);
    }

    #[tokio::test]
    async fn minute_is_claimed_once() {
        let (state, _, time) = shared(10, 15);
        let minute = CalendarMinute::of(&time.now());
        assert_eq!(state.claim_minute(minute).await, MinuteAction::Normal);
        assert_eq!(state.claim_minute(minute).await, MinuteAction::Duplicate);
    }

    #[tokio::test]
    async fn stall_minute_moves_offset_back() {
        let (state, store, time) = shared(12, 0);
        state.set_dial_reading(DialReading::new(12, 2).unwrap()).await;
        state.begin_stall(2, "stall").await;

        time.advance_minutes(1);
        let action = state.claim_minute(CalendarMinute::of(&time.now())).await;
        assert_eq!(action, MinuteAction::Stalled { remaining: 1 });
        // Dial held at 12:02 while system moved to 12:01.
        assert_eq!(state.estimate_dial_minutes().await, 2);
        assert_eq!(store.current().unwrap().offset_minutes, 1);
    }

    #[tokio::test]
    async fn running_session_skips_minute() {
        let (state, _, time) = shared(12, 0);
        state.request_fast_set().await;
        state.claim_session().await;
        let action = state.claim_minute(CalendarMinute::of(&time.now())).await;
        assert_eq!(action, MinuteAction::SessionRunning);
    }

    #[tokio::test]
    async fn correction_hour_claimed_once() {
        let (state, _, time) = shared(8, 59);
        let hour = CalendarMinute::of(&time.now()).hour_key();
        assert!(state.claim_correction_hour(hour).await);
        assert!(!state.claim_correction_hour(hour).await);
    }
}
