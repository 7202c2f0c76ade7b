//! Dial offset model: where the physical hands are believed to be.
//!
//! The clock has no position sensor. The controller keeps an offset such
//! that `dial = (system + offset) mod 720`, where both sides are minutes on
//! a 12-hour face. Until an operator declares what the dial reads, the dial
//! is assumed to track system time exactly.
//!
//! This module is pure data. Locking and persistence live in
//! [`crate::state`], which calls these methods inside a single critical
//! section per operation.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use slaveclock_store::OffsetRecord;

/// Minutes in one turn of a 12-hour dial.
pub const DIAL_CYCLE_MINUTES: u32 = 720;

/// Half a turn. Deltas above this are treated as the dial being ahead.
pub const HALF_CYCLE_MINUTES: u32 = 360;

/// Errors produced when an operator-supplied dial reading is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialError {
    /// The reading is malformed or out of range.
    #[error("invalid dial reading: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },
}

impl DialError {
    fn validation(reason: &str) -> Self {
        Self::Validation {
            reason: reason.to_owned(),
        }
    }
}

/// Fold any signed minute count into `[0, 720)`.
pub fn wrap_minutes(minutes: i64) -> u32 {
    let folded = minutes.rem_euclid(i64::from(DIAL_CYCLE_MINUTES));
    // rem_euclid with a positive modulus is always in [0, 720).
    u32::try_from(folded).unwrap_or(0)
}

/// Position of system time on a 12-hour dial, in minutes.
pub fn system_minutes(now: &NaiveDateTime) -> u32 {
    let minutes = i64::from(now.hour())
        .saturating_mul(60)
        .saturating_add(i64::from(now.minute()));
    wrap_minutes(minutes)
}

/// Render dial minutes as `HH:MM` on a 12-hour face (`12:05`, not `00:05`).
pub fn format_dial(minutes: u32) -> String {
    let minutes = wrap_minutes(i64::from(minutes));
    let hours = minutes.checked_div(60).unwrap_or(0);
    let mins = minutes.checked_rem(60).unwrap_or(0);
    let display_hours = if hours == 0 { 12 } else { hours };
    format!("{display_hours:02}:{mins:02}")
}

/// A dial reading declared by the operator.
///
/// Accepts 24-hour input; `13:05` and `01:05` name the same dial position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialReading {
    hours: u32,
    minutes: u32,
}

impl DialReading {
    /// Build a reading from hours `0..=23` and minutes `0..=59`.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Validation`] if either part is out of range.
    pub fn new(hours: u32, minutes: u32) -> Result<Self, DialError> {
        if hours > 23 {
            return Err(DialError::validation("HH must be 0..23"));
        }
        if minutes > 59 {
            return Err(DialError::validation("MM must be 0..59"));
        }
        Ok(Self { hours, minutes })
    }

    /// Hours as entered.
    pub const fn hours(self) -> u32 {
        self.hours
    }

    /// Minutes as entered.
    pub const fn minutes(self) -> u32 {
        self.minutes
    }

    /// Position of this reading on the dial, in minutes `[0, 720)`.
    pub fn dial_minutes(self) -> u32 {
        let total = i64::from(self.hours)
            .saturating_mul(60)
            .saturating_add(i64::from(self.minutes));
        wrap_minutes(total)
    }
}

impl FromStr for DialReading {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hh, mm) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| DialError::validation("time must be HH:MM"))?;
        let hours = hh
            .trim()
            .parse::<u32>()
            .map_err(|e| DialError::validation(&format!("HH is not a number: {e}")))?;
        let minutes = mm
            .trim()
            .parse::<u32>()
            .map_err(|e| DialError::validation(&format!("MM is not a number: {e}")))?;
        Self::new(hours, minutes)
    }
}

impl fmt::Display for DialReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hours, self.minutes)
    }
}

/// Believed relationship between system time and the physical dial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialOffsetModel {
    /// Offset in `[0, 720)`; meaningful only when `has_offset`.
    offset_minutes: u32,
    /// False until the dial reading has been declared once.
    has_offset: bool,
}

impl DialOffsetModel {
    /// A model with no declared reading: the dial tracks system time.
    pub const fn new() -> Self {
        Self {
            offset_minutes: 0,
            has_offset: false,
        }
    }

    /// Rebuild a model from a persisted record.
    pub fn from_record(record: &OffsetRecord) -> Self {
        Self {
            offset_minutes: wrap_minutes(i64::from(record.offset_minutes)),
            has_offset: record.has_offset,
        }
    }

    /// Snapshot the model as a record stamped with the current time.
    pub fn to_record(self) -> OffsetRecord {
        OffsetRecord::now(self.offset_minutes, self.has_offset)
    }

    /// Current offset in minutes.
    pub const fn offset_minutes(self) -> u32 {
        self.offset_minutes
    }

    /// Whether the dial reading has ever been declared.
    pub const fn has_offset(self) -> bool {
        self.has_offset
    }

    /// Estimated dial position at `now`, in minutes `[0, 720)`.
    pub fn estimate_dial_minutes(self, now: &NaiveDateTime) -> u32 {
        let sys = system_minutes(now);
        if !self.has_offset {
            return sys;
        }
        wrap_minutes(i64::from(sys).saturating_add(i64::from(self.offset_minutes)))
    }

    /// Declare what the dial reads right now.
    ///
    /// Re-anchors the offset so that [`estimate_dial_minutes`] at `now`
    /// returns the reading's dial position.
    ///
    /// [`estimate_dial_minutes`]: Self::estimate_dial_minutes
    pub fn set_dial_reading(&mut self, reading: DialReading, now: &NaiveDateTime) {
        let target = i64::from(reading.dial_minutes());
        let sys = i64::from(system_minutes(now));
        self.offset_minutes = wrap_minutes(target.saturating_sub(sys));
        self.has_offset = true;
    }

    /// Account for minutes withheld (stall) or extra pulses sent (advance).
    ///
    /// Returns `true` if the offset changed and should be persisted. A
    /// model without a declared reading is left untouched.
    pub fn apply_stall_or_advance(&mut self, stalled: u32, advanced: u32) -> bool {
        if (stalled == 0 && advanced == 0) || !self.has_offset {
            return false;
        }
        let next = i64::from(self.offset_minutes)
            .saturating_sub(i64::from(stalled))
            .saturating_add(i64::from(advanced));
        self.offset_minutes = wrap_minutes(next);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn system_minutes_folds_afternoon() {
        assert_eq!(system_minutes(&at(0, 0)), 0);
        assert_eq!(system_minutes(&at(12, 0)), 0);
        assert_eq!(system_minutes(&at(13, 30)), 90);
        assert_eq!(system_minutes(&at(23, 59)), 719);
    }

    #[test]
    fn format_dial_uses_twelve_for_top_of_dial() {
        assert_eq!(format_dial(0), "12:00");
        assert_eq!(format_dial(5), "12:05");
        assert_eq!(format_dial(715), "11:55");
        assert_eq!(format_dial(90), "01:30");
    }

    #[test]
    fn parse_reading() {
        let reading: DialReading = " 11:55 ".parse().unwrap();
        assert_eq!(reading.hours(), 11);
        assert_eq!(reading.minutes(), 55);
        assert_eq!(reading.dial_minutes(), 715);
        assert_eq!(reading.to_string(), "11:55");
    }

    #[test]
    fn parse_rejects_bad_input() {
        for bad in ["", "1155", "ab:cd", "24:00", "12:60", "-1:00", "12:"] {
            assert!(
                matches!(bad.parse::<DialReading>(), Err(DialError::Validation { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn untracked_model_follows_system_time() {
        let model = DialOffsetModel::new();
        assert_eq!(model.estimate_dial_minutes(&at(3, 17)), 197);
    }

    #[test]
    fn set_reading_at_top_of_cycle() {
        let mut model = DialOffsetModel::new();
        model.set_dial_reading(DialReading::new(11, 55).unwrap(), &at(12, 0));
        assert_eq!(model.offset_minutes(), 715);
        assert!(model.has_offset());
        assert_eq!(model.estimate_dial_minutes(&at(12, 0)), 715);
        assert_eq!(format_dial(model.estimate_dial_minutes(&at(12, 0))), "11:55");
    }

    #[test]
    fn apply_is_noop_without_offset() {
        let mut model = DialOffsetModel::new();
        assert!(!model.apply_stall_or_advance(0, 1));
        assert_eq!(model.offset_minutes(), 0);
    }

    #[test]
    fn apply_wraps_both_directions() {
        let mut model = DialOffsetModel::new();
        model.set_dial_reading(DialReading::new(0, 0).unwrap(), &at(0, 0));
        assert!(model.apply_stall_or_advance(1, 0));
        assert_eq!(model.offset_minutes(), 719);
        assert!(model.apply_stall_or_advance(0, 1));
        assert_eq!(model.offset_minutes(), 0);
        assert!(!model.apply_stall_or_advance(0, 0));
    }

    #[test]
    fn record_round_trip_keeps_offset() {
        let mut model = DialOffsetModel::new();
        model.set_dial_reading(DialReading::new(4, 10).unwrap(), &at(2, 0));
        let restored = DialOffsetModel::from_record(&model.to_record());
        assert_eq!(restored, model);
    }

    proptest! {
        #[test]
        fn declared_reading_is_immediately_estimated(
            hh in 0u32..24,
            mm in 0u32..60,
            sys_h in 0u32..24,
            sys_m in 0u32..60,
            prior in 0u32..720,
        ) {
            let now = at(sys_h, sys_m);
            let mut model = DialOffsetModel::from_record(&OffsetRecord::now(prior, true));
            let reading = DialReading::new(hh, mm).unwrap();
            model.set_dial_reading(reading, &now);
            prop_assert!(model.offset_minutes() < DIAL_CYCLE_MINUTES);
            prop_assert_eq!(
                model.estimate_dial_minutes(&now),
                (hh * 60 + mm) % DIAL_CYCLE_MINUTES
            );
        }
    }
}
