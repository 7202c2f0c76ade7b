//! Convergence planning: stall or advance, and by how much.
//!
//! The dial only moves forward. If it is behind, it can be caught up with
//! extra pulses. If it is ahead, the only remedy is to withhold normal
//! pulses until system time catches up. Mod-720 space is symmetric around
//! half a turn, so a forward delta above 360 minutes is read as the dial
//! being ahead by `720 - delta`.
//!
//! A delta of exactly 360 is classified as "advance 360", never "stall 360".

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::dial::{self, DialOffsetModel, DIAL_CYCLE_MINUTES, HALF_CYCLE_MINUTES};

/// What it takes to bring the dial back in line with system time.
///
/// At most one of the two fields is non-zero. Both zero means aligned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConvergencePlan {
    /// Minutes the dial is ahead; normal pulses must be withheld this long.
    pub stall_minutes: u32,
    /// Minutes the dial is behind; extra pulses needed to catch up.
    pub advance_minutes: u32,
}

impl ConvergencePlan {
    /// The aligned plan.
    pub const ALIGNED: Self = Self {
        stall_minutes: 0,
        advance_minutes: 0,
    };

    /// Whether the dial is already where it should be.
    pub const fn is_aligned(self) -> bool {
        self.stall_minutes == 0 && self.advance_minutes == 0
    }
}

/// Plan from raw dial positions.
pub fn plan_from_minutes(system_minutes: u32, dial_minutes: u32) -> ConvergencePlan {
    let delta =
        dial::wrap_minutes(i64::from(system_minutes).saturating_sub(i64::from(dial_minutes)));

    if delta == 0 {
        ConvergencePlan::ALIGNED
    } else if delta > HALF_CYCLE_MINUTES {
        ConvergencePlan {
            stall_minutes: DIAL_CYCLE_MINUTES.saturating_sub(delta),
            advance_minutes: 0,
        }
    } else {
        ConvergencePlan {
            stall_minutes: 0,
            advance_minutes: delta,
        }
    }
}

/// Plan for `model` at `now`.
///
/// Must be recomputed every time it is used: system time keeps moving, so a
/// plan goes stale within a minute.
pub fn plan(model: DialOffsetModel, now: &NaiveDateTime) -> ConvergencePlan {
    plan_from_minutes(dial::system_minutes(now), model.estimate_dial_minutes(now))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use slaveclock_store::OffsetRecord;

    use super::*;
    use crate::dial::DialReading;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn aligned_when_equal() {
        assert_eq!(plan_from_minutes(100, 100), ConvergencePlan::ALIGNED);
        assert!(plan(DialOffsetModel::new(), &at(7, 7)).is_aligned());
    }

    #[test]
    fn dial_behind_advances() {
        let mut model = DialOffsetModel::new();
        model.set_dial_reading(DialReading::new(11, 55).unwrap(), &at(12, 0));
        assert_eq!(
            plan(model, &at(12, 0)),
            ConvergencePlan {
                stall_minutes: 0,
                advance_minutes: 5
            }
        );
    }

    #[test]
    fn dial_ahead_stalls() {
        let mut model = DialOffsetModel::new();
        model.set_dial_reading(DialReading::new(12, 5).unwrap(), &at(12, 0));
        assert_eq!(
            plan(model, &at(12, 0)),
            ConvergencePlan {
                stall_minutes: 5,
                advance_minutes: 0
            }
        );
    }

    #[test]
    fn half_turn_is_advance_not_stall() {
        assert_eq!(
            plan_from_minutes(360, 0),
            ConvergencePlan {
                stall_minutes: 0,
                advance_minutes: 360
            }
        );
        assert_eq!(plan_from_minutes(0, 360).advance_minutes, 360);
        assert_eq!(
            plan_from_minutes(0, 359),
            ConvergencePlan {
                stall_minutes: 359,
                advance_minutes: 0
            }
        );
        assert_eq!(
            plan_from_minutes(0, 361),
            ConvergencePlan {
                stall_minutes: 0,
                advance_minutes: 359
            }
        );
    }

    #[test]
    fn plan_follows_system_time() {
        let mut model = DialOffsetModel::new();
        model.set_dial_reading(DialReading::new(3, 0).unwrap(), &at(3, 0));
        // The offset model follows system time on its own.
        assert!(plan(model, &at(3, 10)).is_aligned());
        let mut stuck = model;
        stuck.apply_stall_or_advance(10, 0);
        assert_eq!(plan(stuck, &at(3, 10)).advance_minutes, 10);
    }

    proptest! {
        #[test]
        fn plan_is_total_and_exclusive(sys in 0u32..720, dial_pos in 0u32..720) {
            let p = plan_from_minutes(sys, dial_pos);
            let aligned = p.stall_minutes == 0 && p.advance_minutes == 0;
            let stall = p.stall_minutes > 0 && p.advance_minutes == 0;
            let advance = p.stall_minutes == 0 && p.advance_minutes > 0;
            prop_assert_eq!(u8::from(aligned) + u8::from(stall) + u8::from(advance), 1);
            prop_assert!(p.stall_minutes < HALF_CYCLE_MINUTES);
            prop_assert!(p.advance_minutes <= HALF_CYCLE_MINUTES);
        }

        #[test]
        fn advancing_by_plan_aligns(offset in 0u32..720, sys_h in 0u32..24, sys_m in 0u32..60) {
            let now = at(sys_h, sys_m);
            let mut model = DialOffsetModel::from_record(&OffsetRecord::now(offset, true));
            let initial = plan(model, &now);
            for _ in 0..initial.advance_minutes {
                model.apply_stall_or_advance(0, 1);
            }
            for _ in 0..initial.stall_minutes {
                model.apply_stall_or_advance(1, 0);
            }
            prop_assert!(plan(model, &now).is_aligned());
        }
    }
}
