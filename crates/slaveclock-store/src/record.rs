//! The persisted offset record.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Minutes in one turn of a 12-hour dial.
const DIAL_CYCLE_MINUTES: u32 = 720;

/// Relationship between system time and the physical dial, as saved on disk.
///
/// `dial minutes = (system minutes + offset_minutes) mod 720` while
/// `has_offset` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    /// Offset in minutes, in `[0, 720)`.
    #[serde(default)]
    pub offset_minutes: u32,
    /// Whether an operator has ever declared the dial reading.
    #[serde(default)]
    pub has_offset: bool,
    /// Local time the record was written.
    ///
    /// Read leniently: a missing or unreadable stamp never rejects the
    /// record.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub saved_at: Option<NaiveDateTime>,
}

/// Read an RFC 3339 or naive ISO 8601 timestamp as local time.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(stamped) = DateTime::parse_from_rfc3339(&text) {
        return Ok(Some(stamped.with_timezone(&Local).naive_local()));
    }
    Ok(text.parse::<NaiveDateTime>().ok())
}

impl OffsetRecord {
    /// Build a record stamped with the current local time.
    pub fn now(offset_minutes: u32, has_offset: bool) -> Self {
        Self {
            offset_minutes: offset_minutes.checked_rem(DIAL_CYCLE_MINUTES).unwrap_or(0),
            has_offset,
            saved_at: Some(Local::now().naive_local()),
        }
    }

    /// Return a copy with the offset folded back into `[0, 720)`.
    ///
    /// Hand-edited or legacy files may carry out-of-range offsets.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.offset_minutes = self
            .offset_minutes
            .checked_rem(DIAL_CYCLE_MINUTES)
            .unwrap_or(0);
        self
    }
}
