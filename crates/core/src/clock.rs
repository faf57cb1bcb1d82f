#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Source of "now" for every timestamp the store writes.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(to_utc(start))),
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = to_utc(at);
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unparseable timestamp: {raw:?}")]
pub struct TimestampError {
    pub raw: String,
}

pub fn to_utc(at: OffsetDateTime) -> OffsetDateTime {
    at.to_offset(UtcOffset::UTC)
}

/// Drops sub-microsecond precision, matching what storage keeps.
pub fn truncate_micros(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(at.microsecond() * 1_000).unwrap_or(at)
}

/// Fixed-width RFC3339 in UTC with microseconds, e.g.
/// `2026-01-02T03:04:05.000000Z`. Equal widths keep text order chronological.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let layout = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    // An OffsetDateTime carries every component the layout asks for.
    to_utc(at).format(layout).unwrap_or_default()
}

/// Accepts RFC3339 with any offset, or the natural `YYYY-MM-DD HH:MM:SS`
/// layout (optionally with fractional seconds) read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, TimestampError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(to_utc(parsed));
    }
    let natural = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(trimmed, natural)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| TimestampError {
            raw: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_fixed_width_utc() {
        let at = datetime!(2026-01-02 03:04:05.25 +02:00);
        assert_eq!(format_timestamp(at), "2026-01-02T01:04:05.250000Z");
    }

    #[test]
    fn formats_pad_every_field_and_drop_nanoseconds() {
        let at = datetime!(2026-06-05 04:03:02.000001999 UTC);
        assert_eq!(format_timestamp(at), "2026-06-05T04:03:02.000001Z");
        assert_eq!(
            format_timestamp(datetime!(2026-12-31 23:59:59 UTC)),
            "2026-12-31T23:59:59.000000Z"
        );
    }

    #[test]
    fn parses_both_layouts() {
        let expected = datetime!(2026-01-02 03:04:05 UTC);
        assert_eq!(parse_timestamp("2026-01-02T03:04:05Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-01-02 03:04:05").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2026-01-02T05:04:05+02:00").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2026-01-02 03:04:05.5").unwrap(),
            expected + Duration::milliseconds(500)
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn formatted_values_round_trip() {
        let at = datetime!(2026-07-08 09:10:11.123456 UTC);
        assert_eq!(parse_timestamp(&format_timestamp(at)).unwrap(), at);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2026-01-01 00:00 UTC));
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), datetime!(2026-01-01 00:05 UTC));
    }
}
