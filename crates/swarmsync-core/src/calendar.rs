//! Calendar encoding of wall-clock instants into Base64x64 values.
//!
//! A full-length timestamp value packs, most significant symbol first:
//!
//! | Field | Symbols | Range |
//! |-------|---------|-------|
//! | months since January 2010 | 2 | 0..4095 |
//! | day of month - 1 | 1 | 0..30 |
//! | hour | 1 | 0..23 |
//! | minute | 1 | 0..59 |
//! | second | 1 | 0..59 |
//! | millisecond | 2 | 0..999 |
//! | sequence | 2 | 0..4095 |
//!
//! Day and hour each leave one bit unused. Because every field is
//! right-aligned within its symbols, string order is chronological order.

use crate::base64x64::Base64x64;
use crate::error::Error;
use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Year of the calendar epoch (January, UTC).
pub const EPOCH_YEAR: i32 = 2010;

/// Symbols needed for millisecond precision.
pub const CALENDAR_LENGTH: usize = 8;

/// Largest sequence number within one millisecond.
pub const MAX_SEQUENCE: u16 = 4095;

const MAX_MONTHS: i64 = 4095;

/// A wall-clock reading: milliseconds since the UNIX epoch plus a counter
/// disambiguating readings within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reading {
    /// Milliseconds since the UNIX epoch
    pub ms: i64,
    /// Same-millisecond sequence number
    pub seq: u16,
}

impl Reading {
    /// Calendar-encode this reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the instant is outside the calendar.
    pub fn to_base64x64(&self) -> Result<Base64x64, Error> {
        encode(self.ms, self.seq)
    }
}

/// A source of wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A manually driven clock, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    ms: Arc<AtomicI64>,
}

impl ManualTime {
    /// Create a clock frozen at `ms`.
    #[must_use]
    pub fn new(ms: i64) -> Self {
        Self {
            ms: Arc::new(AtomicI64::new(ms)),
        }
    }

    /// Jump to `ms`.
    pub fn set(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    /// Move forward (or backward, if negative) by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}

/// Encode an instant and sequence number.
///
/// # Errors
///
/// Returns [`Error::Range`] for instants before 2010 or after the last
/// representable month, and for sequence numbers above [`MAX_SEQUENCE`].
pub fn encode(ms: i64, seq: u16) -> Result<Base64x64, Error> {
    if seq > MAX_SEQUENCE {
        return Err(Error::Range {
            value: seq.to_string(),
            range: format!("0..={MAX_SEQUENCE}"),
        });
    }

    let out_of_range = || Error::Range {
        value: format!("{ms}ms"),
        range: format!("{EPOCH_YEAR}-01 plus {} months", MAX_MONTHS + 1),
    };

    let instant = Utc
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(out_of_range)?;
    let months = i64::from(instant.year() - EPOCH_YEAR) * 12 + i64::from(instant.month0());
    if !(0..=MAX_MONTHS).contains(&months) {
        return Err(out_of_range());
    }

    let months = u64::try_from(months).map_err(|_| out_of_range())?;
    let value = (months << 48)
        | (u64::from(instant.day0()) << 42)
        | (u64::from(instant.hour()) << 36)
        | (u64::from(instant.minute()) << 30)
        | (u64::from(instant.second()) << 24)
        | (u64::from(instant.timestamp_subsec_millis()) << 12)
        | u64::from(seq);

    Base64x64::from_u64(value)
}

/// Decode a calendar-encoded value back to an instant and sequence number.
///
/// # Errors
///
/// Returns [`Error::Format`] if the fields do not form a valid date.
pub fn decode(value: &Base64x64) -> Result<Reading, Error> {
    let n = value.to_u64();
    let field = |shift: u32, bits: u32| -> u32 {
        // fields are at most 12 bits wide
        u32::try_from((n >> shift) & ((1 << bits) - 1)).unwrap_or(0)
    };

    let months = field(48, 12);
    let day0 = field(42, 6);
    let hour = field(36, 6);
    let minute = field(30, 6);
    let second = field(24, 6);
    let milli = field(12, 12);
    let seq = field(0, 12);

    let invalid = |reason: &str| Error::format("calendar timestamp", value.as_str(), reason);

    if milli > 999 {
        return Err(invalid("millisecond field above 999"));
    }
    let year = EPOCH_YEAR + i32::try_from(months / 12).map_err(|_| invalid("month overflow"))?;
    let naive = NaiveDate::from_ymd_opt(year, months % 12 + 1, day0 + 1)
        .ok_or_else(|| invalid("no such date"))?
        .and_hms_milli_opt(hour, minute, second, milli)
        .ok_or_else(|| invalid("no such time of day"))?;

    Ok(Reading {
        ms: Utc.from_utc_datetime(&naive).timestamp_millis(),
        seq: u16::try_from(seq).unwrap_or(MAX_SEQUENCE),
    })
}

static LAST_READING: Mutex<Reading> = Mutex::new(Reading { ms: i64::MIN, seq: 0 });

/// Read the system clock, numbering readings within the same millisecond.
///
/// Readings are strictly increasing within this process, even if the wall
/// clock steps backwards. Once a millisecond runs out of sequence numbers
/// the reading moves on to the next millisecond.
#[must_use]
pub fn now() -> Reading {
    sequenced(SystemTime.now_ms())
}

fn sequenced(ms: i64) -> Reading {
    let mut last = LAST_READING.lock().unwrap_or_else(PoisonError::into_inner);
    *last = next_reading(*last, ms);
    *last
}

fn next_reading(last: Reading, ms: i64) -> Reading {
    if ms > last.ms {
        Reading { ms, seq: 0 }
    } else if last.seq < MAX_SEQUENCE {
        Reading {
            ms: last.ms,
            seq: last.seq + 1,
        }
    } else {
        Reading {
            ms: last.ms + 1,
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms_of(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, milli: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap().timestamp_millis() + i64::from(milli)
    }

    #[test]
    fn epoch_encodes_to_zero() {
        let value = encode(ms_of(2010, 1, 1, 0, 0, 0, 0), 0).unwrap();
        assert!(value.is_zero());
        assert_eq!(value.as_str(), "0");
    }

    #[test]
    fn fields_land_in_their_symbols() {
        // 2011-02-03 04:05:06.007, sequence 8
        let value = encode(ms_of(2011, 2, 3, 4, 5, 6, 7), 8).unwrap();
        // months = 13 -> "0D", day0 2, hour 4, minute 5, second 6,
        // millis 7 -> "07", seq 8 -> "08"
        assert_eq!(value.as_str(), "0D24560708");
    }

    #[test]
    fn decode_inverts_encode() {
        let ms = ms_of(2024, 12, 31, 23, 59, 59, 999);
        let value = encode(ms, 4095).unwrap();
        assert_eq!(decode(&value).unwrap(), Reading { ms, seq: 4095 });
    }

    #[test]
    fn rejects_instants_before_epoch() {
        assert!(matches!(
            encode(ms_of(2009, 12, 31, 23, 59, 59, 999), 0),
            Err(Error::Range { .. })
        ));
        assert!(matches!(
            encode(ms_of(2020, 1, 1, 0, 0, 0, 0), MAX_SEQUENCE + 1),
            Err(Error::Range { .. })
        ));
    }

    #[test]
    fn decode_rejects_impossible_dates() {
        // February 31st
        let value = Base64x64::parse("01U").unwrap();
        assert!(decode(&value).unwrap_err().is_format());
        // hour 30
        let value = Base64x64::parse("000U").unwrap();
        assert!(decode(&value).unwrap_err().is_format());
    }

    #[test]
    fn manual_time_is_shared_between_clones() {
        let time = ManualTime::new(1_000);
        let other = time.clone();
        time.advance(500);
        assert_eq!(other.now_ms(), 1_500);
        other.set(10);
        assert_eq!(time.now_ms(), 10);
    }

    #[test]
    fn readings_are_sequenced_within_a_millisecond() {
        let first = next_reading(Reading { ms: i64::MIN, seq: 0 }, 100);
        let second = next_reading(first, 100);
        let stalled = next_reading(second, 90);
        assert_eq!(first, Reading { ms: 100, seq: 0 });
        assert_eq!(second, Reading { ms: 100, seq: 1 });
        assert_eq!(stalled, Reading { ms: 100, seq: 2 });

        let full = Reading {
            ms: 100,
            seq: MAX_SEQUENCE,
        };
        assert_eq!(next_reading(full, 100), Reading { ms: 101, seq: 0 });
    }

    #[test]
    fn now_is_strictly_increasing() {
        let a = now();
        let b = now();
        assert!(b > a);
        assert!(a.to_base64x64().unwrap() < b.to_base64x64().unwrap());
    }

    proptest! {
        #[test]
        fn encoding_preserves_chronological_order(
            a in 1_262_304_000_000i64..4_102_444_800_000,
            b in 1_262_304_000_000i64..4_102_444_800_000,
            sa in 0u16..=MAX_SEQUENCE,
            sb in 0u16..=MAX_SEQUENCE,
        ) {
            let ea = encode(a, sa).unwrap();
            let eb = encode(b, sb).unwrap();
            prop_assert_eq!(ea.cmp(&eb), (a, sa).cmp(&(b, sb)));
            prop_assert_eq!(decode(&ea).unwrap(), Reading { ms: a, seq: sa });
        }
    }
}
