//! Timestamps: a calendar-encoded value paired with the origin that minted it.
//!
//! Wire form is `value-origin`; a missing `-origin` means the anonymous
//! origin `0`.

use crate::base64x64::Base64x64;
use crate::calendar;
use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A globally comparable timestamp.
///
/// Ordered by value first; the origin only breaks ties between replicas
/// that issued the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stamp {
    value: Base64x64,
    origin: Base64x64,
}

impl Stamp {
    /// The anonymous zero timestamp.
    pub const ZERO: Self = Self {
        value: Base64x64::ZERO,
        origin: Base64x64::ZERO,
    };

    /// Compose a timestamp from its parts.
    #[must_use]
    pub fn new(value: Base64x64, origin: Base64x64) -> Self {
        Self { value, origin }
    }

    /// Mint an unsequenced timestamp from the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the system clock is outside the calendar.
    pub fn now(origin: Base64x64) -> Result<Self, Error> {
        Ok(Self::new(calendar::now().to_base64x64()?, origin))
    }

    /// Parse the `value-origin` wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if either part is empty or malformed.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let (value, origin) = match text.split_once('-') {
            Some((value, origin)) => (value, Some(origin)),
            None => (text, None),
        };

        if value.is_empty() {
            return Err(Error::format("timestamp", text, "empty value"));
        }
        let value = Base64x64::parse(value)
            .map_err(|e| Error::format("timestamp", text, format!("bad value: {e}")))?;

        let origin = match origin {
            None => Base64x64::ZERO,
            Some("") => return Err(Error::format("timestamp", text, "empty origin")),
            Some(origin) => Base64x64::parse(origin)
                .map_err(|e| Error::format("timestamp", text, format!("bad origin: {e}")))?,
        };

        Ok(Self { value, origin })
    }

    /// The calendar-encoded value.
    #[must_use]
    pub fn value(&self) -> Base64x64 {
        self.value
    }

    /// The replica that minted this timestamp.
    #[must_use]
    pub fn origin(&self) -> Base64x64 {
        self.origin
    }

    /// Whether this timestamp has no origin.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.origin.is_zero()
    }

    /// Whether both value and origin are zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.value.is_zero() && self.origin.is_zero()
    }

    /// Milliseconds since the UNIX epoch encoded in the value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the value is not a valid calendar instant.
    pub fn ms(&self) -> Result<i64, Error> {
        Ok(calendar::decode(&self.value)?.ms)
    }

    /// The next timestamp after this one, re-attributed to `origin`.
    ///
    /// Increments the value at its current length, growing by one symbol
    /// when that length is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] when the value is already the maximum.
    pub fn next(&self, origin: Base64x64) -> Result<Self, Error> {
        Ok(Self {
            value: self.value.succ()?,
            origin,
        })
    }

    /// Shorten the value to the fewest symbols (at least `min_length`) that
    /// still order it after `baseline`.
    #[must_use]
    pub fn relax(&self, baseline: &Base64x64, min_length: usize) -> Self {
        Self {
            value: self.value.relax(baseline, min_length),
            origin: self.origin,
        }
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.value.cmp(&other.value) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.origin.cmp(&other.origin)
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Writes `value-origin`, or the bare value for the anonymous origin.
///
/// A zero origin is dropped however it was spelled, so `1A-00` prints as
/// `1A`. The output parses back to an equal stamp.
impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.origin.is_zero() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}-{}", self.value, self.origin)
        }
    }
}

impl FromStr for Stamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Stamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Stamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
