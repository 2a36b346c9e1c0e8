//! Version vectors: the per-origin frontier of operations already seen.
//!
//! Wire form is `origin:value` pairs joined by `,`, sorted by origin.
//! Trailing zero symbols are stripped, so equal vectors print the same.

use crate::base64x64::Base64x64;
use crate::error::Error;
use crate::stamp::Stamp;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Highest timestamp value seen from each origin.
///
/// Forms a join-semilattice under [`VersionVector::merge`]. The anonymous
/// origin is never recorded and always counts as covered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VersionVector {
    entries: BTreeMap<Base64x64, Base64x64>,
}

impl VersionVector {
    /// An empty vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stamp` if it is newer than what is known for its origin.
    ///
    /// Returns `true` if the vector changed.
    pub fn update(&mut self, stamp: Stamp) -> bool {
        if stamp.is_anonymous() {
            return false;
        }
        let (origin, value) = (canonical(stamp.origin()), canonical(stamp.value()));
        match self.entries.get_mut(&origin) {
            Some(current) if *current >= value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.entries.insert(origin, value);
                true
            }
        }
    }

    /// Whether an operation stamped `stamp` has already been seen.
    #[must_use]
    pub fn covers(&self, stamp: &Stamp) -> bool {
        stamp.is_anonymous()
            || self
                .entries
                .get(&stamp.origin())
                .is_some_and(|seen| *seen >= stamp.value())
    }

    /// Whether every entry of `other` is covered by this vector.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        other.iter().all(|stamp| self.covers(&stamp))
    }

    /// Per-origin maximum of both vectors.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// Fold `other` into this vector.
    pub fn merge_from(&mut self, other: &Self) {
        for stamp in other.iter() {
            self.update(stamp);
        }
    }

    /// Highest value seen from `origin`.
    #[must_use]
    pub fn get(&self, origin: &Base64x64) -> Option<Base64x64> {
        self.entries.get(origin).copied()
    }

    /// Entries as timestamps, sorted by origin.
    pub fn iter(&self) -> impl Iterator<Item = Stamp> + '_ {
        self.entries
            .iter()
            .map(|(origin, value)| Stamp::new(*value, *origin))
    }

    /// Number of origins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no origin has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] on a malformed pair, an anonymous origin or
    /// a repeated origin.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut vv = Self::new();
        if text.is_empty() {
            return Ok(vv);
        }

        for pair in text.split(',') {
            let invalid = |reason: String| Error::format("version vector", text, reason);
            let (origin, value) = pair
                .split_once(':')
                .ok_or_else(|| invalid(format!("pair {pair:?} lacks ':'")))?;
            let origin = Base64x64::parse(origin).map_err(|e| invalid(e.to_string()))?;
            let value = Base64x64::parse(value).map_err(|e| invalid(e.to_string()))?;
            if origin.is_zero() {
                return Err(invalid("anonymous origin".to_string()));
            }
            if vv.entries.insert(canonical(origin), canonical(value)).is_some() {
                return Err(invalid(format!("origin {origin} repeated")));
            }
        }

        Ok(vv)
    }
}

fn canonical(symbols: Base64x64) -> Base64x64 {
    symbols.truncate(1)
}

impl FromIterator<Stamp> for VersionVector {
    fn from_iter<I: IntoIterator<Item = Stamp>>(iter: I) -> Self {
        let mut vv = Self::new();
        for stamp in iter {
            vv.update(stamp);
        }
        vv
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (origin, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{origin}:{value}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionVector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stamp(text: &str) -> Stamp {
        Stamp::parse(text).unwrap()
    }

    #[test]
    fn update_never_decreases() {
        let mut vv = VersionVector::new();
        assert!(vv.update(stamp("1-A")));
        assert!(!vv.update(stamp("0-A")));

        assert!(vv.covers(&stamp("0-A")));
        assert!(vv.covers(&stamp("1-A")));
        assert!(!vv.covers(&stamp("2-A")));
        assert!(!vv.covers(&stamp("0-B")));
        assert_eq!(vv.get(&Base64x64::parse("A").unwrap()).unwrap().as_str(), "1");
    }

    #[test]
    fn anonymous_stamps_are_always_covered() {
        let mut vv = VersionVector::new();
        assert!(vv.covers(&stamp("zzz")));
        assert!(!vv.update(stamp("zzz")));
        assert!(vv.is_empty());
    }

    #[test]
    fn serializes_sorted_by_origin() {
        let vv: VersionVector = [stamp("1B-zed"), stamp("1A-amy"), stamp("1C-Bob")]
            .into_iter()
            .collect();
        assert_eq!(vv.to_string(), "Bob:1C,amy:1A,zed:1B");
        assert_eq!(VersionVector::parse(&vv.to_string()).unwrap(), vv);
        assert_eq!(VersionVector::parse("").unwrap(), VersionVector::new());
    }

    #[test]
    fn parse_rejects_malformed_pairs() {
        for text in ["amy", "amy:1A,", "amy:1A,amy:1B", "0:1A", "a-b:1", "amy:1.A"] {
            assert!(VersionVector::parse(text).unwrap_err().is_format(), "{text}");
        }
    }

    #[test]
    fn dominates_compares_frontiers() {
        let small: VersionVector = [stamp("1A-amy")].into_iter().collect();
        let big: VersionVector = [stamp("1B-amy"), stamp("1A-bob")].into_iter().collect();
        assert!(big.dominates(&small));
        assert!(!small.dominates(&big));
        assert!(small.dominates(&VersionVector::new()));
    }

    #[test]
    fn trailing_zeros_do_not_change_the_wire_form() {
        let short = VersionVector::parse("amy:1A").unwrap();
        let long = VersionVector::parse("amy:1A0").unwrap();
        assert_eq!(short, long);
        assert_eq!(long.to_string(), "amy:1A");
        assert_eq!(short.merge(&long).to_string(), long.merge(&short).to_string());

        let padded: VersionVector = [stamp("1B00-amy0")].into_iter().collect();
        assert_eq!(padded.to_string(), "amy:1B");
        assert_eq!(VersionVector::parse("amy:0").unwrap().to_string(), "amy:0");
        assert!(VersionVector::parse("amy:1A,amy0:1B").unwrap_err().is_format());
    }

    fn vector() -> impl Strategy<Value = VersionVector> {
        let pair = ("[0-9A-Z]{1,3}0{0,2}", "[1-9a-z]{1,2}0{0,2}");
        prop::collection::vec(pair, 0..8).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(value, origin)| stamp(&format!("{value}-{origin}")))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in vector(), b in vector()) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
            prop_assert_eq!(a.merge(&b).to_string(), b.merge(&a).to_string());
        }

        #[test]
        fn merge_is_idempotent(a in vector()) {
            prop_assert_eq!(a.merge(&a), a);
        }

        #[test]
        fn merge_is_associative(a in vector(), b in vector(), c in vector()) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }

        #[test]
        fn merge_covers_both_sides(a in vector(), b in vector()) {
            let merged = a.merge(&b);
            prop_assert!(merged.dominates(&a));
            prop_assert!(merged.dominates(&b));
        }

        #[test]
        fn wire_form_round_trips(a in vector()) {
            prop_assert_eq!(VersionVector::parse(&a.to_string()).unwrap(), a);
        }
    }
}
