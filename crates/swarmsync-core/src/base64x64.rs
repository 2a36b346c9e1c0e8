//! Base64x64: order-preserving compact encoding of 60-bit integers.
//!
//! A value is a string of up to [`MAX_LENGTH`] symbols drawn from
//! [`ALPHABET`], most significant symbol first. Shorter strings are read as
//! if right-padded with `0`, so `"A"` and `"A000000000"` denote the same
//! number and plain byte-wise comparison of the padded form is numeric
//! comparison.
//!
//! ```
//! use swarmsync_core::base64x64;
//!
//! assert_eq!(base64x64::encode(1 << 54, 0).unwrap(), "1");
//! assert_eq!(base64x64::decode("1").unwrap(), 1 << 54);
//! ```

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The 64 symbols in ascending order.
pub const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";

/// Symbols in a full-length value.
pub const MAX_LENGTH: usize = 10;

/// Largest representable integer (60 bits).
pub const MAX_VALUE: u64 = (1 << (6 * MAX_LENGTH)) - 1;

const ZERO_SYMBOL: u8 = b'0';
const TOP_SYMBOL: u8 = b'~';

/// Numeric value of a symbol, or `None` if it is outside the alphabet.
#[must_use]
pub fn symbol_value(symbol: u8) -> Option<u8> {
    match symbol {
        b'0'..=b'9' => Some(symbol - b'0'),
        b'A'..=b'Z' => Some(symbol - b'A' + 10),
        b'_' => Some(36),
        b'a'..=b'z' => Some(symbol - b'a' + 37),
        b'~' => Some(63),
        _ => None,
    }
}

/// Whether `symbol` belongs to the alphabet.
#[must_use]
pub fn is_symbol(symbol: u8) -> bool {
    symbol_value(symbol).is_some()
}

/// A compact value: up to ten symbols, compared as if right-padded with `0`.
///
/// Equality, ordering and hashing only look at the padded digits, so two
/// values that differ only by trailing zeros are equal. The textual length
/// is kept so that a parsed value prints back exactly as it was written.
#[derive(Clone, Copy)]
pub struct Base64x64 {
    /// Symbols, always padded with `0` up to `MAX_LENGTH`
    symbols: [u8; MAX_LENGTH],
    /// Number of significant symbols in the textual form
    len: u8,
}

impl Base64x64 {
    /// The zero value, written `"0"`.
    pub const ZERO: Self = Self {
        symbols: [ZERO_SYMBOL; MAX_LENGTH],
        len: 1,
    };

    /// Parse a value, keeping its textual length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `text` is longer than ten symbols or
    /// contains a character outside the alphabet.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let bytes = text.as_bytes();
        if bytes.len() > MAX_LENGTH {
            return Err(Error::format(
                "base64x64",
                text,
                format!("longer than {MAX_LENGTH} symbols"),
            ));
        }

        let mut symbols = [ZERO_SYMBOL; MAX_LENGTH];
        for (i, &b) in bytes.iter().enumerate() {
            if !is_symbol(b) {
                return Err(Error::format(
                    "base64x64",
                    text,
                    format!("invalid symbol at position {i}"),
                ));
            }
            symbols[i] = b;
        }

        Ok(Self {
            symbols,
            len: length_u8(bytes.len()),
        })
    }

    /// Encode an integer in its shortest form (at least one symbol).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `value` exceeds [`MAX_VALUE`].
    pub fn from_u64(value: u64) -> Result<Self, Error> {
        Self::from_u64_min(value, 1)
    }

    /// Encode an integer using at least `min_length` symbols.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `value` exceeds [`MAX_VALUE`].
    pub fn from_u64_min(value: u64, min_length: usize) -> Result<Self, Error> {
        if value > MAX_VALUE {
            return Err(Error::Range {
                value: value.to_string(),
                range: format!("0..={MAX_VALUE}"),
            });
        }

        let mut symbols = [ZERO_SYMBOL; MAX_LENGTH];
        for (i, symbol) in symbols.iter_mut().enumerate() {
            let shift = 6 * (MAX_LENGTH - 1 - i);
            // masked to 6 bits, always a valid index
            *symbol = ALPHABET[usize::try_from((value >> shift) & 63).unwrap_or(0)];
        }

        let full = Self {
            symbols,
            len: length_u8(MAX_LENGTH),
        };
        Ok(full.truncate(min_length.max(1)))
    }

    /// Decode to an integer.
    #[must_use]
    pub fn to_u64(&self) -> u64 {
        self.symbols.iter().fold(0u64, |acc, &s| {
            (acc << 6) | u64::from(symbol_value(s).unwrap_or(0))
        })
    }

    /// Number of symbols in the textual form.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Whether the textual form has no symbols at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the value is numerically zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.symbols.iter().all(|&s| s == ZERO_SYMBOL)
    }

    /// The textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // all symbols are ASCII
        std::str::from_utf8(&self.symbols[..self.len()]).unwrap_or_default()
    }

    /// Add one in the last symbol of the current length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] when every symbol is already `~`.
    pub fn increment(&self) -> Result<Self, Error> {
        let mut next = *self;
        for i in (0..self.len()).rev() {
            if next.symbols[i] == TOP_SYMBOL {
                next.symbols[i] = ZERO_SYMBOL;
                continue;
            }
            let digit = symbol_value(next.symbols[i]).unwrap_or(0);
            next.symbols[i] = ALPHABET[usize::from(digit) + 1];
            return Ok(next);
        }

        Err(Error::Overflow {
            input: self.as_str().to_string(),
            length: self.len(),
        })
    }

    /// The smallest value greater than this one that is at most one symbol
    /// longer: an increment, or an extra `1` once the length is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] only for the full-length maximum.
    pub fn succ(&self) -> Result<Self, Error> {
        match self.increment() {
            Ok(next) => Ok(next),
            Err(err) if self.len() >= MAX_LENGTH => Err(err),
            Err(_) => {
                let mut longer = *self;
                longer.symbols[self.len()] = ALPHABET[1];
                longer.len += 1;
                Ok(longer)
            }
        }
    }

    /// Drop trailing zero symbols, keeping at least `min_length` symbols.
    ///
    /// The value is unchanged.
    #[must_use]
    pub fn truncate(&self, min_length: usize) -> Self {
        let min_length = min_length.min(MAX_LENGTH);
        let mut len = self.len();
        while len > min_length && self.symbols[len - 1] == ZERO_SYMBOL {
            len -= 1;
        }
        if len < min_length {
            len = min_length;
        }
        Self {
            symbols: self.symbols,
            len: length_u8(len),
        }
    }

    /// Keep the first `length` symbols, zeroing the rest.
    #[must_use]
    pub fn prefix(&self, length: usize) -> Self {
        let length = length.min(MAX_LENGTH);
        let mut symbols = self.symbols;
        for symbol in &mut symbols[length..] {
            *symbol = ZERO_SYMBOL;
        }
        Self {
            symbols,
            len: length_u8(length),
        }
    }

    /// Shortest prefix of at least `min_length` symbols that is still
    /// greater than `baseline`.
    ///
    /// Returns the value itself (minus trailing zeros) when no prefix beats
    /// the baseline.
    #[must_use]
    pub fn relax(&self, baseline: &Self, min_length: usize) -> Self {
        let min_length = min_length.min(MAX_LENGTH);
        let full = self.len().max(min_length);
        (min_length..=full)
            .map(|length| self.prefix(length))
            .find(|candidate| candidate > baseline)
            .unwrap_or(*self)
            .truncate(min_length)
    }
}

fn length_u8(len: usize) -> u8 {
    // lengths never exceed MAX_LENGTH
    u8::try_from(len).unwrap_or(u8::MAX)
}

impl Default for Base64x64 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for Base64x64 {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
    }
}

impl Eq for Base64x64 {}

impl Ord for Base64x64 {
    fn cmp(&self, other: &Self) -> Ordering {
        // ASCII order of the alphabet is numeric order
        self.symbols.cmp(&other.symbols)
    }
}

impl PartialOrd for Base64x64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Base64x64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbols.hash(state);
    }
}

impl fmt::Display for Base64x64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Base64x64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base64x64({:?})", self.as_str())
    }
}

impl FromStr for Base64x64 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Base64x64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Base64x64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Encode `value` using at least `min_length` symbols.
///
/// # Errors
///
/// Returns [`Error::Range`] if `value` exceeds [`MAX_VALUE`].
pub fn encode(value: u64, min_length: usize) -> Result<String, Error> {
    Ok(Base64x64::from_u64_min(value, min_length)?.to_string())
}

/// Decode a string, treating missing trailing symbols as zeros.
///
/// # Errors
///
/// Returns [`Error::Format`] on a character outside the alphabet or a
/// string longer than ten symbols.
pub fn decode(text: &str) -> Result<u64, Error> {
    Ok(Base64x64::parse(text)?.to_u64())
}

/// Compare two encoded values numerically.
///
/// # Errors
///
/// Returns [`Error::Format`] if either side is malformed.
pub fn compare(a: &str, b: &str) -> Result<Ordering, Error> {
    Ok(Base64x64::parse(a)?.cmp(&Base64x64::parse(b)?))
}

/// Add one at the same symbol length.
///
/// # Errors
///
/// Returns [`Error::Format`] on malformed input and [`Error::Overflow`]
/// when the length's capacity is exhausted.
pub fn increment(text: &str) -> Result<String, Error> {
    Ok(Base64x64::parse(text)?.increment()?.to_string())
}

/// Drop trailing zero symbols, never going below `min_length`.
///
/// # Errors
///
/// Returns [`Error::Format`] on malformed input.
pub fn truncate(text: &str, min_length: usize) -> Result<String, Error> {
    Ok(Base64x64::parse(text)?.truncate(min_length).to_string())
}
