//! Errors shared by the codec, timestamp, specifier and version vector types.

/// Errors that can occur when parsing, encoding or advancing values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed wire text
    #[error("malformed {kind} {input:?}: {reason}")]
    Format {
        /// What was being parsed
        kind: &'static str,
        /// The offending input
        input: String,
        /// Why it was rejected
        reason: String,
    },
    /// Value lies outside the representable range
    #[error("{value} is outside the representable range {range}")]
    Range {
        /// Requested value
        value: String,
        /// Representable range
        range: String,
    },
    /// Increment exceeds the capacity of the symbol length
    #[error("incrementing {input:?} overflows {length} symbols")]
    Overflow {
        /// Value being incremented
        input: String,
        /// Symbol length that ran out
        length: usize,
    },
    /// A timestamp appears to come from a clock far in the future
    #[error("timestamp {stamp} is {ahead_ms}ms ahead of local time (limit {limit_ms}ms)")]
    CausalityViolation {
        /// The observed timestamp
        stamp: String,
        /// How far ahead of local time it is
        ahead_ms: i64,
        /// Configured tolerance
        limit_ms: i64,
    },
}

impl Error {
    pub(crate) fn format(
        kind: &'static str,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Format {
            kind,
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports malformed wire text.
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }
}
