//! Operations: a stamped specifier paired with an opaque payload.

use crate::base64x64::Base64x64;
use crate::error::Error;
use crate::spec::Specifier;
use crate::stamp::Stamp;
use std::fmt;
use std::str::FromStr;

/// An immutable operation.
///
/// Wire form is one line: `<specifier>\t<value>`. The value is handed to the
/// model layer untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Op {
    spec: Specifier,
    value: String,
}

impl Op {
    /// Create an operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `spec` has no stamp token.
    pub fn new(spec: Specifier, value: impl Into<String>) -> Result<Self, Error> {
        if spec.stamp_token().is_none() {
            return Err(Error::format("operation", spec.to_string(), "missing '!' stamp token"));
        }
        Ok(Self {
            spec,
            value: value.into(),
        })
    }

    /// Parse the line form. A line without a tab has an empty value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the specifier is malformed or unstamped.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let (spec, value) = line.split_once('\t').unwrap_or((line, ""));
        Self::new(Specifier::parse(spec)?, value)
    }

    /// The operation's specifier.
    #[must_use]
    pub fn spec(&self) -> &Specifier {
        &self.spec
    }

    /// The opaque payload.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The event timestamp identifying this operation.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        self.spec.stamp()
    }

    /// The replica that issued this operation.
    #[must_use]
    pub fn origin(&self) -> Base64x64 {
        self.stamp().origin()
    }

    /// The object this operation targets.
    #[must_use]
    pub fn object(&self) -> Specifier {
        self.spec.object()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}", self.spec)
        } else {
            write!(f, "{}\t{}", self.spec, self.value)
        }
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
