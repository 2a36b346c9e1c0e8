//! Specifiers: structured identifiers addressing objects, members and events.
//!
//! Wire form is a run of marker-prefixed tokens in canonical order:
//!
//! | Marker | Token | Body |
//! |--------|-------|------|
//! | `/` | type | word |
//! | `#` | id | timestamp |
//! | `.` | member | word |
//! | `!` | stamp | timestamp |
//!
//! e.g. `/Model#1ABC-alice.set!1ABD-bob`. Every token is optional but may
//! appear at most once, and only in the order above.

use crate::base64x64::is_symbol;
use crate::error::Error;
use crate::stamp::Stamp;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A bare word: one or more symbols of the Base64x64 alphabet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Word(String);

impl Word {
    /// Validate a word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `text` is empty or contains a character
    /// outside the alphabet.
    pub fn parse(text: &str) -> Result<Self, Error> {
        if text.is_empty() {
            return Err(Error::format("word", text, "empty"));
        }
        if let Some(pos) = text.bytes().position(|b| !is_symbol(b)) {
            return Err(Error::format(
                "word",
                text,
                format!("invalid character at position {pos}"),
            ));
        }
        Ok(Self(text.to_string()))
    }

    /// The word's text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Word {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Kinds of specifier tokens, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenKind {
    /// Entity type
    Type,
    /// Entity identifier
    Id,
    /// Member (field or operation) name
    Member,
    /// Event timestamp
    Stamp,
}

impl TokenKind {
    /// The quoting marker of this kind.
    #[must_use]
    pub fn marker(self) -> char {
        match self {
            TokenKind::Type => '/',
            TokenKind::Id => '#',
            TokenKind::Member => '.',
            TokenKind::Stamp => '!',
        }
    }

    /// The kind quoted by `marker`, if any.
    #[must_use]
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            '/' => Some(TokenKind::Type),
            '#' => Some(TokenKind::Id),
            '.' => Some(TokenKind::Member),
            '!' => Some(TokenKind::Stamp),
            _ => None,
        }
    }
}

/// A single typed specifier token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Entity type, e.g. `/Model`
    Type(Word),
    /// Entity identifier, e.g. `#1ABC-alice`
    Id(Stamp),
    /// Member name, e.g. `.set`
    Member(Word),
    /// Event timestamp, e.g. `!1ABD-bob`
    Stamp(Stamp),
}

impl Token {
    /// This token's kind.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Type(_) => TokenKind::Type,
            Token::Id(_) => TokenKind::Id,
            Token::Member(_) => TokenKind::Member,
            Token::Stamp(_) => TokenKind::Stamp,
        }
    }

    fn parse(kind: TokenKind, body: &str) -> Result<Self, Error> {
        Ok(match kind {
            TokenKind::Type => Token::Type(Word::parse(body)?),
            TokenKind::Id => Token::Id(Stamp::parse(body)?),
            TokenKind::Member => Token::Member(Word::parse(body)?),
            TokenKind::Stamp => Token::Stamp(Stamp::parse(body)?),
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = self.kind().marker();
        match self {
            Token::Type(word) | Token::Member(word) => write!(f, "{marker}{word}"),
            Token::Id(stamp) | Token::Stamp(stamp) => write!(f, "{marker}{stamp}"),
        }
    }
}

/// An immutable, structurally compared identifier.
///
/// Display writes the canonical form: timestamps with a zero origin lose
/// their `-origin` part, so `/Doc#1A-0` prints as `/Doc#1A`. Parsing the
/// output always yields an equal specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Specifier {
    type_name: Option<Word>,
    id: Option<Stamp>,
    member: Option<Word>,
    stamp: Option<Stamp>,
}

impl Specifier {
    /// An empty specifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from tokens given in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if a token is repeated or out of order.
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Result<Self, Error> {
        let mut spec = Self::new();
        let mut previous: Option<TokenKind> = None;

        for token in tokens {
            let kind = token.kind();
            if previous.is_some_and(|p| p >= kind) {
                return Err(Error::format(
                    "specifier",
                    token.to_string(),
                    format!("token '{}' repeated or out of order", kind.marker()),
                ));
            }
            previous = Some(kind);
            spec.set(token);
        }

        Ok(spec)
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] on an unknown marker, an empty or malformed
    /// token body, or tokens that are repeated or out of canonical order.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let invalid = |reason: String| Error::format("specifier", text, reason);

        let mut spec = Self::new();
        let mut previous: Option<TokenKind> = None;
        let mut rest = text;

        while let Some(marker) = rest.chars().next() {
            let kind = TokenKind::from_marker(marker)
                .ok_or_else(|| invalid(format!("unknown marker {marker:?}")))?;
            if previous.is_some_and(|p| p >= kind) {
                return Err(invalid(format!("token '{marker}' repeated or out of order")));
            }

            let after = &rest[marker.len_utf8()..];
            let end = after
                .find(|c: char| !u8::try_from(c).is_ok_and(|b| is_symbol(b) || b == b'-'))
                .unwrap_or(after.len());
            let body = &after[..end];
            if body.is_empty() {
                return Err(invalid(format!("empty token after '{marker}'")));
            }

            let token = Token::parse(kind, body).map_err(|e| invalid(e.to_string()))?;
            spec.set(token);
            previous = Some(kind);
            rest = &after[end..];
        }

        Ok(spec)
    }

    fn set(&mut self, token: Token) {
        match token {
            Token::Type(word) => self.type_name = Some(word),
            Token::Id(stamp) => self.id = Some(stamp),
            Token::Member(word) => self.member = Some(word),
            Token::Stamp(stamp) => self.stamp = Some(stamp),
        }
    }

    /// Replace the type token.
    #[must_use]
    pub fn with_type(mut self, type_name: Word) -> Self {
        self.type_name = Some(type_name);
        self
    }

    /// Replace the id token.
    #[must_use]
    pub fn with_id(mut self, id: Stamp) -> Self {
        self.id = Some(id);
        self
    }

    /// Replace the member token.
    #[must_use]
    pub fn with_member(mut self, member: Word) -> Self {
        self.member = Some(member);
        self
    }

    /// Replace the stamp token.
    #[must_use]
    pub fn with_stamp(mut self, stamp: Stamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    /// Entity type, or `""`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.type_name.as_ref().map_or("", Word::as_str)
    }

    /// Entity id, or the zero timestamp.
    #[must_use]
    pub fn id(&self) -> Stamp {
        self.id.unwrap_or(Stamp::ZERO)
    }

    /// Member name, or `""`.
    #[must_use]
    pub fn member(&self) -> &str {
        self.member.as_ref().map_or("", Word::as_str)
    }

    /// Event timestamp, or the zero timestamp.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        self.stamp.unwrap_or(Stamp::ZERO)
    }

    /// The event timestamp, if the specifier carries one.
    #[must_use]
    pub fn stamp_token(&self) -> Option<Stamp> {
        self.stamp
    }

    /// The object this specifier addresses: type and id only.
    #[must_use]
    pub fn object(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            id: self.id,
            member: None,
            stamp: None,
        }
    }

    /// Present tokens in canonical order.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(4);
        if let Some(word) = &self.type_name {
            tokens.push(Token::Type(word.clone()));
        }
        if let Some(id) = self.id {
            tokens.push(Token::Id(id));
        }
        if let Some(word) = &self.member {
            tokens.push(Token::Member(word.clone()));
        }
        if let Some(stamp) = self.stamp {
            tokens.push(Token::Stamp(stamp));
        }
        tokens
    }

    /// Order by event timestamp alone, as an operation log is sorted.
    #[must_use]
    pub fn cmp_by_stamp(&self, other: &Self) -> Ordering {
        self.stamp().cmp(&other.stamp())
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in self.tokens() {
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

impl FromStr for Specifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Specifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Specifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_all_tokens() {
        let spec = Specifier::parse("/Model#1ABC-alice.set!1ABD-bob").unwrap();
        assert_eq!(spec.type_name(), "Model");
        assert_eq!(spec.id().to_string(), "1ABC-alice");
        assert_eq!(spec.member(), "set");
        assert_eq!(spec.stamp().to_string(), "1ABD-bob");
        assert_eq!(spec.to_string(), "/Model#1ABC-alice.set!1ABD-bob");
    }

    #[test]
    fn missing_tokens_have_defaults() {
        let spec = Specifier::parse("#obj").unwrap();
        assert_eq!(spec.type_name(), "");
        assert_eq!(spec.member(), "");
        assert_eq!(spec.stamp(), Stamp::ZERO);
        assert!(spec.stamp_token().is_none());
        assert_eq!(Specifier::parse("").unwrap(), Specifier::new());
    }

    #[test]
    fn unknown_marker_is_rejected() {
        let err = Specifier::parse("/Model%oops").unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("unknown marker"));
        assert!(Specifier::parse("Model").unwrap_err().is_format());
        assert!(Specifier::parse("/Mödel").unwrap_err().is_format());
    }

    #[test]
    fn order_and_repetition_are_enforced() {
        assert!(Specifier::parse("#id/Model").is_err());
        assert!(Specifier::parse("/A/B").is_err());
        assert!(Specifier::parse("!1A.set").is_err());
    }

    #[test]
    fn truncated_tokens_are_rejected() {
        for text in ["/", "/Model#", "/Model#id!", "!1A-", "#-x"] {
            assert!(Specifier::parse(text).unwrap_err().is_format(), "{text}");
        }
        assert!(Specifier::parse("/Mo-del").is_err());
    }

    #[test]
    fn from_tokens_checks_order() {
        let word = Word::parse("Model").unwrap();
        let ok = Specifier::from_tokens([Token::Type(word.clone()), Token::Stamp(Stamp::ZERO)]);
        assert_eq!(ok.unwrap().to_string(), "/Model!0");

        let bad = Specifier::from_tokens([Token::Stamp(Stamp::ZERO), Token::Type(word)]);
        assert!(bad.unwrap_err().is_format());
    }

    #[test]
    fn stamp_order_is_separate_from_equality() {
        let a = Specifier::parse("/A#x!1B").unwrap();
        let b = Specifier::parse("/B#y!1B").unwrap();
        let c = Specifier::parse("/A#x!1C").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.cmp_by_stamp(&b), Ordering::Equal);
        assert_eq!(a.cmp_by_stamp(&c), Ordering::Less);
    }

    #[test]
    fn object_drops_member_and_stamp() {
        let spec = Specifier::parse("/Model#obj.set!1B-me").unwrap();
        assert_eq!(spec.object().to_string(), "/Model#obj");
    }

    #[test]
    fn display_is_canonical() {
        let spec = Specifier::parse("/Doc#1A-0!1B-00").unwrap();
        let printed = spec.to_string();
        assert_eq!(printed, "/Doc#1A!1B");

        let reparsed = Specifier::parse(&printed).unwrap();
        assert_eq!(reparsed, spec);
        assert_eq!(reparsed.to_string(), printed);
    }

    fn word() -> impl Strategy<Value = Word> {
        "[0-9A-Za-z_~]{1,12}".prop_map(|s| Word::parse(&s).unwrap())
    }

    fn stamp() -> impl Strategy<Value = Stamp> {
        ("[0-9A-Za-z_~]{1,10}", "[0-9A-Za-z_~]{1,10}").prop_map(|(v, o)| {
            Stamp::parse(&format!("{v}-{o}")).unwrap()
        })
    }

    proptest! {
        #[test]
        fn parse_inverts_display(
            type_name in prop::option::of(word()),
            id in prop::option::of(stamp()),
            member in prop::option::of(word()),
            event in prop::option::of(stamp()),
        ) {
            let spec = Specifier { type_name, id, member, stamp: event };
            let text = spec.to_string();
            let parsed = Specifier::parse(&text).unwrap();
            prop_assert_eq!(&parsed, &spec);
            prop_assert_eq!(parsed.to_string(), text);
        }
    }
}
