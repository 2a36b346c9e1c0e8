//! Replica configuration.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use swarmsync_core::base64x64::MAX_VALUE;
use swarmsync_core::clock::DEFAULT_MIN_LENGTH;
use swarmsync_core::{Base64x64, ClockOptions, Specifier, Stamp};
use uuid::Uuid;

/// Replica configuration.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Replica origin; generated when absent
    pub origin: Option<Base64x64>,

    /// Clock configuration
    pub clock: ClockConfig,

    /// Persistence configuration
    pub persistence: PersistenceConfig,

    /// Streams whose version vectors are loaded at startup
    pub streams: Vec<Specifier>,
}

/// Clock configuration.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Shortest timestamp value length
    pub min_length: usize,

    /// Explicit wall-clock correction in milliseconds
    pub offset_ms: Option<i64>,

    /// Externally dictated current time; the clock learns its offset from it
    pub reference_stamp: Option<Stamp>,

    /// Tolerated lead of observed timestamps before a warning
    pub max_future_drift_ms: Option<i64>,
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Persistence type: "sqlite" or "memory"
    pub store_type: String,

    /// Database path (for `SQLite`)
    pub db_path: PathBuf,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            origin: None,
            clock: ClockConfig {
                min_length: DEFAULT_MIN_LENGTH,
                offset_ms: None,
                reference_stamp: None,
                max_future_drift_ms: Some(60_000),
            },
            persistence: PersistenceConfig {
                store_type: "sqlite".to_string(),
                db_path: PathBuf::from("./swarmsync.db"),
            },
            streams: Vec::new(),
        }
    }
}

impl ReplicaConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SWARMSYNC_ORIGIN`: Replica origin (Base64x64)
    /// - `SWARMSYNC_MIN_LENGTH`: Shortest timestamp value length
    /// - `SWARMSYNC_CLOCK_OFFSET_MS`: Explicit clock offset
    /// - `SWARMSYNC_REFERENCE_STAMP`: Timestamp to learn the clock offset from
    /// - `SWARMSYNC_MAX_DRIFT_MS`: Future drift tolerance (`off` disables)
    /// - `SWARMSYNC_STORE`: "sqlite" or "memory"
    /// - `SWARMSYNC_DB_PATH`: `SQLite` database path
    /// - `SWARMSYNC_STREAMS`: JSON array of stream specifiers
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(origin) = lookup("SWARMSYNC_ORIGIN") {
            let origin = Base64x64::parse(&origin).context("Invalid SWARMSYNC_ORIGIN")?;
            if origin.is_zero() {
                bail!("SWARMSYNC_ORIGIN must not be zero");
            }
            config.origin = Some(origin);
        }

        if let Some(min_length) = lookup("SWARMSYNC_MIN_LENGTH") {
            config.clock.min_length = min_length
                .parse()
                .context("Invalid SWARMSYNC_MIN_LENGTH")?;
        }

        if let Some(offset) = lookup("SWARMSYNC_CLOCK_OFFSET_MS") {
            config.clock.offset_ms =
                Some(offset.parse().context("Invalid SWARMSYNC_CLOCK_OFFSET_MS")?);
        }

        if let Some(stamp) = lookup("SWARMSYNC_REFERENCE_STAMP") {
            config.clock.reference_stamp =
                Some(Stamp::parse(&stamp).context("Invalid SWARMSYNC_REFERENCE_STAMP")?);
        }

        if let Some(drift) = lookup("SWARMSYNC_MAX_DRIFT_MS") {
            config.clock.max_future_drift_ms = if drift == "off" {
                None
            } else {
                Some(drift.parse().context("Invalid SWARMSYNC_MAX_DRIFT_MS")?)
            };
        }

        if let Some(store_type) = lookup("SWARMSYNC_STORE") {
            config.persistence.store_type = store_type;
        }

        if let Some(db_path) = lookup("SWARMSYNC_DB_PATH") {
            config.persistence.db_path = PathBuf::from(db_path);
        }

        // Parse streams from JSON env var
        if let Some(streams_json) = lookup("SWARMSYNC_STREAMS") {
            let streams: Vec<String> =
                serde_json::from_str(&streams_json).context("Invalid SWARMSYNC_STREAMS JSON")?;
            config.streams = streams
                .iter()
                .map(|text| Specifier::parse(text).map(|spec| spec.object()))
                .collect::<Result<_, _>>()
                .context("Invalid stream in SWARMSYNC_STREAMS")?;
        }

        Ok(config)
    }

    /// The configured origin, else the one a previous run persisted, else a
    /// fresh random one.
    #[must_use]
    pub fn resolve_origin(&self, stored: Option<Base64x64>) -> Base64x64 {
        self.origin.or(stored).unwrap_or_else(random_origin)
    }

    /// Clock options derived from this configuration.
    #[must_use]
    pub fn clock_options(&self) -> ClockOptions {
        ClockOptions {
            min_length: self.clock.min_length,
            learn_offset: self.clock.reference_stamp.is_some(),
            offset_ms: self.clock.offset_ms,
            max_future_drift_ms: self.clock.max_future_drift_ms,
        }
    }

    /// The timestamp a fresh clock for `origin` starts from.
    #[must_use]
    pub fn initial_stamp(&self, origin: Base64x64) -> Stamp {
        let value = self
            .clock
            .reference_stamp
            .map_or(Base64x64::ZERO, |stamp| stamp.value());
        Stamp::new(value, origin)
    }
}

/// A random five-symbol origin.
#[must_use]
pub fn random_origin() -> Base64x64 {
    const BITS: u32 = 30;
    let (high, _) = Uuid::new_v4().as_u64_pair();
    let random = (high & ((1 << BITS) - 1)).max(1);
    // left-aligned so the origin prints as five symbols
    Base64x64::from_u64((random << BITS) & MAX_VALUE).unwrap_or(Base64x64::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = ReplicaConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.origin.is_none());
        assert_eq!(config.clock.min_length, DEFAULT_MIN_LENGTH);
        assert_eq!(config.persistence.store_type, "sqlite");
        assert!(config.streams.is_empty());
        assert!(!config.clock_options().learn_offset);
    }

    #[test]
    fn reads_all_variables() {
        let config = ReplicaConfig::from_lookup(lookup(&[
            ("SWARMSYNC_ORIGIN", "alice"),
            ("SWARMSYNC_MIN_LENGTH", "8"),
            ("SWARMSYNC_CLOCK_OFFSET_MS", "-250"),
            ("SWARMSYNC_REFERENCE_STAMP", "1ABCDEF-server"),
            ("SWARMSYNC_MAX_DRIFT_MS", "off"),
            ("SWARMSYNC_STORE", "memory"),
            ("SWARMSYNC_DB_PATH", "/tmp/replica.db"),
            ("SWARMSYNC_STREAMS", r#"["/Model#1A-alice", "/Model#1B-bob.set!1C-bob"]"#),
        ]))
        .unwrap();

        assert_eq!(config.origin.unwrap().as_str(), "alice");
        assert_eq!(config.persistence.db_path, PathBuf::from("/tmp/replica.db"));

        let options = config.clock_options();
        assert_eq!(options.min_length, 8);
        assert_eq!(options.offset_ms, Some(-250));
        assert!(options.learn_offset);
        assert_eq!(options.max_future_drift_ms, None);

        let initial = config.initial_stamp(config.origin.unwrap());
        assert_eq!(initial.to_string(), "1ABCDEF-alice");

        let streams: Vec<String> = config.streams.iter().map(ToString::to_string).collect();
        assert_eq!(streams, ["/Model#1A-alice", "/Model#1B-bob"]);
    }

    #[test]
    fn rejects_invalid_values() {
        for vars in [
            [("SWARMSYNC_ORIGIN", "not-valid")],
            [("SWARMSYNC_ORIGIN", "000")],
            [("SWARMSYNC_MIN_LENGTH", "six")],
            [("SWARMSYNC_REFERENCE_STAMP", "-x")],
            [("SWARMSYNC_STREAMS", "[\"/Model%x\"]")],
        ] {
            assert!(ReplicaConfig::from_lookup(lookup(&vars)).is_err(), "{vars:?}");
        }
    }

    #[test]
    fn configured_origin_wins_over_stored() {
        let stored = Base64x64::parse("old").unwrap();

        let config = ReplicaConfig {
            origin: Some(Base64x64::parse("new").unwrap()),
            ..ReplicaConfig::default()
        };
        assert_eq!(config.resolve_origin(Some(stored)).as_str(), "new");

        let config = ReplicaConfig::default();
        assert_eq!(config.resolve_origin(Some(stored)), stored);
        assert!(!config.resolve_origin(None).is_zero());
    }

    #[test]
    fn random_origins_are_short_and_nonzero() {
        let origin = random_origin();
        assert!(!origin.is_zero());
        assert!(origin.len() <= 5);
    }
}
