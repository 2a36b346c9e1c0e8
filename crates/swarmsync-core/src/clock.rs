//! Hybrid clock issuing strictly increasing, wall-clock-aligned timestamps.
//!
//! Each issued timestamp is the calendar encoding of the (offset-corrected)
//! wall clock, unless that would not exceed the last timestamp issued or
//! seen, in which case the last timestamp is bumped by one logical step.
//! Values are shortened to `min_length` symbols whenever that keeps them
//! ahead of the previous timestamp.

use crate::base64x64::Base64x64;
use crate::calendar::{self, SystemTime, TimeSource, CALENDAR_LENGTH};
use crate::error::Error;
use crate::stamp::Stamp;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default shortest value length (second precision).
pub const DEFAULT_MIN_LENGTH: usize = 6;

/// Clock construction options.
#[derive(Debug, Clone)]
pub struct ClockOptions {
    /// Shortest acceptable value length
    pub min_length: usize,
    /// Derive the offset from the initial timestamp's instant
    pub learn_offset: bool,
    /// Explicit offset in milliseconds; wins over `learn_offset`
    pub offset_ms: Option<i64>,
    /// Observed timestamps further ahead than this are reported as
    /// causality violations
    pub max_future_drift_ms: Option<i64>,
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            learn_offset: false,
            offset_ms: None,
            max_future_drift_ms: None,
        }
    }
}

/// Per-replica hybrid clock.
///
/// Not synchronized; wrap it in a [`SharedClock`] to use it from several
/// threads.
#[derive(Debug)]
pub struct Clock<T: TimeSource = SystemTime> {
    /// Last issued or observed timestamp
    last: Stamp,
    /// This replica's identifier
    origin: Base64x64,
    /// Correction added to every wall-clock read
    offset_ms: i64,
    min_length: usize,
    max_future_drift_ms: Option<i64>,
    time: T,
}

impl Clock<SystemTime> {
    /// Create a clock reading the system wall clock.
    ///
    /// The origin of `initial` becomes this replica's origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `learn_offset` is set and `initial` is
    /// not a valid calendar timestamp.
    pub fn new(initial: Stamp, options: ClockOptions) -> Result<Self, Error> {
        Self::with_time_source(initial, options, SystemTime)
    }

    /// Create a clock from the wire form of its initial timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `text` is not a valid timestamp.
    pub fn parse(text: &str, options: ClockOptions) -> Result<Self, Error> {
        Self::new(Stamp::parse(text)?, options)
    }
}

impl<T: TimeSource> Clock<T> {
    /// Create a clock reading an injected time source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `learn_offset` is set and `initial` is
    /// not a valid calendar timestamp.
    pub fn with_time_source(initial: Stamp, options: ClockOptions, time: T) -> Result<Self, Error> {
        let offset_ms = match (options.offset_ms, options.learn_offset) {
            (Some(offset_ms), _) => offset_ms,
            (None, true) => initial.ms()?.saturating_sub(time.now_ms()),
            (None, false) => 0,
        };

        tracing::debug!(
            origin = %initial.origin(),
            last = %initial,
            offset_ms,
            min_length = options.min_length,
            "Clock initialized"
        );

        Ok(Self {
            last: initial,
            origin: initial.origin(),
            offset_ms,
            min_length: options.min_length,
            max_future_drift_ms: options.max_future_drift_ms,
            time,
        })
    }

    /// This replica's origin.
    #[must_use]
    pub fn origin(&self) -> Base64x64 {
        self.origin
    }

    /// The last timestamp issued or seen.
    #[must_use]
    pub fn last(&self) -> Stamp {
        self.last
    }

    /// Offset applied to wall-clock reads.
    #[must_use]
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Shortest value length issued when the wall clock advances.
    #[must_use]
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Offset-corrected wall-clock time in milliseconds, saturating at the
    /// `i64` bounds.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.time.now_ms().saturating_add(self.offset_ms)
    }

    /// Issue a timestamp greater than every timestamp issued or seen so far.
    pub fn issue_timestamp(&mut self) -> Stamp {
        let candidate = match calendar::encode(self.now_ms(), 0) {
            Ok(value) => Some(Stamp::new(value, self.origin)),
            Err(err) => {
                tracing::warn!(error = %err, "Wall clock outside the calendar");
                None
            }
        };

        let next = match candidate {
            Some(candidate) if candidate > self.last => {
                if self.min_length < CALENDAR_LENGTH {
                    candidate.relax(&self.last.value(), self.min_length)
                } else {
                    Stamp::new(candidate.value().truncate(self.min_length), self.origin)
                }
            }
            _ => self.logical_next(),
        };

        self.last = next;
        next
    }

    fn logical_next(&self) -> Stamp {
        match self.last.next(self.origin) {
            Ok(next) => {
                tracing::trace!(last = %self.last, %next, "Wall clock behind, bumping sequence");
                next
            }
            Err(err) => {
                // the value cannot grow, only the origin can still break the tie
                let saturated = Stamp::new(self.last.value(), self.origin);
                if saturated > self.last {
                    tracing::warn!(
                        error = %err,
                        last = %self.last,
                        "Timestamp space exhausted, reusing top value"
                    );
                } else {
                    tracing::error!(
                        error = %err,
                        last = %self.last,
                        issued = %saturated,
                        "Timestamp space exhausted, monotonicity lost"
                    );
                }
                saturated
            }
        }
    }

    /// Fold in a timestamp observed from a peer or from storage.
    ///
    /// Returns `true` if it moved the clock forward. Timestamps that trip
    /// [`Clock::check_drift`] are logged but still adopted.
    pub fn see_timestamp(&mut self, stamp: Stamp) -> bool {
        if let Err(err) = self.check_drift(&stamp) {
            tracing::warn!(error = %err, "Adopting timestamp from a clock running ahead");
        }

        if stamp > self.last {
            self.last = stamp;
            true
        } else {
            false
        }
    }

    /// Fold in the wire form of an observed timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if `text` is not a valid timestamp.
    pub fn see_str(&mut self, text: &str) -> Result<bool, Error> {
        Ok(self.see_timestamp(Stamp::parse(text)?))
    }

    /// Check whether `stamp` lies further in the future than tolerated.
    ///
    /// Timestamps that are not calendar instants are never reported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CausalityViolation`] when `stamp` is more than
    /// `max_future_drift_ms` ahead of local time.
    pub fn check_drift(&self, stamp: &Stamp) -> Result<(), Error> {
        let Some(limit_ms) = self.max_future_drift_ms else {
            return Ok(());
        };
        let Ok(ms) = stamp.ms() else {
            return Ok(());
        };

        let ahead_ms = ms.saturating_sub(self.now_ms());
        if ahead_ms > limit_ms {
            return Err(Error::CausalityViolation {
                stamp: stamp.to_string(),
                ahead_ms,
                limit_ms,
            });
        }
        Ok(())
    }
}

/// A clock shared between threads; issue and see are serialized.
#[derive(Debug)]
pub struct SharedClock<T: TimeSource = SystemTime> {
    inner: Arc<Mutex<Clock<T>>>,
}

impl<T: TimeSource> Clone for SharedClock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TimeSource> SharedClock<T> {
    /// Wrap a clock.
    #[must_use]
    pub fn new(clock: Clock<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(clock)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Clock<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`Clock::issue_timestamp`].
    pub fn issue_timestamp(&self) -> Stamp {
        self.lock().issue_timestamp()
    }

    /// See [`Clock::see_timestamp`].
    pub fn see_timestamp(&self, stamp: Stamp) -> bool {
        self.lock().see_timestamp(stamp)
    }

    /// See [`Clock::last`].
    #[must_use]
    pub fn last(&self) -> Stamp {
        self.lock().last()
    }

    /// See [`Clock::origin`].
    #[must_use]
    pub fn origin(&self) -> Base64x64 {
        self.lock().origin()
    }
}
