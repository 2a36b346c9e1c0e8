//! The replica: clock, version vectors, op log and model delivery.

use crate::config::ReplicaConfig;
use crate::persistence::ReplicaStore;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use swarmsync_core::{Base64x64, Clock, Op, Specifier, Stamp, SystemTime, TimeSource, VersionVector};
use swarmsync_proto::{Handshake, Message, OpBatch};

/// Errors raised by a replica.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// The storage backend failed
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Persisted state could not be parsed
    #[error("corrupt {what} in storage: {text:?}")]
    Corrupt {
        /// Kind of state
        what: &'static str,
        /// Stored text
        text: String,
        /// Parse failure
        #[source]
        source: swarmsync_core::Error,
    },

    /// Invalid timestamp, specifier or operation
    #[error(transparent)]
    Rejected(#[from] swarmsync_core::Error),
}

/// Receiver of accepted operations; the model layer lives behind it.
pub trait ModelSink {
    /// Hand over an operation that was accepted exactly once.
    fn deliver(&mut self, op: &Op);
}

/// A sink that only logs what it receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ModelSink for LogSink {
    fn deliver(&mut self, op: &Op) {
        tracing::debug!(spec = %op.spec(), value = op.value(), "Delivered op");
    }
}

impl ModelSink for Vec<Op> {
    fn deliver(&mut self, op: &Op) {
        self.push(op.clone());
    }
}

/// Outcome of applying one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// First time seen; logged and delivered
    New,
    /// Already covered by the stream's version vector
    Duplicate,
}

/// Outcome of applying a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Operations logged and delivered
    pub applied: usize,
    /// Operations skipped as already seen
    pub duplicates: usize,
    /// Offending lines with the reason they were refused
    pub rejected: Vec<(String, String)>,
}

/// A replica of any number of streams.
pub struct Replica<S: ReplicaStore, M: ModelSink, T: TimeSource = SystemTime> {
    clock: Clock<T>,
    store: S,
    sink: M,
    streams: HashMap<Specifier, VersionVector>,
}

impl<S: ReplicaStore, M: ModelSink> Replica<S, M> {
    /// Build a replica on the system clock from configuration.
    ///
    /// Without a configured origin the one persisted by a previous run is
    /// reused, so the restored clock state belongs to the same origin. The
    /// chosen origin is persisted. Configured streams have their version
    /// vectors loaded eagerly.
    ///
    /// # Errors
    ///
    /// Returns error if the clock cannot be built or persisted state is
    /// unreadable.
    pub fn open(config: &ReplicaConfig, mut store: S, sink: M) -> Result<Self, ReplicaError> {
        let stored = match store.load_origin()? {
            Some(text) => {
                Some(Base64x64::parse(&text).map_err(|source| corrupt("origin", text, source))?)
            }
            None => None,
        };
        let origin = config.resolve_origin(stored);
        if stored != Some(origin) {
            if let Some(stored) = stored {
                tracing::warn!(%stored, %origin, "Configured origin replaces the persisted one");
            }
            store.save_origin(&origin)?;
        }

        let clock = Clock::new(config.initial_stamp(origin), config.clock_options())?;
        let mut replica = Self::with_clock(clock, store, sink)?;

        for stream in &config.streams {
            let vv = replica.load_stream(stream)?;
            tracing::debug!(%stream, vv = %vv, "Loaded stream");
        }

        Ok(replica)
    }
}

impl<S: ReplicaStore, M: ModelSink, T: TimeSource> Replica<S, M, T> {
    /// Build a replica around an existing clock, restoring its last
    /// persisted timestamp.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or holds an unparseable timestamp.
    pub fn with_clock(mut clock: Clock<T>, store: S, sink: M) -> Result<Self, ReplicaError> {
        let origin = clock.origin();
        if let Some(text) = store.load_last_stamp(&origin)? {
            let stamp = Stamp::parse(&text).map_err(|source| corrupt("timestamp", text, source))?;
            clock.see_timestamp(stamp);
        }

        tracing::info!(%origin, last = %clock.last(), "Replica restored");

        Ok(Self {
            clock,
            store,
            sink,
            streams: HashMap::new(),
        })
    }

    /// This replica's origin.
    #[must_use]
    pub fn origin(&self) -> Base64x64 {
        self.clock.origin()
    }

    /// Last timestamp issued or seen.
    #[must_use]
    pub fn last(&self) -> Stamp {
        self.clock.last()
    }

    /// The model sink.
    #[must_use]
    pub fn sink(&self) -> &M {
        &self.sink
    }

    /// The storage backend.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current version vector of `stream`.
    ///
    /// # Errors
    ///
    /// Returns error if the stored vector cannot be loaded.
    pub fn version_vector(&mut self, stream: &Specifier) -> Result<VersionVector, ReplicaError> {
        Ok(self.load_stream(&stream.object())?.clone())
    }

    /// Stamp and record a local operation.
    ///
    /// Any stamp token already on `spec` is replaced.
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails.
    pub fn emit(&mut self, spec: Specifier, value: impl Into<String>) -> Result<Op, ReplicaError> {
        let stamp = self.clock.issue_timestamp();
        let op = Op::new(spec.with_stamp(stamp), value)?;
        if !self.record(&op)? {
            tracing::warn!(op = %op.spec(), "Fresh stamp already logged");
        }
        tracing::debug!(op = %op.spec(), "Emitted op");
        Ok(op)
    }

    /// Apply an operation received from elsewhere.
    ///
    /// Operations already covered by the stream's version vector are
    /// skipped; anonymous operations are always covered. An operation the
    /// log already holds only advances the version vector and is not
    /// delivered again.
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails.
    pub fn apply(&mut self, op: &Op) -> Result<Applied, ReplicaError> {
        let stamp = op.stamp();
        if self.load_stream(&op.object())?.covers(&stamp) {
            tracing::debug!(op = %op.spec(), "Skipping duplicate op");
            return Ok(Applied::Duplicate);
        }

        self.clock.see_timestamp(stamp);
        if self.record(op)? {
            Ok(Applied::New)
        } else {
            Ok(Applied::Duplicate)
        }
    }

    /// Apply every operation of a batch.
    ///
    /// Malformed operations, and operations addressed to another stream,
    /// are reported and skipped without affecting the rest.
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails.
    pub fn apply_batch(&mut self, batch: &OpBatch) -> Result<BatchReport, ReplicaError> {
        let mut report = BatchReport::default();

        for (line, decoded) in batch.ops.iter().zip(batch.decode_ops()) {
            let op = match decoded {
                Ok(op) if op.object() == batch.stream => op,
                Ok(op) => {
                    let reason = format!("addressed to {}, not {}", op.object(), batch.stream);
                    tracing::warn!(op = %line, %reason, "Rejected op");
                    report.rejected.push((line.clone(), reason));
                    continue;
                }
                Err(err) => {
                    tracing::warn!(op = %line, error = %err, "Rejected op");
                    report.rejected.push((line.clone(), err.to_string()));
                    continue;
                }
            };

            match self.apply(&op)? {
                Applied::New => report.applied += 1,
                Applied::Duplicate => report.duplicates += 1,
            }
        }

        tracing::debug!(
            stream = %batch.stream,
            applied = report.applied,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "Applied batch"
        );

        Ok(report)
    }

    /// The handshake announcing this replica's view of `stream`.
    ///
    /// # Errors
    ///
    /// Returns error if the stored vector cannot be loaded.
    pub fn handshake(&mut self, stream: &Specifier) -> Result<Handshake, ReplicaError> {
        let stream = stream.object();
        let vv = self.load_stream(&stream)?.clone();
        Ok(Handshake::new(stream, self.clock.last(), vv))
    }

    /// Logged operations the sender of `hello` has not seen, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be read.
    pub fn missing_for(&mut self, hello: &Handshake) -> Result<OpBatch, ReplicaError> {
        self.clock.see_timestamp(hello.stamp);

        let stream = hello.stream.object();
        let mut missing = Vec::new();
        for line in self.store.ops(&stream)? {
            let op = Op::parse(&line).map_err(|source| corrupt("operation", line, source))?;
            if !hello.vv.covers(&op.stamp()) {
                missing.push(op);
            }
        }
        missing.sort_by(|a, b| a.spec().cmp_by_stamp(b.spec()));

        tracing::debug!(
            %stream,
            peer = %hello.origin(),
            missing = missing.len(),
            "Answering handshake"
        );

        Ok(OpBatch::new(stream, &missing))
    }

    /// Handle a message, returning the reply if one is due.
    ///
    /// # Errors
    ///
    /// Returns error if persisting fails.
    pub fn handle(&mut self, message: &Message) -> Result<Option<Message>, ReplicaError> {
        match message {
            Message::Handshake(hello) => Ok(Some(Message::Ops(self.missing_for(hello)?))),
            Message::Ops(batch) => {
                self.apply_batch(batch)?;
                Ok(None)
            }
        }
    }

    /// Log `op`, deliver it unless the log already held it, then persist
    /// its stream's advanced vector. The cached vector changes only once the
    /// store has accepted the new one, so a failed write can be retried.
    fn record(&mut self, op: &Op) -> Result<bool, ReplicaError> {
        let stream = op.object();
        let mut vv = self.load_stream(&stream)?.clone();
        vv.update(op.stamp());

        let logged = self.store.append_op(op)?;
        if logged {
            self.sink.deliver(op);
        } else {
            tracing::debug!(op = %op.spec(), "Op already logged, not delivering");
        }

        self.store.save_vv(&stream, &vv)?;
        self.store
            .save_last_stamp(&self.clock.origin(), &self.clock.last())?;
        self.streams.insert(stream, vv);
        Ok(logged)
    }

    fn load_stream(&mut self, stream: &Specifier) -> Result<&mut VersionVector, ReplicaError> {
        match self.streams.entry(stream.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let vv = match self.store.load_vv(stream)? {
                    Some(text) => VersionVector::parse(&text)
                        .map_err(|source| corrupt("version vector", text, source))?,
                    None => VersionVector::new(),
                };
                Ok(entry.insert(vv))
            }
        }
    }
}

fn corrupt(what: &'static str, text: String, source: swarmsync_core::Error) -> ReplicaError {
    ReplicaError::Corrupt { what, text, source }
}
