//! # SwarmSync Replica
//!
//! Reference host for the SwarmSync core. A replica:
//! 1. Restores its hybrid clock from the last persisted timestamp
//! 2. Stamps local operations and records them in an operation log
//! 3. Filters incoming operations through per-stream version vectors
//! 4. Answers handshakes with the operations a peer is missing
//!
//! Transport and the model layer stay outside: the runtime reads operation
//! lines from any async reader, and accepted operations go to a
//! [`ModelSink`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod persistence;
pub mod replica;
pub mod runtime;

pub use config::ReplicaConfig;
pub use persistence::{MemoryStore, ReplicaStore, SqliteStore};
pub use replica::{Applied, BatchReport, LogSink, ModelSink, Replica, ReplicaError};
