//! # SwarmSync Core
//!
//! Causality and identity primitives for operation-based replication.
//!
//! This crate provides:
//! - Base64x64, an order-preserving compact encoding of 60-bit integers
//! - Calendar-encoded timestamps with a replica origin
//! - A hybrid clock issuing strictly increasing timestamps
//! - Specifiers addressing objects, members and events
//! - Operations and per-origin version vectors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base64x64;
pub mod calendar;
pub mod clock;
pub mod error;
pub mod op;
pub mod spec;
pub mod stamp;
pub mod vv;

pub use base64x64::Base64x64;
pub use calendar::{ManualTime, Reading, SystemTime, TimeSource};
pub use clock::{Clock, ClockOptions, SharedClock};
pub use error::Error;
pub use op::Op;
pub use spec::{Specifier, Token, Word};
pub use stamp::Stamp;
pub use vv::VersionVector;
