//! # SwarmSync Protocol
//!
//! Messages a transport carries between replicas.
//!
//! ## Messages
//!
//! - `Handshake`: a replica's last timestamp and version vector for a stream
//! - `OpBatch`: operations in line form, decoded one by one
//!
//! Both travel inside a [`Message`] envelope encoded as CBOR.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;

pub use messages::{CborMessage, Handshake, Message, MessageError, OpBatch};
