//! Protocol messages for operation replication.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use swarmsync_core::{Op, Specifier, Stamp, VersionVector};

/// CBOR encoding shared by every message type.
pub trait CborMessage: Serialize + DeserializeOwned {
    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid message.
    fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// A replica's view of a stream, sent when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// The object whose operations are exchanged
    pub stream: Specifier,
    /// Sender's last issued or seen timestamp
    pub stamp: Stamp,
    /// Operations the sender already has
    pub vv: VersionVector,
    /// Sender version
    pub version: String,
}

impl Handshake {
    /// Create a handshake.
    #[must_use]
    pub fn new(stream: Specifier, stamp: Stamp, vv: VersionVector) -> Self {
        Self {
            stream,
            stamp,
            vv,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The sending replica.
    #[must_use]
    pub fn origin(&self) -> swarmsync_core::Base64x64 {
        self.stamp.origin()
    }
}

impl CborMessage for Handshake {}

/// A batch of operations for one stream.
///
/// Operations travel in line form so that one malformed entry can be
/// rejected without discarding the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpBatch {
    /// The object these operations target
    pub stream: Specifier,
    /// Operations in `<specifier>\t<value>` form
    pub ops: Vec<String>,
}

impl OpBatch {
    /// Create a batch from operations.
    #[must_use]
    pub fn new<'a>(stream: Specifier, ops: impl IntoIterator<Item = &'a Op>) -> Self {
        Self {
            stream,
            ops: ops.into_iter().map(ToString::to_string).collect(),
        }
    }

    /// Decode every line, keeping failures in place.
    #[must_use]
    pub fn decode_ops(&self) -> Vec<Result<Op, swarmsync_core::Error>> {
        self.ops.iter().map(|line| Op::parse(line)).collect()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch carries no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl CborMessage for OpBatch {}

/// Envelope for everything a transport delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Session opening
    Handshake(Handshake),
    /// Operations
    Ops(OpBatch),
}

impl CborMessage for Message {}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Specifier {
        Specifier::parse("/Model#1ABC-alice").unwrap()
    }

    #[test]
    fn handshake_cbor_roundtrip() {
        let vv = VersionVector::parse("alice:1ABC,bob:1ABD").unwrap();
        let hello = Handshake::new(stream(), Stamp::parse("1ABE-bob").unwrap(), vv);

        let bytes = hello.to_cbor().unwrap();
        let decoded = Handshake::from_cbor(&bytes).unwrap();

        assert_eq!(decoded, hello);
        assert_eq!(decoded.origin().as_str(), "bob");
    }

    #[test]
    fn batch_keeps_bad_lines_in_place() {
        let good = Op::parse("/Model#1ABC-alice.set!1ABD-bob\t42").unwrap();
        let mut batch = OpBatch::new(stream(), [&good]);
        batch.ops.push("/Model#1ABC-alice.set?oops\t1".to_string());
        batch.ops.push("/Model#1ABC-alice.set!1ABE-bob\t43".to_string());

        let decoded = batch.decode_ops();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap(), &good);
        assert!(decoded[1].as_ref().unwrap_err().is_format());
        assert_eq!(decoded[2].as_ref().unwrap().value(), "43");
    }

    #[test]
    fn envelope_cbor_roundtrip() {
        let op = Op::parse("/Model#1ABC-alice.set!1ABD-bob\t42").unwrap();
        let message = Message::Ops(OpBatch::new(stream(), [&op]));

        let bytes = message.to_cbor().unwrap();
        assert_eq!(Message::from_cbor(&bytes).unwrap(), message);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Message::from_cbor(&[0xff, 0x00, 0x13]).is_err());
    }
}
