//! Versioned wire encoding.
//!
//! Every message travels as an [`Envelope`]: a version number, the sender's
//! rank, the tag, and the opaque payload bytes. Receivers check the version
//! before touching anything else, so schema drift fails loudly instead of
//! deserializing garbage.

use crate::types::{Rank, Tag, TransportError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current wire format version. Bump on any incompatible envelope or
/// payload layout change.
pub const WIRE_VERSION: u16 = 1;

/// The framed unit of transfer between ranks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub src: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(src: Rank, tag: Tag, payload: Vec<u8>) -> Self {
        Self {
            version: WIRE_VERSION,
            src,
            tag,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        bincode::serialize(self).map_err(|e| TransportError::Encode(e.to_string()))
    }

    /// Decode an envelope, checking the version field first.
    ///
    /// The version is the leading little-endian u16 of the frame, so a
    /// mismatched peer is rejected before its payload layout matters.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < 2 {
            return Err(TransportError::Decode("frame shorter than version field".into()));
        }
        let got = u16::from_le_bytes([bytes[0], bytes[1]]);
        if got != WIRE_VERSION {
            return Err(TransportError::VersionMismatch {
                got,
                expected: WIRE_VERSION,
            });
        }
        bincode::deserialize(bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Consume the envelope, verifying it came from `src` on `tag`.
    pub fn open(self, src: Rank, tag: Tag) -> Result<Vec<u8>, TransportError> {
        if self.tag != tag {
            return Err(TransportError::TagMismatch {
                src: self.src,
                got: self.tag,
                expected: tag,
            });
        }
        if self.src != src {
            return Err(TransportError::ReceiveFailed {
                src,
                tag,
                reason: format!("envelope sent by {}", self.src),
            });
        }
        Ok(self.payload)
    }
}

/// Serialize a payload value for the wire.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    bincode::serialize(value).map_err(|e| TransportError::Encode(e.to_string()))
}

/// Deserialize a payload value off the wire.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    bincode::deserialize(bytes).map_err(|e| TransportError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::new(Rank(3), Tag::grid(6), vec![1, 2, 3]);
        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.version, WIRE_VERSION);
        assert_eq!(decoded.src, Rank(3));
        let payload = decoded.open(Rank(3), Tag::grid(6)).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_version_rejected_before_payload() {
        let envelope = Envelope::new(Rank(0), Tag::setup(1), vec![9; 16]);
        let mut bytes = envelope.encode().unwrap();
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        let err = Envelope::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            TransportError::VersionMismatch { got: 0xFFFF, expected: WIRE_VERSION }
        ));
    }

    #[test]
    fn test_open_rejects_wrong_tag() {
        let envelope = Envelope::new(Rank(1), Tag::grid(2), vec![]);
        let err = envelope.open(Rank(1), Tag::grid(8)).unwrap_err();
        assert!(matches!(err, TransportError::TagMismatch { .. }));
    }

    #[test]
    fn test_open_rejects_wrong_sender() {
        let envelope = Envelope::new(Rank(1), Tag::grid(2), vec![]);
        let err = envelope.open(Rank(2), Tag::grid(2)).unwrap_err();
        assert!(matches!(err, TransportError::ReceiveFailed { .. }));
    }

    #[test]
    fn test_truncated_frame() {
        let err = Envelope::decode(&[0x01]).unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
