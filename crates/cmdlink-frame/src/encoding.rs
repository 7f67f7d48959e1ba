//! Inner encodings for envelopes and payload values.
//!
//! The length-prefixed framing is the same for both; only the bytes inside
//! differ. JSON objects always start with `{`, while a bincode envelope starts
//! with the little-endian discriminant of [`EnvelopeKind`](crate::EnvelopeKind),
//! so a reader can tell them apart without negotiation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Selects how envelopes (and typed payloads) are serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Structured text (`serde_json`).
    #[default]
    Json,
    /// Compact schema-bound binary (`bincode`).
    Binary,
}

impl Encoding {
    /// Serialize any value with this encoding.
    pub fn encode_value<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| FrameError::Encode(e.to_string()))
            }
            Encoding::Binary => {
                bincode::serialize(value).map_err(|e| FrameError::Encode(e.to_string()))
            }
        }
    }

    /// Deserialize any value with this encoding.
    pub fn decode_value<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Encoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| FrameError::Decode(e.to_string()))
            }
            Encoding::Binary => {
                bincode::deserialize(bytes).map_err(|e| FrameError::Decode(e.to_string()))
            }
        }
    }

    /// Serialize an envelope.
    pub fn encode(self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.encode_value(envelope)
    }

    /// Detect the encoding of `bytes`, parse the envelope and check its invariants.
    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        let encoding =
            Self::detect(bytes).ok_or_else(|| FrameError::Decode("empty envelope".to_string()))?;
        let envelope: Envelope = encoding.decode_value(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Guess the encoding from the first significant byte.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
        Some(if *first == b'{' {
            Encoding::Json
        } else {
            Encoding::Binary
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Binary => "binary",
        }
    }
}
