use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Discriminant carried by every envelope.
///
/// `End` is the end-of-exchange sentinel. It follows the `Success` field
/// rules and may carry a closing payload; older peers that only know
/// `Success`/`Error` never send it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Error,
    Success,
    End,
}

/// The structured unit inside one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub error_code: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    /// Base64 text in JSON, raw bytes in bincode.
    #[serde(default, with = "data_bytes")]
    pub data: Option<Vec<u8>>,
}

mod data_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            data.as_ref()
                .map(|bytes| STANDARD.encode(bytes))
                .serialize(serializer)
        } else {
            data.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        if deserializer.is_human_readable() {
            Option::<String>::deserialize(deserializer)?
                .map(|text| STANDARD.decode(text).map_err(D::Error::custom))
                .transpose()
        } else {
            Option::<Vec<u8>>::deserialize(deserializer)
        }
    }
}

impl Envelope {
    /// A data-carrying success envelope. Empty data is stored as `None`.
    pub fn success(data: impl Into<Vec<u8>>) -> Self {
        Self::with_data(EnvelopeKind::Success, data.into())
    }

    /// The end-of-exchange sentinel, optionally carrying a final payload.
    pub fn end(data: impl Into<Vec<u8>>) -> Self {
        Self::with_data(EnvelopeKind::End, data.into())
    }

    /// An error envelope. Error envelopes never carry data.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Error,
            error_code: Some(code),
            message: Some(message.into()),
            data: None,
        }
    }

    fn with_data(kind: EnvelopeKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            error_code: None,
            message: None,
            data: (!data.is_empty()).then_some(data),
        }
    }

    /// The data bytes, empty when absent.
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Move the data bytes out, empty when absent.
    pub fn into_data(self) -> Vec<u8> {
        self.data.unwrap_or_default()
    }

    pub fn is_error(&self) -> bool {
        self.kind == EnvelopeKind::Error
    }

    pub fn is_end(&self) -> bool {
        self.kind == EnvelopeKind::End
    }

    /// Check the kind/field invariants.
    ///
    /// - `Error`: `message` is set and `data` is empty.
    /// - `Success`/`End`: `error_code` and `message` are unset.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            EnvelopeKind::Error => {
                if self.message.is_none() {
                    return Err(FrameError::InvalidEnvelope("error envelope without message"));
                }
                if !self.data().is_empty() {
                    return Err(FrameError::InvalidEnvelope("error envelope carries data"));
                }
            }
            EnvelopeKind::Success | EnvelopeKind::End => {
                if self.error_code.is_some() || self.message.is_some() {
                    return Err(FrameError::InvalidEnvelope(
                        "non-error envelope carries error fields",
                    ));
                }
            }
        }
        Ok(())
    }
}
