use std::fmt;

use bytes::Bytes;
use cmdlink_frame::Encoding;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ExchangeError, Result};

/// Opaque message bytes carried in a data or end frame.
///
/// The protocol never looks inside; the helpers here only exist so both
/// sides can agree on JSON or bincode without touching the codec directly.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    /// An empty payload.
    pub fn new() -> Self {
        Self(Bytes::new())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Serialize `value` as JSON.
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::encoded(Encoding::Json, value)
    }

    /// Serialize `value` with bincode.
    pub fn from_binary<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::encoded(Encoding::Binary, value)
    }

    pub fn encoded<T: Serialize + ?Sized>(encoding: Encoding, value: &T) -> Result<Self> {
        encoding
            .encode_value(value)
            .map(|bytes| Self(Bytes::from(bytes)))
            .map_err(ExchangeError::Payload)
    }

    /// Parse the bytes as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        self.decoded(Encoding::Json)
    }

    /// Parse the bytes as JSON, treating an empty payload as absent.
    pub fn json_opt<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.json().map(Some)
    }

    /// Parse the bytes as bincode.
    pub fn binary<T: DeserializeOwned>(&self) -> Result<T> {
        self.decoded(Encoding::Binary)
    }

    pub fn decoded<T: DeserializeOwned>(&self, encoding: Encoding) -> Result<T> {
        encoding
            .decode_value(&self.0)
            .map_err(ExchangeError::Payload)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The bytes as UTF-8 text, if they are.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.debug_tuple("Payload").field(&text).finish(),
            None => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Token {
        token: String,
    }

    #[test]
    fn json_helpers() {
        let payload = Payload::from_json(&Token {
            token: "xyz".to_string(),
        })
        .unwrap();

        assert_eq!(payload.as_str(), Some(r#"{"token":"xyz"}"#));
        let back: Token = payload.json().unwrap();
        assert_eq!(back.token, "xyz");
    }

    #[test]
    fn json_opt_treats_empty_as_absent() {
        let empty: Option<Token> = Payload::new().json_opt().unwrap();
        assert!(empty.is_none());

        let present: Option<Token> = Payload::from(r#"{"token":"a"}"#).json_opt().unwrap();
        assert_eq!(present.map(|t| t.token), Some("a".to_string()));
    }

    #[test]
    fn binary_helpers() {
        let payload = Payload::from_binary(&(7u32, "seven")).unwrap();
        let (n, word): (u32, String) = payload.binary().unwrap();
        assert_eq!(n, 7);
        assert_eq!(word, "seven");
    }

    #[test]
    fn bad_json_is_payload_error() {
        let err = Payload::from("not json").json::<Token>().unwrap_err();
        assert!(matches!(err, ExchangeError::Payload(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn conversions() {
        assert_eq!(Payload::from(vec![1u8, 2]).as_bytes(), &[1, 2]);
        assert_eq!(Payload::from("abc".to_string()).len(), 3);
        assert!(Payload::default().is_empty());
        assert_eq!(Payload::from_static(b"\xff").as_str(), None);
        assert_eq!(format!("{:?}", Payload::from("hi")), r#"Payload("hi")"#);
        assert_eq!(format!("{:?}", Payload::from_static(b"\xff\xfe")), "Payload(2 bytes)");
    }
}
