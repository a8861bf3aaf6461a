//! Base64 helpers for the h402 wire format.

use std::fmt::{self, Display, Formatter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Binary data that travels as a standard base64 string.
///
/// Used for wire transactions and PSBTs embedded in payment payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Decodes a base64 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid standard base64.
    pub fn decode<T: AsRef<[u8]>>(input: T) -> Result<Self, base64::DecodeError> {
        b64.decode(input.as_ref()).map(Self)
    }

    /// Encodes the bytes as a base64 string.
    #[must_use]
    pub fn encode(&self) -> String {
        b64.encode(&self.0)
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Base64Bytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
    }
}
