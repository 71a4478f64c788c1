//! Base64 helpers for byte fields carried on the wire.

use base64ct::{Base64, Encoding};

/// Standard (padded) base64 encode.
pub fn base64_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Standard (padded) base64 decode.
pub fn base64_decode(s: &str) -> Result<Vec<u8>, base64ct::Error> {
    Base64::decode_vec(s)
}

/// `#[serde(with = "pir_crypto::base64::bytes")]` for `Vec<u8>` fields.
pub mod bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::base64_decode(&s).map_err(serde::de::Error::custom)
    }
}
