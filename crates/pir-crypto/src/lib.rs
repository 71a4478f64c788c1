//! Record codec for PIR datasets: AES-256-GCM sealing, HKDF-SHA256 key
//! derivation and SHA-256 integrity hashing over canonical JSON.

pub mod aes_gcm;
pub mod base64;
pub mod canonical;
pub mod error;
pub mod hkdf;
pub mod record;
pub mod types;

pub use crate::aes_gcm::{generate_iv, generate_salt, open, open_combined, seal, seal_combined, Sealed};
pub use crate::canonical::{canonical_json, sha256_hex};
pub use crate::error::CryptoError;
pub use crate::hkdf::hkdf_derive;
pub use crate::record::{
    decrypt_record, derive_record_key, encrypt_record, DecryptionKey, EncryptedRecord,
};
pub use crate::types::{EncryptionContext, ALGORITHM, SUPPORTED_ALGORITHMS};
