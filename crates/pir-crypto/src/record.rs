//! Authenticated record encryption.
//!
//! Each record gets its own 16-byte salt; the record key is
//! HKDF-SHA256(key_material, salt, RECORD_KEY_INFO). The plaintext is the
//! canonical JSON of the record, sealed with AES-256-GCM. The SHA-256 of that
//! canonical form is stored next to the ciphertext and re-checked after
//! decryption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::aes_gcm::{generate_salt, open, seal};
use crate::canonical::{canonical_json, sha256_hex};
use crate::error::CryptoError;
use crate::hkdf::hkdf_derive;
use crate::types::{
    EncryptionContext, AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, ALGORITHM,
    DEFAULT_AAD, RECORD_KEY_INFO, SALT_LENGTH, SUPPORTED_ALGORITHMS,
};

/// On-disk / on-wire form of an encrypted record.
///
/// Byte fields default to empty when absent so a payload with missing fields
/// still parses and is then rejected by [`decrypt_record`] as a format error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    #[serde(with = "crate::base64::bytes", default)]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::base64::bytes", default)]
    pub iv: Vec<u8>,
    #[serde(with = "crate::base64::bytes", default)]
    pub tag: Vec<u8>,
    #[serde(with = "crate::base64::bytes", default)]
    pub aad: Vec<u8>,
    #[serde(with = "crate::base64::bytes", default)]
    pub salt: Vec<u8>,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
}

impl EncryptedRecord {
    /// Parse the JSON wire form. Any parse failure is a format error.
    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(json).map_err(|e| CryptoError::Format(e.to_string()))
    }

    /// Parse from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, CryptoError> {
        serde_json::from_value(value).map_err(|e| CryptoError::Format(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    fn validate_shape(&self) -> Result<(), CryptoError> {
        if !SUPPORTED_ALGORITHMS.contains(&self.algorithm.as_str()) {
            return Err(CryptoError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        if self.ciphertext.is_empty() {
            return Err(CryptoError::Format("missing ciphertext".into()));
        }
        if self.iv.len() != AES_GCM_IV_LENGTH {
            return Err(CryptoError::Format(format!(
                "iv must be {} bytes, got {}",
                AES_GCM_IV_LENGTH,
                self.iv.len()
            )));
        }
        if self.tag.len() != AES_GCM_TAG_LENGTH {
            return Err(CryptoError::Format(format!(
                "tag must be {} bytes, got {}",
                AES_GCM_TAG_LENGTH,
                self.tag.len()
            )));
        }
        if self.aad.is_empty() {
            return Err(CryptoError::Format("missing aad".into()));
        }
        if self.salt.len() != SALT_LENGTH {
            return Err(CryptoError::Format(format!(
                "salt must be {} bytes, got {}",
                SALT_LENGTH,
                self.salt.len()
            )));
        }
        Ok(())
    }
}

/// Key accepted by [`decrypt_record`].
#[derive(Clone, Copy)]
pub enum DecryptionKey<'a> {
    /// Original key material; the record key is re-derived from the stored salt.
    Material(&'a [u8]),
    /// A record key previously obtained from [`derive_record_key`].
    Derived(&'a [u8]),
}

impl std::fmt::Debug for DecryptionKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptionKey::Material(_) => f.write_str("DecryptionKey::Material(..)"),
            DecryptionKey::Derived(_) => f.write_str("DecryptionKey::Derived(..)"),
        }
    }
}

/// Derive the per-record key for `record` from `key_material`.
pub fn derive_record_key(
    key_material: &[u8],
    record: &EncryptedRecord,
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, CryptoError> {
    if record.salt.len() != SALT_LENGTH {
        return Err(CryptoError::Format(format!(
            "salt must be {} bytes, got {}",
            SALT_LENGTH,
            record.salt.len()
        )));
    }
    Ok(Zeroizing::new(hkdf_derive(
        key_material,
        &record.salt,
        RECORD_KEY_INFO,
    )?))
}

/// Encrypt one record.
///
/// # Arguments
/// * `plaintext` - Record as JSON
/// * `key_material` - Secret the record key is derived from (any length > 0)
/// * `context` - Optional dataset binding written into the AAD
pub fn encrypt_record(
    plaintext: &Value,
    key_material: &[u8],
    context: Option<&EncryptionContext>,
) -> Result<EncryptedRecord, CryptoError> {
    let canonical = canonical_json(plaintext)?;
    let salt = generate_salt()?;
    let key = Zeroizing::new(hkdf_derive(key_material, &salt, RECORD_KEY_INFO)?);

    let aad = match context {
        Some(ctx) => ctx.to_aad(),
        None => DEFAULT_AAD.to_vec(),
    };

    let sealed = seal(&key[..], canonical.as_bytes(), &aad)?;

    Ok(EncryptedRecord {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv.to_vec(),
        tag: sealed.tag.to_vec(),
        aad,
        salt: salt.to_vec(),
        algorithm: ALGORITHM.to_string(),
        integrity_hash: sha256_hex(canonical.as_bytes()),
        created_at: Utc::now(),
    })
}

/// Decrypt one record and verify its integrity hash.
///
/// Errors:
/// * [`CryptoError::UnsupportedAlgorithm`] for any algorithm but `AES-GCM-256`
/// * [`CryptoError::Format`] for missing or mis-sized fields, or a non-JSON plaintext
/// * [`CryptoError::Integrity`] when the tag does not verify or the hash diverges
pub fn decrypt_record(
    record: &EncryptedRecord,
    key: DecryptionKey<'_>,
) -> Result<Value, CryptoError> {
    record.validate_shape()?;

    let derived;
    let record_key: &[u8] = match key {
        DecryptionKey::Material(material) => {
            derived = derive_record_key(material, record)?;
            &derived[..]
        }
        DecryptionKey::Derived(k) => {
            if k.len() != AES_KEY_LENGTH {
                return Err(CryptoError::InvalidKeyLength {
                    expected: AES_KEY_LENGTH,
                    got: k.len(),
                });
            }
            k
        }
    };

    let plaintext = Zeroizing::new(open(
        record_key,
        &record.iv,
        &record.ciphertext,
        &record.tag,
        &record.aad,
    )?);

    // A valid tag only proves the ciphertext came from this key; the hash
    // ties it to the record that was originally stored.
    if sha256_hex(&plaintext) != record.integrity_hash {
        return Err(CryptoError::Integrity(
            "plaintext hash does not match stored integrity hash".into(),
        ));
    }

    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Format(e.to_string()))
}
