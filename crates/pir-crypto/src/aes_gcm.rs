//! AES-256-GCM primitives.
//!
//! Records keep IV, ciphertext and tag as separate fields (detached form).
//! Query markers and onion layers use the combined form:
//! [12 bytes: IV][N bytes: ciphertext + tag]

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::CryptoError;
use crate::types::{AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, SALT_LENGTH};

/// Output of a detached seal.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub iv: [u8; AES_GCM_IV_LENGTH],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; AES_GCM_TAG_LENGTH],
}

/// Generate a random 12-byte IV for AES-GCM.
pub fn generate_iv() -> Result<[u8; AES_GCM_IV_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// Generate a random per-record key-derivation salt.
pub fn generate_salt() -> Result<[u8; SALT_LENGTH], CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(salt)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Encrypt with a fresh IV and split the tag off the ciphertext.
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = cipher_for(key)?;
    let iv = generate_iv()?;
    let nonce = Nonce::from_slice(&iv);

    let mut ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // aes-gcm appends the tag; keep it as its own field
    let split_at = ciphertext.len() - AES_GCM_TAG_LENGTH;
    let mut tag = [0u8; AES_GCM_TAG_LENGTH];
    tag.copy_from_slice(&ciphertext[split_at..]);
    ciphertext.truncate(split_at);

    Ok(Sealed {
        iv,
        ciphertext,
        tag,
    })
}

/// Decrypt a detached ciphertext. Any authentication failure is an
/// [`CryptoError::Integrity`] error.
pub fn open(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != AES_GCM_IV_LENGTH {
        return Err(CryptoError::Format(format!(
            "iv must be {} bytes, got {}",
            AES_GCM_IV_LENGTH,
            iv.len()
        )));
    }
    if tag.len() != AES_GCM_TAG_LENGTH {
        return Err(CryptoError::Format(format!(
            "tag must be {} bytes, got {}",
            AES_GCM_TAG_LENGTH,
            tag.len()
        )));
    }
    let cipher = cipher_for(key)?;
    let nonce = Nonce::from_slice(iv);

    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &combined,
                aad,
            },
        )
        .map_err(|_| CryptoError::Integrity("authentication tag mismatch".into()))
}

/// Encrypt raw bytes and return [IV:12][ciphertext+tag].
pub fn seal_combined(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let sealed = seal(key, plaintext, aad)?;
    let mut result =
        Vec::with_capacity(AES_GCM_IV_LENGTH + sealed.ciphertext.len() + AES_GCM_TAG_LENGTH);
    result.extend_from_slice(&sealed.iv);
    result.extend_from_slice(&sealed.ciphertext);
    result.extend_from_slice(&sealed.tag);
    Ok(result)
}

/// Decrypt raw bytes (expects [IV:12][ciphertext+tag]).
pub fn open_combined(key: &[u8], data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < AES_GCM_IV_LENGTH + AES_GCM_TAG_LENGTH {
        return Err(CryptoError::Format("sealed data too short".into()));
    }
    let iv = &data[..AES_GCM_IV_LENGTH];
    let tag = &data[data.len() - AES_GCM_TAG_LENGTH..];
    let ciphertext = &data[AES_GCM_IV_LENGTH..data.len() - AES_GCM_TAG_LENGTH];
    open(key, iv, ciphertext, tag, aad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).unwrap();
        key
    }

    #[test]
    fn detached_round_trip() {
        let key = random_key();
        let sealed = seal(&key, b"Hello, World!", b"aad").unwrap();
        let opened = open(&key, &sealed.iv, &sealed.ciphertext, &sealed.tag, b"aad").unwrap();
        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn ciphertext_excludes_tag() {
        let key = random_key();
        let sealed = seal(&key, &[1, 2, 3], b"").unwrap();
        assert_eq!(sealed.ciphertext.len(), 3);
    }

    #[test]
    fn different_ciphertext_each_time() {
        let key = random_key();
        let a = seal_combined(&key, b"test", b"").unwrap();
        let b = seal_combined(&key, b"test", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_tampered_tag() {
        let key = random_key();
        let mut sealed = seal(&key, b"secret", b"").unwrap();
        sealed.tag[0] ^= 0xff;
        let err = open(&key, &sealed.iv, &sealed.ciphertext, &sealed.tag, b"").unwrap_err();
        assert!(matches!(err, CryptoError::Integrity(_)));
    }

    #[test]
    fn rejects_wrong_aad() {
        let key = random_key();
        let sealed = seal(&key, b"secret", b"one").unwrap();
        let err = open(&key, &sealed.iv, &sealed.ciphertext, &sealed.tag, b"two").unwrap_err();
        assert!(matches!(err, CryptoError::Integrity(_)));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal_combined(&random_key(), b"secret", b"").unwrap();
        let err = open_combined(&random_key(), &sealed, b"").unwrap_err();
        assert!(matches!(err, CryptoError::Integrity(_)));
    }

    #[test]
    fn rejects_short_iv() {
        let key = random_key();
        let err = open(&key, &[0u8; 4], b"x", &[0u8; 16], b"").unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));
    }

    #[test]
    fn rejects_truncated_combined() {
        let err = open_combined(&random_key(), &[0u8; 10], b"").unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn rejects_bad_key_length() {
        let err = seal(&[0u8; 16], b"x", b"").unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                got: 16
            }
        ));
    }

    #[test]
    fn handles_empty_plaintext() {
        let key = random_key();
        let sealed = seal_combined(&key, b"", b"").unwrap();
        assert!(open_combined(&key, &sealed, b"").unwrap().is_empty());
    }
}
