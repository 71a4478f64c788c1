//! HKDF-SHA256 key derivation.
//!
//! Used for per-record keys (salt = random record salt) and for onion layer
//! keys (salt = layer number).

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::types::AES_KEY_LENGTH;

/// Expand `ikm` into one AES-256 key bound to `salt` and `info`.
/// Passphrases are accepted as-is; only empty material is rejected.
pub fn hkdf_derive(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    if ikm.is_empty() {
        return Err(CryptoError::EmptyKeyMaterial);
    }
    let mut okm = [0u8; AES_KEY_LENGTH];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|e| CryptoError::EncryptionFailed(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        let a = hkdf_derive(b"master", &7u32.to_be_bytes(), b"layer").unwrap();
        let b = hkdf_derive(b"master", &7u32.to_be_bytes(), b"layer").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn salt_and_info_separate_keys() {
        let base = hkdf_derive(b"master", b"salt-a", b"info").unwrap();
        assert_ne!(base, hkdf_derive(b"master", b"salt-b", b"info").unwrap());
        assert_ne!(base, hkdf_derive(b"master", b"salt-a", b"other").unwrap());
    }

    #[test]
    fn accepts_passphrase_material() {
        let key = hkdf_derive(b"correct horse battery staple", b"salt", b"info").unwrap();
        assert_eq!(key.len(), AES_KEY_LENGTH);
    }

    #[test]
    fn rejects_empty_material() {
        assert!(matches!(
            hkdf_derive(b"", b"salt", b"info"),
            Err(CryptoError::EmptyKeyMaterial)
        ));
    }
}
