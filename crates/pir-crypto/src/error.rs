use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Key material must not be empty")]
    EmptyKeyMaterial,

    #[error("Malformed encrypted payload: {0}")]
    Format(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Unsupported encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("canonicalJSON: non-finite number is not representable in JSON")]
    NonFiniteNumber,

    #[error("Random number generation failed: {0}")]
    RngFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CryptoError {
    /// Stable machine-readable code for API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::InvalidKeyLength { .. } | CryptoError::EmptyKeyMaterial => "INVALID_KEY",
            CryptoError::Format(_) => "FORMAT_ERROR",
            CryptoError::Integrity(_) => "INTEGRITY_ERROR",
            CryptoError::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            CryptoError::EncryptionFailed(_) => "ENCRYPTION_FAILED",
            CryptoError::NonFiniteNumber => "NON_FINITE_NUMBER",
            CryptoError::RngFailed(_) => "RNG_FAILED",
            CryptoError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }
}
