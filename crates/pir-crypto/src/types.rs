/// Algorithm identifier written into every encrypted record.
pub const ALGORITHM: &str = "AES-GCM-256";

/// Algorithm identifiers accepted on decryption.
pub const SUPPORTED_ALGORITHMS: &[&str] = &[ALGORITHM];

/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// Per-record key-derivation salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// HKDF info label for per-record keys.
pub const RECORD_KEY_INFO: &[u8] = b"pir:record-key:v1";

/// AAD used when a record is sealed without a dataset context.
pub const DEFAULT_AAD: &[u8] = b"pir:record:v1";

/// Binds a ciphertext to its slot in a dataset via AAD.
/// Prevents ciphertext relocation between records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionContext {
    /// Dataset (experiment) the record belongs to.
    pub dataset_id: String,
    /// Position of the record inside the dataset.
    pub record_index: u64,
}

impl EncryptionContext {
    /// Format: [4 bytes: dataset_id length (u32 BE)][dataset_id UTF-8][record_index u64 BE]
    pub fn to_aad(&self) -> Vec<u8> {
        let dataset_bytes = self.dataset_id.as_bytes();
        let mut aad = Vec::with_capacity(4 + dataset_bytes.len() + 8);
        aad.extend_from_slice(&(dataset_bytes.len() as u32).to_be_bytes());
        aad.extend_from_slice(dataset_bytes);
        aad.extend_from_slice(&self.record_index.to_be_bytes());
        aad
    }
}
