//! Batch record encryption on the worker pool.

use std::fmt;
use std::sync::Arc;

use pir_crypto::{decrypt_record, encrypt_record, DecryptionKey, EncryptedRecord, EncryptionContext};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{PirError, Result};
use crate::pool::WorkerPool;

/// Engine-wide record key material.
#[derive(Clone)]
pub struct KeyMaterial(Arc<Zeroizing<Vec<u8>>>);

impl KeyMaterial {
    pub fn new(material: Vec<u8>) -> Result<Self> {
        if material.is_empty() {
            return Err(PirError::InvalidParameter("key material must not be empty".into()));
        }
        Ok(Self(Arc::new(Zeroizing::new(material))))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn encrypt(&self, value: &Value, context: Option<&EncryptionContext>) -> Result<EncryptedRecord> {
        Ok(encrypt_record(value, self.as_bytes(), context)?)
    }

    pub fn decrypt(&self, record: &EncryptedRecord) -> Result<Value> {
        Ok(decrypt_record(record, DecryptionKey::Material(self.as_bytes()))?)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([redacted])")
    }
}

/// Encrypt records in parallel. Each record is bound to its position in
/// `dataset_id` when one is given.
pub async fn encrypt_many(
    pool: &WorkerPool,
    key: &KeyMaterial,
    records: Vec<Value>,
    dataset_id: Option<String>,
) -> Vec<Result<EncryptedRecord>> {
    let key = key.clone();
    let items: Vec<(u64, Value)> = records
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i as u64, v))
        .collect();
    pool.run(items, move |(record_index, value)| {
        let context = dataset_id.as_ref().map(|id| EncryptionContext {
            dataset_id: id.clone(),
            record_index,
        });
        key.encrypt(&value, context.as_ref())
    })
    .await
}

pub async fn decrypt_many(
    pool: &WorkerPool,
    key: &KeyMaterial,
    records: Vec<EncryptedRecord>,
) -> Vec<Result<Value>> {
    let key = key.clone();
    pool.run(records, move |record| key.decrypt(&record)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn pool() -> WorkerPool {
        WorkerPool::new(3, Duration::from_secs(10))
    }

    #[test]
    fn rejects_empty_material() {
        assert!(KeyMaterial::new(Vec::new()).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = KeyMaterial::new(b"secret".to_vec()).unwrap();
        assert!(!format!("{key:?}").contains("secret"));
    }

    #[tokio::test]
    async fn batch_round_trip_in_order() {
        let key = KeyMaterial::new(b"batch-key".to_vec()).unwrap();
        let values: Vec<Value> = (0..12).map(|i| json!({"n": i})).collect();
        let sealed: Vec<EncryptedRecord> = encrypt_many(&pool(), &key, values.clone(), Some("ds".into()))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let opened: Vec<Value> = decrypt_many(&pool(), &key, sealed)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(opened, values);
    }

    #[tokio::test]
    async fn wrong_key_fails_per_item() {
        let key = KeyMaterial::new(b"right".to_vec()).unwrap();
        let other = KeyMaterial::new(b"wrong".to_vec()).unwrap();
        let sealed: Vec<EncryptedRecord> = encrypt_many(&pool(), &key, vec![json!(1), json!(2)], None)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let mut mixed = sealed.clone();
        mixed[1] = encrypt_many(&pool(), &other, vec![json!(2)], None)
            .await
            .remove(0)
            .unwrap();
        let results = decrypt_many(&pool(), &key, mixed).await;
        assert_eq!(results[0].as_ref().unwrap(), &json!(1));
        assert_eq!(results[1].as_ref().unwrap_err().code(), "INTEGRITY_ERROR");
    }
}
