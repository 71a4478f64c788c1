//! Experiment orchestration: dataset creation, protocol configuration,
//! batch execution, metrics and comparison.
//!
//! Mutations of one experiment (configure, execute, delete) are serialized
//! by a per-experiment async lock. Reads take cloned snapshots from the
//! store and never wait on those locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use pir_crypto::EncryptedRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::codec::{decrypt_many, encrypt_many, KeyMaterial};
use crate::config::PirConfig;
use crate::dataset::{generate_dataset, get_record, Dataset, DatasetRecord, DatasetSpec, PirDatabase};
use crate::error::{PirError, Result};
use crate::executor::{execute_query_batch, plan_queries, ExecutionContext};
use crate::experiment::{DatasetInfo, ExecutionRun, Experiment};
use crate::metrics::{compare, Comparison, MetricsSummary};
use crate::pool::WorkerPool;
use crate::protocol::{ProtocolConfig, ProtocolType};
use crate::rng::{seeded, SeedSource};
use crate::storage::{ExperimentStore, MemoryStore};

pub const DEFAULT_QUERY_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    #[serde(default = "default_query_count")]
    pub query_count: usize,
    /// Explicit targets; overrides `query_count` when present.
    #[serde(default)]
    pub targets: Option<Vec<u64>>,
    /// Keep the current run in `archived_runs` instead of dropping it.
    #[serde(default)]
    pub archive_previous: bool,
}

fn default_query_count() -> usize {
    DEFAULT_QUERY_COUNT
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            query_count: DEFAULT_QUERY_COUNT,
            targets: None,
            archive_previous: false,
        }
    }
}

impl ExecuteOptions {
    pub fn queries(query_count: usize) -> Self {
        Self {
            query_count,
            ..Self::default()
        }
    }

    pub fn targets(targets: Vec<u64>) -> Self {
        Self {
            query_count: targets.len(),
            targets: Some(targets),
            archive_previous: false,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ExperimentStore>,
    pool: WorkerPool,
    config: PirConfig,
    key: KeyMaterial,
    seeds: SeedSource,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ExperimentStore>, config: PirConfig, key_material: Vec<u8>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            pool: WorkerPool::from_config(&config),
            seeds: SeedSource::new(config.seed),
            key: KeyMaterial::new(key_material)?,
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn in_memory(config: PirConfig, key_material: Vec<u8>) -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()), config, key_material)
    }

    pub fn config(&self) -> &PirConfig {
        &self.config
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.lock().entry(id).or_default())
    }

    /// Load under a held lock. An unknown id also drops its lock entry.
    async fn load_locked(&self, id: Uuid) -> Result<Experiment> {
        let loaded = self.load(id).await;
        if let Err(PirError::ExperimentNotFound(_)) = &loaded {
            self.locks.lock().remove(&id);
        }
        loaded
    }

    async fn load(&self, id: Uuid) -> Result<Experiment> {
        self.store
            .load_experiment(id)
            .await?
            .ok_or_else(|| PirError::ExperimentNotFound(id.to_string()))
    }

    async fn load_dataset(&self, id: Uuid) -> Result<Arc<Dataset>> {
        self.store
            .load_dataset(id)
            .await?
            .ok_or_else(|| PirError::Storage(format!("dataset for experiment {id} is missing")))
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Generate a mock dataset and create an experiment around it.
    pub async fn create(&self, spec: DatasetSpec) -> Result<Experiment> {
        if spec.count > self.config.max_dataset_size {
            return Err(PirError::InvalidParameter(format!(
                "dataset count {} exceeds the maximum of {}",
                spec.count, self.config.max_dataset_size
            )));
        }
        let id = Uuid::new_v4();
        let seed = spec.seed.unwrap_or_else(|| self.seeds.next_seed());
        let values = generate_dataset(&spec, self.config.max_dataset_size, &mut seeded(seed))?;

        let records = if spec.encrypt {
            encrypt_many(&self.pool, &self.key, values, Some(id.to_string()))
                .await
                .into_iter()
                .map(|r| r.map(DatasetRecord::Encrypted))
                .collect::<Result<Vec<_>>>()?
        } else {
            values.into_iter().map(DatasetRecord::Plain).collect()
        };

        let dataset = Dataset::new(records);
        let db = PirDatabase::from_dataset(&dataset)?;
        let info = DatasetInfo {
            count: dataset.len(),
            structured: spec.structured,
            record_types: spec.record_types(),
            encrypted: spec.encrypt,
            avg_record_size: db.avg_record_size(),
            seed: Some(seed),
        };
        self.insert(id, info, &dataset).await
    }

    /// Create an experiment from caller-supplied records, plaintext or
    /// already encrypted.
    pub async fn create_from_records(&self, records: Vec<DatasetRecord>) -> Result<Experiment> {
        if records.is_empty() || records.len() > self.config.max_dataset_size {
            return Err(PirError::InvalidParameter(format!(
                "dataset must hold between 1 and {} records, got {}",
                self.config.max_dataset_size,
                records.len()
            )));
        }
        let dataset = Dataset::new(records);
        let db = PirDatabase::from_dataset(&dataset)?;
        let record_types: BTreeSet<String> = dataset
            .records
            .iter()
            .filter_map(|r| match r {
                DatasetRecord::Plain(v) => v.get("record_type").and_then(Value::as_str).map(String::from),
                DatasetRecord::Encrypted(_) => None,
            })
            .collect();
        let info = DatasetInfo {
            count: dataset.len(),
            structured: dataset
                .records
                .iter()
                .all(|r| matches!(r, DatasetRecord::Plain(v) if v.get("data_vector").is_none())),
            record_types: record_types.into_iter().collect(),
            encrypted: dataset.is_encrypted(),
            avg_record_size: db.avg_record_size(),
            seed: None,
        };
        self.insert(Uuid::new_v4(), info, &dataset).await
    }

    async fn insert(&self, id: Uuid, info: DatasetInfo, dataset: &Dataset) -> Result<Experiment> {
        let experiment = Experiment::new(id, info);
        self.store.persist_dataset_partition(id, dataset).await?;
        self.store.persist_experiment(&experiment).await?;
        tracing::info!(
            experiment_id = %id,
            count = experiment.dataset.count,
            encrypted = experiment.dataset.encrypted,
            "experiment created"
        );
        Ok(experiment)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn configure(
        &self,
        id: Uuid,
        protocol_type: &str,
        params: &Map<String, Value>,
        archive: bool,
    ) -> Result<Experiment> {
        let protocol_type: ProtocolType = protocol_type.parse()?;
        let config = ProtocolConfig::configure(protocol_type, params, self.config.noise_count)?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut experiment = self.load_locked(id).await?;
        experiment.configure(config, archive)?;
        self.store.persist_experiment(&experiment).await?;
        tracing::info!(experiment_id = %id, protocol = %protocol_type, archive, "protocol configured");
        Ok(experiment)
    }

    pub async fn execute(&self, id: Uuid, options: ExecuteOptions) -> Result<Experiment> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut experiment = self.load_locked(id).await?;
        let protocol = experiment.require_protocol()?.clone();

        let dataset = self.load_dataset(id).await?;
        let db = Arc::new(PirDatabase::from_dataset(&dataset)?);
        let ctx = Arc::new(ExecutionContext::new(Arc::clone(&db), protocol.clone(), self.config.jitter)?);

        let mut rng = seeded(self.seeds.next_seed());
        let plan = plan_queries(options.query_count, db.len(), options.targets.as_deref(), &mut rng)?;
        tracing::info!(
            experiment_id = %id,
            protocol = %protocol.protocol_type,
            queries = plan.len(),
            "executing queries"
        );

        let batch = execute_query_batch(ctx, &self.pool, plan).await;
        if batch.results.is_empty() {
            tracing::warn!(
                experiment_id = %id,
                failed = batch.failures.len(),
                "every query failed; keeping the previous state"
            );
        }
        experiment.record_run(
            ExecutionRun::from_batch(protocol.protocol_type, batch),
            options.archive_previous,
        )?;
        self.store.persist_experiment(&experiment).await?;
        Ok(experiment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Experiment> {
        self.load(id).await
    }

    pub async fn list(&self) -> Result<Vec<Experiment>> {
        self.store.list_experiments().await
    }

    /// Delete the experiment with its dataset and results.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let lock = self.lock_for(id);
        {
            let _guard = lock.lock().await;
            let mut experiment = self.load_locked(id).await?;
            experiment.mark_deleted();
            if !self.store.delete_experiment(id).await? {
                return Err(PirError::ExperimentNotFound(id.to_string()));
            }
        }
        self.locks.lock().remove(&id);
        tracing::info!(experiment_id = %id, "experiment deleted");
        Ok(())
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    pub async fn get_metrics(&self, id: Uuid) -> Result<MetricsSummary> {
        let experiment = self.load(id).await?;
        let run = experiment.require_run()?;
        Ok(MetricsSummary::from_run(id, run))
    }

    /// Compare `current` against `baseline`; both must have been executed.
    pub async fn compare(&self, current: Uuid, baseline: Uuid) -> Result<Comparison> {
        let current = self.get_metrics(current).await?;
        let baseline = self.get_metrics(baseline).await?;
        Ok(compare(&current, &baseline, self.config.comm_cost_threshold))
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub async fn get_record(&self, id: Uuid, index: u64) -> Result<DatasetRecord> {
        self.load(id).await?;
        let dataset = self.load_dataset(id).await?;
        Ok(get_record(&dataset, index)?.clone())
    }

    /// Decode a stored query result and decrypt the record it carries.
    pub async fn decrypt_result(&self, id: Uuid, result_index: usize) -> Result<Value> {
        let experiment = self.load(id).await?;
        let run = experiment.require_run()?;
        let result = run.results.get(result_index).ok_or_else(|| {
            PirError::InvalidIndex(format!(
                "result {result_index} out of range for {} results",
                run.results.len()
            ))
        })?;
        let dataset = self.load_dataset(id).await?;
        let encrypted = get_record(&dataset, result.target_index)?.is_encrypted();
        match DatasetRecord::from_bytes(&result.reveal()?, encrypted)? {
            DatasetRecord::Plain(value) => Ok(value),
            DatasetRecord::Encrypted(record) => self.key.decrypt(&record),
        }
    }

    pub fn decrypt_record(&self, record: &EncryptedRecord) -> Result<Value> {
        self.key.decrypt(record)
    }

    pub async fn decrypt_records(&self, records: Vec<EncryptedRecord>) -> Vec<Result<Value>> {
        decrypt_many(&self.pool, &self.key, records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentState;

    fn orchestrator(seed: u64) -> Orchestrator {
        let config = PirConfig {
            seed: Some(seed),
            pool_size: 2,
            ..PirConfig::default()
        };
        Orchestrator::in_memory(config, b"orchestrator-key".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let orch = orchestrator(1);
        let e = orch.create(DatasetSpec::new(50)).await.unwrap();
        assert_eq!(e.state, ExperimentState::Created);

        let e = orch.configure(e.id, "hybrid", &Map::new(), false).await.unwrap();
        assert_eq!(e.state, ExperimentState::Configured);

        let e = orch.execute(e.id, ExecuteOptions::queries(4)).await.unwrap();
        assert_eq!(e.state, ExperimentState::Executed);
        let metrics = orch.get_metrics(e.id).await.unwrap();
        assert_eq!(metrics.query_count, 4);
        assert_eq!(metrics.accuracy, 1.0);
        assert!(metrics.needs_decrypt);

        orch.delete(e.id).await.unwrap();
        let err = orch.get(e.id).await.unwrap_err();
        assert_eq!(err.code(), "EXPERIMENT_NOT_FOUND");
        assert!(orch.delete(e.id).await.is_err());
    }

    #[tokio::test]
    async fn execute_requires_configuration() {
        let orch = orchestrator(2);
        let e = orch.create(DatasetSpec::new(10)).await.unwrap();
        let err = orch.execute(e.id, ExecuteOptions::default()).await.unwrap_err();
        assert!(matches!(err, PirError::ExperimentNotConfigured(id) if id == e.id));
        let err = orch.get_metrics(e.id).await.unwrap_err();
        assert!(matches!(err, PirError::NotExecuted(_)));
    }

    #[tokio::test]
    async fn unknown_protocol_and_missing_experiment() {
        let orch = orchestrator(3);
        let e = orch.create(DatasetSpec::new(10)).await.unwrap();
        let err = orch.configure(e.id, "teleport", &Map::new(), false).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_PROTOCOL");
        let err = orch.configure(Uuid::new_v4(), "basic", &Map::new(), false).await.unwrap_err();
        assert_eq!(err.code(), "EXPERIMENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn rejects_oversized_datasets() {
        let config = PirConfig {
            max_dataset_size: 20,
            ..PirConfig::default()
        };
        let orch = Orchestrator::in_memory(config, b"k".to_vec()).unwrap();
        let err = orch.create(DatasetSpec::new(21)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
    }

    #[tokio::test]
    async fn decrypts_encrypted_results() {
        let orch = orchestrator(4);
        let mut spec = DatasetSpec::new(12);
        spec.encrypt = true;
        let e = orch.create(spec).await.unwrap();
        assert!(e.dataset.encrypted);

        orch.configure(e.id, "onion", &Map::new(), false).await.unwrap();
        let e = orch.execute(e.id, ExecuteOptions::targets(vec![5])).await.unwrap();
        let run = e.run.as_ref().unwrap();
        assert_eq!(run.results[0].target_index, 5);

        let value = orch.decrypt_result(e.id, 0).await.unwrap();
        assert_eq!(value["record_id"], "rec-000005");

        let DatasetRecord::Encrypted(stored) = orch.get_record(e.id, 5).await.unwrap() else {
            panic!("expected an encrypted record");
        };
        assert_eq!(orch.decrypt_record(&stored).unwrap(), value);
        assert_eq!(orch.decrypt_result(e.id, 1).await.unwrap_err().code(), "INVALID_INDEX");
    }

    #[tokio::test]
    async fn caller_supplied_records() {
        let orch = orchestrator(5);
        let records = (0..6)
            .map(|i| DatasetRecord::Plain(serde_json::json!({"record_type": "X", "n": i})))
            .collect();
        let e = orch.create_from_records(records).await.unwrap();
        assert_eq!(e.dataset.count, 6);
        assert_eq!(e.dataset.record_types, vec!["X".to_string()]);
        assert!(!e.dataset.encrypted);
        assert!(orch.create_from_records(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn failed_batch_keeps_the_previous_run() {
        let store: Arc<dyn ExperimentStore> = Arc::new(MemoryStore::new());
        let patient = Orchestrator::new(
            Arc::clone(&store),
            PirConfig {
                seed: Some(6),
                ..PirConfig::default()
            },
            b"k".to_vec(),
        )
        .unwrap();
        let hasty = Orchestrator::new(
            Arc::clone(&store),
            PirConfig {
                seed: Some(6),
                item_timeout_ms: 1,
                pool_size: 1,
                ..PirConfig::default()
            },
            b"k".to_vec(),
        )
        .unwrap();

        let e = patient.create(DatasetSpec::new(20_000)).await.unwrap();
        patient.configure(e.id, "homomorphic", &Map::new(), false).await.unwrap();
        let err = hasty.execute(e.id, ExecuteOptions::queries(4)).await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_FAILED");
        let PirError::ExecutionFailed { failures, .. } = err else {
            panic!("expected an execution failure");
        };
        assert_eq!(failures.len(), 4);
        assert!(failures.iter().all(|f| f.code == "TIMEOUT"));

        let current = patient.get(e.id).await.unwrap();
        assert_eq!(current.state, ExperimentState::Configured);
        assert_eq!(patient.get_metrics(e.id).await.unwrap_err().code(), "NOT_EXECUTED");

        patient.execute(e.id, ExecuteOptions::queries(1)).await.unwrap();
        let before = patient.get(e.id).await.unwrap();
        assert!(hasty.execute(e.id, ExecuteOptions::queries(2)).await.is_err());
        let after = patient.get(e.id).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(patient.get_metrics(e.id).await.unwrap().accuracy, 1.0);
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_behind() {
        let orch = orchestrator(7);
        for _ in 0..5 {
            let id = Uuid::new_v4();
            assert!(orch.configure(id, "basic", &Map::new(), false).await.is_err());
            assert!(orch.execute(id, ExecuteOptions::default()).await.is_err());
            assert!(orch.delete(id).await.is_err());
        }
        assert!(orch.locks.lock().is_empty());

        let e = orch.create(DatasetSpec::new(10)).await.unwrap();
        orch.configure(e.id, "basic", &Map::new(), false).await.unwrap();
        assert_eq!(orch.locks.lock().len(), 1);
        orch.delete(e.id).await.unwrap();
        assert!(orch.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn plaintext_lookalike_records_decode_as_plaintext() {
        let orch = orchestrator(8);
        let records = (0..5)
            .map(|i| {
                DatasetRecord::Plain(serde_json::json!({
                    "n": i,
                    "ciphertext": "bm90ZQ==",
                    "algorithm": "AES-GCM-256",
                }))
            })
            .collect();
        let e = orch.create_from_records(records).await.unwrap();
        orch.configure(e.id, "basic", &Map::new(), false).await.unwrap();
        orch.execute(e.id, ExecuteOptions::targets(vec![3])).await.unwrap();
        let value = orch.decrypt_result(e.id, 0).await.unwrap();
        assert_eq!(value["n"], 3);
        assert_eq!(value["ciphertext"], "bm90ZQ==");
    }
}
