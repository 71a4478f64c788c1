//! Integration tests for experiments persisted in SQLite.

#![cfg(feature = "sqlite")]

use std::path::Path;
use std::sync::Arc;

use pir_lab::{DatasetSpec, ExecuteOptions, ExperimentState, Orchestrator, PirConfig, SqliteStore};
use serde_json::Map;

// ============================================================================
// Helpers
// ============================================================================

const KEY: &[u8] = b"sqlite-test-key";

fn open(path: &Path) -> Orchestrator {
    let store = Arc::new(SqliteStore::open(path).unwrap());
    let config = PirConfig {
        seed: Some(3),
        pool_size: 2,
        ..PirConfig::default()
    };
    Orchestrator::new(store, config, KEY.to_vec()).unwrap()
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn executed_experiment_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiments.db");

    let (id, metrics) = {
        let orch = open(&path);
        let mut spec = DatasetSpec::new(40);
        spec.encrypt = true;
        let e = orch.create(spec).await.unwrap();
        orch.configure(e.id, "homomorphic", &Map::new(), false).await.unwrap();
        orch.execute(e.id, ExecuteOptions::targets(vec![9, 31])).await.unwrap();
        (e.id, orch.get_metrics(e.id).await.unwrap())
    };

    let orch = open(&path);
    let e = orch.get(id).await.unwrap();
    assert_eq!(e.state, ExperimentState::Executed);
    assert!(e.dataset.encrypted);
    assert_eq!(orch.get_metrics(id).await.unwrap(), metrics);

    let value = orch.decrypt_result(id, 1).await.unwrap();
    assert_eq!(value["record_id"], "rec-000031");
}

#[tokio::test]
async fn delete_removes_dataset_and_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiments.db");
    let orch = open(&path);

    let keep = orch.create(DatasetSpec::new(10)).await.unwrap();
    let gone = orch.create(DatasetSpec::new(10)).await.unwrap();
    orch.configure(gone.id, "basic", &Map::new(), false).await.unwrap();
    orch.execute(gone.id, ExecuteOptions::queries(2)).await.unwrap();

    orch.delete(gone.id).await.unwrap();
    let remaining: Vec<_> = orch.list().await.unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(remaining, vec![keep.id]);

    let err = orch.get_record(gone.id, 0).await.unwrap_err();
    assert_eq!(err.code(), "EXPERIMENT_NOT_FOUND");
    assert!(orch.get_record(keep.id, 0).await.is_ok());
}
