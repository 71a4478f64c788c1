use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::experiment::Experiment;

/// Repository for experiments and their dataset partitions.
///
/// Writes are idempotent per id: persisting the same experiment twice
/// leaves one copy. Loads return whole snapshots; callers never observe a
/// half-written experiment.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn persist_experiment(&self, experiment: &Experiment) -> Result<()>;

    async fn persist_dataset_partition(&self, experiment_id: Uuid, dataset: &Dataset) -> Result<()>;

    async fn load_experiment(&self, id: Uuid) -> Result<Option<Experiment>>;

    async fn load_dataset(&self, experiment_id: Uuid) -> Result<Option<Arc<Dataset>>>;

    /// All experiments, oldest first.
    async fn list_experiments(&self) -> Result<Vec<Experiment>>;

    /// Remove the experiment and its dataset. Returns whether it existed.
    async fn delete_experiment(&self, id: Uuid) -> Result<bool>;
}
