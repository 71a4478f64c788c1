//! In-memory experiment store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::ExperimentStore;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::experiment::Experiment;

#[derive(Default)]
struct Tables {
    experiments: HashMap<Uuid, Experiment>,
    datasets: HashMap<Uuid, Arc<Dataset>>,
}

/// Both maps sit behind one `parking_lot::Mutex`; each write swaps whole
/// entries under a single guard, so readers never see an experiment
/// without its dataset.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().experiments.is_empty()
    }
}

#[async_trait]
impl ExperimentStore for MemoryStore {
    async fn persist_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.tables
            .lock()
            .experiments
            .insert(experiment.id, experiment.clone());
        Ok(())
    }

    async fn persist_dataset_partition(&self, experiment_id: Uuid, dataset: &Dataset) -> Result<()> {
        self.tables
            .lock()
            .datasets
            .insert(experiment_id, Arc::new(dataset.clone()));
        Ok(())
    }

    async fn load_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
        Ok(self.tables.lock().experiments.get(&id).cloned())
    }

    async fn load_dataset(&self, experiment_id: Uuid) -> Result<Option<Arc<Dataset>>> {
        Ok(self.tables.lock().datasets.get(&experiment_id).cloned())
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        let mut all: Vec<Experiment> = self.tables.lock().experiments.values().cloned().collect();
        all.sort_by_key(|e| (e.created_at, e.id));
        Ok(all)
    }

    async fn delete_experiment(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock();
        tables.datasets.remove(&id);
        Ok(tables.experiments.remove(&id).is_some())
    }
}
