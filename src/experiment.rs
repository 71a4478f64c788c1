//! Experiment records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PirError, Result};
use crate::executor::{BatchOutcome, QueryFailure, QueryResult};
use crate::protocol::{ProtocolConfig, ProtocolType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    Created,
    Configured,
    Executed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub count: usize,
    pub structured: bool,
    pub record_types: Vec<String>,
    pub encrypted: bool,
    pub avg_record_size: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub protocol_type: ProtocolType,
    pub results: Vec<QueryResult>,
    pub failures: Vec<QueryFailure>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_query_time: f64,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    pub fn from_batch(protocol_type: ProtocolType, batch: BatchOutcome) -> Self {
        Self {
            protocol_type,
            results: batch.results,
            failures: batch.failures,
            start_time: batch.start_time,
            end_time: batch.end_time,
            total_query_time: batch.total_query_time,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ExperimentState,
    pub dataset: DatasetInfo,
    pub protocol: Option<ProtocolConfig>,
    pub run: Option<ExecutionRun>,
    #[serde(default)]
    pub archived_runs: Vec<ExecutionRun>,
}

impl Experiment {
    pub fn new(id: Uuid, dataset: DatasetInfo) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            state: ExperimentState::Created,
            dataset,
            protocol: None,
            run: None,
            archived_runs: Vec::new(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == ExperimentState::Deleted {
            return Err(PirError::InvalidState(format!("experiment {} is deleted", self.id)));
        }
        Ok(())
    }

    fn retire_run(&mut self, archive: bool) {
        if let Some(mut run) = self.run.take() {
            if archive {
                run.archived_at = Some(Utc::now());
                self.archived_runs.push(run);
            }
        }
    }

    /// Attach a protocol configuration. Any current run is dropped, or
    /// moved to `archived_runs` when `archive` is set.
    pub fn configure(&mut self, config: ProtocolConfig, archive: bool) -> Result<()> {
        self.ensure_live()?;
        self.retire_run(archive);
        self.protocol = Some(config);
        self.state = ExperimentState::Configured;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn require_protocol(&self) -> Result<&ProtocolConfig> {
        self.ensure_live()?;
        self.protocol
            .as_ref()
            .ok_or(PirError::ExperimentNotConfigured(self.id))
    }

    /// Store a completed run, replacing the current one. A run without a
    /// single result is refused and leaves the experiment untouched.
    pub fn record_run(&mut self, run: ExecutionRun, archive_previous: bool) -> Result<()> {
        self.require_protocol()?;
        if run.results.is_empty() {
            return Err(PirError::ExecutionFailed {
                id: self.id,
                failures: run.failures,
            });
        }
        self.retire_run(archive_previous);
        self.run = Some(run);
        self.state = ExperimentState::Executed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn require_run(&self) -> Result<&ExecutionRun> {
        self.ensure_live()?;
        match (&self.state, &self.run) {
            (ExperimentState::Executed, Some(run)) => Ok(run),
            _ => Err(PirError::NotExecuted(self.id)),
        }
    }

    pub fn mark_deleted(&mut self) {
        self.run = None;
        self.archived_runs.clear();
        self.state = ExperimentState::Deleted;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientSecrets, ResultForm};
    use serde_json::Map;

    fn info() -> DatasetInfo {
        DatasetInfo {
            count: 10,
            structured: true,
            record_types: vec!["LAB_RESULT".into()],
            encrypted: false,
            avg_record_size: 100.0,
            seed: None,
        }
    }

    fn result() -> QueryResult {
        QueryResult {
            target_index: 0,
            entry_count: 2,
            result: ResultForm::Plain { bytes: b"{}".to_vec() },
            query_time: 0.001,
            comm_cost: 20.0,
            server_load: 0.0,
            client_load: 0.0,
            accuracy: 1.0,
            privacy_level: 3.0,
            needs_decrypt: false,
            elapsed_ms: 0.1,
            secrets: ClientSecrets::default(),
        }
    }

    fn run(p: ProtocolType) -> ExecutionRun {
        let now = Utc::now();
        ExecutionRun {
            protocol_type: p,
            results: vec![result()],
            failures: Vec::new(),
            start_time: now,
            end_time: now,
            total_query_time: 0.0,
            archived_at: None,
        }
    }

    fn config(p: ProtocolType) -> ProtocolConfig {
        ProtocolConfig::configure(p, &Map::new(), None).unwrap()
    }

    #[test]
    fn lifecycle() {
        let mut e = Experiment::new(Uuid::new_v4(), info());
        assert_eq!(e.state, ExperimentState::Created);
        assert!(matches!(e.require_protocol(), Err(PirError::ExperimentNotConfigured(_))));
        assert!(matches!(e.require_run(), Err(PirError::NotExecuted(_))));
        assert!(e.record_run(run(ProtocolType::Basic), false).is_err());

        e.configure(config(ProtocolType::Basic), false).unwrap();
        assert_eq!(e.state, ExperimentState::Configured);
        e.record_run(run(ProtocolType::Basic), false).unwrap();
        assert_eq!(e.state, ExperimentState::Executed);
        assert!(e.require_run().is_ok());
    }

    #[test]
    fn reconfigure_drops_or_archives_runs() {
        let mut e = Experiment::new(Uuid::new_v4(), info());
        e.configure(config(ProtocolType::Basic), false).unwrap();
        e.record_run(run(ProtocolType::Basic), false).unwrap();

        e.configure(config(ProtocolType::Onion), false).unwrap();
        assert!(e.run.is_none());
        assert!(e.archived_runs.is_empty());
        assert!(matches!(e.require_run(), Err(PirError::NotExecuted(_))));

        e.record_run(run(ProtocolType::Onion), false).unwrap();
        e.configure(config(ProtocolType::Hybrid), true).unwrap();
        assert_eq!(e.archived_runs.len(), 1);
        assert_eq!(e.archived_runs[0].protocol_type, ProtocolType::Onion);
        assert!(e.archived_runs[0].archived_at.is_some());
    }

    #[test]
    fn rerun_replaces_current_run() {
        let mut e = Experiment::new(Uuid::new_v4(), info());
        e.configure(config(ProtocolType::Basic), false).unwrap();
        e.record_run(run(ProtocolType::Basic), false).unwrap();
        e.record_run(run(ProtocolType::Basic), true).unwrap();
        assert_eq!(e.archived_runs.len(), 1);
        e.record_run(run(ProtocolType::Basic), false).unwrap();
        assert_eq!(e.archived_runs.len(), 1);
    }

    #[test]
    fn deleted_is_terminal() {
        let mut e = Experiment::new(Uuid::new_v4(), info());
        e.mark_deleted();
        assert_eq!(e.configure(config(ProtocolType::Basic), false).unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn run_without_results_is_refused() {
        let mut e = Experiment::new(Uuid::new_v4(), info());
        e.configure(config(ProtocolType::Basic), false).unwrap();
        e.record_run(run(ProtocolType::Basic), false).unwrap();
        let before = e.clone();

        let mut failed = run(ProtocolType::Basic);
        failed.results.clear();
        failed.failures.push(QueryFailure {
            target_index: 1,
            code: "TIMEOUT".into(),
            message: "timed out".into(),
        });
        let err = e.record_run(failed, true).unwrap_err();
        assert!(matches!(&err, PirError::ExecutionFailed { failures, .. } if failures.len() == 1));
        assert_eq!(e, before);
    }
}
