//! Core service surface. Every operation answers with an [`ApiResponse`]
//! envelope; errors carry their stable code.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use pir_crypto::EncryptedRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::dataset::DatasetSpec;
use crate::error::{PirError, Result};
use crate::experiment::{DatasetInfo, Experiment, ExperimentState};
use crate::executor::{QueryFailure, QueryResult};
use crate::metrics::{Comparison, MetricsSummary};
use crate::orchestrator::{ExecuteOptions, Orchestrator};
use crate::protocol::ProtocolConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
            data: Some(data),
        }
    }

    pub fn error(err: &PirError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            code: Some(err.code().to_string()),
            data: None,
        }
    }

    fn from_result(result: Result<T>, message: &str) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(err) => {
                tracing::debug!(code = err.code(), error = %err, "request failed");
                Self::error(&err)
            }
        }
    }
}

/// Result without client secrets; the raw bytes are base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultView {
    pub target_index: u64,
    pub entry_count: usize,
    pub raw_result: String,
    pub query_time: f64,
    pub comm_cost: f64,
    pub server_load: f64,
    pub client_load: f64,
    pub accuracy: f64,
    pub privacy_level: f64,
    pub needs_decrypt: bool,
}

impl From<&QueryResult> for ResultView {
    fn from(r: &QueryResult) -> Self {
        Self {
            target_index: r.target_index,
            entry_count: r.entry_count,
            raw_result: STANDARD.encode(r.raw_result()),
            query_time: r.query_time,
            comm_cost: r.comm_cost,
            server_load: r.server_load,
            client_load: r.client_load,
            accuracy: r.accuracy,
            privacy_level: r.privacy_level,
            needs_decrypt: r.needs_decrypt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentView {
    pub id: Uuid,
    pub state: ExperimentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dataset: DatasetInfo,
    pub protocol: Option<ProtocolConfig>,
    pub metrics: Option<MetricsSummary>,
    pub results: Vec<ResultView>,
    pub failures: Vec<QueryFailure>,
    pub archived_runs: usize,
}

impl From<&Experiment> for ExperimentView {
    fn from(e: &Experiment) -> Self {
        let run = e.require_run().ok();
        Self {
            id: e.id,
            state: e.state,
            created_at: e.created_at,
            updated_at: e.updated_at,
            dataset: e.dataset.clone(),
            protocol: e.protocol.clone(),
            metrics: run.map(|r| MetricsSummary::from_run(e.id, r)),
            results: run.map(|r| r.results.iter().map(ResultView::from).collect()).unwrap_or_default(),
            failures: run.map(|r| r.failures.clone()).unwrap_or_default(),
            archived_runs: e.archived_runs.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub protocol_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub archive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub summary: MetricsSummary,
    pub advisories: Vec<String>,
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|_| PirError::ExperimentNotFound(id.to_string()))
}

pub struct PirService {
    orchestrator: Arc<Orchestrator>,
}

impl PirService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn generate_mock_data(&self, spec: DatasetSpec) -> ApiResponse<ExperimentView> {
        let result = self.orchestrator.create(spec).await.map(|e| ExperimentView::from(&e));
        ApiResponse::from_result(result, "Mock dataset generated")
    }

    pub async fn configure_protocol(&self, id: &str, request: ConfigureRequest) -> ApiResponse<ExperimentView> {
        let result = async {
            let id = parse_id(id)?;
            let e = self
                .orchestrator
                .configure(id, &request.protocol_type, &request.params, request.archive)
                .await?;
            Ok(ExperimentView::from(&e))
        }
        .await;
        ApiResponse::from_result(result, "Protocol configured")
    }

    pub async fn execute_query(&self, id: &str, options: ExecuteOptions) -> ApiResponse<ExperimentView> {
        let result = async {
            let e = self.orchestrator.execute(parse_id(id)?, options).await?;
            Ok(ExperimentView::from(&e))
        }
        .await;
        ApiResponse::from_result(result, "Queries executed")
    }

    pub async fn performance_metrics(&self, id: &str) -> ApiResponse<MetricsReport> {
        let result = async {
            let summary = self.orchestrator.get_metrics(parse_id(id)?).await?;
            Ok(MetricsReport {
                advisories: summary.advisories(),
                summary,
            })
        }
        .await;
        ApiResponse::from_result(result, "Performance metrics")
    }

    pub async fn compare_protocols(&self, current: &str, baseline: &str) -> ApiResponse<Comparison> {
        let result = async {
            let current = parse_id(current)?;
            let baseline = parse_id(baseline)?;
            self.orchestrator.compare(current, baseline).await
        }
        .await;
        ApiResponse::from_result(result, "Protocols compared")
    }

    pub async fn list_experiments(&self) -> ApiResponse<Vec<ExperimentView>> {
        let result = self
            .orchestrator
            .list()
            .await
            .map(|all| all.iter().map(ExperimentView::from).collect());
        ApiResponse::from_result(result, "Experiments listed")
    }

    pub async fn get_experiment(&self, id: &str) -> ApiResponse<ExperimentView> {
        let result = async {
            let e = self.orchestrator.get(parse_id(id)?).await?;
            Ok(ExperimentView::from(&e))
        }
        .await;
        ApiResponse::from_result(result, "Experiment found")
    }

    pub async fn delete_experiment(&self, id: &str) -> ApiResponse<Uuid> {
        let result = async {
            let id = parse_id(id)?;
            self.orchestrator.delete(id).await?;
            Ok(id)
        }
        .await;
        ApiResponse::from_result(result, "Experiment deleted")
    }

    pub async fn decrypt_result(&self, id: &str, result_index: usize) -> ApiResponse<Value> {
        let result = async {
            self.orchestrator
                .decrypt_result(parse_id(id)?, result_index)
                .await
        }
        .await;
        ApiResponse::from_result(result, "Result decrypted")
    }

    /// Decrypt a record given in its wire form.
    pub fn decrypt_record(&self, record: Value) -> ApiResponse<Value> {
        let result = EncryptedRecord::from_value(record)
            .map_err(PirError::from)
            .and_then(|r| self.orchestrator.decrypt_record(&r));
        ApiResponse::from_result(result, "Record decrypted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PirConfig;
    use serde_json::json;

    fn service() -> PirService {
        let config = PirConfig {
            seed: Some(99),
            ..PirConfig::default()
        };
        PirService::new(Arc::new(Orchestrator::in_memory(config, b"api-key".to_vec()).unwrap()))
    }

    #[tokio::test]
    async fn envelope_on_success_and_failure() {
        let svc = service();
        let created = svc.generate_mock_data(DatasetSpec::new(20)).await;
        assert!(created.success);
        assert!(created.code.is_none());
        let id = created.data.unwrap().id.to_string();

        let missing = svc.performance_metrics(&id).await;
        assert!(!missing.success);
        assert_eq!(missing.code.as_deref(), Some("NOT_EXECUTED"));
        assert!(missing.data.is_none());

        let bad_id = svc.get_experiment("not-a-uuid").await;
        assert_eq!(bad_id.code.as_deref(), Some("EXPERIMENT_NOT_FOUND"));
    }

    #[tokio::test]
    async fn views_hide_client_secrets() {
        let svc = service();
        let id = svc.generate_mock_data(DatasetSpec::new(15)).await.data.unwrap().id.to_string();
        let request = ConfigureRequest {
            protocol_type: "homomorphic".into(),
            params: Map::new(),
            archive: false,
        };
        assert!(svc.configure_protocol(&id, request).await.success);
        let executed = svc.execute_query(&id, ExecuteOptions::queries(2)).await;
        let view = executed.data.unwrap();
        assert_eq!(view.results.len(), 2);
        assert!(!STANDARD.decode(&view.results[0].raw_result).unwrap().is_empty());

        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secrets"));
        assert!(!json.contains("\"mask\""));

        let report = svc.performance_metrics(&id).await.data.unwrap();
        assert_eq!(report.summary.query_count, 2);
    }

    #[tokio::test]
    async fn decrypt_record_envelope() {
        let svc = service();
        let sealed = pir_crypto::encrypt_record(&json!({"v": 1}), b"api-key", None).unwrap();
        let wire: Value = serde_json::from_str(&sealed.to_json().unwrap()).unwrap();
        let response = svc.decrypt_record(wire);
        assert_eq!(response.data, Some(json!({"v": 1})));

        let response = svc.decrypt_record(json!({"algorithm": "AES-GCM-256"}));
        assert_eq!(response.code.as_deref(), Some("FORMAT_ERROR"));
    }
}
