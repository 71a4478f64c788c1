//! Runs queries end to end: obfuscate, transform, execute on the server
//! side, identify the real result and decode it.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use pir_crypto::CryptoError;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::PirDatabase;
use crate::error::{PirError, Result};
use crate::pool::WorkerPool;
use crate::protocol::{ClientSecrets, ProtocolConfig, ResultForm, WorkloadShape};
use crate::query::{build_query_vector, encrypt_index, identify_real_result, required_dataset_size, ObfuscationKey};
use crate::rng::{seeded, PirRng};

/// Immutable state shared by every query of one run.
#[derive(Debug)]
pub struct ExecutionContext {
    pub db: Arc<PirDatabase>,
    pub config: ProtocolConfig,
    pub jitter: f64,
}

impl ExecutionContext {
    pub fn new(db: Arc<PirDatabase>, config: ProtocolConfig, jitter: f64) -> Result<Self> {
        check_dataset_size(db.len(), config.noise_count)?;
        Ok(Self { db, config, jitter })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub target_index: u64,
    pub entry_count: usize,
    /// Result for the real entry, in protocol form.
    pub result: ResultForm,
    pub query_time: f64,
    pub comm_cost: f64,
    pub server_load: f64,
    pub client_load: f64,
    pub accuracy: f64,
    pub privacy_level: f64,
    pub needs_decrypt: bool,
    /// Wall-clock time spent by the simulation itself.
    pub elapsed_ms: f64,
    pub secrets: ClientSecrets,
}

impl QueryResult {
    pub fn raw_result(&self) -> Vec<u8> {
        self.result.raw_bytes()
    }

    pub fn reveal(&self) -> Result<Vec<u8>> {
        self.result.reveal(&self.secrets)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub target_index: u64,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedQuery {
    pub target_index: u64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<QueryResult>,
    pub failures: Vec<QueryFailure>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_query_time: f64,
}

pub fn check_dataset_size(size: usize, noise_count: Option<usize>) -> Result<()> {
    let required = required_dataset_size(noise_count);
    if size < required {
        return Err(PirError::DatasetTooSmall { size, required });
    }
    Ok(())
}

/// Run one query for `target_index`.
pub fn execute_query(ctx: &ExecutionContext, target_index: u64, rng: &mut PirRng) -> Result<QueryResult> {
    let started = Instant::now();
    let db = ctx.db.as_ref();
    let strategy = ctx.config.strategy();

    let query = build_query_vector(target_index, db.len(), ctx.config.noise_count, rng)?;
    let key = ObfuscationKey::generate(rng);
    let opaque = encrypt_index(&query, &key, strategy.index_visibility())?;

    let (transformed, secrets) = strategy.transform_query(&ctx.config.params, &query, db, rng)?;
    let responses = strategy.execute(&ctx.config.params, db, &transformed)?;

    let (real_index, result) = identify_real_result(&opaque, responses, &key)?;
    if real_index != target_index {
        return Err(CryptoError::Integrity(format!(
            "real marker names index {real_index}, expected {target_index}"
        ))
        .into());
    }
    let revealed = result.reveal(&secrets)?;
    let accuracy = if revealed == db.row(target_index)? { 1.0 } else { 0.0 };

    let shape = WorkloadShape {
        dataset_size: db.len(),
        entries: query.len(),
        avg_record_size: db.avg_record_size(),
    };
    let cost = strategy.cost_model(&ctx.config.coefficients, &shape, ctx.jitter, rng);

    tracing::debug!(
        protocol = %ctx.config.protocol_type,
        target_index,
        entries = query.len(),
        accuracy,
        "query executed"
    );

    Ok(QueryResult {
        target_index,
        entry_count: query.len(),
        needs_decrypt: result.needs_decrypt(),
        result,
        query_time: cost.query_time,
        comm_cost: cost.comm_cost,
        server_load: cost.server_load,
        client_load: cost.client_load,
        accuracy,
        privacy_level: cost.privacy_level,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        secrets,
    })
}

/// Draw targets (uniform unless given) and per-query seeds up front so a
/// fixed master seed reproduces the batch regardless of scheduling.
pub fn plan_queries(
    query_count: usize,
    dataset_size: usize,
    targets: Option<&[u64]>,
    rng: &mut PirRng,
) -> Result<Vec<PlannedQuery>> {
    if dataset_size == 0 {
        return Err(PirError::DatasetTooSmall { size: 0, required: 1 });
    }
    match targets {
        Some(targets) => {
            if targets.is_empty() {
                return Err(PirError::InvalidParameter("target list must not be empty".into()));
            }
            targets
                .iter()
                .map(|&target_index| {
                    if target_index >= dataset_size as u64 {
                        return Err(PirError::InvalidIndex(format!(
                            "target {target_index} out of range for dataset of {dataset_size} records"
                        )));
                    }
                    Ok(PlannedQuery {
                        target_index,
                        seed: rng.gen(),
                    })
                })
                .collect()
        }
        None => {
            if query_count == 0 {
                return Err(PirError::InvalidParameter("query_count must be at least 1".into()));
            }
            Ok((0..query_count)
                .map(|_| PlannedQuery {
                    target_index: rng.gen_range(0..dataset_size as u64),
                    seed: rng.gen(),
                })
                .collect())
        }
    }
}

/// Run a planned batch on the worker pool. Failed queries are reported
/// per item and excluded from the totals.
pub async fn execute_query_batch(ctx: Arc<ExecutionContext>, pool: &WorkerPool, plan: Vec<PlannedQuery>) -> BatchOutcome {
    let start_time = Utc::now();
    let targets: Vec<u64> = plan.iter().map(|p| p.target_index).collect();

    let worker_ctx = Arc::clone(&ctx);
    let outcomes = pool
        .run(plan, move |planned| {
            execute_query(&worker_ctx, planned.target_index, &mut seeded(planned.seed))
        })
        .await;

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (target_index, outcome) in targets.into_iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::warn!(target_index, code = e.code(), error = %e, "query failed");
                failures.push(QueryFailure {
                    target_index,
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    let total_query_time = results.iter().map(|r| r.query_time).sum();
    let end_time = Utc::now();
    tracing::info!(
        protocol = %ctx.config.protocol_type,
        succeeded = results.len(),
        failed = failures.len(),
        total_query_time,
        "batch complete"
    );

    BatchOutcome {
        results,
        failures,
        start_time,
        end_time,
        total_query_time,
    }
}
