//! Private-information-retrieval experiment engine.
//!
//! A client fetches one record from a server-held dataset while hiding the
//! real index among noise indices. Four protocol strategies run the same
//! query workload and report comparable cost, accuracy and privacy metrics.
//!
//! # Layout
//!
//! - [`query`]: query vectors and sealed real/noise markers
//! - [`protocol`]: the four strategies and their cost models
//! - [`executor`]: end-to-end query execution, single and batched
//! - [`orchestrator`]: experiment lifecycle, metrics and comparison
//! - [`api`]: envelope-returning service surface
//!
//! Record encryption lives in the `pir-crypto` crate.

pub mod api;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod experiment;
pub mod metrics;
pub mod orchestrator;
pub mod padding;
pub mod pool;
pub mod protocol;
pub mod query;
pub mod rng;
pub mod storage;

pub use api::{ApiResponse, ConfigureRequest, ExperimentView, PirService};
pub use config::PirConfig;
pub use dataset::{Dataset, DatasetRecord, DatasetSpec};
pub use error::{PirError, Result};
pub use executor::{execute_query, execute_query_batch, ExecutionContext, QueryResult};
pub use experiment::{Experiment, ExperimentState};
pub use metrics::{Comparison, MetricsSummary};
pub use orchestrator::{ExecuteOptions, Orchestrator};
pub use pool::WorkerPool;
pub use protocol::{PirProtocol, ProtocolConfig, ProtocolType};
pub use query::{build_query_vector, encrypt_index, identify_real_result, QueryVector};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use storage::{ExperimentStore, MemoryStore};
