//! pir-bench: run one dataset under several PIR protocols and print a JSON
//! report of their metrics and pairwise comparison against the first one.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Map};
use tracing_subscriber::EnvFilter;

use pir_lab::{DatasetRecord, DatasetSpec, ExecuteOptions, ExperimentStore, MemoryStore, Orchestrator, PirConfig, ProtocolType};

#[derive(Parser)]
#[command(name = "pir-bench")]
#[command(about = "Benchmark PIR protocols on a mock health-record dataset")]
#[command(version)]
struct Args {
    /// Number of records in the generated dataset
    #[arg(long, default_value = "1000")]
    records: usize,

    /// Queries per protocol
    #[arg(long, default_value = "10")]
    queries: usize,

    /// Protocols to run; the first is the comparison baseline
    #[arg(long, value_delimiter = ',', default_value = "basic,homomorphic,hybrid,onion")]
    protocols: Vec<String>,

    /// Encrypt records before querying them
    #[arg(long)]
    encrypt: bool,

    /// Random seed for dataset and query sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Engine configuration as a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist experiments to this SQLite file instead of memory
    #[arg(long)]
    db: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<PirConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PirConfig::from_json_str(&text)?
        }
        None => PirConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(args: &Args) -> Result<Arc<dyn ExperimentStore>> {
    match &args.db {
        Some(path) => Ok(Arc::new(pir_lab::SqliteStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

async fn run(args: Args) -> Result<()> {
    let protocols = args
        .protocols
        .iter()
        .map(|p| p.parse::<ProtocolType>())
        .collect::<pir_lab::Result<Vec<_>>>()?;
    if protocols.is_empty() {
        bail!("at least one protocol is required");
    }

    let config = load_config(&args)?;
    let orchestrator = Orchestrator::new(open_store(&args)?, config, random_key()?)?;

    let mut spec = DatasetSpec::new(args.records);
    spec.encrypt = args.encrypt;
    spec.seed = args.seed;
    let template = orchestrator.create(spec).await?;
    tracing::info!(records = template.dataset.count, "dataset ready");

    let mut records: Vec<DatasetRecord> = Vec::with_capacity(template.dataset.count);
    for index in 0..template.dataset.count as u64 {
        records.push(orchestrator.get_record(template.id, index).await?);
    }

    let mut ids = Vec::with_capacity(protocols.len());
    let mut summaries = Vec::with_capacity(protocols.len());
    for protocol in &protocols {
        let experiment = orchestrator.create_from_records(records.clone()).await?;
        orchestrator
            .configure(experiment.id, protocol.as_str(), &Map::new(), false)
            .await?;
        orchestrator
            .execute(experiment.id, ExecuteOptions::queries(args.queries))
            .await?;
        let summary = orchestrator.get_metrics(experiment.id).await?;
        tracing::info!(
            protocol = %protocol,
            avg_query_time = summary.avg_query_time,
            avg_comm_cost = summary.avg_comm_cost,
            privacy = summary.privacy_level,
            "protocol finished"
        );
        ids.push(experiment.id);
        summaries.push(summary);
    }
    orchestrator.delete(template.id).await?;

    let mut comparisons = Vec::new();
    for id in ids.iter().skip(1) {
        comparisons.push(orchestrator.compare(*id, ids[0]).await?);
    }

    let report = json!({
        "records": args.records,
        "queries": args.queries,
        "summaries": summaries,
        "comparisons": comparisons,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn random_key() -> Result<Vec<u8>> {
    let mut key = vec![0u8; 32];
    OsRng.try_fill_bytes(&mut key).context("generating record key")?;
    Ok(key)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(run(args))
}
