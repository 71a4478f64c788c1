//! Aggregated metrics and cross-experiment comparison.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::experiment::ExecutionRun;
use crate::protocol::ProtocolType;

/// Privacy levels closer than this count as equal.
pub const PRIVACY_TIE: f64 = 0.5;
/// Relative comm costs closer than this count as equal.
const COMM_TIE: f64 = 0.01;

const SLOW_QUERY_SECONDS: f64 = 1.0;
const LOW_PRIVACY: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub experiment_id: Uuid,
    pub protocol_type: ProtocolType,
    pub query_count: usize,
    pub failed_count: usize,
    pub avg_query_time: f64,
    pub avg_comm_cost: f64,
    pub avg_server_load: f64,
    pub avg_client_load: f64,
    pub accuracy: f64,
    pub privacy_level: f64,
    pub avg_entries: f64,
    pub needs_decrypt: bool,
    pub total_query_time: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

impl MetricsSummary {
    /// Derive the summary from the stored per-query results.
    pub fn from_run(experiment_id: Uuid, run: &ExecutionRun) -> Self {
        let results = &run.results;
        Self {
            experiment_id,
            protocol_type: run.protocol_type,
            query_count: results.len(),
            failed_count: run.failures.len(),
            avg_query_time: mean(results.iter().map(|r| r.query_time)),
            avg_comm_cost: mean(results.iter().map(|r| r.comm_cost)),
            avg_server_load: mean(results.iter().map(|r| r.server_load)),
            avg_client_load: mean(results.iter().map(|r| r.client_load)),
            accuracy: mean(results.iter().map(|r| r.accuracy)),
            privacy_level: mean(results.iter().map(|r| r.privacy_level)),
            avg_entries: mean(results.iter().map(|r| r.entry_count as f64)),
            needs_decrypt: results.iter().any(|r| r.needs_decrypt),
            total_query_time: results.iter().map(|r| r.query_time).sum(),
            start_time: run.start_time,
            end_time: run.end_time,
        }
    }

    pub fn value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::QueryTime => self.avg_query_time,
            MetricKind::Accuracy => self.accuracy,
            MetricKind::CommCost => self.avg_comm_cost,
            MetricKind::ServerLoad => self.avg_server_load,
            MetricKind::ClientLoad => self.avg_client_load,
            MetricKind::PrivacyLevel => self.privacy_level,
        }
    }

    /// Advisories for a single experiment with no baseline.
    pub fn advisories(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.avg_query_time > SLOW_QUERY_SECONDS {
            notes.push("Query time is high; consider partitioning the dataset or caching".to_string());
        }
        if self.privacy_level < LOW_PRIVACY {
            notes.push("Privacy level is low; consider the homomorphic or hybrid protocol".to_string());
        }
        notes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    QueryTime,
    Accuracy,
    CommCost,
    ServerLoad,
    ClientLoad,
    PrivacyLevel,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::QueryTime,
        MetricKind::Accuracy,
        MetricKind::CommCost,
        MetricKind::ServerLoad,
        MetricKind::ClientLoad,
        MetricKind::PrivacyLevel,
    ];

    pub fn lower_is_better(self) -> bool {
        matches!(
            self,
            MetricKind::QueryTime | MetricKind::CommCost | MetricKind::ServerLoad | MetricKind::ClientLoad
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub current: f64,
    pub baseline: f64,
    pub diff_percent: f64,
    pub is_improvement: bool,
}

impl MetricDelta {
    pub fn new(metric: MetricKind, current: f64, baseline: f64) -> Self {
        let diff_percent = if baseline != 0.0 {
            (current - baseline) / baseline * 100.0
        } else {
            0.0
        };
        let is_improvement = if metric.lower_is_better() {
            diff_percent < 0.0
        } else {
            diff_percent > 0.0
        };
        Self {
            current,
            baseline,
            diff_percent,
            is_improvement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub experiment_id: Uuid,
    pub protocol_type: ProtocolType,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub current: MetricsSummary,
    pub baseline: MetricsSummary,
    pub metrics: BTreeMap<MetricKind, MetricDelta>,
    pub recommendation: Recommendation,
    pub advisories: Vec<String>,
}

fn recommend(summary: &MetricsSummary, reason: String) -> Recommendation {
    Recommendation {
        experiment_id: summary.experiment_id,
        protocol_type: summary.protocol_type,
        reason,
    }
}

/// Relative comm-cost increase of `high` over `low`.
fn comm_increase(high: f64, low: f64) -> f64 {
    if low > 0.0 {
        (high - low) / low
    } else if high > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

fn choose(current: &MetricsSummary, baseline: &MetricsSummary, comm_cost_threshold: f64) -> Recommendation {
    let privacy_gap = current.privacy_level - baseline.privacy_level;

    if privacy_gap.abs() < PRIVACY_TIE {
        let comm_gap = comm_increase(current.avg_comm_cost, baseline.avg_comm_cost);
        let reverse_gap = comm_increase(baseline.avg_comm_cost, current.avg_comm_cost);
        if comm_gap.abs() > COMM_TIE || reverse_gap.abs() > COMM_TIE {
            let winner = if current.avg_comm_cost <= baseline.avg_comm_cost { current } else { baseline };
            return recommend(winner, "equal privacy; lower communication cost".into());
        }
        let winner = if current.avg_query_time <= baseline.avg_query_time { current } else { baseline };
        return recommend(winner, "equal privacy and communication cost; lower query time".into());
    }

    let (high, low) = if privacy_gap > 0.0 { (current, baseline) } else { (baseline, current) };
    let increase = comm_increase(high.avg_comm_cost, low.avg_comm_cost);
    if increase <= comm_cost_threshold {
        recommend(
            high,
            format!(
                "privacy {:.1} vs {:.1} at a {:.1}x communication increase (threshold {:.1}x)",
                high.privacy_level, low.privacy_level, increase, comm_cost_threshold
            ),
        )
    } else {
        recommend(
            low,
            format!(
                "privacy gain of {:.1} does not justify a {:.1}x communication increase (threshold {:.1}x)",
                high.privacy_level - low.privacy_level,
                increase,
                comm_cost_threshold
            ),
        )
    }
}

/// Compare `current` against `baseline`.
pub fn compare(current: &MetricsSummary, baseline: &MetricsSummary, comm_cost_threshold: f64) -> Comparison {
    let metrics: BTreeMap<MetricKind, MetricDelta> = MetricKind::ALL
        .iter()
        .map(|&m| (m, MetricDelta::new(m, current.value(m), baseline.value(m))))
        .collect();

    let mut advisories = Vec::new();
    let (cur, base) = (current.protocol_type, baseline.protocol_type);
    if metrics[&MetricKind::QueryTime].diff_percent > 20.0 {
        advisories.push(format!(
            "{cur} takes over 20% longer per query than {base}; tune its parameters or use a faster protocol"
        ));
    }
    if metrics[&MetricKind::PrivacyLevel].diff_percent < -10.0 {
        advisories.push(format!(
            "{cur} offers over 10% less privacy than {base}; consider a stronger protocol"
        ));
    }
    if metrics[&MetricKind::CommCost].is_improvement {
        advisories.push(format!(
            "{cur} communicates less than {base}; suited to bandwidth-limited links"
        ));
    }

    Comparison {
        current: current.clone(),
        baseline: baseline.clone(),
        recommendation: choose(current, baseline, comm_cost_threshold),
        metrics,
        advisories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(p: ProtocolType, privacy: f64, comm: f64, time: f64) -> MetricsSummary {
        let now = Utc::now();
        MetricsSummary {
            experiment_id: Uuid::new_v4(),
            protocol_type: p,
            query_count: 10,
            failed_count: 0,
            avg_query_time: time,
            avg_comm_cost: comm,
            avg_server_load: 0.0,
            avg_client_load: 0.0,
            accuracy: 1.0,
            privacy_level: privacy,
            avg_entries: 3.0,
            needs_decrypt: false,
            total_query_time: time * 10.0,
            start_time: now,
            end_time: now,
        }
    }

    #[test]
    fn deltas_follow_direction() {
        let d = MetricDelta::new(MetricKind::CommCost, 50.0, 100.0);
        assert_eq!(d.diff_percent, -50.0);
        assert!(d.is_improvement);
        let d = MetricDelta::new(MetricKind::PrivacyLevel, 8.0, 4.0);
        assert_eq!(d.diff_percent, 100.0);
        assert!(d.is_improvement);
        let d = MetricDelta::new(MetricKind::Accuracy, 1.0, 0.0);
        assert_eq!(d.diff_percent, 0.0);
        assert!(!d.is_improvement);
    }

    #[test]
    fn higher_privacy_within_threshold_wins() {
        let basic = summary(ProtocolType::Basic, 3.0, 1000.0, 0.001);
        let he = summary(ProtocolType::Homomorphic, 7.0, 400_000.0, 0.1);
        let c = compare(&he, &basic, 1000.0);
        assert_eq!(c.recommendation.protocol_type, ProtocolType::Homomorphic);
        assert_eq!(c.recommendation.experiment_id, he.experiment_id);
    }

    #[test]
    fn strict_threshold_prefers_cheaper() {
        let basic = summary(ProtocolType::Basic, 3.0, 1000.0, 0.001);
        let he = summary(ProtocolType::Homomorphic, 7.0, 400_000.0, 0.1);
        let c = compare(&basic, &he, 10.0);
        assert_eq!(c.recommendation.protocol_type, ProtocolType::Basic);
    }

    #[test]
    fn equal_privacy_prefers_comm_then_time() {
        let a = summary(ProtocolType::Homomorphic, 7.0, 500.0, 0.5);
        let b = summary(ProtocolType::Onion, 7.2, 900.0, 0.1);
        assert_eq!(compare(&a, &b, 1000.0).recommendation.protocol_type, ProtocolType::Homomorphic);

        let c = summary(ProtocolType::Hybrid, 7.0, 500.0, 0.05);
        assert_eq!(compare(&a, &c, 1000.0).recommendation.protocol_type, ProtocolType::Hybrid);
    }

    #[test]
    fn advisories() {
        let slow = summary(ProtocolType::Basic, 3.0, 10.0, 2.0);
        assert_eq!(slow.advisories().len(), 2);

        let fast = summary(ProtocolType::Homomorphic, 8.0, 50.0, 0.1);
        assert!(fast.advisories().is_empty());

        let c = compare(&slow, &fast, 1000.0);
        assert_eq!(c.advisories.len(), 3);
        assert_eq!(c.metrics.len(), 6);
    }
}
