//! Analysis report types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cloudsight_core::ResourceKey;
use cloudsight_netsim::{CompiledRuleSet, FirewallRuleSet, NetworkTopology, TrafficFlowEdge};
use cloudsight_posture::{Posture, Summary};

/// Everything one run derives from a resource set.
///
/// Contains no run-specific data, so identical input yields an identical
/// report and fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub resource_count: usize,
    pub topology: NetworkTopology,
    pub flows: Vec<TrafficFlowEdge>,
    pub postures: BTreeMap<ResourceKey, Posture>,
    pub summary: Summary,
    pub rule_sets: BTreeMap<ResourceKey, CompiledRuleSet>,
    pub firewalls: BTreeMap<ResourceKey, FirewallRuleSet>,
    /// BLAKE3 over the canonical JSON of every other field.
    pub fingerprint: String,
}

/// Posture map and its summary, as emitted by `cloudsight posture`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureReport {
    pub postures: BTreeMap<ResourceKey, Posture>,
    pub summary: Summary,
}

/// A report stamped with per-run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub run_id: Uuid,
    pub analyzed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub report: AnalysisReport,
}

impl ReportEnvelope {
    pub fn new(report: AnalysisReport, duration_ms: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            analyzed_at: Utc::now(),
            duration_ms,
            report,
        }
    }
}
