//! BLAKE3 content fingerprint of an analysis report.
//!
//! Serializes every report field except the fingerprint itself to JSON and
//! hashes the bytes. All maps in the report are ordered, so the JSON is
//! canonical for a given input.

use std::collections::BTreeMap;

use serde::Serialize;

use cloudsight_core::ResourceKey;
use cloudsight_netsim::{CompiledRuleSet, FirewallRuleSet, NetworkTopology, TrafficFlowEdge};
use cloudsight_posture::{Posture, Summary};

use crate::error::Result;
use crate::types::AnalysisReport;

/// Hashable view of a report (excludes `fingerprint`).
#[derive(Serialize)]
pub(crate) struct ReportContent<'a> {
    pub resource_count: usize,
    pub topology: &'a NetworkTopology,
    pub flows: &'a [TrafficFlowEdge],
    pub postures: &'a BTreeMap<ResourceKey, Posture>,
    pub summary: &'a Summary,
    pub rule_sets: &'a BTreeMap<ResourceKey, CompiledRuleSet>,
    pub firewalls: &'a BTreeMap<ResourceKey, FirewallRuleSet>,
}

impl<'a> From<&'a AnalysisReport> for ReportContent<'a> {
    fn from(report: &'a AnalysisReport) -> Self {
        Self {
            resource_count: report.resource_count,
            topology: &report.topology,
            flows: &report.flows,
            postures: &report.postures,
            summary: &report.summary,
            rule_sets: &report.rule_sets,
            firewalls: &report.firewalls,
        }
    }
}

pub(crate) fn compute(content: &ReportContent<'_>) -> Result<String> {
    let json = serde_json::to_vec(content)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

/// True when `report.fingerprint` matches its content.
pub fn verify(report: &AnalysisReport) -> Result<bool> {
    Ok(compute(&ReportContent::from(report))? == report.fingerprint)
}
