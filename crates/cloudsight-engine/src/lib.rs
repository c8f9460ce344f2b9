//! cloudsight-engine: Infrastructure analysis orchestration.
//!
//! Runs the full pipeline over one resource set: index → topology → rule
//! sets → traffic flows → posture → summary, and fingerprints the result.
//! Each stage reads only the immutable structures built before it. Runs are
//! supervised so a newer request supersedes an in-flight one.

pub mod cancel;
pub mod error;
pub mod fingerprint;
pub mod types;
pub mod watch;

pub use cancel::{RunSupervisor, RunTicket};
pub use error::EngineError;
pub use types::{AnalysisReport, PostureReport, ReportEnvelope};
pub use watch::Watcher;

use std::path::Path;
use std::time::Instant;

use cloudsight_core::{AnalysisConfig, Resource};
use cloudsight_index::ResourceIndex;
use cloudsight_netsim::{
    build_topology, NetworkTopology, PlatformDefaults, RuleCompiler, TrafficFlowEdge, TrafficSimulator,
};
use cloudsight_posture::{aggregate, PostureScorer, RuleTable};

use crate::fingerprint::ReportContent;

/// Read a JSON array of resource records from a file.
pub fn read_resources(path: &Path) -> error::Result<Vec<Resource>> {
    let input = std::fs::read_to_string(path)?;
    Ok(cloudsight_core::parse_resources(&input)?)
}

/// The analysis engine. Cheap to clone; clones share one run supervisor.
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    defaults: PlatformDefaults,
    rules: RuleTable,
    supervisor: RunSupervisor,
}

impl AnalysisEngine {
    /// Create an engine, loading the posture rule table named by the config.
    pub fn new(config: AnalysisConfig) -> error::Result<Self> {
        let rules = match &config.rules_file {
            Some(path) => RuleTable::load(Path::new(path)).map_err(|e| {
                tracing::warn!(path = %path, error = %e, "Failed to load posture rule table");
                e
            })?,
            None => RuleTable::builtin(),
        };
        tracing::debug!(rules = rules.len(), parallel = config.parallel, "Engine configured");

        Ok(Self {
            config,
            defaults: PlatformDefaults::azure(),
            rules,
            supervisor: RunSupervisor::new(),
        })
    }

    /// Replace the platform default NSG rules.
    pub fn with_defaults(mut self, defaults: PlatformDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Replace the posture rule table.
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &RunSupervisor {
        &self.supervisor
    }

    // ── Individual outputs ───────────────────────────────────────

    pub fn topology(&self, resources: Vec<Resource>) -> error::Result<NetworkTopology> {
        let index = ResourceIndex::build(resources)?;
        Ok(build_topology(&index))
    }

    pub fn flows(&self, resources: Vec<Resource>) -> error::Result<Vec<TrafficFlowEdge>> {
        let index = ResourceIndex::build(resources)?;
        let topology = build_topology(&index);
        let rule_sets = RuleCompiler::new(&index, self.defaults.clone()).compile_all();
        Ok(TrafficSimulator::new(&index, &topology, &rule_sets)
            .with_parallel(self.config.parallel)
            .simulate())
    }

    pub fn posture(&self, resources: Vec<Resource>) -> error::Result<PostureReport> {
        let index = ResourceIndex::build(resources)?;
        let topology = build_topology(&index);
        let postures = self.scorer(&index, &topology).score_all();
        let summary = aggregate(&postures);
        Ok(PostureReport { postures, summary })
    }

    // ── Full analysis ────────────────────────────────────────────

    /// Run the full pipeline as the newest request.
    pub fn analyze(&self, resources: Vec<Resource>) -> error::Result<AnalysisReport> {
        let ticket = self.supervisor.begin();
        self.analyze_with_ticket(resources, &ticket)
    }

    /// Run the full pipeline, aborting with `Superseded` between stages
    /// once `ticket` is no longer current.
    pub fn analyze_with_ticket(
        &self,
        resources: Vec<Resource>,
        ticket: &RunTicket,
    ) -> error::Result<AnalysisReport> {
        let start = Instant::now();

        let index = ResourceIndex::build(resources)?;
        ticket.check()?;

        let topology = build_topology(&index);
        let compiler = RuleCompiler::new(&index, self.defaults.clone());
        let rule_sets = compiler.compile_all();
        let firewalls = compiler.compile_firewall_rules();
        ticket.check()?;

        let flows = TrafficSimulator::new(&index, &topology, &rule_sets)
            .with_parallel(self.config.parallel)
            .simulate();
        ticket.check()?;

        let postures = self.scorer(&index, &topology).score_all();
        let summary = aggregate(&postures);
        ticket.check()?;

        let content = ReportContent {
            resource_count: index.len(),
            topology: &topology,
            flows: &flows,
            postures: &postures,
            summary: &summary,
            rule_sets: &rule_sets,
            firewalls: &firewalls,
        };
        let fingerprint = fingerprint::compute(&content)?;

        tracing::info!(
            run = ticket.run(),
            resources = index.len(),
            vnets = topology.vnets.len(),
            flows = flows.len(),
            overall_score = summary.overall_score,
            duration_ms = start.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(AnalysisReport {
            resource_count: index.len(),
            topology,
            flows,
            postures,
            summary,
            rule_sets,
            firewalls,
            fingerprint,
        })
    }

    /// Run the pipeline on the blocking pool. A result whose run was
    /// superseded while it computed is discarded.
    pub async fn analyze_async(&self, resources: Vec<Resource>) -> error::Result<ReportEnvelope> {
        let ticket = self.supervisor.begin();
        let engine = self.clone();
        let start = Instant::now();

        let task_ticket = ticket.clone();
        let report = tokio::task::spawn_blocking(move || engine.analyze_with_ticket(resources, &task_ticket))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;

        ticket.check().map_err(|e| {
            tracing::warn!(run = ticket.run(), "Discarding superseded analysis result");
            e
        })?;
        Ok(ReportEnvelope::new(report, start.elapsed().as_millis() as u64))
    }

    fn scorer<'a>(&self, index: &'a ResourceIndex, topology: &'a NetworkTopology) -> PostureScorer<'a> {
        PostureScorer::new(index, topology)
            .with_rules(self.rules.clone())
            .with_weights(self.config.severity_weights)
            .with_parallel(self.config.parallel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<Resource> {
        vec![
            Resource::new("azurerm_linux_virtual_machine", "app")
                .with_attributes(json!({}))
                .with_dependencies(["azurerm_mssql_server.db"]),
            Resource::new("azurerm_mssql_server", "db").with_attributes(json!({})),
        ]
    }

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let engine = engine();
        let first = engine.analyze(sample()).unwrap();
        let second = engine.analyze(sample()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint.len(), 64);
        assert!(fingerprint::verify(&first).unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_input() {
        let engine = engine();
        let base = engine.analyze(sample()).unwrap();
        let mut changed = sample();
        changed.push(Resource::new("azurerm_storage_account", "logs").with_attributes(json!({})));
        let other = engine.analyze(changed).unwrap();
        assert_ne!(base.fingerprint, other.fingerprint);
    }

    #[test]
    fn test_tampered_report_fails_verification() {
        let mut report = engine().analyze(sample()).unwrap();
        report.flows.clear();
        assert!(!fingerprint::verify(&report).unwrap());
    }

    #[test]
    fn test_superseded_ticket_aborts() {
        let engine = engine();
        let stale = engine.supervisor().begin();
        let _newer = engine.supervisor().begin();
        let err = engine.analyze_with_ticket(sample(), &stale).unwrap_err();
        assert!(err.is_superseded());
    }

    #[test]
    fn test_duplicate_keys_are_fatal() {
        let mut resources = sample();
        resources.push(Resource::new("azurerm_mssql_server", "db").with_attributes(json!({})));
        let err = engine().analyze(resources).unwrap_err();
        assert!(matches!(err, EngineError::Index(_)));
    }

    #[test]
    fn test_missing_rules_file_is_fatal() {
        let config = AnalysisConfig {
            rules_file: Some("/nonexistent/cloudsight-rules.toml".to_string()),
            ..AnalysisConfig::default()
        };
        assert!(matches!(AnalysisEngine::new(config), Err(EngineError::Posture(_))));
    }

    #[test]
    fn test_individual_outputs_match_full_report() {
        let engine = engine();
        let report = engine.analyze(sample()).unwrap();
        assert_eq!(engine.topology(sample()).unwrap(), report.topology);
        assert_eq!(engine.flows(sample()).unwrap(), report.flows);
        let posture = engine.posture(sample()).unwrap();
        assert_eq!(posture.postures, report.postures);
        assert_eq!(posture.summary, report.summary);
    }

    #[tokio::test]
    async fn test_analyze_async_envelope() {
        let envelope = engine().analyze_async(sample()).await.unwrap();
        assert_eq!(envelope.report.resource_count, 2);
        assert!(!envelope.run_id.is_nil());
    }
}
