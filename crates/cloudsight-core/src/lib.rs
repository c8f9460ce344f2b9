//! cloudsight-core: Shared resource model, configuration, and error handling.
//!
//! This crate provides the foundational types used across all cloudsight crates:
//! - `Resource` records and their canonical `ResourceKey`
//! - `AttrValue`, the tagged union behind every attribute bag
//! - `Severity` and network enums shared by the simulator and scorer
//! - `AnalysisConfig`, loaded once and injected into the engines
//! - Common error types

pub mod attr;
pub mod config;
pub mod error;
pub mod types;

pub use attr::{AttrValue, Scalar};
pub use config::{AnalysisConfig, SeverityWeights};
pub use error::CoreError;
pub use types::{Access, Compliance, Direction, Resource, ResourceKey, Severity};

/// Parse a JSON array of resource records.
pub fn parse_resources(input: &str) -> error::Result<Vec<Resource>> {
    let resources: Vec<Resource> = serde_json::from_str(input)?;
    tracing::debug!(count = resources.len(), "Parsed resource records");
    Ok(resources)
}
