//! Error types for the cloudsight-engine crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Core error: {0}")]
    Core(#[from] cloudsight_core::CoreError),

    #[error("Index error: {0}")]
    Index(#[from] cloudsight_index::IndexError),

    #[error("Posture error: {0}")]
    Posture(#[from] cloudsight_posture::PostureError),

    #[error("Run {run} superseded by run {latest}")]
    Superseded { run: u64, latest: u64 },

    #[error("Analysis task failed: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, EngineError::Superseded { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
