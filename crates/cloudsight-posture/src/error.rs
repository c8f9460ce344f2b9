//! Error types for the cloudsight-posture crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostureError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Rule table {path} could not be loaded: {reason}")]
    RuleTable { path: String, reason: String },

    #[error("Invalid posture rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PostureError>;
