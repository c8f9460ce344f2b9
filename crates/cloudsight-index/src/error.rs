//! Error types for the cloudsight-index crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Duplicate resource key: {key}")]
    DuplicateKey { key: String },
}

pub type Result<T> = std::result::Result<T, IndexError>;
