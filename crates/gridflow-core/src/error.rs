//! Error types for gridflow-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sparsity pattern: {0}")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, Error>;
