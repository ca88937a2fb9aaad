//! Error types for gridflow-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix")]
    SingularMatrix,

    #[error("power flow did not converge after {iterations} iterations (max deviation {max_deviation:.3e})")]
    DidNotConverge {
        iterations: usize,
        max_deviation: f64,
    },

    #[error("invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("assembly error: {0}")]
    Assembly(String),
}

pub type Result<T> = std::result::Result<T, Error>;
