//! Core data structures for gridflow.
//!
//! This crate provides the two foundations every gridflow solver is built
//! on:
//!
//! - [`SparsityPattern`] - An immutable, fill-in-aware LU sparsity pattern,
//!   built once per grid topology and shared by reference across solves.
//! - [`LuScalar`] - The scalar field abstraction (real or complex double)
//!   that lets the numeric kernels be written once for both fields.
//!
//! # Example: Building a Pattern
//!
//! ```rust
//! use gridflow_core::SparsityPattern;
//!
//! // A three-bus chain: 0 - 1 - 2. A path graph factorizes without fill-in.
//! let pattern = SparsityPattern::build(3, &[(0, 1), (1, 2)]).unwrap();
//! assert_eq!(pattern.size(), 3);
//! assert_eq!(pattern.nnz(), 7);
//! assert_eq!(pattern.nnz_y_bus(), pattern.nnz());
//!
//! // A star fills in the eliminated hub's neighborhood.
//! let star = SparsityPattern::build(4, &[(0, 1), (0, 2), (0, 3)]).unwrap();
//! assert!(star.nnz() > star.nnz_y_bus());
//! ```

pub mod error;
pub mod pattern;
pub mod scalar;

pub use error::{Error, Result};
pub use pattern::SparsityPattern;
pub use scalar::LuScalar;
