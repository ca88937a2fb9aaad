//! Numeric engines for gridflow: sparse block LU and Newton-Raphson power
//! flow.
//!
//! The centerpiece is [`SparseLuSolver`], a sparse LU factorization whose
//! entries are scalars or small dense blocks ([`SparseLuEntry`]), working
//! over a shared, fill-in-aware [`SparsityPattern`](gridflow_core::SparsityPattern)
//! in natural row order. Diagonal blocks are factorized with full pivoting
//! ([`dense_lu`]), too-small pivots can be perturbed, and perturbed solves
//! recover accuracy through bounded iterative refinement.
//!
//! On top of it, [`jacobian::assemble`] builds the power-flow Jacobian and
//! mismatch for a voltage estimate, and [`NewtonRaphsonSolver`] drives the
//! outer iteration; both are generic over the [`Symmetry`] axis (balanced
//! single-phase equivalent vs full three-phase).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use gridflow_core::SparsityPattern;
//! use gridflow_solver::{
//!     LoadKind, NewtonRaphsonConfig, NewtonRaphsonSolver, PowerFlowInput, Symmetric, YBus,
//! };
//! use num_complex::Complex64;
//!
//! // Three buses in a chain: 0 - 1 - 2, two identical lines.
//! let pattern = Arc::new(SparsityPattern::build(3, &[(0, 1), (1, 2)]).unwrap());
//! let y_line = Complex64::new(1.0, 0.0) / Complex64::new(0.02, 0.06);
//! let mut admittance = vec![Complex64::new(0.0, 0.0); pattern.nnz_y_bus()];
//! let mut add = |i: usize, j: usize, y: Complex64| {
//!     let k = pattern.entry_index(i, j).unwrap();
//!     admittance[pattern.map_lu_y_bus()[k].unwrap()] += y;
//! };
//! for (i, j) in [(0, 1), (1, 2)] {
//!     add(i, j, -y_line);
//!     add(j, i, -y_line);
//!     add(i, i, y_line);
//!     add(j, j, y_line);
//! }
//! let y_bus = YBus::<Symmetric>::new(Arc::clone(&pattern), admittance).unwrap();
//!
//! // A stiff source behind bus 0, a constant-power load drawing
//! // 0.5 + 0.2j at bus 2 (negative injection).
//! let mut input = PowerFlowInput::new(3);
//! input.add_source(0, Complex64::new(100.0, -500.0), Complex64::new(1.0, 0.0));
//! input.add_load(2, LoadKind::ConstPq, Complex64::new(-0.5, -0.2));
//!
//! let mut solver = NewtonRaphsonSolver::new(&y_bus);
//! let result = solver
//!     .solve(&y_bus, &input, &NewtonRaphsonConfig::default())
//!     .unwrap();
//!
//! assert!(result.iterations <= 4);
//! for u in &result.u {
//!     assert!(u.norm() > 0.9 && u.norm() <= 1.0);
//! }
//! ```

pub mod dense_lu;
pub mod entry;
pub mod error;
pub mod grid;
pub mod jacobian;
pub mod newton;
pub mod phase;
pub mod sparse_lu;

pub use dense_lu::{factorize_block_in_place, BlockPerm};
pub use entry::SparseLuEntry;
pub use error::{Error, Result};
pub use grid::{Load, LoadKind, PowerFlowInput, Source, YBus};
pub use newton::{
    solve_batch, NewtonRaphsonConfig, NewtonRaphsonSolver, PowerFlowResult,
};
pub use phase::{Asymmetric, Symmetric, Symmetry};
pub use sparse_lu::{SparseLuSolver, EPSILON_PERTURBATION, MAX_ITERATIVE_REFINEMENT};
