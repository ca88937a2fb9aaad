//! Sparse LU factorization and solve over block entries.
//!
//! The solver owns a shared, immutable [`SparsityPattern`] and factorizes
//! caller-owned entry data in place, in natural row order (no reordering:
//! the pattern already contains every fill-in that elimination in this
//! order produces, as explicit zero entries).
//!
//! # Storage
//!
//! L and U are superimposed on the pattern: entries left of the diagonal
//! are the L factor (unit block diagonal implicit), the diagonal and the
//! entries right of it are U. Each diagonal block additionally carries its
//! own dense full-pivot factorization, with the per-block permutations kept
//! in a parallel array.
//!
//! # Pivot perturbation and refinement
//!
//! With `use_pivot_perturbation`, a snapshot of the unfactorized matrix is
//! kept and pivots smaller than `EPSILON_PERTURBATION` times the
//! off-diagonal infinity norm of the matrix are pushed up to that
//! threshold. A subsequent solve then runs iterative refinement against the
//! snapshot until the componentwise backward error drops below the same
//! threshold, failing with [`Error::SingularMatrix`] if the refinement
//! budget is exhausted. When factorization finishes without perturbing, the
//! snapshot is released and solves run a single substitution pass.

use std::sync::Arc;

use gridflow_core::SparsityPattern;

use crate::entry::SparseLuEntry;
use crate::error::{Error, Result};

/// Pivot perturbation threshold and refinement convergence criterion,
/// relative to the off-diagonal infinity norm of the matrix.
pub const EPSILON_PERTURBATION: f64 = 1e-13;

/// Backward-error denominators are floored at this fraction of the largest
/// denominator, so that near-zero rows cannot dominate the error estimate.
const CAP_BACK_ERROR_DENOMINATOR: f64 = 1e-4;

/// Refinement iterations allowed beyond the initial correction.
pub const MAX_ITERATIVE_REFINEMENT: usize = 5;

/// Sparse LU solver over a shared pattern.
///
/// The solver holds no matrix values of its own; factor data, permutations,
/// right-hand sides and solutions are caller-owned slices laid out by the
/// pattern. One instance must not be shared between concurrent solves - the
/// pattern is the only shared piece.
pub struct SparseLuSolver<E: SparseLuEntry> {
    size: usize,
    nnz: usize,
    pattern: Arc<SparsityPattern>,
    has_pivot_perturbation: bool,
    matrix_norm: f64,
    original_matrix: Option<Vec<E>>,
}

impl<E: SparseLuEntry> SparseLuSolver<E> {
    pub fn new(pattern: Arc<SparsityPattern>) -> Self {
        Self {
            size: pattern.size(),
            nnz: pattern.nnz(),
            pattern,
            has_pivot_perturbation: false,
            matrix_norm: 0.0,
            original_matrix: None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pattern(&self) -> &Arc<SparsityPattern> {
        &self.pattern
    }

    /// Whether the last factorization perturbed any pivot.
    pub fn has_pivot_perturbation(&self) -> bool {
        self.has_pivot_perturbation
    }

    /// Factorize and solve in one call.
    pub fn prefactorize_and_solve(
        &mut self,
        data: &mut [E],
        block_perms: &mut [E::Perm],
        rhs: &[E::Vector],
        x: &mut [E::Vector],
        use_pivot_perturbation: bool,
    ) -> Result<()> {
        self.prefactorize(data, block_perms, use_pivot_perturbation)?;
        self.solve_with_prefactorized(data, block_perms, rhs, x)
    }

    /// Factorize `data` in place, in natural row order.
    ///
    /// Precondition: `data` is laid out by the pattern with every fill-in
    /// slot zero. `block_perms` is overwritten.
    pub fn prefactorize(
        &mut self,
        data: &mut [E],
        block_perms: &mut [E::Perm],
        use_pivot_perturbation: bool,
    ) -> Result<()> {
        self.check_len(data.len(), self.nnz)?;
        self.check_len(block_perms.len(), self.size)?;

        self.reset_matrix_cache();
        if use_pivot_perturbation {
            self.initialize_pivot_perturbation(data);
        }
        let perturb_threshold = EPSILON_PERTURBATION * self.matrix_norm;

        let row_indptr = self.pattern.row_indptr();
        let col_indices = self.pattern.col_indices();
        let diag_lu = self.pattern.diag_lu();

        // Per-row cursor into the column list, advanced so that the
        // symmetric column walk below the pivot is O(1) per entry.
        let mut col_position: Vec<usize> = row_indptr[..self.size].to_vec();

        for pivot_row in 0..self.size {
            let pivot_idx = diag_lu[pivot_row];

            data[pivot_idx].factorize_pivot(
                &mut block_perms[pivot_row],
                perturb_threshold,
                use_pivot_perturbation,
                &mut self.has_pivot_perturbation,
            )?;
            let pivot = data[pivot_idx];
            let perm = &block_perms[pivot_row];

            if E::IS_BLOCK {
                // Apply the pivot permutations to the already-computed
                // factors: rows of L left of the pivot, columns of U above
                // it. The pattern is symmetric, so both walks share the
                // per-row cursors.
                for l_idx in row_indptr[pivot_row]..pivot_idx {
                    data[l_idx].permute_rows(perm);
                    let u_row = col_indices[l_idx];
                    let u_idx = col_position[u_row];
                    debug_assert_eq!(col_indices[u_idx], pivot_row);
                    data[u_idx].permute_cols(perm);
                    col_position[u_row] += 1;
                }

                // Complete the U row right of the pivot:
                // U = L_pivot^-1 * P * A.
                for u_idx in pivot_idx + 1..row_indptr[pivot_row + 1] {
                    data[u_idx].permute_rows(perm);
                    data[u_idx].solve_unit_lower_from_left(&pivot);
                }
            }

            // Compute the L column below the pivot and apply the rank-one
            // Schur update to the trailing rows. The symmetric pattern
            // yields the row indices below the pivot from the column
            // indices right of it.
            for l_ref_idx in pivot_idx + 1..row_indptr[pivot_row + 1] {
                let l_row = col_indices[l_ref_idx];
                let l_idx = col_position[l_row];
                debug_assert_eq!(col_indices[l_idx], pivot_row);

                if E::IS_BLOCK {
                    // L = A * Q * U_pivot^-1.
                    data[l_idx].permute_cols(perm);
                }
                data[l_idx].solve_upper_from_right(&pivot);
                let l = data[l_idx];

                // Every target position is guaranteed present (symbolic
                // fill-in); both column lists are sorted, so a linear
                // advance through row l_row finds each one.
                let mut a_idx = l_idx;
                for u_idx in pivot_idx + 1..row_indptr[pivot_row + 1] {
                    let u_col = col_indices[u_idx];
                    while col_indices[a_idx] < u_col {
                        a_idx += 1;
                    }
                    debug_assert!(a_idx < row_indptr[l_row + 1]);
                    debug_assert_eq!(col_indices[a_idx], u_col);
                    let u = data[u_idx];
                    data[a_idx].mul_sub(&l, &u);
                }

                col_position[l_row] += 1;
            }
            col_position[pivot_row] += 1;
        }

        // Without perturbation there is nothing to refine against.
        if !self.has_pivot_perturbation {
            self.reset_matrix_cache();
        }
        Ok(())
    }

    /// Solve `A * x = rhs` with previously factorized data.
    ///
    /// Runs iterative refinement when the factorization perturbed a pivot,
    /// a single substitution pass otherwise. Repeated solves with the same
    /// inputs produce bitwise-identical solutions.
    pub fn solve_with_prefactorized(
        &self,
        data: &[E],
        block_perms: &[E::Perm],
        rhs: &[E::Vector],
        x: &mut [E::Vector],
    ) -> Result<()> {
        self.check_len(data.len(), self.nnz)?;
        self.check_len(block_perms.len(), self.size)?;
        self.check_len(rhs.len(), self.size)?;
        self.check_len(x.len(), self.size)?;

        if let Some(original) = self.original_matrix.as_ref() {
            self.solve_with_refinement(original, data, block_perms, rhs, x)
        } else {
            x.copy_from_slice(rhs);
            self.solve_once_in_place(data, block_perms, x);
            Ok(())
        }
    }

    /// One forward/backward substitution pass. `x` enters holding the
    /// right-hand side and exits holding the solution.
    fn solve_once_in_place(&self, data: &[E], block_perms: &[E::Perm], x: &mut [E::Vector]) {
        let row_indptr = self.pattern.row_indptr();
        let col_indices = self.pattern.col_indices();
        let diag_lu = self.pattern.diag_lu();

        // Forward substitution with L.
        for row in 0..self.size {
            x[row] = E::apply_p(&block_perms[row], x[row]);
            for l_idx in row_indptr[row]..diag_lu[row] {
                let col = col_indices[l_idx];
                debug_assert!(col < row);
                let xc = x[col];
                E::vector_mul_sub(&mut x[row], &data[l_idx], &xc);
            }
            if E::IS_BLOCK {
                E::vector_solve_unit_lower(&data[diag_lu[row]], &mut x[row]);
            }
        }

        // Backward substitution with U.
        for row in (0..self.size).rev() {
            for u_idx in (diag_lu[row] + 1..row_indptr[row + 1]).rev() {
                let col = col_indices[u_idx];
                debug_assert!(col > row);
                let xc = x[col];
                E::vector_mul_sub(&mut x[row], &data[u_idx], &xc);
            }
            E::vector_solve_upper(&data[diag_lu[row]], &mut x[row]);
        }

        // Undo the pivot column permutations.
        if E::IS_BLOCK {
            for row in 0..self.size {
                x[row] = E::apply_q(&block_perms[row], x[row]);
            }
        }
    }

    /// Iterative refinement against the unfactorized snapshot.
    ///
    /// Starts from `x = 0` with residual `rhs`, accumulates corrections
    /// from repeated substitution solves, and stops when the componentwise
    /// backward error drops below `EPSILON_PERTURBATION`. The budget is
    /// `MAX_ITERATIVE_REFINEMENT` corrections beyond the initial solve;
    /// exhausting it is a singularity.
    fn solve_with_refinement(
        &self,
        original: &[E],
        data: &[E],
        block_perms: &[E::Perm],
        rhs: &[E::Vector],
        x: &mut [E::Vector],
    ) -> Result<()> {
        for xi in x.iter_mut() {
            *xi = E::vector_zero();
        }
        // r = rhs - A * 0 = rhs.
        let mut residual = rhs.to_vec();
        let mut dx = vec![E::vector_zero(); self.size];

        let mut num_iter = 0;
        loop {
            if num_iter == MAX_ITERATIVE_REFINEMENT + 1 {
                return Err(Error::SingularMatrix);
            }
            num_iter += 1;

            dx.copy_from_slice(&residual);
            self.solve_once_in_place(data, block_perms, &mut dx);

            let backward_error = self.iterate_and_backward_error(original, rhs, &residual, &dx, x);
            self.calculate_residual(original, rhs, x, &mut residual);

            if backward_error <= EPSILON_PERTURBATION {
                return Ok(());
            }
        }
    }

    /// Componentwise backward error of the current iterate, then `x += dx`.
    ///
    /// Denominators `|rhs| + |A| * |x|` are computed from `x` before the
    /// update and floored at `CAP_BACK_ERROR_DENOMINATOR` times the largest
    /// denominator.
    fn iterate_and_backward_error(
        &self,
        original: &[E],
        rhs: &[E::Vector],
        residual: &[E::Vector],
        dx: &[E::Vector],
        x: &mut [E::Vector],
    ) -> f64 {
        let row_indptr = self.pattern.row_indptr();
        let col_indices = self.pattern.col_indices();

        let mut denominators: Vec<E::Real> = Vec::with_capacity(self.size);
        let mut max_denominator = 0.0_f64;
        for row in 0..self.size {
            let mut denominator = E::vector_abs(&rhs[row]);
            for idx in row_indptr[row]..row_indptr[row + 1] {
                original[idx].abs_mul_abs_acc(&x[col_indices[idx]], &mut denominator);
            }
            max_denominator = max_denominator.max(E::real_max(&denominator));
            denominators.push(denominator);
        }
        let min_denominator = CAP_BACK_ERROR_DENOMINATOR * max_denominator;

        let mut max_backward_error = 0.0_f64;
        for row in 0..self.size {
            let numerator = E::vector_abs(&residual[row]);
            E::real_clamp_floor(&mut denominators[row], min_denominator);
            max_backward_error =
                max_backward_error.max(E::real_div_max(&numerator, &denominators[row]));
            x[row] += dx[row];
        }
        max_backward_error
    }

    /// `residual = rhs - A * x` against the unfactorized snapshot.
    fn calculate_residual(
        &self,
        original: &[E],
        rhs: &[E::Vector],
        x: &[E::Vector],
        residual: &mut [E::Vector],
    ) {
        let row_indptr = self.pattern.row_indptr();
        let col_indices = self.pattern.col_indices();
        for row in 0..self.size {
            residual[row] = rhs[row];
            for idx in row_indptr[row]..row_indptr[row + 1] {
                let xc = x[col_indices[idx]];
                E::vector_mul_sub(&mut residual[row], &original[idx], &xc);
            }
        }
    }

    /// Snapshot the matrix and compute its off-diagonal infinity norm: per
    /// row, the sum of entry infinity norms excluding the diagonal; then
    /// the maximum over rows.
    fn initialize_pivot_perturbation(&mut self, data: &[E]) {
        self.original_matrix = Some(data.to_vec());

        let row_indptr = self.pattern.row_indptr();
        let col_indices = self.pattern.col_indices();
        let mut norm = 0.0_f64;
        for row in 0..self.size {
            let mut row_norm = 0.0;
            for idx in row_indptr[row]..row_indptr[row + 1] {
                if col_indices[idx] == row {
                    continue;
                }
                row_norm += data[idx].inf_norm();
            }
            norm = norm.max(row_norm);
        }
        self.matrix_norm = norm;
    }

    fn reset_matrix_cache(&mut self) {
        self.has_pivot_perturbation = false;
        self.matrix_norm = 0.0;
        self.original_matrix = None;
    }

    fn check_len(&self, actual: usize, expected: usize) -> Result<()> {
        if actual != expected {
            return Err(Error::DimensionMismatch { expected, actual });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix2, Vector2};
    use num_complex::Complex64;

    fn scalar_solver(
        size: usize,
        connections: &[(usize, usize)],
    ) -> (SparseLuSolver<f64>, Arc<SparsityPattern>) {
        let pattern = Arc::new(SparsityPattern::build(size, connections).unwrap());
        (SparseLuSolver::new(Arc::clone(&pattern)), pattern)
    }

    /// Dense A * x for a pattern-laid-out scalar matrix, for verification.
    fn matvec(pattern: &SparsityPattern, data: &[f64], x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; pattern.size()];
        for row in 0..pattern.size() {
            for idx in pattern.row_indptr()[row]..pattern.row_indptr()[row + 1] {
                y[row] += data[idx] * x[pattern.col_indices()[idx]];
            }
        }
        y
    }

    #[test]
    fn diagonal_scalar_system() {
        let (mut solver, _) = scalar_solver(3, &[]);
        let mut data = vec![2.0, 3.0, 4.0];
        let mut perms = vec![(); 3];
        let rhs = vec![2.0, 6.0, 12.0];
        let mut x = vec![0.0; 3];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        assert_eq!(x, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn dense_2x2_scalar_system() {
        // | 4  3 | * x = (10, 12)  =>  x = (1, 2)
        // | 6  3 |
        let (mut solver, pattern) = scalar_solver(2, &[(0, 1)]);
        let mut data = vec![0.0; pattern.nnz()];
        data[pattern.entry_index(0, 0).unwrap()] = 4.0;
        data[pattern.entry_index(0, 1).unwrap()] = 3.0;
        data[pattern.entry_index(1, 0).unwrap()] = 6.0;
        data[pattern.entry_index(1, 1).unwrap()] = 3.0;
        let mut perms = vec![(); 2];
        let rhs = vec![10.0, 12.0];
        let mut x = vec![0.0; 2];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        assert!((x[0] - 1.0).abs() < 1e-12, "x[0] = {}", x[0]);
        assert!((x[1] - 2.0).abs() < 1e-12, "x[1] = {}", x[1]);
    }

    #[test]
    fn identity_returns_rhs_exactly() {
        let (mut solver, _) = scalar_solver(4, &[]);
        let mut data = vec![1.0; 4];
        let mut perms = vec![(); 4];
        let rhs = vec![0.25, -3.0, 7.5, 0.0];
        let mut x = vec![0.0; 4];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        assert_eq!(x, rhs);
        assert_eq!(data, vec![1.0; 4]);
    }

    #[test]
    fn repeated_solves_are_bitwise_identical() {
        let (mut solver, pattern) = scalar_solver(3, &[(0, 1), (1, 2), (0, 2)]);
        let mut data = vec![0.0; pattern.nnz()];
        let values = [
            ((0, 0), 5.0),
            ((0, 1), -1.3),
            ((0, 2), 0.7),
            ((1, 0), -2.1),
            ((1, 1), 4.0),
            ((1, 2), 1.1),
            ((2, 0), 0.3),
            ((2, 1), -0.9),
            ((2, 2), 6.0),
        ];
        for ((i, j), v) in values {
            data[pattern.entry_index(i, j).unwrap()] = v;
        }
        let mut perms = vec![(); 3];
        solver.prefactorize(&mut data, &mut perms, false).unwrap();

        let rhs = vec![1.0, -2.0, 3.0];
        let mut x1 = vec![0.0; 3];
        let mut x2 = vec![0.0; 3];
        solver
            .solve_with_prefactorized(&data, &perms, &rhs, &mut x1)
            .unwrap();
        solver
            .solve_with_prefactorized(&data, &perms, &rhs, &mut x2)
            .unwrap();

        assert_eq!(x1, x2);
    }

    #[test]
    fn factorize_solve_residual_is_small() {
        let (mut solver, pattern) = scalar_solver(4, &[(0, 1), (1, 2), (2, 3), (0, 3)]);
        let mut data = vec![0.0; pattern.nnz()];
        // Diagonally dominant ring.
        for row in 0..4 {
            data[pattern.entry_index(row, row).unwrap()] = 4.0 + row as f64;
        }
        for (i, j) in [(0, 1), (1, 2), (2, 3), (0, 3)] {
            data[pattern.entry_index(i, j).unwrap()] = -1.0;
            data[pattern.entry_index(j, i).unwrap()] = -1.0;
        }
        let original = data.clone();
        let mut perms = vec![(); 4];
        let rhs = vec![1.0, 2.0, -1.0, 0.5];
        let mut x = vec![0.0; 4];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        let ax = matvec(&pattern, &original, &x);
        for row in 0..4 {
            assert!(
                (ax[row] - rhs[row]).abs() < 1e-12,
                "residual at row {row}: {} vs {}",
                ax[row],
                rhs[row]
            );
        }
    }

    #[test]
    fn fill_in_is_computed_through_elimination() {
        // Star with hub first: eliminating bus 0 couples every leaf pair
        // through fill-in. Verify against the dense solution.
        let (mut solver, pattern) = scalar_solver(4, &[(0, 1), (0, 2), (0, 3)]);
        let mut data = vec![0.0; pattern.nnz()];
        for row in 0..4 {
            data[pattern.entry_index(row, row).unwrap()] = 3.0;
        }
        for leaf in 1..4 {
            data[pattern.entry_index(0, leaf).unwrap()] = -1.0;
            data[pattern.entry_index(leaf, 0).unwrap()] = -1.0;
        }
        let original = data.clone();
        let mut perms = vec![(); 4];
        let rhs = vec![0.0, 1.0, 2.0, 3.0];
        let mut x = vec![0.0; 4];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        let ax = matvec(&pattern, &original, &x);
        for row in 0..4 {
            assert!((ax[row] - rhs[row]).abs() < 1e-12);
        }
    }

    #[test]
    fn near_singular_pivot_perturbs_and_refines() {
        // | 1e-20  1 | * x = (1, 2)  =>  x ~= (1, 1)
        // | 1      1 |
        let (mut solver, pattern) = scalar_solver(2, &[(0, 1)]);
        let mut data = vec![0.0; pattern.nnz()];
        data[pattern.entry_index(0, 0).unwrap()] = 1e-20;
        data[pattern.entry_index(0, 1).unwrap()] = 1.0;
        data[pattern.entry_index(1, 0).unwrap()] = 1.0;
        data[pattern.entry_index(1, 1).unwrap()] = 1.0;
        let mut perms = vec![(); 2];
        let rhs = vec![1.0, 2.0];
        let mut x = vec![0.0; 2];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, true)
            .unwrap();

        assert!(solver.has_pivot_perturbation());
        assert!((x[0] - 1.0).abs() < 1e-10, "x[0] = {}", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-10, "x[1] = {}", x[1]);
    }

    #[test]
    fn zero_matrix_is_singular_without_perturbation() {
        let (mut solver, pattern) = scalar_solver(2, &[(0, 1)]);
        let mut data = vec![0.0; pattern.nnz()];
        let mut perms = vec![(); 2];

        let result = solver.prefactorize(&mut data, &mut perms, false);
        assert!(matches!(result, Err(Error::SingularMatrix)));
    }

    #[test]
    fn non_finite_pivot_is_singular() {
        let (mut solver, _) = scalar_solver(1, &[]);
        let mut data = vec![f64::NAN];
        let mut perms = vec![()];
        let result = solver.prefactorize(&mut data, &mut perms, true);
        assert!(matches!(result, Err(Error::SingularMatrix)));
    }

    #[test]
    fn one_by_one_system_is_scalar_division() {
        let (mut solver, _) = scalar_solver(1, &[]);
        let mut data = vec![4.0];
        let mut perms = vec![()];
        let rhs = vec![10.0];
        let mut x = vec![0.0];
        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();
        assert_eq!(x[0], 2.5);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let (mut solver, _) = scalar_solver(3, &[]);
        let mut data = vec![1.0; 2]; // too short
        let mut perms = vec![(); 3];
        let result = solver.prefactorize(&mut data, &mut perms, false);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn complex_scalar_system_round_trips() {
        let pattern = Arc::new(SparsityPattern::build(2, &[(0, 1)]).unwrap());
        let mut solver = SparseLuSolver::<Complex64>::new(Arc::clone(&pattern));
        let mut data = vec![Complex64::new(0.0, 0.0); pattern.nnz()];
        data[pattern.entry_index(0, 0).unwrap()] = Complex64::new(2.0, 1.0);
        data[pattern.entry_index(0, 1).unwrap()] = Complex64::new(0.0, -1.0);
        data[pattern.entry_index(1, 0).unwrap()] = Complex64::new(0.0, -1.0);
        data[pattern.entry_index(1, 1).unwrap()] = Complex64::new(3.0, -0.5);
        let original = data.clone();
        let mut perms = vec![(); 2];
        let rhs = vec![Complex64::new(1.0, 0.0), Complex64::new(-1.0, 2.0)];
        let mut x = vec![Complex64::new(0.0, 0.0); 2];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        for row in 0..2 {
            let mut ax = Complex64::new(0.0, 0.0);
            for idx in pattern.row_indptr()[row]..pattern.row_indptr()[row + 1] {
                ax += original[idx] * x[pattern.col_indices()[idx]];
            }
            assert!((ax - rhs[row]).norm() < 1e-12);
        }
    }

    #[test]
    fn block_system_round_trips() {
        // Two buses, 2x2 blocks, diagonally dominant.
        let pattern = Arc::new(SparsityPattern::build(2, &[(0, 1)]).unwrap());
        let mut solver = SparseLuSolver::<Matrix2<f64>>::new(Arc::clone(&pattern));

        let mut data = vec![Matrix2::zeros(); pattern.nnz()];
        data[pattern.entry_index(0, 0).unwrap()] = Matrix2::new(5.0, 1.0, -1.0, 4.0);
        data[pattern.entry_index(0, 1).unwrap()] = Matrix2::new(-1.0, 0.5, 0.0, -1.0);
        data[pattern.entry_index(1, 0).unwrap()] = Matrix2::new(-1.0, 0.0, 0.5, -1.0);
        data[pattern.entry_index(1, 1).unwrap()] = Matrix2::new(6.0, -2.0, 1.0, 5.0);
        let original = data.clone();

        let mut perms = vec![<Matrix2<f64> as SparseLuEntry>::Perm::default(); 2];
        let rhs = vec![Vector2::new(1.0, 2.0), Vector2::new(-1.0, 0.5)];
        let mut x = vec![Vector2::zeros(); 2];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, false)
            .unwrap();

        for row in 0..2 {
            let mut ax = Vector2::zeros();
            for idx in pattern.row_indptr()[row]..pattern.row_indptr()[row + 1] {
                ax += original[idx] * x[pattern.col_indices()[idx]];
            }
            assert!(
                (ax - rhs[row]).norm() < 1e-12,
                "row {row}: {:?} vs {:?}",
                ax,
                rhs[row]
            );
        }
    }

    #[test]
    fn singular_block_pivot_perturbs_and_refines() {
        // | 0  I | with identity couplings: invertible overall, but the
        // | I  I | first diagonal block is exactly singular.
        let pattern = Arc::new(SparsityPattern::build(2, &[(0, 1)]).unwrap());
        let mut solver = SparseLuSolver::<Matrix2<f64>>::new(Arc::clone(&pattern));

        let mut data = vec![Matrix2::zeros(); pattern.nnz()];
        data[pattern.entry_index(0, 1).unwrap()] = Matrix2::identity();
        data[pattern.entry_index(1, 0).unwrap()] = Matrix2::identity();
        data[pattern.entry_index(1, 1).unwrap()] = Matrix2::identity();

        let mut perms = vec![<Matrix2<f64> as SparseLuEntry>::Perm::default(); 2];
        let rhs = vec![Vector2::new(1.0, 2.0), Vector2::new(3.0, 4.0)];
        let mut x = vec![Vector2::zeros(); 2];

        solver
            .prefactorize_and_solve(&mut data, &mut perms, &rhs, &mut x, true)
            .unwrap();

        assert!(solver.has_pivot_perturbation());
        // Exact solution: x1 = rhs0, x0 = rhs1 - rhs0.
        assert!((x[0] - Vector2::new(2.0, 2.0)).norm() < 1e-10, "x0 = {:?}", x[0]);
        assert!((x[1] - Vector2::new(1.0, 2.0)).norm() < 1e-10, "x1 = {:?}", x[1]);
    }

    #[test]
    fn singular_block_fails_without_perturbation() {
        let pattern = Arc::new(SparsityPattern::build(2, &[(0, 1)]).unwrap());
        let mut solver = SparseLuSolver::<Matrix2<f64>>::new(Arc::clone(&pattern));

        let mut data = vec![Matrix2::zeros(); pattern.nnz()];
        data[pattern.entry_index(0, 1).unwrap()] = Matrix2::identity();
        data[pattern.entry_index(1, 0).unwrap()] = Matrix2::identity();
        data[pattern.entry_index(1, 1).unwrap()] = Matrix2::identity();

        let mut perms = vec![<Matrix2<f64> as SparseLuEntry>::Perm::default(); 2];
        let result = solver.prefactorize(&mut data, &mut perms, false);
        assert!(matches!(result, Err(Error::SingularMatrix)));
    }

    #[test]
    fn snapshot_is_released_without_perturbation() {
        let (mut solver, _) = scalar_solver(2, &[(0, 1)]);
        let mut data = vec![4.0, -1.0, -1.0, 4.0];
        let mut perms = vec![(); 2];
        solver.prefactorize(&mut data, &mut perms, true).unwrap();
        assert!(!solver.has_pivot_perturbation());
        assert!(solver.original_matrix.is_none());
    }
}
