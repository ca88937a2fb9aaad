//! Dense LU factorization of a single block, with full pivoting.
//!
//! Admittance-derived blocks are badly scaled across phases, so partial
//! pivoting is not enough: at every step the pivot is chosen as the largest
//! entry of the whole trailing submatrix, and both a row and a column
//! permutation are recorded.
//!
//! A pivot smaller than the caller's threshold can optionally be *perturbed*
//! up to the threshold instead of failing. That keeps a factorization alive
//! through transient singularities; the sparse solver then compensates with
//! iterative refinement.
//!
//! Storage follows the usual packed convention: L strictly below the
//! diagonal (unit diagonal implicit), U on and above it.

use gridflow_core::LuScalar;
use nalgebra::{SMatrix, SVector};

use crate::error::{Error, Result};

/// Row and column permutations chosen by the full pivot of one block.
///
/// `p[i]` / `q[j]` are source indices: row `i` of `P * M` is row `p[i]` of
/// `M`, and column `j` of `M * Q` is column `q[j]` of `M`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPerm<const K: usize> {
    p: [usize; K],
    q: [usize; K],
}

impl<const K: usize> Default for BlockPerm<K> {
    fn default() -> Self {
        Self {
            p: std::array::from_fn(|i| i),
            q: std::array::from_fn(|i| i),
        }
    }
}

impl<const K: usize> BlockPerm<K> {
    pub fn p(&self) -> &[usize; K] {
        &self.p
    }

    pub fn q(&self) -> &[usize; K] {
        &self.q
    }

    /// `P * M`.
    pub fn permute_rows<S: LuScalar>(&self, m: &SMatrix<S, K, K>) -> SMatrix<S, K, K> {
        SMatrix::from_fn(|i, j| m[(self.p[i], j)])
    }

    /// `M * Q`.
    pub fn permute_cols<S: LuScalar>(&self, m: &SMatrix<S, K, K>) -> SMatrix<S, K, K> {
        SMatrix::from_fn(|i, j| m[(i, self.q[j])])
    }

    /// `P * v`.
    pub fn apply_p<S: LuScalar>(&self, v: &SVector<S, K>) -> SVector<S, K> {
        SVector::from_fn(|i, _| v[self.p[i]])
    }

    /// `Q * v`.
    pub fn apply_q<S: LuScalar>(&self, v: &SVector<S, K>) -> SVector<S, K> {
        let mut out = *v;
        for j in 0..K {
            out[self.q[j]] = v[j];
        }
        out
    }
}

/// Replace a too-small pivot by a threshold-sized value of the same phase.
///
/// `abs_value` must hold the magnitude of `value` on entry; both are updated
/// when the perturbation fires, and `has_pivot_perturbation` is latched.
pub(crate) fn perturb_pivot_if_needed<S: LuScalar>(
    perturb_threshold: f64,
    value: &mut S,
    abs_value: &mut f64,
    has_pivot_perturbation: &mut bool,
) {
    if *abs_value < perturb_threshold {
        let scale = if *abs_value == 0.0 {
            S::one()
        } else {
            *value * S::from_real(1.0 / *abs_value)
        };
        *value = scale * S::from_real(perturb_threshold);
        *abs_value = perturb_threshold;
        *has_pivot_perturbation = true;
    }
}

/// Factorize a `K`x`K` block in place with full pivoting.
///
/// On success the block holds L (strictly lower, unit diagonal implicit)
/// and U (upper, including the diagonal) of `P * A * Q = L * U`, with the
/// permutations written to `block_perm`.
///
/// When `use_pivot_perturbation` is set, pivots with magnitude below
/// `perturb_threshold` are pushed up to the threshold and
/// `has_pivot_perturbation` is latched. Otherwise an exactly singular
/// trailing submatrix stops elimination early and the final diagonal check
/// fails with [`Error::SingularMatrix`]. The check also rejects any
/// non-finite pivot, and - when no perturbation fired - any pivot below
/// machine precision relative to the largest one seen.
pub fn factorize_block_in_place<S: LuScalar, const K: usize>(
    matrix: &mut SMatrix<S, K, K>,
    block_perm: &mut BlockPerm<K>,
    perturb_threshold: f64,
    use_pivot_perturbation: bool,
    has_pivot_perturbation: &mut bool,
) -> Result<()> {
    let mut row_transpositions = [0usize; K];
    let mut col_transpositions = [0usize; K];
    let mut max_pivot = 0.0_f64;

    for pivot in 0..K {
        // Largest squared magnitude in the trailing corner.
        let mut biggest_score = 0.0_f64;
        let (mut row_biggest, mut col_biggest) = (pivot, pivot);
        for r in pivot..K {
            for c in pivot..K {
                let score = matrix[(r, c)].modulus_squared();
                if score > biggest_score {
                    biggest_score = score;
                    row_biggest = r;
                    col_biggest = c;
                }
            }
        }

        if biggest_score == 0.0 && !use_pivot_perturbation {
            // Structurally singular and not allowed to perturb: identity
            // transpositions for the rest, let the diagonal check fail.
            for rest in pivot..K {
                row_transpositions[rest] = rest;
                col_transpositions[rest] = rest;
            }
            break;
        }

        let mut abs_pivot = biggest_score.sqrt();
        if use_pivot_perturbation {
            let mut value = matrix[(row_biggest, col_biggest)];
            perturb_pivot_if_needed(
                perturb_threshold,
                &mut value,
                &mut abs_pivot,
                has_pivot_perturbation,
            );
            matrix[(row_biggest, col_biggest)] = value;
        }
        max_pivot = max_pivot.max(abs_pivot);

        row_transpositions[pivot] = row_biggest;
        col_transpositions[pivot] = col_biggest;
        if pivot != row_biggest {
            matrix.swap_rows(pivot, row_biggest);
        }
        if pivot != col_biggest {
            matrix.swap_columns(pivot, col_biggest);
        }

        // Gaussian elimination of the trailing corner.
        if pivot + 1 < K {
            let inv = S::one() / matrix[(pivot, pivot)];
            for r in pivot + 1..K {
                matrix[(r, pivot)] *= inv;
            }
            for r in pivot + 1..K {
                let l = matrix[(r, pivot)];
                for c in pivot + 1..K {
                    let u = matrix[(pivot, c)];
                    matrix[(r, c)] -= l * u;
                }
            }
        }
    }

    // Compose the permutations: the transposition sequences were applied to
    // the matrix in forward order, so apply them to index arrays the same
    // way.
    let mut p: [usize; K] = std::array::from_fn(|i| i);
    let mut q: [usize; K] = std::array::from_fn(|i| i);
    for t in 0..K {
        p.swap(t, row_transpositions[t]);
        q.swap(t, col_transpositions[t]);
    }
    block_perm.p = p;
    block_perm.q = q;

    // Diagonal check. With perturbation active every pivot was already
    // pushed to at least the threshold, so only non-finite values can fail.
    let pivot_threshold = if *has_pivot_perturbation {
        0.0
    } else {
        f64::EPSILON * max_pivot
    };
    for i in 0..K {
        let d = matrix[(i, i)];
        if d.magnitude() < pivot_threshold || !d.is_invertible() {
            return Err(Error::SingularMatrix);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix2, Matrix3};

    fn reconstruct<const K: usize>(
        original: &SMatrix<f64, K, K>,
        factored: &SMatrix<f64, K, K>,
        perm: &BlockPerm<K>,
    ) -> f64 {
        let mut l = SMatrix::<f64, K, K>::identity();
        let mut u = SMatrix::<f64, K, K>::zeros();
        for i in 0..K {
            for j in 0..K {
                if j < i {
                    l[(i, j)] = factored[(i, j)];
                } else {
                    u[(i, j)] = factored[(i, j)];
                }
            }
        }
        let paq = perm.permute_cols(&perm.permute_rows(original));
        (paq - l * u).abs().max()
    }

    #[test]
    fn identity_block_factorizes_to_itself() {
        let original = Matrix3::<f64>::identity();
        let mut m = original;
        let mut perm = BlockPerm::default();
        let mut perturbed = false;
        factorize_block_in_place(&mut m, &mut perm, 0.0, false, &mut perturbed).unwrap();

        assert!(!perturbed);
        assert_eq!(m, Matrix3::identity());
        assert_eq!(perm.p(), &[0, 1, 2]);
        assert_eq!(perm.q(), &[0, 1, 2]);
    }

    #[test]
    fn full_pivot_selects_largest_entry() {
        let original = Matrix2::new(4.0, 3.0, 6.0, 3.0);
        let mut m = original;
        let mut perm = BlockPerm::default();
        let mut perturbed = false;
        factorize_block_in_place(&mut m, &mut perm, 0.0, false, &mut perturbed).unwrap();

        // 6 at (1, 0) is the largest entry, so it becomes the first pivot.
        assert_eq!(m[(0, 0)], 6.0);
        assert!(reconstruct(&original, &m, &perm) < 1e-14);
    }

    #[test]
    fn factorization_reconstructs_paq() {
        let original = Matrix3::new(0.5, -2.0, 1.0, 3.0, 0.1, -1.0, -1.5, 4.0, 0.2);
        let mut m = original;
        let mut perm = BlockPerm::default();
        let mut perturbed = false;
        factorize_block_in_place(&mut m, &mut perm, 0.0, false, &mut perturbed).unwrap();

        assert!(!perturbed);
        assert!(reconstruct(&original, &m, &perm) < 1e-13);
    }

    #[test]
    fn zero_block_is_singular_without_perturbation() {
        let mut m = Matrix3::<f64>::zeros();
        let mut perm = BlockPerm::default();
        let mut perturbed = false;
        let result = factorize_block_in_place(&mut m, &mut perm, 0.0, false, &mut perturbed);
        assert!(matches!(result, Err(Error::SingularMatrix)));
    }

    #[test]
    fn rank_deficient_block_perturbs_and_succeeds() {
        // Second row is a multiple of the first: rank 1.
        let mut m = Matrix2::new(1.0, 2.0, 2.0, 4.0);
        let mut perm = BlockPerm::default();
        let mut perturbed = false;
        factorize_block_in_place(&mut m, &mut perm, 1e-10, true, &mut perturbed).unwrap();

        assert!(perturbed);
        // The dead trailing pivot was pushed up to the threshold.
        assert!((m[(1, 1)].abs() - 1e-10).abs() < 1e-24);
    }

    #[test]
    fn perturbation_keeps_the_sign() {
        let mut value = -1e-20_f64;
        let mut abs_value = value.abs();
        let mut perturbed = false;
        perturb_pivot_if_needed(1e-13, &mut value, &mut abs_value, &mut perturbed);
        assert!(perturbed);
        assert!((value + 1e-13).abs() < 1e-26);
        assert_eq!(abs_value, 1e-13);
    }

    #[test]
    fn zero_pivot_perturbs_to_threshold() {
        let mut value = 0.0_f64;
        let mut abs_value = 0.0;
        let mut perturbed = false;
        perturb_pivot_if_needed(1e-13, &mut value, &mut abs_value, &mut perturbed);
        assert!(perturbed);
        assert_eq!(value, 1e-13);
    }

    #[test]
    fn permutation_vector_round_trip() {
        // apply_q scatters what permute_cols gathers.
        let perm = BlockPerm::<3> {
            p: [2, 0, 1],
            q: [1, 2, 0],
        };
        let v = SVector::<f64, 3>::new(10.0, 20.0, 30.0);
        let pv = perm.apply_p(&v);
        assert_eq!((pv[0], pv[1], pv[2]), (30.0, 10.0, 20.0));
        let qv = perm.apply_q(&v);
        // out[q[j]] = v[j]: out[1] = 10, out[2] = 20, out[0] = 30.
        assert_eq!((qv[0], qv[1], qv[2]), (30.0, 10.0, 20.0));
    }
}
