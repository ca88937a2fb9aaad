//! Matrix entry polymorphism for the sparse solver.
//!
//! A sparse matrix entry is either a plain scalar (`f64`, `Complex64`) or a
//! small dense block (`SMatrix<S, K, K>`). The sparse factorization is
//! written once against this trait; every step that only exists for blocks
//! (pivot permutations, intra-block triangular solves) is a no-op in the
//! scalar impls, so the scalar case pays nothing for the abstraction and
//! there is no per-entry runtime dispatch.
//!
//! Associated types:
//! - [`Vector`](SparseLuEntry::Vector) - the right-hand-side / solution
//!   entry matching this matrix entry (`S` or `SVector<S, K>`),
//! - [`Real`](SparseLuEntry::Real) - its elementwise-magnitude counterpart,
//!   used by the backward-error estimate of iterative refinement,
//! - [`Perm`](SparseLuEntry::Perm) - the per-pivot permutation record
//!   (`()` for scalars, [`BlockPerm`] for blocks).

use gridflow_core::LuScalar;
use nalgebra::{SMatrix, SVector};
use num_complex::Complex64;

use crate::dense_lu::{self, BlockPerm};
use crate::error::Result;

/// A sparse matrix entry: scalar or dense block.
pub trait SparseLuEntry: Copy + std::fmt::Debug + Send + Sync + 'static {
    const IS_BLOCK: bool;
    const BLOCK_SIZE: usize;

    type Scalar: LuScalar;
    type Vector: Copy + std::ops::AddAssign + std::fmt::Debug + Send + Sync + 'static;
    type Real: Copy + std::fmt::Debug + Send + Sync + 'static;
    type Perm: Clone + Default + std::fmt::Debug + Send + Sync + 'static;

    fn zero() -> Self;
    fn vector_zero() -> Self::Vector;

    /// Factorize this entry as a diagonal pivot, recording permutations and
    /// latching the perturbation flag. Fails on an unusable pivot.
    fn factorize_pivot(
        &mut self,
        perm: &mut Self::Perm,
        perturb_threshold: f64,
        use_pivot_perturbation: bool,
        has_pivot_perturbation: &mut bool,
    ) -> Result<()>;

    /// `self = P * self` (no-op for scalars).
    fn permute_rows(&mut self, perm: &Self::Perm);

    /// `self = self * Q` (no-op for scalars).
    fn permute_cols(&mut self, perm: &Self::Perm);

    /// `self = L_pivot^-1 * self`, using the unit-lower part of the pivot
    /// (no-op for scalars).
    fn solve_unit_lower_from_left(&mut self, pivot: &Self);

    /// `self = self * U_pivot^-1`, using the upper part of the pivot. For
    /// scalars this is the plain division by the pivot.
    fn solve_upper_from_right(&mut self, pivot: &Self);

    /// `self -= l * u`.
    fn mul_sub(&mut self, l: &Self, u: &Self);

    /// `P * v` (identity for scalars).
    fn apply_p(perm: &Self::Perm, v: Self::Vector) -> Self::Vector;

    /// `Q * v` (identity for scalars).
    fn apply_q(perm: &Self::Perm, v: Self::Vector) -> Self::Vector;

    /// `x -= a * y`.
    fn vector_mul_sub(x: &mut Self::Vector, a: &Self, y: &Self::Vector);

    /// Solve `L_pivot * x = x` in place within the block (no-op for
    /// scalars).
    fn vector_solve_unit_lower(pivot: &Self, x: &mut Self::Vector);

    /// Solve `U_pivot * x = x` in place within the block. For scalars this
    /// is the plain division by the pivot.
    fn vector_solve_upper(pivot: &Self, x: &mut Self::Vector);

    /// Infinity norm of the entry: max over rows of the sum of magnitudes.
    fn inf_norm(&self) -> f64;

    /// `acc += |self| * |x|`, elementwise magnitudes.
    fn abs_mul_abs_acc(&self, x: &Self::Vector, acc: &mut Self::Real);

    /// Elementwise magnitude of a vector entry.
    fn vector_abs(v: &Self::Vector) -> Self::Real;

    /// Largest element of a real entry.
    fn real_max(r: &Self::Real) -> f64;

    /// Raise every element of `r` to at least `floor`.
    fn real_clamp_floor(r: &mut Self::Real, floor: f64);

    /// Largest elementwise quotient `numerator / denominator`.
    fn real_div_max(numerator: &Self::Real, denominator: &Self::Real) -> f64;
}

macro_rules! impl_scalar_entry {
    ($scalar:ty) => {
        impl SparseLuEntry for $scalar {
            const IS_BLOCK: bool = false;
            const BLOCK_SIZE: usize = 1;

            type Scalar = $scalar;
            type Vector = $scalar;
            type Real = f64;
            type Perm = ();

            fn zero() -> Self {
                nalgebra::zero()
            }

            fn vector_zero() -> Self::Vector {
                nalgebra::zero()
            }

            fn factorize_pivot(
                &mut self,
                _perm: &mut Self::Perm,
                perturb_threshold: f64,
                use_pivot_perturbation: bool,
                has_pivot_perturbation: &mut bool,
            ) -> Result<()> {
                if use_pivot_perturbation {
                    let mut abs_pivot = self.magnitude();
                    dense_lu::perturb_pivot_if_needed(
                        perturb_threshold,
                        self,
                        &mut abs_pivot,
                        has_pivot_perturbation,
                    );
                }
                if !self.is_invertible() {
                    return Err(crate::error::Error::SingularMatrix);
                }
                Ok(())
            }

            fn permute_rows(&mut self, _perm: &Self::Perm) {}

            fn permute_cols(&mut self, _perm: &Self::Perm) {}

            fn solve_unit_lower_from_left(&mut self, _pivot: &Self) {}

            fn solve_upper_from_right(&mut self, pivot: &Self) {
                *self /= *pivot;
            }

            fn mul_sub(&mut self, l: &Self, u: &Self) {
                *self -= *l * *u;
            }

            fn apply_p(_perm: &Self::Perm, v: Self::Vector) -> Self::Vector {
                v
            }

            fn apply_q(_perm: &Self::Perm, v: Self::Vector) -> Self::Vector {
                v
            }

            fn vector_mul_sub(x: &mut Self::Vector, a: &Self, y: &Self::Vector) {
                *x -= *a * *y;
            }

            fn vector_solve_unit_lower(_pivot: &Self, _x: &mut Self::Vector) {}

            fn vector_solve_upper(pivot: &Self, x: &mut Self::Vector) {
                *x /= *pivot;
            }

            fn inf_norm(&self) -> f64 {
                self.magnitude()
            }

            fn abs_mul_abs_acc(&self, x: &Self::Vector, acc: &mut Self::Real) {
                *acc += self.magnitude() * x.magnitude();
            }

            fn vector_abs(v: &Self::Vector) -> Self::Real {
                v.magnitude()
            }

            fn real_max(r: &Self::Real) -> f64 {
                *r
            }

            fn real_clamp_floor(r: &mut Self::Real, floor: f64) {
                *r = r.max(floor);
            }

            fn real_div_max(numerator: &Self::Real, denominator: &Self::Real) -> f64 {
                numerator / denominator
            }
        }
    };
}

impl_scalar_entry!(f64);
impl_scalar_entry!(Complex64);

impl<S: LuScalar, const K: usize> SparseLuEntry for SMatrix<S, K, K> {
    const IS_BLOCK: bool = true;
    const BLOCK_SIZE: usize = K;

    type Scalar = S;
    type Vector = SVector<S, K>;
    type Real = SVector<f64, K>;
    type Perm = BlockPerm<K>;

    fn zero() -> Self {
        SMatrix::zeros()
    }

    fn vector_zero() -> Self::Vector {
        SVector::zeros()
    }

    fn factorize_pivot(
        &mut self,
        perm: &mut Self::Perm,
        perturb_threshold: f64,
        use_pivot_perturbation: bool,
        has_pivot_perturbation: &mut bool,
    ) -> Result<()> {
        dense_lu::factorize_block_in_place(
            self,
            perm,
            perturb_threshold,
            use_pivot_perturbation,
            has_pivot_perturbation,
        )
    }

    fn permute_rows(&mut self, perm: &Self::Perm) {
        *self = perm.permute_rows(self);
    }

    fn permute_cols(&mut self, perm: &Self::Perm) {
        *self = perm.permute_cols(self);
    }

    fn solve_unit_lower_from_left(&mut self, pivot: &Self) {
        for br in 1..K {
            for bc in 0..br {
                let l = pivot[(br, bc)];
                for c in 0..K {
                    let t = self[(bc, c)];
                    self[(br, c)] -= l * t;
                }
            }
        }
    }

    fn solve_upper_from_right(&mut self, pivot: &Self) {
        for bc in 0..K {
            for br in 0..bc {
                let u = pivot[(br, bc)];
                for r in 0..K {
                    let t = self[(r, br)];
                    self[(r, bc)] -= t * u;
                }
            }
            let inv = S::one() / pivot[(bc, bc)];
            for r in 0..K {
                self[(r, bc)] *= inv;
            }
        }
    }

    fn mul_sub(&mut self, l: &Self, u: &Self) {
        *self -= l * u;
    }

    fn apply_p(perm: &Self::Perm, v: Self::Vector) -> Self::Vector {
        perm.apply_p(&v)
    }

    fn apply_q(perm: &Self::Perm, v: Self::Vector) -> Self::Vector {
        perm.apply_q(&v)
    }

    fn vector_mul_sub(x: &mut Self::Vector, a: &Self, y: &Self::Vector) {
        *x -= a * y;
    }

    fn vector_solve_unit_lower(pivot: &Self, x: &mut Self::Vector) {
        for br in 1..K {
            for bc in 0..br {
                let t = x[bc];
                x[br] -= pivot[(br, bc)] * t;
            }
        }
    }

    fn vector_solve_upper(pivot: &Self, x: &mut Self::Vector) {
        for br in (0..K).rev() {
            for bc in br + 1..K {
                let t = x[bc];
                x[br] -= pivot[(br, bc)] * t;
            }
            x[br] /= pivot[(br, br)];
        }
    }

    fn inf_norm(&self) -> f64 {
        let mut norm = 0.0_f64;
        for r in 0..K {
            let mut row_sum = 0.0;
            for c in 0..K {
                row_sum += self[(r, c)].magnitude();
            }
            norm = norm.max(row_sum);
        }
        norm
    }

    fn abs_mul_abs_acc(&self, x: &Self::Vector, acc: &mut Self::Real) {
        for r in 0..K {
            for c in 0..K {
                acc[r] += self[(r, c)].magnitude() * x[c].magnitude();
            }
        }
    }

    fn vector_abs(v: &Self::Vector) -> Self::Real {
        v.map(|s| s.magnitude())
    }

    fn real_max(r: &Self::Real) -> f64 {
        r.iter().copied().fold(0.0, f64::max)
    }

    fn real_clamp_floor(r: &mut Self::Real, floor: f64) {
        for i in 0..K {
            r[i] = r[i].max(floor);
        }
    }

    fn real_div_max(numerator: &Self::Real, denominator: &Self::Real) -> f64 {
        let mut max = 0.0_f64;
        for i in 0..K {
            max = max.max(numerator[i] / denominator[i]);
        }
        max
    }
}
