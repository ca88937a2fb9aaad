//! Symmetric vs asymmetric (three-phase) calculation axis.
//!
//! A power-flow calculation is either *symmetric* - the grid is balanced
//! and one single-phase equivalent suffices, so voltages are complex
//! scalars and Jacobian entries are real 2x2 blocks - or *asymmetric* -
//! all three phases are carried, voltages are per-phase complex triples,
//! admittances are 3x3 phase tensors, and Jacobian entries are real 6x6
//! blocks.
//!
//! [`Symmetry`] abstracts that choice so the assembler and driver exist
//! once. The associated Jacobian types plug straight into the sparse
//! solver via [`SparseLuEntry`].
//!
//! # Jacobian block layout
//!
//! Per bus pair, the four power derivatives are packed in quadrants:
//!
//! ```text
//! [ H = dP/dtheta   N = V * dP/dV ]
//! [ M = dQ/dtheta   L = V * dQ/dV ]
//! ```
//!
//! Mismatch and state vectors share one layout: `[P; Q]` for power and
//! `[theta; V]` for the polar state occupy the same slots, which is what
//! lets the solver overwrite the mismatch with the update in place.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use nalgebra::{Matrix2, Matrix3, Matrix6, Vector2, Vector3, Vector6};
use num_complex::Complex64;

use crate::entry::SparseLuEntry;

/// The symmetric/asymmetric calculation axis.
pub trait Symmetry: Copy + std::fmt::Debug + Send + Sync + 'static {
    /// Per-bus complex voltage or current: scalar, or one value per phase.
    type ComplexValue: Copy + AddAssign + std::fmt::Debug + Send + Sync + 'static;

    /// Per-bus-pair admittance: complex scalar or 3x3 phase tensor.
    type ComplexTensor: SparseLuEntry<Vector = Self::ComplexValue>
        + AddAssign
        + Neg<Output = Self::ComplexTensor>;

    /// Per-bus real quantity (power, magnitude, angle): scalar or one value
    /// per phase.
    type RealValue: Copy
        + Add<Output = Self::RealValue>
        + Sub<Output = Self::RealValue>
        + Neg<Output = Self::RealValue>
        + Mul<f64, Output = Self::RealValue>
        + std::fmt::Debug
        + Send
        + Sync
        + 'static;

    /// Real Jacobian block in `[[H, N], [M, L]]` quadrant layout.
    type JacBlock: SparseLuEntry<Vector = Self::JacVector> + AddAssign;

    /// Mismatch / polar-state vector: `[P; Q]` alias `[theta; V]`.
    type JacVector: Copy + std::fmt::Debug + Send + Sync + 'static;

    const N_PHASE: usize;

    // Complex helpers.

    fn magnitude(u: &Self::ComplexValue) -> Self::RealValue;
    fn angle(u: &Self::ComplexValue) -> Self::RealValue;
    fn from_polar(v: &Self::RealValue, theta: &Self::RealValue) -> Self::ComplexValue;
    /// Largest elementwise `|a - b|`.
    fn max_abs_diff(a: &Self::ComplexValue, b: &Self::ComplexValue) -> f64;
    fn real(s: &Self::ComplexValue) -> Self::RealValue;
    fn imag(s: &Self::ComplexValue) -> Self::RealValue;
    /// `-conj(v)`, elementwise.
    fn neg_conj(v: &Self::ComplexValue) -> Self::ComplexValue;
    /// Diagonal tensor from per-phase values.
    fn diag_tensor(d: &Self::ComplexValue) -> Self::ComplexTensor;
    /// `y * u`.
    fn mul_tensor_value(y: &Self::ComplexTensor, u: &Self::ComplexValue) -> Self::ComplexValue;

    // Real elementwise helpers.

    fn real_mul(a: &Self::RealValue, b: &Self::RealValue) -> Self::RealValue;

    // Jacobian block helpers.

    /// The incomplete Jacobian block of a bus pair:
    /// `S = (u_i (x) conj(u_j)) .* conj(y)`, `H = L = Im(S)`,
    /// `N = -M = Re(S)`.
    fn hnml(
        y: &Self::ComplexTensor,
        ui: &Self::ComplexValue,
        uj: &Self::ComplexValue,
    ) -> Self::JacBlock;

    fn row_sum_h(b: &Self::JacBlock) -> Self::RealValue;
    fn row_sum_n(b: &Self::JacBlock) -> Self::RealValue;
    fn add_diag_h(b: &mut Self::JacBlock, v: &Self::RealValue);
    fn add_diag_n(b: &mut Self::JacBlock, v: &Self::RealValue);
    fn add_diag_m(b: &mut Self::JacBlock, v: &Self::RealValue);
    fn add_diag_l(b: &mut Self::JacBlock, v: &Self::RealValue);

    // Mismatch / polar accessors. Power and polar views share slots.

    fn compose(top: &Self::RealValue, bottom: &Self::RealValue) -> Self::JacVector;
    fn p_of(x: &Self::JacVector) -> Self::RealValue;
    fn q_of(x: &Self::JacVector) -> Self::RealValue;
    fn add_p(x: &mut Self::JacVector, d: &Self::RealValue);
    fn add_q(x: &mut Self::JacVector, d: &Self::RealValue);

    fn theta_of(x: &Self::JacVector) -> Self::RealValue {
        Self::p_of(x)
    }

    fn v_of(x: &Self::JacVector) -> Self::RealValue {
        Self::q_of(x)
    }

    fn add_theta(x: &mut Self::JacVector, d: &Self::RealValue) {
        Self::add_p(x, d)
    }

    fn add_v(x: &mut Self::JacVector, d: &Self::RealValue) {
        Self::add_q(x, d)
    }
}

/// Balanced, single-phase equivalent calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symmetric;

/// Unbalanced three-phase calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asymmetric;

impl Symmetry for Symmetric {
    type ComplexValue = Complex64;
    type ComplexTensor = Complex64;
    type RealValue = f64;
    type JacBlock = Matrix2<f64>;
    type JacVector = Vector2<f64>;

    const N_PHASE: usize = 1;

    fn magnitude(u: &Complex64) -> f64 {
        u.norm()
    }

    fn angle(u: &Complex64) -> f64 {
        u.arg()
    }

    fn from_polar(v: &f64, theta: &f64) -> Complex64 {
        Complex64::from_polar(*v, *theta)
    }

    fn max_abs_diff(a: &Complex64, b: &Complex64) -> f64 {
        (a - b).norm()
    }

    fn real(s: &Complex64) -> f64 {
        s.re
    }

    fn imag(s: &Complex64) -> f64 {
        s.im
    }

    fn neg_conj(v: &Complex64) -> Complex64 {
        -v.conj()
    }

    fn diag_tensor(d: &Complex64) -> Complex64 {
        *d
    }

    fn mul_tensor_value(y: &Complex64, u: &Complex64) -> Complex64 {
        y * u
    }

    fn real_mul(a: &f64, b: &f64) -> f64 {
        a * b
    }

    fn hnml(y: &Complex64, ui: &Complex64, uj: &Complex64) -> Matrix2<f64> {
        let s = ui * uj.conj() * y.conj();
        Matrix2::new(s.im, s.re, -s.re, s.im)
    }

    fn row_sum_h(b: &Matrix2<f64>) -> f64 {
        b[(0, 0)]
    }

    fn row_sum_n(b: &Matrix2<f64>) -> f64 {
        b[(0, 1)]
    }

    fn add_diag_h(b: &mut Matrix2<f64>, v: &f64) {
        b[(0, 0)] += v;
    }

    fn add_diag_n(b: &mut Matrix2<f64>, v: &f64) {
        b[(0, 1)] += v;
    }

    fn add_diag_m(b: &mut Matrix2<f64>, v: &f64) {
        b[(1, 0)] += v;
    }

    fn add_diag_l(b: &mut Matrix2<f64>, v: &f64) {
        b[(1, 1)] += v;
    }

    fn compose(top: &f64, bottom: &f64) -> Vector2<f64> {
        Vector2::new(*top, *bottom)
    }

    fn p_of(x: &Vector2<f64>) -> f64 {
        x[0]
    }

    fn q_of(x: &Vector2<f64>) -> f64 {
        x[1]
    }

    fn add_p(x: &mut Vector2<f64>, d: &f64) {
        x[0] += d;
    }

    fn add_q(x: &mut Vector2<f64>, d: &f64) {
        x[1] += d;
    }
}

impl Symmetry for Asymmetric {
    type ComplexValue = Vector3<Complex64>;
    type ComplexTensor = Matrix3<Complex64>;
    type RealValue = Vector3<f64>;
    type JacBlock = Matrix6<f64>;
    type JacVector = Vector6<f64>;

    const N_PHASE: usize = 3;

    fn magnitude(u: &Vector3<Complex64>) -> Vector3<f64> {
        u.map(|p| p.norm())
    }

    fn angle(u: &Vector3<Complex64>) -> Vector3<f64> {
        u.map(|p| p.arg())
    }

    fn from_polar(v: &Vector3<f64>, theta: &Vector3<f64>) -> Vector3<Complex64> {
        Vector3::from_fn(|i, _| Complex64::from_polar(v[i], theta[i]))
    }

    fn max_abs_diff(a: &Vector3<Complex64>, b: &Vector3<Complex64>) -> f64 {
        let mut max = 0.0_f64;
        for i in 0..3 {
            max = max.max((a[i] - b[i]).norm());
        }
        max
    }

    fn real(s: &Vector3<Complex64>) -> Vector3<f64> {
        s.map(|p| p.re)
    }

    fn imag(s: &Vector3<Complex64>) -> Vector3<f64> {
        s.map(|p| p.im)
    }

    fn neg_conj(v: &Vector3<Complex64>) -> Vector3<Complex64> {
        v.map(|p| -p.conj())
    }

    fn diag_tensor(d: &Vector3<Complex64>) -> Matrix3<Complex64> {
        Matrix3::from_diagonal(d)
    }

    fn mul_tensor_value(y: &Matrix3<Complex64>, u: &Vector3<Complex64>) -> Vector3<Complex64> {
        y * u
    }

    fn real_mul(a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
        a.component_mul(b)
    }

    fn hnml(
        y: &Matrix3<Complex64>,
        ui: &Vector3<Complex64>,
        uj: &Vector3<Complex64>,
    ) -> Matrix6<f64> {
        let mut block = Matrix6::zeros();
        for r in 0..3 {
            for c in 0..3 {
                let s = ui[r] * uj[c].conj() * y[(r, c)].conj();
                block[(r, c)] = s.im;
                block[(r, c + 3)] = s.re;
                block[(r + 3, c)] = -s.re;
                block[(r + 3, c + 3)] = s.im;
            }
        }
        block
    }

    fn row_sum_h(b: &Matrix6<f64>) -> Vector3<f64> {
        Vector3::from_fn(|r, _| b[(r, 0)] + b[(r, 1)] + b[(r, 2)])
    }

    fn row_sum_n(b: &Matrix6<f64>) -> Vector3<f64> {
        Vector3::from_fn(|r, _| b[(r, 3)] + b[(r, 4)] + b[(r, 5)])
    }

    fn add_diag_h(b: &mut Matrix6<f64>, v: &Vector3<f64>) {
        for p in 0..3 {
            b[(p, p)] += v[p];
        }
    }

    fn add_diag_n(b: &mut Matrix6<f64>, v: &Vector3<f64>) {
        for p in 0..3 {
            b[(p, p + 3)] += v[p];
        }
    }

    fn add_diag_m(b: &mut Matrix6<f64>, v: &Vector3<f64>) {
        for p in 0..3 {
            b[(p + 3, p)] += v[p];
        }
    }

    fn add_diag_l(b: &mut Matrix6<f64>, v: &Vector3<f64>) {
        for p in 0..3 {
            b[(p + 3, p + 3)] += v[p];
        }
    }

    fn compose(top: &Vector3<f64>, bottom: &Vector3<f64>) -> Vector6<f64> {
        Vector6::new(top[0], top[1], top[2], bottom[0], bottom[1], bottom[2])
    }

    fn p_of(x: &Vector6<f64>) -> Vector3<f64> {
        Vector3::new(x[0], x[1], x[2])
    }

    fn q_of(x: &Vector6<f64>) -> Vector3<f64> {
        Vector3::new(x[3], x[4], x[5])
    }

    fn add_p(x: &mut Vector6<f64>, d: &Vector3<f64>) {
        for p in 0..3 {
            x[p] += d[p];
        }
    }

    fn add_q(x: &mut Vector6<f64>, d: &Vector3<f64>) {
        for p in 0..3 {
            x[p + 3] += d[p];
        }
    }
}
