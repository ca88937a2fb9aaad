//! Scalar field abstraction.
//!
//! Every numeric kernel in gridflow is written once over a scalar field that
//! is either a real double (`f64`) or a complex double
//! ([`Complex64`](num_complex::Complex64)). The field operations come from
//! [`nalgebra::ComplexField`]; this trait only pins the real field to `f64`
//! and adds the pivot-oriented helpers the solvers need.

use nalgebra::ComplexField;
use num_complex::Complex64;

/// A matrix element scalar: real or complex double.
pub trait LuScalar: ComplexField<RealField = f64> + Copy + Send + Sync {
    /// Magnitude of the value (absolute value / complex modulus).
    fn magnitude(self) -> f64 {
        self.modulus()
    }

    /// Whether the value is finite and nonzero, i.e. usable as a divisor.
    fn is_invertible(self) -> bool {
        let m = self.modulus();
        m != 0.0 && m.is_finite()
    }
}

impl LuScalar for f64 {}
impl LuScalar for Complex64 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_matches_modulus() {
        assert_eq!((-3.0f64).magnitude(), 3.0);
        let z = Complex64::new(3.0, 4.0);
        assert!((z.magnitude() - 5.0).abs() < 1e-15);
    }

    #[test]
    fn invertibility() {
        assert!(2.0f64.is_invertible());
        assert!(!0.0f64.is_invertible());
        assert!(!f64::NAN.is_invertible());
        assert!(!f64::INFINITY.is_invertible());
        assert!(Complex64::new(0.0, 1e-300).is_invertible());
        assert!(!Complex64::new(0.0, 0.0).is_invertible());
    }
}
