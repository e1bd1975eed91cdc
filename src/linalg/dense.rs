//! Dense Cholesky factorization backed by nalgebra
//!
//! The complex Hermitian matrix H = R + iI is factored through its real
//! symmetric embedding [[R, -I], [I, R]], the same way as the sparse backend.
//! A real Cholesky fails on the first non-positive pivot, which is how a
//! matrix that is not positive definite is detected.

use crate::error::{Error, Result};
use crate::linalg::HermitianFactor;
use crate::types::{ComplexArray, Complex64};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::Array2;

/// Cholesky factor L Lᵀ of the real embedding of a dense Hermitian matrix
#[derive(Debug, Clone)]
pub struct DenseCholesky {
    chol: Cholesky<f64, Dyn>,
    dim: usize,
}

impl DenseCholesky {
    /// Factor a square Hermitian matrix
    ///
    /// Returns `None` if the matrix is not positive definite (or not square).
    pub fn factor(a: &Array2<Complex64>) -> Option<Self> {
        let (rows, cols) = a.dim();
        if rows != cols {
            return None;
        }

        let n = rows;
        let embedding = DMatrix::from_fn(2 * n, 2 * n, |i, j| {
            let v = a[[i % n, j % n]];
            match (i < n, j < n) {
                (true, true) | (false, false) => v.re,
                (true, false) => -v.im,
                (false, true) => v.im,
            }
        });

        let chol = Cholesky::new(embedding)?;
        // A zero pivot passes the square root but leaves a singular factor
        if chol.l_dirty().diagonal().iter().any(|&d| !(d > 0.0 && d.is_finite())) {
            return None;
        }
        Some(Self { chol, dim: n })
    }
}

impl HermitianFactor for DenseCholesky {
    fn dim(&self) -> usize {
        self.dim
    }

    fn solve(&self, b: &ComplexArray) -> Result<ComplexArray> {
        let n = self.dim;
        if b.len() != n {
            return Err(Error::Shape(format!(
                "right-hand side has length {}, expected {}",
                b.len(),
                n
            )));
        }

        let rhs = DVector::from_fn(2 * n, |i, _| if i < n { b[i].re } else { b[i - n].im });
        let x = self.chol.solve(&rhs);
        Ok((0..n).map(|i| Complex64::new(x[i], x[i + n])).collect())
    }

    fn name(&self) -> &'static str {
        "dense-cholesky"
    }
}

/// Hermitian part (M + M†) / 2 of a dense matrix
pub fn hermitian_part(m: &Array2<Complex64>) -> Array2<Complex64> {
    let adjoint = m.t().mapv(|v| v.conj());
    (m + &adjoint).mapv(|v| v * 0.5)
}

/// Compute M† x
pub fn adjoint_dot(m: &Array2<Complex64>, x: &ComplexArray) -> ComplexArray {
    m.t().dot(&x.mapv(|v| v.conj())).mapv(|v| v.conj())
}

/// Whether M equals M† up to a relative tolerance of 1e-12
pub fn is_hermitian(m: &Array2<Complex64>) -> bool {
    let (rows, cols) = m.dim();
    if rows != cols {
        return false;
    }

    let scale = m.iter().map(|v| v.norm()).fold(0.0_f64, f64::max);
    let tol = 1e-12 * scale.max(f64::MIN_POSITIVE);
    (0..rows).all(|i| (i..cols).all(|j| (m[[i, j]] - m[[j, i]].conj()).norm() <= tol))
}

/// Compute A1 · diag(d) · A2
pub fn mul_diag_mul(
    a1: &Array2<Complex64>,
    d: &ComplexArray,
    a2: &Array2<Complex64>,
) -> Array2<Complex64> {
    let scaled = a1 * d;
    scaled.dot(a2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_dense_cholesky_solve() {
        let a = array![[c(4.0, 0.0), c(1.0, -1.0)], [c(1.0, 1.0), c(3.0, 0.0)]];
        let b = array![c(1.0, 2.0), c(-1.0, 0.5)];

        let factor = DenseCholesky::factor(&a).expect("matrix is positive definite");
        let x = factor.solve(&b).unwrap();
        let ax = a.dot(&x);

        assert_eq!(factor.dim(), 2);
        for i in 0..2 {
            assert_abs_diff_eq!(ax[i].re, b[i].re, epsilon = 1e-12);
            assert_abs_diff_eq!(ax[i].im, b[i].im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dense_cholesky_rejects_indefinite() {
        let a = array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(-1.0, 0.0)]];
        assert!(DenseCholesky::factor(&a).is_none());

        let negative = Array2::from_diag(&array![c(-6.3, 0.0), c(-6.3, 0.0), c(-6.3, 0.0)]);
        assert!(DenseCholesky::factor(&negative).is_none());

        // Complex off-diagonal coupling that makes a positive diagonal indefinite
        let coupled = array![[c(1.0, 0.0), c(0.0, 2.0)], [c(0.0, -2.0), c(1.0, 0.0)]];
        assert!(DenseCholesky::factor(&coupled).is_none());
    }

    #[test]
    fn test_dense_cholesky_rejects_singular() {
        let a = array![[c(1.0, 0.0), c(0.0, 1.0)], [c(0.0, -1.0), c(1.0, 0.0)]];
        assert!(DenseCholesky::factor(&a).is_none());
    }

    #[test]
    fn test_dense_cholesky_solve_shape_mismatch() {
        let factor = DenseCholesky::factor(&Array2::from_diag(&array![c(2.0, 0.0), c(3.0, 0.0)])).unwrap();
        assert!(matches!(factor.solve(&array![c(1.0, 0.0)]), Err(Error::Shape(_))));
    }

    #[test]
    fn test_adjoint_dot_and_hermitian_check() {
        let m = array![[c(1.0, 1.0), c(2.0, 0.0)], [c(0.0, 4.0), c(3.0, 0.0)]];
        let x = array![c(1.0, 0.0), c(0.0, 1.0)];

        let expected = m.t().mapv(|v| v.conj()).dot(&x);
        let got = adjoint_dot(&m, &x);
        assert_eq!(got, expected);

        assert!(!is_hermitian(&m));
        assert!(is_hermitian(&hermitian_part(&m)));
    }

    #[test]
    fn test_hermitian_part() {
        let m = array![[c(1.0, 1.0), c(2.0, 0.0)], [c(0.0, 4.0), c(3.0, 0.0)]];
        let h = hermitian_part(&m);

        assert_abs_diff_eq!(h[[0, 0]].im, 0.0, epsilon = 1e-15);
        assert_eq!(h[[0, 1]], h[[1, 0]].conj());
        assert_eq!(h[[0, 1]], c(1.0, -2.0));
    }

    #[test]
    fn test_mul_diag_mul_matches_explicit_product() {
        let a1 = array![[c(1.0, 0.0), c(0.0, 1.0)], [c(2.0, 0.0), c(1.0, -1.0)]];
        let a2 = array![[c(0.5, 0.0), c(1.0, 0.0)], [c(0.0, 0.0), c(2.0, 1.0)]];
        let d = array![c(2.0, 0.0), c(0.0, 3.0)];

        let diag = Array2::from_diag(&d);
        let expected = a1.dot(&diag).dot(&a2);
        let got = mul_diag_mul(&a1, &d, &a2);

        for (e, g) in expected.iter().zip(got.iter()) {
            assert_abs_diff_eq!(e.re, g.re, epsilon = 1e-14);
            assert_abs_diff_eq!(e.im, g.im, epsilon = 1e-14);
        }
    }
}
