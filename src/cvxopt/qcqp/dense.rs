//! Shared-projection QCQP with dense operators

use super::{DualSolution, GeneralConstraint, SharedProjQcqp};
use crate::error::{Error, Result};
use crate::linalg::dense::{adjoint_dot, hermitian_part, is_hermitian, mul_diag_mul};
use crate::linalg::DenseCholesky;
use crate::types::{check_len, ComplexArray, Complex64};
use ndarray::{Array1, Array2};

/// Shared-projection QCQP with A0, A1 and A2 stored as dense matrices
///
/// Suited to problems small enough that A(λ) can be assembled and Cholesky
/// factored densely.
#[derive(Debug, Clone)]
pub struct DenseSharedProjQcqp {
    a0: Array2<Complex64>,
    s0: ComplexArray,
    c0: f64,
    a1: Array2<Complex64>,
    /// `None` stands for the identity
    a2: Option<Array2<Complex64>>,
    s1: ComplexArray,
    pdiags: Array2<Complex64>,
    general: Vec<GeneralConstraint>,
    /// Dense Herm(B_k), cached for assembling A(λ)
    general_herm: Vec<Array2<Complex64>>,
    current: Option<DualSolution>,
}

impl DenseSharedProjQcqp {
    /// Create a new dense QCQP
    ///
    /// # Arguments
    /// * `a0` - Hermitian n×n objective matrix
    /// * `s0` - Linear objective term (length n)
    /// * `c0` - Constant objective term
    /// * `a1` - n×r left constraint operator
    /// * `a2` - r×n right constraint operator (`None` for the identity, r = n)
    /// * `s1` - Linear constraint term (length r)
    /// * `pdiags` - r×m projector diagonals, one per column
    pub fn new(
        a0: Array2<Complex64>,
        s0: ComplexArray,
        c0: f64,
        a1: Array2<Complex64>,
        a2: Option<Array2<Complex64>>,
        s1: ComplexArray,
        pdiags: Array2<Complex64>,
    ) -> Result<Self> {
        let n = s0.len();
        if a0.dim() != (n, n) {
            return Err(Error::Shape(format!(
                "A0 has shape {:?}, expected ({}, {})",
                a0.dim(),
                n,
                n
            )));
        }
        if !is_hermitian(&a0) {
            return Err(Error::InvalidInput("A0 must be Hermitian".to_string()));
        }

        let r = match &a2 {
            Some(a2) => {
                if a2.ncols() != n {
                    return Err(Error::Shape(format!(
                        "A2 has {} columns, expected {}",
                        a2.ncols(),
                        n
                    )));
                }
                a2.nrows()
            }
            None => n,
        };
        if a1.dim() != (n, r) {
            return Err(Error::Shape(format!(
                "A1 has shape {:?}, expected ({}, {})",
                a1.dim(),
                n,
                r
            )));
        }
        if s1.len() != r || pdiags.nrows() != r {
            return Err(Error::Shape(format!(
                "s1 has length {} and Pdiags has {} rows, expected {}",
                s1.len(),
                pdiags.nrows(),
                r
            )));
        }

        Ok(Self {
            a0,
            s0,
            c0,
            a1,
            a2,
            s1,
            pdiags,
            general: Vec::new(),
            general_herm: Vec::new(),
            current: None,
        })
    }

    /// Attach constraints outside the shared projector structure
    pub fn with_general_constraints(mut self, constraints: Vec<GeneralConstraint>) -> Result<Self> {
        let n = self.num_vars();
        for gc in &constraints {
            gc.validate(n)?;
        }
        self.general_herm = constraints
            .iter()
            .map(|gc| hermitian_part(&gc.b.to_dense()))
            .collect();
        self.general = constraints;
        self.current = None;
        Ok(self)
    }

    /// Assemble A(λ) densely
    pub fn total_a(&self, lags: &Array1<f64>) -> Result<Array2<Complex64>> {
        let q = self.proj_combination(lags)?;
        let shared = match &self.a2 {
            Some(a2) => mul_diag_mul(&self.a1, &q, a2),
            None => &self.a1 * &q,
        };

        let mut total = &self.a0 + &hermitian_part(&shared);
        let m = self.num_proj_constraints();
        for (k, herm) in self.general_herm.iter().enumerate() {
            let lam = lags[m + k];
            if lam != 0.0 {
                total.scaled_add(Complex64::new(lam, 0.0), herm);
            }
        }
        Ok(total)
    }
}

impl SharedProjQcqp for DenseSharedProjQcqp {
    type Factor = DenseCholesky;

    fn num_vars(&self) -> usize {
        self.s0.len()
    }

    fn pdiags(&self) -> &Array2<Complex64> {
        &self.pdiags
    }

    fn set_pdiags(&mut self, pdiags: Array2<Complex64>) -> Result<()> {
        if pdiags.nrows() != self.s1.len() {
            return Err(Error::Shape(format!(
                "Pdiags must have {} rows, got {}",
                self.s1.len(),
                pdiags.nrows()
            )));
        }
        self.pdiags = pdiags;
        self.current = None;
        Ok(())
    }

    fn general_constraints(&self) -> &[GeneralConstraint] {
        &self.general
    }

    fn s0(&self) -> &ComplexArray {
        &self.s0
    }

    fn s1(&self) -> &ComplexArray {
        &self.s1
    }

    fn c0(&self) -> f64 {
        self.c0
    }

    fn apply_a0(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s0.len(), "A0 input")?;
        Ok(self.a0.dot(x))
    }

    fn apply_a1(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s1.len(), "A1 input")?;
        Ok(self.a1.dot(x))
    }

    fn apply_a1_adjoint(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s0.len(), "A1 adjoint input")?;
        Ok(adjoint_dot(&self.a1, x))
    }

    fn apply_a2(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s0.len(), "A2 input")?;
        Ok(match &self.a2 {
            Some(a2) => a2.dot(x),
            None => x.clone(),
        })
    }

    fn apply_a2_adjoint(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s1.len(), "A2 adjoint input")?;
        Ok(match &self.a2 {
            Some(a2) => adjoint_dot(a2, x),
            None => x.clone(),
        })
    }

    fn factor_total_a(&self, lags: &Array1<f64>) -> Result<Option<DenseCholesky>> {
        self.check_lags(lags)?;
        Ok(DenseCholesky::factor(&self.total_a(lags)?))
    }

    fn current_solution(&self) -> Option<&DualSolution> {
        self.current.as_ref()
    }

    fn set_current_solution(&mut self, solution: Option<DualSolution>) {
        self.current = solution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_new_rejects_non_hermitian_a0() {
        let a0 = array![[c(1.0, 0.0), c(1.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]];
        let eye = Array2::from_diag(&array![c(1.0, 0.0), c(1.0, 0.0)]);
        let result = DenseSharedProjQcqp::new(
            a0,
            array![c(1.0, 0.0), c(0.0, 0.0)],
            0.0,
            eye.clone(),
            None,
            array![c(1.0, 0.0), c(1.0, 0.0)],
            Array2::ones((2, 1)),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_new_rejects_bad_pdiags() {
        let eye = Array2::from_diag(&array![c(1.0, 0.0), c(1.0, 0.0)]);
        let result = DenseSharedProjQcqp::new(
            eye.clone(),
            array![c(1.0, 0.0), c(0.0, 0.0)],
            0.0,
            eye,
            None,
            array![c(1.0, 0.0), c(1.0, 0.0)],
            Array2::ones((3, 1)),
        );
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn test_total_a_with_identity_a2() {
        let eye = Array2::from_diag(&array![c(1.0, 0.0), c(1.0, 0.0)]);
        let a1 = array![[c(2.0, 0.0), c(0.0, 1.0)], [c(0.0, 1.0), c(3.0, 0.0)]];
        let qcqp = DenseSharedProjQcqp::new(
            eye,
            array![c(1.0, 0.0), c(0.0, 0.0)],
            0.0,
            a1,
            None,
            array![c(1.0, 0.0), c(1.0, 0.0)],
            Array2::ones((2, 1)),
        )
        .unwrap();

        let total = qcqp.total_a(&array![1.0]).unwrap();
        // Herm(A1) drops the anti-Hermitian off-diagonal entries
        assert_eq!(total[[0, 0]], c(3.0, 0.0));
        assert_eq!(total[[1, 1]], c(4.0, 0.0));
        assert_eq!(total[[0, 1]], c(0.0, 0.0));
        assert!(qcqp.is_dual_feasible(&array![1.0]).unwrap());
    }
}
