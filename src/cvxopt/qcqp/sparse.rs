//! Shared-projection QCQP with sparse operators
//!
//! A(λ) is assembled in triplet form and factored with a sparse LDLᵀ of its
//! real embedding, so memory scales with the number of non-zeros rather than
//! n². This is the storage of choice for Maxwell operators discretized on a
//! grid.

use super::{DualSolution, GeneralConstraint, SharedProjQcqp};
use crate::error::{Error, Result};
use crate::linalg::sparse::{
    identity, is_hermitian, mul_diag_mul, push_scaled, push_scaled_hermitian,
    push_scaled_hermitian_sparse, sparse_adjoint_dot, sparse_dot,
};
use crate::linalg::SparseLdl;
use crate::types::{check_len, ComplexArray, Complex64};
use log::debug;
use ndarray::{Array1, Array2};
use sprs::{CsMat, TriMat};

/// Shared-projection QCQP with A0, A1 and A2 stored as sparse matrices
#[derive(Debug, Clone)]
pub struct SparseSharedProjQcqp {
    a0: CsMat<Complex64>,
    s0: ComplexArray,
    c0: f64,
    a1: CsMat<Complex64>,
    /// Identity when not given
    a2: CsMat<Complex64>,
    s1: ComplexArray,
    pdiags: Array2<Complex64>,
    general: Vec<GeneralConstraint>,
    current: Option<DualSolution>,
}

impl SparseSharedProjQcqp {
    /// Create a new sparse QCQP
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
        a0: CsMat<Complex64>,
        s0: ComplexArray,
        c0: f64,
        a1: CsMat<Complex64>,
        a2: Option<CsMat<Complex64>>,
        s1: ComplexArray,
        pdiags: Array2<Complex64>,
    ) -> Result<Self> {
        let n = s0.len();
        if a0.shape() != (n, n) {
            return Err(Error::Shape(format!(
                "A0 has shape {:?}, expected ({}, {})",
                a0.shape(),
                n,
                n
            )));
        }
        if !is_hermitian(&a0) {
            return Err(Error::InvalidInput("A0 must be Hermitian".to_string()));
        }

        let a2 = a2.unwrap_or_else(|| identity(n));
        if a2.cols() != n {
            return Err(Error::Shape(format!(
                "A2 has {} columns, expected {}",
                a2.cols(),
                n
            )));
        }
        let r = a2.rows();
        if a1.shape() != (n, r) {
            return Err(Error::Shape(format!(
                "A1 has shape {:?}, expected ({}, {})",
                a1.shape(),
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

        debug!(
            "sparse QCQP: n = {}, r = {}, nnz(A0) = {}, nnz(A1) = {}, nnz(A2) = {}",
            n,
            r,
            a0.nnz(),
            a1.nnz(),
            a2.nnz()
        );

        Ok(Self {
            a0,
            s0,
            c0,
            a1,
            a2,
            s1,
            pdiags,
            general: Vec::new(),
            current: None,
        })
    }

    /// Attach constraints outside the shared projector structure
    pub fn with_general_constraints(mut self, constraints: Vec<GeneralConstraint>) -> Result<Self> {
        let n = self.num_vars();
        for gc in &constraints {
            gc.validate(n)?;
        }
        self.general = constraints;
        self.current = None;
        Ok(self)
    }

    /// Assemble A(λ) in compressed sparse column form
    pub fn total_a(&self, lags: &Array1<f64>) -> Result<CsMat<Complex64>> {
        let n = self.num_vars();
        let q = self.proj_combination(lags)?;
        let shared = mul_diag_mul(&self.a1, &q, &self.a2);

        let mut tri = TriMat::with_capacity((n, n), self.a0.nnz() + 2 * shared.nnz());
        push_scaled(&mut tri, &self.a0, Complex64::new(1.0, 0.0));
        push_scaled_hermitian_sparse(&mut tri, &shared, 1.0);

        let m = self.num_proj_constraints();
        for (k, gc) in self.general.iter().enumerate() {
            let lam = lags[m + k];
            if lam != 0.0 {
                push_scaled_hermitian(&mut tri, &gc.b, lam);
            }
        }
        Ok(tri.to_csc())
    }
}

impl SharedProjQcqp for SparseSharedProjQcqp {
    type Factor = SparseLdl;

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
        Ok(sparse_dot(&self.a0, x))
    }

    fn apply_a1(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s1.len(), "A1 input")?;
        Ok(sparse_dot(&self.a1, x))
    }

    fn apply_a1_adjoint(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s0.len(), "A1 adjoint input")?;
        Ok(sparse_adjoint_dot(&self.a1, x))
    }

    fn apply_a2(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s0.len(), "A2 input")?;
        Ok(sparse_dot(&self.a2, x))
    }

    fn apply_a2_adjoint(&self, x: &ComplexArray) -> Result<ComplexArray> {
        check_len(x, self.s1.len(), "A2 adjoint input")?;
        Ok(sparse_adjoint_dot(&self.a2, x))
    }

    fn factor_total_a(&self, lags: &Array1<f64>) -> Result<Option<SparseLdl>> {
        self.check_lags(lags)?;
        SparseLdl::factor(&self.total_a(lags)?)
    }

    fn current_solution(&self) -> Option<&DualSolution> {
        self.current.as_ref()
    }

    fn set_current_solution(&mut self, solution: Option<DualSolution>) {
        self.current = solution;
    }
}
