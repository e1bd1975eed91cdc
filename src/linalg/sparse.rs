//! Sparse LDLᵀ factorization of Hermitian matrices
//!
//! sprs-ldl works on real symmetric matrices, so a Hermitian H = R + iI is
//! factored through its real embedding
//!
//! ```text
//! M = [ R  -I ]
//!     [ I   R ]
//! ```
//!
//! which is symmetric, and positive definite exactly when H is. A complex
//! system H x = b becomes M [Re x; Im x] = [Re b; Im b].

use crate::error::{Error, Result};
use crate::linalg::HermitianFactor;
use crate::types::{ComplexArray, Complex64, SparseDense};
use num_traits::Zero;
use sprs::errors::LinalgError;
use sprs::{CsMat, FillInReduction, SymmetryCheck, TriMat};
use sprs_ldl::{Ldl, LdlNumeric};
use std::collections::HashMap;

/// LDLᵀ factor of the real embedding of a sparse Hermitian matrix
pub struct SparseLdl {
    ldl: LdlNumeric<f64, usize>,
    dim: usize,
}

impl std::fmt::Debug for SparseLdl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SparseLdl(dim = {})", self.dim)
    }
}

impl SparseLdl {
    /// Factor a sparse Hermitian matrix
    ///
    /// Returns `Ok(None)` if the matrix is singular or not positive definite.
    pub fn factor(a: &CsMat<Complex64>) -> Result<Option<Self>> {
        let n = a.rows();
        if a.cols() != n {
            return Err(Error::Shape(format!(
                "cannot factor non-square {}x{} matrix",
                n,
                a.cols()
            )));
        }

        let embedding = real_embedding(a);
        let ldl = match Ldl::new()
            .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(embedding.view())
        {
            Ok(ldl) => ldl,
            Err(LinalgError::SingularMatrix(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // D > 0 for every pivot, otherwise H is indefinite
        if ldl.d().iter().any(|&di| !(di > 0.0)) {
            return Ok(None);
        }

        Ok(Some(Self { ldl, dim: n }))
    }
}

impl HermitianFactor for SparseLdl {
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

        let mut rhs = vec![0.0; 2 * n];
        for (i, v) in b.iter().enumerate() {
            rhs[i] = v.re;
            rhs[i + n] = v.im;
        }

        let sol = self.ldl.solve(rhs.as_slice());
        Ok((0..n).map(|i| Complex64::new(sol[i], sol[i + n])).collect())
    }

    fn name(&self) -> &'static str {
        "sparse-ldl"
    }
}

/// Build the real symmetric embedding of a Hermitian matrix (CSC)
pub fn real_embedding(h: &CsMat<Complex64>) -> CsMat<f64> {
    let n = h.rows();
    let mut tri = TriMat::with_capacity((2 * n, 2 * n), 4 * h.nnz());

    for (&v, (i, j)) in h.iter() {
        if v.re != 0.0 {
            tri.add_triplet(i, j, v.re);
            tri.add_triplet(i + n, j + n, v.re);
        }
        if v.im != 0.0 {
            tri.add_triplet(i, j + n, -v.im);
            tri.add_triplet(i + n, j, v.im);
        }
    }

    tri.to_csc()
}

/// Append `scale * m` to a triplet accumulator
pub fn push_scaled(tri: &mut TriMat<Complex64>, m: &CsMat<Complex64>, scale: Complex64) {
    for (&v, (i, j)) in m.iter() {
        tri.add_triplet(i, j, v * scale);
    }
}

/// Append `scale * Herm(m)` to a triplet accumulator
pub fn push_scaled_hermitian(tri: &mut TriMat<Complex64>, m: &SparseDense, scale: f64) {
    let half = 0.5 * scale;
    match m {
        SparseDense::Sparse(s) => push_scaled_hermitian_sparse(tri, s, scale),
        SparseDense::Dense(d) => {
            for ((i, j), &v) in d.indexed_iter() {
                if v.norm_sqr() > 0.0 {
                    tri.add_triplet(i, j, v * half);
                    tri.add_triplet(j, i, v.conj() * half);
                }
            }
        }
    }
}

/// Append `scale * Herm(m)` for a sparse `m`
pub fn push_scaled_hermitian_sparse(tri: &mut TriMat<Complex64>, m: &CsMat<Complex64>, scale: f64) {
    let half = 0.5 * scale;
    for (&v, (i, j)) in m.iter() {
        tri.add_triplet(i, j, v * half);
        tri.add_triplet(j, i, v.conj() * half);
    }
}

/// Hermitian part (M + M†) / 2 of a sparse matrix (CSC)
pub fn hermitian_part(m: &CsMat<Complex64>) -> CsMat<Complex64> {
    let mut tri = TriMat::with_capacity((m.rows(), m.cols()), 2 * m.nnz());
    push_scaled_hermitian_sparse(&mut tri, m, 1.0);
    tri.to_csc()
}

/// Compute A1 · diag(d) · A2 (CSC)
pub fn mul_diag_mul(a1: &CsMat<Complex64>, d: &ComplexArray, a2: &CsMat<Complex64>) -> CsMat<Complex64> {
    let mut a2_rows: Vec<Vec<(usize, Complex64)>> = vec![Vec::new(); a2.rows()];
    for (&v, (j, k)) in a2.iter() {
        a2_rows[j].push((k, v));
    }

    let mut tri = TriMat::new((a1.rows(), a2.cols()));
    for (&v, (i, j)) in a1.iter() {
        let vd = v * d[j];
        if vd.norm_sqr() == 0.0 {
            continue;
        }
        for &(k, w) in &a2_rows[j] {
            tri.add_triplet(i, k, vd * w);
        }
    }

    tri.to_csc()
}

/// Compute M x for a sparse matrix in any storage order
pub fn sparse_dot(m: &CsMat<Complex64>, x: &ComplexArray) -> ComplexArray {
    let mut out = ComplexArray::zeros(m.rows());
    for (&v, (i, j)) in m.iter() {
        out[i] += v * x[j];
    }
    out
}

/// Compute M† x for a sparse matrix in any storage order
pub fn sparse_adjoint_dot(m: &CsMat<Complex64>, x: &ComplexArray) -> ComplexArray {
    let mut out = ComplexArray::zeros(m.cols());
    for (&v, (i, j)) in m.iter() {
        out[j] += v.conj() * x[i];
    }
    out
}

/// Whether M equals M† up to a relative tolerance of 1e-12
pub fn is_hermitian(m: &CsMat<Complex64>) -> bool {
    if m.rows() != m.cols() {
        return false;
    }

    let mut entries: HashMap<(usize, usize), Complex64> = HashMap::with_capacity(m.nnz());
    for (&v, (i, j)) in m.iter() {
        *entries.entry((i, j)).or_insert_with(Complex64::zero) += v;
    }

    let scale = entries.values().map(|v| v.norm()).fold(0.0_f64, f64::max);
    let tol = 1e-12 * scale.max(f64::MIN_POSITIVE);
    entries.iter().all(|(&(i, j), &v)| {
        let mirror = entries.get(&(j, i)).copied().unwrap_or_else(Complex64::zero);
        (v - mirror.conj()).norm() <= tol
    })
}

/// Sparse identity matrix (CSC)
pub fn identity(n: usize) -> CsMat<Complex64> {
    CsMat::eye_csc(n)
}
