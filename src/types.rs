//! Typing for dolphindes
//!
//! Semantic names for the array kinds that flow through the solvers. Grids are
//! N-dimensional (they usually mirror a simulation domain), while the solvers
//! work on flattened vectors.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayD};
use num_complex::Complex;
use num_traits::Zero;
use sprs::CsMat;

/// Type alias for Complex64
pub type Complex64 = Complex<f64>;

/// N-dimensional grid of complex values
pub type ComplexGrid = ArrayD<Complex64>;

/// Complex values in flattened (vector) form
pub type ComplexArray = Array1<Complex64>;

/// N-dimensional boolean mask, e.g. a design region
pub type BoolGrid = ArrayD<bool>;

/// A complex operator stored either densely or as a sparse matrix
#[derive(Debug, Clone)]
pub enum SparseDense {
    /// Dense row-major matrix
    Dense(Array2<Complex64>),
    /// Compressed sparse matrix (CSR or CSC)
    Sparse(CsMat<Complex64>),
}

impl SparseDense {
    /// Get the shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            SparseDense::Dense(m) => m.dim(),
            SparseDense::Sparse(m) => (m.rows(), m.cols()),
        }
    }

    /// Whether the operator is stored sparsely
    pub fn is_sparse(&self) -> bool {
        matches!(self, SparseDense::Sparse(_))
    }

    /// Compute M x
    pub fn dot(&self, x: &ComplexArray) -> Result<ComplexArray> {
        let (rows, cols) = self.shape();
        if x.len() != cols {
            return Err(Error::Shape(format!(
                "operator with {} columns applied to vector of length {}",
                cols,
                x.len()
            )));
        }

        match self {
            SparseDense::Dense(m) => Ok(m.dot(x)),
            SparseDense::Sparse(m) => {
                let mut out = ComplexArray::zeros(rows);
                for (&v, (i, j)) in m.iter() {
                    out[i] += v * x[j];
                }
                Ok(out)
            }
        }
    }

    /// Compute M† x
    pub fn adjoint_dot(&self, x: &ComplexArray) -> Result<ComplexArray> {
        let (rows, cols) = self.shape();
        if x.len() != rows {
            return Err(Error::Shape(format!(
                "adjoint of operator with {} rows applied to vector of length {}",
                rows,
                x.len()
            )));
        }

        match self {
            SparseDense::Dense(m) => {
                let mut out = ComplexArray::zeros(cols);
                for ((i, j), &v) in m.indexed_iter() {
                    out[j] += v.conj() * x[i];
                }
                Ok(out)
            }
            SparseDense::Sparse(m) => {
                let mut out = ComplexArray::zeros(cols);
                for (&v, (i, j)) in m.iter() {
                    out[j] += v.conj() * x[i];
                }
                Ok(out)
            }
        }
    }

    /// Compute Herm(M) x = (M + M†) x / 2
    pub fn hermitian_dot(&self, x: &ComplexArray) -> Result<ComplexArray> {
        let mx = self.dot(x)?;
        let mhx = self.adjoint_dot(x)?;
        Ok((mx + mhx).mapv(|v| v * 0.5))
    }

    /// Compute Re(x† M x)
    pub fn quadratic_form(&self, x: &ComplexArray) -> Result<f64> {
        let mx = self.dot(x)?;
        Ok(inner(x, &mx).re)
    }

    /// Convert to a dense matrix
    pub fn to_dense(&self) -> Array2<Complex64> {
        match self {
            SparseDense::Dense(m) => m.clone(),
            SparseDense::Sparse(m) => {
                let mut dense = Array2::zeros((m.rows(), m.cols()));
                for (&v, (i, j)) in m.iter() {
                    dense[[i, j]] += v;
                }
                dense
            }
        }
    }
}

impl From<Array2<Complex64>> for SparseDense {
    fn from(m: Array2<Complex64>) -> Self {
        SparseDense::Dense(m)
    }
}

impl From<CsMat<Complex64>> for SparseDense {
    fn from(m: CsMat<Complex64>) -> Self {
        SparseDense::Sparse(m)
    }
}

/// Flatten a grid into vector form (row-major order)
pub fn flatten_grid(grid: &ComplexGrid) -> ComplexArray {
    grid.iter().copied().collect()
}

/// Turn a mask into a projector diagonal: 1 where the mask is set, 0 elsewhere
pub fn mask_to_projector(mask: &BoolGrid) -> ComplexArray {
    mask.iter()
        .map(|&m| {
            if m {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::zero()
            }
        })
        .collect()
}

/// Compute the inner product a† b
pub fn inner(a: &ComplexArray, b: &ComplexArray) -> Complex64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x.conj() * y)
        .fold(Complex64::zero(), |acc, v| acc + v)
}

/// Euclidean norm of a complex vector
pub fn norm(a: &ComplexArray) -> f64 {
    a.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt()
}

/// Fail with a shape error unless `x` has length `expected`
pub fn check_len(x: &ComplexArray, expected: usize, what: &str) -> Result<()> {
    if x.len() != expected {
        return Err(Error::Shape(format!(
            "{} has length {}, expected {}",
            what,
            x.len(),
            expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, IxDyn};
    use sprs::TriMat;

    #[test]
    fn test_mask_to_projector_row_major() {
        let mask = BoolGrid::from_shape_vec(IxDyn(&[2, 2]), vec![true, false, false, true]).unwrap();
        let p = mask_to_projector(&mask);

        assert_eq!(p.len(), 4);
        assert_eq!(p[0], Complex64::new(1.0, 0.0));
        assert_eq!(p[1], Complex64::zero());
        assert_eq!(p[2], Complex64::zero());
        assert_eq!(p[3], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn test_sparse_and_dense_products_agree() {
        let dense = array![
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 2.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(3.0, -1.0)]
        ];
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 0, Complex64::new(1.0, 0.0));
        tri.add_triplet(0, 1, Complex64::new(0.0, 2.0));
        tri.add_triplet(1, 1, Complex64::new(3.0, -1.0));
        let sparse: CsMat<Complex64> = tri.to_csr();

        let d = SparseDense::from(dense);
        let s = SparseDense::from(sparse);
        let x = array![Complex64::new(0.5, 1.0), Complex64::new(-2.0, 0.25)];

        let dx = d.dot(&x).unwrap();
        let sx = s.dot(&x).unwrap();
        let dhx = d.adjoint_dot(&x).unwrap();
        let shx = s.adjoint_dot(&x).unwrap();
        for i in 0..2 {
            assert_abs_diff_eq!(dx[i].re, sx[i].re, epsilon = 1e-14);
            assert_abs_diff_eq!(dx[i].im, sx[i].im, epsilon = 1e-14);
            assert_abs_diff_eq!(dhx[i].re, shx[i].re, epsilon = 1e-14);
            assert_abs_diff_eq!(dhx[i].im, shx[i].im, epsilon = 1e-14);
        }
        assert!(s.is_sparse());
        assert_eq!(s.to_dense(), d.to_dense());
    }

    #[test]
    fn test_dot_shape_mismatch() {
        let d = SparseDense::Dense(Array2::zeros((3, 2)));
        let x = ComplexArray::zeros(3);
        assert!(matches!(d.dot(&x), Err(Error::Shape(_))));
    }
}
