//! Hermitian positive-definite factorizations
//!
//! The dual of a shared-projection QCQP is only defined where the total
//! quadratic form A(λ) is positive definite. Both backends report a failed
//! factorization as `None`, which is how dual infeasibility is detected.

pub mod dense;
pub mod sparse;

pub use self::dense::DenseCholesky;
pub use self::sparse::SparseLdl;

use crate::error::Result;
use crate::types::ComplexArray;

/// Trait defining a factored Hermitian positive-definite matrix
pub trait HermitianFactor: Send + Sync {
    /// Dimension of the factored matrix
    fn dim(&self) -> usize;

    /// Solve A x = b; fails with a shape error when `b` has the wrong length
    fn solve(&self, b: &ComplexArray) -> Result<ComplexArray>;

    /// Return the name of the backend for debugging/logging
    fn name(&self) -> &'static str;
}
