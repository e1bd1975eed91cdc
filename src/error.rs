//! Error type shared by the solvers

use std::fmt;

/// Unified error type for all fallible operations in the crate.
#[derive(Debug)]
pub enum Error {
    /// Array or matrix dimensions do not line up
    Shape(String),
    /// Argument out of its admissible range
    InvalidInput(String),
    /// No dual-feasible starting point was given or could be found
    InfeasibleStart(String),
    /// A matrix that must be positive definite is not
    NotPositiveDefinite(String),
    /// Operation needs a solved dual problem first
    NoDualSolution,
    /// Sparse factorization failure
    Linalg(sprs::errors::LinalgError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(msg) => write!(f, "shape error: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::InfeasibleStart(msg) => write!(f, "infeasible starting point: {msg}"),
            Self::NotPositiveDefinite(msg) => write!(f, "matrix not positive definite: {msg}"),
            Self::NoDualSolution => {
                write!(f, "no dual solution recorded (call solve_current_dual_problem first)")
            }
            Self::Linalg(e) => write!(f, "linear algebra error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Linalg(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sprs::errors::LinalgError> for Error {
    fn from(e: sprs::errors::LinalgError) -> Self {
        Self::Linalg(e)
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
