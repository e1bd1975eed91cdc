//! dolphindes - Dual bounds for photonic inverse design
//!
//! This library computes upper bounds on quadratic figures of merit over
//! electromagnetic fields by solving the Lagrange dual of a QCQP whose
//! constraints share a single projection structure. It provides dense and
//! sparse problem storage, BFGS and alternating Newton optimizers for the
//! dual, and generalized constraint descent to refine the constraint set.

pub mod cvxopt;
pub mod error;
pub mod linalg;
pub mod types;

// Re-export commonly used types
pub use cvxopt::{
    add_constraints, merge_lead_constraints, run_gcd, AltNewtonGd, Bfgs, DenseSharedProjQcqp,
    SparseSharedProjQcqp,
};
pub use error::{Error, Result};
pub use types::{BoolGrid, ComplexArray, ComplexGrid, Complex64, SparseDense};

pub mod prelude {
    //! Common imports for using the dolphindes library
    pub use crate::cvxopt::optimization::{DerivativeOrder, OptParams, Optimizer};
    pub use crate::cvxopt::qcqp::{
        add_constraints, merge_lead_constraints, run_gcd, DenseSharedProjQcqp, DualMethod,
        DualSolution, GcdParams, GcdResult, GeneralConstraint, SharedProjQcqp,
        SparseSharedProjQcqp,
    };
    pub use crate::cvxopt::{AltNewtonGd, Bfgs};
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        flatten_grid, mask_to_projector, BoolGrid, ComplexArray, ComplexGrid, Complex64,
        SparseDense,
    };
}
