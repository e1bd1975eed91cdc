//! Convex optimization for dual bounds
//!
//! `optimization` holds the generic minimizers; `qcqp` the shared-projection
//! QCQPs whose Lagrange duals they minimize, together with the constraint
//! descent driver.

pub mod optimization;
pub mod qcqp;

pub use optimization::{AltNewtonGd, Bfgs, OptParams, OptimizationProblem, Optimizer};
pub use qcqp::{
    add_constraints, merge_lead_constraints, run_gcd, DenseSharedProjQcqp, DualMethod,
    DualSolution, GcdParams, GcdResult, GeneralConstraint, SharedProjQcqp, SparseSharedProjQcqp,
};
