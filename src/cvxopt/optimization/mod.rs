//! Optimizers for convex dual functions
//!
//! Both methods minimize a function that is only defined on a feasible
//! region (for a QCQP dual, the set of multipliers where the total quadratic
//! form is positive definite). Steps never leave the region: the line search
//! backtracks until the trial point is feasible before testing for descent.
//!
//! The outer loop adds barrier penalties supplied by the problem, minimizes
//! the penalized function, then shrinks the penalty and restarts from the
//! last point. It stops once restarts stop changing the objective.

pub mod alt_newton_gd;
pub mod bfgs;
pub mod line_search;

pub use alt_newton_gd::AltNewtonGd;
pub use bfgs::Bfgs;

use crate::error::{Error, Result};
use log::{debug, info};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// How many derivatives an evaluation should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DerivativeOrder {
    /// Function value only
    Value,
    /// Value and gradient
    Gradient,
    /// Value, gradient and Hessian
    Hessian,
}

/// Result of evaluating the objective at a point
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Objective value
    pub value: f64,
    /// Gradient (if requested)
    pub gradient: Option<Array1<f64>>,
    /// Hessian (if requested)
    pub hessian: Option<Array2<f64>>,
}

impl Evaluation {
    pub(crate) fn require_gradient(&self) -> Result<&Array1<f64>> {
        self.gradient.as_ref().ok_or_else(|| {
            Error::InvalidInput("objective did not return a gradient".to_string())
        })
    }

    pub(crate) fn require_hessian(&self) -> Result<&Array2<f64>> {
        self.hessian.as_ref().ok_or_else(|| {
            Error::InvalidInput("objective did not return a Hessian".to_string())
        })
    }
}

/// Trait defining a function to be minimized over a feasible region
pub trait OptimizationProblem {
    /// Barrier term handed back to `evaluate`
    type Penalty: Clone + Send + Sync;

    /// Evaluate the objective (plus penalty terms) at a feasible point
    fn evaluate(
        &self,
        x: &Array1<f64>,
        penalties: &[Self::Penalty],
        order: DerivativeOrder,
    ) -> Result<Evaluation>;

    /// Whether the objective is defined at `x`
    fn is_feasible(&self, x: &Array1<f64>) -> Result<bool>;

    /// Barrier penalties whose total contribution at `x` equals `weight`
    fn penalties(&self, _x: &Array1<f64>, _weight: f64) -> Result<Vec<Self::Penalty>> {
        Ok(Vec::new())
    }
}

/// Configuration for the dual optimizers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptParams {
    /// Maximum number of penalty restarts
    pub max_restart: usize,
    /// Maximum number of iterations per restart
    pub max_iter: usize,
    /// Relative change of the objective between restarts that counts as converged
    pub opt_tol: f64,
    /// Relative change of the penalized objective that ends a restart
    pub inner_tol: f64,
    /// Gradient norm that counts as converged
    pub grad_tol: f64,
    /// Minimum number of iterations per restart
    pub min_inner_iter: usize,
    /// Initial penalty weight relative to |f|
    pub penalty_ratio: f64,
    /// Factor applied to the penalty ratio after each restart
    pub penalty_reduction: f64,
    /// Penalty ratios below this are dropped to zero
    pub min_penalty_ratio: f64,
    /// Sufficient decrease constant of the Armijo condition
    pub armijo_c1: f64,
    /// Step shrink factor while backtracking
    pub backtrack_factor: f64,
    /// Smallest step tried before the line search gives up
    pub min_step: f64,
}

impl Default for OptParams {
    fn default() -> Self {
        Self {
            max_restart: 50,
            max_iter: 500,
            opt_tol: 1e-4,
            inner_tol: 1e-10,
            grad_tol: 1e-8,
            min_inner_iter: 5,
            penalty_ratio: 1e-2,
            penalty_reduction: 0.1,
            min_penalty_ratio: 1e-12,
            armijo_c1: 1e-4,
            backtrack_factor: 0.5,
            min_step: 1e-12,
        }
    }
}

impl OptParams {
    /// Load parameters from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("cannot parse optimizer parameters: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Check that every parameter is in its admissible range
    pub fn validate(&self) -> Result<()> {
        if self.max_restart == 0 || self.max_iter == 0 {
            return Err(Error::InvalidInput(
                "max_restart and max_iter must be at least 1".to_string(),
            ));
        }
        if !(self.backtrack_factor > 0.0 && self.backtrack_factor < 1.0) {
            return Err(Error::InvalidInput(format!(
                "backtrack_factor must lie in (0, 1), got {}",
                self.backtrack_factor
            )));
        }
        if !(self.armijo_c1 > 0.0 && self.armijo_c1 < 1.0) {
            return Err(Error::InvalidInput(format!(
                "armijo_c1 must lie in (0, 1), got {}",
                self.armijo_c1
            )));
        }
        if !(self.penalty_reduction > 0.0 && self.penalty_reduction < 1.0) {
            return Err(Error::InvalidInput(format!(
                "penalty_reduction must lie in (0, 1), got {}",
                self.penalty_reduction
            )));
        }
        for (name, value) in [
            ("opt_tol", self.opt_tol),
            ("inner_tol", self.inner_tol),
            ("grad_tol", self.grad_tol),
            ("penalty_ratio", self.penalty_ratio),
            ("min_penalty_ratio", self.min_penalty_ratio),
            ("min_step", self.min_step),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(Error::InvalidInput(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one penalized minimization
#[derive(Debug, Clone)]
pub struct InnerResult {
    /// Final point
    pub x: Array1<f64>,
    /// Penalized objective at `x`
    pub value: f64,
    /// Iterations taken
    pub iterations: usize,
}

/// Result of a full optimization run
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Minimizer found
    pub x: Array1<f64>,
    /// Objective value at `x` (no penalties)
    pub value: f64,
    /// Gradient at `x`
    pub gradient: Array1<f64>,
    /// Hessian at `x`, for methods that use it
    pub hessian: Option<Array2<f64>>,
    /// Number of penalty restarts performed
    pub restarts: usize,
    /// Total number of inner iterations
    pub iterations: usize,
    /// Whether a stopping criterion was met before the restart budget ran out
    pub converged: bool,
}

/// Trait implemented by the minimization methods
pub trait Optimizer {
    /// Parameters of this optimizer
    fn params(&self) -> &OptParams;

    /// Return the name of the method for logging
    fn name(&self) -> &'static str;

    /// Derivatives the method needs at every evaluation
    fn derivative_order(&self) -> DerivativeOrder;

    /// Minimize the penalized objective starting from a feasible `x0`
    fn minimize_penalized<P: OptimizationProblem>(
        &self,
        problem: &P,
        x0: Array1<f64>,
        penalties: &[P::Penalty],
    ) -> Result<InnerResult>;

    /// Minimize the objective starting from a feasible `x0`
    fn run<P: OptimizationProblem>(&self, problem: &P, x0: &Array1<f64>) -> Result<OptimizationResult> {
        let params = self.params();
        params.validate()?;
        let order = self.derivative_order().max(DerivativeOrder::Gradient);

        if !problem.is_feasible(x0)? {
            return Err(Error::InfeasibleStart(format!(
                "{}: initial point is outside the feasible region",
                self.name()
            )));
        }

        let mut x = x0.clone();
        let mut eval = problem.evaluate(&x, &[], order)?;
        let mut best_x = x.clone();
        let mut best_eval = eval.clone();
        let mut prev_value = eval.value;
        let mut ratio = params.penalty_ratio;
        let mut iterations = 0;
        let mut restarts = 0;
        let mut converged = false;

        for restart in 0..params.max_restart {
            restarts = restart + 1;

            let weight = ratio * eval.value.abs();
            let penalties = if weight > 0.0 {
                problem.penalties(&x, weight)?
            } else {
                Vec::new()
            };

            let inner = self.minimize_penalized(problem, x, &penalties)?;
            iterations += inner.iterations;
            x = inner.x;
            eval = problem.evaluate(&x, &[], order)?;

            if eval.value <= best_eval.value {
                best_x = x.clone();
                best_eval = eval.clone();
            }

            let grad_norm = eval.require_gradient()?.dot(eval.require_gradient()?).sqrt();
            info!(
                "{} restart {}: value = {:.6e}, |grad| = {:.2e}, penalty ratio = {:.1e}, inner iterations = {}",
                self.name(),
                restart,
                eval.value,
                grad_norm,
                ratio,
                inner.iterations
            );

            if grad_norm < params.grad_tol
                || (prev_value - eval.value).abs() <= params.opt_tol * eval.value.abs()
            {
                converged = true;
                break;
            }

            prev_value = eval.value;
            ratio *= params.penalty_reduction;
            if ratio < params.min_penalty_ratio {
                debug!("{}: penalty ratio below minimum, dropping penalties", self.name());
                ratio = 0.0;
            }
        }

        let gradient = best_eval.require_gradient()?.clone();
        Ok(OptimizationResult {
            x: best_x,
            value: best_eval.value,
            gradient,
            hessian: best_eval.hessian,
            restarts,
            iterations,
            converged,
        })
    }
}

/// Relative change between successive objective values
pub(crate) fn relative_change(old: f64, new: f64) -> f64 {
    if new == 0.0 {
        (old - new).abs()
    } else {
        (old - new).abs() / new.abs()
    }
}
