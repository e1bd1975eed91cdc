//! Alternating Newton and gradient-descent steps
//!
//! Even iterations take a Newton step, odd iterations a steepest-descent
//! step. The gradient step keeps making progress where the Newton model is
//! poor, e.g. close to the boundary of the feasible region.

use super::line_search::backtracking;
use super::{relative_change, DerivativeOrder, InnerResult, OptParams, OptimizationProblem, Optimizer};
use crate::error::Result;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Alternating Newton / gradient-descent minimizer
#[derive(Debug, Clone, Default)]
pub struct AltNewtonGd {
    /// Optimizer configuration
    pub params: OptParams,
}

impl AltNewtonGd {
    /// Create an alternating Newton / gradient-descent optimizer
    pub fn new(params: OptParams) -> Self {
        Self { params }
    }
}

impl Optimizer for AltNewtonGd {
    fn params(&self) -> &OptParams {
        &self.params
    }

    fn name(&self) -> &'static str {
        "Alt-Newton-GD"
    }

    fn derivative_order(&self) -> DerivativeOrder {
        DerivativeOrder::Hessian
    }

    fn minimize_penalized<P: OptimizationProblem>(
        &self,
        problem: &P,
        x0: Array1<f64>,
        penalties: &[P::Penalty],
    ) -> Result<InnerResult> {
        let params = &self.params;

        let mut x = x0;
        let mut eval = problem.evaluate(&x, penalties, DerivativeOrder::Hessian)?;
        let mut iterations = 0;

        for iter in 0..params.max_iter {
            let grad = eval.require_gradient()?.clone();
            let grad_norm = grad.dot(&grad).sqrt();
            if grad_norm < params.grad_tol {
                break;
            }

            let steepest = -&grad;
            // Gradient steps start at unit length along the normalized gradient
            let gd_init = (1.0 / grad_norm).min(1.0);

            let mut accepted = None;
            if iter % 2 == 0 {
                match newton_direction(eval.require_hessian()?, &grad) {
                    Some(direction) => {
                        accepted = backtracking(
                            problem,
                            &x,
                            eval.value,
                            &grad,
                            &direction,
                            penalties,
                            DerivativeOrder::Hessian,
                            1.0,
                            params,
                        )?;
                    }
                    None => debug!("Alt-Newton-GD iteration {}: Hessian not positive definite", iter),
                }
            }

            let mut took_gradient_step = false;
            if accepted.is_none() {
                accepted = backtracking(
                    problem,
                    &x,
                    eval.value,
                    &grad,
                    &steepest,
                    penalties,
                    DerivativeOrder::Hessian,
                    gd_init,
                    params,
                )?;
                took_gradient_step = true;
            }

            let Some(step) = accepted else {
                warn!(
                    "Alt-Newton-GD iteration {}: line search failed (value = {:.6e}, |grad| = {:.2e})",
                    iter, eval.value, grad_norm
                );
                break;
            };

            let change = relative_change(eval.value, step.eval.value);
            debug!(
                "Alt-Newton-GD iteration {} ({}): value = {:.10e}, step = {:.2e}, |grad| = {:.2e}",
                iter,
                if took_gradient_step { "gd" } else { "newton" },
                step.eval.value,
                step.step,
                grad_norm
            );

            x = step.x;
            eval = step.eval;
            iterations = iter + 1;

            if iterations >= params.min_inner_iter && change <= params.inner_tol {
                break;
            }
        }

        Ok(InnerResult {
            x,
            value: eval.value,
            iterations,
        })
    }
}

/// Solve H p = -g with a Cholesky factorization
///
/// Returns `None` when H is not positive definite.
fn newton_direction(hessian: &Array2<f64>, gradient: &Array1<f64>) -> Option<Array1<f64>> {
    let n = gradient.len();
    let h = DMatrix::from_fn(n, n, |i, j| hessian[[i, j]]);
    let chol = h.cholesky()?;
    let rhs = DVector::from_iterator(n, gradient.iter().map(|g| -g));
    let p = chol.solve(&rhs);
    Some(p.iter().copied().collect())
}
