//! BFGS quasi-Newton method on a feasible region

use super::line_search::backtracking;
use super::{relative_change, DerivativeOrder, InnerResult, OptParams, OptimizationProblem, Optimizer};
use crate::error::Result;
use log::{debug, warn};
use ndarray::{Array1, Array2};

/// BFGS minimizer
///
/// Keeps an approximation H of the inverse Hessian, initialised to the
/// identity and scaled by yᵀs / yᵀy after the first accepted step. The
/// estimate is reset at every penalty restart.
#[derive(Debug, Clone, Default)]
pub struct Bfgs {
    /// Optimizer configuration
    pub params: OptParams,
}

impl Bfgs {
    /// Create a BFGS optimizer
    pub fn new(params: OptParams) -> Self {
        Self { params }
    }
}

impl Optimizer for Bfgs {
    fn params(&self) -> &OptParams {
        &self.params
    }

    fn name(&self) -> &'static str {
        "BFGS"
    }

    fn derivative_order(&self) -> DerivativeOrder {
        DerivativeOrder::Gradient
    }

    fn minimize_penalized<P: OptimizationProblem>(
        &self,
        problem: &P,
        x0: Array1<f64>,
        penalties: &[P::Penalty],
    ) -> Result<InnerResult> {
        let params = &self.params;
        let n = x0.len();

        let mut x = x0;
        let mut eval = problem.evaluate(&x, penalties, DerivativeOrder::Gradient)?;
        let mut grad = eval.require_gradient()?.clone();
        let mut h_inv = Array2::<f64>::eye(n);
        let mut scaled = false;
        let mut iterations = 0;

        for iter in 0..params.max_iter {
            let grad_norm = grad.dot(&grad).sqrt();
            if grad_norm < params.grad_tol {
                break;
            }

            let mut direction = -h_inv.dot(&grad);
            if grad.dot(&direction) >= 0.0 {
                // Curvature information went bad; fall back to steepest descent
                h_inv = Array2::eye(n);
                scaled = false;
                direction = -&grad;
            }

            let dir_norm = direction.dot(&direction).sqrt();
            let init_step = if scaled { 1.0 } else { (1.0 / dir_norm).min(1.0) };

            let mut accepted = backtracking(
                problem,
                &x,
                eval.value,
                &grad,
                &direction,
                penalties,
                DerivativeOrder::Gradient,
                init_step,
                params,
            )?;

            if accepted.is_none() && scaled {
                debug!("BFGS iteration {}: retrying with steepest descent", iter);
                h_inv = Array2::eye(n);
                scaled = false;
                direction = -&grad;
                accepted = backtracking(
                    problem,
                    &x,
                    eval.value,
                    &grad,
                    &direction,
                    penalties,
                    DerivativeOrder::Gradient,
                    (1.0 / grad_norm).min(1.0),
                    params,
                )?;
            }

            let Some(step) = accepted else {
                warn!(
                    "BFGS iteration {}: line search failed (value = {:.6e}, |grad| = {:.2e})",
                    iter, eval.value, grad_norm
                );
                break;
            };

            let new_grad = step.eval.require_gradient()?.clone();
            let s = &step.x - &x;
            let y = &new_grad - &grad;
            let ys = y.dot(&s);

            if ys > 0.0 {
                if !scaled {
                    h_inv *= ys / y.dot(&y);
                    scaled = true;
                }
                bfgs_update(&mut h_inv, &s, &y, ys);
            }

            let change = relative_change(eval.value, step.eval.value);
            debug!(
                "BFGS iteration {}: value = {:.10e}, step = {:.2e}, |grad| = {:.2e}",
                iter, step.eval.value, step.step, grad_norm
            );

            x = step.x;
            eval = step.eval;
            grad = new_grad;
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

/// Inverse-Hessian BFGS update
///
/// H ← H - ρ (s (Hy)ᵀ + (Hy) sᵀ) + ρ (1 + ρ yᵀHy) s sᵀ with ρ = 1 / yᵀs
fn bfgs_update(h_inv: &mut Array2<f64>, s: &Array1<f64>, y: &Array1<f64>, ys: f64) {
    let rho = 1.0 / ys;
    let hy = h_inv.dot(y);
    let yhy = y.dot(&hy);
    let n = s.len();

    for i in 0..n {
        for j in 0..n {
            h_inv[[i, j]] += rho * (1.0 + rho * yhy) * s[i] * s[j] - rho * (s[i] * hy[j] + hy[i] * s[j]);
        }
    }
}
