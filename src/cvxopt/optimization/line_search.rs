//! Backtracking line search that stays inside the feasible region

use super::{DerivativeOrder, Evaluation, OptParams, OptimizationProblem};
use crate::error::Result;
use log::debug;
use ndarray::Array1;

/// Accepted step of a line search
#[derive(Debug, Clone)]
pub struct LineSearchStep {
    /// Step length along the search direction
    pub step: f64,
    /// New point x + step * direction
    pub x: Array1<f64>,
    /// Evaluation at the new point
    pub eval: Evaluation,
    /// Number of trial points rejected for infeasibility
    pub infeasible_trials: usize,
}

/// Backtrack from `init_step` along `direction` until the trial point is
/// feasible and satisfies the Armijo condition
///
/// Returns `None` if `direction` is not a descent direction or the step falls
/// below `params.min_step`.
#[allow(clippy::too_many_arguments)]
pub fn backtracking<P: OptimizationProblem>(
    problem: &P,
    x: &Array1<f64>,
    value: f64,
    gradient: &Array1<f64>,
    direction: &Array1<f64>,
    penalties: &[P::Penalty],
    order: DerivativeOrder,
    init_step: f64,
    params: &OptParams,
) -> Result<Option<LineSearchStep>> {
    let slope = gradient.dot(direction);
    if !(slope < 0.0) {
        return Ok(None);
    }

    let mut step = init_step;
    let mut infeasible_trials = 0;

    while step >= params.min_step {
        let trial = x + &(direction * step);

        if !problem.is_feasible(&trial)? {
            infeasible_trials += 1;
            step *= params.backtrack_factor;
            continue;
        }

        let eval = problem.evaluate(&trial, penalties, order)?;
        if eval.value.is_finite() && eval.value <= value + params.armijo_c1 * step * slope {
            return Ok(Some(LineSearchStep {
                step,
                x: trial,
                eval,
                infeasible_trials,
            }));
        }

        step *= params.backtrack_factor;
    }

    debug!(
        "line search failed: step fell below {:.1e} ({} infeasible trials)",
        params.min_step, infeasible_trials
    );
    Ok(None)
}
