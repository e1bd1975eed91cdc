//! Generalized constraint descent
//!
//! Instead of imposing every projection constraint of a problem at once, GCD
//! keeps a small working set. Each iteration adds the projector diagonal that
//! is most violated by the current Lagrangian maximizer x*, re-solves the dual,
//! and merges the oldest constraints into one once the set is full. Merging
//! and adding both leave the dual value at the current multipliers unchanged,
//! so the recorded bound only ever tightens.

use super::{DualMethod, DualSolution, SharedProjQcqp};
use crate::cvxopt::optimization::{DerivativeOrder, OptParams};
use crate::error::{Error, Result};
use crate::types::{inner, norm, ComplexArray, Complex64};
use log::{debug, info};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

/// Residual norm, relative to the input, below which an added column counts
/// as linearly dependent on the existing ones
pub const DEPENDENCE_TOL: f64 = 1e-12;

/// Configuration for [`run_gcd`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcdParams {
    /// Projection constraints kept in the working set
    pub max_proj_cstrt_num: usize,
    /// Maximum number of GCD iterations
    pub max_gcd_iter_num: usize,
    /// Relative change of the dual value that counts as converged
    pub gcd_tol: f64,
    /// Orthonormalize added columns against the existing ones
    pub orthonormalize: bool,
    /// Dual optimizer
    pub method: DualMethod,
    /// Parameters of the dual optimizer
    pub opt_params: OptParams,
}

impl Default for GcdParams {
    fn default() -> Self {
        Self {
            max_proj_cstrt_num: 10,
            max_gcd_iter_num: 50,
            gcd_tol: 1e-2,
            orthonormalize: true,
            method: DualMethod::Bfgs,
            opt_params: OptParams::default(),
        }
    }
}

impl GcdParams {
    /// Load parameters from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("cannot parse GCD parameters: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Check that every parameter is in its admissible range
    pub fn validate(&self) -> Result<()> {
        if self.max_proj_cstrt_num < 2 {
            return Err(Error::InvalidInput(format!(
                "max_proj_cstrt_num must be at least 2, got {}",
                self.max_proj_cstrt_num
            )));
        }
        if !(self.gcd_tol >= 0.0 && self.gcd_tol.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "gcd_tol must be finite and non-negative, got {}",
                self.gcd_tol
            )));
        }
        self.opt_params.validate()
    }
}

/// Outcome of a GCD run
#[derive(Debug, Clone)]
pub struct GcdResult {
    /// Dual value after the initial solve and after every iteration
    pub dual_history: Vec<f64>,
    /// GCD iterations performed
    pub iterations: usize,
    /// Whether the dual value settled before the iteration budget ran out
    pub converged: bool,
}

/// Append projector diagonals to the problem
///
/// With `orthonormalize`, each column is projected out of the span of the
/// existing ones and normalized; columns that are (numerically) already in
/// that span are skipped. A recorded dual solution is extended with zero
/// multipliers for the new constraints, which leaves its value unchanged.
///
/// Returns the number of columns actually added.
pub fn add_constraints<Q: SharedProjQcqp>(
    qcqp: &mut Q,
    added: &[ComplexArray],
    orthonormalize: bool,
) -> Result<usize> {
    let rows = qcqp.pdiags().nrows();
    let m = qcqp.num_proj_constraints();
    if let Some(v) = added.iter().find(|v| v.len() != rows) {
        return Err(Error::Shape(format!(
            "added projector diagonal has length {}, expected {}",
            v.len(),
            rows
        )));
    }

    let new_columns: Vec<ComplexArray> = if orthonormalize {
        let mut basis = orthonormal_basis(qcqp.pdiags());
        let mut columns = Vec::with_capacity(added.len());
        for v in added {
            if let Some(u) = orthonormal_residual(&basis, v) {
                basis.push(u.clone());
                columns.push(u);
            } else {
                debug!("skipping projector diagonal already in the span of the existing ones");
            }
        }
        columns
    } else {
        added.iter().filter(|v| norm(v) > 0.0).cloned().collect()
    };

    let count = new_columns.len();
    if count == 0 {
        return Ok(0);
    }

    let mut pdiags = Array2::zeros((rows, m + count));
    pdiags.slice_mut(s![.., ..m]).assign(qcqp.pdiags());
    for (k, col) in new_columns.iter().enumerate() {
        pdiags.column_mut(m + k).assign(col);
    }

    let extended = qcqp.current_solution().and_then(|sol| {
        (sol.lags.len() == qcqp.num_constraints()).then(|| {
            let mut lags = Array1::zeros(sol.lags.len() + count);
            lags.slice_mut(s![..m]).assign(&sol.lags.slice(s![..m]));
            lags.slice_mut(s![m + count..]).assign(&sol.lags.slice(s![m..]));
            (lags, sol.iterations, sol.converged)
        })
    });

    qcqp.set_pdiags(pdiags)?;
    match extended {
        Some((lags, iterations, converged)) => record_solution(qcqp, lags, iterations, converged)?,
        None => qcqp.set_current_solution(None),
    }

    debug!("added {} projection constraints, now {}", count, m + count);
    Ok(count)
}

/// Merge the first `merged_num` projection constraints into one
///
/// The merged diagonal is Σ λ_j p_j over the merged constraints, normalized,
/// with multiplier ‖Σ λ_j p_j‖, so A(λ), S(λ) and the dual value at the
/// current multipliers are unchanged. Requires a recorded dual solution.
pub fn merge_lead_constraints<Q: SharedProjQcqp>(qcqp: &mut Q, merged_num: usize) -> Result<()> {
    let sol = qcqp.current_solution().cloned().ok_or(Error::NoDualSolution)?;
    let m = qcqp.num_proj_constraints();
    if merged_num < 2 || merged_num > m {
        return Err(Error::InvalidInput(format!(
            "can only merge between 2 and {} projection constraints, got {}",
            m, merged_num
        )));
    }
    if sol.lags.len() != qcqp.num_constraints() {
        return Err(Error::InvalidInput(format!(
            "recorded solution has {} multipliers for {} constraints",
            sol.lags.len(),
            qcqp.num_constraints()
        )));
    }

    let pdiags = qcqp.pdiags();
    let rows = pdiags.nrows();
    let mut combined = ComplexArray::zeros(rows);
    for j in 0..merged_num {
        combined.scaled_add(Complex64::new(sol.lags[j], 0.0), &pdiags.column(j));
    }

    let weight = norm(&combined);
    let (lead, lead_lag) = if weight > 0.0 {
        (combined.mapv(|v| v / weight), weight)
    } else {
        (pdiags.column(0).to_owned(), 0.0)
    };

    let kept = m - merged_num;
    let mut merged = Array2::zeros((rows, kept + 1));
    merged.column_mut(0).assign(&lead);
    merged.slice_mut(s![.., 1..]).assign(&pdiags.slice(s![.., merged_num..]));

    let mut lags = Array1::zeros(sol.lags.len() - merged_num + 1);
    lags[0] = lead_lag;
    lags.slice_mut(s![1..]).assign(&sol.lags.slice(s![merged_num..]));

    qcqp.set_pdiags(merged)?;
    record_solution(qcqp, lags, sol.iterations, sol.converged)?;

    debug!("merged {} lead projection constraints, now {}", merged_num, kept + 1);
    Ok(())
}

/// Projector diagonal most violated by x
///
/// The projection constraint with diagonal p evaluates to
/// Re(Σ_k p_k (A2 x)_k conj(2 s1 - A1† x)_k), which over unit-norm p is
/// largest for p ∝ conj((A2 x) ⊙ conj(2 s1 - A1† x)).
pub fn violation_direction<Q: SharedProjQcqp>(qcqp: &Q, x: &ComplexArray) -> Result<ComplexArray> {
    qcqp.check_vars(x)?;
    let u = qcqp.apply_a2(x)?;
    let w = qcqp.apply_a1_adjoint(x)?;
    let residual = qcqp.s1().mapv(|v| v * 2.0) - &w;
    Ok(u.mapv(|v| v.conj()) * &residual)
}

/// Run generalized constraint descent on the projection constraints
///
/// Solves the dual first if no solution is recorded. Returns the history of
/// dual values, which is non-increasing.
pub fn run_gcd<Q: SharedProjQcqp>(qcqp: &mut Q, params: &GcdParams) -> Result<GcdResult> {
    params.validate()?;

    let needs_solve = qcqp
        .current_solution()
        .map_or(true, |sol| sol.lags.len() != qcqp.num_constraints());
    if needs_solve {
        qcqp.solve_current_dual_problem(params.method, None, &params.opt_params)?;
    }

    let mut dual_history = vec![current(qcqp)?.dual];
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..params.max_gcd_iter_num {
        let m = qcqp.num_proj_constraints();
        if m >= params.max_proj_cstrt_num {
            merge_lead_constraints(qcqp, m - params.max_proj_cstrt_num + 2)?;
        }

        let direction = violation_direction(qcqp, &current(qcqp)?.xstar)?;
        if norm(&direction) == 0.0 {
            info!("GCD iteration {}: x* satisfies every projection constraint", iter);
            converged = true;
            break;
        }

        if add_constraints(qcqp, &[direction], params.orthonormalize)? == 0 {
            info!("GCD iteration {}: violation direction already spanned", iter);
            converged = true;
            break;
        }

        let prev = current(qcqp)?.dual;
        let sol = qcqp.solve_current_dual_problem(params.method, None, &params.opt_params)?;
        dual_history.push(sol.dual);
        iterations = iter + 1;

        info!(
            "GCD iteration {}: dual = {:.8e}, projection constraints = {}",
            iter,
            sol.dual,
            qcqp.num_proj_constraints()
        );

        if (prev - sol.dual).abs() <= params.gcd_tol * sol.dual.abs() {
            converged = true;
            break;
        }
    }

    Ok(GcdResult {
        dual_history,
        iterations,
        converged,
    })
}

fn current<Q: SharedProjQcqp>(qcqp: &Q) -> Result<&DualSolution> {
    qcqp.current_solution().ok_or(Error::NoDualSolution)
}

/// Re-evaluate the dual at `lags` and record it as the current solution
fn record_solution<Q: SharedProjQcqp>(
    qcqp: &mut Q,
    lags: Array1<f64>,
    iterations: usize,
    converged: bool,
) -> Result<()> {
    let eval = qcqp.get_dual(&lags, DerivativeOrder::Hessian, &[])?;
    let nc = lags.len();
    qcqp.set_current_solution(Some(DualSolution {
        lags,
        dual: eval.value,
        grad: eval.gradient.unwrap_or_else(|| Array1::zeros(nc)),
        hess: eval.hessian.unwrap_or_else(|| Array2::zeros((nc, nc))),
        xstar: eval.xstar,
        iterations,
        converged,
    }));
    Ok(())
}

/// Orthonormal basis of the column span, dropping dependent columns
fn orthonormal_basis(columns: &Array2<Complex64>) -> Vec<ComplexArray> {
    let mut basis: Vec<ComplexArray> = Vec::with_capacity(columns.ncols());
    for col in columns.columns() {
        if let Some(u) = orthonormal_residual(&basis, &col.to_owned()) {
            basis.push(u);
        }
    }
    basis
}

/// Normalized component of v orthogonal to an orthonormal basis
///
/// Two Gram-Schmidt passes; `None` when the residual is negligible.
fn orthonormal_residual(basis: &[ComplexArray], v: &ComplexArray) -> Option<ComplexArray> {
    let input_norm = norm(v);
    if input_norm == 0.0 {
        return None;
    }

    let mut w = v.clone();
    for _ in 0..2 {
        for b in basis {
            let coeff = inner(b, &w);
            w.scaled_add(-coeff, b);
        }
    }

    let residual = norm(&w);
    if residual <= DEPENDENCE_TOL * input_norm {
        return None;
    }
    Some(w.mapv(|v| v / residual))
}
