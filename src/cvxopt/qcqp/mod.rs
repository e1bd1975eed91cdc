//! Quadratically constrained quadratic programs with shared projection constraints
//!
//! The problem over x ∈ Cⁿ is
//!
//! ```text
//! maximize   -x† A0 x + 2 Re(s0† x) + c0
//! subject to Re(-x† A1 P_j A2 x + 2 x† A2† P_j† s1) = 0     j = 1..m
//!            Re(-x† B_k x + 2 s2_k† x) + c2_k = 0            k = 1..q
//! ```
//!
//! where each P_j = diag(p_j) is a diagonal projector. All projection
//! constraints share A1, A2 and s1, so a weighted sum of them is again a
//! single projection constraint with diagonal Σ λ_j p_j. This keeps the total
//! quadratic form of the Lagrangian as cheap to assemble as one constraint.
//!
//! Multipliers are ordered with the m projection multipliers first, followed
//! by the q general ones.

pub mod dense;
pub mod gcd;
pub mod sparse;

pub use dense::DenseSharedProjQcqp;
pub use gcd::{add_constraints, merge_lead_constraints, run_gcd, GcdParams, GcdResult};
pub use sparse::SparseSharedProjQcqp;

use crate::cvxopt::optimization::{
    AltNewtonGd, Bfgs, DerivativeOrder, Evaluation, OptParams, OptimizationProblem, Optimizer,
};
use crate::error::{Error, Result};
use crate::linalg::HermitianFactor;
use crate::types::{check_len, inner, ComplexArray, Complex64, SparseDense};
use log::{debug, info};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of doublings tried when searching for a dual-feasible point
pub const FEASIBILITY_SEARCH_LIMIT: usize = 60;

/// Constraint Re(-x† B x + 2 s† x) + c = 0 outside the shared projector structure
#[derive(Debug, Clone)]
pub struct GeneralConstraint {
    /// Quadratic term (its Hermitian part enters the constraint)
    pub b: SparseDense,
    /// Linear term
    pub s: ComplexArray,
    /// Constant term
    pub c: f64,
}

impl GeneralConstraint {
    /// Create a general constraint
    pub fn new(b: impl Into<SparseDense>, s: ComplexArray, c: f64) -> Self {
        Self { b: b.into(), s, c }
    }

    pub(crate) fn validate(&self, n: usize) -> Result<()> {
        if self.b.shape() != (n, n) || self.s.len() != n {
            return Err(Error::Shape(format!(
                "general constraint has B of shape {:?} and s of length {}, expected {}x{} and {}",
                self.b.shape(),
                self.s.len(),
                n,
                n,
                n
            )));
        }
        Ok(())
    }
}

/// Method used to minimize the dual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualMethod {
    /// Quasi-Newton with gradients only
    #[default]
    Bfgs,
    /// Alternating Newton / gradient descent with exact Hessians
    Newton,
}

/// Dual function evaluated at one set of multipliers
#[derive(Debug, Clone)]
pub struct DualEvaluation {
    /// Dual value D(λ) (plus penalty terms, if any)
    pub value: f64,
    /// Gradient ∂D/∂λ
    pub gradient: Option<Array1<f64>>,
    /// Hessian ∂²D/∂λ²
    pub hessian: Option<Array2<f64>>,
    /// Maximizer of the Lagrangian x*(λ) = A(λ)⁻¹ S(λ)
    pub xstar: ComplexArray,
}

/// Solved dual problem, as recorded on the QCQP
#[derive(Debug, Clone)]
pub struct DualSolution {
    /// Optimal multipliers
    pub lags: Array1<f64>,
    /// Dual value (an upper bound on the primal maximum)
    pub dual: f64,
    /// Dual gradient, i.e. the constraint values at `xstar`
    pub grad: Array1<f64>,
    /// Dual Hessian
    pub hess: Array2<f64>,
    /// Maximizer of the Lagrangian at `lags`
    pub xstar: ComplexArray,
    /// Inner iterations used by the optimizer
    pub iterations: usize,
    /// Whether the optimizer reported convergence
    pub converged: bool,
}

/// Trait defining a shared-projection QCQP
///
/// Implementors provide storage-specific operator application and the
/// factorization of the total quadratic form; the dual, its derivatives and
/// the solve loop are shared.
pub trait SharedProjQcqp: Sync + Sized {
    /// Factorization of A(λ)
    type Factor: HermitianFactor;

    /// Number of primal variables n
    fn num_vars(&self) -> usize;

    /// Projector diagonals, one per column
    fn pdiags(&self) -> &Array2<Complex64>;

    /// Replace the projector diagonals (same number of rows) and clear the
    /// recorded dual solution
    fn set_pdiags(&mut self, pdiags: Array2<Complex64>) -> Result<()>;

    /// Constraints outside the shared projector structure
    fn general_constraints(&self) -> &[GeneralConstraint];

    /// Linear objective term
    fn s0(&self) -> &ComplexArray;

    /// Linear term shared by the projection constraints
    fn s1(&self) -> &ComplexArray;

    /// Constant objective term
    fn c0(&self) -> f64;

    /// Compute A0 x
    fn apply_a0(&self, x: &ComplexArray) -> Result<ComplexArray>;

    /// Compute A1 x
    fn apply_a1(&self, x: &ComplexArray) -> Result<ComplexArray>;

    /// Compute A1† x
    fn apply_a1_adjoint(&self, x: &ComplexArray) -> Result<ComplexArray>;

    /// Compute A2 x
    fn apply_a2(&self, x: &ComplexArray) -> Result<ComplexArray>;

    /// Compute A2† x
    fn apply_a2_adjoint(&self, x: &ComplexArray) -> Result<ComplexArray>;

    /// Factor A(λ); `None` when it is not positive definite
    fn factor_total_a(&self, lags: &Array1<f64>) -> Result<Option<Self::Factor>>;

    /// Last recorded dual solution
    fn current_solution(&self) -> Option<&DualSolution>;

    /// Record (or clear) the dual solution
    fn set_current_solution(&mut self, solution: Option<DualSolution>);

    /// Number of projection constraints m
    fn num_proj_constraints(&self) -> usize {
        self.pdiags().ncols()
    }

    /// Total number of constraints m + q
    fn num_constraints(&self) -> usize {
        self.num_proj_constraints() + self.general_constraints().len()
    }

    /// Check that a multiplier vector has the right length and finite entries
    fn check_lags(&self, lags: &Array1<f64>) -> Result<()> {
        if lags.len() != self.num_constraints() {
            return Err(Error::Shape(format!(
                "got {} multipliers for {} constraints",
                lags.len(),
                self.num_constraints()
            )));
        }
        if lags.iter().any(|l| !l.is_finite()) {
            return Err(Error::InvalidInput("multipliers must be finite".to_string()));
        }
        Ok(())
    }

    /// Check that a primal vector has length n
    fn check_vars(&self, x: &ComplexArray) -> Result<()> {
        check_len(x, self.num_vars(), "primal vector")
    }

    /// Combined projector diagonal Σ_j λ_j p_j
    fn proj_combination(&self, lags: &Array1<f64>) -> Result<ComplexArray> {
        self.check_lags(lags)?;
        let m = self.num_proj_constraints();
        let weights: ComplexArray = lags
            .iter()
            .take(m)
            .map(|&l| Complex64::new(l, 0.0))
            .collect();
        Ok(self.pdiags().dot(&weights))
    }

    /// S(λ) = s0 + A2† (conj(Σ λ_j p_j) ⊙ s1) + Σ λ_k s2_k
    fn total_s(&self, lags: &Array1<f64>) -> Result<ComplexArray> {
        let m = self.num_proj_constraints();
        let q = self.proj_combination(lags)?;
        let projected = q.mapv(|v| v.conj()) * self.s1();

        let mut s = self.s0() + &self.apply_a2_adjoint(&projected)?;
        for (k, gc) in self.general_constraints().iter().enumerate() {
            let lam = lags[m + k];
            if lam != 0.0 {
                s.scaled_add(Complex64::new(lam, 0.0), &gc.s);
            }
        }
        Ok(s)
    }

    /// C(λ) = c0 + Σ λ_k c2_k
    fn total_c(&self, lags: &Array1<f64>) -> Result<f64> {
        self.check_lags(lags)?;
        let m = self.num_proj_constraints();
        Ok(self.c0()
            + self
                .general_constraints()
                .iter()
                .enumerate()
                .map(|(k, gc)| lags[m + k] * gc.c)
                .sum::<f64>())
    }

    /// Compute ∂A_i x, the Hermitian quadratic term of constraint i applied to x
    fn apply_constraint_a(&self, i: usize, x: &ComplexArray) -> Result<ComplexArray> {
        self.check_vars(x)?;
        let m = self.num_proj_constraints();
        if i < m {
            let p = self.pdiags().column(i);
            let forward = self.apply_a1(&(&self.apply_a2(x)? * &p))?;
            let backward =
                self.apply_a2_adjoint(&(&self.apply_a1_adjoint(x)? * &p.mapv(|v| v.conj())))?;
            Ok((forward + backward).mapv(|v| v * 0.5))
        } else {
            self.general_constraint(i)?.b.hermitian_dot(x)
        }
    }

    /// Linear term ∂S_i of constraint i
    fn constraint_s(&self, i: usize) -> Result<ComplexArray> {
        let m = self.num_proj_constraints();
        if i < m {
            let p = self.pdiags().column(i);
            let projected = p.mapv(|v| v.conj()) * self.s1();
            self.apply_a2_adjoint(&projected)
        } else {
            Ok(self.general_constraint(i)?.s.clone())
        }
    }

    /// Constant term ∂C_i of constraint i
    fn constraint_c(&self, i: usize) -> Result<f64> {
        if i < self.num_proj_constraints() {
            Ok(0.0)
        } else {
            Ok(self.general_constraint(i)?.c)
        }
    }

    /// General constraint with overall index `i` (counted after the projections)
    fn general_constraint(&self, i: usize) -> Result<&GeneralConstraint> {
        let m = self.num_proj_constraints();
        i.checked_sub(m)
            .and_then(|k| self.general_constraints().get(k))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "constraint index {} out of range for {} constraints",
                    i,
                    self.num_constraints()
                ))
            })
    }

    /// Whether A(λ) is positive definite
    fn is_dual_feasible(&self, lags: &Array1<f64>) -> Result<bool> {
        self.check_lags(lags)?;
        Ok(self.factor_total_a(lags)?.is_some())
    }

    /// Find multipliers at which the dual is defined
    ///
    /// Tries zero first, then grows the first projection multiplier (both
    /// signs) geometrically.
    fn find_feasible_lags(&self) -> Result<Array1<f64>> {
        let mut lags = Array1::zeros(self.num_constraints());
        if self.is_dual_feasible(&lags)? {
            return Ok(lags);
        }
        if self.num_proj_constraints() == 0 {
            return Err(Error::InfeasibleStart(
                "A0 is not positive definite and there is no projection constraint to shift it"
                    .to_string(),
            ));
        }

        let mut scale = 1.0;
        for _ in 0..FEASIBILITY_SEARCH_LIMIT {
            for sign in [1.0, -1.0] {
                lags[0] = sign * scale;
                if self.is_dual_feasible(&lags)? {
                    info!("found dual-feasible point with first multiplier {:.3e}", lags[0]);
                    return Ok(lags);
                }
            }
            scale *= 2.0;
        }

        Err(Error::InfeasibleStart(format!(
            "no dual-feasible point found after {} doublings of the first multiplier",
            FEASIBILITY_SEARCH_LIMIT
        )))
    }

    /// Evaluate the dual function and optionally its derivatives
    ///
    /// Each penalty vector v adds Re(v† A(λ)⁻¹ v), which diverges as A(λ)
    /// approaches singularity.
    fn get_dual(
        &self,
        lags: &Array1<f64>,
        order: DerivativeOrder,
        penalties: &[ComplexArray],
    ) -> Result<DualEvaluation> {
        self.check_lags(lags)?;
        for v in penalties {
            check_len(v, self.num_vars(), "penalty vector")?;
        }
        let factor = self.factor_total_a(lags)?.ok_or_else(|| {
            Error::NotPositiveDefinite("A(λ) at the given multipliers".to_string())
        })?;

        let s = self.total_s(lags)?;
        let xstar = factor.solve(&s)?;
        let mut value = inner(&s, &xstar).re + self.total_c(lags)?;

        let penalty_solves = penalties
            .iter()
            .map(|v| factor.solve(v))
            .collect::<Result<Vec<_>>>()?;
        for (v, y) in penalties.iter().zip(penalty_solves.iter()) {
            value += inner(v, y).re;
        }

        if order == DerivativeOrder::Value {
            return Ok(DualEvaluation {
                value,
                gradient: None,
                hessian: None,
                xstar,
            });
        }

        let nc = self.num_constraints();

        // ∂D/∂λ_i is constraint i evaluated at x*; a_x[i] = ∂A_i x*
        let a_x = (0..nc)
            .into_par_iter()
            .map(|i| self.apply_constraint_a(i, &xstar))
            .collect::<Result<Vec<_>>>()?;
        let d_s = (0..nc)
            .into_par_iter()
            .map(|i| self.constraint_s(i))
            .collect::<Result<Vec<_>>>()?;
        let d_c = (0..nc)
            .map(|i| self.constraint_c(i))
            .collect::<Result<Vec<_>>>()?;

        let mut gradient = Array1::from_shape_fn(nc, |i| {
            -inner(&xstar, &a_x[i]).re + 2.0 * inner(&d_s[i], &xstar).re + d_c[i]
        });

        // a_y[p][i] = ∂A_i y_p for each penalty solve y_p
        let a_y = penalty_solves
            .iter()
            .map(|y| {
                (0..nc)
                    .into_par_iter()
                    .map(|i| self.apply_constraint_a(i, y))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        for (y, ay) in penalty_solves.iter().zip(a_y.iter()) {
            for i in 0..nc {
                gradient[i] -= inner(y, &ay[i]).re;
            }
        }

        if order == DerivativeOrder::Gradient {
            return Ok(DualEvaluation {
                value,
                gradient: Some(gradient),
                hessian: None,
                xstar,
            });
        }

        // H_il = 2 Re(r_i† A⁻¹ r_l) with r_i = ∂S_i - ∂A_i x*
        let residuals: Vec<ComplexArray> = d_s.iter().zip(a_x.iter()).map(|(s, ax)| s - ax).collect();
        let solved = residuals
            .par_iter()
            .map(|r| factor.solve(r))
            .collect::<Result<Vec<_>>>()?;
        let mut hessian = gram_real(&residuals, &solved);

        // Penalty Hessian 2 Re((∂A_i y)† A⁻¹ (∂A_l y))
        for ay in &a_y {
            let solved_ay = ay
                .par_iter()
                .map(|w| factor.solve(w))
                .collect::<Result<Vec<_>>>()?;
            hessian += &gram_real(ay, &solved_ay);
        }

        Ok(DualEvaluation {
            value,
            gradient: Some(gradient),
            hessian: Some(hessian),
            xstar,
        })
    }

    /// Maximizer of the Lagrangian x*(λ)
    fn get_xstar(&self, lags: &Array1<f64>) -> Result<ComplexArray> {
        Ok(self.get_dual(lags, DerivativeOrder::Value, &[])?.xstar)
    }

    /// Value of every constraint at x (zero when satisfied)
    fn compute_constraint_values(&self, x: &ComplexArray) -> Result<Array1<f64>> {
        self.check_vars(x)?;
        (0..self.num_constraints())
            .map(|i| {
                Ok(-inner(x, &self.apply_constraint_a(i, x)?).re
                    + 2.0 * inner(&self.constraint_s(i)?, x).re
                    + self.constraint_c(i)?)
            })
            .collect()
    }

    /// Primal objective -x† A0 x + 2 Re(s0† x) + c0
    fn primal_objective(&self, x: &ComplexArray) -> Result<f64> {
        self.check_vars(x)?;
        Ok(-inner(x, &self.apply_a0(x)?).re + 2.0 * inner(self.s0(), x).re + self.c0())
    }

    /// Minimize the dual over the multipliers and record the solution
    ///
    /// Starts from `init_lags` if given, else from the recorded solution when
    /// it still matches the constraints and is dual feasible, else from
    /// `find_feasible_lags`.
    fn solve_current_dual_problem(
        &mut self,
        method: DualMethod,
        init_lags: Option<Array1<f64>>,
        params: &OptParams,
    ) -> Result<DualSolution> {
        let start = match init_lags {
            Some(lags) => {
                self.check_lags(&lags)?;
                lags
            }
            None => {
                let warm = self
                    .current_solution()
                    .filter(|sol| sol.lags.len() == self.num_constraints())
                    .map(|sol| sol.lags.clone());
                match warm {
                    Some(lags) if self.is_dual_feasible(&lags)? => lags,
                    Some(_) => {
                        debug!("recorded multipliers are not dual feasible, searching again");
                        self.find_feasible_lags()?
                    }
                    None => self.find_feasible_lags()?,
                }
            }
        };

        let solution = {
            let problem = DualProblem { qcqp: &*self };
            let result = match method {
                DualMethod::Bfgs => Bfgs::new(params.clone()).run(&problem, &start)?,
                DualMethod::Newton => AltNewtonGd::new(params.clone()).run(&problem, &start)?,
            };

            let eval = self.get_dual(&result.x, DerivativeOrder::Hessian, &[])?;
            DualSolution {
                lags: result.x,
                dual: eval.value,
                grad: eval.gradient.unwrap_or_else(|| result.gradient.clone()),
                hess: eval.hessian.unwrap_or_default(),
                xstar: eval.xstar,
                iterations: result.iterations,
                converged: result.converged,
            }
        };

        info!(
            "dual solved: value = {:.8e}, constraints = {}, iterations = {}, converged = {}",
            solution.dual,
            self.num_constraints(),
            solution.iterations,
            solution.converged
        );

        self.set_current_solution(Some(solution.clone()));
        Ok(solution)
    }
}

/// Adapter exposing the dual of a QCQP to the optimizers
pub struct DualProblem<'a, Q: SharedProjQcqp> {
    /// Problem whose dual is minimized
    pub qcqp: &'a Q,
}

impl<Q: SharedProjQcqp> OptimizationProblem for DualProblem<'_, Q> {
    type Penalty = ComplexArray;

    fn evaluate(
        &self,
        x: &Array1<f64>,
        penalties: &[ComplexArray],
        order: DerivativeOrder,
    ) -> Result<Evaluation> {
        let eval = self.qcqp.get_dual(x, order, penalties)?;
        Ok(Evaluation {
            value: eval.value,
            gradient: eval.gradient,
            hessian: eval.hessian,
        })
    }

    fn is_feasible(&self, x: &Array1<f64>) -> Result<bool> {
        self.qcqp.is_dual_feasible(x)
    }

    /// A single barrier along x*(λ), which is dominated by the near-null
    /// directions of A(λ) as the boundary is approached
    fn penalties(&self, x: &Array1<f64>, weight: f64) -> Result<Vec<ComplexArray>> {
        let Some(factor) = self.qcqp.factor_total_a(x)? else {
            return Ok(Vec::new());
        };
        let xstar = factor.solve(&self.qcqp.total_s(x)?)?;
        let base = inner(&xstar, &factor.solve(&xstar)?).re;
        if !(base > 0.0 && base.is_finite()) {
            return Ok(Vec::new());
        }

        let scale = Complex64::new((weight / base).sqrt(), 0.0);
        Ok(vec![xstar.mapv(|v| v * scale)])
    }
}

/// Real symmetric matrix 2 Re(a_i† b_l), symmetrized
fn gram_real(a: &[ComplexArray], b: &[ComplexArray]) -> Array2<f64> {
    let n = a.len();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for l in i..n {
            let v = inner(&a[i], &b[l]).re + inner(&a[l], &b[i]).re;
            out[[i, l]] = v;
            out[[l, i]] = v;
        }
    }
    out
}
