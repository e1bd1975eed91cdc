//! Dual function derivatives and duality properties


use approx::assert_abs_diff_eq;
use dolphindes::cvxopt::optimization::DerivativeOrder;
use dolphindes::prelude::*;
use dolphindes::types::inner;
use ndarray::{array, Array1, Array2};
use test_utils::*;

const N: usize = 8;

#[test]
fn test_zero_multipliers_are_feasible() {
    let qcqp = dense_problem(1, N, 4);
    let lags = qcqp.find_feasible_lags().unwrap();

    assert_eq!(lags, Array1::<f64>::zeros(4));
    assert!(qcqp.is_dual_feasible(&lags).unwrap());
}

#[test]
fn test_wrong_multiplier_count() {
    let qcqp = dense_problem(1, N, 4);
    let result = qcqp.get_dual(&array![0.1, 0.2], DerivativeOrder::Value, &[]);
    assert!(matches!(result, Err(Error::Shape(_))));
}

#[test]
fn test_infeasible_multipliers() {
    let qcqp = dense_problem(1, N, 1);
    let lags = array![-1e6];

    assert!(!qcqp.is_dual_feasible(&lags).unwrap());
    assert!(matches!(
        qcqp.get_dual(&lags, DerivativeOrder::Value, &[]),
        Err(Error::NotPositiveDefinite(_))
    ));
}

#[test]
fn test_gradient_matches_finite_differences() {
    let qcqp = dense_problem(2, N, 4);
    let lags = array![0.08, -0.05, 0.1, 0.02];
    assert!(qcqp.is_dual_feasible(&lags).unwrap());

    let eval = qcqp.get_dual(&lags, DerivativeOrder::Gradient, &[]).unwrap();
    let grad = eval.gradient.unwrap();
    let dual = |l: &Array1<f64>| qcqp.get_dual(l, DerivativeOrder::Value, &[]).unwrap().value;

    for i in 0..lags.len() {
        let fd = central_difference(dual, &lags, i, 1e-6);
        assert_close!(grad[i], fd, 1e-5 * (1.0 + fd.abs()), "gradient component {}", i);
    }
}

#[test]
fn test_hessian_matches_finite_differences() {
    let qcqp = dense_problem(3, N, 4);
    let lags = array![0.05, 0.1, -0.04, 0.07];
    assert!(qcqp.is_dual_feasible(&lags).unwrap());

    let eval = qcqp.get_dual(&lags, DerivativeOrder::Hessian, &[]).unwrap();
    let hess = eval.hessian.unwrap();

    for l in 0..lags.len() {
        let grad_l = |x: &Array1<f64>| {
            qcqp.get_dual(x, DerivativeOrder::Gradient, &[])
                .unwrap()
                .gradient
                .unwrap()[l]
        };
        for i in 0..lags.len() {
            let fd = central_difference(grad_l, &lags, i, 1e-6);
            assert_close!(hess[[i, l]], fd, 1e-5 * (1.0 + fd.abs()), "hessian entry ({}, {})", i, l);
        }
    }

    // Symmetric and positive semi-definite on the diagonal
    for i in 0..lags.len() {
        assert!(hess[[i, i]] >= 0.0);
        for l in 0..lags.len() {
            assert_abs_diff_eq!(hess[[i, l]], hess[[l, i]], epsilon = 1e-12);
        }
    }
}

#[test]
fn test_penalty_derivatives_match_finite_differences() {
    let qcqp = dense_problem(4, N, 2);
    let lags = array![0.09, -0.06];
    let penalty = random_vector(&mut seeded_rng(40), N);
    let penalties = vec![penalty];

    let eval = qcqp.get_dual(&lags, DerivativeOrder::Hessian, &penalties).unwrap();
    let plain = qcqp.get_dual(&lags, DerivativeOrder::Value, &[]).unwrap();
    assert!(eval.value > plain.value);

    let grad = eval.gradient.unwrap();
    let hess = eval.hessian.unwrap();
    let value = |l: &Array1<f64>| {
        qcqp.get_dual(l, DerivativeOrder::Value, &penalties).unwrap().value
    };

    for i in 0..lags.len() {
        let fd = central_difference(value, &lags, i, 1e-6);
        assert_close!(grad[i], fd, 1e-5 * (1.0 + fd.abs()));

        for l in 0..lags.len() {
            let grad_l = |x: &Array1<f64>| {
                qcqp.get_dual(x, DerivativeOrder::Gradient, &penalties)
                    .unwrap()
                    .gradient
                    .unwrap()[l]
            };
            let fd = central_difference(grad_l, &lags, i, 1e-6);
            assert_close!(hess[[i, l]], fd, 1e-5 * (1.0 + fd.abs()));
        }
    }
}

#[test]
fn test_dual_is_lagrangian_at_xstar() {
    let qcqp = dense_problem(5, N, 4);
    let lags = array![0.1, 0.06, -0.08, 0.0];

    let eval = qcqp.get_dual(&lags, DerivativeOrder::Gradient, &[]).unwrap();
    let constraints = qcqp.compute_constraint_values(&eval.xstar).unwrap();
    let grad = eval.gradient.unwrap();
    let lagrangian = qcqp.primal_objective(&eval.xstar).unwrap() + lags.dot(&constraints);

    assert_close!(eval.value, lagrangian, 1e-9 * (1.0 + eval.value.abs()));
    for i in 0..lags.len() {
        assert_abs_diff_eq!(grad[i], constraints[i], epsilon = 1e-10);
    }
    assert_eq!(qcqp.get_xstar(&lags).unwrap(), eval.xstar);
}

#[test]
fn test_strong_duality_with_single_constraint() {
    let mut qcqp = dense_problem(6, N, 1);
    let sol = qcqp
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();

    let constraints = qcqp.compute_constraint_values(&sol.xstar).unwrap();
    let primal = qcqp.primal_objective(&sol.xstar).unwrap();

    assert!(constraints[0].abs() < 1e-5 * (1.0 + sol.dual.abs()));
    assert_close!(primal, sol.dual, 1e-5 * (1.0 + sol.dual.abs()));
    assert!(qcqp.current_solution().is_some());
}

#[test]
fn test_weak_duality_against_feasible_points() {
    let mut qcqp = dense_problem(7, N, 1);
    let sol = qcqp
        .solve_current_dual_problem(DualMethod::Bfgs, None, &OptParams::default())
        .unwrap();

    // For P = I the constraint is Re(-x† A1 x + 2 x† s1) = 0, so every
    // direction v has the feasible multiple t v with
    // t = 2 Re(v† s1) / Re(v† A1 v)
    let mut rng = seeded_rng(70);
    for _ in 0..20 {
        let v = random_vector(&mut rng, N);
        let curvature = inner(&v, &qcqp.apply_a1(&v).unwrap()).re;
        let linear = inner(&v, qcqp.s1()).re;
        let x = v.mapv(|c| c * (2.0 * linear / curvature));

        let value = qcqp.compute_constraint_values(&x).unwrap()[0];
        assert_abs_diff_eq!(value, 0.0, epsilon = 1e-9 * (1.0 + x.iter().map(|c| c.norm_sqr()).sum::<f64>()));
        assert!(qcqp.primal_objective(&x).unwrap() <= sol.dual + 1e-9 * (1.0 + sol.dual.abs()));
    }
}

#[test]
fn test_more_constraints_tighten_the_bound() {
    let mut global = dense_problem(8, N, 1);
    let mut local = dense_problem(8, N, 4);

    let global_sol = global
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();
    let local_sol = local
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();

    assert!(local_sol.dual <= global_sol.dual + 1e-4 * (1.0 + global_sol.dual.abs()));
}

#[test]
fn test_bfgs_and_newton_agree() {
    let mut bfgs = dense_problem(9, N, 4);
    let mut newton = dense_problem(9, N, 4);

    let a = bfgs
        .solve_current_dual_problem(DualMethod::Bfgs, None, &tight_params())
        .unwrap();
    let b = newton
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();

    assert_close!(a.dual, b.dual, 1e-4 * (1.0 + b.dual.abs()));
}

#[test]
fn test_warm_start_from_recorded_solution() {
    let mut qcqp = dense_problem(10, N, 2);
    let first = qcqp
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();
    let second = qcqp
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();

    assert!(second.dual <= first.dual + 1e-12 * first.dual.abs());
}

/// A0 = diag(-1, 2), A1 = ±I, s0 = s1 = e1: A(λ) = diag(-1 ± λ, 2 ± λ)
fn shifted_problem(a1_sign: f64) -> DenseSharedProjQcqp {
    let c = |re: f64| Complex64::new(re, 0.0);
    DenseSharedProjQcqp::new(
        Array2::from_diag(&array![c(-1.0), c(2.0)]),
        array![c(1.0), c(0.0)],
        0.0,
        Array2::from_diag(&array![c(a1_sign), c(a1_sign)]),
        None,
        array![c(1.0), c(0.0)],
        Array2::ones((2, 1)),
    )
    .unwrap()
}

fn shifted_sparse_problem(a1_sign: f64) -> SparseSharedProjQcqp {
    let c = |re: f64| Complex64::new(re, 0.0);
    SparseSharedProjQcqp::new(
        to_sparse(&Array2::from_diag(&array![c(-1.0), c(2.0)])),
        array![c(1.0), c(0.0)],
        0.0,
        to_sparse(&Array2::from_diag(&array![c(a1_sign), c(a1_sign)])),
        None,
        array![c(1.0), c(0.0)],
        Array2::ones((2, 1)),
    )
    .unwrap()
}

#[test]
fn test_feasibility_search_shifts_indefinite_a0() {
    let dense = shifted_problem(1.0);
    let sparse = shifted_sparse_problem(1.0);

    // λ = 1 only reaches the singular diag(0, 3); the first doubling succeeds
    assert!(!dense.is_dual_feasible(&array![0.0]).unwrap());
    assert!(!dense.is_dual_feasible(&array![1.0]).unwrap());
    assert_eq!(dense.find_feasible_lags().unwrap(), array![2.0]);
    assert_eq!(sparse.find_feasible_lags().unwrap(), array![2.0]);
}

#[test]
fn test_feasibility_search_tries_negative_multipliers() {
    let dense = shifted_problem(-1.0);
    let sparse = shifted_sparse_problem(-1.0);

    assert_eq!(dense.find_feasible_lags().unwrap(), array![-2.0]);
    assert_eq!(sparse.find_feasible_lags().unwrap(), array![-2.0]);
}

#[test]
fn test_feasibility_search_reports_infeasible_start() {
    let c = |re: f64| Complex64::new(re, 0.0);
    let minus_eye = Array2::from_diag(&array![c(-1.0), c(-1.0)]);

    // No projection constraint to shift an indefinite A0 with
    let unconstrained = DenseSharedProjQcqp::new(
        minus_eye.clone(),
        array![c(1.0), c(0.0)],
        0.0,
        Array2::from_diag(&array![c(1.0), c(1.0)]),
        None,
        array![c(1.0), c(0.0)],
        Array2::zeros((2, 0)),
    )
    .unwrap();
    assert!(matches!(
        unconstrained.find_feasible_lags(),
        Err(Error::InfeasibleStart(_))
    ));

    // A(λ) = diag(-1 + λ, -1 - λ) is never positive definite
    let never = DenseSharedProjQcqp::new(
        minus_eye,
        array![c(1.0), c(0.0)],
        0.0,
        Array2::from_diag(&array![c(1.0), c(-1.0)]),
        None,
        array![c(1.0), c(0.0)],
        Array2::ones((2, 1)),
    )
    .unwrap();
    assert!(matches!(never.find_feasible_lags(), Err(Error::InfeasibleStart(_))));
    let mut never = never;
    assert!(matches!(
        never.solve_current_dual_problem(DualMethod::Newton, None, &tight_params()),
        Err(Error::InfeasibleStart(_))
    ));
}

#[test]
fn test_dual_of_shifted_problem() {
    // D(λ) = (1 + λ)² / (λ - 1) is minimized at λ = 3 with D = 8, which the
    // feasible point x = (2, 0) attains
    let mut dense = shifted_problem(1.0);
    let mut sparse = shifted_sparse_problem(1.0);

    for method in [DualMethod::Newton, DualMethod::Bfgs] {
        let d = dense.solve_current_dual_problem(method, None, &tight_params()).unwrap();
        let s = sparse.solve_current_dual_problem(method, None, &tight_params()).unwrap();

        assert_close!(d.dual, 8.0, 1e-5);
        assert_close!(s.dual, 8.0, 1e-5);
        assert_close!(d.lags[0], 3.0, 1e-2);
        assert!(d.dual >= 8.0 - 1e-9);
    }

    let c = |re: f64| Complex64::new(re, 0.0);
    let x = array![c(2.0), c(0.0)];
    assert_abs_diff_eq!(dense.compute_constraint_values(&x).unwrap()[0], 0.0, epsilon = 1e-14);
    assert_abs_diff_eq!(dense.primal_objective(&x).unwrap(), 8.0, epsilon = 1e-14);
}

#[test]
fn test_wrong_length_inputs_are_rejected() {
    let dense = dense_problem(11, N, 2);
    let sparse = sparse_problem(11, N, 2);
    let short_lags = array![0.1];
    let short_x = random_vector(&mut seeded_rng(110), N - 1);
    let lags = array![0.0, 0.0];

    assert!(matches!(dense.total_s(&short_lags), Err(Error::Shape(_))));
    assert!(matches!(dense.total_c(&short_lags), Err(Error::Shape(_))));
    assert!(matches!(dense.total_a(&short_lags), Err(Error::Shape(_))));
    assert!(matches!(sparse.total_a(&short_lags), Err(Error::Shape(_))));
    assert!(matches!(sparse.total_s(&short_lags), Err(Error::Shape(_))));

    assert!(matches!(dense.compute_constraint_values(&short_x), Err(Error::Shape(_))));
    assert!(matches!(sparse.compute_constraint_values(&short_x), Err(Error::Shape(_))));
    assert!(matches!(dense.primal_objective(&short_x), Err(Error::Shape(_))));
    assert!(matches!(dense.apply_constraint_a(0, &short_x), Err(Error::Shape(_))));
    assert!(matches!(
        dense.apply_constraint_a(5, &random_vector(&mut seeded_rng(111), N)),
        Err(Error::InvalidInput(_))
    ));

    let short_penalty = vec![short_x];
    assert!(matches!(
        dense.get_dual(&lags, DerivativeOrder::Gradient, &short_penalty),
        Err(Error::Shape(_))
    ));
    assert!(matches!(
        sparse.get_dual(&lags, DerivativeOrder::Gradient, &short_penalty),
        Err(Error::Shape(_))
    ));
}

#[test]
fn test_set_pdiags_clears_recorded_solution() {
    let mut qcqp = dense_problem(12, N, 2);
    qcqp.solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();
    assert!(qcqp.current_solution().is_some());

    qcqp.set_pdiags(region_projectors(N, 2).mapv(|v| v * 2.0)).unwrap();
    assert!(qcqp.current_solution().is_none());

    let sol = qcqp
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();
    assert_eq!(sol.lags.len(), 2);
}

#[test]
fn test_infeasible_recorded_solution_is_not_reused() {
    let mut fresh = dense_problem(13, N, 1);
    let expected = fresh
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();

    let mut qcqp = dense_problem(13, N, 1);
    qcqp.set_current_solution(Some(DualSolution {
        lags: array![-1e6],
        dual: 0.0,
        grad: Array1::zeros(1),
        hess: Array2::zeros((1, 1)),
        xstar: ComplexArray::zeros(N),
        iterations: 0,
        converged: false,
    }));
    assert!(!qcqp.is_dual_feasible(&array![-1e6]).unwrap());

    let sol = qcqp
        .solve_current_dual_problem(DualMethod::Newton, None, &tight_params())
        .unwrap();
    assert_close!(sol.dual, expected.dual, 1e-6 * (1.0 + expected.dual.abs()));
}
