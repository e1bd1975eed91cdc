//! Dual bound on a synthetic shared-projection QCQP
//!
//! Builds a banded problem on a 1D grid, splits the grid into regions whose
//! projectors form the initial constraint set, and refines the bound with
//! generalized constraint descent.

use clap::{Parser, ValueEnum};
use dolphindes::prelude::*;
use log::{info, LevelFilter};
use ndarray::{Array2, IxDyn};
use rand::prelude::*;
use rand_distr::{Normal, Uniform};
use sprs::{CsMat, TriMat};
use std::fs;
use std::process::ExitCode;

/// Command-line arguments for the dual bound run
#[derive(Parser, Debug)]
#[command(name = "dual_bound")]
#[command(about = "Dual bound of a synthetic shared-projection QCQP via GCD", long_about = None)]
struct Args {
    /// Number of grid points (primal variables)
    #[arg(long, default_value_t = 64)]
    size: usize,

    /// Number of regions in the initial constraint set
    #[arg(long, default_value_t = 4)]
    num_regions: usize,

    /// Maximum number of projection constraints kept by GCD
    #[arg(long, default_value_t = 10)]
    max_proj: usize,

    /// Dual optimizer
    #[arg(long, value_enum, default_value_t = Method::Bfgs)]
    method: Method,

    /// Random seed for the synthetic problem
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Maximum number of GCD iterations
    #[arg(long, default_value_t = 20)]
    gcd_iters: usize,

    /// Store the operators densely instead of as sparse matrices
    #[arg(long, default_value_t = false)]
    dense: bool,

    /// JSON file with GCD parameters (command-line values take precedence)
    #[arg(long)]
    params: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Method {
    Bfgs,
    Newton,
}

impl From<Method> for DualMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Bfgs => DualMethod::Bfgs,
            Method::Newton => DualMethod::Newton,
        }
    }
}

/// Operators of the synthetic problem
struct Synthetic {
    a0: CsMat<Complex64>,
    s0: ComplexArray,
    a1: CsMat<Complex64>,
    s1: ComplexArray,
    pdiags: Array2<Complex64>,
}

impl Synthetic {
    /// Diagonally dominant tridiagonal A1 (a damped 1D Laplacian with random
    /// coupling phases), positive diagonal A0 and random sources
    fn new(size: usize, num_regions: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.5_f64.sqrt())
            .map_err(|e| Error::InvalidInput(format!("bad source distribution: {e}")))?;
        let unit = Uniform::new(0.0, 1.0);

        let mut a0 = TriMat::new((size, size));
        let mut a1 = TriMat::new((size, size));
        for i in 0..size {
            a0.add_triplet(i, i, Complex64::new(0.5 + rng.sample(unit), 0.0));
            a1.add_triplet(i, i, Complex64::new(2.5 + 0.5 * rng.sample(unit), 0.0));
            if i + 1 < size {
                let coupling = Complex64::new(-1.0, 0.2 * rng.sample(unit));
                a1.add_triplet(i, i + 1, coupling);
                a1.add_triplet(i + 1, i, coupling.conj());
            }
        }

        let random_vector = |rng: &mut StdRng| -> ComplexArray {
            (0..size)
                .map(|_| Complex64::new(rng.sample(normal), rng.sample(normal)))
                .collect()
        };
        let s0 = random_vector(&mut rng);
        let s1 = random_vector(&mut rng);

        let mut pdiags = Array2::zeros((size, num_regions));
        for r in 0..num_regions {
            let (start, end) = (r * size / num_regions, (r + 1) * size / num_regions);
            let mask = BoolGrid::from_shape_fn(IxDyn(&[size]), |idx| idx[0] >= start && idx[0] < end);
            pdiags.column_mut(r).assign(&mask_to_projector(&mask));
        }

        Ok(Self {
            a0: a0.to_csc(),
            s0,
            a1: a1.to_csc(),
            s1,
            pdiags,
        })
    }
}

fn gcd_params(args: &Args) -> Result<GcdParams> {
    let mut params = match &args.params {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| Error::InvalidInput(format!("cannot read {path}: {e}")))?;
            GcdParams::from_json(&json)?
        }
        None => GcdParams::default(),
    };
    params.max_proj_cstrt_num = args.max_proj;
    params.max_gcd_iter_num = args.gcd_iters;
    params.method = args.method.into();
    params.validate()?;
    Ok(params)
}

fn run(args: &Args) -> Result<GcdResult> {
    if args.size == 0 || args.num_regions == 0 || args.num_regions > args.size {
        return Err(Error::InvalidInput(format!(
            "need 1 <= num_regions <= size, got {} regions on {} points",
            args.num_regions, args.size
        )));
    }

    let params = gcd_params(args)?;
    let problem = Synthetic::new(args.size, args.num_regions, args.seed)?;
    info!(
        "synthetic problem: {} points, {} regions, seed {}",
        args.size, args.num_regions, args.seed
    );

    if args.dense {
        let a0 = SparseDense::from(problem.a0).to_dense();
        let a1 = SparseDense::from(problem.a1).to_dense();
        let mut qcqp =
            DenseSharedProjQcqp::new(a0, problem.s0, 0.0, a1, None, problem.s1, problem.pdiags)?;
        run_gcd(&mut qcqp, &params)
    } else {
        let mut qcqp = SparseSharedProjQcqp::new(
            problem.a0,
            problem.s0,
            0.0,
            problem.a1,
            None,
            problem.s1,
            problem.pdiags,
        )?;
        run_gcd(&mut qcqp, &params)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Warn)
        .parse_env(env_logger::Env::default().filter_or("DOLPHINDES_LOG", "warn,dolphindes=info"))
        .init();
    let args = Args::parse();

    println!("\nShared-Projection QCQP Dual Bound");
    println!("=================================\n");
    println!("  Grid points: {}", args.size);
    println!("  Initial regions: {}", args.num_regions);
    println!("  Max projection constraints: {}", args.max_proj);
    println!("  Method: {:?}", args.method);
    println!("  Storage: {}", if args.dense { "dense" } else { "sparse" });
    println!();

    match run(&args) {
        Ok(result) => {
            println!("GCD history:");
            for (i, dual) in result.dual_history.iter().enumerate() {
                println!("  {:3}  {:.10e}", i, dual);
            }
            println!(
                "\n{} after {} iterations",
                if result.converged { "Converged" } else { "Stopped" },
                result.iterations
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
