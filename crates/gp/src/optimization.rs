//! Optimization services used by the GP models: a gradient-based local
//! minimizer for hyperparameter training and a derivative-free global
//! minimizer for acquisition queries over a box domain.

use crate::errors::{GpError, Result};
use ndarray::{Array1, Array2, Axis, s};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

/// Memory length of the L-BFGS inverse Hessian approximation
const LBFGS_MEMORY: usize = 7;
/// Random candidates per input dimension for the global search
const GLOBAL_N_POINTS: usize = 100;
/// Number of best candidates refined with a local bounded optimizer
const GLOBAL_N_START: usize = 10;
/// Max objective evaluations per local refinement
const GLOBAL_MAX_EVAL: usize = 200;

/// Outcome of a hyperparameter training run.
///
/// Non-convergence of the local minimizer is not an error: the best
/// parameters found so far are kept and the caller decides whether the
/// report is acceptable.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Negative log-marginal likelihood at the initial hyperparameters
    pub initial_nlml: f64,
    /// Negative log-marginal likelihood at the returned hyperparameters
    pub final_nlml: f64,
    /// Number of optimizer iterations performed
    pub iterations: u64,
    /// Whether the optimizer reported proper convergence
    pub converged: bool,
}

/// Minimize the negative log-marginal likelihood over log-space
/// hyperparameters with L-BFGS fed by the value-and-gradient `problem`.
///
/// Returns the best parameter vector seen together with a report; the
/// report never hides non-convergence behind a silently accepted result.
pub(crate) fn train_hyperparameters<O>(
    problem: O,
    theta0: Array1<f64>,
    max_iters: u64,
) -> Result<(Array1<f64>, TrainingReport)>
where
    O: CostFunction<Param = Array1<f64>, Output = f64>
        + Gradient<Param = Array1<f64>, Gradient = Array1<f64>>,
{
    let initial_nlml = problem.cost(&theta0)?;
    if !initial_nlml.is_finite() {
        return Err(GpError::LikelihoodError(
            "initial hyperparameters give a non-finite likelihood".to_string(),
        ));
    }

    let linesearch: MoreThuenteLineSearch<Array1<f64>, Array1<f64>, f64> =
        MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, LBFGS_MEMORY);
    let init = theta0.clone();
    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(max_iters))
        .run()?;

    let state = res.state();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    let theta_opt = state.get_best_param().cloned().unwrap_or(theta0);
    let report = TrainingReport {
        initial_nlml,
        final_nlml: state.get_best_cost(),
        iterations: state.get_iter(),
        converged,
    };
    log::debug!(
        "hyperparameter training: nlml {} -> {} in {} iterations (converged: {})",
        report.initial_nlml,
        report.final_nlml,
        report.iterations,
        report.converged
    );
    Ok((theta_opt, report))
}

/// Global derivative-free minimization of `objfn` within the axis-aligned
/// box `xlimits` given as a (d, 2) array of `[lower, upper]` rows.
///
/// A uniform random population is scored in bulk, then the best seeds are
/// refined with bound-constrained COBYLA; the overall best `(f, x)` pair
/// is returned. Deterministic under a seeded `rng`.
pub(crate) fn minimize_within<F, R>(
    objfn: &F,
    xlimits: &Array2<f64>,
    rng: &mut R,
) -> Result<(f64, Array1<f64>)>
where
    F: Fn(&[f64]) -> f64,
    R: Rng,
{
    let dim = xlimits.nrows();
    if dim == 0 || xlimits.ncols() != 2 {
        return Err(GpError::InvalidValueError(format!(
            "search bounds expected as a (d, 2) array, got {:?}",
            xlimits.shape()
        )));
    }
    for row in xlimits.rows() {
        if !(row[0] < row[1]) {
            return Err(GpError::InvalidValueError(format!(
                "degenerate search bounds [{}, {}]",
                row[0], row[1]
            )));
        }
    }

    // Randomized initial population mapped onto the box
    let n = GLOBAL_N_POINTS * dim;
    let mut doe = Array2::random_using((n, dim), Uniform::new(0., 1.), rng);
    for (j, bounds) in xlimits.rows().into_iter().enumerate() {
        let (lo, up) = (bounds[0], bounds[1]);
        doe.slice_mut(s![.., j]).mapv_inplace(|u| lo + u * (up - lo));
    }
    let scores = doe.map_axis(Axis(1), |x| objfn(&x.to_vec()));

    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Greater)
    });

    let bounds: Vec<(f64, f64)> = xlimits.rows().into_iter().map(|r| (r[0], r[1])).collect();
    let rhobeg = bounds
        .iter()
        .map(|(lo, up)| up - lo)
        .fold(f64::INFINITY, f64::min)
        / 10.;

    let mut best_f = scores[ranked[0]];
    let mut best_x = doe.row(ranked[0]).to_owned();
    for &seed in ranked.iter().take(GLOBAL_N_START) {
        if !scores[seed].is_finite() {
            continue;
        }
        let x0 = doe.row(seed).to_vec();
        let cons: Vec<&dyn cobyla::Func<()>> = vec![];
        match cobyla::minimize(
            |x, _u| objfn(x),
            &x0,
            &bounds,
            &cons,
            (),
            GLOBAL_MAX_EVAL,
            cobyla::RhoBeg::All(rhobeg),
            Some(cobyla::StopTols {
                ftol_rel: 1e-4,
                ..cobyla::StopTols::default()
            }),
        ) {
            Ok((_, x_opt, fval)) => {
                if fval.is_finite() && fval < best_f {
                    best_f = fval;
                    best_x = Array1::from_vec(x_opt);
                }
            }
            Err((status, _, _)) => {
                log::debug!("COBYLA refinement rejected (status: {status:?})");
            }
        }
    }
    Ok((best_f, best_x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    struct Quadratic;

    impl CostFunction for Quadratic {
        type Param = Array1<f64>;
        type Output = f64;

        fn cost(&self, p: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
            Ok(p.iter().map(|v| (v - 3.) * (v - 3.)).sum())
        }
    }

    impl Gradient for Quadratic {
        type Param = Array1<f64>;
        type Gradient = Array1<f64>;

        fn gradient(
            &self,
            p: &Self::Param,
        ) -> std::result::Result<Array1<f64>, argmin::core::Error> {
            Ok(p.mapv(|v| 2. * (v - 3.)))
        }
    }

    struct Rosenbrock;

    impl CostFunction for Rosenbrock {
        type Param = Array1<f64>;
        type Output = f64;

        fn cost(&self, p: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
            let (x, y) = (p[0], p[1]);
            Ok((1. - x) * (1. - x) + 100. * (y - x * x) * (y - x * x))
        }
    }

    impl Gradient for Rosenbrock {
        type Param = Array1<f64>;
        type Gradient = Array1<f64>;

        fn gradient(
            &self,
            p: &Self::Param,
        ) -> std::result::Result<Array1<f64>, argmin::core::Error> {
            let (x, y) = (p[0], p[1]);
            Ok(array![
                -2. * (1. - x) - 400. * x * (y - x * x),
                200. * (y - x * x)
            ])
        }
    }

    struct AlwaysInf;

    impl CostFunction for AlwaysInf {
        type Param = Array1<f64>;
        type Output = f64;

        fn cost(&self, _p: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
            Ok(f64::INFINITY)
        }
    }

    impl Gradient for AlwaysInf {
        type Param = Array1<f64>;
        type Gradient = Array1<f64>;

        fn gradient(
            &self,
            p: &Self::Param,
        ) -> std::result::Result<Array1<f64>, argmin::core::Error> {
            Ok(Array1::zeros(p.len()))
        }
    }

    #[test]
    fn test_training_converges_on_quadratic() {
        let (theta, report) = train_hyperparameters(Quadratic, array![0., 0.], 100).unwrap();
        assert!(report.converged);
        assert_abs_diff_eq!(theta, array![3., 3.], epsilon = 1e-4);
        assert!(report.final_nlml < report.initial_nlml);
    }

    #[test]
    fn test_training_report_flags_iteration_cap() {
        // one iteration cannot reach the Rosenbrock minimum from here
        let (theta, report) = train_hyperparameters(Rosenbrock, array![-1.2, 1.], 1).unwrap();
        assert!(!report.converged);
        assert_eq!(report.iterations, 1);
        assert_eq!(theta.len(), 2);
        assert!(report.final_nlml <= report.initial_nlml);
    }

    #[test]
    fn test_training_rejects_non_finite_start() {
        assert!(matches!(
            train_hyperparameters(AlwaysInf, array![0.], 10),
            Err(GpError::LikelihoodError(_))
        ));
    }

    #[test]
    fn test_global_min_sphere() {
        let obj = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>();
        let xlimits = array![[-2., 3.], [-1., 4.]];
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let (fmin, xmin) = minimize_within(&obj, &xlimits, &mut rng).unwrap();
        assert_abs_diff_eq!(xmin, array![0., 0.], epsilon = 0.2);
        assert!(fmin < 0.1);
    }

    #[test]
    fn test_global_respects_bounds() {
        // minimum of a linear slope sits on the lower-left corner
        let obj = |x: &[f64]| x[0] + x[1];
        let xlimits = array![[-1., 1.], [-1., 1.]];
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let (_, xmin) = minimize_within(&obj, &xlimits, &mut rng).unwrap();
        assert!(xmin.iter().all(|&v| (-1. - 1e-6..=1. + 1e-6).contains(&v)));
        assert!(xmin[0] < -0.5 && xmin[1] < -0.5);
    }

    #[test]
    fn test_bad_bounds_rejected() {
        let obj = |x: &[f64]| x[0];
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        assert!(minimize_within(&obj, &array![[1., -1.]], &mut rng).is_err());
        assert!(minimize_within(&obj, &Array2::zeros((0, 2)), &mut rng).is_err());
    }
}
