//! Single-fidelity Gaussian process regression with an anisotropic
//! squared-exponential kernel and a zero prior mean.
//!
//! Hyperparameters are held in log space as `[output_scale,
//! length_scale_1..D, noise]` and exponentiated right before use so that
//! scales stay strictly positive for any real-valued vector.

use crate::errors::{GpError, Result};
use crate::kernel::squared_exponential;
use crate::optimization::{TrainingReport, train_hyperparameters};

use argmin::core::{CostFunction, Gradient};
use finitediff::FiniteDiff;
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2, s};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;

/// Diagonal addition ensuring numerical positive-definiteness; not a
/// modeling choice.
pub(crate) const JITTER: f64 = 1e-8;
/// Initial log-noise of the single-fidelity model
const LOG_NOISE_INIT: f64 = -4.;
/// Iteration cap for the likelihood minimization
const TRAIN_MAX_ITERS: u64 = 200;

const SQRT_2PI: f64 = 2.5066282746310007;

/// Cumulative distribution function of Standard Normal at x
fn norm_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// Probability density function of Standard Normal at x
fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

/// A minimal single-fidelity Gaussian process over a fixed dataset.
///
/// The lower Cholesky factor of the jittered covariance matrix is cached
/// after a successful [`nlml`](GaussianProcess::nlml) or
/// [`train`](GaussianProcess::train) call; any hyperparameter change
/// clears it, and prediction on a stale factor fails with
/// [`GpError::StaleFactorization`] instead of silently reusing it.
pub struct GaussianProcess {
    xt: Array2<f64>,
    yt: Array2<f64>,
    theta: Array1<f64>,
    factor: Option<Array2<f64>>,
}

impl GaussianProcess {
    /// Build a model over inputs `x` (n, d) and outputs `y` (n, 1) with
    /// default hyperparameters (unit scale and length-scales, log-noise -4).
    pub fn new(
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<GaussianProcess> {
        if x.nrows() == 0 {
            return Err(GpError::EmptyDataset(
                "a single-fidelity model needs at least one observation".to_string(),
            ));
        }
        if y.ncols() != 1 || y.nrows() != x.nrows() {
            return Err(GpError::InvalidValueError(format!(
                "outputs expected as a ({}, 1) column, got {:?}",
                x.nrows(),
                y.shape()
            )));
        }
        let mut theta = Array1::zeros(x.ncols() + 2);
        theta[x.ncols() + 1] = LOG_NOISE_INIT;
        Ok(GaussianProcess {
            xt: x.to_owned(),
            yt: y.to_owned(),
            theta,
            factor: None,
        })
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.xt.ncols()
    }

    /// Number of observations
    pub fn n_obs(&self) -> usize {
        self.xt.nrows()
    }

    /// Current log-space hyperparameters `[output_scale, ls_1..D, noise]`
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Replace the log-space hyperparameters, e.g. with a persisted vector.
    ///
    /// The cached factorization becomes stale and is cleared; call
    /// [`nlml`](GaussianProcess::nlml) to refresh it before predicting.
    pub fn set_theta(&mut self, theta: Array1<f64>) -> Result<()> {
        if theta.len() != self.dim() + 2 {
            return Err(GpError::InvalidValueError(format!(
                "expected {} hyperparameters, got {}",
                self.dim() + 2,
                theta.len()
            )));
        }
        self.theta = theta;
        self.factor = None;
        Ok(())
    }

    /// Negative log-marginal likelihood at `theta`; on success the
    /// hyperparameters are adopted and the Cholesky factor is cached.
    ///
    /// A factorization failure (covariance not positive definite) is fatal
    /// for this hyperparameter candidate and is not retried internally.
    pub fn nlml(&mut self, theta: &Array1<f64>) -> Result<f64> {
        let (nlml, factor) = nlml_with_factor(&self.xt, &self.yt, theta)?;
        self.theta = theta.to_owned();
        self.factor = Some(factor);
        Ok(nlml)
    }

    /// Minimize the negative log-marginal likelihood over the log-space
    /// hyperparameters, starting from the current vector.
    ///
    /// On return the model holds the best vector found and a fresh
    /// factorization; the report carries the converged-or-not status.
    pub fn train(&mut self) -> Result<TrainingReport> {
        let problem = NlmlProblem {
            xt: &self.xt,
            yt: &self.yt,
        };
        let (theta_opt, report) =
            train_hyperparameters(problem, self.theta.clone(), TRAIN_MAX_ITERS)?;
        self.nlml(&theta_opt)?;
        Ok(report)
    }

    /// Posterior mean (m, 1) and full covariance (m, m) at `x_star`.
    ///
    /// Requires a cached factorization, i.e. a prior successful
    /// [`nlml`](GaussianProcess::nlml) or [`train`](GaussianProcess::train).
    pub fn predict(
        &self,
        x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let factor = self.factor()?;
        let (scale, lengthscales, _) = self.kernel_params();

        let psi = squared_exponential(x_star, &self.xt, scale, &lengthscales);
        let z = factor.solve_triangular(&self.yt, UPLO::Lower)?;
        let alpha = factor.t().solve_triangular(&z, UPLO::Upper)?;
        let mean = psi.dot(&alpha);

        let v = factor.solve_triangular(&psi.t().to_owned(), UPLO::Lower)?;
        let beta = factor.t().solve_triangular(&v, UPLO::Upper)?;
        let cov = squared_exponential(x_star, x_star, scale, &lengthscales) - psi.dot(&beta);
        Ok((mean, cov))
    }

    /// Expected improvement acquisition (m, 1) at `x_star` against the best
    /// observed output, scaling by the posterior variance.
    ///
    /// Degenerate variance (below machine epsilon) scores 0: no improvement
    /// can be expected there and the division guard avoids a NaN.
    pub fn expected_improvement(
        &self,
        x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Array2<f64>> {
        let (mean, cov) = self.predict(x_star)?;
        let best = self.yt.iter().fold(f64::INFINITY, |acc, &v| acc.min(v));
        let mut ei = Array2::zeros((x_star.nrows(), 1));
        for i in 0..x_star.nrows() {
            let var = cov[[i, i]].abs();
            if var < f64::EPSILON {
                continue;
            }
            let improve = best - mean[[i, 0]];
            let z = improve / var;
            ei[[i, 0]] = improve * norm_cdf(z) + var * norm_pdf(z);
        }
        Ok(ei)
    }

    /// Draw `n_samples` trajectories from the zero-mean prior at `x_star`,
    /// as a (m, n_samples) array. Reproducible iff `rng` is seeded.
    pub fn sample_prior(
        &self,
        x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        n_samples: usize,
        rng: &mut impl Rng,
    ) -> Result<Array2<f64>> {
        let (scale, lengthscales, _) = self.kernel_params();
        let mut cov = squared_exponential(x_star, x_star, scale, &lengthscales);
        draw_mvn(&mut cov, None, n_samples, rng)
    }

    /// Draw `n_samples` trajectories from the posterior at `x_star`,
    /// as a (m, n_samples) array.
    pub fn sample_posterior(
        &self,
        x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        n_samples: usize,
        rng: &mut impl Rng,
    ) -> Result<Array2<f64>> {
        let (mean, mut cov) = self.predict(x_star)?;
        draw_mvn(&mut cov, Some(&mean), n_samples, rng)
    }

    fn factor(&self) -> Result<&Array2<f64>> {
        self.factor.as_ref().ok_or_else(|| {
            GpError::StaleFactorization(
                "no cached covariance factor: train the model or evaluate nlml first".to_string(),
            )
        })
    }

    /// Exponentiated kernel parameters `(output_scale, lengthscales, noise)`
    fn kernel_params(&self) -> (f64, Array1<f64>, f64) {
        let hyp = self.theta.mapv(f64::exp);
        let d = self.dim();
        (hyp[0], hyp.slice(s![1..=d]).to_owned(), hyp[d + 1])
    }
}

/// NLML and lower Cholesky factor of the noisy, jittered covariance at the
/// given log-space hyperparameters.
fn nlml_with_factor(
    xt: &Array2<f64>,
    yt: &Array2<f64>,
    theta: &Array1<f64>,
) -> Result<(f64, Array2<f64>)> {
    let n = xt.nrows();
    let d = xt.ncols();
    if theta.len() != d + 2 {
        return Err(GpError::InvalidValueError(format!(
            "expected {} hyperparameters, got {}",
            d + 2,
            theta.len()
        )));
    }
    let hyp = theta.mapv(f64::exp);
    let scale = hyp[0];
    let lengthscales = hyp.slice(s![1..=d]).to_owned();
    let noise = hyp[d + 1];

    let mut k = squared_exponential(xt, xt, scale, &lengthscales);
    for i in 0..n {
        k[[i, i]] += noise + JITTER;
    }
    let factor = k.cholesky()?;

    let z = factor.solve_triangular(yt, UPLO::Lower)?;
    let alpha = factor.t().solve_triangular(&z, UPLO::Upper)?;
    let fit = 0.5 * yt.t().dot(&alpha)[[0, 0]];
    let logdet = factor.diag().mapv(f64::ln).sum();
    let nlml = fit + logdet + 0.5 * n as f64 * (2. * std::f64::consts::PI).ln();
    Ok((nlml, factor))
}

/// Sample a multivariate normal given its covariance (consumed as scratch)
/// and optional mean column, via Cholesky of the jittered covariance.
fn draw_mvn(
    cov: &mut Array2<f64>,
    mean: Option<&Array2<f64>>,
    n_samples: usize,
    rng: &mut impl Rng,
) -> Result<Array2<f64>> {
    let n = cov.nrows();
    for i in 0..n {
        cov[[i, i]] += JITTER;
    }
    let factor = cov.cholesky()?;
    let normal: Array2<f64> = Array2::random_using((n, n_samples), StandardNormal, rng);
    let mut samples = factor.dot(&normal);
    if let Some(mean) = mean {
        samples = samples + mean;
    }
    Ok(samples)
}

/// Value-and-gradient objective handed to the local minimizer; candidates
/// whose covariance cannot be factorized score +inf and get rejected.
struct NlmlProblem<'a> {
    xt: &'a Array2<f64>,
    yt: &'a Array2<f64>,
}

impl NlmlProblem<'_> {
    fn value(&self, theta: &Array1<f64>) -> f64 {
        match nlml_with_factor(self.xt, self.yt, theta) {
            Ok((nlml, _)) => nlml,
            Err(_) => f64::INFINITY,
        }
    }
}

impl CostFunction for NlmlProblem<'_> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        Ok(self.value(theta))
    }
}

impl Gradient for NlmlProblem<'_> {
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, theta: &Self::Param) -> std::result::Result<Array1<f64>, argmin::core::Error> {
        Ok(theta.central_diff(&|t: &Array1<f64>| self.value(t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn training_data() -> (Array2<f64>, Array2<f64>) {
        (
            array![[0.0], [1.0], [2.0], [3.0], [4.0]],
            array![[0.0], [1.0], [1.5], [0.9], [1.0]],
        )
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let x = Array2::<f64>::zeros((0, 1));
        let y = Array2::<f64>::zeros((0, 1));
        assert!(matches!(
            GaussianProcess::new(&x, &y),
            Err(GpError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_predict_needs_factor() {
        let (xt, yt) = training_data();
        let gp = GaussianProcess::new(&xt, &yt).unwrap();
        assert!(matches!(
            gp.predict(&xt),
            Err(GpError::StaleFactorization(_))
        ));
    }

    #[test]
    fn test_nlml_permutation_invariance() {
        let (xt, yt) = training_data();
        let mut gp = GaussianProcess::new(&xt, &yt).unwrap();
        let theta = gp.theta().to_owned();
        let reference = gp.nlml(&theta).unwrap();

        let perm = [3, 0, 4, 1, 2];
        let xp: Array2<f64> = Array2::from_shape_fn((5, 1), |(i, j)| xt[[perm[i], j]]);
        let yp: Array2<f64> = Array2::from_shape_fn((5, 1), |(i, j)| yt[[perm[i], j]]);
        let mut gp_perm = GaussianProcess::new(&xp, &yp).unwrap();
        let permuted = gp_perm.nlml(&theta).unwrap();
        assert_abs_diff_eq!(reference, permuted, epsilon = 1e-9);
    }

    #[test]
    fn test_posterior_interpolates_training_points() {
        let (xt, yt) = training_data();
        let mut gp = GaussianProcess::new(&xt, &yt).unwrap();
        let theta = gp.theta().to_owned();
        gp.nlml(&theta).unwrap();
        let (mean, cov) = gp.predict(&xt).unwrap();
        // up to the noise level exp(-4), mean tracks the targets and the
        // posterior variance nearly vanishes at the training inputs
        for i in 0..xt.nrows() {
            assert_abs_diff_eq!(mean[[i, 0]], yt[[i, 0]], epsilon = 0.1);
            assert!(cov[[i, i]].abs() < 0.1);
        }
    }

    #[test]
    fn test_train_reduces_nlml() {
        let (xt, yt) = training_data();
        let mut gp = GaussianProcess::new(&xt, &yt).unwrap();
        let report = gp.train().unwrap();
        assert!(report.final_nlml <= report.initial_nlml + 1e-9);
        assert!(gp.predict(&xt).is_ok());
    }

    #[test]
    fn test_expected_improvement_nonnegative() {
        let (xt, yt) = training_data();
        let mut gp = GaussianProcess::new(&xt, &yt).unwrap();
        let theta = gp.theta().to_owned();
        gp.nlml(&theta).unwrap();
        let xs = array![[0.5], [2.5], [3.7]];
        let ei = gp.expected_improvement(&xs).unwrap();
        for v in ei.iter() {
            assert!(v.is_finite());
            assert!(*v >= 0.);
        }
    }

    #[test]
    fn test_set_theta_invalidates_factor() {
        let (xt, yt) = training_data();
        let mut gp = GaussianProcess::new(&xt, &yt).unwrap();
        let theta = gp.theta().to_owned();
        gp.nlml(&theta).unwrap();
        assert!(gp.predict(&xt).is_ok());
        gp.set_theta(array![0., 0.5, -3.]).unwrap();
        assert!(matches!(
            gp.predict(&xt),
            Err(GpError::StaleFactorization(_))
        ));
        assert!(gp.set_theta(array![0., 0.5]).is_err());
    }

    #[test]
    fn test_samples_reproducible_when_seeded() {
        let (xt, yt) = training_data();
        let mut gp = GaussianProcess::new(&xt, &yt).unwrap();
        let theta = gp.theta().to_owned();
        gp.nlml(&theta).unwrap();
        let xs = array![[0.25], [1.75], [3.25]];

        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let s1 = gp.sample_posterior(&xs, 4, &mut rng).unwrap();
        assert_eq!(s1.shape(), &[3, 4]);
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let s2 = gp.sample_posterior(&xs, 4, &mut rng).unwrap();
        assert_abs_diff_eq!(s1, s2, epsilon = 1e-12);

        let prior = gp.sample_prior(&xs, 2, &mut rng).unwrap();
        assert_eq!(prior.shape(), &[3, 2]);
    }
}
