//! Two-level multi-fidelity Gaussian process regression following the
//! autoregressive (Kennedy-O'Hagan) formulation: the high-fidelity process
//! is a scaled copy of the low-fidelity one plus an independent
//! discrepancy process,
//!
//! `f_hi(x) = rho * f_lo(x) + delta_hi(x)`
//!
//! Both processes use an isotropic squared-exponential kernel. The joint
//! covariance over the combined dataset ordered `[low rows; high rows]` is
//! factorized once per data/hyperparameter change and cached; predictions
//! are for the high-fidelity process.

use crate::errors::{GpError, Result};
use crate::kernel::squared_exponential_iso;
use crate::optimization::{TrainingReport, minimize_within, train_hyperparameters};
use crate::single_fidelity::JITTER;

use argmin::core::{CostFunction, Gradient};
use finitediff::FiniteDiff;
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2, concatenate, s};
use ndarray_rand::rand::Rng;

/// Number of log-space hyperparameters of the two-level model
pub const N_THETA: usize = 9;
/// Slots of the low-fidelity kernel block `[mean, scale, length]`
pub const IDX_THETA_LO: std::ops::Range<usize> = 0..3;
/// Slots of the high-fidelity kernel block `[mean, scale, length]`
pub const IDX_THETA_HI: std::ops::Range<usize> = 3..6;
/// Slot of the cross-fidelity correlation coefficient
pub const IDX_RHO: usize = 6;
/// Slot of the low-fidelity noise
pub const IDX_NOISE_LO: usize = 7;
/// Slot of the high-fidelity noise
pub const IDX_NOISE_HI: usize = 8;

/// Iteration cap for the likelihood minimization
const TRAIN_MAX_ITERS: u64 = 200;

/// Exponentiated (natural-space) view of the 9 log-space hyperparameters.
///
/// Exponentiation keeps every scale, length and noise strictly positive
/// for any real-valued log vector.
#[derive(Debug, Clone, Copy)]
pub struct MfHyperparams {
    /// Low-fidelity process mean
    pub mean_lo: f64,
    /// Low-fidelity kernel variance
    pub scale_lo: f64,
    /// Low-fidelity kernel length-scale (shared across dimensions)
    pub length_lo: f64,
    /// Discrepancy process mean
    pub mean_hi: f64,
    /// Discrepancy kernel variance
    pub scale_hi: f64,
    /// Discrepancy kernel length-scale
    pub length_hi: f64,
    /// Cross-fidelity correlation coefficient
    pub rho: f64,
    /// Low-fidelity observation noise
    pub noise_lo: f64,
    /// High-fidelity observation noise
    pub noise_hi: f64,
}

impl MfHyperparams {
    /// Exponentiate a log-space vector into its natural-space view.
    pub fn from_log(theta: &Array1<f64>) -> MfHyperparams {
        let hyp = theta.mapv(f64::exp);
        MfHyperparams {
            mean_lo: hyp[0],
            scale_lo: hyp[1],
            length_lo: hyp[2],
            mean_hi: hyp[3],
            scale_hi: hyp[4],
            length_hi: hyp[5],
            rho: hyp[IDX_RHO],
            noise_lo: hyp[IDX_NOISE_LO],
            noise_hi: hyp[IDX_NOISE_HI],
        }
    }

    /// Effective mean of the high-fidelity process,
    /// `rho * mean_lo + mean_hi`.
    pub fn high_mean(&self) -> f64 {
        self.rho * self.mean_lo + self.mean_hi
    }

    /// Prior variance of the high-fidelity process,
    /// `rho^2 * scale_lo + scale_hi`.
    pub fn high_prior_variance(&self) -> f64 {
        self.rho * self.rho * self.scale_lo + self.scale_hi
    }
}

/// A two-level multi-fidelity Gaussian process.
///
/// Either fidelity dataset may be empty (including both, in which case the
/// posterior is the prior). Datasets are append-only through
/// [`update`](MultiFidelityGp::update); every mutating operation leaves
/// the model fully consistent or fails without partial effects.
pub struct MultiFidelityGp {
    x_lo: Array2<f64>,
    y_lo: Array2<f64>,
    x_hi: Array2<f64>,
    y_hi: Array2<f64>,
    theta: Array1<f64>,
    factor: Option<Array2<f64>>,
    dim: usize,
}

impl MultiFidelityGp {
    /// Build a model over the paired datasets; `x_*` are (n, d), `y_*` are
    /// (n, 1) and `n` may be zero independently per fidelity.
    ///
    /// Initial log-space hyperparameters are
    /// `[0, 1, 6, 0, 1, 6, 1, 0.01, 0.01]`; the length-scale slots are set
    /// to 6 as a domain-informed prior.
    pub fn new(
        x_lo: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y_lo: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        x_hi: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y_hi: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<MultiFidelityGp> {
        let dim = x_hi.ncols().max(x_lo.ncols());
        if x_lo.nrows() > 0 && x_lo.ncols() != dim || x_hi.nrows() > 0 && x_hi.ncols() != dim {
            return Err(GpError::InvalidValueError(format!(
                "fidelity levels disagree on input dimension: {} vs {}",
                x_lo.ncols(),
                x_hi.ncols()
            )));
        }
        check_paired(x_lo, y_lo, "low")?;
        check_paired(x_hi, y_hi, "high")?;

        let mut theta = Array1::zeros(N_THETA);
        theta[1] = 1.;
        theta[2] = 6.;
        theta[4] = 1.;
        theta[5] = 6.;
        theta[IDX_RHO] = 1.;
        theta[IDX_NOISE_LO] = 0.01;
        theta[IDX_NOISE_HI] = 0.01;

        Ok(MultiFidelityGp {
            x_lo: to_shaped(x_lo, dim),
            y_lo: to_shaped(y_lo, 1),
            x_hi: to_shaped(x_hi, dim),
            y_hi: to_shaped(y_hi, 1),
            theta,
            factor: None,
            dim,
        })
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of low-fidelity observations
    pub fn n_lo(&self) -> usize {
        self.x_lo.nrows()
    }

    /// Number of high-fidelity observations
    pub fn n_hi(&self) -> usize {
        self.x_hi.nrows()
    }

    /// Current log-space hyperparameter vector
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Natural-space view of the current hyperparameters
    pub fn hyperparams(&self) -> MfHyperparams {
        MfHyperparams::from_log(&self.theta)
    }

    /// Replace the log-space hyperparameters, e.g. with a persisted vector.
    ///
    /// The cached joint factorization becomes stale and is cleared; call
    /// [`update`](MultiFidelityGp::update) (possibly with empty batches) or
    /// [`nlml`](MultiFidelityGp::nlml) to refresh it.
    pub fn set_theta(&mut self, theta: Array1<f64>) -> Result<()> {
        if theta.len() != N_THETA {
            return Err(GpError::InvalidValueError(format!(
                "expected {} hyperparameters, got {}",
                N_THETA,
                theta.len()
            )));
        }
        self.theta = theta;
        self.factor = None;
        Ok(())
    }

    /// Negative log-marginal likelihood of the joint dataset at `theta`;
    /// on success the hyperparameters are adopted and the joint Cholesky
    /// factor is cached.
    ///
    /// Fails with [`GpError::EmptyDataset`] when the model holds no
    /// observation at all, which is distinct from a factorization failure.
    pub fn nlml(&mut self, theta: &Array1<f64>) -> Result<f64> {
        let (nlml, factor) =
            nlml_with_factor(&self.x_lo, &self.y_lo, &self.x_hi, &self.y_hi, theta)?;
        self.theta = theta.to_owned();
        self.factor = Some(factor);
        Ok(nlml)
    }

    /// Minimize the negative log-marginal likelihood over the 9 log-space
    /// hyperparameters, starting from the current vector.
    pub fn train(&mut self) -> Result<TrainingReport> {
        if self.n_lo() + self.n_hi() == 0 {
            return Err(GpError::EmptyDataset(
                "cannot train a model without observations".to_string(),
            ));
        }
        let problem = MfNlmlProblem {
            x_lo: &self.x_lo,
            y_lo: &self.y_lo,
            x_hi: &self.x_hi,
            y_hi: &self.y_hi,
        };
        let (theta_opt, report) =
            train_hyperparameters(problem, self.theta.clone(), TRAIN_MAX_ITERS)?;
        self.nlml(&theta_opt)?;
        Ok(report)
    }

    /// Append new observations per fidelity (empty batches allowed) and
    /// recompute the joint factorization at the current hyperparameters.
    ///
    /// Does not re-optimize hyperparameters. Must be called after every
    /// batch of observations, before any dependent prediction or query.
    pub fn update(
        &mut self,
        x_lo_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y_lo_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        x_hi_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y_hi_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<()> {
        check_paired(x_lo_new, y_lo_new, "low")?;
        check_paired(x_hi_new, y_hi_new, "high")?;
        let (x_lo, y_lo) = self.appended(&self.x_lo, &self.y_lo, x_lo_new, y_lo_new)?;
        let (x_hi, y_hi) = self.appended(&self.x_hi, &self.y_hi, x_hi_new, y_hi_new)?;

        // factor first: data are committed only on success
        let factor = if x_lo.nrows() + x_hi.nrows() > 0 {
            let hyp = self.hyperparams();
            Some(joint_factor(&x_lo, &x_hi, &hyp)?)
        } else {
            None
        };
        self.x_lo = x_lo;
        self.y_lo = y_lo;
        self.x_hi = x_hi;
        self.y_hi = y_hi;
        self.factor = factor;
        Ok(())
    }

    /// Posterior mean (m, 1) and full covariance (m, m) of the
    /// high-fidelity process at `x_star`.
    ///
    /// With zero observations the posterior reduces to the prior; otherwise
    /// a cached factorization is required.
    pub fn predict(
        &self,
        x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let hyp = self.hyperparams();
        let prior = prior_covariance(x_star, &hyp);
        if self.n_lo() + self.n_hi() == 0 {
            let mean = Array2::from_elem((x_star.nrows(), 1), hyp.high_mean());
            return Ok((mean, prior));
        }
        let factor = self.factor()?;

        let psi = cross_covariance(x_star, &self.x_lo, &self.x_hi, &hyp);
        let y = demeaned_outputs(&self.y_lo, &self.y_hi, &hyp);
        let z = factor.solve_triangular(&y, UPLO::Lower)?;
        let alpha = factor.t().solve_triangular(&z, UPLO::Upper)?;
        let mean = psi.dot(&alpha) + hyp.high_mean();

        let v = factor.solve_triangular(&psi.t().to_owned(), UPLO::Lower)?;
        let beta = factor.t().solve_triangular(&v, UPLO::Upper)?;
        let cov = prior - psi.dot(&beta);
        Ok((mean, cov))
    }

    /// Hypothetical posterior variance at the single point `x` if the
    /// candidate batches were committed to the dataset.
    ///
    /// Scores a what-if scenario over a scratch factorization; the stored
    /// dataset and factorization are left untouched.
    pub fn what_if_variance(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        x_lo_cand: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        x_hi_cand: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<f64> {
        if x.len() != self.dim {
            return Err(GpError::InvalidValueError(format!(
                "candidate point has dimension {}, expected {}",
                x.len(),
                self.dim
            )));
        }
        let hyp = self.hyperparams();
        let x_row = x.view().insert_axis(Axis(0));
        let x_lo = append_rows(&self.x_lo, x_lo_cand)?;
        let x_hi = append_rows(&self.x_hi, x_hi_cand)?;

        let prior = prior_covariance(&x_row, &hyp)[[0, 0]];
        if x_lo.nrows() + x_hi.nrows() == 0 {
            return Ok(prior);
        }
        let factor = joint_factor(&x_lo, &x_hi, &hyp)?;
        let psi = cross_covariance(&x_row, &x_lo, &x_hi, &hyp);
        let v = factor.solve_triangular(&psi.t().to_owned(), UPLO::Lower)?;
        let beta = factor.t().solve_triangular(&v, UPLO::Upper)?;
        Ok(prior - psi.dot(&beta)[[0, 0]])
    }

    /// Active-learning acquisition at `x`: 0 when the upper confidence
    /// bound `mean + c * var` already sits at or below `threshold` (the
    /// point is resolved below the boundary with confidence), otherwise the
    /// negated what-if variance so that minimizing it maximizes the
    /// information gained near the decision boundary.
    ///
    /// Only the confidently-below side is treated as resolved; points
    /// confidently above the threshold stay eligible for sampling.
    pub fn neg_variance(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        threshold: f64,
        c: f64,
        x_lo_cand: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        x_hi_cand: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<f64> {
        let x_row = x.view().insert_axis(Axis(0));
        let (mean, cov) = self.predict(&x_row)?;
        if mean[[0, 0]] + c * cov[[0, 0]] <= threshold {
            return Ok(0.);
        }
        Ok(-self.what_if_variance(x, x_lo_cand, x_hi_cand)?)
    }

    /// Search the box `xlimits` (d, 2) for the point of maximum what-if
    /// posterior-variance reduction, using the global derivative-free
    /// minimizer over [`neg_variance`](MultiFidelityGp::neg_variance).
    ///
    /// Returns the best point and the (non-negated) variance achieved.
    pub fn max_variance(
        &self,
        xlimits: &Array2<f64>,
        threshold: f64,
        c: f64,
        x_lo_cand: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        x_hi_cand: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        rng: &mut impl Rng,
    ) -> Result<(Array1<f64>, f64)> {
        if xlimits.nrows() != self.dim {
            return Err(GpError::InvalidValueError(format!(
                "search bounds have dimension {}, expected {}",
                xlimits.nrows(),
                self.dim
            )));
        }
        let obj = |x: &[f64]| {
            let xv = ArrayView1::from(x);
            match self.neg_variance(&xv, threshold, c, x_lo_cand, x_hi_cand) {
                Ok(v) => v,
                Err(err) => {
                    log::debug!("variance query failed at {x:?}: {err}");
                    f64::INFINITY
                }
            }
        };
        let (fmin, xmin) = minimize_within(&obj, xlimits, rng)?;
        if !fmin.is_finite() {
            return Err(GpError::SearchError(
                "every candidate failed the variance query".to_string(),
            ));
        }
        Ok((xmin, -fmin))
    }

    fn factor(&self) -> Result<&Array2<f64>> {
        self.factor.as_ref().ok_or_else(|| {
            GpError::StaleFactorization(
                "no cached joint factor: run update/nlml/train first".to_string(),
            )
        })
    }

    fn appended(
        &self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        x_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        if x_new.nrows() == 0 {
            return Ok((x.clone(), y.clone()));
        }
        if x_new.ncols() != self.dim {
            return Err(GpError::InvalidValueError(format!(
                "new inputs have dimension {}, expected {}",
                x_new.ncols(),
                self.dim
            )));
        }
        Ok((
            concatenate![Axis(0), x.view(), x_new.view()],
            concatenate![Axis(0), y.view(), y_new.view()],
        ))
    }
}

fn check_paired(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    fidelity: &str,
) -> Result<()> {
    if y.nrows() != x.nrows() || (y.nrows() > 0 && y.ncols() != 1) {
        return Err(GpError::InvalidValueError(format!(
            "{fidelity}-fidelity outputs expected as a ({}, 1) column, got {:?}",
            x.nrows(),
            y.shape()
        )));
    }
    Ok(())
}

/// Reshape possibly (0, 0) empties to a well-formed (0, ncols) array.
fn to_shaped(a: &ArrayBase<impl Data<Elem = f64>, Ix2>, ncols: usize) -> Array2<f64> {
    if a.nrows() == 0 {
        Array2::zeros((0, ncols))
    } else {
        a.to_owned()
    }
}

fn append_rows(
    a: &Array2<f64>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Result<Array2<f64>> {
    if b.nrows() == 0 {
        return Ok(a.clone());
    }
    if b.ncols() != a.ncols() {
        return Err(GpError::InvalidValueError(format!(
            "candidate inputs have dimension {}, expected {}",
            b.ncols(),
            a.ncols()
        )));
    }
    Ok(concatenate![Axis(0), a.view(), b.view()])
}

/// Joint covariance over `[low rows; high rows]` with per-fidelity noise
/// and stabilizing jitter on the diagonal.
fn assemble_joint(x_lo: &Array2<f64>, x_hi: &Array2<f64>, hyp: &MfHyperparams) -> Array2<f64> {
    let n_lo = x_lo.nrows();
    let n_hi = x_hi.nrows();
    let n = n_lo + n_hi;

    let mut k_ll = squared_exponential_iso(x_lo, x_lo, hyp.scale_lo, hyp.length_lo);
    for i in 0..n_lo {
        k_ll[[i, i]] += hyp.noise_lo;
    }
    let k_lh =
        squared_exponential_iso(x_lo, x_hi, hyp.scale_lo, hyp.length_lo).mapv(|v| hyp.rho * v);
    let mut k_hh = squared_exponential_iso(x_hi, x_hi, hyp.scale_lo, hyp.length_lo)
        .mapv(|v| hyp.rho * hyp.rho * v)
        + squared_exponential_iso(x_hi, x_hi, hyp.scale_hi, hyp.length_hi);
    for i in 0..n_hi {
        k_hh[[i, i]] += hyp.noise_hi;
    }

    let mut k = Array2::zeros((n, n));
    k.slice_mut(s![..n_lo, ..n_lo]).assign(&k_ll);
    k.slice_mut(s![..n_lo, n_lo..]).assign(&k_lh);
    k.slice_mut(s![n_lo.., ..n_lo]).assign(&k_lh.t());
    k.slice_mut(s![n_lo.., n_lo..]).assign(&k_hh);
    for i in 0..n {
        k[[i, i]] += JITTER;
    }
    k
}

fn joint_factor(
    x_lo: &Array2<f64>,
    x_hi: &Array2<f64>,
    hyp: &MfHyperparams,
) -> Result<Array2<f64>> {
    Ok(assemble_joint(x_lo, x_hi, hyp).cholesky()?)
}

/// Cross-covariance of `x_star` against the joint dataset,
/// `[rho * k_lo(x*, X_L) | rho^2 * k_lo(x*, X_H) + k_hi(x*, X_H)]`.
fn cross_covariance(
    x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    x_lo: &Array2<f64>,
    x_hi: &Array2<f64>,
    hyp: &MfHyperparams,
) -> Array2<f64> {
    let psi1 =
        squared_exponential_iso(x_star, x_lo, hyp.scale_lo, hyp.length_lo).mapv(|v| hyp.rho * v);
    let psi2 = squared_exponential_iso(x_star, x_hi, hyp.scale_lo, hyp.length_lo)
        .mapv(|v| hyp.rho * hyp.rho * v)
        + squared_exponential_iso(x_star, x_hi, hyp.scale_hi, hyp.length_hi);
    concatenate![Axis(1), psi1, psi2]
}

/// Prior covariance of the high-fidelity process at `x_star`
fn prior_covariance(
    x_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    hyp: &MfHyperparams,
) -> Array2<f64> {
    squared_exponential_iso(x_star, x_star, hyp.scale_lo, hyp.length_lo)
        .mapv(|v| hyp.rho * hyp.rho * v)
        + squared_exponential_iso(x_star, x_star, hyp.scale_hi, hyp.length_hi)
}

/// De-meaned joint output column `[y_lo - mean_lo; y_hi - mean_hi]`
fn demeaned_outputs(y_lo: &Array2<f64>, y_hi: &Array2<f64>, hyp: &MfHyperparams) -> Array2<f64> {
    let y_lo = y_lo.mapv(|v| v - hyp.mean_lo);
    let y_hi = y_hi.mapv(|v| v - hyp.high_mean());
    concatenate![Axis(0), y_lo, y_hi]
}

fn nlml_with_factor(
    x_lo: &Array2<f64>,
    y_lo: &Array2<f64>,
    x_hi: &Array2<f64>,
    y_hi: &Array2<f64>,
    theta: &Array1<f64>,
) -> Result<(f64, Array2<f64>)> {
    let n = x_lo.nrows() + x_hi.nrows();
    if n == 0 {
        return Err(GpError::EmptyDataset(
            "likelihood of a model without observations is undefined".to_string(),
        ));
    }
    if theta.len() != N_THETA {
        return Err(GpError::InvalidValueError(format!(
            "expected {} hyperparameters, got {}",
            N_THETA,
            theta.len()
        )));
    }
    let hyp = MfHyperparams::from_log(theta);
    let y = demeaned_outputs(y_lo, y_hi, &hyp);
    let factor = joint_factor(x_lo, x_hi, &hyp)?;

    let z = factor.solve_triangular(&y, UPLO::Lower)?;
    let alpha = factor.t().solve_triangular(&z, UPLO::Upper)?;
    let fit = 0.5 * y.t().dot(&alpha)[[0, 0]];
    let logdet = factor.diag().mapv(f64::ln).sum();
    let nlml = fit + logdet + 0.5 * n as f64 * (2. * std::f64::consts::PI).ln();
    Ok((nlml, factor))
}

/// Value-and-gradient objective for the joint likelihood minimization
struct MfNlmlProblem<'a> {
    x_lo: &'a Array2<f64>,
    y_lo: &'a Array2<f64>,
    x_hi: &'a Array2<f64>,
    y_hi: &'a Array2<f64>,
}

impl MfNlmlProblem<'_> {
    fn value(&self, theta: &Array1<f64>) -> f64 {
        match nlml_with_factor(self.x_lo, self.y_lo, self.x_hi, self.y_hi, theta) {
            Ok((nlml, _)) => nlml,
            Err(_) => f64::INFINITY,
        }
    }
}

impl CostFunction for MfNlmlProblem<'_> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        Ok(self.value(theta))
    }
}

impl Gradient for MfNlmlProblem<'_> {
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

    fn f_lo(x: &Array2<f64>) -> Array2<f64> {
        let mut y = Array2::zeros((x.nrows(), 1));
        for (i, row) in x.rows().into_iter().enumerate() {
            let r = (0.5 * (row[0] * row[0] + row[1] * row[1])).sqrt();
            y[[i, 0]] = 20. * (-0.2 * r).exp() + 20. + std::f64::consts::E;
        }
        y
    }

    fn f_hi(x: &Array2<f64>) -> Array2<f64> {
        let mut y = f_lo(x);
        for (i, row) in x.rows().into_iter().enumerate() {
            let arg = 0.5
                * ((2. * std::f64::consts::PI * row[0]).cos()
                    + (2. * std::f64::consts::PI * row[1]).cos());
            y[[i, 0]] += arg.exp();
        }
        y
    }

    fn corner_grid() -> Array2<f64> {
        array![[-3., -3.], [-3., 3.], [3., -3.], [3., 3.], [0., 0.]]
    }

    fn empty_x() -> Array2<f64> {
        Array2::zeros((0, 2))
    }

    fn empty_y() -> Array2<f64> {
        Array2::zeros((0, 1))
    }

    fn grid_model() -> MultiFidelityGp {
        let x = corner_grid();
        let (y_lo, y_hi) = (f_lo(&x), f_hi(&x));
        MultiFidelityGp::new(&x, &y_lo, &x, &y_hi).unwrap()
    }

    /// Moderate length-scales and low noise so conditioning on a nearby
    /// point visibly moves the posterior
    fn moderate_theta() -> Array1<f64> {
        array![0., 0., 2f64.ln(), 0., 0., 2f64.ln(), 0., -4., -4.]
    }

    #[test]
    fn test_init_theta() {
        let model = grid_model();
        assert_eq!(
            model.theta(),
            &array![0., 1., 6., 0., 1., 6., 1., 0.01, 0.01]
        );
        assert_eq!(model.dim(), 2);
        assert_eq!(model.n_lo(), 5);
        assert_eq!(model.n_hi(), 5);
    }

    #[test]
    fn test_exponentiation_stays_positive() {
        let hyp = MfHyperparams::from_log(&array![-80., -80., 80., 0., -50., 80., -80., -80., 80.]);
        for v in [
            hyp.scale_lo,
            hyp.length_lo,
            hyp.scale_hi,
            hyp.length_hi,
            hyp.noise_lo,
            hyp.noise_hi,
        ] {
            assert!(v > 0.);
            assert!(!v.is_nan());
        }
    }

    #[test]
    fn test_empty_model_cannot_be_trained() {
        let mut model =
            MultiFidelityGp::new(&empty_x(), &empty_y(), &empty_x(), &empty_y()).unwrap();
        assert!(matches!(model.train(), Err(GpError::EmptyDataset(_))));
        let theta = model.theta().to_owned();
        assert!(matches!(model.nlml(&theta), Err(GpError::EmptyDataset(_))));
    }

    #[test]
    fn test_empty_model_predicts_prior() {
        let model = MultiFidelityGp::new(&empty_x(), &empty_y(), &empty_x(), &empty_y()).unwrap();
        let hyp = model.hyperparams();
        let (mean, cov) = model.predict(&array![[0.5, -0.5]]).unwrap();
        assert_abs_diff_eq!(mean[[0, 0]], hyp.high_mean(), epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 0]], hyp.high_prior_variance(), epsilon = 1e-12);
    }

    #[test]
    fn test_train_reduces_nlml() {
        let mut model = grid_model();
        let report = model.train().unwrap();
        assert!(report.final_nlml < report.initial_nlml);
        assert!(model.predict(&array![[1., 1.]]).is_ok());
    }

    #[test]
    fn test_update_shrinks_variance_near_new_point() {
        let x = corner_grid();
        let (y_lo, y_hi) = (f_lo(&x), f_hi(&x));
        let mut model = MultiFidelityGp::new(&x, &y_lo, &x, &y_hi).unwrap();
        model.set_theta(moderate_theta()).unwrap();
        model.update(&empty_x(), &empty_y(), &empty_x(), &empty_y()).unwrap();

        let probe = array![[1.5, 1.5]];
        let (_, cov_before) = model.predict(&probe).unwrap();

        let x_new = array![[1.5, 1.5]];
        let y_new = f_hi(&x_new);
        model.update(&empty_x(), &empty_y(), &x_new, &y_new).unwrap();
        assert_eq!(model.n_hi(), 6);
        assert_eq!(model.n_lo(), 5);

        let (_, cov_after) = model.predict(&probe).unwrap();
        assert!(cov_after[[0, 0]] < cov_before[[0, 0]]);
    }

    #[test]
    fn test_what_if_variance_does_not_mutate() {
        let mut model = grid_model();
        model.set_theta(moderate_theta()).unwrap();
        model.update(&empty_x(), &empty_y(), &empty_x(), &empty_y()).unwrap();

        let probe = array![[1.5, 1.5]];
        let (mean_before, cov_before) = model.predict(&probe).unwrap();

        let committed = model
            .what_if_variance(&array![1.5, 1.5], &empty_x(), &empty_x())
            .unwrap();
        let hypothetical = model
            .what_if_variance(&array![1.5, 1.5], &empty_x(), &array![[1.5, 1.5]])
            .unwrap();
        assert!(hypothetical < committed);

        // the committed dataset is untouched by the what-if query
        assert_eq!(model.n_lo(), 5);
        assert_eq!(model.n_hi(), 5);
        let (mean_after, cov_after) = model.predict(&probe).unwrap();
        assert_abs_diff_eq!(mean_before, mean_after, epsilon = 1e-12);
        assert_abs_diff_eq!(cov_before, cov_after, epsilon = 1e-12);
    }

    #[test]
    fn test_neg_variance_zero_when_resolved() {
        let mut model = grid_model();
        model.update(&empty_x(), &empty_y(), &empty_x(), &empty_y()).unwrap();
        // threshold far above any value: every point is confidently below
        for c in [0., 1., 5.] {
            let v = model
                .neg_variance(&array![0.5, 0.5], 1e9, c, &empty_x(), &empty_x())
                .unwrap();
            assert_eq!(v, 0.);
        }
        // unreachable threshold: the full what-if variance comes back negated
        let v = model
            .neg_variance(&array![0.5, 0.5], -1e9, 1., &empty_x(), &empty_x())
            .unwrap();
        assert!(v < 0.);
    }

    #[test]
    fn test_max_variance_on_empty_dataset() {
        let model = MultiFidelityGp::new(&empty_x(), &empty_y(), &empty_x(), &empty_y()).unwrap();
        let xlimits = array![[-3., 3.], [-3., 3.]];
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let (x, var) = model
            .max_variance(&xlimits, -1e9, 1., &empty_x(), &empty_x(), &mut rng)
            .unwrap();
        assert!(x[0] > -3. && x[0] < 3.);
        assert!(x[1] > -3. && x[1] < 3.);
        assert!(var.is_finite());
        assert!(var > 0.);
        assert_abs_diff_eq!(var, model.hyperparams().high_prior_variance(), epsilon = 1e-9);
    }
}
