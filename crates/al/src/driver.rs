//! Active-learning driver that localizes the `f(x) = threshold` contour
//! of an expensive high-fidelity function by adaptively routing queries
//! between a cheap low-fidelity oracle and the expensive one.
//!
//! Each round plans a batch: the point of maximum what-if posterior
//! variance is queried repeatedly, with already-planned points counted as
//! if observed, until the round's variance floor is reached. Points whose
//! variance sits at or below the fidelity switch level go to the
//! high-fidelity buffer, the rest to the low-fidelity one. The batch is
//! then evaluated and committed, and the confidence multiplier `c`
//! tightens round over round as `sqrt(2 ln(2^round / delta))`.

use crate::errors::{AlError, Result};
use mfal_gp::MultiFidelityGp;
use ndarray::{Array2, ArrayView2, Axis, concatenate};
use ndarray_rand::rand::Rng;

/// Rows predicted per chunk when classifying a grid
const CLASSIFY_CHUNK: usize = 200;

/// Tuning knobs of the contour learner.
///
/// The defaults reproduce the standard schedule: confidence budget
/// `delta = 0.05`, fidelity switch at `1.2x` the discrepancy variance,
/// termination at `1.1x`, and a per-round variance floor shrinking by
/// `0.75^2` of the previous round's last variance.
#[derive(Debug, Clone)]
pub struct AlConfig {
    /// Contour level of interest
    pub threshold: f64,
    /// Search box as a (d, 2) array of `[lower, upper]` rows
    pub xlimits: Array2<f64>,
    /// Confidence budget split over rounds
    pub delta: f64,
    /// High-fidelity routing level as a multiple of the discrepancy variance
    pub switch_factor: f64,
    /// Termination level as a multiple of the discrepancy variance
    pub stop_factor: f64,
    /// Per-round variance floor as a fraction of the previous round's variance
    pub shrink_factor: f64,
    /// Safety cap on sampling rounds
    pub max_rounds: usize,
    /// Safety cap on points planned within one round
    pub max_points_per_round: usize,
}

impl AlConfig {
    pub fn new(threshold: f64, xlimits: Array2<f64>) -> AlConfig {
        AlConfig {
            threshold,
            xlimits,
            delta: 0.05,
            switch_factor: 1.2,
            stop_factor: 1.1,
            shrink_factor: 0.75 * 0.75,
            max_rounds: 50,
            max_points_per_round: 200,
        }
    }

    pub fn delta(mut self, delta: f64) -> AlConfig {
        self.delta = delta;
        self
    }

    pub fn switch_factor(mut self, switch_factor: f64) -> AlConfig {
        self.switch_factor = switch_factor;
        self
    }

    pub fn stop_factor(mut self, stop_factor: f64) -> AlConfig {
        self.stop_factor = stop_factor;
        self
    }

    pub fn shrink_factor(mut self, shrink_factor: f64) -> AlConfig {
        self.shrink_factor = shrink_factor;
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> AlConfig {
        self.max_rounds = max_rounds;
        self
    }

    pub fn max_points_per_round(mut self, max_points_per_round: usize) -> AlConfig {
        self.max_points_per_round = max_points_per_round;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.xlimits.ncols() != 2 || self.xlimits.nrows() == 0 {
            return Err(AlError::InvalidConfig(format!(
                "search bounds expected as a (d, 2) array, got {:?}",
                self.xlimits.shape()
            )));
        }
        if !(self.delta > 0. && self.delta < 1.) {
            return Err(AlError::InvalidConfig(format!(
                "delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        if !(self.switch_factor > 1.) || !(self.stop_factor > 1.) {
            return Err(AlError::InvalidConfig(format!(
                "switch ({}) and stop ({}) factors must exceed 1",
                self.switch_factor, self.stop_factor
            )));
        }
        if !(self.shrink_factor > 0. && self.shrink_factor < 1.) {
            return Err(AlError::InvalidConfig(format!(
                "shrink factor must lie in (0, 1), got {}",
                self.shrink_factor
            )));
        }
        if self.max_rounds == 0 || self.max_points_per_round == 0 {
            return Err(AlError::InvalidConfig(
                "round and point caps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-round summary of a learning run
#[derive(Debug, Clone)]
pub struct RoundRecord {
    /// 1-based sampling round
    pub round: usize,
    /// Confidence multiplier used during the round
    pub c: f64,
    /// Low-fidelity points planned and evaluated
    pub n_lo_new: usize,
    /// High-fidelity points planned and evaluated
    pub n_hi_new: usize,
    /// Last maximum what-if variance seen within the round
    pub max_var: f64,
    /// Maximum what-if variance after each query of the round, in order
    pub var_history: Vec<f64>,
}

/// Outcome of a learning run.
///
/// Hitting the round cap is not an error: the model keeps everything
/// committed so far and `converged` reports whether the variance target
/// was actually reached.
#[derive(Debug, Clone)]
pub struct LearningOutcome {
    pub rounds: Vec<RoundRecord>,
    pub converged: bool,
    pub final_max_var: f64,
}

/// Batch-mode contour learner over a trained [`MultiFidelityGp`].
///
/// The oracles evaluate a whole batch of points per fidelity and return
/// an (n, 1) output column; they are only called with non-empty batches.
pub struct ContourLearner<'a, FL, FH>
where
    FL: FnMut(&Array2<f64>) -> Array2<f64>,
    FH: FnMut(&Array2<f64>) -> Array2<f64>,
{
    model: &'a mut MultiFidelityGp,
    f_lo: FL,
    f_hi: FH,
    config: AlConfig,
}

impl<'a, FL, FH> ContourLearner<'a, FL, FH>
where
    FL: FnMut(&Array2<f64>) -> Array2<f64>,
    FH: FnMut(&Array2<f64>) -> Array2<f64>,
{
    pub fn new(
        model: &'a mut MultiFidelityGp,
        f_lo: FL,
        f_hi: FH,
        config: AlConfig,
    ) -> Result<ContourLearner<'a, FL, FH>> {
        config.validate()?;
        if config.xlimits.nrows() != model.dim() {
            return Err(AlError::InvalidConfig(format!(
                "search bounds have dimension {}, model expects {}",
                config.xlimits.nrows(),
                model.dim()
            )));
        }
        Ok(ContourLearner {
            model,
            f_lo,
            f_hi,
            config,
        })
    }

    /// Run sampling rounds until the maximum what-if variance drops to the
    /// termination level or the round cap is hit.
    pub fn run(&mut self, rng: &mut impl Rng) -> Result<LearningOutcome> {
        let dim = self.model.dim();
        let hyp = self.model.hyperparams();
        let switch_level = self.config.switch_factor * hyp.scale_hi;
        let stop_level = self.config.stop_factor * hyp.scale_hi;

        let mut var_prev = hyp.high_prior_variance();
        let mut max_var = f64::INFINITY;
        let mut rounds = Vec::new();
        let mut round = 0;

        while max_var >= stop_level {
            if round >= self.config.max_rounds {
                log::warn!(
                    "round cap {} hit at max variance {max_var} (target {stop_level})",
                    self.config.max_rounds
                );
                return Ok(LearningOutcome {
                    rounds,
                    converged: false,
                    final_max_var: max_var,
                });
            }
            let mut x_lo_new = Array2::zeros((0, dim));
            let mut x_hi_new = Array2::zeros((0, dim));
            let empty_y = Array2::zeros((0, 1));
            // refresh the factorization over the committed data
            self.model.update(&x_lo_new, &empty_y, &x_hi_new, &empty_y)?;

            let c = (2. * (2f64.powi(round as i32) / self.config.delta).ln()).sqrt();
            let floor = (self.config.shrink_factor * var_prev).max(stop_level);
            let mut var_history = Vec::new();
            while max_var >= floor {
                if x_lo_new.nrows() + x_hi_new.nrows() >= self.config.max_points_per_round {
                    log::warn!(
                        "point cap {} hit within round {} at max variance {max_var}",
                        self.config.max_points_per_round,
                        round + 1
                    );
                    break;
                }
                let (x, v) = self.model.max_variance(
                    &self.config.xlimits,
                    self.config.threshold,
                    c,
                    &x_lo_new,
                    &x_hi_new,
                    rng,
                )?;
                max_var = v;
                var_history.push(v);
                let row = x.insert_axis(Axis(0));
                if max_var <= switch_level {
                    x_hi_new = concatenate![Axis(0), x_hi_new, row];
                } else {
                    x_lo_new = concatenate![Axis(0), x_lo_new, row];
                }
                log::debug!(
                    "round {}: {} low / {} high points planned, max variance {max_var}",
                    round + 1,
                    x_lo_new.nrows(),
                    x_hi_new.nrows()
                );
            }
            var_prev = max_var;

            let y_lo_new = query_oracle(&mut self.f_lo, &x_lo_new, "low")?;
            let y_hi_new = query_oracle(&mut self.f_hi, &x_hi_new, "high")?;
            self.model.update(&x_lo_new, &y_lo_new, &x_hi_new, &y_hi_new)?;

            rounds.push(RoundRecord {
                round: round + 1,
                c,
                n_lo_new: x_lo_new.nrows(),
                n_hi_new: x_hi_new.nrows(),
                max_var,
                var_history,
            });
            log::info!(
                "round {} finished: {} low / {} high points, max variance {max_var}",
                round + 1,
                x_lo_new.nrows(),
                x_hi_new.nrows()
            );
            round += 1;
        }
        Ok(LearningOutcome {
            rounds,
            converged: true,
            final_max_var: max_var,
        })
    }
}

fn query_oracle<F>(oracle: &mut F, x: &Array2<f64>, fidelity: &str) -> Result<Array2<f64>>
where
    F: FnMut(&Array2<f64>) -> Array2<f64>,
{
    if x.nrows() == 0 {
        return Ok(Array2::zeros((0, 1)));
    }
    let y = oracle(x);
    if y.nrows() != x.nrows() || y.ncols() != 1 {
        return Err(AlError::OracleError(format!(
            "{fidelity}-fidelity oracle returned {:?} outputs for {} queries",
            y.shape(),
            x.nrows()
        )));
    }
    Ok(y)
}

/// Posterior snapshot over an evaluation grid, as plain numeric arrays
/// for external rendering
#[derive(Debug, Clone)]
pub struct PosteriorGrid {
    /// Grid points, one row per point
    pub points: Array2<f64>,
    /// Posterior mean per grid row
    pub mean: Array2<f64>,
    /// Posterior variance per grid row
    pub variance: Vec<f64>,
}

/// Evaluate the posterior mean and variance of `model` on an
/// `n_per_axis` x `n_per_axis` grid over a 2-d search box.
pub fn posterior_grid(
    model: &MultiFidelityGp,
    xlimits: &Array2<f64>,
    n_per_axis: usize,
) -> Result<PosteriorGrid> {
    let points = grid_points(model, xlimits, n_per_axis)?;
    let mut mean = Array2::zeros((points.nrows(), 1));
    let mut variance = Vec::with_capacity(points.nrows());
    for (ci, chunk) in points.axis_chunks_iter(Axis(0), CLASSIFY_CHUNK).enumerate() {
        let (m, cov) = model.predict(&chunk)?;
        for i in 0..chunk.nrows() {
            mean[[ci * CLASSIFY_CHUNK + i, 0]] = m[[i, 0]];
            variance.push(cov[[i, i]].abs());
        }
    }
    Ok(PosteriorGrid {
        points,
        mean,
        variance,
    })
}

fn grid_points(
    model: &MultiFidelityGp,
    xlimits: &Array2<f64>,
    n_per_axis: usize,
) -> Result<Array2<f64>> {
    if model.dim() != 2 || xlimits.nrows() != 2 || xlimits.ncols() != 2 {
        return Err(AlError::InvalidConfig(
            "grid evaluation expects a 2-d model and (2, 2) bounds".to_string(),
        ));
    }
    if n_per_axis < 2 {
        return Err(AlError::InvalidConfig(format!(
            "need at least 2 grid points per axis, got {n_per_axis}"
        )));
    }
    let step = |lo: f64, up: f64, i: usize| lo + (up - lo) * i as f64 / (n_per_axis - 1) as f64;
    let mut points = Array2::zeros((n_per_axis * n_per_axis, 2));
    for i in 0..n_per_axis {
        for j in 0..n_per_axis {
            let row = i * n_per_axis + j;
            points[[row, 0]] = step(xlimits[[0, 0]], xlimits[[0, 1]], i);
            points[[row, 1]] = step(xlimits[[1, 0]], xlimits[[1, 1]], j);
        }
    }
    Ok(points)
}

/// Confidence label of a grid point relative to the threshold contour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// `mean - c * var >= threshold`
    Above,
    /// `mean + c * var <= threshold`
    Below,
    /// Neither bound clears the threshold yet
    Undecided,
}

/// Classified evaluation grid over the search box
#[derive(Debug, Clone)]
pub struct ContourMap {
    /// Grid points, one row per point
    pub points: Array2<f64>,
    /// One label per grid row
    pub labels: Vec<Region>,
}

impl ContourMap {
    /// Fraction of grid points confidently classified on either side
    pub fn decided_fraction(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.;
        }
        let decided = self
            .labels
            .iter()
            .filter(|&&l| l != Region::Undecided)
            .count();
        decided as f64 / self.labels.len() as f64
    }
}

/// Classify an `n_per_axis` x `n_per_axis` grid over a 2-d search box by
/// the posterior confidence bounds at multiplier `c`.
pub fn classify_grid(
    model: &MultiFidelityGp,
    xlimits: &Array2<f64>,
    n_per_axis: usize,
    threshold: f64,
    c: f64,
) -> Result<ContourMap> {
    let points = grid_points(model, xlimits, n_per_axis)?;

    // chunked prediction keeps the dense covariance small
    let mut labels = Vec::with_capacity(points.nrows());
    for chunk in points.axis_chunks_iter(Axis(0), CLASSIFY_CHUNK) {
        classify_chunk(model, &chunk, threshold, c, &mut labels)?;
    }
    Ok(ContourMap { points, labels })
}

fn classify_chunk(
    model: &MultiFidelityGp,
    chunk: &ArrayView2<f64>,
    threshold: f64,
    c: f64,
    labels: &mut Vec<Region>,
) -> Result<()> {
    let (mean, cov) = model.predict(chunk)?;
    for i in 0..chunk.nrows() {
        let m = mean[[i, 0]];
        let v = cov[[i, i]].abs();
        let label = if m - c * v >= threshold {
            Region::Above
        } else if m + c * v <= threshold {
            Region::Below
        } else {
            Region::Undecided
        };
        labels.push(label);
    }
    Ok(())
}
