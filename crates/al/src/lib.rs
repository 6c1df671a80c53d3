//! Active learning of a threshold contour with a two-level
//! multi-fidelity Gaussian process.
//!
//! The [`ContourLearner`] drives a trained [`mfal_gp::MultiFidelityGp`]
//! over a box domain: each round it plans a batch of points at the
//! maximum of the what-if posterior variance, routes each point to the
//! cheap or the expensive oracle by its variance level, evaluates the
//! batch and commits it to the model. Sampling stops once the maximum
//! variance falls to a fixed multiple of the discrepancy-process
//! variance, at which point [`classify_grid`] labels the domain into
//! confidently-above, confidently-below and undecided regions around
//! the contour.
//!
//! Initial designs can be read from delimited text files through the
//! [`samples`] module. See `examples/contour2d.rs` for an end-to-end
//! run on a synthetic two-fidelity benchmark.

mod driver;
mod errors;
pub mod samples;

pub use driver::{
    AlConfig, ContourLearner, ContourMap, LearningOutcome, PosteriorGrid, Region, RoundRecord,
    classify_grid, posterior_grid,
};
pub use errors::{AlError, Result};
