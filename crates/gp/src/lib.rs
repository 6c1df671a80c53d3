//! Gaussian process regression over one or two fidelity levels.
//!
//! Two models share a squared-exponential kernel and a Cholesky-based
//! marginal-likelihood pipeline:
//!
//! * [`GaussianProcess`]: single-fidelity regression with anisotropic
//!   length-scales, posterior sampling and expected improvement.
//! * [`MultiFidelityGp`]: two-level autoregressive co-kriging where a
//!   cheap low-fidelity dataset sharpens predictions of an expensive
//!   high-fidelity quantity. Exposes the what-if variance queries used
//!   for active learning near a threshold contour.
//!
//! Hyperparameters live in log space and are trained by minimizing the
//! negative log-marginal likelihood with L-BFGS and numerically
//! differentiated gradients. Trained vectors can be persisted as plain
//! text through [`save_theta`]/[`load_theta`].
//!
//! ```
//! use ndarray::array;
//! use mfal_gp::GaussianProcess;
//!
//! let xt = array![[0.0], [1.0], [2.0], [3.0]];
//! let yt = array![[0.0], [0.8], [0.9], [0.1]];
//! let mut gp = GaussianProcess::new(&xt, &yt)?;
//! let theta = gp.theta().to_owned();
//! let nlml = gp.nlml(&theta)?;
//! assert!(nlml.is_finite());
//!
//! let (mean, cov) = gp.predict(&array![[1.5]])?;
//! assert_eq!(mean.shape(), &[1, 1]);
//! assert_eq!(cov.shape(), &[1, 1]);
//! # Ok::<(), mfal_gp::GpError>(())
//! ```

mod errors;
mod io;
mod kernel;
mod multi_fidelity;
mod optimization;
mod single_fidelity;

pub use errors::{GpError, Result};
pub use io::{load_theta, save_theta};
pub use kernel::{squared_exponential, squared_exponential_iso};
pub use multi_fidelity::{
    IDX_NOISE_HI, IDX_NOISE_LO, IDX_RHO, IDX_THETA_HI, IDX_THETA_LO, MfHyperparams,
    MultiFidelityGp, N_THETA,
};
pub use optimization::TrainingReport;
pub use single_fidelity::GaussianProcess;
