use thiserror::Error;

/// A result type for GP regression operations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error raised by [`GaussianProcess`](crate::GaussianProcess) or
/// [`MultiFidelityGp`](crate::MultiFidelityGp) operations
#[derive(Error, Debug)]
pub enum GpError {
    /// When the covariance matrix cannot be factorized (not positive definite)
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a likelihood evaluation fails for the current hyperparameters
    #[error("Likelihood computation error: {0}")]
    LikelihoodError(String),
    /// When a model holds no observation at all
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),
    /// When prediction is requested while the cached factorization is stale
    #[error("Stale factorization: {0}")]
    StaleFactorization(String),
    /// When input data shapes are inconsistent
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When a global acquisition search finds no usable candidate
    #[error("Search error: {0}")]
    SearchError(String),
    /// When the hyperparameter optimizer fails
    #[error(transparent)]
    TrainingError(#[from] argmin::core::Error),
    /// When hyperparameter file parsing fails
    #[error("Load error: {0}")]
    LoadError(String),
    /// When hyperparameter file reading/writing fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
