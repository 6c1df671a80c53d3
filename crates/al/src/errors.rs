use thiserror::Error;

/// A result type for active-learning operations
pub type Result<T> = std::result::Result<T, AlError>;

/// An error raised by the active-learning driver or its data loaders
#[derive(Error, Debug)]
pub enum AlError {
    /// When the underlying GP model fails
    #[error(transparent)]
    GpError(#[from] mfal_gp::GpError),
    /// When the learner configuration is inconsistent
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// When an oracle returns outputs that do not match the queried inputs
    #[error("Oracle error: {0}")]
    OracleError(String),
    /// When a sample table cannot be parsed
    #[error("Samples error: {0}")]
    SamplesError(String),
    /// When sample file reading fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
