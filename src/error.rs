use crate::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Failures raised while building or scoring a coreset.
#[derive(Error)]
pub enum CoresetError {
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Invalid cardinality schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "The Laplace mode search did not converge after {iterations} iterations (gradient norm {gradient_norm:.3e}): {reason}"
    )]
    LaplaceDidNotConverge {
        iterations: usize,
        gradient_norm: f64,
        reason: String,
    },

    #[error(
        "Covariance for {context} is not positive definite (minimum eigenvalue: {min_eigenvalue:.4e})."
    )]
    CovarianceNotPositiveDefinite {
        context: &'static str,
        min_eigenvalue: f64,
    },

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("Malformed data: {0}")]
    Data(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// Debug delegates to Display so `main` and test failures print the readable message.
impl core::fmt::Debug for CoresetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}
