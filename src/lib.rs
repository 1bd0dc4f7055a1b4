#![deny(dead_code)]
#![deny(unused_imports)]
#![allow(non_snake_case)]

pub mod adam;
pub mod data;
pub mod divergence;
pub mod error;
pub mod experiment;
pub mod faer_ndarray;
pub mod gaussian;
pub mod giga;
pub mod hilbert;
pub mod laplace;
pub mod model;
pub mod probability;
pub mod projection;
pub mod riemann;
pub mod types;
pub mod uniform;

pub use adam::{AdamObserver, AdamOptions, adam, inverse_sqrt_schedule, projected_adam};
pub use divergence::gaussian_kl;
pub use error::CoresetError;
pub use experiment::{
    CardinalityRecord, CoresetBuilder, CoresetSnapshot, ExperimentConfig, ExperimentInputs,
    ExperimentResults, RunLabel, run_experiment,
};
pub use gaussian::Gaussian;
pub use giga::Giga;
pub use hilbert::{HilbertCoresetBuilder, HilbertOptions, pihat};
pub use laplace::{LaplaceOptions, laplace_approximation};
pub use model::{GaussianLocation, LogisticRegression, ModelOracle, PoissonRegression};
pub use projection::{
    ResidualProjection, center_rows, centered_log_likelihoods, log_likelihood_matrix,
    sample_gaussian,
};
pub use riemann::{
    MIN_SELECTED_WEIGHT, RiemannCoresetBuilder, RiemannOptions, StepOutcome, WeightUpdate,
    full_gradient, line_gradient, optimize_full, optimize_line, riemann_select,
};
pub use types::{Algorithm, CardinalitySchedule, CoresetWeights, ModelFamily};
pub use uniform::UniformCoresetBuilder;
