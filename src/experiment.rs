//! Experiment driver: build coresets over a cardinality schedule with one of
//! the construction algorithms, then score every snapshot against the
//! posterior summary.

use crate::error::CoresetError;
use crate::gaussian::Gaussian;
use crate::hilbert::{HilbertCoresetBuilder, HilbertOptions};
use crate::laplace::{LaplaceOptions, laplace_approximation};
use crate::model::ModelOracle;
use crate::riemann::{RiemannCoresetBuilder, RiemannOptions, WeightUpdate};
use crate::types::{Algorithm, CardinalitySchedule, CoresetWeights, ModelFamily};
use crate::uniform::UniformCoresetBuilder;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A construction algorithm that grows its coreset monotonically.
pub trait CoresetBuilder {
    /// Advance to `cardinality` and return the current weights.
    ///
    /// Cardinalities must be requested in non-decreasing order.
    fn build_to<R: rand::Rng + ?Sized>(
        &mut self,
        cardinality: usize,
        rng: &mut R,
    ) -> Result<Array1<f64>, CoresetError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub schedule: CardinalitySchedule,
    /// Random projection dimension for the Hilbert embedding.
    pub projection_dim: usize,
    pub pihat_noise: f64,
    /// Samples per selection or gradient estimate in the Riemannian builder.
    pub n_samples: usize,
    pub adam_iterations: usize,
    pub laplace: LaplaceOptions,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            schedule: CardinalitySchedule::default(),
            projection_dim: 500,
            pihat_noise: 0.15,
            n_samples: 20,
            adam_iterations: 10_000,
            laplace: LaplaceOptions::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<(), CoresetError> {
        if self.projection_dim == 0 {
            return Err(CoresetError::InvalidInput(
                "projection_dim must be positive".to_string(),
            ));
        }
        if self.n_samples < 2 {
            return Err(CoresetError::InvalidInput(format!(
                "n_samples must be at least 2, got {}",
                self.n_samples
            )));
        }
        if self.adam_iterations == 0 {
            return Err(CoresetError::InvalidInput(
                "adam_iterations must be positive".to_string(),
            ));
        }
        if !self.pihat_noise.is_finite() || self.pihat_noise < 0.0 {
            return Err(CoresetError::InvalidInput(format!(
                "pihat_noise must be a non-negative finite number, got {}",
                self.pihat_noise
            )));
        }
        if self.laplace.max_iterations == 0
            || !(self.laplace.tolerance > 0.0)
            || !(self.laplace.stall_gradient_tolerance >= 0.0)
        {
            return Err(CoresetError::InvalidInput(format!(
                "invalid Laplace options: {:?}",
                self.laplace
            )));
        }
        Ok(())
    }

    fn hilbert_options(&self, optimize: bool) -> HilbertOptions {
        HilbertOptions {
            projection_dim: self.projection_dim,
            pihat_noise: self.pihat_noise,
            optimize,
        }
    }

    fn riemann_options(&self, update: WeightUpdate) -> RiemannOptions {
        RiemannOptions {
            n_samples: self.n_samples,
            adam_iterations: self.adam_iterations,
            update,
            laplace: self.laplace,
        }
    }
}

/// Data consumed by one run. `z_test` only feeds the held-out metric.
#[derive(Debug, Clone, Copy)]
pub struct ExperimentInputs<'a> {
    pub z: ArrayView2<'a, f64>,
    pub z_test: Option<ArrayView2<'a, f64>>,
    pub posterior_samples: ArrayView2<'a, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoresetSnapshot {
    pub cardinality: usize,
    /// Wall-clock seconds since the run started, including any projection
    /// setup. This is elapsed time, not process CPU time.
    pub elapsed_secs: f64,
    pub weights: CoresetWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalityRecord {
    pub cardinality: usize,
    /// Wall-clock seconds, as in [`CoresetSnapshot::elapsed_secs`].
    pub elapsed_secs: f64,
    pub weights: CoresetWeights,
    pub laplace_mean: Array1<f64>,
    pub laplace_covariance: Array2<f64>,
    /// KL(posterior summary || coreset Laplace fit).
    pub kl_to_posterior: f64,
    /// Mean held-out log-likelihood at the Laplace mean.
    pub test_log_likelihood: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub algorithm: Algorithm,
    pub posterior: Gaussian,
    pub records: Vec<CardinalityRecord>,
}

impl ExperimentResults {
    pub fn kl_sequence(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.kl_to_posterior).collect()
    }
}

/// Identifies a run on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLabel {
    pub model: ModelFamily,
    pub dataset: String,
    pub run_id: String,
    pub seed: u64,
}

fn build_schedule<B: CoresetBuilder, R: rand::Rng + ?Sized>(
    builder: &mut B,
    schedule: &CardinalitySchedule,
    start: Instant,
    rng: &mut R,
) -> Result<Vec<CoresetSnapshot>, CoresetError> {
    let total = schedule.len();
    let mut snapshots = Vec::with_capacity(total);
    for (i, &m) in schedule.sizes().iter().enumerate() {
        log::info!("{}/{} (M = {m})", i + 1, total);
        let weights = builder.build_to(m, rng)?;
        snapshots.push(CoresetSnapshot {
            cardinality: m,
            elapsed_secs: start.elapsed().as_secs_f64(),
            weights: weights.into(),
        });
    }
    Ok(snapshots)
}

/// Build coresets for every cardinality in the schedule, then score them.
pub fn run_experiment<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    inputs: &ExperimentInputs<'_>,
    algorithm: Algorithm,
    config: &ExperimentConfig,
    rng: &mut R,
) -> Result<ExperimentResults, CoresetError> {
    config.validate()?;
    let z = inputs.z;
    model.validate_data(z)?;
    if let Some(z_test) = inputs.z_test {
        if z_test.ncols() != z.ncols() {
            return Err(CoresetError::InvalidInput(format!(
                "test data has {} columns but training data has {}",
                z_test.ncols(),
                z.ncols()
            )));
        }
        model.validate_data(z_test)?;
    }

    let dim = model.parameter_dim(z);
    let posterior = Gaussian::from_samples(inputs.posterior_samples)?;
    if posterior.dim() != dim {
        return Err(CoresetError::InvalidInput(format!(
            "posterior samples have dimension {} but the model has {dim}",
            posterior.dim()
        )));
    }
    let prior = Gaussian::standard(dim);

    log::info!(
        "Building coresets via {algorithm} on {} points (D = {dim})",
        z.nrows()
    );
    let start = Instant::now();
    let snapshots = match algorithm {
        Algorithm::Hilbert | Algorithm::HilbertCorrected => {
            let options = config.hilbert_options(algorithm == Algorithm::HilbertCorrected);
            let mut builder =
                HilbertCoresetBuilder::new(model, z, &prior, &posterior, &options, rng)?;
            build_schedule(&mut builder, &config.schedule, start, rng)?
        }
        Algorithm::Riemann | Algorithm::RiemannCorrected => {
            let update = if algorithm == Algorithm::RiemannCorrected {
                WeightUpdate::Full
            } else {
                WeightUpdate::Line
            };
            let mut builder = RiemannCoresetBuilder::new(
                model,
                z,
                prior.clone(),
                config.riemann_options(update),
            )?;
            build_schedule(&mut builder, &config.schedule, start, rng)?
        }
        Algorithm::Uniform => {
            let mut builder = UniformCoresetBuilder::new(z.nrows())?;
            build_schedule(&mut builder, &config.schedule, start, rng)?
        }
    };

    log::info!("Computing coreset Laplace approximations and KL(posterior || coreset Laplace)");
    let records = snapshots
        .into_iter()
        .map(|snapshot| {
            score_snapshot(model, inputs, &posterior, &prior, snapshot, &config.laplace)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ExperimentResults {
        algorithm,
        posterior,
        records,
    })
}

fn score_snapshot<M: ModelOracle + ?Sized>(
    model: &M,
    inputs: &ExperimentInputs<'_>,
    posterior: &Gaussian,
    prior: &Gaussian,
    snapshot: CoresetSnapshot,
    laplace: &LaplaceOptions,
) -> Result<CardinalityRecord, CoresetError> {
    let fit = laplace_approximation(
        model,
        inputs.z,
        snapshot.weights.view(),
        prior.mean.view(),
        laplace,
    )?;
    let kl = posterior.kl_divergence(&fit)?;
    let test_log_likelihood = inputs
        .z_test
        .and_then(|z_test| model.log_likelihood(z_test, fit.mean.view()).mean());
    log::info!(
        "M = {}: {} active, KL = {kl:.6e}",
        snapshot.cardinality,
        snapshot.weights.active_count()
    );
    Ok(CardinalityRecord {
        cardinality: snapshot.cardinality,
        elapsed_secs: snapshot.elapsed_secs,
        weights: snapshot.weights,
        laplace_mean: fit.mean,
        laplace_covariance: fit.covariance,
        kl_to_posterior: kl,
        test_log_likelihood,
    })
}
