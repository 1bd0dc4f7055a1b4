//! Fixed-geometry coreset construction: one random projection of centered
//! log-likelihoods drawn from a smoothed posterior guess, then GIGA.

use crate::error::CoresetError;
use crate::experiment::CoresetBuilder;
use crate::gaussian::Gaussian;
use crate::giga::Giga;
use crate::model::ModelOracle;
use crate::projection::centered_log_likelihoods;
use ndarray::{Array1, Array2, ArrayView2};
use rand::RngExt;
use rand_distr::{Distribution, StandardNormal};

#[derive(Debug, Clone, Copy)]
pub struct HilbertOptions {
    pub projection_dim: usize,
    pub pihat_noise: f64,
    /// Run the GIGA refinement after every growth step.
    pub optimize: bool,
}

impl Default for HilbertOptions {
    fn default() -> Self {
        Self {
            projection_dim: 500,
            pihat_noise: 0.15,
            optimize: false,
        }
    }
}

/// Smoothing distribution between the prior and the posterior summary.
///
/// Draws, in order: the interpolation weight `U`, the `D` mean perturbations,
/// then the single log-scale perturbation of the covariance.
pub fn pihat<R: rand::Rng + ?Sized>(
    prior: &Gaussian,
    posterior: &Gaussian,
    noise: f64,
    rng: &mut R,
) -> Result<Gaussian, CoresetError> {
    if prior.dim() != posterior.dim() {
        return Err(CoresetError::InvalidInput(format!(
            "prior dimension {} differs from posterior dimension {}",
            prior.dim(),
            posterior.dim()
        )));
    }
    let u: f64 = rng.random();
    let mut mean = &posterior.mean * u + &(&prior.mean * (1.0 - u));
    let covariance = &posterior.covariance * u + &(&prior.covariance * (1.0 - u));

    let mean_norm = mean.dot(&mean).sqrt();
    let eps: Array1<f64> = Array1::from_shape_fn(mean.len(), |_| StandardNormal.sample(rng));
    mean += &(eps * (noise * mean_norm));
    let log_scale: f64 = StandardNormal.sample(rng);
    let covariance = covariance * (2.0 * noise * log_scale).exp();

    Gaussian::new(mean, covariance)
}

pub struct HilbertCoresetBuilder {
    giga: Giga,
    optimize: bool,
}

impl HilbertCoresetBuilder {
    /// Build the projection once; every later cardinality reuses it.
    pub fn new<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
        model: &M,
        z: ArrayView2<'_, f64>,
        prior: &Gaussian,
        posterior: &Gaussian,
        options: &HilbertOptions,
        rng: &mut R,
    ) -> Result<Self, CoresetError> {
        let smoothing = pihat(prior, posterior, options.pihat_noise, rng)?;
        log::debug!(
            "Hilbert projection: {} samples from pihat with mean {}",
            options.projection_dim,
            smoothing.mean
        );
        let lls = centered_log_likelihoods(model, z, &smoothing, options.projection_dim, rng)?;
        Self::from_projection(lls, options.optimize)
    }

    /// Start from an already computed `N × K` embedding.
    pub fn from_projection(lls: Array2<f64>, optimize: bool) -> Result<Self, CoresetError> {
        Ok(Self {
            giga: Giga::new(lls)?,
            optimize,
        })
    }
}

impl CoresetBuilder for HilbertCoresetBuilder {
    fn build_to<R: rand::Rng + ?Sized>(
        &mut self,
        cardinality: usize,
        _rng: &mut R,
    ) -> Result<Array1<f64>, CoresetError> {
        self.giga.build(cardinality);
        if self.optimize {
            self.giga.optimize();
        }
        Ok(self.giga.weights())
    }
}
