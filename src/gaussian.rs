use crate::error::CoresetError;
use crate::faer_ndarray::{FaerCholesky, min_eigenvalue};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Multivariate normal summary (mean vector + covariance matrix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

impl Gaussian {
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self, CoresetError> {
        let d = mean.len();
        if covariance.dim() != (d, d) {
            return Err(CoresetError::InvalidInput(format!(
                "covariance shape {:?} does not match mean length {d}",
                covariance.dim()
            )));
        }
        Ok(Self { mean, covariance })
    }

    /// N(0, I), the prior shared by every model.
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            covariance: Array2::eye(dim),
        }
    }

    /// Sample mean and unbiased sample covariance of the rows of `samples`.
    pub fn from_samples(samples: ArrayView2<'_, f64>) -> Result<Self, CoresetError> {
        let s = samples.nrows();
        if s < 2 {
            return Err(CoresetError::InvalidInput(format!(
                "need at least two posterior samples to form a covariance, got {s}"
            )));
        }
        if samples.iter().any(|v| !v.is_finite()) {
            return Err(CoresetError::InvalidInput(
                "posterior samples contain non-finite values".to_string(),
            ));
        }
        let mean = samples
            .mean_axis(Axis(0))
            .ok_or_else(|| CoresetError::InvalidInput("empty sample matrix".to_string()))?;
        let centered = &samples - &mean.view().insert_axis(Axis(0));
        let covariance = centered.t().dot(&centered) / (s as f64 - 1.0);
        Ok(Self { mean, covariance })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Draw `n` samples as rows of an `n × D` matrix.
    ///
    /// Standard normal variates are consumed from `rng` sample by sample, so a
    /// seeded generator reproduces the same matrix.
    pub fn sample<R: rand::Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>, CoresetError> {
        let d = self.dim();
        let chol = self.covariance.cholesky(Side::Lower).map_err(|_| {
            CoresetError::CovarianceNotPositiveDefinite {
                context: "sampling distribution",
                min_eigenvalue: min_eigenvalue(&self.covariance),
            }
        })?;
        let l = chol.lower_triangular();
        let mut eps = Array2::<f64>::zeros((n, d));
        for value in eps.iter_mut() {
            *value = StandardNormal.sample(rng);
        }
        Ok(eps.dot(&l.t()) + &self.mean.view().insert_axis(Axis(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn samples_recover_mean_and_covariance() {
        let g = Gaussian::new(array![1.0, -2.0], array![[2.0, 0.6], [0.6, 0.5]]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let draws = g.sample(40_000, &mut rng).unwrap();
        let fitted = Gaussian::from_samples(draws.view()).unwrap();
        for i in 0..2 {
            assert!((fitted.mean[i] - g.mean[i]).abs() < 0.05);
            for j in 0..2 {
                assert!((fitted.covariance[[i, j]] - g.covariance[[i, j]]).abs() < 0.05);
            }
        }
    }

    #[test]
    fn same_seed_gives_identical_draws() {
        let g = Gaussian::standard(3);
        let a = g.sample(10, &mut StdRng::seed_from_u64(11)).unwrap();
        let b = g.sample(10, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sampling_rejects_indefinite_covariance() {
        let g = Gaussian::new(array![0.0, 0.0], array![[1.0, 2.0], [2.0, 1.0]]).unwrap();
        let err = g.sample(3, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(
            err,
            CoresetError::CovarianceNotPositiveDefinite { min_eigenvalue, .. }
                if min_eigenvalue < 0.0
        ));
    }

    #[test]
    fn from_samples_needs_two_rows() {
        let one = array![[1.0, 2.0]];
        assert!(Gaussian::from_samples(one.view()).is_err());
    }
}
