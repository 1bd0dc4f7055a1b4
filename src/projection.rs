//! Shared sampling and centering routine behind every selection and gradient
//! estimator.

use crate::error::CoresetError;
use crate::gaussian::Gaussian;
use crate::model::ModelOracle;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

/// Draw `n_samples` rows from `g`.
pub fn sample_gaussian<R: rand::Rng + ?Sized>(
    g: &Gaussian,
    n_samples: usize,
    rng: &mut R,
) -> Result<Array2<f64>, CoresetError> {
    if n_samples == 0 {
        return Err(CoresetError::InvalidInput(
            "sample count must be positive".to_string(),
        ));
    }
    g.sample(n_samples, rng)
}

/// `N × S` matrix with entry `(n, s) = log p(z_n | θ_s)`.
///
/// Columns are evaluated in parallel; each column depends on one sample only.
pub fn log_likelihood_matrix<M: ModelOracle + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    samples: ArrayView2<'_, f64>,
) -> Result<Array2<f64>, CoresetError> {
    let dim = model.parameter_dim(z);
    if samples.ncols() != dim {
        return Err(CoresetError::InvalidInput(format!(
            "samples have {} columns but the model dimension is {dim}",
            samples.ncols()
        )));
    }
    let columns: Vec<Array1<f64>> = (0..samples.nrows())
        .into_par_iter()
        .map(|s| model.log_likelihood(z, samples.row(s)))
        .collect();

    let mut lls = Array2::<f64>::zeros((z.nrows(), samples.nrows()));
    for (mut col, values) in lls.axis_iter_mut(Axis(1)).zip(columns.iter()) {
        col.assign(values);
    }
    Ok(lls)
}

/// Subtract each row's mean over samples in place.
pub fn center_rows(lls: &mut Array2<f64>) {
    if lls.ncols() == 0 {
        return;
    }
    for mut row in lls.axis_iter_mut(Axis(0)) {
        let mean = row.sum() / row.len() as f64;
        row.mapv_inplace(|v| v - mean);
    }
}

/// Sample from `g`, evaluate, and center.
pub fn centered_log_likelihoods<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    g: &Gaussian,
    n_samples: usize,
    rng: &mut R,
) -> Result<Array2<f64>, CoresetError> {
    let samples = sample_gaussian(g, n_samples, rng)?;
    let mut lls = log_likelihood_matrix(model, z, samples.view())?;
    center_rows(&mut lls);
    Ok(lls)
}

/// Centered log-likelihoods together with the residual between the full-data
/// and the weighted log-likelihood at every sample.
#[derive(Debug, Clone)]
pub struct ResidualProjection {
    pub lls: Array2<f64>,
    /// `r_s = Σ_n lls[n,s] − Σ_n w_n lls[n,s]`.
    pub residual: Array1<f64>,
}

impl ResidualProjection {
    pub fn new(lls: Array2<f64>, weights: ArrayView1<'_, f64>) -> Result<Self, CoresetError> {
        if weights.len() != lls.nrows() {
            return Err(CoresetError::InvalidInput(format!(
                "weight vector has length {} but there are {} log-likelihood rows",
                weights.len(),
                lls.nrows()
            )));
        }
        let residual = lls.sum_axis(Axis(0)) - lls.t().dot(&weights);
        Ok(Self { lls, residual })
    }

    pub fn n_samples(&self) -> usize {
        self.residual.len()
    }

    /// `mean_s(lls[n,s] · r_s)`.
    pub fn correlation(&self, n: usize) -> f64 {
        self.lls.row(n).dot(&self.residual) / self.n_samples() as f64
    }

    /// `mean_s(lls[n,s] · r_s)` for every row at once.
    pub fn correlations(&self) -> Array1<f64> {
        self.lls.dot(&self.residual) / self.n_samples() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GaussianLocation, LogisticRegression};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn data() -> Array2<f64> {
        array![[0.5, 1.0], [-1.0, 1.0], [2.0, -1.0], [0.1, -1.0]]
    }

    #[test]
    fn centering_gives_zero_row_means() {
        let z = data();
        let mut rng = StdRng::seed_from_u64(3);
        let lls = centered_log_likelihoods(
            &LogisticRegression,
            z.view(),
            &Gaussian::standard(2),
            64,
            &mut rng,
        )
        .unwrap();
        assert_eq!(lls.dim(), (4, 64));
        for row in lls.rows() {
            assert_abs_diff_eq!(row.sum() / 64.0, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn matrix_columns_match_direct_evaluation() {
        let z = data();
        let samples = array![[0.0, 0.0], [1.0, -0.5], [-2.0, 0.3]];
        let lls = log_likelihood_matrix(&GaussianLocation, z.view(), samples.view()).unwrap();
        for s in 0..3 {
            let direct = GaussianLocation.log_likelihood(z.view(), samples.row(s));
            for n in 0..4 {
                assert_eq!(lls[[n, s]], direct[n]);
            }
        }
    }

    #[test]
    fn seeded_projection_is_reproducible() {
        let z = data();
        let g = Gaussian::standard(2);
        let draw = |seed| {
            centered_log_likelihoods(
                &LogisticRegression,
                z.view(),
                &g,
                16,
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap()
        };
        let (a, b) = (draw(9), draw(9));
        assert_eq!(a, b);
    }

    #[test]
    fn residual_vanishes_for_unit_weights() {
        let lls = array![[1.0, -1.0, 0.5], [0.2, 0.3, -0.5]];
        let full = ResidualProjection::new(lls.clone(), array![1.0, 1.0].view()).unwrap();
        assert!(full.residual.iter().all(|r| r.abs() < 1e-15));

        let empty = ResidualProjection::new(lls, array![0.0, 0.0].view()).unwrap();
        assert_abs_diff_eq!(empty.residual[0], 1.2, epsilon = 1e-15);
        assert_abs_diff_eq!(empty.residual[2], 0.0, epsilon = 1e-15);
        let expected = (1.0 * 1.2 + (-1.0) * (-0.7) + 0.0) / 3.0;
        assert_abs_diff_eq!(empty.correlation(0), expected, epsilon = 1e-15);
        assert_abs_diff_eq!(empty.correlations()[0], expected, epsilon = 1e-15);
    }

    #[test]
    fn wrong_sample_width_is_rejected() {
        let z = data();
        let samples = array![[0.0, 0.0, 1.0]];
        assert!(log_likelihood_matrix(&LogisticRegression, z.view(), samples.view()).is_err());
    }
}
