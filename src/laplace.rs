use crate::error::CoresetError;
use crate::faer_ndarray::{FaerCholesky, min_eigenvalue, symmetrize};
use crate::gaussian::Gaussian;
use crate::model::ModelOracle;
use faer::Side;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use wolfe_bfgs::{Bfgs, BfgsError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LaplaceOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// A line-search stall is accepted as converged when the gradient norm of
    /// the best point is at most this value.
    pub stall_gradient_tolerance: f64,
}

impl Default for LaplaceOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-8,
            stall_gradient_tolerance: 1e-4,
        }
    }
}

/// Gaussian approximation of the weighted posterior at its mode.
///
/// The mode is found by BFGS on `-log_joint` starting from `init`; the
/// covariance is `(-∇² log_joint)^{-1}` at that mode. A mode search that
/// does not converge and a curvature that is not negative definite are both
/// errors, never silently replaced by a fallback.
pub fn laplace_approximation<M: ModelOracle + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    init: ArrayView1<'_, f64>,
    options: &LaplaceOptions,
) -> Result<Gaussian, CoresetError> {
    if weights.len() != z.nrows() {
        return Err(CoresetError::InvalidInput(format!(
            "weight vector has length {} but the dataset has {} rows",
            weights.len(),
            z.nrows()
        )));
    }
    let dim = model.parameter_dim(z);
    if init.len() != dim {
        return Err(CoresetError::InvalidInput(format!(
            "initial mean has length {} but the model dimension is {dim}",
            init.len()
        )));
    }

    let mode = find_mode(model, z, weights, init.to_owned(), options)?;

    let neg_hessian = symmetrize(&-model.hess_log_joint(z, mode.view(), weights));
    let chol = neg_hessian.cholesky(Side::Lower).map_err(|_| {
        CoresetError::CovarianceNotPositiveDefinite {
            context: "Laplace approximation",
            min_eigenvalue: min_eigenvalue(&neg_hessian),
        }
    })?;
    Gaussian::new(mode, chol.inverse())
}

fn find_mode<M: ModelOracle + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    init: Array1<f64>,
    options: &LaplaceOptions,
) -> Result<Array1<f64>, CoresetError> {
    let mut solver = Bfgs::new(init, |theta: &Array1<f64>| {
        let cost = -model.log_joint(z, theta.view(), weights);
        let grad = -model.grad_log_joint(z, theta.view(), weights);
        (cost, grad)
    })
    .with_tolerance(options.tolerance)
    .with_max_iterations(options.max_iterations);

    let solution = match solver.run() {
        Ok(solution) => solution,
        Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
            if last_solution.final_gradient_norm.is_finite()
                && last_solution.final_gradient_norm <= options.stall_gradient_tolerance
            {
                log::debug!(
                    "Laplace line search stalled at ||g||={:.3e} after {} iterations; \
                     accepting mode.",
                    last_solution.final_gradient_norm,
                    last_solution.iterations
                );
                *last_solution
            } else {
                return Err(CoresetError::LaplaceDidNotConverge {
                    iterations: last_solution.iterations,
                    gradient_norm: last_solution.final_gradient_norm,
                    reason: "line search failed away from a stationary point".to_string(),
                });
            }
        }
        Err(BfgsError::MaxIterationsReached { last_solution }) => {
            return Err(CoresetError::LaplaceDidNotConverge {
                iterations: last_solution.iterations,
                gradient_norm: last_solution.final_gradient_norm,
                reason: "iteration limit reached".to_string(),
            });
        }
        Err(e) => {
            return Err(CoresetError::LaplaceDidNotConverge {
                iterations: 0,
                gradient_norm: f64::NAN,
                reason: format!("{e:?}"),
            });
        }
    };

    if solution.final_point.iter().any(|v| !v.is_finite()) {
        return Err(CoresetError::LaplaceDidNotConverge {
            iterations: solution.iterations,
            gradient_norm: solution.final_gradient_norm,
            reason: "mode contains non-finite values".to_string(),
        });
    }
    Ok(solution.final_point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GaussianLocation, LogisticRegression};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    #[test]
    fn gaussian_location_fit_matches_the_conjugate_posterior() {
        let z = array![[1.0, 2.0], [0.5, -1.0], [2.0, 0.0], [-1.0, 1.0]];
        let w = array![2.0, 0.0, 1.0, 0.5];
        let fit = laplace_approximation(
            &GaussianLocation,
            z.view(),
            w.view(),
            array![0.0, 0.0].view(),
            &LaplaceOptions::default(),
        )
        .unwrap();

        let precision = 1.0 + w.sum();
        let expected_mean = z.t().dot(&w) / precision;
        for j in 0..2 {
            assert_abs_diff_eq!(fit.mean[j], expected_mean[j], epsilon = 1e-6);
            for k in 0..2 {
                let expected = if j == k { 1.0 / precision } else { 0.0 };
                assert_abs_diff_eq!(fit.covariance[[j, k]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn zero_weights_recover_the_prior() {
        let z = array![[1.0, -1.0], [0.3, 0.2]];
        let fit = laplace_approximation(
            &LogisticRegression,
            z.view(),
            Array1::zeros(2).view(),
            array![0.5, -0.5].view(),
            &LaplaceOptions::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(fit.mean[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.mean[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.covariance[[0, 0]], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.covariance[[0, 1]], 0.0, epsilon = 1e-8);
    }

    #[test]
    fn logistic_mode_is_stationary() {
        let z = array![
            [0.8, 1.0],
            [-0.4, -1.0],
            [1.1, 1.0],
            [0.2, -1.0],
            [-0.9, 1.0]
        ];
        let w = array![3.0, 1.0, 2.0, 0.5, 1.5];
        let fit = laplace_approximation(
            &LogisticRegression,
            z.view(),
            w.view(),
            array![0.0, 0.0].view(),
            &LaplaceOptions::default(),
        )
        .unwrap();
        let grad = LogisticRegression.grad_log_joint(z.view(), fit.mean.view(), w.view());
        assert!(grad.iter().all(|g| g.abs() < 1e-4), "gradient at mode: {grad}");
        assert!(fit.covariance[[0, 0]] > 0.0 && fit.covariance[[1, 1]] > 0.0);
    }

    /// log-joint θ0² - θ1²: stationary at the origin, which is a saddle.
    struct Saddle;

    impl ModelOracle for Saddle {
        fn parameter_dim(&self, _z: ArrayView2<'_, f64>) -> usize {
            2
        }

        fn log_likelihood(
            &self,
            z: ArrayView2<'_, f64>,
            _theta: ArrayView1<'_, f64>,
        ) -> Array1<f64> {
            Array1::zeros(z.nrows())
        }

        fn log_joint(
            &self,
            _z: ArrayView2<'_, f64>,
            theta: ArrayView1<'_, f64>,
            _w: ArrayView1<'_, f64>,
        ) -> f64 {
            theta[0] * theta[0] - theta[1] * theta[1]
        }

        fn grad_log_joint(
            &self,
            _z: ArrayView2<'_, f64>,
            theta: ArrayView1<'_, f64>,
            _w: ArrayView1<'_, f64>,
        ) -> Array1<f64> {
            array![2.0 * theta[0], -2.0 * theta[1]]
        }

        fn hess_log_joint(
            &self,
            _z: ArrayView2<'_, f64>,
            _theta: ArrayView1<'_, f64>,
            _w: ArrayView1<'_, f64>,
        ) -> Array2<f64> {
            array![[2.0, 0.0], [0.0, -2.0]]
        }
    }

    #[test]
    fn indefinite_curvature_is_reported_not_masked() {
        let z = Array2::<f64>::zeros((1, 2));
        let err = laplace_approximation(
            &Saddle,
            z.view(),
            array![1.0].view(),
            array![0.0, 0.0].view(),
            &LaplaceOptions::default(),
        )
        .unwrap_err();
        match err {
            CoresetError::CovarianceNotPositiveDefinite { min_eigenvalue, .. } => {
                assert_abs_diff_eq!(min_eigenvalue, -2.0, epsilon = 1e-10);
            }
            other => panic!("expected a curvature error, got {other}"),
        }
    }

    #[test]
    fn iteration_cap_is_reported_as_non_convergence() {
        let z = array![[0.8, 1.0], [-0.4, -1.0], [1.1, 1.0]];
        let err = laplace_approximation(
            &LogisticRegression,
            z.view(),
            array![50.0, 20.0, 40.0].view(),
            array![8.0, -8.0].view(),
            &LaplaceOptions {
                max_iterations: 1,
                tolerance: 1e-12,
                stall_gradient_tolerance: 1e-12,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoresetError::LaplaceDidNotConverge { .. }));
    }

    #[test]
    fn mismatched_initial_mean_is_rejected() {
        let z = array![[1.0, 2.0]];
        let err = laplace_approximation(
            &GaussianLocation,
            z.view(),
            array![1.0].view(),
            array![0.0].view(),
            &LaplaceOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoresetError::InvalidInput(_)));
    }
}
