use crate::error::CoresetError;
use crate::faer_ndarray::{FaerCholesky, min_eigenvalue};
use crate::gaussian::Gaussian;
use faer::Side;
use ndarray::{ArrayView1, ArrayView2};

/// KL(N(mu0, Sig0) || N(mu1, Sig1)).
///
/// ```text
/// 0.5 * (tr(Sig1^{-1} Sig0) + (mu1-mu0)^T Sig1^{-1} (mu1-mu0)
///        + log|Sig1| - log|Sig0| - D)
/// ```
///
/// Both covariances must be positive definite; otherwise the failure is
/// reported instead of returning NaN.
pub fn gaussian_kl(
    mu0: ArrayView1<'_, f64>,
    sig0: ArrayView2<'_, f64>,
    mu1: ArrayView1<'_, f64>,
    sig1: ArrayView2<'_, f64>,
) -> Result<f64, CoresetError> {
    let d = mu0.len();
    if mu1.len() != d || sig0.dim() != (d, d) || sig1.dim() != (d, d) {
        return Err(CoresetError::InvalidInput(format!(
            "KL arguments disagree in dimension: mu0 {d}, Sig0 {:?}, mu1 {}, Sig1 {:?}",
            sig0.dim(),
            mu1.len(),
            sig1.dim()
        )));
    }

    let chol1 = sig1
        .cholesky(Side::Lower)
        .map_err(|_| CoresetError::CovarianceNotPositiveDefinite {
            context: "KL reference distribution",
            min_eigenvalue: min_eigenvalue(&sig1),
        })?;
    let chol0 = sig0
        .cholesky(Side::Lower)
        .map_err(|_| CoresetError::CovarianceNotPositiveDefinite {
            context: "KL source distribution",
            min_eigenvalue: min_eigenvalue(&sig0),
        })?;

    let trace = {
        let solved = chol1.solve_mat(&sig0.to_owned());
        solved.diag().sum()
    };
    let diff = &mu1 - &mu0;
    let quad = diff.dot(&chol1.solve_vec(&diff));
    let logdet = chol1.log_determinant() - chol0.log_determinant();

    let kl = 0.5 * (trace + quad + logdet - d as f64);
    // Identical inputs can land a hair below zero through round-off.
    let scale = 1.0 + trace.abs() + quad.abs() + logdet.abs();
    if kl < 0.0 && kl > -1e-12 * scale {
        return Ok(0.0);
    }
    Ok(kl)
}

impl Gaussian {
    /// KL(self || other).
    pub fn kl_divergence(&self, other: &Gaussian) -> Result<f64, CoresetError> {
        gaussian_kl(
            self.mean.view(),
            self.covariance.view(),
            other.mean.view(),
            other.covariance.view(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn pair() -> (Gaussian, Gaussian) {
        let a = Gaussian::new(array![0.0, 1.0], array![[1.0, 0.3], [0.3, 2.0]]).unwrap();
        let b = Gaussian::new(array![0.5, -0.5], array![[0.5, 0.0], [0.0, 0.25]]).unwrap();
        (a, b)
    }

    #[test]
    fn kl_of_identical_gaussians_is_zero() {
        let (a, b) = pair();
        assert_abs_diff_eq!(a.kl_divergence(&a).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.kl_divergence(&b).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn kl_is_positive_and_asymmetric() {
        let (a, b) = pair();
        let ab = a.kl_divergence(&b).unwrap();
        let ba = b.kl_divergence(&a).unwrap();
        assert!(ab > 0.0);
        assert!(ba > 0.0);
        assert!((ab - ba).abs() > 1e-3, "KL should be asymmetric: {ab} vs {ba}");
    }

    #[test]
    fn kl_matches_univariate_closed_form() {
        // KL(N(0,1) || N(1,4)) = log 2 + (1 + 1) / 8 - 1/2.
        let kl = gaussian_kl(
            array![0.0].view(),
            array![[1.0]].view(),
            array![1.0].view(),
            array![[4.0]].view(),
        )
        .unwrap();
        assert_abs_diff_eq!(kl, 2.0_f64.ln() + 0.25 - 0.5, epsilon = 1e-12);
    }

    #[test]
    fn singular_reference_covariance_is_reported() {
        let err = gaussian_kl(
            array![0.0, 0.0].view(),
            array![[1.0, 0.0], [0.0, 1.0]].view(),
            array![0.0, 0.0].view(),
            array![[1.0, 1.0], [1.0, 1.0]].view(),
        )
        .unwrap_err();
        assert!(matches!(err, CoresetError::CovarianceNotPositiveDefinite { .. }));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let err = gaussian_kl(
            array![0.0].view(),
            array![[1.0]].view(),
            array![0.0, 0.0].view(),
            array![[1.0, 0.0], [0.0, 1.0]].view(),
        )
        .unwrap_err();
        assert!(matches!(err, CoresetError::InvalidInput(_)));
    }
}
