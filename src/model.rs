//! Per-point log-likelihood oracles.
//!
//! Every model pairs its likelihood with a standard normal prior on the
//! parameter vector, so the log-joint for weights `w` is
//!
//! ```text
//! log p(θ) + Σ_n w_n log p(z_n | θ)
//! ```
//!
//! Rows with zero weight are skipped when evaluating the log-joint and its
//! derivatives, which keeps Laplace fits on small coresets cheap even when N
//! is large.

use crate::error::CoresetError;
use crate::faer_ndarray::{fast_atb, fast_atv};
use crate::probability::{ln_gamma, log1pexp, sigmoid};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Capability set consumed by the coreset builders and the Laplace fit.
pub trait ModelOracle: Sync {
    /// Dimension of θ implied by the data layout.
    fn parameter_dim(&self, z: ArrayView2<'_, f64>) -> usize;

    /// log p(z_n | θ) for every row.
    fn log_likelihood(&self, z: ArrayView2<'_, f64>, theta: ArrayView1<'_, f64>) -> Array1<f64>;

    /// ∇_θ of the weighted log-joint.
    fn grad_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array1<f64>;

    /// ∇²_θ of the weighted log-joint.
    fn hess_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array2<f64>;

    /// Weighted log-joint.
    fn log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> f64 {
        let (rows, w) = active_rows(z, weights);
        let ll = self.log_likelihood(rows.view(), theta);
        w.dot(&ll) + standard_normal_log_prior(theta)
    }

    /// Structural checks run once before any sampling.
    fn validate_data(&self, z: ArrayView2<'_, f64>) -> Result<(), CoresetError> {
        if z.nrows() == 0 {
            return Err(CoresetError::InvalidInput("dataset has no rows".to_string()));
        }
        if z.iter().any(|v| !v.is_finite()) {
            return Err(CoresetError::InvalidInput(
                "dataset contains NaN or infinite values".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn standard_normal_log_prior(theta: ArrayView1<'_, f64>) -> f64 {
    -0.5 * theta.len() as f64 * LN_2PI - 0.5 * theta.dot(&theta)
}

/// Rows and weights restricted to nonzero weights.
fn active_rows(z: ArrayView2<'_, f64>, weights: ArrayView1<'_, f64>) -> (Array2<f64>, Array1<f64>) {
    debug_assert_eq!(z.nrows(), weights.len(), "one weight per data row");
    let active: Vec<usize> = weights
        .iter()
        .enumerate()
        .filter_map(|(i, &w)| (w != 0.0).then_some(i))
        .collect();
    let w = Array1::from_iter(active.iter().map(|&i| weights[i]));
    (z.select(Axis(0), &active), w)
}

/// Gradient and Hessian of `Σ w_n g(x_n·θ) + log N(θ; 0, I)` from the scalar
/// derivatives g'(m_n) and g''(m_n) of each active row.
fn linear_predictor_grad(
    x: &Array2<f64>,
    w: &Array1<f64>,
    d1: &Array1<f64>,
    theta: ArrayView1<'_, f64>,
) -> Array1<f64> {
    let scaled = w * d1;
    fast_atv(x, &scaled) - &theta
}

fn linear_predictor_hess(x: &Array2<f64>, w: &Array1<f64>, d2: &Array1<f64>) -> Array2<f64> {
    let p = x.ncols();
    let c = w * d2;
    let xc = x * &c.insert_axis(Axis(1));
    let mut hess = fast_atb(x, &xc);
    for j in 0..p {
        hess[[j, j]] -= 1.0;
    }
    hess
}

/// Bayesian logistic regression. Rows are `y * [x, 1]` with `y ∈ {-1, +1}`,
/// so `log p(z_n | θ) = -log(1 + exp(-z_n·θ))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticRegression;

impl ModelOracle for LogisticRegression {
    fn parameter_dim(&self, z: ArrayView2<'_, f64>) -> usize {
        z.ncols()
    }

    fn log_likelihood(&self, z: ArrayView2<'_, f64>, theta: ArrayView1<'_, f64>) -> Array1<f64> {
        z.dot(&theta).mapv(|m| -log1pexp(-m))
    }

    fn grad_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array1<f64> {
        let (x, w) = active_rows(z, weights);
        let d1 = x.dot(&theta).mapv(|m| sigmoid(-m));
        linear_predictor_grad(&x, &w, &d1, theta)
    }

    fn hess_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array2<f64> {
        let (x, w) = active_rows(z, weights);
        let d2 = x.dot(&theta).mapv(|m| -sigmoid(m) * sigmoid(-m));
        linear_predictor_hess(&x, &w, &d2)
    }
}

/// Bayesian Poisson regression with a softplus rate `λ = log(1 + exp(x·θ))`.
/// Rows are `[x, 1, y]`: the last column holds the count.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonRegression;

impl PoissonRegression {
    fn split(z: &ArrayView2<'_, f64>) -> (Array2<f64>, Array1<f64>) {
        let d = z.ncols() - 1;
        (z.slice(s![.., ..d]).to_owned(), z.column(d).to_owned())
    }

    #[inline]
    fn rate(m: f64) -> f64 {
        log1pexp(m).max(f64::MIN_POSITIVE)
    }
}

impl ModelOracle for PoissonRegression {
    fn parameter_dim(&self, z: ArrayView2<'_, f64>) -> usize {
        z.ncols().saturating_sub(1)
    }

    fn log_likelihood(&self, z: ArrayView2<'_, f64>, theta: ArrayView1<'_, f64>) -> Array1<f64> {
        let d = z.ncols() - 1;
        let m = z.slice(s![.., ..d]).dot(&theta);
        let y = z.column(d);
        Array1::from_shape_fn(m.len(), |n| {
            let lam = Self::rate(m[n]);
            let yn = y[n];
            let log_term = if yn == 0.0 { 0.0 } else { yn * lam.ln() };
            log_term - lam - ln_gamma(yn + 1.0)
        })
    }

    fn grad_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array1<f64> {
        let (rows, w) = active_rows(z, weights);
        let (x, y) = Self::split(&rows.view());
        let m = x.dot(&theta);
        let d1 = Array1::from_shape_fn(m.len(), |n| {
            let lam = Self::rate(m[n]);
            (y[n] / lam - 1.0) * sigmoid(m[n])
        });
        linear_predictor_grad(&x, &w, &d1, theta)
    }

    fn hess_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array2<f64> {
        let (rows, w) = active_rows(z, weights);
        let (x, y) = Self::split(&rows.view());
        let m = x.dot(&theta);
        let d2 = Array1::from_shape_fn(m.len(), |n| {
            let lam = Self::rate(m[n]);
            let sig = sigmoid(m[n]);
            let ratio = y[n] / lam;
            -ratio / lam * sig * sig + (ratio - 1.0) * sig * (1.0 - sig)
        });
        linear_predictor_hess(&x, &w, &d2)
    }

    fn validate_data(&self, z: ArrayView2<'_, f64>) -> Result<(), CoresetError> {
        if z.ncols() < 2 {
            return Err(CoresetError::InvalidInput(
                "Poisson rows need at least one covariate column and a count column".to_string(),
            ));
        }
        if z.nrows() == 0 || z.iter().any(|v| !v.is_finite()) {
            return Err(CoresetError::InvalidInput(
                "dataset is empty or contains non-finite values".to_string(),
            ));
        }
        let counts = z.column(z.ncols() - 1);
        if let Some((n, &y)) = counts
            .iter()
            .enumerate()
            .find(|(_, y)| **y < 0.0 || y.fract() != 0.0)
        {
            return Err(CoresetError::InvalidInput(format!(
                "row {n} has count {y}; Poisson counts must be non-negative integers"
            )));
        }
        Ok(())
    }
}

/// Unit-variance Gaussian location model: `z_n ~ N(θ, I)`. Its posterior is
/// Gaussian, which makes it a convenient synthetic oracle.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianLocation;

impl ModelOracle for GaussianLocation {
    fn parameter_dim(&self, z: ArrayView2<'_, f64>) -> usize {
        z.ncols()
    }

    fn log_likelihood(&self, z: ArrayView2<'_, f64>, theta: ArrayView1<'_, f64>) -> Array1<f64> {
        let d = theta.len() as f64;
        let diff = &z - &theta.insert_axis(Axis(0));
        diff.map_axis(Axis(1), |r| -0.5 * r.dot(&r) - 0.5 * d * LN_2PI)
    }

    fn grad_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array1<f64> {
        let (rows, w) = active_rows(z, weights);
        fast_atv(&rows, &w) - &theta * (w.sum() + 1.0)
    }

    fn hess_log_joint(
        &self,
        z: ArrayView2<'_, f64>,
        theta: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Array2<f64> {
        debug_assert_eq!(z.ncols(), theta.len());
        let total: f64 = weights.sum();
        Array2::eye(theta.len()) * -(total + 1.0)
    }
}
