//! Moment-adaptive stochastic gradient descent (Adam, Kingma & Ba 2015).
//!
//! Gradients fed to this optimizer are Monte Carlo estimates. There is no
//! convergence test: it always performs exactly the requested number of
//! iterations.

use crate::error::CoresetError;
use ndarray::{Array1, ArrayView1};

#[derive(Debug, Clone, Copy)]
pub struct AdamOptions {
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamOptions {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Standard decaying step size `1 / sqrt(i + 1)`.
pub fn inverse_sqrt_schedule(iteration: usize) -> f64 {
    1.0 / (iteration as f64 + 1.0).sqrt()
}

/// Per-iteration diagnostics hook: `(x, iteration, gradient)`.
pub type AdamObserver<'a> = &'a mut dyn FnMut(ArrayView1<'_, f64>, usize, ArrayView1<'_, f64>);

/// Run `num_iters` Adam steps from `x0` descending along `grad(x, i)`.
///
/// The observer sees the iterate and its gradient before each update and
/// cannot modify either. A gradient error aborts the run.
pub fn adam<G, S>(
    grad: G,
    x0: Array1<f64>,
    num_iters: usize,
    step_size: S,
    options: &AdamOptions,
    observer: Option<AdamObserver<'_>>,
) -> Result<Array1<f64>, CoresetError>
where
    G: FnMut(ArrayView1<'_, f64>, usize) -> Result<Array1<f64>, CoresetError>,
    S: Fn(usize) -> f64,
{
    projected_adam(grad, x0, num_iters, step_size, options, observer, |_| {})
}

/// [`adam`] with `project` applied to the iterate after every update, so each
/// gradient is evaluated inside the feasible set.
pub fn projected_adam<G, S, P>(
    mut grad: G,
    x0: Array1<f64>,
    num_iters: usize,
    step_size: S,
    options: &AdamOptions,
    mut observer: Option<AdamObserver<'_>>,
    mut project: P,
) -> Result<Array1<f64>, CoresetError>
where
    G: FnMut(ArrayView1<'_, f64>, usize) -> Result<Array1<f64>, CoresetError>,
    S: Fn(usize) -> f64,
    P: FnMut(&mut Array1<f64>),
{
    let n = x0.len();
    let mut x = x0;
    let mut m = Array1::<f64>::zeros(n);
    let mut v = Array1::<f64>::zeros(n);

    for i in 0..num_iters {
        let g = grad(x.view(), i)?;
        if g.len() != n {
            return Err(CoresetError::InvalidInput(format!(
                "gradient length {} does not match parameter length {n}",
                g.len()
            )));
        }
        if let Some(cb) = observer.as_mut() {
            cb(x.view(), i, g.view());
        }

        let bias1 = 1.0 - options.beta1.powi(i as i32 + 1);
        let bias2 = 1.0 - options.beta2.powi(i as i32 + 1);
        let lr = step_size(i);
        for k in 0..n {
            m[k] = (1.0 - options.beta1) * g[k] + options.beta1 * m[k];
            v[k] = (1.0 - options.beta2) * g[k] * g[k] + options.beta2 * v[k];
            let mhat = m[k] / bias1;
            let vhat = v[k] / bias2;
            x[k] -= lr * mhat / (vhat.sqrt() + options.eps);
        }
        project(&mut x);
    }
    Ok(x)
}
