//! Greedy Iterative Geodesic Ascent.
//!
//! Approximates `Σ_n x_n` by a sparse non-negative combination of the rows
//! `x_n` by climbing along great circles of the unit sphere. Each iteration
//! moves the current direction `y_w` towards one vertex `y_f = x_f / ||x_f||`,
//! so after `M` iterations at most `M` rows carry weight.

use crate::error::CoresetError;
use ndarray::{Array1, Array2, ArrayView1, Axis};

const DEGENERATE_TOL: f64 = 1e-12;
const NNLS_MAX_ITERATIONS: usize = 10_000;
const NNLS_TOL: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct Giga {
    x: Array2<f64>,
    norms: Array1<f64>,
    /// Unit rows; zero rows stay zero.
    y: Array2<f64>,
    sum: Array1<f64>,
    sum_norm: f64,
    target: Array1<f64>,
    y_w: Array1<f64>,
    alpha: Array1<f64>,
    iterations: usize,
}

impl Giga {
    pub fn new(x: Array2<f64>) -> Result<Self, CoresetError> {
        if x.nrows() == 0 {
            return Err(CoresetError::InvalidInput(
                "GIGA needs at least one vector".to_string(),
            ));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(CoresetError::InvalidInput(
                "GIGA vectors contain non-finite values".to_string(),
            ));
        }
        let norms = x.map_axis(Axis(1), |row| row.dot(&row).sqrt());
        let mut y = x.clone();
        for (mut row, &nrm) in y.axis_iter_mut(Axis(0)).zip(norms.iter()) {
            if nrm > 0.0 {
                row.mapv_inplace(|v| v / nrm);
            }
        }
        let sum = x.sum_axis(Axis(0));
        let sum_norm = sum.dot(&sum).sqrt();
        let target = if sum_norm > 0.0 {
            &sum / sum_norm
        } else {
            Array1::zeros(sum.len())
        };
        let n = x.nrows();
        let k = x.ncols();
        Ok(Self {
            x,
            norms,
            y,
            sum,
            sum_norm,
            target,
            y_w: Array1::zeros(k),
            alpha: Array1::zeros(n),
            iterations: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    /// Iterations performed so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Grow until `m` iterations have been performed in total.
    pub fn build(&mut self, m: usize) {
        if self.sum_norm == 0.0 {
            log::warn!("GIGA target sums to zero; every weight stays zero");
            return;
        }
        while self.iterations < m {
            if !self.step() {
                log::debug!(
                    "GIGA stopped after {} iterations (direction aligned with target)",
                    self.iterations
                );
                break;
            }
            self.iterations += 1;
        }
    }

    /// One geodesic step. Returns `false` when no admissible vertex remains.
    fn step(&mut self) -> bool {
        if self.alpha.iter().all(|&a| a == 0.0) {
            let scores = self.y.dot(&self.target);
            let Some(f) = first_argmax(
                scores
                    .iter()
                    .enumerate()
                    .filter(|&(n, _)| self.norms[n] > 0.0)
                    .map(|(n, &s)| (n, s)),
            ) else {
                return false;
            };
            self.alpha[f] = 1.0;
            self.y_w = self.y.row(f).to_owned();
            return true;
        }

        let b = self.target.dot(&self.y_w);
        let geodesic = &self.target - &(&self.y_w * b);
        let geodesic_norm = geodesic.dot(&geodesic).sqrt();
        if geodesic_norm < DEGENERATE_TOL {
            return false;
        }

        let to_target = self.y.dot(&self.target);
        let to_current = self.y.dot(&self.y_w);
        let candidates = (0..self.len()).filter_map(|n| {
            if self.norms[n] == 0.0 {
                return None;
            }
            let c = to_current[n];
            let perp = 1.0 - c * c;
            if perp <= DEGENERATE_TOL {
                return None;
            }
            let score = (to_target[n] - b * c) / (geodesic_norm * perp.sqrt());
            score.is_finite().then_some((n, score))
        });
        let Some(f) = first_argmax(candidates) else {
            return false;
        };

        let a = to_target[f];
        let c = to_current[f];
        let num = a - b * c;
        let denom = num + (b - a * c);
        if denom.abs() < DEGENERATE_TOL {
            return false;
        }
        let gamma = (num / denom).clamp(0.0, 1.0);

        self.y_w = &self.y_w * (1.0 - gamma) + &(&self.y.row(f) * gamma);
        self.alpha *= 1.0 - gamma;
        self.alpha[f] += gamma;
        let nrm = self.y_w.dot(&self.y_w).sqrt();
        if nrm > 0.0 {
            self.y_w /= nrm;
            self.alpha /= nrm;
        }
        true
    }

    /// Current weights on the original (unnormalized) rows.
    pub fn weights(&self) -> Array1<f64> {
        if self.sum_norm == 0.0 {
            return Array1::zeros(self.len());
        }
        let scale = self.sum_norm * self.y_w.dot(&self.target);
        Array1::from_shape_fn(self.len(), |n| {
            if self.alpha[n] > 0.0 && self.norms[n] > 0.0 {
                self.alpha[n] * scale / self.norms[n]
            } else {
                0.0
            }
        })
    }

    /// `||Σx − Σ w_n x_n||` at the current weights.
    pub fn error(&self) -> f64 {
        residual_norm(&self.sum, &self.x, self.weights().view())
    }

    /// Refine the weights on the current active set by non-negative least
    /// squares on `||Σx − Σ w_n x_n||²`, then re-derive the geodesic state.
    pub fn optimize(&mut self) {
        let active: Vec<usize> = (0..self.len()).filter(|&n| self.alpha[n] > 0.0).collect();
        if active.is_empty() {
            return;
        }
        let xa = self.x.select(Axis(0), &active);
        let gram = xa.dot(&xa.t());
        let rhs = xa.dot(&self.sum);
        let lipschitz = gram.diag().sum();
        if lipschitz <= 0.0 {
            return;
        }

        let start = self.weights();
        let mut w = Array1::from_iter(active.iter().map(|&n| start[n]));
        for _ in 0..NNLS_MAX_ITERATIONS {
            let grad = gram.dot(&w) - &rhs;
            let next = (&w - &(grad / lipschitz)).mapv(|v| v.max(0.0));
            let change = (&next - &w).mapv(f64::abs).sum();
            w = next;
            if change <= NNLS_TOL * (1.0 + w.mapv(f64::abs).sum()) {
                break;
            }
        }

        let v = xa.t().dot(&w);
        let v_sq = v.dot(&v);
        if v_sq <= 0.0 {
            log::warn!("GIGA refinement collapsed every active weight; keeping the greedy weights");
            return;
        }
        // Optimal rescaling makes ||v|| equal the projection of the target on v.
        let t = (v.dot(&self.sum) / v_sq).max(0.0);
        if t == 0.0 {
            return;
        }
        let w = w * t;
        let v = v * t;
        let v_norm = v.dot(&v).sqrt();

        self.y_w = v / v_norm;
        self.alpha.fill(0.0);
        for (&n, &wn) in active.iter().zip(w.iter()) {
            self.alpha[n] = wn * self.norms[n] / v_norm;
        }
    }
}

fn residual_norm(sum: &Array1<f64>, x: &Array2<f64>, w: ArrayView1<'_, f64>) -> f64 {
    let r = sum - &x.t().dot(&w);
    r.dot(&r).sqrt()
}

/// First index attaining the maximum score.
fn first_argmax(scores: impl Iterator<Item = (usize, f64)>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (n, s) in scores {
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((n, s)),
        }
    }
    best.map(|(n, _)| n)
}
