//! Adaptive coreset construction.
//!
//! Each step picks the point whose centered log-likelihood correlates best
//! with the residual between the full-data and the coreset log-likelihood,
//! then re-optimizes the weights by stochastic descent on a sampled estimate
//! of the KL gradient. Every gradient evaluation refits the Laplace
//! approximation at the current weights and resamples from it.

use crate::adam::{AdamOptions, inverse_sqrt_schedule, projected_adam};
use crate::error::CoresetError;
use crate::experiment::CoresetBuilder;
use crate::gaussian::Gaussian;
use crate::laplace::{LaplaceOptions, laplace_approximation};
use crate::model::ModelOracle;
use crate::projection::{ResidualProjection, centered_log_likelihoods};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, array};

/// How the weights are refit after a point is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightUpdate {
    /// Two-parameter search `β (w + α e_n)`.
    Line,
    /// Every coordinate of the support `{w > 0} ∪ {n}`.
    Full,
}

#[derive(Debug, Clone, Copy)]
pub struct RiemannOptions {
    pub n_samples: usize,
    pub adam_iterations: usize,
    pub update: WeightUpdate,
    pub laplace: LaplaceOptions,
}

impl Default for RiemannOptions {
    fn default() -> Self {
        Self {
            n_samples: 20,
            adam_iterations: 10_000,
            update: WeightUpdate::Line,
            laplace: LaplaceOptions::default(),
        }
    }
}

/// Smallest weight a selected point may take during its update; the new
/// point always ends the step active.
pub const MIN_SELECTED_WEIGHT: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub selected: usize,
    pub was_active: bool,
}

/// Index of the point whose log-likelihood best explains the residual.
///
/// Scores are `mean_s(lls[n,s] r_s) / std_n`; active points are scored by the
/// absolute value so they can be pushed in either direction.
pub fn riemann_select<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    reference: &Gaussian,
    n_samples: usize,
    rng: &mut R,
) -> Result<usize, CoresetError> {
    let lls = centered_log_likelihoods(model, z, reference, n_samples, rng)?;
    let projection = ResidualProjection::new(lls, weights)?;
    let correlations = projection.correlations();

    let mut best: Option<(usize, f64)> = None;
    for (n, row) in projection.lls.rows().into_iter().enumerate() {
        let std = (row.dot(&row) / n_samples as f64).sqrt();
        let mut score = correlations[n] / std;
        if weights[n] > 0.0 {
            score = score.abs();
        }
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if score <= b => {}
            _ => best = Some((n, score)),
        }
    }
    best.map(|(n, _)| n).ok_or_else(|| {
        CoresetError::InvalidInput(
            "no data point has a finite selection score (all log-likelihoods constant over samples)"
                .to_string(),
        )
    })
}

/// Centered log-likelihoods under the Laplace fit at `max(weights, 0)`.
fn resample_at<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: &Array1<f64>,
    init: &Array1<f64>,
    options: &RiemannOptions,
    rng: &mut R,
) -> Result<Array2<f64>, CoresetError> {
    let clipped = weights.mapv(|v| v.max(0.0));
    let fit = laplace_approximation(model, z, clipped.view(), init.view(), &options.laplace)?;
    centered_log_likelihoods(model, z, &fit, options.n_samples, rng)
}

/// Sampled `(dKL/dα, dKL/dβ)` at `ab = (α, β)`.
#[allow(clippy::too_many_arguments)]
pub fn line_gradient<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    n: usize,
    ab: ArrayView1<'_, f64>,
    init: &Array1<f64>,
    options: &RiemannOptions,
    rng: &mut R,
) -> Result<Array1<f64>, CoresetError> {
    let (alpha, beta) = (ab[0], ab[1]);
    let mut direction = weights.to_owned();
    direction[n] += alpha;
    let wab = &direction * beta;

    let lls = resample_at(model, z, &wab, init, options, rng)?;
    let projection = ResidualProjection::new(lls, wab.view())?;
    let s = projection.n_samples() as f64;

    let d_alpha = -beta * projection.correlation(n);
    let d_beta = -projection.lls.t().dot(&direction).dot(&projection.residual) / s;
    Ok(array![d_alpha, d_beta])
}

/// Adam over `(α, β)` from `(0, 1)`; returns `β (w + α e_n)`.
///
/// Every iterate is projected onto `w_n + α ≥ ε`, `β ≥ ε` with
/// `ε = MIN_SELECTED_WEIGHT`, so the result is non-negative and point `n` is
/// active.
pub fn optimize_line<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    n: usize,
    init: &Array1<f64>,
    options: &RiemannOptions,
    rng: &mut R,
) -> Result<Array1<f64>, CoresetError> {
    let alpha_floor = MIN_SELECTED_WEIGHT - weights[n];
    let ab = projected_adam(
        |ab, _| line_gradient(model, z, weights, n, ab, init, options, &mut *rng),
        array![0.0, 1.0],
        options.adam_iterations,
        inverse_sqrt_schedule,
        &AdamOptions::default(),
        None,
        |ab| {
            ab[0] = ab[0].max(alpha_floor);
            ab[1] = ab[1].max(MIN_SELECTED_WEIGHT);
        },
    )?;
    let mut updated = weights.to_owned();
    updated[n] += ab[0];
    updated *= ab[1];
    Ok(updated.mapv(|v| v.max(0.0)))
}

/// Sampled `dKL/dw`, zero outside `support`.
pub fn full_gradient<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    support: &[usize],
    init: &Array1<f64>,
    options: &RiemannOptions,
    rng: &mut R,
) -> Result<Array1<f64>, CoresetError> {
    let lls = resample_at(model, z, &weights.to_owned(), init, options, rng)?;
    let projection = ResidualProjection::new(lls, weights)?;
    let mut grad = Array1::<f64>::zeros(weights.len());
    for &k in support {
        grad[k] = -projection.correlation(k);
    }
    Ok(grad)
}

/// Adam over the support `{w > 0} ∪ {n}`; coordinates outside it stay zero.
/// Iterates are kept non-negative, with `w_n ≥ MIN_SELECTED_WEIGHT`.
pub fn optimize_full<M: ModelOracle + ?Sized, R: rand::Rng + ?Sized>(
    model: &M,
    z: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    n: usize,
    init: &Array1<f64>,
    options: &RiemannOptions,
    rng: &mut R,
) -> Result<Array1<f64>, CoresetError> {
    let support: Vec<usize> = (0..weights.len())
        .filter(|&k| k == n || weights[k] > 0.0)
        .collect();
    let mut start = weights.to_owned();
    start[n] = start[n].max(MIN_SELECTED_WEIGHT);
    projected_adam(
        |w, _| full_gradient(model, z, w, &support, init, options, &mut *rng),
        start,
        options.adam_iterations,
        inverse_sqrt_schedule,
        &AdamOptions::default(),
        None,
        |w| {
            for &k in &support {
                w[k] = w[k].max(0.0);
            }
            w[n] = w[n].max(MIN_SELECTED_WEIGHT);
        },
    )
}

/// Incremental state: current weights, the fixed sampling reference and the
/// number of selection steps taken.
pub struct RiemannCoresetBuilder<'m, 'd, M: ModelOracle + ?Sized> {
    model: &'m M,
    z: ArrayView2<'d, f64>,
    weights: Array1<f64>,
    reference: Gaussian,
    options: RiemannOptions,
    steps: usize,
}

impl<'m, 'd, M: ModelOracle + ?Sized> RiemannCoresetBuilder<'m, 'd, M> {
    pub fn new(
        model: &'m M,
        z: ArrayView2<'d, f64>,
        reference: Gaussian,
        options: RiemannOptions,
    ) -> Result<Self, CoresetError> {
        let dim = model.parameter_dim(z);
        if reference.dim() != dim {
            return Err(CoresetError::InvalidInput(format!(
                "reference distribution has dimension {} but the model has {dim}",
                reference.dim()
            )));
        }
        if options.n_samples < 2 {
            return Err(CoresetError::InvalidInput(format!(
                "the residual estimator needs at least two samples, got {}",
                options.n_samples
            )));
        }
        if options.adam_iterations == 0 {
            return Err(CoresetError::InvalidInput(
                "the weight update needs at least one Adam iteration".to_string(),
            ));
        }
        Ok(Self {
            model,
            z,
            weights: Array1::zeros(z.nrows()),
            reference,
            options,
            steps: 0,
        })
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Select one point and refit the weights.
    pub fn step<R: rand::Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<StepOutcome, CoresetError> {
        let selected = riemann_select(
            self.model,
            self.z,
            self.weights.view(),
            &self.reference,
            self.options.n_samples,
            rng,
        )?;
        let was_active = self.weights[selected] > 0.0;
        let init = self.reference.mean.clone();
        self.weights = match self.options.update {
            WeightUpdate::Line => optimize_line(
                self.model,
                self.z,
                self.weights.view(),
                selected,
                &init,
                &self.options,
                rng,
            )?,
            WeightUpdate::Full => optimize_full(
                self.model,
                self.z,
                self.weights.view(),
                selected,
                &init,
                &self.options,
                rng,
            )?,
        };
        self.steps += 1;
        log::debug!(
            "step {}: selected {selected} (was active: {was_active}), total mass {:.4}",
            self.steps,
            self.weights.sum()
        );
        Ok(StepOutcome {
            selected,
            was_active,
        })
    }
}

impl<M: ModelOracle + ?Sized> CoresetBuilder for RiemannCoresetBuilder<'_, '_, M> {
    fn build_to<R: rand::Rng + ?Sized>(
        &mut self,
        cardinality: usize,
        rng: &mut R,
    ) -> Result<Array1<f64>, CoresetError> {
        if cardinality < self.steps {
            return Err(CoresetError::InvalidSchedule(format!(
                "cardinality {cardinality} is below the {} steps already taken",
                self.steps
            )));
        }
        while self.steps < cardinality {
            self.step(rng)?;
        }
        Ok(self.weights.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GaussianLocation;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn clustered(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 2), |(i, j)| {
            let t = i as f64;
            if j == 0 {
                1.0 + 0.05 * t.sin()
            } else {
                -0.5 + 0.05 * t.cos()
            }
        })
    }

    fn quick(update: WeightUpdate) -> RiemannOptions {
        RiemannOptions {
            n_samples: 20,
            adam_iterations: 5,
            update,
            laplace: LaplaceOptions::default(),
        }
    }

    #[test]
    fn selection_ignores_constant_rows_and_prefers_informative_ones() {
        // GaussianLocation log-likelihoods always vary with θ, so use a
        // logistic row of zeros to get a constant one.
        let z = ndarray::array![[0.0, 0.0], [1.0, 0.5], [0.9, 0.4]];
        let mut rng = StdRng::seed_from_u64(2);
        let n = riemann_select(
            &crate::model::LogisticRegression,
            z.view(),
            Array1::zeros(3).view(),
            &Gaussian::standard(2),
            50,
            &mut rng,
        )
        .unwrap();
        assert_ne!(n, 0);
    }

    #[test]
    fn all_constant_rows_cannot_be_scored() {
        let z = Array2::<f64>::zeros((3, 2));
        let mut rng = StdRng::seed_from_u64(2);
        let err = riemann_select(
            &crate::model::LogisticRegression,
            z.view(),
            Array1::zeros(3).view(),
            &Gaussian::standard(2),
            10,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, CoresetError::InvalidInput(_)));
    }

    #[test]
    fn line_gradient_pushes_alpha_up_for_an_underweighted_point() {
        let z = clustered(10);
        let mut rng = StdRng::seed_from_u64(4);
        let options = quick(WeightUpdate::Line);
        let g = line_gradient(
            &GaussianLocation,
            z.view(),
            Array1::zeros(10).view(),
            0,
            array![0.0, 1.0].view(),
            &Array1::zeros(2),
            &options,
            &mut rng,
        )
        .unwrap();
        assert_eq!(g.len(), 2);
        assert!(g[0] < 0.0, "dKL/dalpha should be negative, got {}", g[0]);
        // With w = 0 and α = 0 the β-direction is empty.
        assert_eq!(g[1], 0.0);
    }

    #[test]
    fn full_gradient_is_zero_off_support() {
        let z = clustered(6);
        let mut rng = StdRng::seed_from_u64(6);
        let g = full_gradient(
            &GaussianLocation,
            z.view(),
            array![1.0, 0.0, 0.0, 2.0, 0.0, 0.0].view(),
            &[0, 3],
            &Array1::zeros(2),
            &RiemannOptions {
                n_samples: 400,
                ..quick(WeightUpdate::Full)
            },
            &mut rng,
        )
        .unwrap();
        for k in [1, 2, 4, 5] {
            assert_eq!(g[k], 0.0);
        }
        assert!(g[0] < 0.0 && g[3] < 0.0);
    }

    fn check_step_invariants(update: WeightUpdate) {
        // Many points and few Adam iterations keep the coreset underweighted.
        let z = clustered(200);
        let mut rng = StdRng::seed_from_u64(21);
        let mut builder = RiemannCoresetBuilder::new(
            &GaussianLocation,
            z.view(),
            Gaussian::standard(2),
            quick(update),
        )
        .unwrap();
        for step in 1..=3 {
            let outcome = builder.step(&mut rng).unwrap();
            let w = builder.weights();
            if !outcome.was_active {
                assert!(w[outcome.selected] != 0.0, "step {step}: selected point left inactive");
            }
            let active = w.iter().filter(|&&v| v > 0.0).count();
            assert!(active <= step);
            assert!(w.iter().all(|&v| v >= 0.0));
        }
        assert_eq!(builder.steps(), 3);
    }

    #[test]
    fn line_steps_activate_the_selected_point() {
        check_step_invariants(WeightUpdate::Line);
    }

    #[test]
    fn full_steps_activate_the_selected_point() {
        check_step_invariants(WeightUpdate::Full);
    }

    /// Long enough Adam runs that α can move well away from its start.
    fn run_long(update: WeightUpdate, steps: usize) -> Array1<f64> {
        let z = clustered(200);
        let mut rng = StdRng::seed_from_u64(17);
        let mut builder = RiemannCoresetBuilder::new(
            &GaussianLocation,
            z.view(),
            Gaussian::standard(2),
            RiemannOptions {
                adam_iterations: 300,
                ..quick(update)
            },
        )
        .unwrap();
        for step in 1..=steps {
            let outcome = builder.step(&mut rng).unwrap();
            let w = builder.weights();
            assert!(
                w[outcome.selected] > 0.0,
                "{update:?} step {step}: point {} has weight {}",
                outcome.selected,
                w[outcome.selected]
            );
            assert!(w.iter().all(|v| v.is_finite() && *v >= 0.0));
            assert!(w.iter().filter(|&&v| v > 0.0).count() <= step);
        }
        builder.weights().to_owned()
    }

    #[test]
    fn long_line_updates_keep_every_selected_point_active() {
        let w = run_long(WeightUpdate::Line, 6);
        assert!(w.sum() > 0.0);
    }

    #[test]
    fn long_full_updates_approach_the_full_data_mass() {
        // The location posterior is matched exactly at total mass N = 200.
        let w = run_long(WeightUpdate::Full, 8);
        let mass = w.sum();
        assert!(mass > 0.0 && mass < 1.1 * 200.0, "total mass {mass}");
    }

    #[test]
    fn line_update_cannot_deactivate_the_selected_point() {
        // Heavy existing weight on point 0 makes the gradient push α down.
        let z = clustered(20);
        let mut w = Array1::zeros(20);
        w[0] = 400.0;
        let mut rng = StdRng::seed_from_u64(9);
        let updated = optimize_line(
            &GaussianLocation,
            z.view(),
            w.view(),
            1,
            &Array1::zeros(2),
            &RiemannOptions {
                adam_iterations: 200,
                ..quick(WeightUpdate::Line)
            },
            &mut rng,
        )
        .unwrap();
        assert!(updated[1] > 0.0, "point 1 weight {}", updated[1]);
        assert!(updated.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn zero_adam_iterations_are_rejected() {
        let z = clustered(5);
        let err = RiemannCoresetBuilder::new(
            &GaussianLocation,
            z.view(),
            Gaussian::standard(2),
            RiemannOptions {
                adam_iterations: 0,
                ..quick(WeightUpdate::Full)
            },
        );
        assert!(matches!(err, Err(CoresetError::InvalidInput(_))));
    }

    #[test]
    fn shrinking_cardinality_is_rejected() {
        let z = clustered(5);
        let mut rng = StdRng::seed_from_u64(1);
        let mut builder = RiemannCoresetBuilder::new(
            &GaussianLocation,
            z.view(),
            Gaussian::standard(2),
            quick(WeightUpdate::Line),
        )
        .unwrap();
        builder.build_to(2, &mut rng).unwrap();
        assert!(matches!(
            builder.build_to(1, &mut rng),
            Err(CoresetError::InvalidSchedule(_))
        ));
    }
}
