use crate::error::CoresetError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// Regression family whose per-point log-likelihoods are being summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    LogisticRegression,
    PoissonRegression,
}

impl ModelFamily {
    /// Short tag used on the command line and in data/result paths.
    pub fn tag(self) -> &'static str {
        match self {
            ModelFamily::LogisticRegression => "lr",
            ModelFamily::PoissonRegression => "poiss",
        }
    }
}

impl FromStr for ModelFamily {
    type Err = CoresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lr" => Ok(ModelFamily::LogisticRegression),
            "poiss" => Ok(ModelFamily::PoissonRegression),
            other => Err(CoresetError::UnsupportedConfiguration(format!(
                "unknown model family '{other}' (expected 'lr' or 'poiss')"
            ))),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Coreset construction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// GIGA on a fixed random projection.
    Hilbert,
    /// GIGA followed by a non-negative least-squares weight refinement.
    HilbertCorrected,
    /// Adaptive selection with a two-parameter line update.
    Riemann,
    /// Adaptive selection with a full weight-vector update.
    RiemannCorrected,
    /// Multinomial subsampling with uniform probabilities.
    Uniform,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Hilbert,
        Algorithm::HilbertCorrected,
        Algorithm::Riemann,
        Algorithm::RiemannCorrected,
        Algorithm::Uniform,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Hilbert => "hilbert",
            Algorithm::HilbertCorrected => "hilbert_corr",
            Algorithm::Riemann => "riemann",
            Algorithm::RiemannCorrected => "riemann_corr",
            Algorithm::Uniform => "uniform",
        }
    }
}

impl FromStr for Algorithm {
    type Err = CoresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Algorithm::ALL.iter().map(|a| a.name()).collect();
                CoresetError::UnsupportedConfiguration(format!(
                    "unknown algorithm '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Strictly increasing, non-empty list of target coreset sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct CardinalitySchedule(Vec<usize>);

impl CardinalitySchedule {
    pub fn new(sizes: Vec<usize>) -> Result<Self, CoresetError> {
        if sizes.is_empty() {
            return Err(CoresetError::InvalidSchedule(
                "the schedule must contain at least one cardinality".to_string(),
            ));
        }
        if sizes[0] == 0 {
            return Err(CoresetError::InvalidSchedule(
                "cardinalities must be at least 1".to_string(),
            ));
        }
        if let Some(pair) = sizes.windows(2).find(|w| w[1] <= w[0]) {
            return Err(CoresetError::InvalidSchedule(format!(
                "cardinalities must be strictly increasing, found {} followed by {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self(sizes))
    }

    pub fn sizes(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max(&self) -> usize {
        self.0.last().copied().unwrap_or(0)
    }
}

impl Default for CardinalitySchedule {
    fn default() -> Self {
        Self(vec![1, 2, 5, 10, 20, 50, 100])
    }
}

impl TryFrom<Vec<usize>> for CardinalitySchedule {
    type Error = CoresetError;

    fn try_from(sizes: Vec<usize>) -> Result<Self, Self::Error> {
        Self::new(sizes)
    }
}

impl From<CardinalitySchedule> for Vec<usize> {
    fn from(schedule: CardinalitySchedule) -> Self {
        schedule.0
    }
}

/// Per-point coreset weights; zero outside the active set.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoresetWeights(pub Array1<f64>);

impl CoresetWeights {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &w)| (w != 0.0).then_some(i))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.0.iter().filter(|&&w| w != 0.0).count()
    }

    pub fn total_mass(&self) -> f64 {
        self.0.sum()
    }
}

impl Deref for CoresetWeights {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for CoresetWeights {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Array1<f64>> for CoresetWeights {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<CoresetWeights> for Array1<f64> {
    fn from(values: CoresetWeights) -> Self {
        values.0
    }
}
