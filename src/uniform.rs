use crate::error::CoresetError;
use crate::experiment::CoresetBuilder;
use ndarray::Array1;
use rand::RngExt;

/// Baseline: every cardinality step adds multinomial counts drawn with
/// uniform probabilities over all points.
#[derive(Debug, Clone)]
pub struct UniformCoresetBuilder {
    weights: Array1<f64>,
    drawn: usize,
}

impl UniformCoresetBuilder {
    pub fn new(n_points: usize) -> Result<Self, CoresetError> {
        if n_points == 0 {
            return Err(CoresetError::InvalidInput(
                "cannot subsample an empty dataset".to_string(),
            ));
        }
        Ok(Self {
            weights: Array1::zeros(n_points),
            drawn: 0,
        })
    }
}

impl CoresetBuilder for UniformCoresetBuilder {
    fn build_to<R: rand::Rng + ?Sized>(
        &mut self,
        cardinality: usize,
        rng: &mut R,
    ) -> Result<Array1<f64>, CoresetError> {
        if cardinality < self.drawn {
            return Err(CoresetError::InvalidSchedule(format!(
                "cardinality {cardinality} is below the {} points already drawn",
                self.drawn
            )));
        }
        let n = self.weights.len();
        for _ in self.drawn..cardinality {
            self.weights[rng.random_range(0..n)] += 1.0;
        }
        self.drawn = cardinality;
        Ok(self.weights.clone())
    }
}
