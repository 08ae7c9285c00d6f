//! Price prediction for unobserved cells: a k-nearest-neighbour regressor on
//! cell centroids, with k and the weighting picked by cross validation.

pub mod search;

use crate::config::ModelConfig;
use crate::models::{GridCell, PricedCell};
use geo::Centroid;
use smartcore::algorithm::neighbour::KNNAlgorithmName;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::distance::euclidian::Euclidian;
use smartcore::neighbors::knn_regressor::{KNNRegressor, KNNRegressorParameters};
use smartcore::neighbors::KNNWeightFunction;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

pub use self::search::{grid_search, SearchOutcome};

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("need at least {required} training cells, have {samples}")]
    InsufficientTraining { samples: usize, required: usize },

    #[error("no parameter candidate could be scored with {samples} samples in {folds} folds")]
    NoViableCandidate { samples: usize, folds: usize },

    #[error("{features} feature rows but {targets} targets")]
    LengthMismatch { features: usize, targets: usize },

    #[error("knn regressor: {0}")]
    Regressor(String),
}

impl From<smartcore::error::Failed> for ModelError {
    fn from(e: smartcore::error::Failed) -> Self {
        ModelError::Regressor(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    /// Neighbours weighted by inverse distance; exact hits take all the weight.
    Distance,
    Uniform,
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weighting::Distance => write!(f, "distance"),
            Weighting::Uniform => write!(f, "uniform"),
        }
    }
}

impl From<Weighting> for KNNWeightFunction {
    fn from(w: Weighting) -> Self {
        match w {
            Weighting::Distance => KNNWeightFunction::Distance,
            Weighting::Uniform => KNNWeightFunction::Uniform,
        }
    }
}

pub type Feature = [f64; 2];

type Knn = KNNRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>, Euclidian<f64>>;

pub(crate) fn to_matrix(rows: &[Feature]) -> Result<DenseMatrix<f64>, ModelError> {
    let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
    Ok(DenseMatrix::from_2d_vec(&rows)?)
}

/// smartcore's KNN regressor over cell centroids, remembering the parameters
/// it was fitted with.
#[derive(Debug)]
pub struct KnnRegressor {
    k: usize,
    weighting: Weighting,
    inner: Knn,
}

impl KnnRegressor {
    pub fn fit(
        features: &[Feature],
        targets: &[f64],
        k: usize,
        weighting: Weighting,
    ) -> Result<Self, ModelError> {
        if features.len() != targets.len() {
            return Err(ModelError::LengthMismatch {
                features: features.len(),
                targets: targets.len(),
            });
        }
        if k == 0 || features.len() < k {
            return Err(ModelError::InsufficientTraining {
                samples: features.len(),
                required: k.max(1),
            });
        }

        let params = KNNRegressorParameters::<f64, Euclidian<f64>>::default()
            .with_k(k)
            .with_weight(weighting.into())
            .with_algorithm(KNNAlgorithmName::LinearSearch);
        let inner = Knn::fit(&to_matrix(features)?, &targets.to_vec(), params)?;

        Ok(Self { k, weighting, inner })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn weighting(&self) -> Weighting {
        self.weighting
    }

    pub fn predict(&self, queries: &[Feature]) -> Result<Vec<f64>, ModelError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.inner.predict(&to_matrix(queries)?)?)
    }
}

fn centroid(cell_polygon: &geo::Polygon<f64>) -> Option<Feature> {
    cell_polygon.centroid().map(|p| [p.x(), p.y()])
}

/// Train on the observed cells priced above the threshold and predict every
/// cell of the grid, observed ones included.
pub fn predict_cells(
    observed: &[PricedCell],
    grid: &[GridCell],
    config: &ModelConfig,
) -> Result<(Vec<PricedCell>, SearchOutcome), ModelError> {
    let (features, targets): (Vec<Feature>, Vec<f64>) = observed
        .iter()
        .filter_map(|c| match c.price {
            Some(price) if price > config.train_threshold => {
                centroid(&c.polygon).map(|f| (f, price))
            }
            _ => None,
        })
        .unzip();

    info!(
        "Training on {} of {} observed cells (price > {})",
        features.len(),
        observed.len(),
        config.train_threshold
    );

    let outcome = grid_search(&features, &targets, config)?;
    info!(
        "Best model: k={} weights={} (mean R² {:.3} over {} folds)",
        outcome.model.k(),
        outcome.model.weighting(),
        outcome.score,
        outcome.folds
    );

    let centroids: Vec<Option<Feature>> = grid.iter().map(|c| centroid(&c.polygon)).collect();
    let queries: Vec<Feature> = centroids.iter().flatten().copied().collect();
    let mut prices = outcome.model.predict(&queries)?.into_iter();

    let skipped = grid.len() - queries.len();
    let predicted: Vec<PricedCell> = grid
        .iter()
        .zip(&centroids)
        .map(|(cell, c)| PricedCell {
            id: cell.id,
            price: c.and_then(|_| prices.next()),
            polygon: cell.polygon.clone(),
        })
        .collect();

    if skipped > 0 {
        warn!("{} degenerate cells left without a prediction", skipped);
    }
    Ok((predicted, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellId;
    use crate::spatial::grid::{build_grid, Bounds};

    #[test]
    fn test_uniform_is_mean_of_k_nearest() {
        let xs = [[0.0, 0.0], [1.0, 0.0], [10.0, 0.0]];
        let ys = [1.0, 3.0, 100.0];
        let m = KnnRegressor::fit(&xs, &ys, 2, Weighting::Uniform).unwrap();
        assert_eq!(m.predict(&[[0.4, 0.0]]).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_distance_weighting() {
        let xs = [[0.0, 0.0], [3.0, 0.0], [5.0, 0.0]];
        let ys = [10.0, 40.0, 70.0];
        let m = KnnRegressor::fit(&xs, &ys, 2, Weighting::Distance).unwrap();
        let p = m.predict(&[[3.0, 0.0], [1.0, 0.0]]).unwrap();
        // exact hit wins outright
        assert_eq!(p[0], 40.0);
        // weights 1/1 and 1/2 → (10 + 20) / 1.5
        assert!((p[1] - 20.0).abs() < 1e-9, "{}", p[1]);
    }

    #[test]
    fn test_predict_nothing() {
        let m = KnnRegressor::fit(&[[0.0, 0.0]], &[1.0], 1, Weighting::Uniform).unwrap();
        assert!(m.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_fit_rejects_too_few_samples() {
        assert_eq!(
            KnnRegressor::fit(&[[0.0, 0.0]], &[1.0], 2, Weighting::Uniform).unwrap_err(),
            ModelError::InsufficientTraining { samples: 1, required: 2 }
        );
        assert!(matches!(
            KnnRegressor::fit(&[[0.0, 0.0]], &[], 1, Weighting::Uniform),
            Err(ModelError::LengthMismatch { .. })
        ));
    }

    fn grid() -> Vec<GridCell> {
        build_grid(&Bounds { min_lon: 0.0, max_lon: 3.0, min_lat: 0.0, max_lat: 3.0 }, 0.5, 0.5).unwrap()
    }

    #[test]
    fn test_predict_cells_covers_whole_grid() {
        let grid = grid();
        // price grows with longitude and a little with latitude; one cell below the threshold
        let observed: Vec<PricedCell> = grid
            .iter()
            .filter(|c| (c.id.col + c.id.row) % 2 == 0)
            .map(|c| PricedCell {
                price: Some(60_000.0 + 10_000.0 * c.id.col as f64 + 1_000.0 * c.id.row as f64),
                ..PricedCell::from(c.clone())
            })
            .chain(std::iter::once(PricedCell {
                price: Some(1_000.0),
                ..PricedCell::from(grid[1].clone())
            }))
            .collect();

        let config = ModelConfig::default();
        let (predicted, outcome) = predict_cells(&observed, &grid, &config).unwrap();

        assert_eq!(predicted.len(), grid.len());
        assert_eq!(outcome.samples, 18);
        for (p, g) in predicted.iter().zip(&grid) {
            assert_eq!(p.id, g.id);
            let price = p.price.unwrap();
            assert!((60_000.0..=115_000.0).contains(&price), "{} → {}", p.id, price);
        }
        let price_at = |id| predicted.iter().find(|c| c.id == id).and_then(|c| c.price).unwrap();
        assert!(price_at(CellId::new(5, 5)) > price_at(CellId::new(0, 0)));
    }

    #[test]
    fn test_predict_cells_without_training_data_fails() {
        let grid = grid();
        let cheap: Vec<PricedCell> = grid
            .iter()
            .map(|c| PricedCell { price: Some(10.0), ..PricedCell::from(c.clone()) })
            .collect();
        let err = predict_cells(&cheap, &grid, &ModelConfig::default()).unwrap_err();
        assert_eq!(err, ModelError::InsufficientTraining { samples: 0, required: 2 });
    }
}
