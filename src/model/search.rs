use super::{to_matrix, Feature, KnnRegressor, ModelError, Weighting};
use crate::config::ModelConfig;
use smartcore::metrics::r2;
use smartcore::model_selection::{BaseKFold, KFold};
use tracing::debug;

/// Train/test index pairs of one k-fold split.
type Splits = Vec<(Vec<usize>, Vec<usize>)>;

#[derive(Debug)]
pub struct SearchOutcome {
    /// Best candidate refitted on all samples.
    pub model: KnnRegressor,
    /// Its mean R² across folds.
    pub score: f64,
    pub folds: usize,
    pub samples: usize,
    pub candidates_scored: usize,
}

/// Every (k, weighting) pair to try, in tie-break order.
pub fn candidates(config: &ModelConfig) -> Vec<(usize, Weighting)> {
    (config.k_min.max(1)..=config.k_max)
        .step_by(config.k_step.max(1))
        .flat_map(|k| [(k, Weighting::Distance), (k, Weighting::Uniform)])
        .collect()
}

/// Fold count for `samples`: the configured one, lowered until every test
/// fold holds at least two samples.
pub fn fold_count(configured: usize, samples: usize) -> usize {
    configured.clamp(2, (samples / 2).max(2))
}

fn select<T: Copy>(values: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| values[i]).collect()
}

/// Mean R² over the splits, or None when the candidate cannot be fitted on
/// some fold or scores a non-finite R² there.
fn cross_validate(
    features: &[Feature],
    targets: &[f64],
    splits: &Splits,
    k: usize,
    weighting: Weighting,
) -> Option<f64> {
    let mut total = 0.0;
    for (train, test) in splits {
        if k > train.len() {
            return None;
        }
        let model =
            KnnRegressor::fit(&select(features, train), &select(targets, train), k, weighting)
                .ok()?;
        let predicted = model.predict(&select(features, test)).ok()?;
        let score = r2(&select(targets, test), &predicted);
        if !score.is_finite() {
            return None;
        }
        total += score;
    }
    Some(total / splits.len() as f64)
}

/// Exhaustive search over the configured k range and both weightings, scored
/// by contiguous k-fold cross validation. Fails when there are fewer samples
/// than the smallest k (or than two), or when no candidate can be scored.
pub fn grid_search(
    features: &[Feature],
    targets: &[f64],
    config: &ModelConfig,
) -> Result<SearchOutcome, ModelError> {
    if features.len() != targets.len() {
        return Err(ModelError::LengthMismatch {
            features: features.len(),
            targets: targets.len(),
        });
    }

    let samples = features.len();
    let required = config.k_min.max(2);
    if samples < required {
        return Err(ModelError::InsufficientTraining { samples, required });
    }

    let folds = fold_count(config.folds, samples);
    let splits: Splits = KFold::default()
        .with_n_splits(folds)
        .with_shuffle(false)
        .split(&to_matrix(features)?)
        .collect();
    // R² needs at least two test samples per fold.
    if splits.iter().any(|(_, test)| test.len() < 2) {
        return Err(ModelError::NoViableCandidate { samples, folds });
    }

    let mut best: Option<(usize, Weighting, f64)> = None;
    let mut scored = 0usize;
    for (k, weighting) in candidates(config) {
        let Some(score) = cross_validate(features, targets, &splits, k, weighting) else {
            debug!("k={} weights={}: not scorable on these folds", k, weighting);
            continue;
        };
        debug!("k={} weights={}: R² {:.4}", k, weighting, score);
        scored += 1;
        if best.is_none_or(|(_, _, s)| score > s) {
            best = Some((k, weighting, score));
        }
    }

    let (k, weighting, score) = best.ok_or(ModelError::NoViableCandidate { samples, folds })?;
    Ok(SearchOutcome {
        model: KnnRegressor::fit(features, targets, k, weighting)?,
        score,
        folds,
        samples,
        candidates_scored: scored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidates() {
        let c = candidates(&ModelConfig::default());
        assert_eq!(c.len(), 38);
        assert_eq!(c[0], (2, Weighting::Distance));
        assert_eq!(c[1], (2, Weighting::Uniform));
        assert_eq!(c.last(), Some(&(38, Weighting::Uniform)));
    }

    #[test]
    fn test_fold_count() {
        assert_eq!(fold_count(5, 40), 5);
        assert_eq!(fold_count(5, 9), 4);
        assert_eq!(fold_count(5, 4), 2);
        assert_eq!(fold_count(5, 2), 2);
        assert_eq!(fold_count(1, 40), 2);
    }

    #[test]
    fn test_empty_training_set_is_an_error() {
        let err = grid_search(&[], &[], &ModelConfig::default()).unwrap_err();
        assert_eq!(err, ModelError::InsufficientTraining { samples: 0, required: 2 });
    }

    #[test]
    fn test_fewer_samples_than_min_k_is_an_error() {
        let err = grid_search(&[[0.0, 0.0]], &[1.0], &ModelConfig::default()).unwrap_err();
        assert_eq!(err, ModelError::InsufficientTraining { samples: 1, required: 2 });
    }

    #[test]
    fn test_single_sample_folds_are_not_scored() {
        // Three samples only split into folds of one and two test samples.
        let err = grid_search(
            &[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
            &[1.0, 2.0, 3.0],
            &ModelConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, ModelError::NoViableCandidate { samples: 3, folds: 2 });
    }

    #[test]
    fn test_constant_targets_have_no_finite_score() {
        let xs: Vec<Feature> = (0..6).map(|i| [i as f64, 0.0]).collect();
        let err = grid_search(&xs, &[5.0; 6], &ModelConfig::default()).unwrap_err();
        assert_eq!(err, ModelError::NoViableCandidate { samples: 6, folds: 3 });
    }

    #[test]
    fn test_small_training_set_still_searches() {
        // Four samples: two folds of two, each training on two points, so only k=2 fits.
        let xs = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]];
        let ys = [10.0, 20.0, 30.0, 40.0];
        let outcome = grid_search(&xs, &ys, &ModelConfig::default()).unwrap();
        assert_eq!(outcome.folds, 2);
        assert_eq!(outcome.candidates_scored, 2);
        assert_eq!(outcome.model.k(), 2);
    }

    #[test]
    fn test_search_prefers_local_model_on_smooth_data() {
        // Price rises along x; a far-away cluster would spoil large k.
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for i in 0..40 {
            let x = (i * 7 % 40) as f64; // interleave so every fold spans the range
            xs.push([x, 0.0]);
            ys.push(1000.0 * x);
        }
        let outcome = grid_search(&xs, &ys, &ModelConfig::default()).unwrap();
        assert_eq!(outcome.samples, 40);
        assert_eq!(outcome.folds, 5);
        assert!(outcome.model.k() <= 4, "k = {}", outcome.model.k());
        assert!(outcome.score > 0.9);
        assert!(outcome.candidates_scored > 0);
    }
}
