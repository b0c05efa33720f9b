use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, TreeParams};
use crate::data::FeatureMatrix;

// ---------------------------------------------------------------------------
// Random-forest regressor
// ---------------------------------------------------------------------------

/// Errors raised while fitting or evaluating a forest.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("empty training set")]
    EmptyTrainingSet,

    #[error("row has {got} features, model expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("{rows} rows but {targets} targets")]
    TargetLengthMismatch { rows: usize, targets: usize },
}

/// Forest hyperparameters. The defaults mirror a plain regression forest:
/// 100 trees, unbounded depth, one sample per leaf, p/3 features per split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            n_trees: 100,
            max_depth: None,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// An ensemble of bootstrap regression trees. Its per-tree predictions are
/// the uncertainty distribution the active learner ranks on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub config: ForestConfig,
    pub feature_names: Vec<String>,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(matrix: &FeatureMatrix, targets: &[f64], config: ForestConfig) -> Result<Self, ModelError> {
        if matrix.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if matrix.len() != targets.len() {
            return Err(ModelError::TargetLengthMismatch {
                rows: matrix.len(),
                targets: targets.len(),
            });
        }

        let n = matrix.len();
        let p = matrix.n_features();
        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: 2,
            min_samples_leaf: config.min_samples_leaf,
            max_features: (p / 3).max(1),
        };

        let mut trees = Vec::with_capacity(config.n_trees);
        for t in 0..config.n_trees {
            // One independent stream per tree keeps refits reproducible.
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(RegressionTree::fit(
                &matrix.rows,
                targets,
                &bootstrap,
                &params,
                &mut rng,
            ));
        }

        Ok(RandomForest {
            config,
            feature_names: matrix.feature_names.clone(),
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Ensemble mean for a single row.
    pub fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        let dist = self.predict_row_distribution(row)?;
        Ok(dist.iter().sum::<f64>() / dist.len() as f64)
    }

    /// Per-tree predictions for a single row.
    pub fn predict_row_distribution(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if row.len() != self.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features(),
                got: row.len(),
            });
        }
        Ok(self.trees.iter().map(|t| t.predict(row)).collect())
    }

    /// Per-tree predictions for many rows: `rows.len()` × `n_trees`.
    pub fn predict_distribution(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        rows.iter().map(|r| self.predict_row_distribution(r)).collect()
    }

    // -- Persistence --------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("writing model {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening model {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing model {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (FeatureMatrix, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, (i % 7) as f64])
            .collect();
        let targets: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] + r[1]).collect();
        (
            FeatureMatrix {
                feature_names: vec!["x".to_string(), "z".to_string()],
                rows,
            },
            targets,
        )
    }

    #[test]
    fn interpolates_training_data_reasonably() {
        let (matrix, targets) = linear_data(60);
        let forest = RandomForest::fit(&matrix, &targets, ForestConfig::default()).unwrap();
        let pred = forest.predict(&[30.0, 2.0]).unwrap();
        // 2*30 + 2 = 62; a forest on 60 noiseless points should land close.
        assert!((pred - 62.0).abs() < 8.0, "pred = {pred}");
    }

    #[test]
    fn distribution_shape_and_determinism() {
        let (matrix, targets) = linear_data(30);
        let cfg = ForestConfig {
            n_trees: 25,
            ..ForestConfig::default()
        };
        let a = RandomForest::fit(&matrix, &targets, cfg).unwrap();
        let b = RandomForest::fit(&matrix, &targets, cfg).unwrap();
        let rows = vec![vec![5.0, 1.0], vec![12.0, 3.0]];
        let da = a.predict_distribution(&rows).unwrap();
        let db = b.predict_distribution(&rows).unwrap();
        assert_eq!(da.len(), 2);
        assert_eq!(da[0].len(), 25);
        assert_eq!(da, db);
    }

    #[test]
    fn dimension_errors() {
        let (matrix, targets) = linear_data(10);
        let forest = RandomForest::fit(&matrix, &targets, ForestConfig::default()).unwrap();
        assert!(matches!(
            forest.predict(&[1.0]),
            Err(ModelError::DimensionMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            RandomForest::fit(&matrix, &targets[..5], ForestConfig::default()),
            Err(ModelError::TargetLengthMismatch { .. })
        ));
    }

    #[test]
    fn save_and_load() {
        let (matrix, targets) = linear_data(20);
        let cfg = ForestConfig {
            n_trees: 10,
            ..ForestConfig::default()
        };
        let forest = RandomForest::fit(&matrix, &targets, cfg).unwrap();
        let f = tempfile::NamedTempFile::new().unwrap();
        forest.save(f.path()).unwrap();
        let reloaded = RandomForest::load(f.path()).unwrap();
        assert_eq!(
            forest.predict(&[3.0, 1.0]).unwrap(),
            reloaded.predict(&[3.0, 1.0]).unwrap()
        );
    }
}
