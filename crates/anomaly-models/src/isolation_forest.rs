//! Isolation Forest
//!
//! Ensemble of randomized isolation trees. Each tree recursively partitions a
//! random subsample on a random feature at a random threshold; rows that are
//! isolated after few splits are anomalous.
//!
//! Scores follow the usual convention: `score_samples` lies in [-1, 0) with
//! lower meaning more anomalous, and `decision_function` shifts it by the
//! `contamination` percentile of the training scores so that negative values
//! flag the expected outlier fraction.

use anomaly_core::stats::quantile;
use anomaly_core::{AnomalyError, AnomalyResult};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Upper bound on rows drawn for each tree
pub const MAX_SAMPLES: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Row-major matrix of model inputs
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f64>,
    n_cols: usize,
}

impl FeatureMatrix {
    pub fn from_rows<const D: usize>(rows: &[[f64; D]]) -> Self {
        Self {
            data: rows.iter().flat_map(|r| r.iter().copied()).collect(),
            n_cols: D,
        }
    }

    pub fn n_rows(&self) -> usize {
        if self.n_cols == 0 {
            0
        } else {
            self.data.len() / self.n_cols
        }
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    fn get(&self, i: usize, col: usize) -> f64 {
        self.data[i * self.n_cols + col]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    pub n_estimators: usize,
    pub contamination: f64,
    pub random_state: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(matrix: &FeatureMatrix, indices: &mut [usize], max_depth: usize, rng: &mut ChaCha8Rng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(matrix, indices, 0, max_depth, rng);
        tree
    }

    fn grow_node(
        &mut self,
        matrix: &FeatureMatrix,
        indices: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: indices.len() });
        if depth >= max_depth || indices.len() <= 1 {
            return id;
        }

        // only features that still vary inside this node can split it
        let candidates: Vec<(usize, f64, f64)> = (0..matrix.n_cols())
            .filter_map(|col| {
                let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    let x = matrix.get(i, col);
                    (lo.min(x), hi.max(x))
                });
                (hi > lo).then_some((col, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);

        let mut split = 0;
        for k in 0..indices.len() {
            if matrix.get(indices[k], feature) <= threshold {
                indices.swap(split, k);
                split += 1;
            }
        }

        let (left_rows, right_rows) = indices.split_at_mut(split);
        let left = self.grow_node(matrix, left_rows, depth + 1, max_depth, rng);
        let right = self.grow_node(matrix, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Fitted ensemble of isolation trees
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on every row of `matrix`. Trees are grown in parallel, each from its
    /// own seed drawn from `random_state`, so the result is reproducible.
    pub fn fit(matrix: &FeatureMatrix, params: &IsolationForestParams) -> AnomalyResult<Self> {
        let n = matrix.n_rows();
        if n < 2 {
            return Err(AnomalyError::InsufficientData(format!(
                "isolation forest needs at least 2 rows, got {n}"
            )));
        }
        if params.n_estimators == 0 {
            return Err(AnomalyError::InvalidData("n_estimators must be positive".into()));
        }

        let sample_size = n.min(MAX_SAMPLES);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut seeder = ChaCha8Rng::seed_from_u64(params.random_state);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| seeder.gen()).collect();

        let trees: Vec<IsolationTree> = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut indices = sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::grow(matrix, &mut indices, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features: matrix.n_cols(),
            offset: 0.0,
        };

        let train_scores = forest.score_samples(matrix)?;
        forest.offset = quantile(&train_scores, params.contamination).ok_or_else(|| {
            AnomalyError::CalculationError(format!(
                "cannot take the {} quantile of training scores",
                params.contamination
            ))
        })?;
        Ok(forest)
    }

    /// `-2^(-E[h(x)] / c(sample_size))`; lower is more anomalous.
    pub fn score_samples(&self, matrix: &FeatureMatrix) -> AnomalyResult<Vec<f64>> {
        if matrix.n_cols() != self.n_features {
            return Err(AnomalyError::InvalidData(format!(
                "model fitted on {} features, got {}",
                self.n_features,
                matrix.n_cols()
            )));
        }
        let norm = average_path_length(self.sample_size);
        let n_trees = self.trees.len() as f64;

        Ok((0..matrix.n_rows())
            .into_par_iter()
            .map(|i| {
                let row = matrix.row(i);
                let mean_depth = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / n_trees;
                -(2.0_f64).powf(-mean_depth / norm)
            })
            .collect())
    }

    /// `score_samples - offset`; higher is more normal, negative marks outliers.
    pub fn decision_function(&self, matrix: &FeatureMatrix) -> AnomalyResult<Vec<f64>> {
        Ok(self
            .score_samples(matrix)?
            .into_iter()
            .map(|s| s - self.offset)
            .collect())
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}

/// Average path length of an unsuccessful BST search over `n` items
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier(n: usize, seed: u64) -> Vec<[f64; 2]> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut rows: Vec<[f64; 2]> = (0..n)
            .map(|_| [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect();
        rows.push([8.0, -8.0]);
        rows
    }

    fn params(seed: u64) -> IsolationForestParams {
        IsolationForestParams {
            n_estimators: 100,
            contamination: 0.05,
            random_state: seed,
        }
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn test_outlier_has_lowest_decision() {
        let rows = cluster_with_outlier(400, 11);
        let matrix = FeatureMatrix::from_rows(&rows);
        let forest = IsolationForest::fit(&matrix, &params(42)).unwrap();
        assert_eq!(forest.sample_size(), MAX_SAMPLES);
        assert_eq!(forest.n_estimators(), 100);

        let decision = forest.decision_function(&matrix).unwrap();
        let outlier = *decision.last().unwrap();
        assert!(outlier < 0.0);
        assert!(decision[..400].iter().all(|&d| d > outlier));
    }

    #[test]
    fn test_offset_matches_contamination() {
        let rows = cluster_with_outlier(400, 3);
        let matrix = FeatureMatrix::from_rows(&rows);
        let forest = IsolationForest::fit(&matrix, &params(7)).unwrap();
        let decision = forest.decision_function(&matrix).unwrap();
        let flagged = decision.iter().filter(|&&d| d < 0.0).count() as f64 / decision.len() as f64;
        assert!((flagged - 0.05).abs() <= 1.0 / decision.len() as f64 + 1e-9);
        for s in forest.score_samples(&matrix).unwrap() {
            assert!((-1.0..0.0).contains(&s));
        }
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let rows = cluster_with_outlier(300, 5);
        let matrix = FeatureMatrix::from_rows(&rows);
        let a = IsolationForest::fit(&matrix, &params(1)).unwrap();
        let b = IsolationForest::fit(&matrix, &params(1)).unwrap();
        let c = IsolationForest::fit(&matrix, &params(2)).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.decision_function(&matrix).unwrap(),
            b.decision_function(&matrix).unwrap()
        );
        assert_ne!(
            a.score_samples(&matrix).unwrap(),
            c.score_samples(&matrix).unwrap()
        );
    }

    #[test]
    fn test_constant_data_yields_leaves() {
        let rows = vec![[1.0, 1.0]; 50];
        let matrix = FeatureMatrix::from_rows(&rows);
        let forest = IsolationForest::fit(&matrix, &params(9)).unwrap();
        let scores = forest.score_samples(&matrix).unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_too_few_rows_and_wrong_width() {
        let single = FeatureMatrix::from_rows(&[[1.0, 2.0]]);
        assert!(matches!(
            IsolationForest::fit(&single, &params(1)),
            Err(AnomalyError::InsufficientData(_))
        ));

        let rows = cluster_with_outlier(50, 1);
        let forest = IsolationForest::fit(&FeatureMatrix::from_rows(&rows), &params(1)).unwrap();
        let wide = FeatureMatrix::from_rows(&[[0.0, 0.0, 0.0]]);
        assert!(forest.score_samples(&wide).is_err());
    }
}
