use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CART regression tree
// ---------------------------------------------------------------------------

/// Stopping rules for tree growth.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split. Zero means "all".
    pub max_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A variance-reduction regression tree, stored as a flat node arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Grow a tree on the rows selected by `indices` (bootstrap sample).
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        params: &TreeParams,
        rng: &mut impl Rng,
    ) -> RegressionTree {
        let mut tree = RegressionTree { nodes: Vec::new() };
        let mut indices = indices.to_vec();
        tree.grow(rows, targets, &mut indices, params, 0, rng);
        tree
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = 0usize;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Build the subtree over `indices`, returning its root node id.
    fn grow(
        &mut self,
        rows: &[Vec<f64>],
        targets: &[f64],
        indices: &mut [usize],
        params: &TreeParams,
        depth: usize,
        rng: &mut impl Rng,
    ) -> usize {
        let mean = indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64;

        let depth_reached = params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached || indices.len() < params.min_samples_split {
            return self.push(Node::Leaf { value: mean });
        }
        let Some((feature, threshold)) = best_split(rows, targets, indices, params, rng) else {
            return self.push(Node::Leaf { value: mean });
        };

        // Partition in place around the split.
        indices.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));
        let split_at = indices.partition_point(|&i| rows[i][feature] <= threshold);
        let node = self.push(Node::Leaf { value: mean }); // placeholder
        let (left_idx, right_idx) = indices.split_at_mut(split_at);
        let left = self.grow(rows, targets, left_idx, params, depth + 1, rng);
        let right = self.grow(rows, targets, right_idx, params, depth + 1, rng);
        self.nodes[node] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

/// Pick the (feature, threshold) minimizing the summed squared error of the
/// two children, over a random feature subset. None when no split separates
/// the data under the leaf-size constraint.
fn best_split(
    rows: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: &TreeParams,
    rng: &mut impl Rng,
) -> Option<(usize, f64)> {
    let n_features = rows[indices[0]].len();
    let n_tried = if params.max_features == 0 {
        n_features
    } else {
        params.max_features.min(n_features)
    };
    let tried: Vec<usize> = sample(rng, n_features, n_tried).into_vec();

    let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, cost)
    let mut order: Vec<usize> = indices.to_vec();

    for &feature in &tried {
        order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

        // Running sums from the left; the right side follows by subtraction.
        let total_sum: f64 = order.iter().map(|&i| targets[i]).sum();
        let total_sq: f64 = order.iter().map(|&i| targets[i] * targets[i]).sum();
        let n = order.len() as f64;

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 1..order.len() {
            let prev = order[k - 1];
            left_sum += targets[prev];
            left_sq += targets[prev] * targets[prev];

            // No boundary between equal feature values.
            let lo = rows[prev][feature];
            let hi = rows[order[k]][feature];
            if hi <= lo {
                continue;
            }
            if k < params.min_samples_leaf || order.len() - k < params.min_samples_leaf {
                continue;
            }

            let nl = k as f64;
            let nr = n - nl;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let cost = (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);

            if best.is_none_or(|(_, _, c)| cost < c) {
                best = Some((feature, (lo + hi) / 2.0, cost));
            }
        }
    }
    best.map(|(feature, threshold, _)| (feature, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const PARAMS: TreeParams = TreeParams {
        max_depth: None,
        min_samples_split: 2,
        min_samples_leaf: 1,
        max_features: 0,
    };

    #[test]
    fn fits_a_step_function_exactly() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..10).map(|i| if i < 5 { 1.0 } else { 3.0 }).collect();
        let indices: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&rows, &targets, &indices, &PARAMS, &mut rng);
        assert_eq!(tree.predict(&[2.0]), 1.0);
        assert_eq!(tree.predict(&[7.0]), 3.0);
    }

    #[test]
    fn constant_targets_predict_the_constant() {
        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let targets = vec![2.0; 5];
        let indices: Vec<usize> = (0..5).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&rows, &targets, &indices, &PARAMS, &mut rng);
        assert_eq!(tree.predict(&[99.0]), 2.0);
    }

    #[test]
    fn depth_limit_is_respected() {
        let rows: Vec<Vec<f64>> = (0..32).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let indices: Vec<usize> = (0..32).collect();
        let params = TreeParams {
            max_depth: Some(1),
            ..PARAMS
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&rows, &targets, &indices, &params, &mut rng);
        // One split and two leaves at most.
        assert!(tree.n_nodes() <= 3);
    }

    #[test]
    fn identical_features_cannot_split() {
        let rows = vec![vec![1.0], vec![1.0], vec![1.0]];
        let targets = vec![0.0, 1.0, 2.0];
        let indices = vec![0, 1, 2];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&rows, &targets, &indices, &PARAMS, &mut rng);
        assert!((tree.predict(&[1.0]) - 1.0).abs() < 1e-12);
    }
}
