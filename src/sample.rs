use crate::stats::distance_matrix;

// ---------------------------------------------------------------------------
// Kennard–Stone sampling
// ---------------------------------------------------------------------------

/// Max-min sampler over a precomputed distance matrix. Selecting items in
/// Kennard–Stone order spreads picks evenly across the space, which serves
/// both the `rank_ks_feature` ranking column and the diversity suggester.
#[derive(Debug, Clone)]
pub struct KennardStone {
    dist: Vec<Vec<f64>>,
}

impl KennardStone {
    pub fn new(dist: Vec<Vec<f64>>) -> Self {
        KennardStone { dist }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        KennardStone {
            dist: distance_matrix(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.dist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dist.is_empty()
    }

    /// Classic Kennard–Stone order: start from the farthest pair, then keep
    /// taking the candidate whose distance to the selected set is largest.
    pub fn selection_order(&self) -> Vec<usize> {
        let n = self.len();
        match n {
            0 => return Vec::new(),
            1 => return vec![0],
            _ => {}
        }

        // Seed: the two most distant items.
        let (mut si, mut sj, mut best) = (0, 1, f64::NEG_INFINITY);
        for i in 0..n {
            for j in (i + 1)..n {
                if self.dist[i][j] > best {
                    (si, sj, best) = (i, j, self.dist[i][j]);
                }
            }
        }
        self.order_from(vec![si, sj])
    }

    /// Kennard–Stone order seeded at a fixed first item (the suggester
    /// starts from its best-ranked candidate).
    pub fn selection_order_from(&self, first: usize) -> Vec<usize> {
        assert!(first < self.len(), "seed index out of range");
        self.order_from(vec![first])
    }

    /// For each item, its position in the selection order.
    pub fn ranks(&self) -> Vec<usize> {
        let order = self.selection_order();
        let mut ranks = vec![0usize; order.len()];
        for (rank, &item) in order.iter().enumerate() {
            ranks[item] = rank;
        }
        ranks
    }

    fn order_from(&self, mut selected: Vec<usize>) -> Vec<usize> {
        let n = self.len();
        // min distance from each candidate to the selected set
        let mut min_dist = vec![f64::INFINITY; n];
        let mut in_set = vec![false; n];
        for &s in &selected {
            in_set[s] = true;
            for c in 0..n {
                min_dist[c] = min_dist[c].min(self.dist[c][s]);
            }
        }

        while selected.len() < n {
            let next = (0..n)
                .filter(|&c| !in_set[c])
                .max_by(|&a, &b| min_dist[a].total_cmp(&min_dist[b]))
                .expect("unselected candidate exists");
            in_set[next] = true;
            for c in 0..n {
                min_dist[c] = min_dist[c].min(self.dist[c][next]);
            }
            selected.push(next);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Four points on a line: 0, 1, 9, 10.
    fn line() -> KennardStone {
        KennardStone::from_rows(&[vec![0.0], vec![1.0], vec![9.0], vec![10.0]])
    }

    #[test]
    fn starts_with_the_farthest_pair() {
        let order = line().selection_order();
        assert_eq!(&order[..2], &[0, 3]);
        // Points 1 and 9 tie on min distance to {0, 10}; either may follow.
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn ranks_invert_the_order() {
        let ks = line();
        let order = ks.selection_order();
        let ranks = ks.ranks();
        for (rank, item) in order.iter().enumerate() {
            assert_eq!(ranks[*item], rank);
        }
    }

    #[test]
    fn seeded_order_starts_at_seed() {
        let order = line().selection_order_from(1);
        assert_eq!(order[0], 1);
        // Farthest from point 1 is point 10.
        assert_eq!(order[1], 3);
    }

    #[test]
    fn degenerate_sizes() {
        assert!(KennardStone::from_rows(&[]).selection_order().is_empty());
        assert_eq!(KennardStone::from_rows(&[vec![1.0]]).selection_order(), vec![0]);
    }
}
