use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::rank::RankingRow;
use crate::sample::KennardStone;
use crate::stats::{distance_matrix, percentile};

// ---------------------------------------------------------------------------
// Diversity suggester
// ---------------------------------------------------------------------------

/// Which end of a rank column's distribution to draw candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentileFrom {
    Top,
    Bottom,
}

impl PercentileFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            PercentileFrom::Top => "top",
            PercentileFrom::Bottom => "bottom",
        }
    }
}

/// One suggester: a rank column, a percentile slice of it, and a budget of
/// diverse picks.
#[derive(Debug, Clone)]
pub struct SuggesterConfig {
    pub name: String,
    pub rank_column: String,
    pub percentile: f64,
    pub percentile_from: PercentileFrom,
    pub batch_size: usize,
}

impl SuggesterConfig {
    pub fn new(rank_column: &str, percentile_from: PercentileFrom) -> Self {
        let short = rank_column.trim_start_matches("rank_average_pred_");
        SuggesterConfig {
            name: format!("{short}__feature__{}", percentile_from.as_str()),
            rank_column: rank_column.to_string(),
            percentile: 2.0,
            percentile_from,
            batch_size: 8,
        }
    }
}

/// A batch pick with the slice members it represents.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Index into the candidate slice passed to [`suggest`].
    pub pick: usize,
    /// Slice indices assigned to this pick (pick included), best rank first.
    pub members: Vec<usize>,
}

/// The suggester output: the candidate slice and its clustering.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub config_name: String,
    /// Rows inside the percentile slice, untaught only.
    pub candidates: Vec<RankingRow>,
    pub clusters: Vec<Cluster>,
}

/// Run one suggester over the ranking table.
///
/// `descriptor_rows` must align with `rows`: it is the feature space used
/// for diversity. Taught ligands are excluded before slicing. Picks are
/// chosen by max-min spread (Kennard–Stone seeded at the best-ranked
/// candidate); every other slice member joins its nearest pick's cluster.
pub fn suggest(
    rows: &[RankingRow],
    descriptor_rows: &[Vec<f64>],
    config: &SuggesterConfig,
) -> Result<Suggestion> {
    if rows.len() != descriptor_rows.len() {
        bail!(
            "{} ranking rows but {} descriptor rows",
            rows.len(),
            descriptor_rows.len()
        );
    }

    // Untaught pool, with its rank values.
    let mut pool: Vec<usize> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if row.is_taught == Some(true) {
            continue;
        }
        let value = row
            .rank_value(&config.rank_column)
            .with_context(|| format!("unknown rank column {:?}", config.rank_column))?;
        pool.push(i);
        values.push(value);
    }
    if pool.is_empty() {
        bail!("no untaught candidates to suggest from");
    }

    // Percentile slice.
    let slice: Vec<usize> = match config.percentile_from {
        PercentileFrom::Top => {
            let cutoff = percentile(&values, 100.0 - config.percentile);
            (0..pool.len()).filter(|&k| values[k] >= cutoff).collect()
        }
        PercentileFrom::Bottom => {
            let cutoff = percentile(&values, config.percentile);
            (0..pool.len()).filter(|&k| values[k] <= cutoff).collect()
        }
    };

    // Candidates ordered best first ("best" depends on the end we slice).
    let mut order = slice;
    order.sort_by(|&a, &b| match config.percentile_from {
        PercentileFrom::Top => values[b].total_cmp(&values[a]),
        PercentileFrom::Bottom => values[a].total_cmp(&values[b]),
    });
    let candidates: Vec<RankingRow> = order.iter().map(|&k| rows[pool[k]].clone()).collect();
    let features: Vec<Vec<f64>> = order
        .iter()
        .map(|&k| descriptor_rows[pool[k]].clone())
        .collect();

    // Diverse picks, then nearest-pick cluster assignment.
    let n_picks = config.batch_size.min(candidates.len());
    let ks = KennardStone::from_rows(&features);
    let picks: Vec<usize> = ks.selection_order_from(0).into_iter().take(n_picks).collect();

    let dist = distance_matrix(&features);
    let mut clusters: Vec<Cluster> = picks
        .iter()
        .map(|&pick| Cluster {
            pick,
            members: vec![pick],
        })
        .collect();
    for member in 0..candidates.len() {
        if picks.contains(&member) {
            continue;
        }
        let nearest = (0..picks.len())
            .min_by(|&a, &b| dist[member][picks[a]].total_cmp(&dist[member][picks[b]]))
            .expect("at least one pick");
        clusters[nearest].members.push(member);
    }
    for cluster in &mut clusters {
        cluster.members.sort();
    }

    log::info!(
        "suggester {}: {} candidates in the {}% {} slice, {} picks",
        config.name,
        candidates.len(),
        config.percentile,
        config.percentile_from.as_str(),
        clusters.len()
    );

    Ok(Suggestion {
        config_name: config.name.clone(),
        candidates,
        clusters,
    })
}

/// The suggester grid a campaign runs by default: exploitation on the mean,
/// its pessimistic counterpart, and two exploration strategies.
pub fn default_suggesters(percentile: f64, batch_size: usize) -> Vec<SuggesterConfig> {
    [
        ("rank_average_pred_mu_top2%mu", PercentileFrom::Top),
        ("rank_average_pred_mu_top2%mu", PercentileFrom::Bottom),
        ("rank_average_pred_std", PercentileFrom::Top),
        ("rank_average_pred_std_top2%mu", PercentileFrom::Top),
    ]
    .into_iter()
    .map(|(column, from)| SuggesterConfig {
        percentile,
        batch_size,
        ..SuggesterConfig::new(column, from)
    })
    .collect()
}

/// Write a suggestion as CSV, one cluster after another, the pick first,
/// clusters separated by a blank row.
pub fn write_suggestion_csv(path: &Path, suggestion: &Suggestion) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let n_fields = 13; // RankingRow column count
    for (i, cluster) in suggestion.clusters.iter().enumerate() {
        if i > 0 {
            writer.write_record(vec![""; n_fields])?;
        }
        writer.serialize(&suggestion.candidates[cluster.pick])?;
        for &member in &cluster.members {
            if member != cluster.pick {
                writer.serialize(&suggestion.candidates[member])?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: u32, mu_top: f64, taught: bool) -> RankingRow {
        RankingRow {
            ligand_label: Some(label),
            ligand_identifier: format!("LIG-{label:07}"),
            average_mu: mu_top,
            average_std: 0.1,
            average_uci: mu_top + 0.1,
            mu_top,
            uci_top: mu_top + 0.1,
            std_top_mu: 0.1,
            random_index: label as f64,
            ks_feature: label as f64,
            complexity: None,
            is_taught: Some(taught),
            cas_number: None,
        }
    }

    fn pool() -> (Vec<RankingRow>, Vec<Vec<f64>>) {
        let rows: Vec<RankingRow> = (0..50).map(|i| row(i, i as f64, i % 10 == 0)).collect();
        let features: Vec<Vec<f64>> = (0..50).map(|i| vec![(i % 7) as f64, i as f64]).collect();
        (rows, features)
    }

    #[test]
    fn taught_ligands_are_excluded() {
        let (rows, features) = pool();
        let config = SuggesterConfig {
            percentile: 50.0,
            batch_size: 4,
            ..SuggesterConfig::new("rank_average_pred_mu_top2%mu", PercentileFrom::Top)
        };
        let suggestion = suggest(&rows, &features, &config).unwrap();
        assert!(
            suggestion
                .candidates
                .iter()
                .all(|c| c.is_taught != Some(true))
        );
        assert_eq!(suggestion.clusters.len(), 4);
    }

    #[test]
    fn top_slice_keeps_best_first() {
        let (rows, features) = pool();
        let config = SuggesterConfig {
            percentile: 10.0,
            batch_size: 2,
            ..SuggesterConfig::new("rank_average_pred_mu_top2%mu", PercentileFrom::Top)
        };
        let suggestion = suggest(&rows, &features, &config).unwrap();
        assert_eq!(suggestion.candidates[0].ligand_label, Some(49));
        // First pick is the best-ranked candidate.
        assert_eq!(suggestion.clusters[0].pick, 0);
    }

    #[test]
    fn bottom_slice_inverts_order() {
        let (rows, features) = pool();
        let config = SuggesterConfig {
            percentile: 10.0,
            batch_size: 2,
            ..SuggesterConfig::new("rank_average_pred_mu_top2%mu", PercentileFrom::Bottom)
        };
        let suggestion = suggest(&rows, &features, &config).unwrap();
        // Label 0 is taught; the worst untaught candidate leads.
        assert_eq!(suggestion.candidates[0].ligand_label, Some(1));
    }

    #[test]
    fn every_candidate_lands_in_exactly_one_cluster() {
        let (rows, features) = pool();
        let config = SuggesterConfig {
            percentile: 30.0,
            batch_size: 3,
            ..SuggesterConfig::new("rank_average_pred_std", PercentileFrom::Top)
        };
        let suggestion = suggest(&rows, &features, &config).unwrap();
        let mut seen: Vec<usize> = suggestion
            .clusters
            .iter()
            .flat_map(|c| c.members.iter().copied())
            .collect();
        seen.sort();
        let expected: Vec<usize> = (0..suggestion.candidates.len()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn csv_layout_has_blank_separators() {
        let (rows, features) = pool();
        let config = SuggesterConfig {
            percentile: 20.0,
            batch_size: 2,
            ..SuggesterConfig::new("rank_average_pred_mu_top2%mu", PercentileFrom::Top)
        };
        let suggestion = suggest(&rows, &features, &config).unwrap();
        let f = tempfile::NamedTempFile::new().unwrap();
        write_suggestion_csv(f.path(), &suggestion).unwrap();
        let content = std::fs::read_to_string(f.path()).unwrap();
        let blank_rows = content
            .lines()
            .filter(|l| l.chars().all(|c| c == ','))
            .count();
        assert_eq!(blank_rows, suggestion.clusters.len() - 1);
    }

    #[test]
    fn default_grid_has_four_strategies() {
        let grid = default_suggesters(2.0, 8);
        assert_eq!(grid.len(), 4);
        assert_eq!(grid[0].name, "mu_top2%mu__feature__top");
        assert_eq!(grid[1].name, "mu_top2%mu__feature__bottom");
    }
}
