use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::learn::LigandPrediction;
use crate::sample::KennardStone;
use crate::stats;

/// Fraction behind every `top2%` ranking column.
pub const TOP_FRACTION: f64 = 0.02;

// ---------------------------------------------------------------------------
// Ranking table
// ---------------------------------------------------------------------------

/// Rank column names, in export order. Larger is always "query me first".
pub const RANK_COLUMNS: [&str; 8] = [
    "rank_average_pred_mu",
    "rank_average_pred_std",
    "rank_average_pred_uci",
    "rank_average_pred_mu_top2%mu",
    "rank_average_pred_uci_top2%uci",
    "rank_average_pred_std_top2%mu",
    "rank_random_index",
    "rank_ks_feature",
];

/// One pool ligand's ranking metrics, plus enrichment columns filled in by
/// the rank stage (`complexity`, `is_taught`, `cas_number`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingRow {
    pub ligand_label: Option<u32>,
    pub ligand_identifier: String,
    #[serde(rename = "rank_average_pred_mu")]
    pub average_mu: f64,
    #[serde(rename = "rank_average_pred_std")]
    pub average_std: f64,
    #[serde(rename = "rank_average_pred_uci")]
    pub average_uci: f64,
    #[serde(rename = "rank_average_pred_mu_top2%mu")]
    pub mu_top: f64,
    #[serde(rename = "rank_average_pred_uci_top2%uci")]
    pub uci_top: f64,
    #[serde(rename = "rank_average_pred_std_top2%mu")]
    pub std_top_mu: f64,
    #[serde(rename = "rank_random_index")]
    pub random_index: f64,
    #[serde(rename = "rank_ks_feature")]
    pub ks_feature: f64,
    #[serde(default)]
    pub complexity: Option<f64>,
    #[serde(default)]
    pub is_taught: Option<bool>,
    #[serde(default)]
    pub cas_number: Option<String>,
}

impl RankingRow {
    /// Look a rank value up by its column name.
    pub fn rank_value(&self, column: &str) -> Option<f64> {
        match column {
            "rank_average_pred_mu" => Some(self.average_mu),
            "rank_average_pred_std" => Some(self.average_std),
            "rank_average_pred_uci" => Some(self.average_uci),
            "rank_average_pred_mu_top2%mu" => Some(self.mu_top),
            "rank_average_pred_uci_top2%uci" => Some(self.uci_top),
            "rank_average_pred_std_top2%mu" => Some(self.std_top_mu),
            "rank_random_index" => Some(self.random_index),
            "rank_ks_feature" => Some(self.ks_feature),
            _ => None,
        }
    }
}

/// Build the ranking table for a scored pool.
///
/// `descriptor_rows` must align with `predictions`; it is the feature space
/// for the Kennard–Stone column. The random column is a seeded permutation
/// so reruns rank identically.
pub fn build_ranking(
    predictions: &[LigandPrediction],
    descriptor_rows: &[Vec<f64>],
    seed: u64,
) -> Result<Vec<RankingRow>> {
    if predictions.len() != descriptor_rows.len() {
        bail!(
            "{} predictions but {} descriptor rows",
            predictions.len(),
            descriptor_rows.len()
        );
    }
    let random_index = stats::seeded_permutation(predictions.len(), seed);
    let ks_ranks = KennardStone::from_rows(descriptor_rows).ranks();

    Ok(predictions
        .iter()
        .enumerate()
        .map(|(i, pred)| RankingRow {
            ligand_label: pred.ligand.label,
            ligand_identifier: pred.ligand.identifier(),
            average_mu: stats::mean(&pred.mean()),
            average_std: stats::mean(&pred.std()),
            average_uci: stats::mean(&pred.uci()),
            mu_top: pred.mean_top(TOP_FRACTION),
            uci_top: pred.uci_top(TOP_FRACTION),
            std_top_mu: pred.std_over_top_mean(TOP_FRACTION),
            random_index: random_index[i] as f64,
            ks_feature: ks_ranks[i] as f64,
            complexity: None,
            is_taught: None,
            cas_number: None,
        })
        .collect())
}

/// Position of the complexity column in [`RankingRow`] field order.
const COMPLEXITY_COLUMN: usize = 2 + RANK_COLUMNS.len();

/// Write the ranking table. The complexity column is headed by the name of
/// whichever descriptor the campaign echoes into it.
pub fn write_ranking_csv(path: &Path, rows: &[RankingRow], complexity_column: &str) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let mut header = vec!["ligand_label", "ligand_identifier"];
    header.extend(RANK_COLUMNS);
    header.push(complexity_column);
    header.extend(["is_taught", "cas_number"]);
    writer.write_record(&header)?;

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_ranking_csv(path: &Path) -> Result<Vec<RankingRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening ranking {}", path.display()))?;

    // Map the descriptor-named complexity column back onto its field.
    let headers = reader.headers().context("reading ranking headers")?.clone();
    let renamed: csv::StringRecord = headers
        .iter()
        .enumerate()
        .map(|(i, h)| if i == COMPLEXITY_COLUMN { "complexity" } else { h })
        .collect();
    reader.set_headers(renamed);

    let mut rows = Vec::new();
    for (row_no, result) in reader.deserialize().enumerate() {
        let row: RankingRow = result.with_context(|| format!("ranking row {row_no}"))?;
        rows.push(row);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Query records
// ---------------------------------------------------------------------------

/// The answer to "which ligands should the robot screen next, per ranking
/// strategy", persisted alongside the model that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub date: DateTime<Utc>,
    pub model_path: PathBuf,
    pub size: usize,
    /// The full ranking table the results were drawn from.
    pub rows: Vec<RankingRow>,
    /// rank column → ligand identifiers, best first.
    pub results: BTreeMap<String, Vec<String>>,
}

/// Take the top `size` ligands for every rank column.
pub fn query(rows: &[RankingRow], model_path: &Path, size: Option<usize>) -> QueryRecord {
    let size = size.unwrap_or(rows.len()).min(rows.len());
    let mut results = BTreeMap::new();
    for column in RANK_COLUMNS {
        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by(|&a, &b| {
            let va = rows[a].rank_value(column).unwrap_or(f64::NEG_INFINITY);
            let vb = rows[b].rank_value(column).unwrap_or(f64::NEG_INFINITY);
            vb.total_cmp(&va)
        });
        results.insert(
            column.to_string(),
            order
                .into_iter()
                .take(size)
                .map(|i| rows[i].ligand_identifier.clone())
                .collect(),
        );
    }
    QueryRecord {
        date: Utc::now(),
        model_path: model_path.to_path_buf(),
        size,
        rows: rows.to_vec(),
        results,
    }
}

impl QueryRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("writing query record {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening query record {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing query record {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Rank distribution summaries (CSV counterpart of the old histograms)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HistogramBin {
    bin_low: f64,
    bin_high: f64,
    count: usize,
    cumulative_fraction: f64,
}

/// Write a fixed-width histogram of one rank column.
pub fn write_histogram(path: &Path, values: &[f64], bins: usize) -> Result<()> {
    if values.is_empty() || bins == 0 {
        bail!("histogram needs values and at least one bin");
    }
    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let width = ((hi - lo) / bins as f64).max(f64::MIN_POSITIVE);

    let mut counts = vec![0usize; bins];
    for &v in values {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let mut seen = 0usize;
    for (i, &count) in counts.iter().enumerate() {
        seen += count;
        writer.serialize(HistogramBin {
            bin_low: lo + i as f64 * width,
            bin_high: lo + (i + 1) as f64 * width,
            count,
            cumulative_fraction: seen as f64 / values.len() as f64,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RankCutoff {
    pub rank_column: String,
    pub cutoff_value: f64,
    pub n_above: usize,
}

/// The top-percentile cutoff per rank column (what the old histogram plots
/// drew as a line).
pub fn rank_cutoffs(rows: &[RankingRow], top_percentile: f64) -> Result<Vec<RankCutoff>> {
    if rows.is_empty() {
        bail!("rank cutoffs need at least one ranked ligand");
    }
    Ok(RANK_COLUMNS
        .iter()
        .map(|&column| {
            let values: Vec<f64> = rows.iter().filter_map(|r| r.rank_value(column)).collect();
            let cutoff_value = stats::percentile(&values, 100.0 - top_percentile);
            let n_above = values.iter().filter(|&&v| v > cutoff_value).count();
            RankCutoff {
                rank_column: column.to_string(),
                cutoff_value,
                n_above,
            }
        })
        .collect())
}

pub fn write_cutoffs(path: &Path, cutoffs: &[RankCutoff]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for cutoff in cutoffs {
        writer.serialize(cutoff)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chem::Ligand;

    fn prediction(label: u32, level: f64) -> LigandPrediction {
        LigandPrediction {
            ligand: Ligand {
                label: Some(label),
                ..Ligand::new(format!("InChI=1S/r{label}"))
            },
            amounts: vec![1.0, 2.0],
            values: vec![vec![level, level + 1.0], vec![level, level]],
        }
    }

    fn rows() -> Vec<RankingRow> {
        let preds = vec![prediction(1, 0.0), prediction(2, 5.0), prediction(3, 2.0)];
        let features = vec![vec![0.0], vec![5.0], vec![2.0]];
        build_ranking(&preds, &features, 42).unwrap()
    }

    #[test]
    fn ranking_orders_by_mean() {
        let rows = rows();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].average_mu > rows[2].average_mu);
        assert!(rows[2].average_mu > rows[0].average_mu);
        // every rank column resolves
        for column in RANK_COLUMNS {
            assert!(rows[0].rank_value(column).is_some(), "{column}");
        }
    }

    #[test]
    fn mismatched_features_are_rejected() {
        let preds = vec![prediction(1, 0.0)];
        assert!(build_ranking(&preds, &[], 42).is_err());
    }

    #[test]
    fn query_takes_top_k() {
        let rows = rows();
        let record = query(&rows, Path::new("model.json"), Some(2));
        let best = &record.results["rank_average_pred_mu"];
        assert_eq!(best.len(), 2);
        assert_eq!(best[0], "LIG-0000002");
        assert_eq!(best[1], "LIG-0000003");
    }

    #[test]
    fn csv_roundtrip_preserves_enrichment() {
        let mut rows = rows();
        rows[0].is_taught = Some(true);
        rows[0].cas_number = Some("64-17-5".to_string());
        rows[0].complexity = Some(123.4);
        let f = tempfile::NamedTempFile::new().unwrap();
        write_ranking_csv(f.path(), &rows, "complexity_BertzCT").unwrap();

        // The complexity column is headed by the descriptor's own name.
        let content = std::fs::read_to_string(f.path()).unwrap();
        let header = content.lines().next().unwrap();
        assert!(header.contains("complexity_BertzCT"));
        assert!(!header.contains(",complexity,"));

        let reloaded = read_ranking_csv(f.path()).unwrap();
        assert_eq!(reloaded.len(), rows.len());
        assert_eq!(reloaded[0].is_taught, Some(true));
        assert_eq!(reloaded[0].complexity, Some(123.4));
        assert_eq!(reloaded[0].cas_number.as_deref(), Some("64-17-5"));
        assert_eq!(reloaded[1].is_taught, None);
    }

    #[test]
    fn cutoffs_and_histograms() {
        let rows = rows();
        let cutoffs = rank_cutoffs(&rows, 2.0).unwrap();
        assert_eq!(cutoffs.len(), RANK_COLUMNS.len());
        assert!(rank_cutoffs(&[], 2.0).is_err());
        let f = tempfile::NamedTempFile::new().unwrap();
        let values: Vec<f64> = rows.iter().map(|r| r.average_mu).collect();
        write_histogram(f.path(), &values, 10).unwrap();
        let content = std::fs::read_to_string(f.path()).unwrap();
        assert!(content.starts_with("bin_low,bin_high,count,cumulative_fraction"));
        assert_eq!(content.lines().count(), 11);
    }
}
