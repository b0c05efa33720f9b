use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::chem::{Ligand, ReactionSet, TrainingRow};
use crate::data::{DescriptorTable, feature_matrix};
use crate::learn::{ForestConfig, RandomForest};
use crate::stats;

// ---------------------------------------------------------------------------
// Leave-one-ligand-out cross-validation
// ---------------------------------------------------------------------------

/// Held-out prediction for one reaction.
#[derive(Debug, Clone, Serialize)]
pub struct LooPrediction {
    pub ligand_identifier: String,
    pub amount: f64,
    pub measured: f64,
    pub predicted_mean: f64,
    pub predicted_std: f64,
}

/// Per-ligand error summary.
#[derive(Debug, Clone, Serialize)]
pub struct LooSummary {
    pub ligand_identifier: String,
    pub n_reactions: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// The whole evaluation: every held-out prediction plus summaries.
#[derive(Debug, Clone)]
pub struct LooOutcome {
    pub predictions: Vec<LooPrediction>,
    pub summaries: Vec<LooSummary>,
    pub overall_mae: f64,
    pub overall_rmse: f64,
}

/// For every unique ligand: refit on everyone else's reactions and predict
/// the held-out reactions at their own amounts. This measures how well the
/// model extrapolates to a ligand it never saw.
pub fn leave_one_ligand_out(
    set: &ReactionSet,
    table: &DescriptorTable,
    fom_key: &str,
    forest_config: ForestConfig,
) -> Result<LooOutcome> {
    let ligands = set.unique_ligands();
    if ligands.len() < 2 {
        bail!("leave-one-out needs at least 2 taught ligands, got {}", ligands.len());
    }
    // Normalize once over the full set, references included, so every fold
    // trains and scores on the same reference-scaled fom the teach stage
    // uses. Splitting afterwards keeps the plate references in play.
    let all_rows = set.training_rows(fom_key)?;

    let mut predictions = Vec::new();
    let mut summaries = Vec::new();

    for held_ligand in &ligands {
        let train_rows: Vec<&TrainingRow> =
            all_rows.iter().filter(|r| &r.ligand != held_ligand).collect();
        let held_rows: Vec<&TrainingRow> =
            all_rows.iter().filter(|r| &r.ligand == held_ligand).collect();

        // Fit on the remainder.
        let mut fit_ligands: Vec<Ligand> = Vec::new();
        let mut pairs = Vec::with_capacity(train_rows.len());
        let mut targets = Vec::with_capacity(train_rows.len());
        for row in &train_rows {
            let idx = match fit_ligands.iter().position(|l| l == &row.ligand) {
                Some(idx) => idx,
                None => {
                    fit_ligands.push(row.ligand.clone());
                    fit_ligands.len() - 1
                }
            };
            pairs.push((idx, row.amount));
            targets.push(row.fom);
        }
        let (_, matrix) = feature_matrix(&fit_ligands, &pairs, table)?;
        let forest = RandomForest::fit(&matrix, &targets, forest_config)?;

        // Predict the held-out reactions at their measured amounts.
        let held = std::slice::from_ref(held_ligand);
        let held_pairs: Vec<(usize, f64)> = held_rows.iter().map(|r| (0, r.amount)).collect();
        let (_, held_matrix) = feature_matrix(held, &held_pairs, table)?;
        let distribution = forest.predict_distribution(&held_matrix.rows)?;

        let mut errors = Vec::with_capacity(held_rows.len());
        for (row, dist) in held_rows.iter().zip(&distribution) {
            let predicted_mean = stats::mean(dist);
            errors.push(predicted_mean - row.fom);
            predictions.push(LooPrediction {
                ligand_identifier: held_ligand.identifier(),
                amount: row.amount,
                measured: row.fom,
                predicted_mean,
                predicted_std: stats::std_dev(dist),
            });
        }
        summaries.push(LooSummary {
            ligand_identifier: held_ligand.identifier(),
            n_reactions: errors.len(),
            mae: mae(&errors),
            rmse: rmse(&errors),
        });
        log::info!(
            "loo: held out {} ({} reactions, mae {:.4})",
            held_ligand.identifier(),
            errors.len(),
            summaries.last().map(|s| s.mae).unwrap_or(f64::NAN)
        );
    }

    let all_errors: Vec<f64> = predictions
        .iter()
        .map(|p| p.predicted_mean - p.measured)
        .collect();
    Ok(LooOutcome {
        overall_mae: mae(&all_errors),
        overall_rmse: rmse(&all_errors),
        predictions,
        summaries,
    })
}

fn mae(errors: &[f64]) -> f64 {
    stats::mean(&errors.iter().map(|e| e.abs()).collect::<Vec<_>>())
}

fn rmse(errors: &[f64]) -> f64 {
    stats::mean(&errors.iter().map(|e| e * e).collect::<Vec<_>>()).sqrt()
}

/// Write `loo_predictions.csv` and `loo_summary.csv` (with a final `ALL`
/// row) under `dir`.
pub fn write_loo_csv(dir: &Path, outcome: &LooOutcome) -> Result<()> {
    let predictions_path = dir.join("loo_predictions.csv");
    let mut writer = csv::Writer::from_path(&predictions_path)
        .with_context(|| format!("creating {}", predictions_path.display()))?;
    for prediction in &outcome.predictions {
        writer.serialize(prediction)?;
    }
    writer.flush()?;

    let summary_path = dir.join("loo_summary.csv");
    let mut writer = csv::Writer::from_path(&summary_path)
        .with_context(|| format!("creating {}", summary_path.display()))?;
    for summary in &outcome.summaries {
        writer.serialize(summary)?;
    }
    writer.serialize(LooSummary {
        ligand_identifier: "ALL".to_string(),
        n_reactions: outcome.predictions.len(),
        mae: outcome.overall_mae,
        rmse: outcome.overall_rmse,
    })?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chem::{Ligand, LigandSolution, PropertyValue, Reaction, StockSolution};
    use std::collections::BTreeMap;
    use std::io::Write;

    fn campaign(n_ligands: u32) -> (DescriptorTable, ReactionSet) {
        let ligands: Vec<Ligand> = (0..n_ligands)
            .map(|i| Ligand {
                label: Some(i),
                ..Ligand::new(format!("InChI=1S/cv{i}"))
            })
            .collect();

        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "InChI,d1").unwrap();
        for (i, lig) in ligands.iter().enumerate() {
            writeln!(f, "{},{}", lig.inchi, i).unwrap();
        }
        let table = DescriptorTable::load(f.path()).unwrap();

        let mut reactions = Vec::new();
        for (i, lig) in ligands.iter().enumerate() {
            for v in [1.0, 2.0, 4.0] {
                let mut properties = BTreeMap::new();
                // fom is a smooth function of (descriptor, amount)
                properties.insert(
                    "fom".to_string(),
                    PropertyValue::Float(i as f64 + 0.1 * v),
                );
                reactions.push(Reaction {
                    identifier: format!("p{i}@@v{v}"),
                    ligand_solution: Some(LigandSolution::new(lig.clone(), v, 1.0).unwrap()),
                    nc_solution: Some(StockSolution::new("NC", 10.0)),
                    solvent: Some(StockSolution::new("toluene", 50.0)),
                    conditions: vec![],
                    properties,
                });
            }
            // One nanocrystal reference per plate; foms normalize to raw / 2.
            let mut properties = BTreeMap::new();
            properties.insert("fom".to_string(), PropertyValue::Float(2.0));
            reactions.push(Reaction {
                identifier: format!("p{i}@@ref"),
                ligand_solution: None,
                nc_solution: Some(StockSolution::new("NC", 10.0)),
                solvent: Some(StockSolution::new("toluene", 50.0)),
                conditions: vec![],
                properties,
            });
        }
        (table, ReactionSet::new(reactions))
    }

    #[test]
    fn holds_out_every_ligand_once() {
        let (table, set) = campaign(4);
        let config = ForestConfig {
            n_trees: 15,
            ..ForestConfig::default()
        };
        let outcome = leave_one_ligand_out(&set, &table, "fom", config).unwrap();
        assert_eq!(outcome.summaries.len(), 4);
        assert_eq!(outcome.predictions.len(), 12);
        assert!(outcome.overall_rmse >= outcome.overall_mae * 0.99);
        for summary in &outcome.summaries {
            assert_eq!(summary.n_reactions, 3);
            assert!(summary.mae.is_finite());
        }
    }

    #[test]
    fn folds_score_the_reference_scaled_fom() {
        let (table, set) = campaign(3);
        let config = ForestConfig {
            n_trees: 10,
            ..ForestConfig::default()
        };
        let outcome = leave_one_ligand_out(&set, &table, "fom", config).unwrap();

        // Every held-out measurement must match the fom the teach stage
        // would train on, i.e. normalized by the plate reference.
        let rows = set.training_rows("fom").unwrap();
        for p in &outcome.predictions {
            let scaled = rows
                .iter()
                .find(|r| {
                    r.ligand.identifier() == p.ligand_identifier
                        && (r.amount - p.amount).abs() < 1e-12
                })
                .unwrap();
            assert!((p.measured - scaled.fom).abs() < 1e-12);
        }
        // Raw foms reach 2.4; reference-scaled ones top out at 1.2.
        assert!(outcome.predictions.iter().all(|p| p.measured <= 1.2));
    }

    #[test]
    fn needs_two_ligands() {
        let (table, set) = campaign(1);
        assert!(leave_one_ligand_out(&set, &table, "fom", ForestConfig::default()).is_err());
    }

    #[test]
    fn csv_outputs_land_in_dir() {
        let (table, set) = campaign(3);
        let config = ForestConfig {
            n_trees: 10,
            ..ForestConfig::default()
        };
        let outcome = leave_one_ligand_out(&set, &table, "fom", config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_loo_csv(dir.path(), &outcome).unwrap();
        let summary = std::fs::read_to_string(dir.path().join("loo_summary.csv")).unwrap();
        assert!(summary.lines().last().unwrap().starts_with("ALL,"));
        assert!(dir.path().join("loo_predictions.csv").exists());
    }
}
