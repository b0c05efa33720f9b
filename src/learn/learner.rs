use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::forest::{ForestConfig, RandomForest};
use crate::chem::{Ligand, ReactionSet};
use crate::data::{DescriptorTable, feature_matrix};
use crate::stats;

// ---------------------------------------------------------------------------
// LigandPrediction – the model's view of one pool ligand
// ---------------------------------------------------------------------------

/// Ensemble predictions for one ligand over a grid of amounts.
/// `values[i][j]` is tree `j`'s prediction at `amounts[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LigandPrediction {
    pub ligand: Ligand,
    pub amounts: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl LigandPrediction {
    /// Ensemble mean per amount.
    pub fn mean(&self) -> Vec<f64> {
        self.values.iter().map(|row| stats::mean(row)).collect()
    }

    /// Ensemble spread per amount.
    pub fn std(&self) -> Vec<f64> {
        self.values.iter().map(|row| stats::std_dev(row)).collect()
    }

    /// 95% upper confidence bound of the ensemble mean per amount.
    pub fn uci(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|row| stats::upper_confidence_interval(row))
            .collect()
    }

    /// Mean of the top `frac` fraction of the per-amount means.
    pub fn mean_top(&self, frac: f64) -> f64 {
        stats::mean(&stats::top_fraction(&self.mean(), frac))
    }

    /// Mean of the top `frac` fraction of the per-amount upper bounds.
    pub fn uci_top(&self, frac: f64) -> f64 {
        stats::mean(&stats::top_fraction(&self.uci(), frac))
    }

    /// Mean spread over the amounts where the predicted mean is highest:
    /// how unsure the model is where it is most optimistic.
    pub fn std_over_top_mean(&self, frac: f64) -> f64 {
        let std = self.std();
        let top: Vec<f64> = stats::top_fraction_indices(&self.mean(), frac)
            .into_iter()
            .map(|i| std[i])
            .collect();
        stats::mean(&top)
    }
}

// ---------------------------------------------------------------------------
// Learner – teach / predict lifecycle
// ---------------------------------------------------------------------------

/// One completed teach, enough to rebuild the prediction context later
/// (which ligands were seen, over which amount range, with which model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachingRecord {
    pub date: DateTime<Utc>,
    pub model_path: PathBuf,
    pub fom_key: String,
    pub n_rows: usize,
    pub ligand_identifiers: Vec<String>,
    pub amount_min: f64,
    pub amount_max: f64,
    pub amount_unit: String,
    pub config: ForestConfig,
}

/// The single-ligand active learner: fits a forest on screened reactions
/// and scores the candidate pool with per-tree prediction distributions.
#[derive(Debug, Serialize, Deserialize)]
pub struct Learner {
    pub fom_key: String,
    pub forest_config: ForestConfig,
    pub records: Vec<TeachingRecord>,
    #[serde(skip)]
    model: Option<RandomForest>,
}

impl Learner {
    pub fn new(fom_key: impl Into<String>, forest_config: ForestConfig) -> Self {
        Learner {
            fom_key: fom_key.into(),
            forest_config,
            records: Vec::new(),
            model: None,
        }
    }

    pub fn latest_record(&self) -> Result<&TeachingRecord> {
        self.records.last().context("learner has no teaching record")
    }

    /// Identifiers of every ligand any teach has seen.
    pub fn taught_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .iter()
            .flat_map(|r| r.ligand_identifiers.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Fit the forest on the set's figure-of-merit rows and persist it at
    /// `model_path`. Reusing a previous model path is an error.
    pub fn teach(
        &mut self,
        set: &ReactionSet,
        table: &DescriptorTable,
        model_path: &Path,
    ) -> Result<&TeachingRecord> {
        if self.records.iter().any(|r| r.model_path == model_path) {
            bail!("model path {} already used by an earlier teach", model_path.display());
        }

        let rows = set.training_rows(&self.fom_key)?;
        let (amount_min, amount_max, amount_unit) = set.amount_range()?;

        // Deduplicated ligand list, then (ligand index, amount) pairs.
        let mut ligands: Vec<Ligand> = Vec::new();
        let mut pairs = Vec::with_capacity(rows.len());
        let mut targets = Vec::with_capacity(rows.len());
        for row in &rows {
            let idx = match ligands.iter().position(|l| l == &row.ligand) {
                Some(idx) => idx,
                None => {
                    ligands.push(row.ligand.clone());
                    ligands.len() - 1
                }
            };
            pairs.push((idx, row.amount));
            targets.push(row.fom);
        }

        let (_, matrix) = feature_matrix(&ligands, &pairs, table)?;
        log::info!(
            "teaching on {} rows x {} features ({} ligands)",
            matrix.len(),
            matrix.n_features(),
            ligands.len()
        );

        let forest = RandomForest::fit(&matrix, &targets, self.forest_config)?;
        forest.save(model_path)?;
        self.model = Some(forest);

        self.records.push(TeachingRecord {
            date: Utc::now(),
            model_path: model_path.to_path_buf(),
            fom_key: self.fom_key.clone(),
            n_rows: rows.len(),
            ligand_identifiers: ligands.iter().map(Ligand::identifier).collect(),
            amount_min,
            amount_max,
            amount_unit,
            config: self.forest_config,
        });
        Ok(self.records.last().expect("record just pushed"))
    }

    /// Score pool ligands over an amount grid with the current model.
    pub fn predict(
        &self,
        ligands: &[Ligand],
        amounts: &[f64],
        table: &DescriptorTable,
    ) -> Result<Vec<LigandPrediction>> {
        let model = self
            .model
            .as_ref()
            .context("no model loaded; teach first or call load_model")?;
        let taught = self.taught_identifiers();
        for lig in ligands {
            if taught.binary_search(&lig.identifier()).is_ok() {
                log::warn!("predicting an already taught ligand: {lig}");
            }
        }

        // Ligand-major rows: all amounts of ligand 0, then ligand 1, ...
        let pairs: Vec<(usize, f64)> = (0..ligands.len())
            .flat_map(|i| amounts.iter().map(move |&a| (i, a)))
            .collect();
        let (_, matrix) = feature_matrix(ligands, &pairs, table)?;
        let distribution = model.predict_distribution(&matrix.rows)?;

        Ok(ligands
            .iter()
            .zip(distribution.chunks(amounts.len()))
            .map(|(lig, chunk)| LigandPrediction {
                ligand: lig.clone(),
                amounts: amounts.to_vec(),
                values: chunk.to_vec(),
            })
            .collect())
    }

    /// The geometric amount grid spanning what the model was taught on.
    pub fn amount_grid(&self, n: usize) -> Result<Vec<f64>> {
        let record = self.latest_record()?;
        stats::geo_space(record.amount_min, record.amount_max, n)
    }

    // -- Persistence --------------------------------------------------------

    /// Reload the forest referenced by the latest teaching record.
    pub fn load_model(&mut self) -> Result<()> {
        let path = self.latest_record()?.model_path.clone();
        self.model = Some(RandomForest::load(&path)?);
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("writing learner {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing learner {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chem::{LigandSolution, PropertyValue, Reaction, StockSolution};
    use std::collections::BTreeMap;
    use std::io::Write;

    fn ligand(label: u32, d: f64) -> Ligand {
        Ligand {
            label: Some(label),
            ..Ligand::new(format!("InChI=1S/t{label}-{d}"))
        }
    }

    fn table(ligands: &[Ligand]) -> DescriptorTable {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "InChI,d1,d2").unwrap();
        for (i, lig) in ligands.iter().enumerate() {
            writeln!(f, "{},{},{}", lig.inchi, i as f64, (i * i) as f64).unwrap();
        }
        DescriptorTable::load(f.path()).unwrap()
    }

    fn reaction(lig: &Ligand, volume: f64, fom: f64) -> Reaction {
        let mut properties = BTreeMap::new();
        properties.insert("fom".to_string(), PropertyValue::Float(fom));
        Reaction {
            identifier: format!("p@@{}-{volume}", lig.identifier()),
            ligand_solution: Some(LigandSolution::new(lig.clone(), volume, 1.0).unwrap()),
            nc_solution: Some(StockSolution::new("NC", 10.0)),
            solvent: Some(StockSolution::new("toluene", 50.0)),
            conditions: vec![],
            properties,
        }
    }

    fn campaign() -> (Vec<Ligand>, DescriptorTable, ReactionSet) {
        let ligands: Vec<Ligand> = (0..4).map(|i| ligand(i, i as f64)).collect();
        let table = table(&ligands);
        let mut reactions = Vec::new();
        for lig in &ligands {
            for v in [1.0, 4.0, 16.0] {
                reactions.push(reaction(lig, v, v + lig.label.unwrap() as f64));
            }
        }
        (ligands, table, ReactionSet::new(reactions))
    }

    #[test]
    fn teach_then_predict() {
        let dir = tempfile::tempdir().unwrap();
        let (ligands, table, set) = campaign();
        let cfg = ForestConfig {
            n_trees: 20,
            ..ForestConfig::default()
        };
        let mut learner = Learner::new("fom", cfg);
        let model_path = dir.path().join("model.json");
        let record = learner.teach(&set, &table, &model_path).unwrap();
        assert_eq!(record.n_rows, 12);
        assert_eq!(record.ligand_identifiers.len(), 4);
        assert_eq!((record.amount_min, record.amount_max), (1.0, 16.0));

        let amounts = learner.amount_grid(5).unwrap();
        let preds = learner.predict(&ligands, &amounts, &table).unwrap();
        assert_eq!(preds.len(), 4);
        assert_eq!(preds[0].values.len(), 5);
        assert_eq!(preds[0].values[0].len(), 20);
        assert!(preds[0].uci()[0] >= preds[0].mean()[0]);
    }

    #[test]
    fn model_path_reuse_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, table, set) = campaign();
        let mut learner = Learner::new("fom", ForestConfig { n_trees: 5, ..Default::default() });
        let path = dir.path().join("model.json");
        learner.teach(&set, &table, &path).unwrap();
        assert!(learner.teach(&set, &table, &path).is_err());
    }

    #[test]
    fn learner_roundtrip_reloads_model() {
        let dir = tempfile::tempdir().unwrap();
        let (ligands, table, set) = campaign();
        let mut learner = Learner::new("fom", ForestConfig { n_trees: 5, ..Default::default() });
        learner.teach(&set, &table, &dir.path().join("model.json")).unwrap();
        let learner_path = dir.path().join("learner.json");
        learner.save(&learner_path).unwrap();

        let mut reloaded = Learner::load(&learner_path).unwrap();
        // Model is not serialized with the learner; it must be reloaded.
        assert!(reloaded.predict(&ligands, &[1.0], &table).is_err());
        reloaded.load_model().unwrap();
        assert!(reloaded.predict(&ligands, &[1.0], &table).is_ok());
        assert_eq!(reloaded.taught_identifiers(), learner.taught_identifiers());
    }

    #[test]
    fn prediction_top_fraction_metrics() {
        let pred = LigandPrediction {
            ligand: ligand(1, 0.0),
            amounts: vec![1.0, 2.0, 3.0, 4.0],
            values: vec![
                vec![1.0, 1.0],
                vec![2.0, 2.0],
                vec![3.0, 5.0],
                vec![0.0, 0.0],
            ],
        };
        // Top 25% of means is the single row [3.0, 5.0].
        assert!((pred.mean_top(0.25) - 4.0).abs() < 1e-12);
        assert!((pred.std_over_top_mean(0.25) - 1.0).abs() < 1e-12);
    }
}
