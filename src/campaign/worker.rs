use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use super::config::{CampaignConfig, Stage};
use crate::chem::{Ligand, ReactionSet};
use crate::data::{DescriptorTable, load_inventory, load_reactions, save_reaction_set};
use crate::learn::{Learner, LigandPrediction};
use crate::rank::{self, QueryRecord, RANK_COLUMNS, RankingRow};
use crate::suggest::{default_suggesters, suggest, write_suggestion_csv};

// ---------------------------------------------------------------------------
// Campaign – the staged worker
// ---------------------------------------------------------------------------

/// Runs the active-learning stages over a work directory. Stages talk to
/// each other through persisted artifacts only, so any stage can rerun in a
/// fresh process.
pub struct Campaign {
    config: CampaignConfig,
}

impl Campaign {
    pub fn new(config: CampaignConfig) -> Self {
        Campaign { config }
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Execute the requested stages in the given order, timing each.
    pub fn run(&self, stages: &[Stage]) -> Result<()> {
        for &stage in stages {
            let started = Instant::now();
            log::info!("stage {stage}: started");
            match stage {
                Stage::Teach => self.teach()?,
                Stage::Predict => self.predict()?,
                Stage::Query => self.query()?,
                Stage::Rank => self.rank()?,
                Stage::Suggest => self.suggest()?,
            }
            log::info!("stage {stage}: finished in {:.2}s", started.elapsed().as_secs_f64());
        }
        Ok(())
    }

    // -- Shared inputs -------------------------------------------------------

    fn inventory(&self) -> Result<Vec<Ligand>> {
        load_inventory(&self.config.inventory_csv)
    }

    fn pool(&self) -> Result<Vec<Ligand>> {
        match &self.config.pool_csv {
            Some(path) => load_inventory(path),
            None => self.inventory(),
        }
    }

    fn descriptor_table(&self) -> Result<DescriptorTable> {
        DescriptorTable::load(&self.config.descriptors_csv)
    }

    /// All learning rounds merged into one set, references included.
    fn reactions(&self) -> Result<ReactionSet> {
        let inventory = self.inventory()?;
        let mut sets = Vec::new();
        for path in &self.config.reactions_csv {
            sets.push(load_reactions(path, &inventory)?);
        }
        Ok(ReactionSet::merge(sets))
    }

    // -- Stages ---------------------------------------------------------------

    /// Fit the forest on everything screened so far.
    fn teach(&self) -> Result<()> {
        fs::create_dir_all(&self.config.work_dir)
            .with_context(|| format!("creating {}", self.config.work_dir.display()))?;
        let table = self.descriptor_table()?;
        let reactions = self.reactions()?;
        reactions.reactions.iter().for_each(|r| r.check());
        // Snapshot what was taught on, for audits and later reloads.
        save_reaction_set(&self.config.reactions_json_path(), &reactions)?;

        let mut learner = Learner::new(&self.config.fom_key, self.config.forest);
        learner.teach(&reactions, &table, &self.config.model_path())?;
        learner.save(&self.config.learner_path())?;
        Ok(())
    }

    /// Score the pool in resumable chunks.
    fn predict(&self) -> Result<()> {
        let mut learner = Learner::load(&self.config.learner_path())?;
        learner.load_model()?;
        let table = self.descriptor_table()?;
        let pool = self.pool()?;
        let amounts = learner.amount_grid(self.config.prediction_grid)?;
        log::info!("predicting {} pool ligands over {} amounts", pool.len(), amounts.len());

        fs::create_dir_all(self.config.prediction_dir())
            .with_context(|| format!("creating {}", self.config.prediction_dir().display()))?;

        for (chunk_no, ligands) in pool.chunks(self.config.chunk_size).enumerate() {
            let path = self.config.prediction_chunk_path(chunk_no);
            if path.exists() {
                // A finished chunk is only trusted if it matches the pool.
                let existing = load_predictions(&path)?;
                for (pred, lig) in existing.iter().zip(ligands) {
                    if pred.ligand != *lig {
                        bail!(
                            "stale chunk {}: has {}, pool has {}",
                            path.display(),
                            pred.ligand.identifier(),
                            lig.identifier()
                        );
                    }
                }
                log::debug!("chunk {chunk_no}: already predicted, skipping");
                continue;
            }
            let predictions = learner.predict(ligands, &amounts, &table)?;
            save_predictions(&path, &predictions)?;
        }
        Ok(())
    }

    /// Collect all predictions, rank the pool, persist the query record.
    fn query(&self) -> Result<()> {
        let table = self.descriptor_table()?;
        let predictions = self.collect_predictions()?;
        if predictions.is_empty() {
            bail!("no prediction chunks under {}", self.config.prediction_dir().display());
        }
        let ligands: Vec<Ligand> = predictions.iter().map(|p| p.ligand.clone()).collect();
        let descriptor_rows = table.descriptor_rows(&ligands)?;

        let rows = rank::build_ranking(&predictions, &descriptor_rows, self.config.seed)?;
        let record = rank::query(&rows, &self.config.model_path(), self.config.query_size);
        record.save(&self.config.query_record_path())?;
        log::info!("query: ranked {} ligands, kept {} per column", rows.len(), record.size);
        Ok(())
    }

    /// Export the enriched ranking table plus its distribution summaries.
    fn rank(&self) -> Result<()> {
        let record = QueryRecord::load(&self.config.query_record_path())?;
        let taught = Learner::load(&self.config.learner_path())?.taught_identifiers();

        let mut pool = self.pool()?;
        self.descriptor_table()?.attach(&mut pool)?;

        let mut rows: Vec<RankingRow> = Vec::with_capacity(record.rows.len());
        for mut row in record.rows {
            let Some(ligand) = pool.iter().find(|l| l.identifier() == row.ligand_identifier)
            else {
                // Pool may have shrunk since the prediction ran.
                continue;
            };
            row.complexity = ligand.numeric_property(&self.config.complexity_descriptor);
            row.is_taught = Some(taught.contains(&row.ligand_identifier));
            row.cas_number = ligand
                .properties
                .get("cas_number")
                .map(|v| v.to_string())
                .filter(|s| !s.is_empty());
            rows.push(row);
        }
        if rows.is_empty() {
            bail!("no ranked ligand is still in the pool; rerun predict and query");
        }

        let dir = self.config.ranking_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        rank::write_ranking_csv(
            &self.config.ranking_csv_path(),
            &rows,
            &self.config.complexity_descriptor,
        )?;

        let cutoffs = rank::rank_cutoffs(&rows, self.config.suggestion_percentile)?;
        rank::write_cutoffs(&dir.join("cutoffs.csv"), &cutoffs)?;
        for column in RANK_COLUMNS {
            let values: Vec<f64> = rows.iter().filter_map(|r| r.rank_value(column)).collect();
            rank::write_histogram(&dir.join(format!("{column}_hist.csv")), &values, 100)?;
        }
        log::info!("rank: exported {} rows to {}", rows.len(), self.config.ranking_csv_path().display());
        Ok(())
    }

    /// Run the suggester grid over the exported ranking.
    fn suggest(&self) -> Result<()> {
        let rows = rank::read_ranking_csv(&self.config.ranking_csv_path())?;
        let table = self.descriptor_table()?;
        let pool = self.pool()?;

        let ligands: Vec<Ligand> = rows
            .iter()
            .map(|row| {
                pool.iter()
                    .find(|l| l.identifier() == row.ligand_identifier)
                    .cloned()
                    .with_context(|| format!("{} not in the pool", row.ligand_identifier))
            })
            .collect::<Result<_>>()?;
        let descriptor_rows = table.descriptor_rows(&ligands)?;

        let dir = self.config.suggestion_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        for config in default_suggesters(
            self.config.suggestion_percentile,
            self.config.suggestion_batch_size,
        ) {
            let suggestion = suggest(&rows, &descriptor_rows, &config)?;
            let path = dir.join(format!("suggestion__{}.csv", suggestion.config_name));
            write_suggestion_csv(&path, &suggestion)?;
        }
        Ok(())
    }

    // -- Helpers ---------------------------------------------------------------

    fn collect_predictions(&self) -> Result<Vec<LigandPrediction>> {
        let mut predictions = Vec::new();
        let mut chunk_no = 0usize;
        loop {
            let path = self.config.prediction_chunk_path(chunk_no);
            if !path.exists() {
                break;
            }
            predictions.extend(load_predictions(&path)?);
            chunk_no += 1;
        }
        Ok(predictions)
    }
}

fn save_predictions(path: &Path, predictions: &[LigandPrediction]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), predictions)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn load_predictions(path: &Path) -> Result<Vec<LigandPrediction>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}
