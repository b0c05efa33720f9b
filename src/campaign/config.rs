use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::learn::ForestConfig;

// ---------------------------------------------------------------------------
// Campaign configuration
// ---------------------------------------------------------------------------

/// Everything a campaign run needs, loaded from a JSON file. Relative paths
/// are resolved against the config file's directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Where stage artifacts land.
    pub work_dir: PathBuf,
    pub inventory_csv: PathBuf,
    pub descriptors_csv: PathBuf,
    /// Reaction CSVs of all learning rounds so far, merged for teaching.
    pub reactions_csv: Vec<PathBuf>,
    /// Reaction property used as the figure of merit.
    pub fom_key: String,
    /// Candidate pool inventory; the main inventory when absent.
    #[serde(default)]
    pub pool_csv: Option<PathBuf>,

    #[serde(default)]
    pub forest: ForestConfig,
    /// Points on the prediction amount grid.
    #[serde(default = "default_prediction_grid")]
    pub prediction_grid: usize,
    /// Ligands scored per prediction chunk file.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pool ligands kept per rank column at query time (None: all).
    #[serde(default)]
    pub query_size: Option<usize>,
    /// Descriptor echoed into the ranking CSV's `complexity` column.
    #[serde(default = "default_complexity_descriptor")]
    pub complexity_descriptor: String,
    #[serde(default = "default_suggestion_percentile")]
    pub suggestion_percentile: f64,
    #[serde(default = "default_suggestion_batch_size")]
    pub suggestion_batch_size: usize,
    /// Seed of the random ranking column.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_prediction_grid() -> usize {
    200
}

fn default_chunk_size() -> usize {
    10
}

fn default_complexity_descriptor() -> String {
    "complexity_BertzCT".to_string()
}

fn default_suggestion_percentile() -> f64 {
    2.0
}

fn default_suggestion_batch_size() -> usize {
    8
}

fn default_seed() -> u64 {
    42
}

impl CampaignConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let mut config: CampaignConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.work_dir = resolve(base, &config.work_dir);
            config.inventory_csv = resolve(base, &config.inventory_csv);
            config.descriptors_csv = resolve(base, &config.descriptors_csv);
            config.pool_csv = config.pool_csv.as_deref().map(|p| resolve(base, p));
            config.reactions_csv = config
                .reactions_csv
                .iter()
                .map(|p| resolve(base, p))
                .collect();
        }
        Ok(config)
    }

    // -- Artifact locations under the work dir ------------------------------

    pub fn model_path(&self) -> PathBuf {
        self.work_dir.join("model.json")
    }

    pub fn learner_path(&self) -> PathBuf {
        self.work_dir.join("learner.json")
    }

    /// Snapshot of the merged reaction set the model was taught on.
    pub fn reactions_json_path(&self) -> PathBuf {
        self.work_dir.join("reactions.json")
    }

    pub fn prediction_dir(&self) -> PathBuf {
        self.work_dir.join("prediction")
    }

    pub fn prediction_chunk_path(&self, chunk: usize) -> PathBuf {
        self.prediction_dir()
            .join(format!("prediction_chunk_{chunk:06}.json"))
    }

    pub fn query_record_path(&self) -> PathBuf {
        self.work_dir.join("query_record.json")
    }

    pub fn ranking_dir(&self) -> PathBuf {
        self.work_dir.join("ranking")
    }

    pub fn ranking_csv_path(&self) -> PathBuf {
        self.ranking_dir().join("ranking.csv")
    }

    pub fn suggestion_dir(&self) -> PathBuf {
        self.work_dir.join("suggestion")
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// The campaign stages, in their natural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Teach,
    Predict,
    Query,
    Rank,
    Suggest,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Teach,
        Stage::Predict,
        Stage::Query,
        Stage::Rank,
        Stage::Suggest,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Teach => "teach",
            Stage::Predict => "predict",
            Stage::Query => "query",
            Stage::Rank => "rank",
            Stage::Suggest => "suggest",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "teach" => Ok(Stage::Teach),
            "predict" => Ok(Stage::Predict),
            "query" => Ok(Stage::Query),
            "rank" => Ok(Stage::Rank),
            "suggest" => Ok(Stage::Suggest),
            other => anyhow::bail!("unknown stage {other:?} (expected one of teach, predict, query, rank, suggest)"),
        }
    }
}
