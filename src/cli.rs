use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::campaign::{Campaign, CampaignConfig, Stage, leave_one_ligand_out, write_loo_csv};
use crate::chem::ReactionSet;
use crate::data::{DescriptorTable, load_inventory, load_reactions, write_inventory, write_smi};

// ---------------------------------------------------------------------------
// Command-line surface
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "ligand-suggester",
    version,
    about = "Active-learning ligand selection: teach, rank, and suggest"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate an inventory CSV and optionally write normalized outputs.
    Inventory {
        /// Inventory CSV (requires an InChI column).
        path: PathBuf,
        /// Write a normalized inventory CSV here.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write a .smi file (one SMILES per line) here.
        #[arg(long)]
        smi: Option<PathBuf>,
    },
    /// Run campaign stages against a config file.
    Run {
        /// Campaign config (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Stage to run; repeat for several. All stages when omitted.
        #[arg(long = "stage", value_name = "STAGE")]
        stages: Vec<Stage>,
    },
    /// Leave-one-ligand-out evaluation of the taught reactions.
    Crossval {
        /// Campaign config (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Output directory, `<work_dir>/crossval` when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Inventory { path, out, smi } => {
                let ligands = load_inventory(&path)?;
                let labeled = ligands.iter().filter(|l| l.label.is_some()).count();
                log::info!("{}: {} ligands ({labeled} labeled)", path.display(), ligands.len());
                if let Some(out) = out {
                    write_inventory(&out, &ligands)?;
                    log::info!("wrote normalized inventory to {}", out.display());
                }
                if let Some(smi) = smi {
                    write_smi(&smi, &ligands)?;
                    log::info!("wrote SMILES list to {}", smi.display());
                }
                Ok(())
            }
            Command::Run { config, stages } => {
                let config = CampaignConfig::load(&config)?;
                let stages = if stages.is_empty() {
                    Stage::ALL.to_vec()
                } else {
                    stages
                };
                Campaign::new(config).run(&stages)
            }
            Command::Crossval { config, out } => {
                let config = CampaignConfig::load(&config)?;
                let inventory = load_inventory(&config.inventory_csv)?;
                let table = DescriptorTable::load(&config.descriptors_csv)?;
                let mut sets = Vec::new();
                for path in &config.reactions_csv {
                    sets.push(load_reactions(path, &inventory)?);
                }
                let reactions = ReactionSet::merge(sets);

                let outcome =
                    leave_one_ligand_out(&reactions, &table, &config.fom_key, config.forest)?;
                log::info!(
                    "leave-one-ligand-out over {} ligands: mae {:.4}, rmse {:.4}",
                    outcome.summaries.len(),
                    outcome.overall_mae,
                    outcome.overall_rmse
                );

                let dir = out.unwrap_or_else(|| config.work_dir.join("crossval"));
                fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
                write_loo_csv(&dir, &outcome)?;
                log::info!("wrote cross-validation tables to {}", dir.display());
                Ok(())
            }
        }
    }
}
