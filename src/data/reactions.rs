use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::chem::{
    Condition, Ligand, LigandSolution, PropertyValue, Reaction, ReactionSet, StockSolution,
    ligand_by_inchi,
};

// ---------------------------------------------------------------------------
// Reactions CSV loader
// ---------------------------------------------------------------------------

/// Fixed columns of a reactions CSV. `ligand_inchi` is empty for reference
/// vials. Any column whose name carries a bracketed unit becomes a
/// [`Condition`]; every remaining column becomes a reaction property
/// (figures of merit among them).
const FIXED_COLUMNS: [&str; 6] = [
    "identifier",
    "ligand_inchi",
    "ligand_volume_ul",
    "ligand_concentration_uM",
    "nc_volume_ul",
    "solvent_volume_ul",
];

/// Load robot-dispensed reactions, resolving ligands against the inventory.
pub fn load_reactions(path: &Path, inventory: &[Ligand]) -> Result<ReactionSet> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening reactions {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading reactions headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let col = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("reactions CSV missing {name:?} column"))
    };
    let id_idx = col("identifier")?;
    let inchi_idx = col("ligand_inchi")?;
    let lig_vol_idx = col("ligand_volume_ul")?;
    let lig_conc_idx = col("ligand_concentration_uM")?;
    let nc_vol_idx = col("nc_volume_ul")?;
    let solvent_vol_idx = col("solvent_volume_ul")?;

    let parse_f64 = |cell: &str, row: usize, name: &str| -> Result<f64> {
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(0.0);
        }
        cell.parse::<f64>()
            .with_context(|| format!("reactions row {row}, {name}: {cell:?} is not a number"))
    };

    let mut reactions = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reactions row {row_no}"))?;
        let cell = |idx: usize| record.get(idx).unwrap_or("");

        let identifier = cell(id_idx).trim();
        if identifier.is_empty() {
            bail!("reactions row {row_no}: empty identifier");
        }

        let ligand_inchi = cell(inchi_idx).trim();
        let ligand_solution = if ligand_inchi.is_empty() {
            None
        } else {
            let ligand = ligand_by_inchi(ligand_inchi, inventory)
                .with_context(|| format!("reactions row {row_no}"))?;
            let solution = LigandSolution::new(
                ligand.clone(),
                parse_f64(cell(lig_vol_idx), row_no, "ligand_volume_ul")?,
                parse_f64(cell(lig_conc_idx), row_no, "ligand_concentration_uM")?,
            )
            .with_context(|| format!("reactions row {row_no}"))?;
            Some(solution)
        };

        let nc_volume = parse_f64(cell(nc_vol_idx), row_no, "nc_volume_ul")?;
        let solvent_volume = parse_f64(cell(solvent_vol_idx), row_no, "solvent_volume_ul")?;

        let mut conditions = Vec::new();
        let mut properties = std::collections::BTreeMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            let name = &headers[col_idx];
            if FIXED_COLUMNS.contains(&name.as_str()) {
                continue;
            }
            if name.contains('(') && name.contains(')') {
                conditions.push(Condition::new(
                    name.clone(),
                    parse_f64(value, row_no, name)?,
                )?);
            } else {
                properties.insert(name.clone(), PropertyValue::guess(value));
            }
        }

        reactions.push(Reaction {
            identifier: identifier.to_string(),
            ligand_solution,
            nc_solution: (nc_volume > 0.0).then(|| StockSolution::new("NC", nc_volume)),
            solvent: (solvent_volume > 0.0).then(|| StockSolution::new("solvent", solvent_volume)),
            conditions,
            properties,
        });
    }

    if reactions.is_empty() {
        bail!("reactions file {} is empty", path.display());
    }
    let set = ReactionSet::new(reactions);
    log::info!(
        "reactions: loaded {} ({} real, {} nc references) from {}",
        set.len(),
        set.real().len(),
        set.nc_references().len(),
        path.display()
    );
    Ok(set)
}

// ---------------------------------------------------------------------------
// JSON persistence for assembled sets
// ---------------------------------------------------------------------------

pub fn save_reaction_set(path: &Path, set: &ReactionSet) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), set)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn load_reaction_set(path: &Path) -> Result<ReactionSet> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}
