use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::chem::{Ligand, PropertyValue};

// ---------------------------------------------------------------------------
// Inventory CSV loader
// ---------------------------------------------------------------------------

/// Columns consumed into dedicated [`Ligand`] fields; everything else lands
/// in `properties`.
const KNOWN_COLUMNS: [&str; 5] = ["InChI", "SMILES", "Name", "IUPAC Name", "LigandLabel"];

/// Load the ligand inventory from a CSV file.
///
/// The only required column is `InChI`; rows with an empty InChI are
/// skipped (counted and logged). `Name`, `IUPAC Name`, `SMILES` and
/// `LigandLabel` are picked up when present, all remaining columns become
/// typed ligand properties.
pub fn load_inventory(path: &Path) -> Result<Vec<Ligand>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening inventory {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading inventory headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let inchi_idx = headers
        .iter()
        .position(|h| h == "InChI")
        .context("inventory CSV missing 'InChI' column")?;
    let col = |name: &str| headers.iter().position(|h| h == name);
    let smiles_idx = col("SMILES");
    let name_idx = col("Name");
    let iupac_idx = col("IUPAC Name");
    let label_idx = col("LigandLabel");

    let mut ligands = Vec::new();
    let mut skipped = 0usize;

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("inventory row {row_no}"))?;
        let inchi = record.get(inchi_idx).unwrap_or("").trim();
        if inchi.is_empty() {
            skipped += 1;
            continue;
        }

        let mut ligand = Ligand::new(inchi);
        let get = |idx: Option<usize>| -> Option<&str> {
            idx.and_then(|i| record.get(i)).map(str::trim).filter(|s| !s.is_empty())
        };
        if let Some(s) = get(smiles_idx) {
            ligand.smiles = s.to_string();
        }
        if let Some(s) = get(name_idx) {
            ligand.name = s.to_string();
        }
        if let Some(s) = get(iupac_idx) {
            ligand.iupac_name = s.to_string();
        }
        if let Some(s) = get(label_idx) {
            ligand.label = Some(
                s.parse::<u32>()
                    .with_context(|| format!("inventory row {row_no}: bad LigandLabel {s:?}"))?,
            );
        }

        for (col_idx, value) in record.iter().enumerate() {
            let col_name = &headers[col_idx];
            if KNOWN_COLUMNS.contains(&col_name.as_str()) {
                continue;
            }
            ligand
                .properties
                .insert(col_name.clone(), PropertyValue::guess(value));
        }

        ligands.push(ligand);
    }

    if skipped > 0 {
        log::warn!("inventory: skipped {skipped} rows without an InChI");
    }
    if ligands.is_empty() {
        bail!("inventory {} contains no usable rows", path.display());
    }
    log::info!("inventory: loaded {} ligands", ligands.len());
    Ok(ligands)
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Write a normalized inventory CSV (fixed columns plus sorted properties).
pub fn write_inventory(path: &Path, ligands: &[Ligand]) -> Result<()> {
    let mut property_names: Vec<String> = Vec::new();
    for lig in ligands {
        for key in lig.properties.keys() {
            if !property_names.contains(key) {
                property_names.push(key.clone());
            }
        }
    }
    property_names.sort();

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let mut header: Vec<String> = KNOWN_COLUMNS.iter().map(|s| s.to_string()).collect();
    header.extend(property_names.iter().cloned());
    writer.write_record(&header)?;

    for lig in ligands {
        let mut record = vec![
            lig.inchi.clone(),
            lig.smiles.clone(),
            lig.name.clone(),
            lig.iupac_name.clone(),
            lig.label.map(|l| l.to_string()).unwrap_or_default(),
        ];
        for key in &property_names {
            record.push(
                lig.properties
                    .get(key)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one SMILES per line, the input format of external descriptor
/// calculators.
pub fn write_smi(path: &Path, ligands: &[Ligand]) -> Result<()> {
    let lines: Vec<&str> = ligands.iter().map(|l| l.smiles.as_str()).collect();
    fs::write(path, lines.join("\n"))
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
