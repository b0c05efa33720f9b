use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::chem::{Ligand, PropertyValue};

// ---------------------------------------------------------------------------
// Descriptor table – numeric features per ligand, keyed by InChI
// ---------------------------------------------------------------------------

/// Columns of the descriptor CSV that identify rather than describe.
const META_COLUMNS: [&str; 6] = [
    "InChI",
    "SMILES",
    "Name",
    "IUPAC Name",
    "LigandLabel",
    "cas_number",
];

/// Molecular descriptors computed externally (cxcalc / Mordred / OPERA),
/// one fully populated row per ligand.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    /// Descriptor column names, in file order.
    pub names: Vec<String>,
    /// InChI → descriptor vector, aligned with `names`.
    pub by_inchi: BTreeMap<String, Vec<f64>>,
}

impl DescriptorTable {
    /// Load a descriptor CSV. `InChI` is required; every other non-meta
    /// column must be numeric for every row.
    pub fn load(path: &Path) -> Result<DescriptorTable> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening descriptor table {}", path.display()))?;
        let headers: Vec<String> = reader
            .headers()
            .context("reading descriptor headers")?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let inchi_idx = headers
            .iter()
            .position(|h| h == "InChI")
            .context("descriptor CSV missing 'InChI' column")?;
        let descriptor_cols: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !META_COLUMNS.contains(&h.as_str()))
            .map(|(i, _)| i)
            .collect();
        if descriptor_cols.is_empty() {
            bail!("descriptor table {} has no descriptor columns", path.display());
        }
        let names: Vec<String> = descriptor_cols.iter().map(|&i| headers[i].clone()).collect();

        let mut by_inchi = BTreeMap::new();
        for (row_no, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("descriptor row {row_no}"))?;
            let inchi = record.get(inchi_idx).unwrap_or("").trim();
            if inchi.is_empty() {
                bail!("descriptor row {row_no}: empty InChI");
            }
            let mut values = Vec::with_capacity(descriptor_cols.len());
            for (&col, name) in descriptor_cols.iter().zip(&names) {
                let cell = record.get(col).unwrap_or("").trim();
                let value = cell.parse::<f64>().with_context(|| {
                    format!("descriptor row {row_no}, column {name:?}: {cell:?} is not a number")
                })?;
                values.push(value);
            }
            by_inchi.insert(inchi.to_string(), values);
        }
        if by_inchi.is_empty() {
            bail!("descriptor table {} is empty", path.display());
        }
        log::info!(
            "descriptors: {} ligands x {} descriptors",
            by_inchi.len(),
            names.len()
        );
        Ok(DescriptorTable { names, by_inchi })
    }

    pub fn row(&self, ligand: &Ligand) -> Option<&Vec<f64>> {
        self.by_inchi.get(&ligand.inchi)
    }

    /// Copy descriptor values into ligand properties so downstream CSV
    /// exports (complexity, etc.) can read them. Missing ligands are an
    /// error: a model cannot score an undescribed molecule.
    pub fn attach(&self, ligands: &mut [Ligand]) -> Result<()> {
        for lig in ligands.iter_mut() {
            let row = self
                .by_inchi
                .get(&lig.inchi)
                .with_context(|| format!("no descriptors for {}", lig.identifier()))?;
            for (name, value) in self.names.iter().zip(row) {
                lig.properties
                    .insert(name.clone(), PropertyValue::Float(*value));
            }
        }
        Ok(())
    }

    /// One descriptor row per ligand, the feature space used for
    /// Kennard–Stone sampling and diversity clustering.
    pub fn descriptor_rows(&self, ligands: &[Ligand]) -> Result<Vec<Vec<f64>>> {
        ligands
            .iter()
            .map(|lig| {
                self.row(lig)
                    .cloned()
                    .with_context(|| format!("no descriptors for {}", lig.identifier()))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Feature matrix – model input rows
// ---------------------------------------------------------------------------

/// Model input: named columns, one row per (ligand, amount) pair.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Name of the appended amount column.
pub const AMOUNT_FEATURE: &str = "ligand_amount";

/// Build the model input for (ligand, amount) pairs: the ligand's
/// descriptor vector with the amount appended as the last feature.
///
/// Returns the ligand column (one entry per row, ligand-major order) and
/// the matrix itself.
pub fn feature_matrix<'a>(
    ligands: &'a [Ligand],
    amounts_per_ligand: &[(usize, f64)],
    table: &DescriptorTable,
) -> Result<(Vec<&'a Ligand>, FeatureMatrix)> {
    let mut feature_names = table.names.clone();
    feature_names.push(AMOUNT_FEATURE.to_string());

    let mut ligand_col = Vec::with_capacity(amounts_per_ligand.len());
    let mut rows = Vec::with_capacity(amounts_per_ligand.len());
    for &(lig_idx, amount) in amounts_per_ligand {
        let lig = ligands
            .get(lig_idx)
            .with_context(|| format!("ligand index {lig_idx} out of range"))?;
        let mut row = table
            .row(lig)
            .cloned()
            .with_context(|| format!("no descriptors for {}", lig.identifier()))?;
        row.push(amount);
        ligand_col.push(lig);
        rows.push(row);
    }
    Ok((ligand_col, FeatureMatrix { feature_names, rows }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table() -> DescriptorTable {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(
            b"InChI,IUPAC Name,SLogP,nHeavyAtom,complexity_BertzCT\n\
              InChI=1S/a,a,1.5,10,120.0\n\
              InChI=1S/b,b,-0.5,4,40.0\n",
        )
        .unwrap();
        DescriptorTable::load(f.path()).unwrap()
    }

    #[test]
    fn loads_numeric_columns_only() {
        let t = table();
        assert_eq!(t.names, vec!["SLogP", "nHeavyAtom", "complexity_BertzCT"]);
        assert_eq!(t.by_inchi["InChI=1S/a"], vec![1.5, 10.0, 120.0]);
    }

    #[test]
    fn attach_fails_for_unknown_ligand() {
        let t = table();
        let mut ligands = vec![Ligand::new("InChI=1S/zzz")];
        assert!(t.attach(&mut ligands).is_err());

        let mut known = vec![Ligand::new("InChI=1S/a")];
        t.attach(&mut known).unwrap();
        assert_eq!(known[0].numeric_property("complexity_BertzCT"), Some(120.0));
    }

    #[test]
    fn feature_matrix_appends_amount() {
        let t = table();
        let ligands = vec![Ligand::new("InChI=1S/a"), Ligand::new("InChI=1S/b")];
        let pairs = vec![(0, 10.0), (0, 20.0), (1, 10.0)];
        let (col, m) = feature_matrix(&ligands, &pairs, &t).unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.feature_names.last().map(String::as_str), Some(AMOUNT_FEATURE));
        assert_eq!(m.rows[1], vec![1.5, 10.0, 120.0, 20.0]);
        assert_eq!(col[2].inchi, "InChI=1S/b");
    }
}
