//! Generate a deterministic synthetic campaign: inventory, descriptor
//! table, one round of screened reactions, and a ready-to-run config.
//!
//! Usage: `cargo run --bin generate_campaign [out_dir]`

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const N_LIGANDS: usize = 40;
const N_TAUGHT: usize = 10;
const VOLUMES_UL: [f64; 6] = [1.0, 2.0, 5.0, 10.0, 20.0, 40.0];
const CONCENTRATION_UM: f64 = 2.0;

struct DemoLigand {
    inchi: String,
    smiles: String,
    name: String,
    label: usize,
    cas: String,
    /// 4 descriptors + complexity, in descriptor CSV order.
    descriptors: [f64; 5],
}

fn make_ligands(rng: &mut StdRng) -> Vec<DemoLigand> {
    (0..N_LIGANDS)
        .map(|i| {
            let carbons = 2 + i % 12;
            DemoLigand {
                inchi: format!("InChI=1S/C{carbons}H{}O2/c-demo-{i}", 2 * carbons),
                smiles: format!("{}C(=O)O", "C".repeat(carbons)),
                name: format!("demo-acid-{i:02}"),
                label: i,
                cas: format!("{}-{:02}-{}", 1000 + i, i % 100, i % 10),
                descriptors: [
                    rng.gen_range(-1.0..4.0),            // SLogP
                    (4 + carbons) as f64,                // nHeavyAtom
                    rng.gen_range(0.0..12.0),            // pKa
                    rng.gen_range(20.0..200.0),          // psa
                    rng.gen_range(50.0..600.0),          // complexity_BertzCT
                ],
            }
        })
        .collect()
}

/// The "true" response the model is supposed to recover: a smooth bump in
/// amount whose height depends on the hidden descriptor mix.
fn figure_of_merit(lig: &DemoLigand, amount: f64, noise: f64) -> f64 {
    let height = 1.0 + (lig.descriptors[0] / 4.0) + (lig.descriptors[2] / 24.0);
    let optimum = 8.0 + lig.descriptors[1] / 4.0;
    let width = 1.2;
    let bump = height * (-(amount.ln() - optimum.ln()).powi(2) / (2.0 * width * width)).exp();
    (bump + noise).max(0.0)
}

fn write_inventory(path: &Path, ligands: &[DemoLigand]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["InChI", "SMILES", "Name", "LigandLabel", "cas_number"])?;
    for lig in ligands {
        writer.write_record([
            lig.inchi.as_str(),
            lig.smiles.as_str(),
            lig.name.as_str(),
            &lig.label.to_string(),
            lig.cas.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_descriptors(path: &Path, ligands: &[DemoLigand]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["InChI", "SLogP", "nHeavyAtom", "pKa", "psa", "complexity_BertzCT"])?;
    for lig in ligands {
        let mut record = vec![lig.inchi.clone()];
        record.extend(lig.descriptors.iter().map(|d| format!("{d:.4}")));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_reactions(path: &Path, ligands: &[DemoLigand], rng: &mut StdRng) -> Result<()> {
    let noise = Normal::new(0.0, 0.02).expect("valid normal");
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "identifier",
        "ligand_inchi",
        "ligand_volume_ul",
        "ligand_concentration_uM",
        "nc_volume_ul",
        "solvent_volume_ul",
        "temperature (C)",
        "od390",
    ])?;

    for (plate, lig) in ligands.iter().take(N_TAUGHT).enumerate() {
        for (vial, volume) in VOLUMES_UL.iter().enumerate() {
            let fom = figure_of_merit(lig, volume * CONCENTRATION_UM, noise.sample(rng));
            writer.write_record([
                format!("plate{plate:02}@@vial{vial:02}"),
                lig.inchi.clone(),
                format!("{volume}"),
                format!("{CONCENTRATION_UM}"),
                "10.0".to_string(),
                format!("{}", 50.0 - volume),
                "25.0".to_string(),
                // references below report ~1.0, so od390 is pre-scaled
                format!("{:.4}", fom),
            ])?;
        }
        // Two nanocrystal references and one blank per plate.
        for (i, od) in [1.02, 0.98].iter().enumerate() {
            writer.write_record([
                format!("plate{plate:02}@@ref{i}"),
                String::new(),
                "0".to_string(),
                "0".to_string(),
                "10.0".to_string(),
                "50.0".to_string(),
                "25.0".to_string(),
                format!("{od}"),
            ])?;
        }
        writer.write_record([
            format!("plate{plate:02}@@blank"),
            String::new(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "50.0".to_string(),
            "25.0".to_string(),
            "0.01".to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_config(path: &Path) -> Result<()> {
    fs::write(
        path,
        r#"{
  "work_dir": "out",
  "inventory_csv": "inventory.csv",
  "descriptors_csv": "descriptors.csv",
  "reactions_csv": ["reactions.csv"],
  "fom_key": "od390",
  "prediction_grid": 50,
  "suggestion_percentile": 20.0,
  "suggestion_batch_size": 4
}
"#,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let out = std::env::args().nth(1).unwrap_or_else(|| "demo_campaign".to_string());
    let out = Path::new(&out);
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let mut rng = StdRng::seed_from_u64(42);
    let ligands = make_ligands(&mut rng);

    write_inventory(&out.join("inventory.csv"), &ligands)?;
    write_descriptors(&out.join("descriptors.csv"), &ligands)?;
    write_reactions(&out.join("reactions.csv"), &ligands, &mut rng)?;
    write_config(&out.join("campaign.json"))?;

    println!(
        "wrote demo campaign ({} ligands, {} taught) to {}",
        N_LIGANDS,
        N_TAUGHT,
        out.display()
    );
    println!("run it with: ligand-suggester run --config {}/campaign.json", out.display());
    Ok(())
}
