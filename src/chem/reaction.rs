use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::ligand::{Ligand, PropertyValue};
use crate::stats::geo_space;

/// Volumes below this are treated as "nothing was dispensed".
pub const VOLUME_EPS: f64 = 1e-5;

// ---------------------------------------------------------------------------
// Conditions and solutions
// ---------------------------------------------------------------------------

/// A named reaction condition, e.g. `"temperature (C)"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub value: f64,
}

impl Condition {
    /// Condition names must carry a bracketed unit.
    pub fn new(name: impl Into<String>, value: f64) -> Result<Self> {
        let name = name.into();
        if !(name.contains('(') && name.contains(')')) {
            bail!("condition name needs a bracketed unit: {name:?}");
        }
        Ok(Condition { name, value })
    }
}

/// A stock solution dispensed by volume only (nanocrystals, pure solvent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSolution {
    /// Identity of the stock, e.g. "CsPbBr3" or the solvent name.
    pub name: String,
    pub volume: f64,
    pub volume_unit: String,
}

impl StockSolution {
    pub fn new(name: impl Into<String>, volume: f64) -> Self {
        StockSolution {
            name: name.into(),
            volume,
            volume_unit: "ul".to_string(),
        }
    }

    pub fn is_dispensed(&self) -> bool {
        self.volume > VOLUME_EPS
    }
}

/// A ligand dissolved in the campaign solvent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LigandSolution {
    pub ligand: Ligand,
    pub volume: f64,
    pub concentration: f64,
    pub volume_unit: String,
    pub concentration_unit: String,
}

impl LigandSolution {
    /// A dissolved ligand needs a positive concentration; only pure solvent
    /// may carry none.
    pub fn new(ligand: Ligand, volume: f64, concentration: f64) -> Result<Self> {
        if concentration <= 0.0 {
            bail!(
                "ligand solution of {} needs a positive concentration, got {concentration}",
                ligand.identifier()
            );
        }
        Ok(LigandSolution {
            ligand,
            volume,
            concentration,
            volume_unit: "ul".to_string(),
            concentration_unit: "uM".to_string(),
        })
    }

    /// Dispensed amount of ligand: volume times concentration.
    pub fn amount(&self) -> f64 {
        self.volume * self.concentration
    }

    pub fn amount_unit(&self) -> String {
        format!("{}*{}", self.volume_unit, self.concentration_unit)
    }

    pub fn is_dispensed(&self) -> bool {
        self.volume > VOLUME_EPS && self.concentration > 0.0
    }
}

// ---------------------------------------------------------------------------
// Reaction – one vial of a single-ligand screening plate
// ---------------------------------------------------------------------------

/// How a vial is used on the plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReactionKind {
    /// Ligand + nanocrystal + solvent: carries a figure of merit.
    Real,
    /// Nanocrystal + solvent only: the baseline the fom is measured against.
    NcReference,
    /// Solvent only.
    BlankReference,
}

/// A single robot-dispensed reaction.
///
/// Identifiers follow `"{plate}@@{vial}"`; reference vials on the same plate
/// share the prefix before `"@@"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub identifier: String,
    pub ligand_solution: Option<LigandSolution>,
    pub nc_solution: Option<StockSolution>,
    pub solvent: Option<StockSolution>,
    pub conditions: Vec<Condition>,
    /// Measured outputs keyed by name (figures of merit among them).
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Reaction {
    pub fn kind(&self) -> ReactionKind {
        let has_nc = self.nc_solution.as_ref().is_some_and(StockSolution::is_dispensed);
        let has_solvent = self.solvent.as_ref().is_some_and(StockSolution::is_dispensed);
        let has_ligand = self
            .ligand_solution
            .as_ref()
            .is_some_and(LigandSolution::is_dispensed);

        if has_nc && has_solvent && !has_ligand {
            ReactionKind::NcReference
        } else if !has_nc && has_solvent && !has_ligand {
            ReactionKind::BlankReference
        } else {
            ReactionKind::Real
        }
    }

    pub fn is_real(&self) -> bool {
        self.kind() == ReactionKind::Real
    }

    /// The plate part of the identifier (prefix before `"@@"`).
    pub fn plate(&self) -> &str {
        self.identifier.split("@@").next().unwrap_or(&self.identifier)
    }

    /// The ligand of a real reaction.
    pub fn ligand(&self) -> Option<&Ligand> {
        self.ligand_solution.as_ref().map(|ls| &ls.ligand)
    }

    /// Warn about unset fields; mirrors the consistency check run before
    /// every teach.
    pub fn check(&self) {
        if self.is_real() && self.ligand_solution.is_none() {
            log::warn!("{}: real reaction without a ligand solution", self.identifier);
        }
        if self.solvent.is_none() {
            log::warn!("{}: no solvent recorded", self.identifier);
        }
        if self.properties.is_empty() {
            log::warn!("{}: no measured properties", self.identifier);
        }
    }
}

// ---------------------------------------------------------------------------
// ReactionSet – a screening campaign's worth of reactions
// ---------------------------------------------------------------------------

/// One (ligand, amount, figure-of-merit) training observation.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub ligand: Ligand,
    pub amount: f64,
    pub fom: f64,
}

/// All reactions collected for a campaign, references included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionSet {
    pub reactions: Vec<Reaction>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ReactionSet {
    pub fn new(reactions: Vec<Reaction>) -> Self {
        ReactionSet {
            reactions,
            properties: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    pub fn real(&self) -> Vec<&Reaction> {
        self.reactions.iter().filter(|r| r.is_real()).collect()
    }

    pub fn nc_references(&self) -> Vec<&Reaction> {
        self.reactions
            .iter()
            .filter(|r| r.kind() == ReactionKind::NcReference)
            .collect()
    }

    /// Reference reactions on the same plate as `reaction`.
    pub fn references_for(&self, reaction: &Reaction) -> Vec<&Reaction> {
        self.nc_references()
            .into_iter()
            .filter(|r| r.plate() == reaction.plate())
            .collect()
    }

    /// Ligands of the real reactions, one entry per reaction.
    pub fn ligands(&self) -> Vec<&Ligand> {
        self.real().into_iter().filter_map(Reaction::ligand).collect()
    }

    /// Distinct ligands, sorted by identifier.
    pub fn unique_ligands(&self) -> Vec<Ligand> {
        let mut ligands: Vec<Ligand> = self.ligands().into_iter().cloned().collect();
        ligands.sort();
        ligands.dedup();
        ligands
    }

    /// Ligand amount range over real reactions: (min, max, unit).
    /// Mixed amount units across the campaign are an error.
    pub fn amount_range(&self) -> Result<(f64, f64, String)> {
        let mut amounts = Vec::new();
        let mut units = Vec::new();
        for r in self.real() {
            let ls = r
                .ligand_solution
                .as_ref()
                .with_context(|| format!("{}: real reaction without ligand solution", r.identifier))?;
            amounts.push(ls.amount());
            units.push(ls.amount_unit());
        }
        if amounts.is_empty() {
            bail!("no real reactions: amount range undefined");
        }
        units.dedup();
        if units.len() != 1 {
            bail!("mixed amount units in reaction set: {units:?}");
        }
        let min = amounts.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Ok((min, max, units.remove(0)))
    }

    /// Geometric grid of `n` amounts spanning the campaign's amount range.
    pub fn amount_geo_space(&self, n: usize) -> Result<Vec<f64>> {
        let (lo, hi, _) = self.amount_range()?;
        geo_space(lo, hi, n)
    }

    /// Extract training rows for the given figure-of-merit property.
    ///
    /// When a real reaction has nanocrystal references on its plate carrying
    /// the same property, the fom is normalized by their mean; otherwise the
    /// raw value is used.
    pub fn training_rows(&self, fom_key: &str) -> Result<Vec<TrainingRow>> {
        let mut rows = Vec::new();
        for r in self.real() {
            let ls = r
                .ligand_solution
                .as_ref()
                .with_context(|| format!("{}: real reaction without ligand solution", r.identifier))?;
            let value = r
                .properties
                .get(fom_key)
                .and_then(PropertyValue::as_f64)
                .with_context(|| {
                    format!("{}: missing numeric property {fom_key:?}", r.identifier)
                })?;

            let ref_values: Vec<f64> = self
                .references_for(r)
                .iter()
                .filter_map(|refr| refr.properties.get(fom_key).and_then(PropertyValue::as_f64))
                .collect();
            let fom = if ref_values.is_empty() {
                value
            } else {
                let ref_mean = ref_values.iter().sum::<f64>() / ref_values.len() as f64;
                if ref_mean.abs() < f64::EPSILON {
                    bail!("{}: reference mean for {fom_key:?} is zero", r.identifier);
                }
                value / ref_mean
            };

            rows.push(TrainingRow {
                ligand: ls.ligand.clone(),
                amount: ls.amount(),
                fom,
            });
        }
        if rows.is_empty() {
            bail!("no real reactions with property {fom_key:?}");
        }
        Ok(rows)
    }

    /// Concatenate several sets (e.g. successive learning rounds).
    pub fn merge(sets: Vec<ReactionSet>) -> ReactionSet {
        let mut reactions = Vec::new();
        for mut set in sets {
            reactions.append(&mut set.reactions);
        }
        ReactionSet::new(reactions)
    }
}
