use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PropertyValue – a single cell attached to a ligand or reaction
// ---------------------------------------------------------------------------

/// A dynamically-typed property value mirroring the cell types that show up
/// in inventory and descriptor tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{s}"),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Float(v) => write!(f, "{v:.4}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Null => write!(f, ""),
        }
    }
}

impl PropertyValue {
    /// Try to interpret the value as an `f64` for numeric use.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Parse a raw CSV cell into the most specific type that fits.
    pub fn guess(s: &str) -> PropertyValue {
        let s = s.trim();
        if s.is_empty() {
            return PropertyValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return PropertyValue::Integer(i);
        }
        if let Ok(v) = s.parse::<f64>() {
            return PropertyValue::Float(v);
        }
        match s.to_ascii_lowercase().as_str() {
            "true" => PropertyValue::Bool(true),
            "false" => PropertyValue::Bool(false),
            _ => PropertyValue::String(s.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Ligand – one row of the inventory
// ---------------------------------------------------------------------------

/// A candidate ligand. Identity is the InChI string; everything else is
/// bookkeeping (human names, the inventory label, descriptor properties).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ligand {
    /// Canonical InChI. The sole identity field.
    pub inchi: String,
    /// SMILES as given by the inventory (may be empty).
    pub smiles: String,
    /// Common / supplier name.
    pub name: String,
    /// IUPAC name.
    pub iupac_name: String,
    /// Integer inventory label, when assigned.
    pub label: Option<u32>,
    /// Dynamic columns: descriptors, cas_number, etc.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl PartialEq for Ligand {
    fn eq(&self, other: &Self) -> bool {
        self.inchi == other.inchi
    }
}

impl Eq for Ligand {}

impl std::hash::Hash for Ligand {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inchi.hash(state);
    }
}

impl PartialOrd for Ligand {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ligand {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.identifier().cmp(&other.identifier())
    }
}

impl fmt::Display for Ligand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier(), self.name)
    }
}

impl Ligand {
    pub fn new(inchi: impl Into<String>) -> Self {
        Ligand {
            inchi: inchi.into().trim().to_string(),
            smiles: String::new(),
            name: "unknown".to_string(),
            iupac_name: "unknown".to_string(),
            label: None,
            properties: BTreeMap::new(),
        }
    }

    /// Stable identifier: the zero-padded label when assigned, otherwise
    /// the InChI itself.
    pub fn identifier(&self) -> String {
        match self.label {
            Some(label) => format!("LIG-{label:07}"),
            None => self.inchi.clone(),
        }
    }

    /// Numeric property lookup (descriptors, complexity, ...).
    pub fn numeric_property(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(PropertyValue::as_f64)
    }
}

/// Find a ligand by InChI; an unknown key is an error naming it.
pub fn ligand_by_inchi<'a>(inchi: &str, inventory: &'a [Ligand]) -> Result<&'a Ligand> {
    inventory
        .iter()
        .find(|l| l.inchi == inchi)
        .with_context(|| format!("ligand InChI {inchi:?} not in inventory"))
}

/// Find a ligand by its common name.
pub fn ligand_by_name<'a>(name: &str, inventory: &'a [Ligand]) -> Result<&'a Ligand> {
    inventory
        .iter()
        .find(|l| l.name == name)
        .with_context(|| format!("ligand name {name:?} not in inventory"))
}

/// Find a ligand by its inventory label.
pub fn ligand_by_label(label: u32, inventory: &[Ligand]) -> Result<&Ligand> {
    inventory
        .iter()
        .find(|l| l.label == Some(label))
        .with_context(|| format!("ligand label {label} not in inventory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lig(inchi: &str, label: u32) -> Ligand {
        Ligand {
            label: Some(label),
            ..Ligand::new(inchi)
        }
    }

    #[test]
    fn identity_is_inchi_only() {
        let a = lig("InChI=1S/CH4/h1H4", 1);
        let mut b = lig("InChI=1S/CH4/h1H4", 9);
        b.name = "methane".to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn identifier_pads_label() {
        assert_eq!(lig("InChI=1S/CH4/h1H4", 12).identifier(), "LIG-0000012");
        assert_eq!(Ligand::new("InChI=1S/CH4/h1H4").identifier(), "InChI=1S/CH4/h1H4");
    }

    #[test]
    fn lookups_name_the_missing_key() {
        let mut a = lig("InChI=1S/CH4/h1H4", 1);
        a.name = "methane".to_string();
        let inv = vec![a, lig("InChI=1S/H2O/h1H2", 2)];
        assert!(ligand_by_name("methane", &inv).is_ok());
        assert!(
            ligand_by_name("ethane", &inv)
                .unwrap_err()
                .to_string()
                .contains("ethane")
        );
        assert_eq!(ligand_by_label(2, &inv).unwrap().label, Some(2));
        assert!(ligand_by_label(9, &inv).unwrap_err().to_string().contains('9'));
        assert!(ligand_by_inchi("InChI=1S/H2O/h1H2", &inv).is_ok());
        assert!(ligand_by_inchi("InChI=1S/zzz", &inv).is_err());
    }

    #[test]
    fn property_value_guessing() {
        assert_eq!(PropertyValue::guess("42"), PropertyValue::Integer(42));
        assert_eq!(PropertyValue::guess("4.5"), PropertyValue::Float(4.5));
        assert_eq!(PropertyValue::guess(""), PropertyValue::Null);
        assert_eq!(PropertyValue::guess("true"), PropertyValue::Bool(true));
        assert_eq!(
            PropertyValue::guess("7732-18-5"),
            PropertyValue::String("7732-18-5".to_string())
        );
    }
}
