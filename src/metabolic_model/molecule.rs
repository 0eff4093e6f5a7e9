//! This module provides the molecule struct representing a molecule in a
//! reaction network

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Represents a molecule, or molecule-like entity, that may participate in
/// reactions
///
/// Two molecules are considered equal iff their ids match; all other
/// attributes are descriptive only.
#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
pub struct Molecule {
    /// Used to identify the molecule (must be unique)
    #[builder(setter(into))]
    pub id: String,
    /// Human readable name of the molecule
    #[builder(default = "None")]
    pub name: Option<String>,
    /// Chemical formula of the molecule
    #[builder(default = "None")]
    pub formula: Option<String>,
    /// Mass of one molecule, in daltons
    #[builder(default = "None")]
    pub mass: Option<f64>,
    /// Electrical charge of the molecule
    #[builder(default = "None")]
    pub charge: Option<i32>,
    /// Which compartment the molecule is in
    #[builder(default = "None")]
    pub compartment: Option<String>,
}

impl Molecule {
    /// Create a molecule identified by id alone
    ///
    /// # Examples
    /// ```rust
    /// use fluxgd::metabolic_model::molecule::Molecule;
    /// let atp = Molecule::new("atp");
    /// assert_eq!(atp.label(), "atp");
    /// ```
    pub fn new(id: &str) -> Self {
        Molecule {
            id: id.to_string(),
            name: None,
            formula: None,
            mass: None,
            charge: None,
            compartment: None,
        }
    }

    /// Terse label for the molecule, suitable for formulas and diagrams
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl PartialEq for Molecule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Molecule {}

impl Hash for Molecule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state); // Hash by id, consistent with equality
    }
}

impl Display for Molecule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_id() {
        let plain = Molecule::new("glc");
        let annotated = MoleculeBuilder::default()
            .id("glc")
            .name(Some("D-glucose".to_string()))
            .formula(Some("C6H12O6".to_string()))
            .build()
            .unwrap();
        assert_eq!(plain, annotated);
        assert_ne!(plain, Molecule::new("g6p"));
    }

    #[test]
    fn label_prefers_name() {
        let mut glc = Molecule::new("glc");
        assert_eq!(glc.label(), "glc");
        glc.name = Some("D-glucose".to_string());
        assert_eq!(glc.label(), "D-glucose");
    }
}
