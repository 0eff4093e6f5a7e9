//! This module provides a struct for representing stoichiometric reactions

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use derive_builder::Builder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::metabolic_model::molecule::Molecule;

/// A process transforming one set of molecules into another set of molecules
/// in defined proportions
///
/// Two reactions are considered equal iff their ids match. Stoichiometry
/// iteration follows insertion order, which fixes the order in which a
/// [`ReactionNetwork`](crate::metabolic_model::network::ReactionNetwork)
/// registers the participating molecules.
#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    /// Used to identify the reaction (must be unique)
    #[builder(setter(into))]
    pub id: String,
    /// Molecule stoichiometry of the reaction; substrates have negative
    /// coefficients, products positive
    #[builder(default = "IndexMap::new()")]
    pub stoichiometry: IndexMap<Molecule, f64>,
    /// Whether the reaction may carry negative flux
    #[builder(default = "true")]
    pub reversible: bool,
    /// Human-readable reaction name
    #[builder(default = "None")]
    pub name: Option<String>,
    /// A single molecule (possibly a complex) catalyzing this reaction,
    /// neither consumed nor produced
    #[builder(default = "None")]
    pub catalyst: Option<Molecule>,
    /// Reaction subsystem
    #[builder(default = "None")]
    pub subsystem: Option<String>,
}

impl Reaction {
    /// Create a reaction from its id, stoichiometry, and reversibility
    ///
    /// # Examples
    /// ```rust
    /// use fluxgd::metabolic_model::molecule::Molecule;
    /// use fluxgd::metabolic_model::reaction::Reaction;
    /// let rxn = Reaction::new(
    ///     "pgi",
    ///     [(Molecule::new("g6p"), -1.0), (Molecule::new("f6p"), 1.0)],
    ///     true,
    /// );
    /// assert_eq!(rxn.formula(), "g6p <=> f6p");
    /// ```
    pub fn new(
        id: &str,
        stoichiometry: impl IntoIterator<Item = (Molecule, f64)>,
        reversible: bool,
    ) -> Self {
        Reaction {
            id: id.to_string(),
            stoichiometry: stoichiometry.into_iter().collect(),
            reversible,
            name: None,
            catalyst: None,
            subsystem: None,
        }
    }

    /// Human-readable compact summary of the reaction
    pub fn formula(&self) -> String {
        fn term(molecule: &Molecule, count: f64) -> String {
            if count == 1.0 {
                molecule.label().to_string()
            } else {
                format!("{} {}", count, molecule.label())
            }
        }

        let lhs: Vec<String> = self
            .stoichiometry
            .iter()
            .filter(|(_, &count)| count < 0.0)
            .map(|(molecule, &count)| term(molecule, -count))
            .collect();
        let rhs: Vec<String> = self
            .stoichiometry
            .iter()
            .filter(|(_, &count)| count > 0.0)
            .map(|(molecule, &count)| term(molecule, count))
            .collect();
        let arrow = if self.reversible { " <=> " } else { " => " };

        format!("{}{}{}", lhs.join(" + "), arrow, rhs.join(" + "))
    }
}

impl PartialEq for Reaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Reaction {}

impl Hash for Reaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state); // Hash by id, consistent with equality
    }
}

impl Display for Reaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.id, self.formula())
    }
}
