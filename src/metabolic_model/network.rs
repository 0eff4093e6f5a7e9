//! General representation of a network of stoichiometric reactions
//!
//! The evolution of a reaction network over time is determined by its
//! stoichiometric matrix, with molecules as the rows and reactions as the
//! columns. Biochemical networks are sparse: a reaction rarely involves more
//! than a few molecules, so the total number of nonzero coefficients grows
//! roughly linearly with the network size. The matrix is therefore assembled
//! in COO form and cached as a [`CscMatrix`].

use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};
use log::trace;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::convert::serial::convert_csc_dense;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::metabolic_model::molecule::Molecule;
use crate::metabolic_model::reaction::Reaction;

/// An insertion-ordered, bidirectional mapping between entities and dense
/// vector positions
///
/// An `EntityIndex` behaves as a list with set semantics: any entity appears
/// at most once and therefore has a unique numerical position, which is stable
/// for the lifetime of the index. It is used to move back and forth between
/// packed numeric vectors and the semantic entities represented at each
/// position.
///
/// Not thread-safe; a single writer is expected during network construction.
#[derive(Debug, Clone)]
pub struct EntityIndex<E>
where
    E: Clone + Eq + Hash,
{
    items: IndexSet<E>,
}

impl<E> Default for EntityIndex<E>
where
    E: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EntityIndex<E>
where
    E: Clone + Eq + Hash,
{
    /// Create an empty index
    pub fn new() -> Self {
        EntityIndex {
            items: IndexSet::new(),
        }
    }

    /// Create an index pre-populated from a collection of entities
    pub fn from_items(items: impl IntoIterator<Item = E>) -> Self {
        let mut index = Self::new();
        index.update(items);
        index
    }

    /// Add an entity at the next free position
    ///
    /// A no-op for entities already present, per set semantics. Returns true
    /// if the entity was newly added.
    pub fn add(&mut self, item: E) -> bool {
        self.items.insert(item)
    }

    /// Add a collection of entities, in iteration order
    pub fn update(&mut self, items: impl IntoIterator<Item = E>) {
        for item in items {
            self.add(item);
        }
    }

    /// The numerical position of an entity, or None if not present
    pub fn index_of(&self, item: &E) -> Option<usize> {
        self.items.get_index_of(item)
    }

    /// The entity at a numerical position, or None if out of range
    pub fn item_at(&self, position: usize) -> Option<&E> {
        self.items.get_index(position)
    }

    /// Constant-time containment test
    pub fn contains(&self, item: &E) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate through the entities in position order
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.items.iter()
    }

    /// Convert an `{entity: value}` mapping to a dense vector aligned to this
    /// index
    ///
    /// Entities missing from the mapping take the given default; entities in
    /// the mapping but not in the index are ignored.
    pub fn pack(&self, data: &IndexMap<E, f64>, default: f64) -> DVector<f64> {
        DVector::from_iterator(
            self.items.len(),
            self.items
                .iter()
                .map(|item| data.get(item).copied().unwrap_or(default)),
        )
    }

    /// Convert a dense vector of values to an `{entity: value}` mapping
    ///
    /// The exact inverse of [`pack`](Self::pack) for all entities present in
    /// the index.
    pub fn unpack(&self, values: &DVector<f64>) -> IndexMap<E, f64> {
        self.items
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect()
    }
}

/// A network of stoichiometric reactions
///
/// Serves two main functions:
/// - Constructs a sparse matrix of stoichiometric coefficients for each
///   molecule (row) in each reaction (column).
/// - Maps between the numerically indexed rows and columns of this matrix and
///   the semantic [`Molecule`]s and [`Reaction`]s they correspond to.
///
/// The network is mutable only during construction. Once objectives or an
/// [`FbaProblem`](crate::optimize::problem::FbaProblem) have captured index
/// positions, adding further reactions invalidates those positions and is a
/// caller error.
#[derive(Debug, Clone, Default)]
pub struct ReactionNetwork {
    /// Index assigning a column to each reaction
    pub reactions: EntityIndex<Reaction>,
    /// Index assigning a row to each molecule
    pub molecules: EntityIndex<Molecule>,
    /// Cached stoichiometric matrix; None when stale
    s_matrix: Option<CscMatrix<f64>>,
}

impl ReactionNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        ReactionNetwork {
            reactions: EntityIndex::new(),
            molecules: EntityIndex::new(),
            s_matrix: None,
        }
    }

    /// Create a network from a collection of reactions
    pub fn from_reactions(reactions: impl IntoIterator<Item = Reaction>) -> Self {
        let mut network = Self::new();
        for reaction in reactions {
            network.add_reaction(reaction);
        }
        network
    }

    /// Add a reaction to the network
    ///
    /// Registers the reaction in the reaction index and every molecule of its
    /// stoichiometry in the molecule index, in stoichiometry insertion order.
    /// Adding a reaction already present (by id) is a no-op and never
    /// duplicates a column. Invalidates the cached stoichiometric matrix.
    pub fn add_reaction(&mut self, reaction: Reaction) {
        self.molecules.update(reaction.stoichiometry.keys().cloned());
        self.reactions.add(reaction);
        self.s_matrix = None;
    }

    /// The stoichiometric matrix of the network, (#molecules x #reactions)
    ///
    /// Rebuilt lazily, in O(total nonzero stoichiometry entries), when stale.
    pub fn s_matrix(&mut self) -> &CscMatrix<f64> {
        if self.s_matrix.is_none() {
            let (rows, cols) = self.shape();
            trace!("rebuilding stoichiometric matrix ({} x {})", rows, cols);
            let mut coo = CooMatrix::new(rows, cols);
            for (column, reaction) in self.reactions.iter().enumerate() {
                for (molecule, &coefficient) in &reaction.stoichiometry {
                    if let Some(row) = self.molecules.index_of(molecule) {
                        coo.push(row, column, coefficient);
                    }
                }
            }
            self.s_matrix = Some(CscMatrix::from(&coo));
        }
        self.s_matrix
            .as_ref()
            .expect("stoichiometric matrix was just rebuilt")
    }

    /// A dense copy of the stoichiometric matrix
    pub fn dense_s_matrix(&mut self) -> DMatrix<f64> {
        convert_csc_dense(self.s_matrix())
    }

    /// The 2D shape of the network, (#molecules, #reactions)
    pub fn shape(&self) -> (usize, usize) {
        (self.molecules.len(), self.reactions.len())
    }
}
