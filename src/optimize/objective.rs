//! Pluggable objective components of a flux optimization problem
//!
//! Each objective monitors a fixed subset of the network's reactions or
//! molecules, captured as index positions at construction, and produces a
//! fixed-length residual vector to be driven toward zero. Targets and bounds
//! are the only mutable state; updating them never changes the shape of the
//! residual. The shortfall/excess formulation used by the target objectives is
//! exactly zero inside the feasible band and grows linearly outside it, so the
//! concatenated residual stays differentiable almost everywhere and needs no
//! branch logic in the solver.

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::metabolic_model::molecule::Molecule;
use crate::metabolic_model::network::ReactionNetwork;
use crate::metabolic_model::reaction::Reaction;

/// A target value or range for a single monitored molecule or reaction
///
/// `Exact(v)` is equivalent to `Range(Some(v), Some(v))`. A missing side of a
/// range means that side is unconstrained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    /// A specific target value
    Exact(f64),
    /// A range of equally acceptable values, as (lower, upper)
    Range(Option<f64>, Option<f64>),
}

impl Target {
    /// Resolve the target to concrete (lower, upper) bounds
    fn bounds(self) -> Result<(f64, f64), ObjectiveError> {
        let (lower, upper) = match self {
            Target::Exact(value) => (value, value),
            Target::Range(lower, upper) => (
                lower.unwrap_or(f64::NEG_INFINITY),
                upper.unwrap_or(f64::INFINITY),
            ),
        };
        if lower > upper {
            return Err(ObjectiveError::InvertedTargetRange { lower, upper });
        }
        Ok((lower, upper))
    }
}

/// Lower and upper bound arrays for a set of targeted entities
///
/// The arrays always have the length of the monitored subset; an entity with
/// no active target holds the unconstrained bounds (-inf, +inf).
#[derive(Debug, Clone)]
struct TargetBand {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl TargetBand {
    fn unconstrained(len: usize) -> Self {
        TargetBand {
            lower: DVector::from_element(len, f64::NEG_INFINITY),
            upper: DVector::from_element(len, f64::INFINITY),
        }
    }

    /// Set or clear the bounds of one monitored slot
    fn set(&mut self, slot: usize, target: Option<Target>) -> Result<(), ObjectiveError> {
        let (lower, upper) = match target {
            Some(target) => target.bounds()?,
            None => (f64::NEG_INFINITY, f64::INFINITY),
        };
        self.lower[slot] = lower;
        self.upper[slot] = upper;
        Ok(())
    }

    /// Shortfall below the lower bound (non-positive) plus excess above the
    /// upper bound (non-negative); exactly zero inside the band
    fn residual(&self, values: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            values.len(),
            values.iter().enumerate().map(|(slot, &value)| {
                (value - self.lower[slot]).min(0.0) + (value - self.upper[slot]).max(0.0)
            }),
        )
    }

    /// Derivative of the residual with respect to the monitored value: 1.0
    /// outside the band, 0.0 inside or on the boundary
    fn gate(&self, values: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            values.len(),
            values.iter().enumerate().map(|(slot, &value)| {
                if value < self.lower[slot] || value > self.upper[slot] {
                    1.0
                } else {
                    0.0
                }
            }),
        )
    }
}

/// Penalizes any non-zero dM/dt for specified intermediate molecules
///
/// The target is always exactly zero and is not adjustable.
#[derive(Debug, Clone)]
pub struct SteadyStateObjective {
    indices: Vec<usize>,
    weight: f64,
}

impl SteadyStateObjective {
    /// Create a steady-state objective over the given intermediates
    ///
    /// Fails if any intermediate is not part of the network.
    pub fn new(
        network: &ReactionNetwork,
        intermediates: &[Molecule],
    ) -> Result<Self, ObjectiveError> {
        let indices = intermediates
            .iter()
            .map(|molecule| {
                network
                    .molecules
                    .index_of(molecule)
                    .ok_or_else(|| ObjectiveError::UnknownMolecule(molecule.id.clone()))
            })
            .collect::<Result<Vec<usize>, ObjectiveError>>()?;
        Ok(SteadyStateObjective {
            indices,
            weight: 1.0,
        })
    }

    /// Set the weight applied to this objective's residual
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn residual(&self, dmdt: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.indices.len(), self.indices.iter().map(|&i| dmdt[i]))
    }

    fn jacobian(&self, s_matrix: &DMatrix<f64>) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.indices.len(), s_matrix.ncols());
        for (slot, &row) in self.indices.iter().enumerate() {
            jacobian.row_mut(slot).copy_from(&s_matrix.row(row));
        }
        jacobian
    }
}

/// Penalizes negative flux through reactions flagged non-reversible
#[derive(Debug, Clone)]
pub struct IrreversibilityObjective {
    indices: Vec<usize>,
    weight: f64,
}

impl IrreversibilityObjective {
    /// Create an irreversibility objective over every non-reversible reaction
    /// in the network
    pub fn new(network: &ReactionNetwork) -> Self {
        let indices = network
            .reactions
            .iter()
            .enumerate()
            .filter(|(_, reaction)| !reaction.reversible)
            .map(|(i, _)| i)
            .collect();
        IrreversibilityObjective {
            indices,
            weight: 1.0,
        }
    }

    /// Set the weight applied to this objective's residual
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn residual(&self, velocities: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.indices.len(),
            self.indices.iter().map(|&i| velocities[i].min(0.0)),
        )
    }

    fn jacobian(&self, velocities: &DVector<f64>) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.indices.len(), velocities.len());
        for (slot, &column) in self.indices.iter().enumerate() {
            if velocities[column] < 0.0 {
                jacobian[(slot, column)] = 1.0;
            }
        }
        jacobian
    }
}

/// Penalizes deviation of dM/dt from a target value or range, for select
/// molecules
///
/// The target for any monitored molecule can be changed via
/// [`update_targets`](Self::update_targets), but the set of monitored
/// molecules is fixed at construction.
#[derive(Debug, Clone)]
pub struct ProductionObjective {
    molecules: Vec<Molecule>,
    indices: Vec<usize>,
    band: TargetBand,
    weight: f64,
}

impl ProductionObjective {
    /// Create a production objective from `{molecule: target}` entries
    ///
    /// Fails if any targeted molecule is not part of the network, or a target
    /// range is inverted.
    pub fn new(
        network: &ReactionNetwork,
        targets: &IndexMap<Molecule, Target>,
    ) -> Result<Self, ObjectiveError> {
        let molecules: Vec<Molecule> = targets.keys().cloned().collect();
        let indices = molecules
            .iter()
            .map(|molecule| {
                network
                    .molecules
                    .index_of(molecule)
                    .ok_or_else(|| ObjectiveError::UnknownMolecule(molecule.id.clone()))
            })
            .collect::<Result<Vec<usize>, ObjectiveError>>()?;
        let mut band = TargetBand::unconstrained(indices.len());
        for (slot, target) in targets.values().enumerate() {
            band.set(slot, Some(*target))?;
        }
        Ok(ProductionObjective {
            molecules,
            indices,
            band,
            weight: 1.0,
        })
    }

    /// Set the weight applied to this objective's residual
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Update some or all target dM/dt values
    ///
    /// `None` clears the entity's target back to unconstrained. Referencing a
    /// molecule outside the monitored set is rejected.
    pub fn update_targets(
        &mut self,
        updates: &IndexMap<Molecule, Option<Target>>,
    ) -> Result<(), ObjectiveError> {
        for (molecule, target) in updates {
            let slot = self
                .molecules
                .iter()
                .position(|m| m == molecule)
                .ok_or_else(|| ObjectiveError::UntrackedEntity(molecule.id.clone()))?;
            self.band.set(slot, *target)?;
        }
        Ok(())
    }

    /// The current (lower, upper) bounds for each monitored molecule, in
    /// monitored order
    pub fn current_targets(&self) -> Vec<(Molecule, f64, f64)> {
        self.molecules
            .iter()
            .enumerate()
            .map(|(slot, molecule)| {
                (molecule.clone(), self.band.lower[slot], self.band.upper[slot])
            })
            .collect()
    }

    fn monitored(&self, dmdt: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.indices.len(), self.indices.iter().map(|&i| dmdt[i]))
    }

    fn residual(&self, dmdt: &DVector<f64>) -> DVector<f64> {
        self.band.residual(&self.monitored(dmdt))
    }

    fn jacobian(&self, dmdt: &DVector<f64>, s_matrix: &DMatrix<f64>) -> DMatrix<f64> {
        let gate = self.band.gate(&self.monitored(dmdt));
        let mut jacobian = DMatrix::zeros(self.indices.len(), s_matrix.ncols());
        for (slot, &row) in self.indices.iter().enumerate() {
            if gate[slot] != 0.0 {
                jacobian.row_mut(slot).copy_from(&s_matrix.row(row));
            }
        }
        jacobian
    }
}

/// Penalizes deviation of flux from a target value or range, for select
/// reactions
///
/// Identical shortfall/excess semantics to [`ProductionObjective`], applied to
/// reaction flux values instead of molecule rates.
#[derive(Debug, Clone)]
pub struct VelocityObjective {
    reactions: Vec<Reaction>,
    indices: Vec<usize>,
    band: TargetBand,
    weight: f64,
}

impl VelocityObjective {
    /// Create a velocity objective from `{reaction: target}` entries
    ///
    /// Fails if any targeted reaction is not part of the network, or a target
    /// range is inverted.
    pub fn new(
        network: &ReactionNetwork,
        targets: &IndexMap<Reaction, Target>,
    ) -> Result<Self, ObjectiveError> {
        let reactions: Vec<Reaction> = targets.keys().cloned().collect();
        let indices = reactions
            .iter()
            .map(|reaction| {
                network
                    .reactions
                    .index_of(reaction)
                    .ok_or_else(|| ObjectiveError::UnknownReaction(reaction.id.clone()))
            })
            .collect::<Result<Vec<usize>, ObjectiveError>>()?;
        let mut band = TargetBand::unconstrained(indices.len());
        for (slot, target) in targets.values().enumerate() {
            band.set(slot, Some(*target))?;
        }
        Ok(VelocityObjective {
            reactions,
            indices,
            band,
            weight: 1.0,
        })
    }

    /// Set the weight applied to this objective's residual
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Update some or all target flux values
    ///
    /// `None` clears the entity's target back to unconstrained. Referencing a
    /// reaction outside the monitored set is rejected.
    pub fn update_targets(
        &mut self,
        updates: &IndexMap<Reaction, Option<Target>>,
    ) -> Result<(), ObjectiveError> {
        for (reaction, target) in updates {
            let slot = self
                .reactions
                .iter()
                .position(|r| r == reaction)
                .ok_or_else(|| ObjectiveError::UntrackedEntity(reaction.id.clone()))?;
            self.band.set(slot, *target)?;
        }
        Ok(())
    }

    /// The current (lower, upper) bounds for each monitored reaction, in
    /// monitored order
    pub fn current_targets(&self) -> Vec<(Reaction, f64, f64)> {
        self.reactions
            .iter()
            .enumerate()
            .map(|(slot, reaction)| {
                (reaction.clone(), self.band.lower[slot], self.band.upper[slot])
            })
            .collect()
    }

    fn monitored(&self, velocities: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.indices.len(),
            self.indices.iter().map(|&i| velocities[i]),
        )
    }

    fn residual(&self, velocities: &DVector<f64>) -> DVector<f64> {
        self.band.residual(&self.monitored(velocities))
    }

    fn jacobian(&self, velocities: &DVector<f64>) -> DMatrix<f64> {
        let gate = self.band.gate(&self.monitored(velocities));
        let mut jacobian = DMatrix::zeros(self.indices.len(), velocities.len());
        for (slot, &column) in self.indices.iter().enumerate() {
            jacobian[(slot, column)] = gate[slot];
        }
        jacobian
    }
}

/// Incentivizes mutually exclusive fluxes within a set of reactions, e.g. the
/// forward and back legs of a futile cycle
///
/// The residual is the product of the monitored fluxes, driven toward zero so
/// that at most one carries substantial flux at the optimum.
#[derive(Debug, Clone)]
pub struct ExclusionObjective {
    indices: Vec<usize>,
    weight: f64,
}

impl ExclusionObjective {
    /// Create an exclusion objective over the given reactions
    ///
    /// Fails if any reaction is not part of the network.
    pub fn new(network: &ReactionNetwork, reactions: &[Reaction]) -> Result<Self, ObjectiveError> {
        let indices = reactions
            .iter()
            .map(|reaction| {
                network
                    .reactions
                    .index_of(reaction)
                    .ok_or_else(|| ObjectiveError::UnknownReaction(reaction.id.clone()))
            })
            .collect::<Result<Vec<usize>, ObjectiveError>>()?;
        Ok(ExclusionObjective {
            indices,
            weight: 1.0,
        })
    }

    /// Set the weight applied to this objective's residual
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn residual(&self, velocities: &DVector<f64>) -> DVector<f64> {
        let product: f64 = self.indices.iter().map(|&i| velocities[i]).product();
        DVector::from_element(1, product)
    }

    fn jacobian(&self, velocities: &DVector<f64>) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(1, velocities.len());
        for (slot, &column) in self.indices.iter().enumerate() {
            let mut partial = 1.0;
            for (other_slot, &other) in self.indices.iter().enumerate() {
                if other_slot != slot {
                    partial *= velocities[other];
                }
            }
            jacobian[(0, column)] += partial;
        }
        jacobian
    }
}

/// A component of a flux optimization objective
///
/// The optimization engine only ever calls through the common residual and
/// Jacobian capability; it never inspects the concrete kind.
#[derive(Debug, Clone)]
pub enum FluxObjective {
    /// Hold intermediate molecules at steady state (see [`SteadyStateObjective`])
    SteadyState(SteadyStateObjective),
    /// Keep flux through non-reversible reactions non-negative (see
    /// [`IrreversibilityObjective`])
    Irreversibility(IrreversibilityObjective),
    /// Drive molecule dM/dt values toward targets (see [`ProductionObjective`])
    Production(ProductionObjective),
    /// Drive reaction fluxes toward targets (see [`VelocityObjective`])
    Velocity(VelocityObjective),
    /// Suppress simultaneous flux through a reaction set (see
    /// [`ExclusionObjective`])
    Exclusion(ExclusionObjective),
}

impl FluxObjective {
    /// The raw (unweighted) residual vector for the given flux and dM/dt
    /// vectors
    pub(crate) fn residual(
        &self,
        velocities: &DVector<f64>,
        dmdt: &DVector<f64>,
    ) -> DVector<f64> {
        match self {
            FluxObjective::SteadyState(objective) => objective.residual(dmdt),
            FluxObjective::Irreversibility(objective) => objective.residual(velocities),
            FluxObjective::Production(objective) => objective.residual(dmdt),
            FluxObjective::Velocity(objective) => objective.residual(velocities),
            FluxObjective::Exclusion(objective) => objective.residual(velocities),
        }
    }

    /// The derivative of the raw residual with respect to the flux vector,
    /// shape (residual_len x #reactions)
    pub(crate) fn jacobian(
        &self,
        velocities: &DVector<f64>,
        dmdt: &DVector<f64>,
        s_matrix: &DMatrix<f64>,
    ) -> DMatrix<f64> {
        match self {
            FluxObjective::SteadyState(objective) => objective.jacobian(s_matrix),
            FluxObjective::Irreversibility(objective) => objective.jacobian(velocities),
            FluxObjective::Production(objective) => objective.jacobian(dmdt, s_matrix),
            FluxObjective::Velocity(objective) => objective.jacobian(velocities),
            FluxObjective::Exclusion(objective) => objective.jacobian(velocities),
        }
    }

    /// Length of the residual vector this objective contributes
    pub fn residual_len(&self) -> usize {
        match self {
            FluxObjective::SteadyState(objective) => objective.indices.len(),
            FluxObjective::Irreversibility(objective) => objective.indices.len(),
            FluxObjective::Production(objective) => objective.indices.len(),
            FluxObjective::Velocity(objective) => objective.indices.len(),
            FluxObjective::Exclusion(_) => 1,
        }
    }

    /// Weight applied to this objective's residual block
    pub fn weight(&self) -> f64 {
        match self {
            FluxObjective::SteadyState(objective) => objective.weight,
            FluxObjective::Irreversibility(objective) => objective.weight,
            FluxObjective::Production(objective) => objective.weight,
            FluxObjective::Velocity(objective) => objective.weight,
            FluxObjective::Exclusion(objective) => objective.weight,
        }
    }
}

impl From<SteadyStateObjective> for FluxObjective {
    fn from(objective: SteadyStateObjective) -> Self {
        FluxObjective::SteadyState(objective)
    }
}

impl From<IrreversibilityObjective> for FluxObjective {
    fn from(objective: IrreversibilityObjective) -> Self {
        FluxObjective::Irreversibility(objective)
    }
}

impl From<ProductionObjective> for FluxObjective {
    fn from(objective: ProductionObjective) -> Self {
        FluxObjective::Production(objective)
    }
}

impl From<VelocityObjective> for FluxObjective {
    fn from(objective: VelocityObjective) -> Self {
        FluxObjective::Velocity(objective)
    }
}

impl From<ExclusionObjective> for FluxObjective {
    fn from(objective: ExclusionObjective) -> Self {
        FluxObjective::Exclusion(objective)
    }
}

/// Errors raised while constructing or updating objectives
#[derive(Error, Debug, Clone)]
pub enum ObjectiveError {
    /// An objective referenced a molecule absent from the network
    #[error("molecule '{0}' is not part of the reaction network")]
    UnknownMolecule(String),
    /// An objective referenced a reaction absent from the network
    #[error("reaction '{0}' is not part of the reaction network")]
    UnknownReaction(String),
    /// A target update referenced an entity outside the monitored set
    #[error("entity '{0}' is not monitored by this objective")]
    UntrackedEntity(String),
    /// A target range had its bounds reversed
    #[error("target range has lower bound {lower} greater than upper bound {upper}")]
    InvertedTargetRange { lower: f64, upper: f64 },
}
