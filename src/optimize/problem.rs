//! Defines and solves a flux balance analysis problem via gradient descent
//!
//! A problem is specified as a set of named [`FluxObjective`] components, each
//! constraining some aspect of the solution. Every problem includes balancing
//! reaction fluxes so that pathway intermediates are at steady state, and
//! keeping flux through non-reversible reactions non-negative. The residual
//! vectors of all objectives are concatenated, in a fixed order, into one flat
//! residual minimized by a damped Levenberg-Marquardt solver using the
//! analytic Jacobian.
//!
//! Objective parameters (targets and bounds) are read by reference at every
//! evaluation, so they may be updated freely between calls to
//! [`solve`](FbaProblem::solve) without altering the problem structure.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::debug;
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use thiserror::Error;

use crate::configuration::CONFIGURATION;
use crate::metabolic_model::molecule::Molecule;
use crate::metabolic_model::network::{EntityIndex, ReactionNetwork};
use crate::metabolic_model::reaction::Reaction;
use crate::optimize::objective::{
    FluxObjective, IrreversibilityObjective, ObjectiveError, SteadyStateObjective, Target,
};
use crate::optimize::{FbaResult, SolveStatus, SolverOptions};

/// Name of the built-in steady-state objective
pub const STEADY_STATE: &str = "steady-state";
/// Name of the built-in irreversibility objective
pub const IRREVERSIBILITY: &str = "irreversibility";

/// A flux balance analysis problem solved by nonlinear least squares
///
/// Construction snapshots the network's stoichiometric matrix and entity
/// indices, after which the network must be treated as frozen: adding further
/// reactions invalidates the captured index positions.
///
/// The set and order of objectives never change after construction, so the
/// layout of the flat residual is fixed for the lifetime of the problem. A
/// single instance must not be solved and updated concurrently; independent
/// instances are fully independent.
#[derive(Debug, Clone)]
pub struct FbaProblem {
    /// All objectives, the built-in fitness objectives first, in a fixed order
    objectives: IndexMap<String, FluxObjective>,
    /// Dense snapshot of the network's stoichiometric matrix
    s_matrix: DMatrix<f64>,
    /// Snapshot of the reaction index, for unpacking flux vectors
    reactions: EntityIndex<Reaction>,
    /// Snapshot of the molecule index, for unpacking dM/dt vectors
    molecules: EntityIndex<Molecule>,
    /// Total length of the concatenated residual
    residual_len: usize,
}

impl FbaProblem {
    /// Define the FBA problem to be solved
    ///
    /// Injects the built-in `"steady-state"` objective (over the given
    /// intermediate molecules) and `"irreversibility"` objective (over all
    /// non-reversible reactions), both weighted by the configured fitness
    /// weight, then merges the caller's objectives in their given order.
    ///
    /// # Parameters
    /// - `network`: the reaction network
    /// - `intermediates`: molecules internal to the network, to be held at
    ///   steady state in any solution
    /// - `objectives`: named caller-supplied components of the overall
    ///   objective
    ///
    /// # Errors
    /// Fails fast if the network is empty, an intermediate is not part of the
    /// network, or a caller objective reuses a built-in name.
    pub fn new(
        network: &mut ReactionNetwork,
        intermediates: &[Molecule],
        objectives: IndexMap<String, FluxObjective>,
    ) -> Result<Self, FbaError> {
        if network.reactions.is_empty() {
            return Err(FbaError::EmptyNetwork);
        }
        let fitness_weight = CONFIGURATION.read().unwrap().fitness_weight;

        // The fitness objectives are universal, and always come first
        let mut all: IndexMap<String, FluxObjective> = IndexMap::new();
        all.insert(
            STEADY_STATE.to_string(),
            SteadyStateObjective::new(network, intermediates)?
                .with_weight(fitness_weight)
                .into(),
        );
        all.insert(
            IRREVERSIBILITY.to_string(),
            IrreversibilityObjective::new(network)
                .with_weight(fitness_weight)
                .into(),
        );
        for (name, objective) in objectives {
            if name == STEADY_STATE || name == IRREVERSIBILITY {
                return Err(FbaError::ReservedObjectiveName(name));
            }
            all.insert(name, objective);
        }

        let s_matrix = network.dense_s_matrix();
        let residual_len = all.values().map(FluxObjective::residual_len).sum();
        Ok(FbaProblem {
            objectives: all,
            s_matrix,
            reactions: network.reactions.clone(),
            molecules: network.molecules.clone(),
            residual_len,
        })
    }

    /// The names of all objectives, in residual concatenation order
    pub fn objective_names(&self) -> impl Iterator<Item = &str> {
        self.objectives.keys().map(String::as_str)
    }

    /// The 2D shape of the underlying network, (#molecules, #reactions)
    pub fn shape(&self) -> (usize, usize) {
        (self.s_matrix.nrows(), self.s_matrix.ncols())
    }

    /// Update the numeric parameters of named objectives
    ///
    /// Each update is forwarded to the matching component. The set and order
    /// of objectives, and each objective's monitored entity set, never change.
    ///
    /// # Errors
    /// Fails fast on an unknown objective name, an update whose kind does not
    /// match the objective, or an update referencing an untracked entity.
    pub fn update_parameters(
        &mut self,
        updates: IndexMap<String, ParameterUpdate>,
    ) -> Result<(), FbaError> {
        for (name, update) in updates {
            let objective = self
                .objectives
                .get_mut(&name)
                .ok_or_else(|| FbaError::UnknownObjective(name.clone()))?;
            match (objective, update) {
                (FluxObjective::Production(objective), ParameterUpdate::Production(targets)) => {
                    objective.update_targets(&targets)?
                }
                (FluxObjective::Velocity(objective), ParameterUpdate::Velocity(targets)) => {
                    objective.update_targets(&targets)?
                }
                _ => return Err(FbaError::ParameterKindMismatch(name)),
            }
        }
        Ok(())
    }

    /// Solve the FBA problem as currently specified
    ///
    /// # Parameters
    /// - `v0`: a flux vector used as the starting point for optimization
    /// - `seed`: random seed used to generate `v0` if none is provided;
    ///   ignored when `v0` is given. If neither is provided the seed is
    ///   derived from wall-clock time, so deterministic callers must pass one
    ///   or the other.
    /// - `options`: tolerances and iteration budget for the solver
    ///
    /// Never fails on non-convergence: the best iterate found is returned,
    /// with its fitness and termination status, for the caller to judge.
    pub fn solve(
        &self,
        v0: Option<DVector<f64>>,
        seed: Option<u64>,
        options: &SolverOptions,
    ) -> FbaResult {
        let n = self.s_matrix.ncols();
        let v0 = v0.unwrap_or_else(|| random_flux(n, seed));
        debug!(
            "solving flux problem: {} reactions, {} objectives, {} residual terms",
            n,
            self.objectives.len(),
            self.residual_len
        );

        let model = ResidualModel {
            problem: self,
            v: v0.clone(),
        };
        let solver = LevenbergMarquardt::new()
            .with_ftol(options.ftol)
            .with_xtol(options.xtol)
            .with_gtol(options.gtol)
            .with_patience(options.patience);
        let (solved, report) = solver.minimize(model);

        let velocities = solved.v;
        let dmdt = &self.s_matrix * &velocities;
        let fit = self.fitness(&velocities, &dmdt);
        let status = match report.termination {
            TerminationReason::LostPatience => SolveStatus::IterationLimit,
            reason if reason.was_successful() => SolveStatus::Converged,
            _ => SolveStatus::NumericalIssue,
        };
        debug!(
            "solver finished after {} evaluations: fit = {:.3e}, status = {:?}",
            report.number_of_evaluations, fit, status
        );

        FbaResult {
            v0,
            velocities: self.reactions.unpack(&velocities),
            dmdt: self.molecules.unpack(&dmdt),
            fit,
            status,
            evaluations: report.number_of_evaluations,
        }
    }

    /// The concatenated, weighted residual of all objectives at `v`
    fn flat_residual(&self, v: &DVector<f64>) -> DVector<f64> {
        let dmdt = &self.s_matrix * v;
        let mut flat = DVector::zeros(self.residual_len);
        let mut offset = 0;
        for objective in self.objectives.values() {
            let residual = objective.residual(v, &dmdt).scale(objective.weight());
            flat.rows_mut(offset, residual.len()).copy_from(&residual);
            offset += residual.len();
        }
        flat
    }

    /// The derivative of the flat residual with respect to `v`
    fn flat_jacobian(&self, v: &DVector<f64>) -> DMatrix<f64> {
        let dmdt = &self.s_matrix * v;
        let mut flat = DMatrix::zeros(self.residual_len, self.s_matrix.ncols());
        let mut offset = 0;
        for objective in self.objectives.values() {
            let jacobian = objective
                .jacobian(v, &dmdt, &self.s_matrix)
                .scale(objective.weight());
            flat.rows_mut(offset, jacobian.nrows()).copy_from(&jacobian);
            offset += jacobian.nrows();
        }
        flat
    }

    /// Sum of squared raw steady-state and irreversibility residuals
    ///
    /// Unweighted, so the score is comparable regardless of the configured
    /// fitness weight.
    fn fitness(&self, velocities: &DVector<f64>, dmdt: &DVector<f64>) -> f64 {
        [STEADY_STATE, IRREVERSIBILITY]
            .iter()
            .filter_map(|name| self.objectives.get(*name))
            .map(|objective| objective.residual(velocities, dmdt).norm_squared())
            .sum()
    }
}

/// Draw a random initial flux vector of i.i.d. standard normal values
fn random_flux(n: usize, seed: Option<u64>) -> DVector<f64> {
    let seed = seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    });
    let mut rng = StdRng::seed_from_u64(seed);
    DVector::from_iterator(n, (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)))
}

/// Adapter presenting an [`FbaProblem`] to the Levenberg-Marquardt solver
struct ResidualModel<'a> {
    problem: &'a FbaProblem,
    v: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ResidualModel<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, v: &DVector<f64>) {
        self.v.copy_from(v);
    }

    fn params(&self) -> DVector<f64> {
        self.v.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.problem.flat_residual(&self.v))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.problem.flat_jacobian(&self.v))
    }
}

/// A parameter update addressed to one named objective
///
/// The variant must match the kind of the addressed objective; setting an
/// entity's target to `None` clears it back to unconstrained.
#[derive(Debug, Clone)]
pub enum ParameterUpdate {
    /// New dM/dt targets for a production objective
    Production(IndexMap<Molecule, Option<Target>>),
    /// New flux targets for a velocity objective
    Velocity(IndexMap<Reaction, Option<Target>>),
}

/// Errors raised while constructing or reconfiguring an FBA problem
#[derive(Error, Debug, Clone)]
pub enum FbaError {
    /// The network contains no reactions
    #[error("cannot build a flux optimization problem over an empty network")]
    EmptyNetwork,
    /// A caller objective tried to reuse a built-in objective name
    #[error("objective name '{0}' is reserved for a built-in fitness objective")]
    ReservedObjectiveName(String),
    /// A parameter update addressed an objective that does not exist
    #[error("no objective named '{0}' in this problem")]
    UnknownObjective(String),
    /// A parameter update did not match the kind of the addressed objective
    #[error("parameter update for objective '{0}' does not match its kind")]
    ParameterKindMismatch(String),
    /// An error raised by an objective component
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::objective::{ExclusionObjective, ProductionObjective, VelocityObjective};
    use approx::assert_relative_eq;

    fn molecule(id: &str) -> Molecule {
        Molecule::new(id)
    }

    /// a -> b (irreversible), b -> c (reversible)
    fn linear_chain() -> ReactionNetwork {
        ReactionNetwork::from_reactions([
            Reaction::new("ab", [(molecule("a"), -1.0), (molecule("b"), 1.0)], false),
            Reaction::new("bc", [(molecule("b"), -1.0), (molecule("c"), 1.0)], true),
        ])
    }

    fn production_problem(target: f64) -> FbaProblem {
        let mut network = linear_chain();
        let production = ProductionObjective::new(
            &network,
            &IndexMap::from([(molecule("c"), Target::Exact(target))]),
        )
        .unwrap();
        let mut objectives = IndexMap::new();
        objectives.insert("production".to_string(), production.into());
        FbaProblem::new(&mut network, &[molecule("b")], objectives).unwrap()
    }

    #[test]
    fn end_to_end_linear_chain() {
        let problem = production_problem(1.0);
        let result = problem.solve(None, Some(42), &SolverOptions::default());

        // Both fluxes must carry the target production rate
        assert_relative_eq!(result.velocities[&Reaction::new("ab", [], false)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.velocities[&Reaction::new("bc", [], true)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.dmdt[&molecule("b")], 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.dmdt[&molecule("c")], 1.0, epsilon = 1e-6);
        assert!(result.fit < 1e-10);
        assert_eq!(result.status, SolveStatus::Converged);
    }

    #[test]
    fn resolve_is_idempotent() {
        let problem = production_problem(1.0);
        let first = problem.solve(None, Some(7), &SolverOptions::default());
        let second = problem.solve(None, Some(7), &SolverOptions::default());

        assert_eq!(first.v0, second.v0);
        for (reaction, flux) in &first.velocities {
            assert_relative_eq!(*flux, second.velocities[reaction], epsilon = 1e-12);
        }
        assert_relative_eq!(first.fit, second.fit, epsilon = 1e-12);
    }

    #[test]
    fn explicit_v0_warm_start() {
        let problem = production_problem(1.0);
        let v0 = DVector::from_vec(vec![1.0, 1.0]);
        let result = problem.solve(Some(v0.clone()), None, &SolverOptions::default());

        assert_eq!(result.v0, v0);
        assert!(result.fit < 1e-10);
        assert_relative_eq!(result.dmdt[&molecule("c")], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn update_parameters_moves_the_optimum() {
        let mut problem = production_problem(1.0);
        problem
            .update_parameters(IndexMap::from([(
                "production".to_string(),
                ParameterUpdate::Production(IndexMap::from([(
                    molecule("c"),
                    Some(Target::Exact(2.0)),
                )])),
            )]))
            .unwrap();

        let result = problem.solve(None, Some(42), &SolverOptions::default());
        assert_relative_eq!(result.dmdt[&molecule("c")], 2.0, epsilon = 1e-6);
        assert_relative_eq!(result.velocities[&Reaction::new("ab", [], false)], 2.0, epsilon = 1e-6);
        assert!(result.fit < 1e-10);
    }

    #[test]
    fn irreversibility_makes_backward_forcing_unfit() {
        // Identical single-reaction networks, differing only in reversibility
        let fitness_when = |reversible: bool| {
            let mut network = ReactionNetwork::from_reactions([Reaction::new(
                "ab",
                [(molecule("a"), -1.0), (molecule("b"), 1.0)],
                reversible,
            )]);
            let forcing = VelocityObjective::new(
                &network,
                &IndexMap::from([(
                    Reaction::new("ab", [], reversible),
                    Target::Exact(-1.0),
                )]),
            )
            .unwrap();
            let mut objectives = IndexMap::new();
            objectives.insert("forcing".to_string(), forcing.into());
            let problem = FbaProblem::new(&mut network, &[], objectives).unwrap();
            problem.solve(None, Some(11), &SolverOptions::default()).fit
        };

        let reversible_fit = fitness_when(true);
        let irreversible_fit = fitness_when(false);
        assert!(reversible_fit < 1e-10);
        assert!(irreversible_fit > reversible_fit);
    }

    #[test]
    fn exclusion_suppresses_one_of_two_fluxes() {
        let mut network = ReactionNetwork::from_reactions([
            Reaction::new("forward", [(molecule("a"), -1.0), (molecule("b"), 1.0)], true),
            Reaction::new("back", [(molecule("b"), -1.0), (molecule("a"), 1.0)], true),
        ]);
        let forward = Reaction::new("forward", [], true);
        let back = Reaction::new("back", [], true);

        let pin = VelocityObjective::new(
            &network,
            &IndexMap::from([(forward.clone(), Target::Exact(2.0))]),
        )
        .unwrap();
        let exclusion =
            ExclusionObjective::new(&network, &[forward.clone(), back.clone()]).unwrap();
        let mut objectives = IndexMap::new();
        objectives.insert("pin".to_string(), pin.into());
        objectives.insert("exclusion".to_string(), exclusion.into());

        let problem = FbaProblem::new(&mut network, &[], objectives).unwrap();
        let result = problem.solve(None, Some(3), &SolverOptions::default());

        assert_relative_eq!(result.velocities[&forward], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.velocities[&back], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn objective_order_is_fixed() {
        let problem = production_problem(1.0);
        let names: Vec<&str> = problem.objective_names().collect();
        assert_eq!(names, vec![STEADY_STATE, IRREVERSIBILITY, "production"]);
        assert_eq!(problem.shape(), (3, 2));
    }

    #[test]
    fn empty_network_is_rejected() {
        let mut network = ReactionNetwork::new();
        let result = FbaProblem::new(&mut network, &[], IndexMap::new());
        assert!(matches!(result, Err(FbaError::EmptyNetwork)));
    }

    #[test]
    fn intermediate_outside_network_is_rejected() {
        let mut network = linear_chain();
        let result = FbaProblem::new(&mut network, &[molecule("nope")], IndexMap::new());
        assert!(matches!(
            result,
            Err(FbaError::Objective(ObjectiveError::UnknownMolecule(id))) if id == "nope"
        ));
    }

    #[test]
    fn reserved_objective_names_are_rejected() {
        let mut network = linear_chain();
        let production = ProductionObjective::new(
            &network,
            &IndexMap::from([(molecule("c"), Target::Exact(1.0))]),
        )
        .unwrap();
        let mut objectives = IndexMap::new();
        objectives.insert(STEADY_STATE.to_string(), FluxObjective::from(production));

        let result = FbaProblem::new(&mut network, &[molecule("b")], objectives);
        assert!(matches!(
            result,
            Err(FbaError::ReservedObjectiveName(name)) if name == STEADY_STATE
        ));
    }

    #[test]
    fn unknown_objective_update_fails_loudly() {
        let mut problem = production_problem(1.0);
        let result = problem.update_parameters(IndexMap::from([(
            "nope".to_string(),
            ParameterUpdate::Production(IndexMap::new()),
        )]));
        assert!(matches!(
            result,
            Err(FbaError::UnknownObjective(name)) if name == "nope"
        ));
    }

    #[test]
    fn mismatched_update_kind_fails_loudly() {
        let mut problem = production_problem(1.0);
        let result = problem.update_parameters(IndexMap::from([(
            "production".to_string(),
            ParameterUpdate::Velocity(IndexMap::new()),
        )]));
        assert!(matches!(
            result,
            Err(FbaError::ParameterKindMismatch(name)) if name == "production"
        ));

        // The built-in objectives have no adjustable parameters at all
        let result = problem.update_parameters(IndexMap::from([(
            STEADY_STATE.to_string(),
            ParameterUpdate::Production(IndexMap::new()),
        )]));
        assert!(matches!(result, Err(FbaError::ParameterKindMismatch(_))));
    }

    #[test]
    fn flat_residual_layout_follows_objective_order() {
        let problem = production_problem(1.0);
        // v = (1, 1) satisfies steady state and irreversibility exactly
        let flat = problem.flat_residual(&DVector::from_vec(vec![1.0, 1.0]));
        assert_eq!(flat.len(), 3); // 1 steady-state + 1 irreversibility + 1 production
        assert_relative_eq!(flat.norm(), 0.0);

        // v = (0, 0) misses the production target by exactly 1
        let flat = problem.flat_residual(&DVector::zeros(2));
        assert_relative_eq!(flat[2], -1.0);
    }

    #[test]
    fn fitness_ignores_caller_objectives() {
        let problem = production_problem(5.0);
        // Steady state and irreversibility hold at v = (1, 1), so fitness is
        // perfect even though the production target is badly missed
        let v = DVector::from_vec(vec![1.0, 1.0]);
        let dmdt = &problem.s_matrix * &v;
        assert_relative_eq!(problem.fitness(&v, &dmdt), 0.0);
        assert!(problem.flat_residual(&v).norm() > 0.0);
    }
}
