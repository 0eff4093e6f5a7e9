//! Module for constructing and solving flux optimization problems

pub mod objective;
pub mod problem;

use indexmap::IndexMap;
use nalgebra::DVector;

use crate::configuration::CONFIGURATION;
use crate::metabolic_model::molecule::Molecule;
use crate::metabolic_model::reaction::Reaction;

/// Reaction velocities and dM/dt for an FBA solution, with a fitness metric
///
/// `fit` is the sum of squared steady-state and irreversibility residuals,
/// unweighted; it measures the physical validity of the solution independent
/// of how well caller-supplied goals were met. A solution can have perfect
/// fitness while badly missing production targets, and vice versa; callers
/// must check both.
#[derive(Debug, Clone)]
pub struct FbaResult {
    /// The flux vector the solver was started from
    pub v0: DVector<f64>,
    /// Optimized flux of each reaction, keyed by reaction
    pub velocities: IndexMap<Reaction, f64>,
    /// Rate of change of each molecule at the optimum, keyed by molecule
    pub dmdt: IndexMap<Molecule, f64>,
    /// Sum of squared fitness residuals; 0 for a physically valid solution
    pub fit: f64,
    /// How the underlying least-squares solver terminated
    pub status: SolveStatus,
    /// Number of residual evaluations performed by the solver
    pub evaluations: usize,
}

/// Termination condition of a solve
///
/// Non-convergence is surfaced here as data, never as an error: the solver
/// still returns its best iterate, and the caller decides whether the fitness
/// is acceptable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// The solver satisfied its convergence tolerances
    Converged,
    /// The solver exhausted its iteration budget; the best iterate found is
    /// returned
    IterationLimit,
    /// The solver stopped on a numerical problem (e.g. a degenerate Jacobian)
    NumericalIssue,
}

/// Options forwarded to the underlying least-squares solver
///
/// Defaults are drawn from the global [`CONFIGURATION`].
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// Relative reduction in the sum of squares below which the solver stops
    pub ftol: f64,
    /// Relative change in the flux vector below which the solver stops
    pub xtol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns
    pub gtol: f64,
    /// Iteration budget
    pub patience: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        let config = CONFIGURATION.read().unwrap();
        SolverOptions {
            ftol: config.ftol,
            xtol: config.xtol,
            gtol: config.gtol,
            patience: config.patience,
        }
    }
}
