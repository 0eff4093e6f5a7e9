//! Global configuration defaults for the flux optimization solver
use std::sync::{LazyLock, RwLock};

/// Global configuration, used to supply defaults for solver settings
pub static CONFIGURATION: LazyLock<RwLock<Configuration>> =
    LazyLock::new(|| RwLock::new(Configuration::default()));

/// Default settings applied when a caller does not override them
pub struct Configuration {
    /// Weight applied to the built-in steady-state and irreversibility
    /// objectives, relative to caller-supplied objectives
    pub fitness_weight: f64,
    /// Relative reduction in the sum of squares below which the solver stops
    pub ftol: f64,
    /// Relative change in the flux vector below which the solver stops
    pub xtol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns
    pub gtol: f64,
    /// Iteration budget of the least-squares solver
    pub patience: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            fitness_weight: 1e2,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            patience: 100,
        }
    }
}
