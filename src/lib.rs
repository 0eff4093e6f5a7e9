//! Flux balance analysis of metabolic reaction networks via gradient descent.
//!
//! Unlike classical linear-programming FBA, this crate poses the flux
//! distribution problem as nonlinear least squares: every constraint or goal is
//! an [`optimize::objective::FluxObjective`] producing a residual vector, and a
//! damped Levenberg-Marquardt solver drives the concatenated residual toward
//! zero. Solutions are local optima with a fitness score the caller must
//! interpret; there is no feasibility guarantee.
//!
//! ```rust
//! use fluxgd::metabolic_model::molecule::Molecule;
//! use fluxgd::metabolic_model::network::ReactionNetwork;
//! use fluxgd::metabolic_model::reaction::Reaction;
//! use fluxgd::optimize::objective::{FluxObjective, ProductionObjective, Target};
//! use fluxgd::optimize::problem::FbaProblem;
//! use fluxgd::optimize::SolverOptions;
//! use indexmap::IndexMap;
//!
//! let a = Molecule::new("a");
//! let b = Molecule::new("b");
//! let c = Molecule::new("c");
//! let mut network = ReactionNetwork::from_reactions([
//!     Reaction::new("ab", [(a.clone(), -1.0), (b.clone(), 1.0)], false),
//!     Reaction::new("bc", [(b.clone(), -1.0), (c.clone(), 1.0)], true),
//! ]);
//!
//! let production =
//!     ProductionObjective::new(&network, &IndexMap::from([(c, Target::Exact(1.0))])).unwrap();
//! let mut objectives = IndexMap::new();
//! objectives.insert("production".to_string(), FluxObjective::from(production));
//!
//! let problem = FbaProblem::new(&mut network, &[b], objectives).unwrap();
//! let result = problem.solve(None, Some(42), &SolverOptions::default());
//! assert!(result.fit < 1e-6);
//! ```

pub mod configuration;
pub mod metabolic_model;
pub mod optimize;
