//! Structures for representing molecules, reactions, and stoichiometric
//! reaction networks

pub mod molecule;
pub mod network;
pub mod reaction;
