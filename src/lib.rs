//! Active-learning ligand selection.
//!
//! The crate turns screened single-ligand reactions into the artifacts of
//! one learning round: a fitted ensemble model, a ranked candidate pool,
//! query records, and diverse suggestion batches, plus a
//! leave-one-ligand-out check of the model.

pub mod campaign;
pub mod chem;
pub mod cli;
pub mod data;
pub mod learn;
pub mod rank;
pub mod sample;
pub mod stats;
pub mod suggest;
