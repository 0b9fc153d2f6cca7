//! # bao-inference
//!
//! Fitting on top of `bao-data`.
//!
//! This crate provides:
//! - The chi-square objective handed to an external minimizer
//! - Bootstrap resampling of plates with parallel, reproducible trials
//! - Null-hypothesis theory offsets applied to plate data

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Bootstrap trials over plates.
pub mod bootstrap;
/// Chi-square likelihood objective.
pub mod likelihood;
/// Null-hypothesis theory offsets.
pub mod offsets;

pub use bootstrap::{BootstrapConfig, BootstrapDriver, BootstrapSummary, TrialResult, WeightedAccumulator};
pub use likelihood::{CorrelationLikelihood, chi2_probability};
pub use offsets::apply_theory_offsets;
