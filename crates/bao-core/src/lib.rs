//! # bao-core
//!
//! Core types and traits for baofit.
//!
//! This crate holds the pieces every other crate agrees on: the error type,
//! the collaborator traits (cosmology, correlation model, minimizer) and the
//! fit result types. It has no numerical code of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error type and `Result` alias.
pub mod error;
/// Collaborator traits implemented outside the covariance engine.
pub mod traits;
/// Fit parameter and fit result types.
pub mod types;

pub use error::{Error, Result};
pub use traits::{CorrelationModel, HomogeneousUniverse, Minimizer, SupportsMultipoleEvaluation};
pub use types::{FitParameter, FitResult};
