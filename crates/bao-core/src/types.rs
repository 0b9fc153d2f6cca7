//! Common data types for baofit

use serde::{Deserialize, Serialize};

/// A model parameter as seen by the minimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    /// Parameter name
    pub name: String,
    /// Initial value
    pub value: f64,
    /// Initial step size / error estimate
    pub error: f64,
    /// Whether the minimizer may vary this parameter
    pub floating: bool,
}

impl FitParameter {
    /// Create a floating parameter
    pub fn floating(name: impl Into<String>, value: f64, error: f64) -> Self {
        Self { name: name.into(), value, error, floating: true }
    }

    /// Create a parameter held fixed at `value`
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value, error: 0.0, floating: false }
    }
}

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties
    pub uncertainties: Vec<f64>,

    /// Objective value at the minimum
    pub fval: f64,

    /// Whether the minimizer reports a valid minimum
    pub valid: bool,

    /// Number of objective evaluations
    pub n_evaluations: usize,
}

impl FitResult {
    /// Create a new fit result
    pub fn new(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        fval: f64,
        valid: bool,
        n_evaluations: usize,
    ) -> Self {
        Self { parameters, uncertainties, fval, valid, n_evaluations }
    }

    /// Chi-square at the minimum for an objective of the form `0.5 * chi2`.
    pub fn chi_square(&self) -> f64 {
        2.0 * self.fval
    }
}
