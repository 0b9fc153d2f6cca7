//! Collaborator traits for baofit
//!
//! The covariance engine never evaluates a cosmology, a correlation model or a
//! minimizer itself. These traits are the seams where those collaborators plug
//! in, so the data crates stay independent of any particular model or optimizer.

use std::fmt::Debug;

use crate::Result;
use crate::types::{FitParameter, FitResult};

/// Homogeneous cosmology used to map observed coordinates into co-moving ones.
///
/// Distances are in Mpc/h.
pub trait HomogeneousUniverse: Debug + Send + Sync {
    /// Co-moving distance along the line of sight to redshift `z`.
    fn line_of_sight_comoving_distance(&self, z: f64) -> f64;

    /// Transverse co-moving distance per radian of angular separation at redshift `z`.
    fn transverse_comoving_scale(&self, z: f64) -> f64;
}

/// Two-point correlation model evaluated in redshift space.
pub trait CorrelationModel: Send + Sync {
    /// Parameters of this model with their initial values and step sizes.
    fn parameters(&self) -> Vec<FitParameter>;

    /// Correlation at pair separation `r` (Mpc/h), line-of-sight cosine `mu`
    /// and mean pair redshift `z`.
    fn evaluate(&self, r: f64, mu: f64, z: f64, params: &[f64]) -> f64;

    /// Multipole capability, if this model supports it.
    fn multipoles(&self) -> Option<&dyn SupportsMultipoleEvaluation> {
        None
    }
}

/// Optional capability of a correlation model: evaluate its ell = 0, 2, 4 multipoles.
pub trait SupportsMultipoleEvaluation: Send + Sync {
    /// Monopole, quadrupole and hexadecapole at separation `r`.
    fn evaluate_multipoles(&self, r: f64, params: &[f64]) -> [f64; 3];
}

/// Minimizer collaborator: finds the minimum of a scalar objective.
pub trait Minimizer: Send + Sync {
    /// Minimize `objective` starting from `parameters`.
    ///
    /// Fixed parameters (`floating == false`) must be held at their initial value.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> Result<f64>,
        parameters: &[FitParameter],
    ) -> Result<FitResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatModel;

    impl CorrelationModel for FlatModel {
        fn parameters(&self) -> Vec<FitParameter> {
            vec![FitParameter::floating("level", 0.0, 0.1)]
        }

        fn evaluate(&self, _r: f64, _mu: f64, _z: f64, params: &[f64]) -> f64 {
            params[0]
        }
    }

    #[test]
    fn test_default_model_has_no_multipoles() {
        let model = FlatModel;
        assert!(model.multipoles().is_none());
        assert_eq!(model.evaluate(100.0, 0.5, 2.0, &[0.25]), 0.25);
    }
}
