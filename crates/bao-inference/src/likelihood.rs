//! Chi-square objective of a correlation model against binned data.
//!
//! The objective is `0.5 * chi2 / error_scale`, so a unit change corresponds to
//! one standard deviation for a single parameter when `error_scale = 1`.

use bao_core::{CorrelationModel, Error, FitResult, Minimizer, Result};
use bao_data::BinnedData;
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Model predictions compared with finalized data through its inverse covariance.
pub struct CorrelationLikelihood<'a> {
    data: &'a BinnedData,
    model: &'a dyn CorrelationModel,
    n_parameters: usize,
    error_scale: f64,
}

impl<'a> CorrelationLikelihood<'a> {
    /// Objective over a finalized dataset.
    pub fn new(data: &'a BinnedData, model: &'a dyn CorrelationModel) -> Result<Self> {
        if !data.is_finalized() {
            return Err(Error::InvalidState("likelihood needs finalized data".to_string()));
        }
        if data.covariance_matrix().is_none() {
            return Err(Error::InvalidState("likelihood needs data with a covariance".to_string()));
        }
        Ok(Self { data, model, n_parameters: model.parameters().len(), error_scale: 1.0 })
    }

    /// Divide the objective by `scale` (for example to trace contours).
    pub fn with_error_scale(mut self, scale: f64) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::Validation(format!("error scale must be positive, got {scale}")));
        }
        self.error_scale = scale;
        Ok(self)
    }

    /// The data being fit.
    pub fn data(&self) -> &BinnedData {
        self.data
    }

    /// Number of data bins.
    pub fn n_bins(&self) -> usize {
        self.data.n_bins_with_data()
    }

    /// Model value at every populated bin, in offset order.
    pub fn predictions(&self, params: &[f64]) -> Result<Vec<f64>> {
        if params.len() != self.n_parameters {
            return Err(Error::Validation(format!(
                "model takes {} parameters, got {}",
                self.n_parameters,
                params.len()
            )));
        }
        (0..self.n_bins())
            .map(|offset| {
                let c = self.data.coordinates(offset)?;
                Ok(self.model.evaluate(c.radius, c.cos_angle, c.redshift, params))
            })
            .collect()
    }

    /// Chi-square of the model at `params`.
    pub fn chi_square(&self, params: &[f64]) -> Result<f64> {
        self.data.chi_square(&self.predictions(params)?)
    }

    /// `0.5 * chi2 / error_scale`.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64> {
        Ok(0.5 * self.chi_square(params)? / self.error_scale)
    }

    /// `(data - prediction) / sigma` per bin.
    pub fn pulls(&self, params: &[f64]) -> Result<Vec<f64>> {
        let predicted = self.predictions(params)?;
        predicted
            .iter()
            .enumerate()
            .map(|(offset, p)| {
                let sigma = self.data.variance(offset)?.sqrt();
                Ok((self.data.data_at(offset)? - p) / sigma)
            })
            .collect()
    }

    /// Minimize the objective starting from the model's initial parameters.
    pub fn fit(&self, minimizer: &dyn Minimizer) -> Result<FitResult> {
        let parameters = self.model.parameters();
        let objective = |params: &[f64]| self.evaluate(params);
        let result = minimizer.minimize(&objective, &parameters)?;
        log::debug!(
            "Fit over {} bins: chi2 = {:.4}, valid = {}, {} evaluations",
            self.n_bins(),
            result.chi_square(),
            result.valid,
            result.n_evaluations
        );
        Ok(result)
    }
}

/// Probability of a chi-square at least this large for `n_dof` degrees of freedom.
pub fn chi2_probability(chi2: f64, n_dof: usize) -> Result<f64> {
    if n_dof == 0 {
        return Err(Error::Validation("chi-square probability needs n_dof > 0".to_string()));
    }
    let dist = ChiSquared::new(n_dof as f64).map_err(|e| Error::Computation(e.to_string()))?;
    Ok(dist.sf(chi2))
}
