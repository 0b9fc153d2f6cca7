//! Analysis configuration: cosmology, binning and final cuts.
//!
//! Loaded from JSON; every field has a default so partial files are accepted.

use std::path::Path;
use std::sync::Arc;

use bao_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::axes::BinnedAxes;
use crate::binned::{BinnedData, FinalCuts};
use crate::binning::Binning;
use crate::cosmology::LambdaCdmUniverse;
use crate::covariance_fix::CovarianceFix;
use crate::transform::QuasarTransform;

/// Background cosmology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmologyConfig {
    /// Present-day matter density.
    pub omega_matter: f64,
    /// Present-day radiation density.
    pub omega_radiation: f64,
}

impl Default for CosmologyConfig {
    fn default() -> Self {
        Self { omega_matter: 0.27, omega_radiation: 0.0 }
    }
}

/// Log-lambda axis. `dll2 == 0` selects uniform bins of width `dll` starting at
/// `min`; otherwise a two-step sampling with breakpoint `min`, log step `dll`
/// and linear step `dll2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLambdaAxis {
    /// Lower edge (uniform) or breakpoint (two-step).
    pub min: f64,
    /// Bin width (uniform) or log step (two-step).
    pub dll: f64,
    /// Linear step of the two-step sampling, or 0.
    pub dll2: f64,
    /// Number of bins.
    pub n: usize,
}

impl Default for LogLambdaAxis {
    fn default() -> Self {
        Self { min: 0.0002, dll: 0.004, dll2: 0.0, n: 14 }
    }
}

/// Angular separation axis, in arcminutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationAxis {
    /// Lower edge.
    pub min: f64,
    /// Bin width.
    pub dsep: f64,
    /// Number of bins.
    pub n: usize,
}

impl Default for SeparationAxis {
    fn default() -> Self {
        Self { min: 0.0, dsep: 10.0, n: 14 }
    }
}

/// Redshift axis: `n` samples at the centers of bins of width `dz` from `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedshiftAxis {
    /// Lower edge of the first bin.
    pub min: f64,
    /// Bin width.
    pub dz: f64,
    /// Number of samples.
    pub n: usize,
}

impl Default for RedshiftAxis {
    fn default() -> Self {
        Self { min: 1.7, dz: 1.0, n: 2 }
    }
}

/// Final cuts in comoving radius (Mpc/h) and log-lambda.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutsConfig {
    /// Smallest kept radius.
    pub rmin: f64,
    /// Radius upper bound (exclusive).
    pub rmax: f64,
    /// Smallest kept log-lambda.
    pub llmin: f64,
}

impl Default for CutsConfig {
    fn default() -> Self {
        Self { rmin: 0.0, rmax: 200.0, llmin: 0.0 }
    }
}

/// Complete analysis configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Background cosmology.
    pub cosmology: CosmologyConfig,
    /// Log-lambda binning.
    pub ll: LogLambdaAxis,
    /// Separation binning.
    pub sep: SeparationAxis,
    /// Redshift binning.
    pub z: RedshiftAxis,
    /// Final cuts.
    pub cuts: CutsConfig,
    /// Covariance correction applied to every loaded dataset.
    pub covariance_fix: Option<CovarianceFix>,
}

impl AnalysisConfig {
    /// Read a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| Error::Open { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no dataset could be built from.
    pub fn validate(&self) -> Result<()> {
        if self.ll.n == 0 || self.sep.n == 0 || self.z.n == 0 {
            return Err(Error::Validation("every axis needs at least one bin".to_string()));
        }
        if !(self.ll.dll > 0.0 && self.sep.dsep > 0.0 && self.z.dz > 0.0) {
            return Err(Error::Validation("axis bin widths must be positive".to_string()));
        }
        if self.ll.dll2 < 0.0 {
            return Err(Error::Validation(format!("dll2 must be >= 0, got {}", self.ll.dll2)));
        }
        FinalCuts::new(self.cuts.rmin, self.cuts.rmax, Some(self.cuts.llmin))?;
        if let Some(fix) = &self.covariance_fix {
            fix.validate()?;
        }
        Ok(())
    }

    fn ll_binning(&self) -> Result<Binning> {
        let ll = &self.ll;
        if ll.dll2 == 0.0 {
            Binning::uniform(ll.min, ll.min + ll.n as f64 * ll.dll, ll.n)
        } else {
            Binning::two_step(ll.n, ll.min, ll.dll, ll.dll2)
        }
    }

    /// Axes for (log-lambda, separation, redshift).
    pub fn axes(&self) -> Result<BinnedAxes> {
        let sep = &self.sep;
        let z = &self.z;
        Ok(BinnedAxes::new(
            self.ll_binning()?,
            Binning::uniform(sep.min, sep.min + sep.n as f64 * sep.dsep, sep.n)?,
            Binning::uniform_sampling(z.min + 0.5 * z.dz, z.min + (z.n as f64 - 0.5) * z.dz, z.n)?,
        ))
    }

    /// Empty dataset with the configured axes, cosmology, covariance fix and cuts.
    pub fn build_prototype(&self) -> Result<BinnedData> {
        self.validate()?;
        let universe =
            LambdaCdmUniverse::new(self.cosmology.omega_matter, self.cosmology.omega_radiation)?;
        let cuts = FinalCuts::new(self.cuts.rmin, self.cuts.rmax, Some(self.cuts.llmin))?;
        let mut prototype = BinnedData::new(
            Arc::new(self.axes()?),
            Arc::new(QuasarTransform::new(Arc::new(universe))),
        )
        .with_final_cuts(cuts);
        if let Some(fix) = self.covariance_fix {
            prototype = prototype.with_covariance_fix(fix);
        }
        Ok(prototype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"ll": {"n": 5}, "covariance_fix": {}}"#).unwrap();
        assert_eq!(config.ll.n, 5);
        assert_eq!(config.ll.dll, 0.004);
        assert_eq!(config.sep, SeparationAxis::default());
        assert_eq!(config.covariance_fix, Some(CovarianceFix::default()));
        config.validate().unwrap();
    }

    #[test]
    fn prototype_axes() {
        let config = AnalysisConfig::default();
        let prototype = config.build_prototype().unwrap();
        assert_eq!(prototype.axes().shape(), [14, 14, 2]);
        assert_relative_eq!(prototype.axes().axis(2).bin_center(0), 2.2, epsilon = 1e-12);
        assert_relative_eq!(prototype.axes().axis(2).bin_center(1), 3.2, epsilon = 1e-12);
        assert_relative_eq!(prototype.axes().axis(0).bin_center(0), 0.0022, epsilon = 1e-12);
        assert_eq!(prototype.final_cuts().ll_min, Some(0.0));
    }

    #[test]
    fn two_step_when_dll2_is_set() {
        let mut config = AnalysisConfig::default();
        config.ll = LogLambdaAxis { min: 0.1, dll: 0.02, dll2: 0.05, n: 5 };
        let axes = config.axes().unwrap();
        assert_eq!(axes.axis(0).bin_center(0), 0.0);
        assert_relative_eq!(axes.axis(0).bin_center(1), 0.025, epsilon = 1e-12);
    }

    #[test]
    fn rejects_inverted_cuts() {
        let mut config = AnalysisConfig::default();
        config.cuts.rmax = 0.0;
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }
}
