//! Ad-hoc correction for the missing large-scale power in plate covariances.
//!
//! Bins that share the same separation and redshift bins get an extra
//! covariance term built from the band-limited power between `0..k1` and
//! `k1..k2`, scaled by `c`.

use bao_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::binned::BinnedData;

/// Wavenumber bands and amplitude of the covariance correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovarianceFix {
    /// Upper edge of the first band.
    pub k1: f64,
    /// Upper edge of the second band.
    pub k2: f64,
    /// Amplitude.
    pub c: f64,
}

impl Default for CovarianceFix {
    fn default() -> Self {
        Self { k1: 150.0, k2: 300.0, c: 1e-3 }
    }
}

impl CovarianceFix {
    /// Validate the band edges.
    pub fn validate(&self) -> Result<()> {
        if !(self.k1 > 0.0 && self.k2 > self.k1) {
            return Err(Error::Validation(format!(
                "covariance fix needs 0 < k1 < k2, got k1 = {}, k2 = {}",
                self.k1, self.k2
            )));
        }
        Ok(())
    }

    /// Correction added to the covariance of two bins at log-lambda `ll1`, `ll2`.
    pub fn correction(&self, ll1: f64, ll2: f64) -> f64 {
        self.c * (1.0 + band_power(0.0, self.k1, ll1, ll2) + band_power(self.k1, self.k2, ll1, ll2))
    }
}

fn band_response(kmin: f64, kmax: f64, l: f64) -> f64 {
    if l == 0.0 { 1.0 } else { ((kmax * l).sin() - (kmin * l).sin()) / l }
}

fn band_power(kmin: f64, kmax: f64, ll1: f64, ll2: f64) -> f64 {
    band_response(kmin, kmax, ll1) * band_response(kmin, kmax, ll2)
}

impl BinnedData {
    /// Add the correction to every covariance element whose bins share the
    /// second and third axis bins.
    ///
    /// The covariance must be held directly; call
    /// [`BinnedData::invert_covariance`] first when only the inverse is present.
    /// Any inverse is dropped.
    pub fn fix_covariance(&mut self, fix: &CovarianceFix) -> Result<()> {
        fix.validate()?;
        let axes = std::sync::Arc::clone(self.axes());
        let bins = self
            .indices()
            .iter()
            .map(|&index| {
                let decoded = axes.decode(index)?;
                Ok((axes.axis(0).bin_center(decoded[0]), decoded[1], decoded[2]))
            })
            .collect::<Result<Vec<_>>>()?;
        let store = self.covariance_matrix_mut()?;
        let was_compressed = store.is_compressed();
        store.decompress();
        let mut adjusted = 0usize;
        for (o1, &(ll1, sep1, z1)) in bins.iter().enumerate() {
            for (o2, &(ll2, sep2, z2)) in bins.iter().enumerate().take(o1 + 1) {
                if sep1 != sep2 || z1 != z2 {
                    continue;
                }
                let value = store.covariance(o1, o2)? + fix.correction(ll1, ll2);
                store.set_covariance(o1, o2, value)?;
                adjusted += 1;
            }
        }
        if was_compressed {
            store.compress();
        }
        log::debug!("Covariance fix adjusted {adjusted} elements");
        Ok(())
    }
}
