//! Inverse-covariance weighted combination of per-plate datasets.
//!
//! Plates are added with an integer repeat count so that the same aggregator
//! realizes both the full combination (every plate once) and bootstrap trials
//! (plates drawn with replacement). Two inverse accumulators are kept:
//!
//! - `N = sum(repeat^2 * icov_k)`, the naive accumulation,
//! - `T = sum(repeat * icov_k)`, which recovers the point estimate
//!   `data = T^-1 . sum(repeat * icov_k . data_k)`.
//!
//! Finalizing with the bootstrap correction sets the inverse covariance to
//! `T . N^-1 . T`; without it the covariance is simply `T^-1`, which is only
//! correct when no plate repeats.

use bao_core::{Error, Result};

use crate::binned::{BinnedData, FinalCuts};
use crate::covariance::{CovarianceMatrix, Representation};

#[derive(Debug, Clone)]
enum State {
    Empty,
    Accumulating {
        layout: BinnedData,
        icov_data: Vec<f64>,
        icov: CovarianceMatrix,
        icov_tilde: CovarianceMatrix,
    },
    Finalized(BinnedData),
}

/// Combined dataset built from many plates.
#[derive(Debug, Clone)]
pub struct CombinedData {
    state: State,
    cuts: Option<FinalCuts>,
}

impl Default for CombinedData {
    fn default() -> Self {
        Self::new()
    }
}

impl CombinedData {
    /// Empty aggregator.
    pub fn new() -> Self {
        Self { state: State::Empty, cuts: None }
    }

    /// Whether no plate has been added since construction or the last reset.
    pub fn is_empty(&self) -> bool {
        matches!(self.state, State::Empty)
    }

    /// Whether [`CombinedData::finalize`] has run.
    pub fn is_finalized(&self) -> bool {
        matches!(self.state, State::Finalized(_))
    }

    /// Accumulate `plate` with multiplicity `repeat`.
    ///
    /// The plate must be finalized. A plate holding only its covariance is
    /// inverted on the fly, which fails for a non-positive-definite matrix.
    /// Every plate added between resets must share the first plate's
    /// populated-bin layout.
    pub fn add(&mut self, plate: &BinnedData, repeat: u32) -> Result<()> {
        if repeat == 0 {
            return Err(Error::Validation("plate repeat count must be positive".to_string()));
        }
        if !plate.is_finalized() {
            return Err(Error::InvalidState("only finalized plates can be combined".to_string()));
        }
        let store = plate
            .covariance_matrix()
            .ok_or_else(|| Error::InvalidState("plate has no covariance".to_string()))?;
        let inverted;
        let plate_icov = if store.representation() == Some(Representation::Covariance) {
            let mut copy = store.clone();
            copy.invert()?;
            inverted = copy;
            &inverted
        } else {
            store
        };
        let mut weighted = plate.values().to_vec();
        plate_icov.multiply_by_inverse_covariance(&mut weighted)?;
        let weight = f64::from(repeat);
        if let State::Empty = self.state {
            let n = plate.n_bins_with_data();
            let mut icov = CovarianceMatrix::zeros_inverse(n);
            let mut icov_tilde = CovarianceMatrix::zeros_inverse(n);
            icov.add_inverse(plate_icov, weight * weight)?;
            icov_tilde.add_inverse(plate_icov, weight)?;
            let icov_data = weighted.iter().map(|x| weight * x).collect();
            self.state = State::Accumulating {
                layout: plate.clone_layout(),
                icov_data,
                icov,
                icov_tilde,
            };
            return Ok(());
        }
        match &mut self.state {
            State::Accumulating { layout, icov_data, icov, icov_tilde } => {
                if layout.indices() != plate.indices() {
                    return Err(Error::LayoutMismatch(format!(
                        "plate has {} populated bins in a different layout from the first plate's {}",
                        plate.n_bins_with_data(),
                        layout.n_bins_with_data()
                    )));
                }
                icov.add_inverse(plate_icov, weight * weight)?;
                icov_tilde.add_inverse(plate_icov, weight)?;
                for (acc, x) in icov_data.iter_mut().zip(&weighted) {
                    *acc += weight * x;
                }
                Ok(())
            }
            _ => Err(Error::InvalidState(
                "cannot add a plate to a finalized combination; call reset() first".to_string(),
            )),
        }
    }

    /// Solve for the combined data and covariance.
    ///
    /// With `fix_covariance` the bootstrap triple-product correction is applied.
    /// Any cuts registered with [`CombinedData::prune`] are applied afterwards.
    /// On failure the aggregator is left empty.
    pub fn finalize(&mut self, fix_covariance: bool) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Empty) {
            State::Empty => Err(Error::InvalidState("nothing to finalize".to_string())),
            finalized @ State::Finalized(_) => {
                self.state = finalized;
                Err(Error::InvalidState("combination is already finalized".to_string()))
            }
            State::Accumulating { layout, mut icov_data, mut icov, mut icov_tilde } => {
                icov_tilde.invert()?;
                icov_tilde.multiply_by_covariance(&mut icov_data)?;
                let covariance = if fix_covariance {
                    icov.replace_with_triple_product(&icov_tilde)?;
                    icov.invert()?;
                    icov
                } else {
                    icov_tilde
                };
                let mut combined = layout.with_values(icov_data, covariance)?;
                if let Some(cuts) = self.cuts {
                    combined.apply_cuts(cuts)?;
                }
                self.state = State::Finalized(combined);
                Ok(())
            }
        }
    }

    /// Discard all accumulated state. Registered cuts are kept.
    pub fn reset(&mut self) {
        self.state = State::Empty;
    }

    /// Register cuts `rmin <= r < rmax`, `ll >= ll_min`, applying them now if finalized
    /// and after every later finalize.
    pub fn prune(&mut self, rmin: f64, rmax: f64, ll_min: f64) -> Result<()> {
        let cuts = FinalCuts::new(rmin, rmax, Some(ll_min))?;
        if let State::Finalized(data) = &mut self.state {
            data.apply_cuts(cuts)?;
        }
        self.cuts = Some(cuts);
        Ok(())
    }

    /// The combined dataset.
    pub fn result(&self) -> Result<&BinnedData> {
        match &self.state {
            State::Finalized(data) => Ok(data),
            _ => Err(Error::InvalidState("combination is not finalized".to_string())),
        }
    }

    /// Take the combined dataset, leaving the aggregator empty.
    pub fn into_result(self) -> Result<BinnedData> {
        match self.state {
            State::Finalized(data) => Ok(data),
            _ => Err(Error::InvalidState("combination is not finalized".to_string())),
        }
    }

    /// Freeze the combined covariance to sparse storage.
    pub fn compress(&mut self) -> Result<()> {
        match &mut self.state {
            State::Finalized(data) => {
                data.compress();
                Ok(())
            }
            _ => Err(Error::InvalidState("combination is not finalized".to_string())),
        }
    }

    /// Chi-square of `predicted` (offset order) against the combined data.
    pub fn chi_square(&self, predicted: &[f64]) -> Result<f64> {
        self.result()?.chi_square(predicted)
    }

    /// Number of combined bins.
    pub fn n_bins(&self) -> Result<usize> {
        Ok(self.result()?.n_bins_with_data())
    }

    /// Radius of the combined bin at `offset`.
    pub fn radius(&self, offset: usize) -> Result<f64> {
        self.result()?.radius(offset)
    }

    /// Line-of-sight cosine of the combined bin at `offset`.
    pub fn cos_angle(&self, offset: usize) -> Result<f64> {
        self.result()?.cos_angle(offset)
    }

    /// Redshift of the combined bin at `offset`.
    pub fn redshift(&self, offset: usize) -> Result<f64> {
        self.result()?.redshift(offset)
    }

    /// Combined value at `offset`.
    pub fn data(&self, offset: usize) -> Result<f64> {
        self.result()?.data_at(offset)
    }

    /// Combined variance at `offset`.
    pub fn variance(&self, offset: usize) -> Result<f64> {
        self.result()?.variance(offset)
    }
}
