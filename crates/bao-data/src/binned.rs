//! Sparse binned dataset.
//!
//! Only bins that carry data are stored. Each populated bin gets an *offset*
//! (0, 1, 2, ... in the order bins were added); the covariance is indexed by
//! offset while the public API speaks global bin indices.
//!
//! Lifecycle: bins are added with [`BinnedData::set_data`], then covariance
//! elements are written, then [`BinnedData::finalize`] applies the final cuts,
//! caches co-moving coordinates and freezes the layout.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bao_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::axes::BinnedAxes;
use crate::covariance::{CovarianceMatrix, Representation};
use crate::covariance_fix::CovarianceFix;
use crate::transform::{BinCoordinates, CoordinateTransform};

/// Permanent cuts applied when a dataset is finalized.
///
/// A bin is kept iff `rmin <= radius < rmax` and, when set, `ll_min <= ll`
/// where `ll` is the bin center on the first axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalCuts {
    /// Smallest kept radius (inclusive).
    pub rmin: f64,
    /// Largest kept radius (exclusive).
    pub rmax: f64,
    /// Smallest kept first-axis center (inclusive).
    pub ll_min: Option<f64>,
}

impl FinalCuts {
    /// Validated cuts.
    pub fn new(rmin: f64, rmax: f64, ll_min: Option<f64>) -> Result<Self> {
        if rmin.is_nan() || rmax.is_nan() || rmax <= rmin {
            return Err(Error::Validation(format!("need rmin < rmax, got [{rmin}, {rmax})")));
        }
        Ok(Self { rmin, rmax, ll_min })
    }

    /// Whether a bin with this radius and first-axis center survives.
    pub fn keeps(&self, radius: f64, ll: f64) -> bool {
        radius >= self.rmin && radius < self.rmax && self.ll_min.is_none_or(|min| ll >= min)
    }
}

impl Default for FinalCuts {
    fn default() -> Self {
        Self { rmin: f64::NEG_INFINITY, rmax: f64::INFINITY, ll_min: None }
    }
}

/// Binned correlation data with a covariance over the populated bins.
#[derive(Debug, Clone)]
pub struct BinnedData {
    axes: Arc<BinnedAxes>,
    transform: Arc<dyn CoordinateTransform>,
    cuts: FinalCuts,
    covariance_fix: Option<CovarianceFix>,
    index: Vec<usize>,
    offsets: HashMap<usize, usize>,
    data: Vec<f64>,
    covariance: Option<CovarianceMatrix>,
    coordinates: Vec<BinCoordinates>,
    finalized: bool,
}

impl BinnedData {
    /// Empty dataset over the given layout.
    pub fn new(axes: Arc<BinnedAxes>, transform: Arc<dyn CoordinateTransform>) -> Self {
        Self {
            axes,
            transform,
            cuts: FinalCuts::default(),
            covariance_fix: None,
            index: Vec::new(),
            offsets: HashMap::new(),
            data: Vec::new(),
            covariance: None,
            coordinates: Vec::new(),
            finalized: false,
        }
    }

    /// Cuts to apply in [`BinnedData::finalize`].
    pub fn with_final_cuts(mut self, cuts: FinalCuts) -> Self {
        self.cuts = cuts;
        self
    }

    /// Covariance correction to apply in [`BinnedData::finalize`], before the cuts.
    pub fn with_covariance_fix(mut self, fix: CovarianceFix) -> Self {
        self.covariance_fix = Some(fix);
        self
    }

    /// Empty dataset sharing this one's layout, transform and finalization policy.
    pub fn clone_binning_only(&self) -> Self {
        let mut empty = Self::new(Arc::clone(&self.axes), Arc::clone(&self.transform));
        empty.cuts = self.cuts;
        empty.covariance_fix = self.covariance_fix;
        empty
    }

    /// Same populated layout and cached coordinates, with zeroed values and no covariance.
    pub(crate) fn clone_layout(&self) -> Self {
        Self {
            axes: Arc::clone(&self.axes),
            transform: Arc::clone(&self.transform),
            cuts: self.cuts,
            covariance_fix: self.covariance_fix,
            index: self.index.clone(),
            offsets: self.offsets.clone(),
            data: vec![0.0; self.index.len()],
            covariance: None,
            coordinates: self.coordinates.clone(),
            finalized: self.finalized,
        }
    }

    /// Same populated layout and cached coordinates with new values and covariance.
    pub(crate) fn with_values(&self, data: Vec<f64>, covariance: CovarianceMatrix) -> Result<Self> {
        if data.len() != self.index.len() || covariance.size() != self.index.len() {
            return Err(Error::LayoutMismatch(format!(
                "{} values and covariance of size {} for {} populated bins",
                data.len(),
                covariance.size(),
                self.index.len()
            )));
        }
        Ok(Self {
            axes: Arc::clone(&self.axes),
            transform: Arc::clone(&self.transform),
            cuts: self.cuts,
            covariance_fix: self.covariance_fix,
            index: self.index.clone(),
            offsets: self.offsets.clone(),
            data,
            covariance: Some(covariance),
            coordinates: self.coordinates.clone(),
            finalized: self.finalized,
        })
    }

    /// Axis layout.
    pub fn axes(&self) -> &Arc<BinnedAxes> {
        &self.axes
    }

    /// Coordinate transform.
    pub fn transform(&self) -> &Arc<dyn CoordinateTransform> {
        &self.transform
    }

    /// Cuts applied at finalization.
    pub fn final_cuts(&self) -> &FinalCuts {
        &self.cuts
    }

    /// Total number of bins in the layout.
    pub fn n_bins_total(&self) -> usize {
        self.axes.n_bins_total()
    }

    /// Number of bins with data.
    pub fn n_bins_with_data(&self) -> usize {
        self.index.len()
    }

    /// Whether [`BinnedData::finalize`] has run.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Global indices of the populated bins, in offset order.
    pub fn indices(&self) -> &[usize] {
        &self.index
    }

    /// Data values in offset order.
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Whether the bin with this global index has data.
    pub fn has_data(&self, index: usize) -> bool {
        self.offsets.contains_key(&index)
    }

    /// Global index of the populated bin at `offset`.
    pub fn index_at_offset(&self, offset: usize) -> Result<usize> {
        self.index.get(offset).copied().ok_or_else(|| {
            Error::OutOfRange(format!("offset {offset} outside {} populated bins", self.index.len()))
        })
    }

    /// Offset of the populated bin with this global index.
    pub fn offset_for_index(&self, index: usize) -> Result<usize> {
        self.offsets
            .get(&index)
            .copied()
            .ok_or_else(|| Error::InvalidState(format!("bin {index} has no data")))
    }

    /// Record the value of a new bin.
    pub fn set_data(&mut self, index: usize, value: f64) -> Result<()> {
        if self.finalized {
            return Err(Error::InvalidState("cannot add data to a finalized dataset".to_string()));
        }
        if index >= self.n_bins_total() {
            return Err(Error::OutOfRange(format!(
                "bin {index} outside layout of {} bins",
                self.n_bins_total()
            )));
        }
        if self.offsets.contains_key(&index) {
            return Err(Error::InvalidState(format!("bin {index} already has data")));
        }
        if self.covariance.is_some() {
            return Err(Error::InvalidState(format!(
                "cannot add bin {index} after the covariance has been started"
            )));
        }
        self.offsets.insert(index, self.index.len());
        self.index.push(index);
        self.data.push(value);
        Ok(())
    }

    /// Replace every value at once, in offset order.
    pub fn set_values(&mut self, values: Vec<f64>) -> Result<()> {
        if values.len() != self.data.len() {
            return Err(Error::Validation(format!(
                "{} values for {} populated bins",
                values.len(),
                self.data.len()
            )));
        }
        self.data = values;
        Ok(())
    }

    /// Data value of the bin with this global index.
    pub fn data(&self, index: usize) -> Result<f64> {
        Ok(self.data[self.offset_for_index(index)?])
    }

    /// Data value at `offset`.
    pub fn data_at(&self, offset: usize) -> Result<f64> {
        self.data.get(offset).copied().ok_or_else(|| {
            Error::OutOfRange(format!("offset {offset} outside {} populated bins", self.data.len()))
        })
    }

    /// Add `delta` to the value at `offset`. Layout and covariance are unchanged.
    pub fn shift_data_at(&mut self, offset: usize, delta: f64) -> Result<()> {
        let n = self.data.len();
        let value = self.data.get_mut(offset).ok_or_else(|| {
            Error::OutOfRange(format!("offset {offset} outside {n} populated bins"))
        })?;
        *value += delta;
        Ok(())
    }

    /// The covariance store, if any element has been written.
    pub fn covariance_matrix(&self) -> Option<&CovarianceMatrix> {
        self.covariance.as_ref()
    }

    fn store(&self) -> Result<&CovarianceMatrix> {
        self.covariance
            .as_ref()
            .ok_or_else(|| Error::InvalidState("dataset has no covariance".to_string()))
    }

    /// Mutable covariance store, created on first use.
    pub fn covariance_matrix_mut(&mut self) -> Result<&mut CovarianceMatrix> {
        if self.finalized {
            return Err(Error::InvalidState(
                "cannot modify the covariance of a finalized dataset".to_string(),
            ));
        }
        let n = self.index.len();
        Ok(self.covariance.get_or_insert_with(|| CovarianceMatrix::new(n)))
    }

    fn offset_pair(&self, index1: usize, index2: usize) -> Result<(usize, usize)> {
        Ok((self.offset_for_index(index1)?, self.offset_for_index(index2)?))
    }

    /// Covariance between two populated bins.
    pub fn covariance(&self, index1: usize, index2: usize) -> Result<f64> {
        let (o1, o2) = self.offset_pair(index1, index2)?;
        self.store()?.covariance(o1, o2)
    }

    /// Inverse covariance between two populated bins.
    pub fn inverse_covariance(&self, index1: usize, index2: usize) -> Result<f64> {
        let (o1, o2) = self.offset_pair(index1, index2)?;
        self.store()?.inverse_covariance(o1, o2)
    }

    /// Set the covariance between two populated bins.
    pub fn set_covariance(&mut self, index1: usize, index2: usize, value: f64) -> Result<()> {
        let (o1, o2) = self.offset_pair(index1, index2)?;
        self.covariance_matrix_mut()?.set_covariance(o1, o2, value)
    }

    /// Set the inverse covariance between two populated bins.
    pub fn set_inverse_covariance(&mut self, index1: usize, index2: usize, value: f64) -> Result<()> {
        let (o1, o2) = self.offset_pair(index1, index2)?;
        self.covariance_matrix_mut()?.set_inverse_covariance(o1, o2, value)
    }

    /// Replace zero diagonal elements of `which` with its sentinel.
    pub fn replace_zero_diagonal(&mut self, which: Representation) -> Result<usize> {
        self.covariance_matrix_mut()?.replace_zero_diagonal(which)
    }

    /// Synchronize the covariance and its inverse.
    pub fn invert_covariance(&mut self) -> Result<()> {
        match self.covariance.as_mut() {
            Some(store) => store.invert(),
            None => Err(Error::InvalidState("dataset has no covariance".to_string())),
        }
    }

    /// Freeze the covariance to sparse storage.
    pub fn compress(&mut self) {
        if let Some(store) = self.covariance.as_mut() {
            store.compress();
        }
    }

    /// Whether the covariance is frozen to sparse storage.
    pub fn is_compressed(&self) -> bool {
        self.covariance.as_ref().is_some_and(CovarianceMatrix::is_compressed)
    }

    /// `inverse_covariance . data`, in offset order.
    pub fn weighted_data(&self) -> Result<Vec<f64>> {
        let mut weighted = self.data.clone();
        self.store()?.multiply_by_inverse_covariance(&mut weighted)?;
        Ok(weighted)
    }

    /// Variance of the bin at `offset`.
    pub fn variance(&self, offset: usize) -> Result<f64> {
        self.store()?.covariance(offset, offset)
    }

    /// Chi-square of `predicted` (in offset order) against the data.
    pub fn chi_square(&self, predicted: &[f64]) -> Result<f64> {
        if predicted.len() != self.data.len() {
            return Err(Error::Validation(format!(
                "{} predictions for {} populated bins",
                predicted.len(),
                self.data.len()
            )));
        }
        let residual: Vec<f64> = self.data.iter().zip(predicted).map(|(d, p)| d - p).collect();
        self.store()?.chi_square(&residual)
    }

    fn compute_coordinates(&self, index: usize) -> Result<BinCoordinates> {
        let centers = self.axes.centers_of(index)?;
        let widths = self.axes.widths_of(index)?;
        Ok(self.transform.transform(centers, widths))
    }

    /// Co-moving coordinates of the bin at `offset`; cached from finalization on.
    pub fn coordinates(&self, offset: usize) -> Result<BinCoordinates> {
        if self.finalized || !self.coordinates.is_empty() {
            return self.coordinates.get(offset).copied().ok_or_else(|| {
                Error::OutOfRange(format!(
                    "offset {offset} outside {} populated bins",
                    self.coordinates.len()
                ))
            });
        }
        self.compute_coordinates(self.index_at_offset(offset)?)
    }

    /// Pair separation of the bin at `offset`, in Mpc/h.
    pub fn radius(&self, offset: usize) -> Result<f64> {
        Ok(self.coordinates(offset)?.radius)
    }

    /// Line-of-sight cosine of the bin at `offset`.
    pub fn cos_angle(&self, offset: usize) -> Result<f64> {
        Ok(self.coordinates(offset)?.cos_angle)
    }

    /// Mean pair redshift of the bin at `offset`.
    pub fn redshift(&self, offset: usize) -> Result<f64> {
        Ok(self.coordinates(offset)?.redshift)
    }

    /// Global indices of the populated bins that survive `cuts`.
    pub fn keep_set(&self, cuts: &FinalCuts) -> Result<BTreeSet<usize>> {
        let mut keep = BTreeSet::new();
        for (offset, &index) in self.index.iter().enumerate() {
            let radius = self.coordinates(offset)?.radius;
            let ll = self.axes.centers_of(index)?[0];
            if cuts.keeps(radius, ll) {
                keep.insert(index);
            }
        }
        Ok(keep)
    }

    /// Keep only the populated bins whose global index is in `keep`.
    ///
    /// Surviving bins keep their relative order and are renumbered from offset 0.
    /// The covariance is reduced to the surviving rows and columns.
    pub fn prune(&mut self, keep: &BTreeSet<usize>) -> Result<()> {
        if let Some(&missing) = keep.iter().find(|&&i| !self.offsets.contains_key(&i)) {
            return Err(Error::InvalidState(format!("cannot keep bin {missing}: it has no data")));
        }
        if keep.len() == self.index.len() {
            return Ok(());
        }
        log::info!("Pruning from {} to {} bins", self.index.len(), keep.len());
        let kept: Vec<usize> =
            (0..self.index.len()).filter(|&offset| keep.contains(&self.index[offset])).collect();
        if let Some(store) = self.covariance.as_ref() {
            self.covariance = Some(store.select(&kept)?);
        }
        self.index = kept.iter().map(|&o| self.index[o]).collect();
        self.data = kept.iter().map(|&o| self.data[o]).collect();
        if !self.coordinates.is_empty() {
            self.coordinates = kept.iter().map(|&o| self.coordinates[o]).collect();
        }
        self.offsets = self.index.iter().enumerate().map(|(offset, &index)| (index, offset)).collect();
        Ok(())
    }

    /// Apply the covariance fix (if any) and the final cuts, cache the co-moving
    /// coordinates of every surviving bin, and freeze the layout.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(Error::InvalidState("dataset is already finalized".to_string()));
        }
        if let Some(fix) = self.covariance_fix {
            let store = self.covariance_matrix_mut()?;
            let had_inverse = matches!(
                store.representation(),
                Some(Representation::InverseCovariance | Representation::Synchronized)
            );
            store.invert()?;
            self.fix_covariance(&fix)?;
            if had_inverse {
                self.invert_covariance()?;
            }
        }
        self.coordinates = (0..self.index.len())
            .map(|offset| self.compute_coordinates(self.index[offset]))
            .collect::<Result<Vec<_>>>()?;
        let keep = self.keep_set(&self.cuts)?;
        self.prune(&keep)?;
        self.finalized = true;
        Ok(())
    }

    /// Prune a finalized dataset to `cuts` and remember them.
    pub fn apply_cuts(&mut self, cuts: FinalCuts) -> Result<()> {
        let keep = self.keep_set(&cuts)?;
        self.prune(&keep)?;
        self.cuts = cuts;
        Ok(())
    }

    /// Drop all bins, values and covariance; the layout and policy remain.
    pub fn reset(&mut self) {
        self.index.clear();
        self.offsets.clear();
        self.data.clear();
        self.covariance = None;
        self.coordinates.clear();
        self.finalized = false;
    }
}
