//! Three-axis bin index.
//!
//! A global index encodes per-axis bin indices `(i1, i2, i3)` row-major with the
//! third axis varying fastest: `index = (i1 * n2 + i2) * n3 + i3`.

use bao_core::{Error, Result};

use crate::binning::Binning;

/// Three binnings composed into one flattened index space.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedAxes {
    axes: [Binning; 3],
}

impl BinnedAxes {
    /// Compose three axes.
    pub fn new(axis1: Binning, axis2: Binning, axis3: Binning) -> Self {
        Self { axes: [axis1, axis2, axis3] }
    }

    /// The binning of axis `k` (0, 1 or 2).
    pub fn axis(&self, k: usize) -> &Binning {
        &self.axes[k]
    }

    /// Number of bins along each axis.
    pub fn shape(&self) -> [usize; 3] {
        [self.axes[0].n_bins(), self.axes[1].n_bins(), self.axes[2].n_bins()]
    }

    /// Total number of bins, `n1 * n2 * n3`.
    pub fn n_bins_total(&self) -> usize {
        self.shape().iter().product()
    }

    /// Global index of per-axis bin indices.
    pub fn encode(&self, bins: [usize; 3]) -> Result<usize> {
        let [n1, n2, n3] = self.shape();
        if bins[0] >= n1 || bins[1] >= n2 || bins[2] >= n3 {
            return Err(Error::OutOfRange(format!(
                "axis bins {bins:?} outside shape [{n1}, {n2}, {n3}]"
            )));
        }
        Ok((bins[0] * n2 + bins[1]) * n3 + bins[2])
    }

    /// Per-axis bin indices of a global index.
    pub fn decode(&self, index: usize) -> Result<[usize; 3]> {
        let [_, n2, n3] = self.shape();
        if index >= self.n_bins_total() {
            return Err(Error::OutOfRange(format!(
                "global index {index} outside [0, {})",
                self.n_bins_total()
            )));
        }
        Ok([index / (n2 * n3), (index / n3) % n2, index % n3])
    }

    /// Global index of the bin containing the given coordinates.
    pub fn index_of(&self, values: [f64; 3]) -> Result<usize> {
        self.encode([
            self.axes[0].bin_index(values[0])?,
            self.axes[1].bin_index(values[1])?,
            self.axes[2].bin_index(values[2])?,
        ])
    }

    /// Bin centers along each axis for a global index.
    pub fn centers_of(&self, index: usize) -> Result<[f64; 3]> {
        let bins = self.decode(index)?;
        Ok([
            self.axes[0].bin_center(bins[0]),
            self.axes[1].bin_center(bins[1]),
            self.axes[2].bin_center(bins[2]),
        ])
    }

    /// Bin widths along each axis for a global index.
    pub fn widths_of(&self, index: usize) -> Result<[f64; 3]> {
        let bins = self.decode(index)?;
        Ok([
            self.axes[0].bin_width(bins[0]),
            self.axes[1].bin_width(bins[1]),
            self.axes[2].bin_width(bins[2]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes() -> BinnedAxes {
        BinnedAxes::new(
            Binning::two_step(5, 0.1, 0.02, 0.05).unwrap(),
            Binning::uniform(0.0, 200.0, 2).unwrap(),
            Binning::uniform_sampling(1.7, 2.7, 2).unwrap(),
        )
    }

    #[test]
    fn encode_decode_is_a_bijection() {
        let axes = axes();
        let [n1, n2, n3] = axes.shape();
        let mut seen = vec![false; axes.n_bins_total()];
        for i1 in 0..n1 {
            for i2 in 0..n2 {
                for i3 in 0..n3 {
                    let index = axes.encode([i1, i2, i3]).unwrap();
                    assert!(!seen[index]);
                    seen[index] = true;
                    assert_eq!(axes.decode(index).unwrap(), [i1, i2, i3]);
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn third_axis_varies_fastest() {
        let axes = axes();
        assert_eq!(axes.encode([0, 0, 1]).unwrap(), 1);
        assert_eq!(axes.encode([0, 1, 0]).unwrap(), 2);
        assert_eq!(axes.encode([1, 0, 0]).unwrap(), 4);
    }

    #[test]
    fn out_of_range_axis_index_is_rejected() {
        let axes = axes();
        assert!(matches!(axes.encode([5, 0, 0]), Err(Error::OutOfRange(_))));
        assert!(matches!(axes.decode(20), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn index_of_bin_centers() {
        let axes = axes();
        for index in 0..axes.n_bins_total() {
            let centers = axes.centers_of(index).unwrap();
            assert_eq!(axes.index_of(centers).unwrap(), index);
        }
        assert_eq!(axes.widths_of(0).unwrap()[1], 100.0);
    }
}
