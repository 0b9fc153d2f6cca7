//! One-dimensional binning of a continuous coordinate.
//!
//! Two families are supported:
//! - fixed-width bins over `[low, high)`,
//! - sampled axes, where each bin is centered on a sample point and its edges
//!   sit halfway between neighbouring samples.
//!
//! The hybrid linear-then-logarithmic wavelength-ratio axis is a sampled axis
//! built by [`Binning::two_step`].

use bao_core::{Error, Result};

/// Tolerance used to match the single point of a one-point sampling.
pub const SAMPLE_TOLERANCE: f64 = 1e-6;

/// Binning of one axis. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Binning {
    /// `n_bins` equal-width bins covering `[low, high)`.
    Uniform {
        /// Low edge of the first bin.
        low: f64,
        /// High edge of the last bin.
        high: f64,
        /// Number of bins.
        n_bins: usize,
    },
    /// Bins centered on strictly increasing sample points.
    Sampled {
        /// Bin centers.
        points: Vec<f64>,
    },
}

impl Binning {
    /// Fixed-width binning of `[low, high)` into `n_bins` bins.
    pub fn uniform(low: f64, high: f64, n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Validation("uniform binning needs at least one bin".to_string()));
        }
        if !(low.is_finite() && high.is_finite() && high > low) {
            return Err(Error::Validation(format!(
                "uniform binning needs finite low < high, got [{low}, {high})"
            )));
        }
        Ok(Self::Uniform { low, high, n_bins })
    }

    /// `n_samples` evenly spaced sample points from `first` to `last` inclusive.
    pub fn uniform_sampling(first: f64, last: f64, n_samples: usize) -> Result<Self> {
        match n_samples {
            0 => Err(Error::Validation("sampling needs at least one point".to_string())),
            1 => {
                if first != last {
                    return Err(Error::Validation(format!(
                        "single-point sampling needs first == last, got {first} and {last}"
                    )));
                }
                Self::sampled(vec![first])
            }
            n => {
                let step = (last - first) / (n - 1) as f64;
                Self::sampled((0..n).map(|k| first + k as f64 * step).collect())
            }
        }
    }

    /// Bins centered on the given sample points.
    pub fn sampled(points: Vec<f64>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Validation("sampling needs at least one point".to_string()));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(Error::Validation("sample points must be finite".to_string()));
        }
        if points.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation("sample points must be strictly increasing".to_string()));
        }
        Ok(Self::Sampled { points })
    }

    /// Hybrid linear-then-logarithmic sampling of the wavelength-ratio axis.
    ///
    /// The first sample is at zero. Then `floor(breakpoint / dlin)` samples at
    /// `(k - 0.5) * dlin`, followed by samples at `breakpoint * exp(ratio * (k - 0.5))`
    /// with `ratio = ln((breakpoint + dlog) / breakpoint)` until `n_bins` samples exist.
    pub fn two_step(n_bins: usize, breakpoint: f64, dlog: f64, dlin: f64) -> Result<Self> {
        if !(breakpoint > 0.0 && dlog > 0.0 && dlin > 0.0) {
            return Err(Error::Validation(format!(
                "two-step binning needs positive breakpoint, dlog, dlin; got {breakpoint}, {dlog}, {dlin}"
            )));
        }
        let n_uniform = (breakpoint / dlin).floor() as usize;
        let mut points = Vec::with_capacity(n_bins.max(n_uniform + 1));
        points.push(0.0);
        for k in 1..=n_uniform {
            points.push((k as f64 - 0.5) * dlin);
        }
        let ratio = ((breakpoint + dlog) / breakpoint).ln();
        for k in 1..n_bins.saturating_sub(n_uniform) {
            points.push(breakpoint * (ratio * (k as f64 - 0.5)).exp());
        }
        Self::sampled(points)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        match self {
            Self::Uniform { n_bins, .. } => *n_bins,
            Self::Sampled { points } => points.len(),
        }
    }

    /// Index of the bin containing `x`.
    pub fn bin_index(&self, x: f64) -> Result<usize> {
        match self {
            Self::Uniform { low, high, n_bins } => {
                if !(x >= *low && x < *high) {
                    return Err(Error::OutOfRange(format!(
                        "{x} outside uniform binning [{low}, {high})"
                    )));
                }
                let mut index = (((x - low) / (high - low) * *n_bins as f64).floor() as usize).min(n_bins - 1);
                // Settle against the edge formula so edges map to the bin they open.
                while index > 0 && x < self.bin_low_edge(index) {
                    index -= 1;
                }
                while index + 1 < *n_bins && x >= self.bin_high_edge(index) {
                    index += 1;
                }
                Ok(index)
            }
            Self::Sampled { points } => {
                if points.len() == 1 {
                    return if (x - points[0]).abs() <= SAMPLE_TOLERANCE {
                        Ok(0)
                    } else {
                        Err(Error::OutOfRange(format!(
                            "{x} does not match the single sample point {}",
                            points[0]
                        )))
                    };
                }
                let n = points.len();
                if !(x >= self.bin_low_edge(0) && x < self.bin_high_edge(n - 1)) {
                    return Err(Error::OutOfRange(format!(
                        "{x} outside sampled binning [{}, {})",
                        self.bin_low_edge(0),
                        self.bin_high_edge(n - 1)
                    )));
                }
                // Number of interior edges at or below x.
                Ok(points.windows(2).take_while(|w| 0.5 * (w[0] + w[1]) <= x).count())
            }
        }
    }

    /// Center of bin `index`.
    pub fn bin_center(&self, index: usize) -> f64 {
        match self {
            Self::Uniform { .. } => 0.5 * (self.bin_low_edge(index) + self.bin_high_edge(index)),
            Self::Sampled { points } => points[index],
        }
    }

    /// Full width of bin `index`.
    pub fn bin_width(&self, index: usize) -> f64 {
        self.bin_high_edge(index) - self.bin_low_edge(index)
    }

    /// Low edge of bin `index`.
    pub fn bin_low_edge(&self, index: usize) -> f64 {
        match self {
            Self::Uniform { low, high, n_bins } => low + (high - low) * index as f64 / *n_bins as f64,
            Self::Sampled { points } => match (index, points.len()) {
                (_, 1) => points[0],
                (0, _) => points[0] - 0.5 * (points[1] - points[0]),
                (i, _) => 0.5 * (points[i - 1] + points[i]),
            },
        }
    }

    /// High edge of bin `index`.
    pub fn bin_high_edge(&self, index: usize) -> f64 {
        match self {
            Self::Uniform { low, high, n_bins } => {
                if index + 1 == *n_bins {
                    *high
                } else {
                    low + (high - low) * (index + 1) as f64 / *n_bins as f64
                }
            }
            Self::Sampled { points } => {
                let n = points.len();
                match index {
                    _ if n == 1 => points[0],
                    i if i + 1 == n => points[i] + 0.5 * (points[i] - points[i - 1]),
                    i => 0.5 * (points[i] + points[i + 1]),
                }
            }
        }
    }
}
