//! Mapping from a bin's native coordinates to co-moving pair coordinates.

use std::fmt::Debug;
use std::sync::Arc;

use bao_core::HomogeneousUniverse;

/// Arc-minutes to radians.
pub const ARCMIN_TO_RAD: f64 = std::f64::consts::PI / (60.0 * 180.0);

/// Co-moving coordinates of one bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinCoordinates {
    /// Pair separation in Mpc/h.
    pub radius: f64,
    /// Cosine of the angle between the separation and the line of sight.
    pub cos_angle: f64,
    /// Mean pair redshift.
    pub redshift: f64,
}

/// Maps per-axis bin centers and widths to [`BinCoordinates`].
pub trait CoordinateTransform: Debug + Send + Sync {
    /// Co-moving coordinates of the bin with the given axis centers and widths.
    fn transform(&self, centers: [f64; 3], widths: [f64; 3]) -> BinCoordinates;
}

/// Quasar-pair layout: axes are (log wavelength ratio, separation in arcmin, redshift).
#[derive(Debug, Clone)]
pub struct QuasarTransform {
    universe: Arc<dyn HomogeneousUniverse>,
}

impl QuasarTransform {
    /// Transform using the given cosmology.
    pub fn new(universe: Arc<dyn HomogeneousUniverse>) -> Self {
        Self { universe }
    }

    /// Co-moving `(r, mu)` of a bin centered at `ll`, `sep` (width `dsep`) and redshift `z`.
    ///
    /// The transverse separation uses the area-weighted mean separation of the
    /// annulus, `sep + dsep^2 / (12 sep)`.
    pub fn radius_and_cos_angle(&self, ll: f64, sep: f64, dsep: f64, z: f64) -> (f64, f64) {
        let ratio = (0.5 * ll).exp();
        let zp1 = z + 1.0;
        let z1 = zp1 / ratio - 1.0;
        let z2 = zp1 * ratio - 1.0;
        let dr_los = self.universe.line_of_sight_comoving_distance(z2)
            - self.universe.line_of_sight_comoving_distance(z1);
        let swgt = sep + (dsep * dsep / 12.0) / sep;
        let dr_perp = self.universe.transverse_comoving_scale(z) * (swgt * ARCMIN_TO_RAD);
        let r = (dr_los * dr_los + dr_perp * dr_perp).sqrt();
        (r, dr_los.abs() / r)
    }
}

impl CoordinateTransform for QuasarTransform {
    fn transform(&self, centers: [f64; 3], widths: [f64; 3]) -> BinCoordinates {
        let [ll, sep, z] = centers;
        let (radius, cos_angle) = self.radius_and_cos_angle(ll, sep, widths[1], z);
        BinCoordinates { radius, cos_angle, redshift: z }
    }
}

/// Co-moving layout: axes already are (r, mu, z).
#[derive(Debug, Clone, Copy, Default)]
pub struct ComovingTransform;

impl CoordinateTransform for ComovingTransform {
    fn transform(&self, centers: [f64; 3], _widths: [f64; 3]) -> BinCoordinates {
        BinCoordinates { radius: centers[0], cos_angle: centers[1], redshift: centers[2] }
    }
}
