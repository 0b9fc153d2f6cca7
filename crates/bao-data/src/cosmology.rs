//! Flat Lambda-CDM cosmology with optional radiation.
//!
//! Distances are in Mpc/h, so the Hubble distance is `c / (100 km/s/Mpc)`.

use bao_core::{Error, HomogeneousUniverse, Result};

/// Speed of light over 100 km/s/Mpc, in Mpc/h.
pub const HUBBLE_DISTANCE: f64 = 2997.92458;

/// Simpson intervals per unit redshift (rounded up to an even count).
const INTERVALS_PER_UNIT_Z: f64 = 1000.0;
const MIN_INTERVALS: usize = 64;

/// Flat universe of matter, radiation and a cosmological constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambdaCdmUniverse {
    omega_matter: f64,
    omega_radiation: f64,
    omega_lambda: f64,
}

impl LambdaCdmUniverse {
    /// Flat universe with `omega_lambda = 1 - omega_matter - omega_radiation`.
    pub fn new(omega_matter: f64, omega_radiation: f64) -> Result<Self> {
        if !(omega_matter > 0.0 && omega_radiation >= 0.0 && omega_matter + omega_radiation <= 1.0)
        {
            return Err(Error::Validation(format!(
                "invalid density parameters: omega_matter={omega_matter}, omega_radiation={omega_radiation}"
            )));
        }
        Ok(Self {
            omega_matter,
            omega_radiation,
            omega_lambda: 1.0 - omega_matter - omega_radiation,
        })
    }

    /// Present-day matter density.
    pub fn omega_matter(&self) -> f64 {
        self.omega_matter
    }

    /// `H(z) / H0`.
    pub fn hubble_ratio(&self, z: f64) -> f64 {
        let zp1 = 1.0 + z;
        (self.omega_matter * zp1.powi(3) + self.omega_radiation * zp1.powi(4) + self.omega_lambda)
            .sqrt()
    }

    fn comoving_integral(&self, z: f64) -> f64 {
        if z == 0.0 {
            return 0.0;
        }
        let mut n = ((z.abs() * INTERVALS_PER_UNIT_Z).ceil() as usize).max(MIN_INTERVALS);
        n += n % 2;
        let h = z / n as f64;
        let f = |x: f64| 1.0 / self.hubble_ratio(x);
        let mut sum = f(0.0) + f(z);
        for k in 1..n {
            let weight = if k % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * f(k as f64 * h);
        }
        sum * h / 3.0
    }
}

impl HomogeneousUniverse for LambdaCdmUniverse {
    fn line_of_sight_comoving_distance(&self, z: f64) -> f64 {
        HUBBLE_DISTANCE * self.comoving_integral(z)
    }

    fn transverse_comoving_scale(&self, z: f64) -> f64 {
        self.line_of_sight_comoving_distance(z)
    }
}
