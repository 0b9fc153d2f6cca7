//! # bao-data
//!
//! Binned correlation data for baofit.
//!
//! This crate provides:
//! - Binnings and the three-axis bin index
//! - A packed symmetric covariance store holding a covariance, its inverse, or both
//! - Sparse binned datasets with pruning and finalization
//! - The (log-lambda, separation, redshift) to (r, mu, z) coordinate transform
//! - Inverse-covariance weighted plate combination with the bootstrap correction
//! - The cosmolib file loader and the analysis configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Three-axis bin index.
pub mod axes;
/// Sparse binned dataset.
pub mod binned;
/// One-dimensional binnings.
pub mod binning;
/// Plate combination and bootstrap covariance correction.
pub mod combine;
/// JSON analysis configuration.
pub mod config;
/// Flat Lambda-CDM background.
pub mod cosmology;
/// Symmetric covariance store.
pub mod covariance;
/// Large-scale covariance correction.
pub mod covariance_fix;
/// cosmolib file reader.
pub mod loader;
/// Bin-center coordinate transforms.
pub mod transform;

pub use axes::BinnedAxes;
pub use binned::{BinnedData, FinalCuts};
pub use binning::Binning;
pub use combine::CombinedData;
pub use config::AnalysisConfig;
pub use cosmology::LambdaCdmUniverse;
pub use covariance::{CovarianceMatrix, Representation};
pub use covariance_fix::CovarianceFix;
pub use loader::{LoadOptions, load_cosmolib, load_plate_list, load_plates};
pub use transform::{BinCoordinates, ComovingTransform, CoordinateTransform, QuasarTransform};
