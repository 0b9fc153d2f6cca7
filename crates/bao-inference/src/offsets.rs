//! Null-hypothesis theory offsets.
//!
//! To simulate data without a feature, each plate's values are shifted by the
//! difference between the best-fit model with that feature switched off and the
//! best-fit model itself.

use bao_core::{CorrelationModel, Error, Result};
use bao_data::BinnedData;

/// Add `model(null) - model(best)` to every populated bin of every plate.
pub fn apply_theory_offsets(
    plates: &mut [BinnedData],
    model: &dyn CorrelationModel,
    best: &[f64],
    null: &[f64],
) -> Result<()> {
    if best.len() != null.len() {
        return Err(Error::Validation(format!(
            "best-fit and null parameters differ in length ({} vs {})",
            best.len(),
            null.len()
        )));
    }
    for plate in plates.iter_mut() {
        for offset in 0..plate.n_bins_with_data() {
            let c = plate.coordinates(offset)?;
            let delta = model.evaluate(c.radius, c.cos_angle, c.redshift, null)
                - model.evaluate(c.radius, c.cos_angle, c.redshift, best);
            plate.shift_data_at(offset, delta)?;
        }
    }
    log::info!("Applied null-hypothesis theory offsets to {} plates", plates.len());
    Ok(())
}
