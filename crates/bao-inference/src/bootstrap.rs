//! Bootstrap resampling of plates.
//!
//! Each trial draws `size` plates with replacement, combines them with the
//! resulting repeat counts, and refits. Key design choices:
//! - Trial `k` draws from its own generator seeded with `seed + k`, so results do
//!   not depend on how trials are scheduled across threads.
//! - Every trial owns its aggregator; nothing mutable is shared.
//! - A trial whose combination cannot be inverted, or whose fit is invalid, is
//!   counted and skipped. Configuration errors abort the run.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use bao_core::{CorrelationModel, Error, Minimizer, Result};
use bao_data::{BinnedData, CombinedData, FinalCuts};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::likelihood::CorrelationLikelihood;

/// Bootstrap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Number of trials.
    pub trials: usize,
    /// Plates drawn per trial; 0 draws as many as there are plates.
    pub size: usize,
    /// Base seed.
    pub seed: u64,
    /// Apply the bootstrap covariance correction (otherwise use the naive covariance).
    pub fix_covariance: bool,
    /// Record the best-fit multipole curves of every trial.
    pub curves: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { trials: 0, size: 0, seed: 1966, fix_covariance: true, curves: false }
    }
}

/// Running weighted mean and spread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedAccumulator {
    count: usize,
    sum_weights: f64,
    mean: f64,
    m2: f64,
}

impl WeightedAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample with unit weight.
    pub fn accumulate(&mut self, value: f64) {
        self.accumulate_weighted(value, 1.0);
    }

    /// Add a sample with the given positive weight.
    pub fn accumulate_weighted(&mut self, value: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.count += 1;
        self.sum_weights += weight;
        let delta = value - self.mean;
        self.mean += delta * weight / self.sum_weights;
        self.m2 += weight * delta * (value - self.mean);
    }

    /// Number of samples.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Weighted mean, or NaN when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 { f64::NAN } else { self.mean }
    }

    /// Weighted population variance, or NaN when empty.
    pub fn variance(&self) -> f64 {
        if self.count == 0 { f64::NAN } else { self.m2 / self.sum_weights }
    }

    /// Spread of the samples (square root of the variance).
    pub fn error(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Outcome of one valid trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    /// Trial index.
    pub trial: usize,
    /// Number of distinct plates drawn.
    pub n_unique: usize,
    /// Best-fit parameter values.
    pub parameters: Vec<f64>,
    /// Minimum chi-square.
    pub chi_square: f64,
    /// Best-fit multipoles at each radius of the curve grid, when requested.
    pub curves: Option<Vec<[f64; 3]>>,
}

/// All trials of a bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapSummary {
    /// Model parameter names, in fit order.
    pub parameter_names: Vec<String>,
    /// Valid trials, ordered by trial index.
    pub trials: Vec<TrialResult>,
    /// Number of trials that were skipped.
    pub n_invalid: usize,
    /// Per-parameter statistics over valid trials.
    pub parameters: Vec<WeightedAccumulator>,
    /// Minimum chi-square statistics over valid trials.
    pub chi_square: WeightedAccumulator,
    /// Radii of the curve grid (empty unless curves were requested).
    pub curve_radii: Vec<f64>,
}

impl BootstrapSummary {
    /// One line per valid trial: `trial nuniq <parameters...> chisq`, after a header.
    pub fn write_trials(&self, mut out: impl Write) -> Result<()> {
        writeln!(out, "trial nuniq {} chisq", self.parameter_names.join(" "))?;
        for t in &self.trials {
            write!(out, "{} {}", t.trial, t.n_unique)?;
            for p in &t.parameters {
                write!(out, " {p}")?;
            }
            writeln!(out, " {}", t.chi_square)?;
        }
        Ok(())
    }

    /// One line per valid trial with the three multipoles at every curve radius.
    pub fn write_curves(&self, mut out: impl Write) -> Result<()> {
        for t in &self.trials {
            let Some(curves) = &t.curves else {
                continue;
            };
            for xi in curves {
                write!(out, " {:.3e} {:.3e} {:.3e}", xi[0], xi[1], xi[2])?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Repeat count of each of `n_plates` plates after `size` draws with replacement.
pub fn draw_repeats(n_plates: usize, size: usize, seed: u64) -> Vec<u32> {
    let mut counts = vec![0u32; n_plates];
    if n_plates == 0 {
        return counts;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..size {
        let u: f64 = rng.random();
        let index = ((u * n_plates as f64).floor() as usize).min(n_plates - 1);
        counts[index] += 1;
    }
    counts
}

/// Radii from `rmin` to `rmax` in 1 Mpc/h steps.
fn curve_grid(rmin: f64, rmax: f64) -> Vec<f64> {
    let n = 1 + ((rmax - rmin) / 1.0).floor() as usize;
    (0..n).map(|i| rmin + i as f64).collect()
}

/// Runs bootstrap trials over a fixed set of finalized plates.
pub struct BootstrapDriver<'a> {
    plates: &'a [BinnedData],
    model: &'a dyn CorrelationModel,
    minimizer: &'a dyn Minimizer,
    cuts: Option<FinalCuts>,
}

impl<'a> BootstrapDriver<'a> {
    /// Driver over `plates` fitting `model` with `minimizer`.
    pub fn new(
        plates: &'a [BinnedData],
        model: &'a dyn CorrelationModel,
        minimizer: &'a dyn Minimizer,
    ) -> Self {
        Self { plates, model, minimizer, cuts: None }
    }

    /// Prune every combined trial to `rmin <= r < rmax`, `ll >= ll_min`.
    pub fn with_cuts(mut self, rmin: f64, rmax: f64, ll_min: f64) -> Result<Self> {
        self.cuts = Some(FinalCuts::new(rmin, rmax, Some(ll_min))?);
        Ok(self)
    }

    fn curve_radii(&self, config: &BootstrapConfig) -> Result<Vec<f64>> {
        if !config.curves {
            return Ok(Vec::new());
        }
        if self.model.multipoles().is_none() {
            return Err(Error::Validation(
                "bootstrap curves need a model that evaluates multipoles".to_string(),
            ));
        }
        let cuts = match self.cuts {
            Some(cuts) => cuts,
            None => *self.plates[0].final_cuts(),
        };
        if !(cuts.rmin.is_finite() && cuts.rmax.is_finite()) {
            return Err(Error::Validation(
                "bootstrap curves need finite radius cuts".to_string(),
            ));
        }
        Ok(curve_grid(cuts.rmin, cuts.rmax))
    }

    /// Combine, finalize and fit one trial. `Ok(None)` marks an invalid trial.
    fn run_trial(
        &self,
        trial: usize,
        config: &BootstrapConfig,
        size: usize,
        radii: &[f64],
    ) -> Result<Option<TrialResult>> {
        let repeats = draw_repeats(self.plates.len(), size, config.seed.wrapping_add(trial as u64));
        let n_unique = repeats.iter().filter(|&&r| r > 0).count();

        let mut combined = CombinedData::new();
        if let Some(cuts) = self.cuts {
            combined.prune(cuts.rmin, cuts.rmax, cuts.ll_min.unwrap_or(f64::NEG_INFINITY))?;
        }
        for (plate, &repeat) in self.plates.iter().zip(&repeats) {
            if repeat > 0 {
                combined.add(plate, repeat)?;
            }
        }
        match combined.finalize(config.fix_covariance) {
            Ok(()) => {}
            Err(e @ (Error::NotPositiveDefinite(_) | Error::Computation(_))) => {
                log::warn!("Bootstrap trial {trial}: combination failed: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let likelihood = CorrelationLikelihood::new(combined.result()?, self.model)?;
        let fit = match likelihood.fit(self.minimizer) {
            Ok(fit) if fit.valid => fit,
            Ok(_) => {
                log::warn!("Bootstrap trial {trial}: fit did not converge");
                return Ok(None);
            }
            Err(e @ (Error::NotPositiveDefinite(_) | Error::Computation(_))) => {
                log::warn!("Bootstrap trial {trial}: fit failed: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let curves = self.model.multipoles().filter(|_| config.curves).map(|multipoles| {
            radii.iter().map(|&r| multipoles.evaluate_multipoles(r, &fit.parameters)).collect()
        });
        log::debug!("Bootstrap trial {trial}: {n_unique} plates, chi2 = {:.4}", fit.chi_square());
        Ok(Some(TrialResult {
            trial,
            n_unique,
            chi_square: fit.chi_square(),
            parameters: fit.parameters,
            curves,
        }))
    }

    /// Run `config.trials` trials in parallel.
    pub fn run(&self, config: &BootstrapConfig) -> Result<BootstrapSummary> {
        if self.plates.is_empty() {
            return Err(Error::Validation("bootstrap needs at least one plate".to_string()));
        }
        let radii = self.curve_radii(config)?;
        let size = if config.size == 0 { self.plates.len() } else { config.size };
        log::info!(
            "Running {} bootstrap trials of {size} draws from {} plates",
            config.trials,
            self.plates.len()
        );

        let completed = AtomicUsize::new(0);
        let invalid = AtomicUsize::new(0);
        let outcomes: Vec<Option<TrialResult>> = (0..config.trials)
            .into_par_iter()
            .map(|trial| {
                let outcome = self.run_trial(trial, config, size, &radii)?;
                if outcome.is_none() {
                    invalid.fetch_add(1, Ordering::Relaxed);
                }
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 10 == 0 {
                    log::info!(
                        "Completed {done} bootstrap trials ({} invalid)",
                        invalid.load(Ordering::Relaxed)
                    );
                }
                Ok(outcome)
            })
            .collect::<Result<Vec<_>>>()?;

        let parameter_names: Vec<String> =
            self.model.parameters().into_iter().map(|p| p.name).collect();
        let mut parameters = vec![WeightedAccumulator::new(); parameter_names.len()];
        let mut chi_square = WeightedAccumulator::new();
        let n_invalid = outcomes.iter().filter(|o| o.is_none()).count();
        let mut trials: Vec<TrialResult> = outcomes.into_iter().flatten().collect();
        trials.sort_by_key(|t| t.trial);
        for t in &trials {
            for (acc, &value) in parameters.iter_mut().zip(&t.parameters) {
                acc.accumulate(value);
            }
            chi_square.accumulate(t.chi_square);
        }
        for (name, acc) in parameter_names.iter().zip(&parameters) {
            log::info!("{name} = {:.6} +/- {:.6}", acc.mean(), acc.error());
        }
        log::info!(
            "minChiSq = {:.4} +/- {:.4} ({n_invalid} invalid trials)",
            chi_square.mean(),
            chi_square.error()
        );

        Ok(BootstrapSummary {
            parameter_names,
            trials,
            n_invalid,
            parameters,
            chi_square,
            curve_radii: radii,
        })
    }
}
