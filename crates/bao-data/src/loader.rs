//! Reader for cosmolib-format correlation files.
//!
//! A dataset `<base>` is a pair of text files:
//!
//! - `<base>.params`: one populated bin per line,
//!   `value weighted | Lya covariance 3D (ll,sep,z)`;
//! - `<base>.cov` (or `<base>.icov`): one stored element per line,
//!   `offset1 offset2 value`, where offsets count bins in `.params` order.
//!
//! `.icov` values are stored with the opposite sign and are negated on read.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use bao_core::{Error, Result};

use crate::binned::BinnedData;
use crate::covariance::Representation;

/// Words of the `.params` tag preceding the parenthesised bin coordinates.
const PARAMS_TAG: [&str; 3] = ["Lya", "covariance", "3D"];

/// How to read a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Read `<base>.icov` instead of `<base>.cov`.
    pub inverse: bool,
    /// Take the second `.params` column (inverse-covariance weighted data) and
    /// unweight it with the loaded covariance.
    pub weighted: bool,
    /// Trial-invert the covariance after loading and only log a failure.
    ///
    /// Without it, a `.cov` plate whose covariance cannot be inverted fails to load.
    pub check_positive_definite: bool,
}

fn with_extension(base: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(extension);
    PathBuf::from(name)
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Open { path: path.to_path_buf(), source })
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::Parse { path: path.to_path_buf(), line, message: message.into() }
}

fn parse_number<T: std::str::FromStr>(token: &str, path: &Path, line: usize, what: &str) -> Result<T> {
    token
        .trim()
        .parse()
        .map_err(|_| parse_error(path, line, format!("expected {what}, got {:?}", token.trim())))
}

/// One `.params` line: `(value, weighted, [ll, sep, z])`.
fn parse_params_line(text: &str, path: &Path, line: usize) -> Result<(f64, f64, [f64; 3])> {
    let (values, tag) = text
        .split_once('|')
        .ok_or_else(|| parse_error(path, line, "missing '|' separator"))?;
    let values: Vec<&str> = values.split_whitespace().collect();
    let [value, weighted] = values.as_slice() else {
        return Err(parse_error(path, line, format!("expected 2 values, got {}", values.len())));
    };
    let coordinates = tag
        .split_once('(')
        .filter(|(label, _)| label.split_whitespace().eq(PARAMS_TAG))
        .and_then(|(_, rest)| rest.trim_end().strip_suffix(')'))
        .ok_or_else(|| {
            parse_error(path, line, format!("expected '{} (ll,sep,z)'", PARAMS_TAG.join(" ")))
        })?;
    let coordinates: Vec<&str> = coordinates.split(',').collect();
    let [ll, sep, z] = coordinates.as_slice() else {
        return Err(parse_error(
            path,
            line,
            format!("expected 3 bin coordinates, got {}", coordinates.len()),
        ));
    };
    Ok((
        parse_number(value, path, line, "a data value")?,
        parse_number(weighted, path, line, "a weighted data value")?,
        [
            parse_number(ll, path, line, "a coordinate")?,
            parse_number(sep, path, line, "a coordinate")?,
            parse_number(z, path, line, "a coordinate")?,
        ],
    ))
}

/// One `.cov` line: `(offset1, offset2, value)`.
fn parse_covariance_line(text: &str, path: &Path, line: usize) -> Result<(usize, usize, f64)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let [o1, o2, value] = tokens.as_slice() else {
        return Err(parse_error(path, line, format!("expected 3 tokens, got {}", tokens.len())));
    };
    Ok((
        parse_number(o1, path, line, "an offset")?,
        parse_number(o2, path, line, "an offset")?,
        parse_number(value, path, line, "a covariance value")?,
    ))
}

/// Load the dataset `<base>` into a copy of `prototype`'s layout.
///
/// Zero diagonal elements are replaced with sentinels. The result is finalized
/// (so the prototype's covariance fix and cuts apply), holds its inverse
/// covariance whenever that exists, and is compressed.
pub fn load_cosmolib(base: &Path, prototype: &BinnedData, options: &LoadOptions) -> Result<BinnedData> {
    let mut data = prototype.clone_binning_only();

    let params_path = with_extension(base, ".params");
    let text = read_file(&params_path)?;
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let (value, weighted, coordinates) = parse_params_line(raw, &params_path, line)?;
        let index = data
            .axes()
            .index_of(coordinates)
            .map_err(|e| parse_error(&params_path, line, e.to_string()))?;
        data.set_data(index, if options.weighted { weighted } else { value })
            .map_err(|e| parse_error(&params_path, line, e.to_string()))?;
    }
    log::info!(
        "Read {} of {} data values from {}",
        data.n_bins_with_data(),
        data.n_bins_total(),
        params_path.display()
    );

    let covariance_path = with_extension(base, if options.inverse { ".icov" } else { ".cov" });
    let text = read_file(&covariance_path)?;
    let n = data.n_bins_with_data();
    let mut n_read = 0usize;
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let (o1, o2, value) = parse_covariance_line(raw, &covariance_path, line)?;
        if o1 >= n || o2 >= n {
            return Err(parse_error(
                &covariance_path,
                line,
                format!("offset pair ({o1}, {o2}) outside {n} populated bins"),
            ));
        }
        let (index1, index2) = (data.index_at_offset(o1)?, data.index_at_offset(o2)?);
        let written = if options.inverse {
            data.set_inverse_covariance(index1, index2, -value)
        } else {
            data.set_covariance(index1, index2, value)
        };
        written.map_err(|e| parse_error(&covariance_path, line, e.to_string()))?;
        n_read += 1;
    }
    log::info!(
        "Read {n_read} of {} covariance values from {}",
        n * (n + 1) / 2,
        covariance_path.display()
    );

    let which =
        if options.inverse { Representation::InverseCovariance } else { Representation::Covariance };
    let replaced = data.replace_zero_diagonal(which)?;
    if replaced > 0 {
        log::debug!("Replaced {replaced} zero diagonal elements in {}", covariance_path.display());
    }

    if options.weighted {
        data.invert_covariance()?;
        let mut values = data.values().to_vec();
        if let Some(store) = data.covariance_matrix() {
            store.multiply_by_covariance(&mut values)?;
        }
        data.set_values(values)?;
    }

    data.finalize()?;
    // Combination reads the inverse, so covariance-only plates are inverted once here.
    let covariance_only =
        data.covariance_matrix().and_then(|store| store.representation()) == Some(Representation::Covariance);
    if covariance_only || options.check_positive_definite {
        match data.invert_covariance() {
            Ok(()) => {}
            Err(e) if options.check_positive_definite => {
                log::warn!("Covariance not positive-definite: {}: {e}", covariance_path.display());
            }
            Err(e) => return Err(e),
        }
    }
    data.compress();
    Ok(data)
}

/// Base paths of the plates named in `<root>/<list>`.
///
/// Plate names are whitespace separated and resolved against `root`.
/// `max_plates == 0` reads them all.
pub fn load_plate_list(root: &Path, list: &Path, max_plates: usize) -> Result<Vec<PathBuf>> {
    let list_path = root.join(list);
    let text = read_file(&list_path)?;
    let limit = if max_plates == 0 { usize::MAX } else { max_plates };
    let plates: Vec<PathBuf> = text.split_whitespace().take(limit).map(|name| root.join(name)).collect();
    log::info!("Will read {} plates from {}", plates.len(), list_path.display());
    Ok(plates)
}

/// Load every plate in `plates` with the same options.
pub fn load_plates(plates: &[PathBuf], prototype: &BinnedData, options: &LoadOptions) -> Result<Vec<BinnedData>> {
    plates.iter().map(|base| load_cosmolib(base, prototype, options)).collect()
}
