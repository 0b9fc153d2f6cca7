//! Load synthetic cosmolib plates from disk and combine them.
//!
//! Covers:
//! - two plates with unit diagonal inverse covariance on a two-step ll axis
//! - inverse-variance weighted averaging across plates
//! - single-plate combination identity
//! - loader error reporting (missing file, malformed line, bad offset)
//! - plates read from `.cov` files, inverted on load
//! - positive-definiteness check that warns without failing

use std::path::{Path, PathBuf};
use std::sync::Arc;

use approx::assert_relative_eq;
use bao_core::Error;
use bao_data::{
    BinnedAxes, BinnedData, Binning, CombinedData, LambdaCdmUniverse, LoadOptions, QuasarTransform,
    Representation, load_cosmolib, load_plate_list, load_plates,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fresh directory under the system temp dir for one test.
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("baofit-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

/// ll: two-step (0, 0.025, 0.075, ...), sep: [0, 100), [100, 200), z: 2.0.
fn prototype() -> BinnedData {
    let axes = BinnedAxes::new(
        Binning::two_step(5, 0.1, 0.02, 0.05).unwrap(),
        Binning::uniform(0.0, 200.0, 2).unwrap(),
        Binning::uniform_sampling(2.0, 2.0, 1).unwrap(),
    );
    let universe = LambdaCdmUniverse::new(0.27, 0.0).unwrap();
    BinnedData::new(Arc::new(axes), Arc::new(QuasarTransform::new(Arc::new(universe))))
}

const BINS: [(f64, f64); 3] = [(0.025, 50.0), (0.075, 50.0), (0.025, 150.0)];

/// Write `<dir>/<name>.params` and `<dir>/<name>.icov` with a diagonal inverse covariance.
fn write_plate(dir: &Path, name: &str, values: [f64; 3], inverse_variances: [f64; 3]) -> PathBuf {
    let base = dir.join(name);
    let params: String = BINS
        .iter()
        .zip(values)
        .map(|(&(ll, sep), v)| format!("{v} 0 | Lya covariance 3D ({ll},{sep},2.0)\n"))
        .collect();
    write(&base.with_extension("params"), &params);
    // Stored with the opposite sign.
    let icov: String =
        inverse_variances.iter().enumerate().map(|(i, w)| format!("{i} {i} {}\n", -w)).collect();
    write(&base.with_extension("icov"), &icov);
    base
}

fn inverse() -> LoadOptions {
    LoadOptions { inverse: true, ..LoadOptions::default() }
}

// ---------------------------------------------------------------------------
// Combination
// ---------------------------------------------------------------------------

#[test]
fn two_unit_plates_combine_to_the_average() {
    let dir = scratch_dir("two-unit");
    let a = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    let b = write_plate(&dir, "b", [3.0, 2.0, 5.0], [1.0, 1.0, 1.0]);
    let plates = load_plates(&[a, b], &prototype(), &inverse()).unwrap();
    assert!(plates[0].is_compressed());
    assert_eq!(plates[0].n_bins_with_data(), 3);

    let mut combined = CombinedData::new();
    for plate in &plates {
        combined.add(plate, 1).unwrap();
    }
    combined.finalize(false).unwrap();
    let result = combined.result().unwrap();
    for (offset, expected) in [2.0, 2.0, 4.0].into_iter().enumerate() {
        let index = result.index_at_offset(offset).unwrap();
        assert_relative_eq!(result.inverse_covariance(index, index).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(combined.data(offset).unwrap(), expected, epsilon = 1e-12);
        assert_relative_eq!(combined.variance(offset).unwrap(), 0.5, epsilon = 1e-12);
    }
    let i0 = result.index_at_offset(0).unwrap();
    let i1 = result.index_at_offset(1).unwrap();
    assert_eq!(result.inverse_covariance(i0, i1).unwrap(), 0.0);
}

#[test]
fn plates_are_weighted_by_inverse_variance() {
    let dir = scratch_dir("weighted");
    let a = write_plate(&dir, "a", [1.0, 1.0, 1.0], [3.0, 1.0, 0.5]);
    let b = write_plate(&dir, "b", [5.0, 5.0, 5.0], [1.0, 1.0, 1.5]);
    let plates = load_plates(&[a, b], &prototype(), &inverse()).unwrap();
    let mut combined = CombinedData::new();
    combined.add(&plates[0], 1).unwrap();
    combined.add(&plates[1], 1).unwrap();
    combined.finalize(false).unwrap();
    assert_relative_eq!(combined.data(0).unwrap(), 2.0, epsilon = 1e-12);
    assert_relative_eq!(combined.data(1).unwrap(), 3.0, epsilon = 1e-12);
    assert_relative_eq!(combined.data(2).unwrap(), 4.0, epsilon = 1e-12);
}

#[test]
fn single_plate_combination_is_identity() {
    let dir = scratch_dir("identity");
    let a = write_plate(&dir, "a", [0.5, -1.0, 2.0], [2.0, 4.0, 8.0]);
    let plate = load_cosmolib(&a, &prototype(), &inverse()).unwrap();
    let mut combined = CombinedData::new();
    combined.add(&plate, 1).unwrap();
    combined.finalize(false).unwrap();
    for offset in 0..3 {
        assert_relative_eq!(combined.data(offset).unwrap(), plate.data_at(offset).unwrap(), epsilon = 1e-12);
        assert_relative_eq!(combined.radius(offset).unwrap(), plate.radius(offset).unwrap());
        assert_relative_eq!(combined.cos_angle(offset).unwrap(), plate.cos_angle(offset).unwrap());
    }
    assert_relative_eq!(combined.variance(2).unwrap(), 0.125, epsilon = 1e-12);
}

#[test]
fn bootstrap_repeat_changes_the_variance() {
    let dir = scratch_dir("repeat");
    let a = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 2.0, 1.0]);
    let plate = load_cosmolib(&a, &prototype(), &inverse()).unwrap();
    let mut combined = CombinedData::new();
    combined.add(&plate, 2).unwrap();
    combined.finalize(false).unwrap();
    let naive = combined.variance(0).unwrap();
    combined.reset();
    combined.add(&plate, 2).unwrap();
    combined.finalize(true).unwrap();
    let corrected = combined.variance(0).unwrap();
    // T = 2 icov, N = 4 icov: naive 1/2, corrected N/T^2 = 1.
    assert_relative_eq!(naive, 0.5, epsilon = 1e-12);
    assert_relative_eq!(corrected, 1.0, epsilon = 1e-12);
    assert_relative_eq!(combined.data(1).unwrap(), 2.0, epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

#[test]
fn missing_file_is_an_open_error() {
    let dir = scratch_dir("missing");
    let err = load_cosmolib(&dir.join("nowhere"), &prototype(), &inverse()).unwrap_err();
    match err {
        Error::Open { path, .. } => assert!(path.ends_with("nowhere.params")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn malformed_line_reports_file_and_line() {
    let dir = scratch_dir("malformed");
    let base = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&base.with_extension("icov"), "0 0 -1\n1 1\n2 2 -1\n");
    let err = load_cosmolib(&base, &prototype(), &inverse()).unwrap_err();
    match &err {
        Error::Parse { path, line, .. } => {
            assert!(path.ends_with("a.icov"));
            assert_eq!(*line, 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("a.icov:2:"));
}

#[test]
fn offset_beyond_the_params_is_a_parse_error() {
    let dir = scratch_dir("offset");
    let base = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&base.with_extension("icov"), "0 0 -1\n3 0 -1\n");
    assert!(matches!(
        load_cosmolib(&base, &prototype(), &inverse()),
        Err(Error::Parse { line: 2, .. })
    ));
}

#[test]
fn coordinate_outside_the_axes_is_a_parse_error() {
    let dir = scratch_dir("outside");
    let base = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&base.with_extension("params"), "1 0 | Lya covariance 3D (0.025,250,2.0)\n");
    assert!(matches!(
        load_cosmolib(&base, &prototype(), &inverse()),
        Err(Error::Parse { line: 1, .. })
    ));
}

#[test]
fn zero_diagonal_gets_a_sentinel() {
    let dir = scratch_dir("sentinel");
    let base = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&base.with_extension("cov"), "0 0 1\n2 2 4\n");
    let plate = load_cosmolib(&base, &prototype(), &LoadOptions::default()).unwrap();
    let index = plate.index_at_offset(1).unwrap();
    assert_eq!(plate.covariance(index, index).unwrap(), 1e40);
    assert_relative_eq!(plate.inverse_covariance(index, index).unwrap(), 1e-40, max_relative = 1e-12);
    assert_eq!(
        plate.covariance_matrix().unwrap().representation(),
        Some(Representation::Synchronized)
    );
}

#[test]
fn covariance_plates_combine_to_the_weighted_average() {
    let dir = scratch_dir("cov-plates");
    let a = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&a.with_extension("cov"), "0 0 1
1 1 0.5
2 2 2
");
    let b = write_plate(&dir, "b", [4.0, 5.0, 6.0], [1.0, 1.0, 1.0]);
    write(&b.with_extension("cov"), "0 0 0.5
1 1 1
2 2 2
");
    let plates = load_plates(&[a, b], &prototype(), &LoadOptions::default()).unwrap();
    assert!(plates.iter().all(BinnedData::is_compressed));

    let mut combined = CombinedData::new();
    for plate in &plates {
        combined.add(plate, 1).unwrap();
    }
    combined.finalize(false).unwrap();
    assert_relative_eq!(combined.data(0).unwrap(), 3.0, epsilon = 1e-12);
    assert_relative_eq!(combined.data(1).unwrap(), 3.0, epsilon = 1e-12);
    assert_relative_eq!(combined.data(2).unwrap(), 4.5, epsilon = 1e-12);
    assert_relative_eq!(combined.variance(0).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(combined.variance(1).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(combined.variance(2).unwrap(), 1.0, epsilon = 1e-12);
}

#[test]
fn singular_covariance_plate_fails_without_the_check() {
    let dir = scratch_dir("singular-cov");
    let base = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&base.with_extension("cov"), "0 0 1
1 1 1
2 2 1
0 1 2
");
    assert!(matches!(
        load_cosmolib(&base, &prototype(), &LoadOptions::default()),
        Err(Error::NotPositiveDefinite(_))
    ));
}

#[test]
fn failed_positive_definite_check_is_not_fatal() {
    let dir = scratch_dir("not-pd");
    let base = write_plate(&dir, "a", [1.0, 2.0, 3.0], [1.0, 1.0, 1.0]);
    write(&base.with_extension("cov"), "0 0 1\n1 1 1\n2 2 1\n0 1 2\n");
    let options = LoadOptions { check_positive_definite: true, ..LoadOptions::default() };
    let plate = load_cosmolib(&base, &prototype(), &options).unwrap();
    assert_eq!(
        plate.covariance_matrix().unwrap().representation(),
        Some(Representation::Covariance)
    );

    write(&base.with_extension("cov"), "0 0 1\n1 1 1\n2 2 1\n0 1 0.5\n");
    let plate = load_cosmolib(&base, &prototype(), &options).unwrap();
    assert_eq!(
        plate.covariance_matrix().unwrap().representation(),
        Some(Representation::Synchronized)
    );
}

#[test]
fn weighted_values_are_unweighted_with_the_covariance() {
    let dir = scratch_dir("weighted-column");
    let base = dir.join("a");
    let params: String = BINS
        .iter()
        .zip([2.0, 6.0, 1.0])
        .map(|(&(ll, sep), w)| format!("0 {w} | Lya covariance 3D ({ll},{sep},2.0)\n"))
        .collect();
    write(&base.with_extension("params"), &params);
    write(&base.with_extension("cov"), "0 0 0.5\n1 1 0.5\n2 2 3\n");
    let options = LoadOptions { weighted: true, ..LoadOptions::default() };
    let plate = load_cosmolib(&base, &prototype(), &options).unwrap();
    assert_relative_eq!(plate.data_at(0).unwrap(), 1.0, epsilon = 1e-12);
    assert_relative_eq!(plate.data_at(1).unwrap(), 3.0, epsilon = 1e-12);
    assert_relative_eq!(plate.data_at(2).unwrap(), 3.0, epsilon = 1e-12);
}

#[test]
fn plate_list_honours_the_limit() {
    let dir = scratch_dir("platelist");
    write(&dir.join("list.txt"), "p1 p2\np3\n\n");
    let all = load_plate_list(&dir, Path::new("list.txt"), 0).unwrap();
    assert_eq!(all, vec![dir.join("p1"), dir.join("p2"), dir.join("p3")]);
    let two = load_plate_list(&dir, Path::new("list.txt"), 2).unwrap();
    assert_eq!(two.len(), 2);
}
