//! Packed symmetric covariance store.
//!
//! An `n x n` symmetric matrix is kept as its upper triangle in LAPACK packed
//! order: element `(row, col)` with `row <= col` lives at `row + col * (col + 1) / 2`.
//!
//! A store holds the covariance, its inverse, or both once [`CovarianceMatrix::invert`]
//! has synchronized them. Reading a representation that is not present is an
//! error; the caller decides when to pay for an inversion.
//!
//! Each representation is either dense (every packed element) or sparse (only the
//! non-zero packed elements). [`CovarianceMatrix::compress`] freezes a store to
//! the sparse form; writes are rejected until [`CovarianceMatrix::decompress`].

use bao_core::{Error, Result};
use nalgebra::DMatrix;

/// Replacement for a zero covariance diagonal element.
pub const COVARIANCE_SENTINEL: f64 = 1e40;
/// Replacement for a zero inverse-covariance diagonal element.
pub const INVERSE_COVARIANCE_SENTINEL: f64 = 1e-30;

/// Which representations a store currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Only the covariance.
    Covariance,
    /// Only the inverse covariance.
    InverseCovariance,
    /// Both, consistent with each other.
    Synchronized,
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Dense(Vec<f64>),
    Sparse { keys: Vec<usize>, values: Vec<f64> },
}

#[inline]
fn packed_len(size: usize) -> usize {
    size * (size + 1) / 2
}

#[inline]
fn packed_index(i: usize, j: usize) -> usize {
    let (row, col) = if i <= j { (i, j) } else { (j, i) };
    row + col * (col + 1) / 2
}

impl Storage {
    fn zeros(size: usize) -> Self {
        Self::Dense(vec![0.0; packed_len(size)])
    }

    fn get(&self, k: usize) -> f64 {
        match self {
            Self::Dense(v) => v[k],
            Self::Sparse { keys, values } => keys.binary_search(&k).map_or(0.0, |pos| values[pos]),
        }
    }

    /// Visit stored elements as `(row, col, value)` with `row <= col`, in packed order.
    fn for_each(&self, size: usize, mut f: impl FnMut(usize, usize, f64)) {
        match self {
            Self::Dense(v) => {
                let mut k = 0;
                for col in 0..size {
                    for row in 0..=col {
                        f(row, col, v[k]);
                        k += 1;
                    }
                }
            }
            Self::Sparse { keys, values } => {
                let mut col = 0;
                let mut col_start = 0;
                for (&k, &value) in keys.iter().zip(values) {
                    while k >= col_start + col + 1 {
                        col_start += col + 1;
                        col += 1;
                    }
                    f(k - col_start, col, value);
                }
            }
        }
    }

    fn compressed(&self) -> Self {
        match self {
            Self::Dense(v) => {
                let (keys, values) =
                    v.iter().enumerate().filter(|(_, x)| **x != 0.0).map(|(k, x)| (k, *x)).unzip();
                Self::Sparse { keys, values }
            }
            sparse => sparse.clone(),
        }
    }

    fn expanded(&self, size: usize) -> Self {
        match self {
            Self::Sparse { keys, values } => {
                let mut v = vec![0.0; packed_len(size)];
                for (&k, &x) in keys.iter().zip(values) {
                    v[k] = x;
                }
                Self::Dense(v)
            }
            dense => dense.clone(),
        }
    }

    fn to_matrix(&self, size: usize) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(size, size);
        self.for_each(size, |row, col, value| {
            m[(row, col)] = value;
            m[(col, row)] = value;
        });
        m
    }

    fn from_matrix(m: &DMatrix<f64>) -> Self {
        let size = m.nrows();
        let mut v = Vec::with_capacity(packed_len(size));
        for col in 0..size {
            for row in 0..=col {
                v.push(m[(row, col)]);
            }
        }
        Self::Dense(v)
    }

    fn symmetric_product(&self, size: usize, vec: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; size];
        self.for_each(size, |row, col, a| {
            out[row] += a * vec[col];
            if row != col {
                out[col] += a * vec[row];
            }
        });
        out
    }
}

fn invert_storage(storage: &Storage, size: usize, what: &str) -> Result<Storage> {
    let chol = storage.to_matrix(size).cholesky().ok_or_else(|| {
        Error::NotPositiveDefinite(format!("{what} of size {size} is not positive-definite"))
    })?;
    Ok(Storage::from_matrix(&chol.inverse()))
}

/// Symmetric `n x n` covariance and/or inverse covariance in packed storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    size: usize,
    cov: Option<Storage>,
    icov: Option<Storage>,
    compressed: bool,
}

impl CovarianceMatrix {
    /// Empty store of dimension `size`; the first write selects its representation.
    pub fn new(size: usize) -> Self {
        Self { size, cov: None, icov: None, compressed: false }
    }

    /// All-zero inverse covariance, the starting point of an accumulation.
    pub fn zeros_inverse(size: usize) -> Self {
        Self { size, cov: None, icov: Some(Storage::zeros(size)), compressed: false }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Currently held representation(s), or `None` before the first write.
    pub fn representation(&self) -> Option<Representation> {
        match (&self.cov, &self.icov) {
            (Some(_), Some(_)) => Some(Representation::Synchronized),
            (Some(_), None) => Some(Representation::Covariance),
            (None, Some(_)) => Some(Representation::InverseCovariance),
            (None, None) => None,
        }
    }

    /// Whether the store is frozen in sparse form.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn check_bounds(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.size || j >= self.size {
            return Err(Error::OutOfRange(format!(
                "element ({i}, {j}) outside {0}x{0} covariance",
                self.size
            )));
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.size {
            return Err(Error::Validation(format!(
                "vector length {len} does not match covariance size {}",
                self.size
            )));
        }
        Ok(())
    }

    fn covariance_storage(&self) -> Result<&Storage> {
        self.cov.as_ref().ok_or_else(|| {
            Error::InvalidState("covariance not available; call invert() first".to_string())
        })
    }

    fn inverse_storage(&self) -> Result<&Storage> {
        self.icov.as_ref().ok_or_else(|| {
            Error::InvalidState("inverse covariance not available; call invert() first".to_string())
        })
    }

    /// Writable storage for `which`, allocating it on first use and dropping the
    /// other representation, which the write makes stale.
    fn writable(&mut self, which: Representation) -> Result<&mut Vec<f64>> {
        if self.compressed {
            return Err(Error::InvalidState(
                "covariance is compressed; call decompress() before writing".to_string(),
            ));
        }
        let size = self.size;
        let (target, other) = match which {
            Representation::Covariance => (&mut self.cov, &mut self.icov),
            Representation::InverseCovariance => (&mut self.icov, &mut self.cov),
            Representation::Synchronized => {
                return Err(Error::InvalidState(
                    "cannot write both representations at once".to_string(),
                ));
            }
        };
        if target.is_none() && other.is_some() {
            return Err(Error::InvalidState(format!(
                "cannot write {which:?} elements into a store holding only the other representation"
            )));
        }
        *other = None;
        match target.get_or_insert_with(|| Storage::zeros(size)) {
            Storage::Dense(v) => Ok(v),
            Storage::Sparse { .. } => {
                Err(Error::InvalidState("sparse storage in uncompressed store".to_string()))
            }
        }
    }

    /// Covariance element `(i, j)`.
    pub fn covariance(&self, i: usize, j: usize) -> Result<f64> {
        self.check_bounds(i, j)?;
        Ok(self.covariance_storage()?.get(packed_index(i, j)))
    }

    /// Inverse-covariance element `(i, j)`.
    pub fn inverse_covariance(&self, i: usize, j: usize) -> Result<f64> {
        self.check_bounds(i, j)?;
        Ok(self.inverse_storage()?.get(packed_index(i, j)))
    }

    /// Set covariance elements `(i, j)` and `(j, i)`. Drops any inverse.
    pub fn set_covariance(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        self.check_bounds(i, j)?;
        self.writable(Representation::Covariance)?[packed_index(i, j)] = value;
        Ok(())
    }

    /// Set inverse-covariance elements `(i, j)` and `(j, i)`. Drops any covariance.
    pub fn set_inverse_covariance(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        self.check_bounds(i, j)?;
        self.writable(Representation::InverseCovariance)?[packed_index(i, j)] = value;
        Ok(())
    }

    /// Replace zero diagonal elements of `which` with its sentinel value.
    ///
    /// Returns the number of elements replaced.
    pub fn replace_zero_diagonal(&mut self, which: Representation) -> Result<usize> {
        let sentinel = match which {
            Representation::InverseCovariance => INVERSE_COVARIANCE_SENTINEL,
            _ => COVARIANCE_SENTINEL,
        };
        let size = self.size;
        let v = self.writable(which)?;
        let mut replaced = 0;
        for k in 0..size {
            let diag = &mut v[packed_index(k, k)];
            if *diag == 0.0 {
                *diag = sentinel;
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    /// Compute the missing representation by Cholesky inversion.
    ///
    /// A no-op when both representations are already present.
    pub fn invert(&mut self) -> Result<()> {
        if self.cov.is_some() && self.icov.is_some() {
            return Ok(());
        }
        if let Some(cov) = &self.cov {
            let icov = invert_storage(cov, self.size, "covariance")?;
            self.icov = Some(icov);
        } else if let Some(icov) = &self.icov {
            let cov = invert_storage(icov, self.size, "inverse covariance")?;
            self.cov = Some(cov);
        } else {
            return Err(Error::InvalidState("cannot invert an empty covariance".to_string()));
        }
        if self.compressed {
            self.cov = self.cov.as_ref().map(Storage::compressed);
            self.icov = self.icov.as_ref().map(Storage::compressed);
        }
        Ok(())
    }

    /// Replace `vec` with `covariance * vec`.
    pub fn multiply_by_covariance(&self, vec: &mut [f64]) -> Result<()> {
        self.check_len(vec.len())?;
        let out = self.covariance_storage()?.symmetric_product(self.size, vec);
        vec.copy_from_slice(&out);
        Ok(())
    }

    /// Replace `vec` with `inverse_covariance * vec`.
    pub fn multiply_by_inverse_covariance(&self, vec: &mut [f64]) -> Result<()> {
        self.check_len(vec.len())?;
        let out = self.inverse_storage()?.symmetric_product(self.size, vec);
        vec.copy_from_slice(&out);
        Ok(())
    }

    /// `residual . inverse_covariance . residual`.
    pub fn chi_square(&self, residual: &[f64]) -> Result<f64> {
        self.check_len(residual.len())?;
        let mut chi2 = 0.0;
        self.inverse_storage()?.for_each(self.size, |row, col, a| {
            let term = a * residual[row] * residual[col];
            chi2 += if row == col { term } else { 2.0 * term };
        });
        Ok(chi2)
    }

    /// Accumulate `weight * other.inverse_covariance` into this store's inverse.
    ///
    /// An empty store starts from zero. Any covariance held here is dropped.
    pub fn add_inverse(&mut self, other: &CovarianceMatrix, weight: f64) -> Result<()> {
        if other.size != self.size {
            return Err(Error::Validation(format!(
                "cannot add inverse covariance of size {} to size {}",
                other.size, self.size
            )));
        }
        let source = other.inverse_storage()?;
        if self.cov.is_some() && self.icov.is_none() {
            return Err(Error::InvalidState(
                "add_inverse needs the inverse representation; call invert() first".to_string(),
            ));
        }
        let size = self.size;
        let target = self.writable(Representation::InverseCovariance)?;
        source.for_each(size, |row, col, value| {
            target[row + col * (col + 1) / 2] += weight * value;
        });
        Ok(())
    }

    /// Bootstrap covariance correction.
    ///
    /// With this store holding the naive accumulation `N = sum(repeat^2 * icov_k)` and
    /// `tilde` holding `T = sum(repeat * icov_k)`, the inverse covariance becomes
    /// `T . N^-1 . T`, i.e. the covariance becomes `T^-1 . N . T^-1`.
    pub fn replace_with_triple_product(&mut self, tilde: &CovarianceMatrix) -> Result<()> {
        if tilde.size != self.size {
            return Err(Error::Validation(format!(
                "triple product needs equal sizes, got {} and {}",
                self.size, tilde.size
            )));
        }
        let size = self.size;
        let naive = self.inverse_storage()?.to_matrix(size);
        let tilde = tilde.inverse_storage()?.to_matrix(size);
        let naive_inverse = naive
            .cholesky()
            .ok_or_else(|| {
                Error::NotPositiveDefinite(format!(
                    "accumulated inverse covariance of size {size} is not positive-definite"
                ))
            })?
            .inverse();
        let product = &tilde * (&naive_inverse * &tilde);
        // Claim the inverse slot (checks writability) before replacing it.
        self.writable(Representation::InverseCovariance)?;
        self.icov = Some(Storage::from_matrix(&product));
        Ok(())
    }

    /// Drop exact zeros from storage. Reads are unchanged; writes are refused until
    /// [`CovarianceMatrix::decompress`].
    pub fn compress(&mut self) {
        self.cov = self.cov.as_ref().map(Storage::compressed);
        self.icov = self.icov.as_ref().map(Storage::compressed);
        self.compressed = true;
    }

    /// Return to dense storage so the store can be written again.
    pub fn decompress(&mut self) {
        let size = self.size;
        self.cov = self.cov.as_ref().map(|s| s.expanded(size));
        self.icov = self.icov.as_ref().map(|s| s.expanded(size));
        self.compressed = false;
    }

    /// Sub-matrix over the offsets in `keep`, in that order.
    ///
    /// Selection acts on the covariance, so a store holding only the inverse is
    /// inverted first. The result holds the same representation(s) as `self` and
    /// the same compression state.
    pub fn select(&self, keep: &[usize]) -> Result<CovarianceMatrix> {
        if let Some(&bad) = keep.iter().find(|&&k| k >= self.size) {
            return Err(Error::OutOfRange(format!(
                "offset {bad} outside covariance of size {}",
                self.size
            )));
        }
        let representation = self.representation().ok_or_else(|| {
            Error::InvalidState("cannot select from an empty covariance".to_string())
        })?;
        let inverted;
        let source = match &self.cov {
            Some(cov) => cov,
            None => {
                inverted = invert_storage(self.inverse_storage()?, self.size, "inverse covariance")?;
                &inverted
            }
        };
        let mut pruned = CovarianceMatrix::new(keep.len());
        let mut v = Vec::with_capacity(packed_len(keep.len()));
        for (col, &old_col) in keep.iter().enumerate() {
            for &old_row in &keep[..=col] {
                v.push(source.get(packed_index(old_row, old_col)));
            }
        }
        pruned.cov = Some(Storage::Dense(v));
        match representation {
            Representation::Covariance => {}
            Representation::Synchronized => pruned.invert()?,
            Representation::InverseCovariance => {
                pruned.invert()?;
                pruned.cov = None;
            }
        }
        if self.compressed {
            pruned.compress();
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tridiagonal(n: usize) -> CovarianceMatrix {
        let mut c = CovarianceMatrix::new(n);
        for i in 0..n {
            c.set_covariance(i, i, 2.0 + i as f64).unwrap();
            if i + 1 < n {
                c.set_covariance(i + 1, i, -0.5).unwrap();
            }
        }
        c
    }

    #[test]
    fn writes_are_symmetric() {
        let mut c = CovarianceMatrix::new(4);
        for i in 0..4 {
            for j in 0..4 {
                let v = (10 * i + j) as f64;
                c.set_covariance(i, j, v).unwrap();
                assert_eq!(c.covariance(j, i).unwrap(), v);
            }
        }
        assert_eq!(c.representation(), Some(Representation::Covariance));
    }

    #[test]
    fn cross_representation_read_needs_invert() {
        let mut c = tridiagonal(3);
        assert!(matches!(c.inverse_covariance(0, 0), Err(Error::InvalidState(_))));
        c.invert().unwrap();
        assert_eq!(c.representation(), Some(Representation::Synchronized));
        let mut v = vec![1.0, 2.0, 3.0];
        c.multiply_by_inverse_covariance(&mut v).unwrap();
        c.multiply_by_covariance(&mut v).unwrap();
        assert_relative_eq!(v[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(v[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(v[2], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn writing_one_representation_drops_the_other() {
        let mut c = tridiagonal(3);
        c.invert().unwrap();
        c.set_covariance(0, 0, 5.0).unwrap();
        assert_eq!(c.representation(), Some(Representation::Covariance));
        assert!(matches!(c.set_inverse_covariance(0, 0, 1.0), Err(Error::InvalidState(_))));
    }

    #[test]
    fn non_positive_definite_inversion_fails() {
        let mut c = CovarianceMatrix::new(2);
        c.set_covariance(0, 0, 1.0).unwrap();
        c.set_covariance(1, 1, 1.0).unwrap();
        c.set_covariance(0, 1, 2.0).unwrap();
        assert!(matches!(c.invert(), Err(Error::NotPositiveDefinite(_))));
    }

    #[test]
    fn compression_is_transparent_for_reads() {
        let mut c = tridiagonal(5);
        c.invert().unwrap();
        let before = c.clone();
        c.compress();
        assert!(c.is_compressed());
        for i in 0..5 {
            for j in 0..5 {
                assert_eq!(c.covariance(i, j).unwrap(), before.covariance(i, j).unwrap());
                assert_eq!(
                    c.inverse_covariance(i, j).unwrap(),
                    before.inverse_covariance(i, j).unwrap()
                );
            }
        }
        let residual = [0.3, -1.0, 2.0, 0.0, 1.5];
        assert_relative_eq!(
            c.chi_square(&residual).unwrap(),
            before.chi_square(&residual).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn compressed_store_refuses_writes_until_thawed() {
        let mut c = tridiagonal(3);
        c.compress();
        assert!(matches!(c.set_covariance(0, 2, 1.0), Err(Error::InvalidState(_))));
        c.decompress();
        c.set_covariance(0, 2, 0.1).unwrap();
        assert_eq!(c.covariance(2, 0).unwrap(), 0.1);
    }

    #[test]
    fn chi_square_counts_off_diagonal_twice() {
        let mut c = CovarianceMatrix::new(2);
        c.set_inverse_covariance(0, 0, 2.0).unwrap();
        c.set_inverse_covariance(1, 1, 3.0).unwrap();
        c.set_inverse_covariance(0, 1, 0.5).unwrap();
        let chi2 = c.chi_square(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(chi2, 2.0 + 12.0 + 2.0 * 0.5 * 2.0, epsilon = 1e-15);
        assert!(matches!(c.chi_square(&[1.0]), Err(Error::Validation(_))));
    }

    #[test]
    fn add_inverse_accumulates_weighted_sum() {
        let mut plate = tridiagonal(3);
        plate.invert().unwrap();
        plate.compress();
        let mut acc = CovarianceMatrix::zeros_inverse(3);
        acc.add_inverse(&plate, 1.0).unwrap();
        acc.add_inverse(&plate, 3.0).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(
                    acc.inverse_covariance(i, j).unwrap(),
                    4.0 * plate.inverse_covariance(i, j).unwrap(),
                    epsilon = 1e-12
                );
            }
        }
        assert!(acc.add_inverse(&CovarianceMatrix::zeros_inverse(2), 1.0).is_err());
    }

    #[test]
    fn triple_product_is_identity_without_repeats() {
        let mut plate = tridiagonal(3);
        plate.invert().unwrap();
        let mut naive = CovarianceMatrix::zeros_inverse(3);
        let mut tilde = CovarianceMatrix::zeros_inverse(3);
        naive.add_inverse(&plate, 1.0).unwrap();
        tilde.add_inverse(&plate, 1.0).unwrap();
        naive.replace_with_triple_product(&tilde).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(
                    naive.inverse_covariance(i, j).unwrap(),
                    plate.inverse_covariance(i, j).unwrap(),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn triple_product_inflates_repeated_variance() {
        let mut plate = CovarianceMatrix::new(1);
        plate.set_inverse_covariance(0, 0, 1.0).unwrap();
        let mut naive = CovarianceMatrix::zeros_inverse(1);
        let mut tilde = CovarianceMatrix::zeros_inverse(1);
        naive.add_inverse(&plate, 4.0).unwrap();
        tilde.add_inverse(&plate, 2.0).unwrap();
        naive.replace_with_triple_product(&tilde).unwrap();
        naive.invert().unwrap();
        tilde.invert().unwrap();
        assert_relative_eq!(naive.covariance(0, 0).unwrap(), 1.0, epsilon = 1e-15);
        assert_relative_eq!(tilde.covariance(0, 0).unwrap(), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn zero_diagonal_gets_sentinel() {
        let mut c = CovarianceMatrix::new(3);
        c.set_inverse_covariance(0, 0, 1.0).unwrap();
        let replaced = c.replace_zero_diagonal(Representation::InverseCovariance).unwrap();
        assert_eq!(replaced, 2);
        assert_eq!(c.inverse_covariance(2, 2).unwrap(), INVERSE_COVARIANCE_SENTINEL);

        let mut c = CovarianceMatrix::new(2);
        c.replace_zero_diagonal(Representation::Covariance).unwrap();
        assert_eq!(c.covariance(1, 1).unwrap(), COVARIANCE_SENTINEL);
    }

    #[test]
    fn select_keeps_covariance_sub_matrix() {
        let c = tridiagonal(4);
        let pruned = c.select(&[1, 2]).unwrap();
        assert_eq!(pruned.size(), 2);
        assert_eq!(pruned.covariance(0, 0).unwrap(), 3.0);
        assert_eq!(pruned.covariance(1, 1).unwrap(), 4.0);
        assert_eq!(pruned.covariance(0, 1).unwrap(), -0.5);
        assert!(c.select(&[4]).is_err());
    }

    #[test]
    fn select_from_inverse_marginalizes() {
        let mut c = tridiagonal(3);
        c.invert().unwrap();
        let mut icov_only = CovarianceMatrix::new(3);
        for i in 0..3 {
            for j in 0..=i {
                icov_only.set_inverse_covariance(i, j, c.inverse_covariance(i, j).unwrap()).unwrap();
            }
        }
        let mut pruned = icov_only.select(&[0, 2]).unwrap();
        assert_eq!(pruned.representation(), Some(Representation::InverseCovariance));
        pruned.invert().unwrap();
        assert_relative_eq!(pruned.covariance(0, 0).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(pruned.covariance(1, 1).unwrap(), 4.0, epsilon = 1e-12);
        assert_relative_eq!(pruned.covariance(0, 1).unwrap(), 0.0, epsilon = 1e-12);
    }
}
