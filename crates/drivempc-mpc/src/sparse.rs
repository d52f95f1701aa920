//! Compressed-sparse-column (CSC) blocks and the sparse-to-dense copier.
//!
//! Generated evaluators emit their outputs as the nonzero values of a fixed
//! CSC pattern. The solver wants dense column-major buffers, so every output
//! goes through [`sparse_to_dense`] with the pattern's [`SparsityDescriptor`].

use thiserror::Error;

/// Contract violations between a sparsity pattern and the buffers it is
/// applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SparseError {
    #[error("compact sparsity encoding too short: need {needed} entries, got {got}")]
    TruncatedEncoding { needed: usize, got: usize },

    #[error("column pointer array must have {expected} entries, got {got}")]
    ColumnPointerLength { expected: usize, got: usize },

    #[error("column pointers must start at 0 and be non-decreasing (column {column})")]
    ColumnPointerOrder { column: usize },

    #[error("column pointers end at {end} but {nnz} row indices were given")]
    NonzeroCount { end: usize, nnz: usize },

    #[error("row index {row} out of range for {nrows} rows (entry {entry})")]
    RowOutOfRange { entry: usize, row: usize, nrows: usize },

    #[error("value array has {got} entries, pattern has {expected} nonzeros")]
    ValueLength { expected: usize, got: usize },

    #[error("pattern of {nrows}x{ncols} does not fit in a dense buffer")]
    TooLarge { nrows: usize, ncols: usize },

    #[error("dense buffer has {got} entries, pattern is {nrows}x{ncols}")]
    DenseLength {
        nrows: usize,
        ncols: usize,
        got: usize,
    },

    #[error("pattern is {nrows}x{ncols}, expected {expected_rows}x{expected_cols}")]
    Shape {
        nrows: usize,
        ncols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
}

// ---------------------------------------------------------------------------
// SparsityDescriptor
// ---------------------------------------------------------------------------

/// Nonzero structure of an `nrows x ncols` matrix in CSC form.
///
/// Entries of column `j` are `colptr[j]..colptr[j + 1]`; entry `k` sits in
/// row `rowidx[k]`. Validated on construction, so copies only need to check
/// buffer lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityDescriptor {
    nrows: usize,
    ncols: usize,
    colptr: Vec<usize>,
    rowidx: Vec<usize>,
}

impl SparsityDescriptor {
    /// Build and validate a descriptor.
    pub fn new(
        nrows: usize,
        ncols: usize,
        colptr: Vec<usize>,
        rowidx: Vec<usize>,
    ) -> Result<Self, SparseError> {
        let too_large = SparseError::TooLarge { nrows, ncols };
        nrows.checked_mul(ncols).ok_or(too_large)?;
        let expected = ncols.checked_add(1).ok_or(too_large)?;
        if colptr.len() != expected {
            return Err(SparseError::ColumnPointerLength {
                expected,
                got: colptr.len(),
            });
        }
        if colptr[0] != 0 {
            return Err(SparseError::ColumnPointerOrder { column: 0 });
        }
        for (column, pair) in colptr.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(SparseError::ColumnPointerOrder { column });
            }
        }
        let end = colptr[ncols];
        if end != rowidx.len() {
            return Err(SparseError::NonzeroCount {
                end,
                nnz: rowidx.len(),
            });
        }
        if let Some((entry, &row)) = rowidx.iter().enumerate().find(|&(_, &r)| r >= nrows) {
            return Err(SparseError::RowOutOfRange { entry, row, nrows });
        }
        Ok(Self {
            nrows,
            ncols,
            colptr,
            rowidx,
        })
    }

    /// Decode the compact generated encoding
    /// `[nrows, ncols, colptr[0..=ncols], rowidx[0..nnz]]`.
    pub fn from_compact(encoded: &[usize]) -> Result<Self, SparseError> {
        if encoded.len() < 3 {
            return Err(SparseError::TruncatedEncoding {
                needed: 3,
                got: encoded.len(),
            });
        }
        let (nrows, ncols) = (encoded[0], encoded[1]);
        let truncated = |needed| SparseError::TruncatedEncoding {
            needed,
            got: encoded.len(),
        };
        let colptr_end = ncols.checked_add(3).ok_or(truncated(usize::MAX))?;
        if encoded.len() < colptr_end {
            return Err(truncated(colptr_end));
        }
        let colptr = encoded[2..colptr_end].to_vec();
        let nnz = colptr[ncols];
        let needed = colptr_end.checked_add(nnz).ok_or(truncated(usize::MAX))?;
        if encoded.len() != needed {
            return Err(truncated(needed));
        }
        let rowidx = encoded[colptr_end..].to_vec();
        Self::new(nrows, ncols, colptr, rowidx)
    }

    /// Fully dense pattern, columns in order.
    pub fn dense(nrows: usize, ncols: usize) -> Result<Self, SparseError> {
        if nrows.checked_mul(ncols).is_none() || ncols == usize::MAX {
            return Err(SparseError::TooLarge { nrows, ncols });
        }
        Ok(Self {
            nrows,
            ncols,
            colptr: (0..=ncols).map(|j| j * nrows).collect(),
            rowidx: (0..ncols).flat_map(|_| 0..nrows).collect(),
        })
    }

    pub const fn nrows(&self) -> usize {
        self.nrows
    }

    pub const fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.rowidx.len()
    }

    /// Size of the dense buffer this pattern expands into. Construction
    /// guarantees the product fits in `usize`.
    pub const fn dense_len(&self) -> usize {
        self.nrows * self.ncols
    }

    /// Check a dense buffer length against this pattern without writing.
    pub const fn check_dense(&self, len: usize) -> Result<(), SparseError> {
        if len == self.dense_len() {
            Ok(())
        } else {
            Err(SparseError::DenseLength {
                nrows: self.nrows,
                ncols: self.ncols,
                got: len,
            })
        }
    }

    pub fn colptr(&self) -> &[usize] {
        &self.colptr
    }

    pub fn rowidx(&self) -> &[usize] {
        &self.rowidx
    }

    /// Iterate `(row, col)` of every nonzero in storage order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.ncols).flat_map(move |j| {
            self.rowidx[self.colptr[j]..self.colptr[j + 1]]
                .iter()
                .map(move |&i| (i, j))
        })
    }

    /// Check the pattern has the shape a solver buffer expects.
    pub const fn expect_shape(&self, nrows: usize, ncols: usize) -> Result<(), SparseError> {
        if self.nrows == nrows && self.ncols == ncols {
            Ok(())
        } else {
            Err(SparseError::Shape {
                nrows: self.nrows,
                ncols: self.ncols,
                expected_rows: nrows,
                expected_cols: ncols,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Copier
// ---------------------------------------------------------------------------

/// Scatter the nonzeros `values` of `pattern` into the dense column-major
/// buffer `out` (`out[j * nrows + i]`).
///
/// Only positions in the pattern are written. Everything else keeps the
/// caller's value, so `out` must be zeroed beforehand for a correct dense
/// matrix. Length mismatches are rejected before anything is written.
pub fn sparse_to_dense<T>(
    pattern: &SparsityDescriptor,
    values: &[T],
    out: &mut [f64],
) -> Result<(), SparseError>
where
    T: Copy + Into<f64>,
{
    if values.len() != pattern.nnz() {
        return Err(SparseError::ValueLength {
            expected: pattern.nnz(),
            got: values.len(),
        });
    }
    pattern.check_dense(out.len())?;

    let nrow = pattern.nrows;
    for j in 0..pattern.ncols {
        for k in pattern.colptr[j]..pattern.colptr[j + 1] {
            out[j * nrow + pattern.rowidx[k]] = values[k].into();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3x3:
    // [1 0 4]
    // [0 3 0]
    // [2 0 5]
    fn sample() -> SparsityDescriptor {
        SparsityDescriptor::new(3, 3, vec![0, 2, 3, 5], vec![0, 2, 1, 0, 2]).unwrap()
    }

    #[test]
    fn scatters_column_major() {
        let pattern = sample();
        let mut out = [0.0; 9];
        sparse_to_dense(&pattern, &[1.0, 2.0, 3.0, 4.0, 5.0], &mut out).unwrap();
        assert_eq!(out, [1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0, 5.0]);
    }

    #[test]
    fn positions_outside_pattern_keep_prior_value() {
        let pattern = sample();
        let mut out = [-7.0; 9];
        sparse_to_dense(&pattern, &[1.0, 2.0, 3.0, 4.0, 5.0], &mut out).unwrap();
        for (i, j) in [(1, 0), (0, 1), (2, 1), (1, 2)] {
            assert_eq!(out[j * 3 + i], -7.0);
        }
        for ((i, j), v) in pattern.entries().zip([1.0, 2.0, 3.0, 4.0, 5.0]) {
            assert_eq!(out[j * 3 + i], v);
        }
    }

    #[test]
    fn accepts_narrower_value_types() {
        let pattern = SparsityDescriptor::dense(2, 1).unwrap();
        let mut out = [0.0; 2];
        sparse_to_dense(&pattern, &[0.5_f32, -1.5_f32], &mut out).unwrap();
        assert_eq!(out, [0.5, -1.5]);
    }

    #[test]
    fn rejects_wrong_value_count_without_writing() {
        let pattern = sample();
        let mut out = [0.0; 9];
        let err = sparse_to_dense(&pattern, &[1.0, 2.0], &mut out).unwrap_err();
        assert_eq!(err, SparseError::ValueLength { expected: 5, got: 2 });
        assert_eq!(out, [0.0; 9]);
    }

    #[test]
    fn rejects_short_dense_buffer() {
        let pattern = sample();
        let mut out = [0.0; 8];
        let err = sparse_to_dense(&pattern, &[1.0; 5], &mut out).unwrap_err();
        assert!(matches!(err, SparseError::DenseLength { got: 8, .. }));
    }

    #[test]
    fn compact_encoding_roundtrip() {
        let encoded = [3, 3, 0, 2, 3, 5, 0, 2, 1, 0, 2];
        assert_eq!(SparsityDescriptor::from_compact(&encoded).unwrap(), sample());
    }

    #[test]
    fn compact_encoding_rejects_truncation() {
        let err = SparsityDescriptor::from_compact(&[3, 3, 0, 2, 3, 5, 0, 2]).unwrap_err();
        assert_eq!(err, SparseError::TruncatedEncoding { needed: 11, got: 8 });
        assert!(SparsityDescriptor::from_compact(&[3]).is_err());
    }

    #[test]
    fn rejects_row_out_of_range() {
        let err = SparsityDescriptor::new(2, 1, vec![0, 1], vec![2]).unwrap_err();
        assert_eq!(err, SparseError::RowOutOfRange { entry: 0, row: 2, nrows: 2 });
    }

    #[test]
    fn rejects_decreasing_column_pointers() {
        let err = SparsityDescriptor::new(2, 2, vec![0, 2, 1], vec![0]).unwrap_err();
        assert_eq!(err, SparseError::ColumnPointerOrder { column: 1 });
    }

    #[test]
    fn rejects_nonzero_count_mismatch() {
        let err = SparsityDescriptor::new(2, 1, vec![0, 2], vec![0]).unwrap_err();
        assert_eq!(err, SparseError::NonzeroCount { end: 2, nnz: 1 });
    }

    #[test]
    fn dense_pattern_fills_everything() {
        let pattern = SparsityDescriptor::dense(2, 3).unwrap();
        assert_eq!(pattern.nnz(), 6);
        let mut out = [0.0; 6];
        sparse_to_dense(&pattern, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn compact_encoding_with_huge_column_count_is_an_error() {
        let err = SparsityDescriptor::from_compact(&[1, usize::MAX, 0]).unwrap_err();
        assert_eq!(
            err,
            SparseError::TruncatedEncoding {
                needed: usize::MAX,
                got: 3
            }
        );
    }

    #[test]
    fn compact_encoding_with_huge_nonzero_count_is_an_error() {
        let err = SparsityDescriptor::from_compact(&[1, 1, 0, usize::MAX, 0]).unwrap_err();
        assert_eq!(
            err,
            SparseError::TruncatedEncoding {
                needed: usize::MAX,
                got: 5
            }
        );
    }

    #[test]
    fn overflowing_dense_size_is_rejected() {
        let err = SparsityDescriptor::new(usize::MAX, 2, vec![0, 0, 0], vec![]).unwrap_err();
        assert_eq!(
            err,
            SparseError::TooLarge {
                nrows: usize::MAX,
                ncols: 2
            }
        );
        let err = SparsityDescriptor::new(0, usize::MAX, vec![0], vec![]).unwrap_err();
        assert!(matches!(err, SparseError::TooLarge { .. }));
        assert!(SparsityDescriptor::dense(usize::MAX, 2).is_err());
        assert!(SparsityDescriptor::dense(0, usize::MAX).is_err());
    }

    #[test]
    fn accepted_descriptor_has_a_dense_length() {
        let pattern = SparsityDescriptor::new(usize::MAX, 1, vec![0, 1], vec![7]).unwrap();
        assert_eq!(pattern.dense_len(), usize::MAX);
        assert!(pattern.check_dense(4).is_err());
    }

    #[test]
    fn shape_check() {
        let pattern = sample();
        assert!(pattern.expect_shape(3, 3).is_ok());
        assert!(matches!(pattern.expect_shape(6, 10), Err(SparseError::Shape { .. })));
    }
}
