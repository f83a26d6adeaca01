//! Explicitly stored leaf blocks

use std::ops::Range;

use hmatrix_linalg::{truncated_svd, Matrix};

use crate::basis::BasisRef;
use crate::block::LowRankBlock;
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// Row-major dense block, mutable in place
#[derive(Debug, Clone, PartialEq)]
pub struct DenseBlock {
    data: Matrix,
}

impl DenseBlock {
    pub fn new(data: Matrix) -> Self {
        Self { data }
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::new(Matrix::zeros(nrows, ncols))
    }

    /// Evaluate `eval` on `row_start..row_start + nrows` ×
    /// `col_start..col_start + ncols`.
    pub fn from_fn<E>(eval: &E, row_start: usize, col_start: usize, nrows: usize, ncols: usize) -> Self
    where
        E: Fn(usize, usize) -> f64 + ?Sized,
    {
        Self::new(Matrix::from_fn(nrows, ncols, |i, j| {
            eval(row_start + i, col_start + j)
        }))
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn matrix(&self) -> &Matrix {
        &self.data
    }

    pub fn matrix_mut(&mut self) -> &mut Matrix {
        &mut self.data
    }

    pub fn into_matrix(self) -> Matrix {
        self.data
    }

    /// Copy of a sub-range
    pub fn submatrix(&self, rows: Range<usize>, cols: Range<usize>) -> DenseBlock {
        DenseBlock::new(self.data.submatrix(rows, cols))
    }

    /// Overwrite the sub-range starting at `(row0, col0)`
    pub fn set_submatrix(&mut self, row0: usize, col0: usize, block: &Matrix) -> Result<()> {
        Ok(self.data.set_submatrix(row0, col0, block)?)
    }

    /// Truncated SVD to `min(target rank, numerical rank at rtol)`
    pub fn to_low_rank(&self, opts: &HMatrixOptions) -> Result<LowRankBlock> {
        let (u, v) = truncated_svd(&self.data, &opts.truncation())?;
        LowRankBlock::new(u, v)
    }

    /// Project onto a row/column basis pair: `U = Q_r · (Q_rᵗ A Q_c)`, `V = Q_c`.
    pub fn to_low_rank_from_bases(&self, rows: &BasisRef, cols: &BasisRef) -> Result<LowRankBlock> {
        if rows.dim() != self.nrows() || cols.dim() != self.ncols() {
            return Err(HMatrixError::dimension(
                "to_low_rank_from_bases",
                self.data.shape(),
                (rows.dim(), cols.dim()),
            ));
        }
        let coupling = rows.coupling_of(&self.data, cols)?;
        let u = rows.reconstruct(&coupling)?;
        let v = cols.expand()?;
        LowRankBlock::from_factors(u, v)
    }
}

impl From<Matrix> for DenseBlock {
    fn from(data: Matrix) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_offsets() {
        let d = DenseBlock::from_fn(&|i: usize, j: usize| (10 * i + j) as f64, 2, 3, 2, 2);
        assert_eq!(d.matrix()[[0, 0]], 23.0);
        assert_eq!(d.matrix()[[1, 1]], 34.0);
    }

    #[test]
    fn test_to_low_rank_truncates_to_target() {
        let d = DenseBlock::from_fn(&|i: usize, j: usize| 1.0 / (1.0 + i as f64 + j as f64), 0, 0, 20, 20);
        let lr = d.to_low_rank(&HMatrixOptions::default().with_rank(3)).unwrap();
        assert_eq!(lr.rank(), 3);
        assert_eq!((lr.nrows(), lr.ncols()), (20, 20));
    }
}
