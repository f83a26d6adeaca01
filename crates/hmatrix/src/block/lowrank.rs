//! Low-rank blocks `U · Vᵗ` and their un-truncated accumulator form

use std::ops::Range;

use hmatrix_linalg::{mat_mul_nt, recompress, truncated_svd, Matrix, TruncateOptions};

use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// Block stored as `U (rows × k) · V (cols × k)ᵗ`
#[derive(Debug, Clone, PartialEq)]
pub struct LowRankBlock {
    u: Matrix,
    v: Matrix,
}

impl LowRankBlock {
    /// Wrap factors; they must share an inner dimension of at most
    /// `min(rows, cols)`
    pub fn new(u: Matrix, v: Matrix) -> Result<Self> {
        if u.ncols() != v.ncols() {
            return Err(HMatrixError::dimension("low_rank", u.shape(), v.shape()));
        }
        if u.ncols() > u.nrows().min(v.nrows()) {
            return Err(HMatrixError::dimension(
                "low_rank rank",
                (u.nrows(), v.nrows()),
                (u.ncols(), u.ncols()),
            ));
        }
        Ok(Self { u, v })
    }

    /// Factors of any inner dimension, reduced without truncation to at most
    /// `min(rows, cols)` columns
    pub(crate) fn from_factors(u: Matrix, v: Matrix) -> Result<Self> {
        if u.ncols() != v.ncols() {
            return Err(HMatrixError::dimension("low_rank", u.shape(), v.shape()));
        }
        let cap = u.nrows().min(v.nrows());
        if u.ncols() <= cap {
            return Ok(Self { u, v });
        }
        let exact = TruncateOptions::default().with_rtol(0.0).with_max_rank(cap);
        let (u, v) = recompress(&u, &v, &exact)?;
        Ok(Self { u, v })
    }

    /// Rank-0 block of the given extent
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            u: Matrix::zeros(nrows, 0),
            v: Matrix::zeros(ncols, 0),
        }
    }

    /// Truncated factorization of a dense matrix
    pub fn from_dense(a: &Matrix, opts: &HMatrixOptions) -> Result<Self> {
        let (u, v) = truncated_svd(a, &opts.truncation())?;
        Self::new(u, v)
    }

    pub fn nrows(&self) -> usize {
        self.u.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.v.nrows()
    }

    pub fn rank(&self) -> usize {
        self.u.ncols()
    }

    pub fn u(&self) -> &Matrix {
        &self.u
    }

    pub fn v(&self) -> &Matrix {
        &self.v
    }

    pub fn into_factors(self) -> (Matrix, Matrix) {
        (self.u, self.v)
    }

    pub fn to_dense(&self) -> Result<Matrix> {
        Ok(mat_mul_nt(&self.u, &self.v)?)
    }

    pub fn scale(&mut self, alpha: f64) {
        self.u.scale_in_place(alpha);
    }

    /// Restriction to a sub-range, the rank capped at the new extent
    pub fn restrict(&self, rows: Range<usize>, cols: Range<usize>) -> Result<LowRankBlock> {
        Self::from_factors(self.u.rows(rows), self.v.rows(cols))
    }

    /// Recompress to the target rank and tolerance
    pub fn truncate(&mut self, opts: &HMatrixOptions) -> Result<()> {
        let (u, v) = recompress(&self.u, &self.v, &opts.truncation())?;
        self.u = u;
        self.v = v;
        Ok(())
    }

    /// `self ← beta · self + other`, recompressed
    pub fn add_scaled(&mut self, beta: f64, other: &LowRankBlock, opts: &HMatrixOptions) -> Result<()> {
        self.check_extent("add_low_rank", other.nrows(), other.ncols())?;
        let u = Matrix::hcat(&[&self.u.scaled(beta), &other.u])?;
        let v = Matrix::hcat(&[&self.v, &other.v])?;
        let (u, v) = recompress(&u, &v, &opts.truncation())?;
        self.u = u;
        self.v = v;
        Ok(())
    }

    /// Elementwise product through the row-wise Khatri-Rao product of the
    /// factors, then recompressed
    pub fn hadamard(&self, other: &LowRankBlock, opts: &HMatrixOptions) -> Result<LowRankBlock> {
        self.check_extent("hadamard", other.nrows(), other.ncols())?;
        let u = khatri_rao_rows(&self.u, &other.u);
        let v = khatri_rao_rows(&self.v, &other.v);
        let (u, v) = recompress(&u, &v, &opts.truncation())?;
        LowRankBlock::new(u, v)
    }

    pub(crate) fn payload_len(&self) -> usize {
        self.u.len() + self.v.len()
    }

    fn check_extent(&self, op: &'static str, nrows: usize, ncols: usize) -> Result<()> {
        if (self.nrows(), self.ncols()) != (nrows, ncols) {
            return Err(HMatrixError::dimension(
                op,
                (self.nrows(), self.ncols()),
                (nrows, ncols),
            ));
        }
        Ok(())
    }
}

/// Row `i` of the result is `kron(a[i, :], b[i, :])`
fn khatri_rao_rows(a: &Matrix, b: &Matrix) -> Matrix {
    let kb = b.ncols();
    Matrix::from_fn(a.nrows(), a.ncols() * kb, |i, j| a[[i, j / kb]] * b[[i, j % kb]])
}

/// Un-truncated running sum of outer products.
///
/// Contributions are only concatenated; compression happens once, when the
/// sum is converted back into a [`LowRankBlock`].
#[derive(Debug, Clone)]
pub struct LowRankAccumulator {
    nrows: usize,
    ncols: usize,
    us: Vec<Matrix>,
    vs: Vec<Matrix>,
}

impl LowRankAccumulator {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            us: Vec::new(),
            vs: Vec::new(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_empty(&self) -> bool {
        self.us.is_empty()
    }

    /// Sum of the ranks of all contributions
    pub fn rank(&self) -> usize {
        self.us.iter().map(Matrix::ncols).sum()
    }

    /// Append `u · vᵗ`
    pub fn push(&mut self, u: Matrix, v: Matrix) -> Result<()> {
        if u.nrows() != self.nrows || v.nrows() != self.ncols || u.ncols() != v.ncols() {
            return Err(HMatrixError::dimension(
                "accumulate",
                (self.nrows, self.ncols),
                (u.nrows(), v.nrows()),
            ));
        }
        if u.ncols() > 0 {
            self.us.push(u);
            self.vs.push(v);
        }
        Ok(())
    }

    pub fn push_block(&mut self, block: LowRankBlock) -> Result<()> {
        let (u, v) = block.into_factors();
        self.push(u, v)
    }

    pub fn scale(&mut self, alpha: f64) {
        for u in &mut self.us {
            u.scale_in_place(alpha);
        }
    }

    /// Concatenated factors without compression
    pub fn factors(&self) -> Result<(Matrix, Matrix)> {
        if self.us.is_empty() {
            return Ok((Matrix::zeros(self.nrows, 0), Matrix::zeros(self.ncols, 0)));
        }
        let us: Vec<&Matrix> = self.us.iter().collect();
        let vs: Vec<&Matrix> = self.vs.iter().collect();
        Ok((Matrix::hcat(&us)?, Matrix::hcat(&vs)?))
    }

    /// Compress the accumulated sum
    pub fn to_low_rank(&self, opts: &HMatrixOptions) -> Result<LowRankBlock> {
        let (u, v) = self.factors()?;
        let (u, v) = recompress(&u, &v, &opts.truncation())?;
        LowRankBlock::new(u, v)
    }

    pub fn to_dense(&self) -> Result<Matrix> {
        let (u, v) = self.factors()?;
        Ok(mat_mul_nt(&u, &v)?)
    }

    pub(crate) fn payload_len(&self) -> usize {
        self.us.iter().chain(&self.vs).map(Matrix::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outer(nrows: usize, ncols: usize, shift: f64) -> LowRankBlock {
        let u = Matrix::from_fn(nrows, 1, |i, _| i as f64 + shift);
        let v = Matrix::from_fn(ncols, 1, |j, _| 1.0 / (1.0 + j as f64));
        LowRankBlock::new(u, v).unwrap()
    }

    #[test]
    fn test_factor_shape_checked() {
        assert!(LowRankBlock::new(Matrix::zeros(4, 2), Matrix::zeros(3, 1)).is_err());
        assert!(matches!(
            LowRankBlock::new(Matrix::zeros(2, 5), Matrix::zeros(2, 5)),
            Err(HMatrixError::Dimension { .. })
        ));
        let z = LowRankBlock::zeros(4, 3);
        assert_eq!(z.rank(), 0);
        assert_eq!(z.to_dense().unwrap(), Matrix::zeros(4, 3));
    }

    #[test]
    fn test_add_scaled_recompresses() {
        let opts = HMatrixOptions::default();
        let mut a = outer(6, 5, 0.0);
        let b = outer(6, 5, 0.0);
        let expected = a.to_dense().unwrap().scaled(3.0);
        a.add_scaled(2.0, &b, &opts).unwrap();
        assert_eq!(a.rank(), 1);
        assert!(a.to_dense().unwrap().minus(&expected).unwrap().norm_f() < 1e-12);
    }

    #[test]
    fn test_hadamard_matches_dense() {
        let opts = HMatrixOptions::default();
        let a = outer(5, 4, 1.0);
        let b = outer(5, 4, -2.0);
        let h = a.hadamard(&b, &opts).unwrap();
        let expected = a.to_dense().unwrap().hadamard(&b.to_dense().unwrap()).unwrap();
        assert!(h.to_dense().unwrap().minus(&expected).unwrap().norm_f() < 1e-12);
    }

    #[test]
    fn test_accumulator_defers_compression() {
        let opts = HMatrixOptions::default();
        let mut acc = LowRankAccumulator::new(6, 5);
        acc.push_block(outer(6, 5, 0.0)).unwrap();
        acc.push_block(outer(6, 5, 0.0)).unwrap();
        assert_eq!(acc.rank(), 2);

        let lr = acc.to_low_rank(&opts).unwrap();
        assert_eq!(lr.rank(), 1);
        assert!(lr.to_dense().unwrap().minus(&acc.to_dense().unwrap()).unwrap().norm_f() < 1e-12);
        assert!(acc.push(Matrix::zeros(5, 1), Matrix::zeros(5, 1)).is_err());
    }

    #[test]
    fn test_restrict_caps_rank() {
        let u = Matrix::from_fn(6, 3, |i, j| ((i + 1) * (j + 2)) as f64 + (i * j) as f64 * 0.5);
        let v = Matrix::from_fn(5, 3, |i, j| 1.0 / (1.0 + i as f64 + 2.0 * j as f64));
        let lr = LowRankBlock::new(u, v).unwrap();
        let full = lr.to_dense().unwrap();

        let sub = lr.restrict(1..3, 0..5).unwrap();
        assert_eq!(sub.rank(), 2);
        assert_eq!((sub.nrows(), sub.ncols()), (2, 5));
        let expected = full.submatrix(1..3, 0..5);
        assert!(sub.to_dense().unwrap().minus(&expected).unwrap().norm_f() < 1e-12 * expected.norm_f());

        let same = lr.restrict(0..4, 1..4).unwrap();
        assert_eq!(same.rank(), 3);
    }

    #[test]
    fn test_from_factors_reduces_wide_inner_dimension() {
        let u = Matrix::from_fn(2, 4, |i, j| (i + j) as f64 + 1.0);
        let v = Matrix::from_fn(3, 4, |i, j| (i * j) as f64 + 1.0);
        let dense = mat_mul_nt(&u, &v).unwrap();
        let lr = LowRankBlock::from_factors(u, v).unwrap();
        assert!(lr.rank() <= 2);
        assert!(lr.to_dense().unwrap().minus(&dense).unwrap().norm_f() < 1e-10 * dense.norm_f());
    }
}
