//! Row-major dense matrix of doubles

use std::ops::{Index, IndexMut, Range};

use crate::error::{LinalgError, Result};

/// Simple 2D matrix backed by a row-major `Vec<f64>`
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl Matrix {
    /// Create a zeros matrix
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// Create an identity matrix
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[[i, i]] = 1.0;
        }
        m
    }

    /// Create a matrix by evaluating `f(i, j)` at every position
    pub fn from_fn(nrows: usize, ncols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            for j in 0..ncols {
                data.push(f(i, j));
            }
        }
        Self { data, nrows, ncols }
    }

    /// Wrap a row-major buffer
    pub fn from_vec(nrows: usize, ncols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != nrows * ncols {
            return Err(LinalgError::DataLength {
                len: data.len(),
                nrows,
                ncols,
            });
        }
        Ok(Self { data, nrows, ncols })
    }

    /// Create a matrix from a 2D vector (row-major)
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let nrows = rows.len();
        let ncols = if nrows > 0 { rows[0].len() } else { 0 };
        Self::from_fn(nrows, ncols, |i, j| rows[i][j])
    }

    /// Number of rows
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// `(nrows, ncols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Row `i` as a slice
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.ncols..(i + 1) * self.ncols]
    }

    /// Transpose the matrix
    pub fn transpose(&self) -> Matrix {
        let mut result = Matrix::zeros(self.ncols, self.nrows);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                result[[j, i]] = self[[i, j]];
            }
        }
        result
    }

    /// Frobenius norm
    pub fn norm_f(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Multiply every entry by `alpha`
    pub fn scale_in_place(&mut self, alpha: f64) {
        if alpha == 1.0 {
            return;
        }
        for x in &mut self.data {
            *x *= alpha;
        }
    }

    /// Return `alpha * self`
    pub fn scaled(&self, alpha: f64) -> Matrix {
        let mut m = self.clone();
        m.scale_in_place(alpha);
        m
    }

    /// `self += alpha * other`
    pub fn axpy(&mut self, alpha: f64, other: &Matrix) -> Result<()> {
        self.check_same_shape("axpy", other)?;
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x += alpha * y;
        }
        Ok(())
    }

    /// `self - other`
    pub fn minus(&self, other: &Matrix) -> Result<Matrix> {
        let mut m = self.clone();
        m.axpy(-1.0, other)?;
        Ok(m)
    }

    /// Elementwise product
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix> {
        self.check_same_shape("hadamard", other)?;
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(x, y)| x * y)
            .collect();
        Ok(Matrix {
            data,
            nrows: self.nrows,
            ncols: self.ncols,
        })
    }

    /// Copy of the sub-range `rows × cols`
    pub fn submatrix(&self, rows: Range<usize>, cols: Range<usize>) -> Matrix {
        let c0 = cols.start;
        let nc = cols.len();
        let mut out = Matrix::zeros(rows.len(), nc);
        for (ri, i) in rows.enumerate() {
            let src = &self.data[i * self.ncols + c0..i * self.ncols + c0 + nc];
            out.data[ri * nc..(ri + 1) * nc].copy_from_slice(src);
        }
        out
    }

    /// Copy of the rows in `rows`
    pub fn rows(&self, rows: Range<usize>) -> Matrix {
        Matrix {
            data: self.data[rows.start * self.ncols..rows.end * self.ncols].to_vec(),
            nrows: rows.len(),
            ncols: self.ncols,
        }
    }

    /// Copy of the columns in `cols`
    pub fn columns(&self, cols: Range<usize>) -> Matrix {
        self.submatrix(0..self.nrows, cols)
    }

    /// Overwrite the block starting at `(row0, col0)` with `block`
    pub fn set_submatrix(&mut self, row0: usize, col0: usize, block: &Matrix) -> Result<()> {
        if row0 + block.nrows > self.nrows || col0 + block.ncols > self.ncols {
            return Err(LinalgError::DimensionMismatch {
                op: "set_submatrix",
                lhs_rows: self.nrows,
                lhs_cols: self.ncols,
                rhs_rows: row0 + block.nrows,
                rhs_cols: col0 + block.ncols,
            });
        }
        let nc = block.ncols;
        for i in 0..block.nrows {
            let dst = (row0 + i) * self.ncols + col0;
            self.data[dst..dst + nc].copy_from_slice(block.row(i));
        }
        Ok(())
    }

    /// Concatenate matrices side by side
    pub fn hcat(blocks: &[&Matrix]) -> Result<Matrix> {
        let nrows = blocks.first().map_or(0, |b| b.nrows);
        let ncols = blocks.iter().map(|b| b.ncols).sum();
        let mut out = Matrix::zeros(nrows, ncols);
        let mut col0 = 0;
        for b in blocks {
            out.set_submatrix(0, col0, b)?;
            col0 += b.ncols;
        }
        Ok(out)
    }

    /// Stack matrices vertically
    pub fn vcat(blocks: &[&Matrix]) -> Result<Matrix> {
        let ncols = blocks.first().map_or(0, |b| b.ncols);
        let mut data = Vec::new();
        let mut nrows = 0;
        for b in blocks {
            if b.ncols != ncols {
                return Err(LinalgError::DimensionMismatch {
                    op: "vcat",
                    lhs_rows: nrows,
                    lhs_cols: ncols,
                    rhs_rows: b.nrows,
                    rhs_cols: b.ncols,
                });
            }
            data.extend_from_slice(&b.data);
            nrows += b.nrows;
        }
        Ok(Matrix { data, nrows, ncols })
    }

    fn check_same_shape(&self, op: &'static str, other: &Matrix) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(LinalgError::DimensionMismatch {
                op,
                lhs_rows: self.nrows,
                lhs_cols: self.ncols,
                rhs_rows: other.nrows,
                rhs_cols: other.ncols,
            });
        }
        Ok(())
    }
}

impl Index<[usize; 2]> for Matrix {
    type Output = f64;

    fn index(&self, idx: [usize; 2]) -> &Self::Output {
        &self.data[idx[0] * self.ncols + idx[1]]
    }
}

impl IndexMut<[usize; 2]> for Matrix {
    fn index_mut(&mut self, idx: [usize; 2]) -> &mut Self::Output {
        &mut self.data[idx[0] * self.ncols + idx[1]]
    }
}

/// Relative Frobenius distance `‖a - b‖ / ‖b‖`, falling back to the absolute
/// distance when `b` is zero
pub fn relative_error(a: &Matrix, b: &Matrix) -> Result<f64> {
    let diff = a.minus(b)?.norm_f();
    let scale = b.norm_f();
    Ok(if scale > 0.0 { diff / scale } else { diff })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submatrix_and_set() {
        let m = Matrix::from_fn(4, 5, |i, j| (i * 10 + j) as f64);
        let sub = m.submatrix(1..3, 2..5);
        assert_eq!(sub.shape(), (2, 3));
        assert_eq!(sub[[0, 0]], 12.0);
        assert_eq!(sub[[1, 2]], 24.0);

        let mut z = Matrix::zeros(4, 5);
        z.set_submatrix(1, 2, &sub).unwrap();
        assert_eq!(z[[2, 4]], 24.0);
        assert_eq!(z[[0, 0]], 0.0);
        assert!(z.set_submatrix(3, 3, &sub).is_err());
    }

    #[test]
    fn test_hcat_vcat() {
        let a = Matrix::from_rows(vec![vec![1.0], vec![2.0]]);
        let b = Matrix::from_rows(vec![vec![3.0, 4.0], vec![5.0, 6.0]]);
        let h = Matrix::hcat(&[&a, &b]).unwrap();
        assert_eq!(h.row(1), &[2.0, 5.0, 6.0]);

        let v = Matrix::vcat(&[&b, &b]).unwrap();
        assert_eq!(v.shape(), (4, 2));
        assert!(Matrix::vcat(&[&a, &b]).is_err());
    }

    #[test]
    fn test_transpose_and_norm() {
        let m = Matrix::from_rows(vec![vec![3.0, 0.0, 0.0], vec![0.0, 4.0, 0.0]]);
        let t = m.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t[[1, 1]], 4.0);
        assert!((m.norm_f() - 5.0).abs() < 1e-14);
    }

    #[test]
    fn test_from_vec_length_check() {
        assert!(Matrix::from_vec(2, 2, vec![1.0; 3]).is_err());
        assert!(Matrix::from_vec(0, 7, vec![]).is_ok());
    }
}
