//! faer views over row-major [`Matrix`] storage and the GEMM kernel

use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Mat, MatMut, MatRef, Par};

use crate::error::{LinalgError, Result};
use crate::matrix::Matrix;

/// Row-major view: row_stride = ncols, col_stride = 1
pub(crate) fn view(m: &Matrix) -> MatRef<'_, f64> {
    MatRef::from_row_major_slice(m.as_slice(), m.nrows(), m.ncols())
}

pub(crate) fn view_mut(m: &mut Matrix) -> MatMut<'_, f64> {
    let (nrows, ncols) = m.shape();
    MatMut::from_row_major_slice_mut(m.as_mut_slice(), nrows, ncols)
}

/// Copy an owned faer matrix back into row-major storage
pub(crate) fn from_faer(m: &Mat<f64>) -> Matrix {
    Matrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)])
}

/// Which operands enter the product transposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    /// `A · B`
    None,
    /// `Aᵗ · B`
    Lhs,
    /// `A · Bᵗ`
    Rhs,
}

/// `C ← alpha · op(A) · op(B) + beta · C`
pub fn gemm_into(
    c: &mut Matrix,
    alpha: f64,
    a: &Matrix,
    b: &Matrix,
    beta: f64,
    trans: Transpose,
) -> Result<()> {
    let (a_view, b_view) = match trans {
        Transpose::None => (view(a), view(b)),
        Transpose::Lhs => (view(a).transpose(), view(b)),
        Transpose::Rhs => (view(a), view(b).transpose()),
    };

    if a_view.ncols() != b_view.nrows()
        || c.nrows() != a_view.nrows()
        || c.ncols() != b_view.ncols()
    {
        return Err(LinalgError::DimensionMismatch {
            op: "gemm",
            lhs_rows: a_view.nrows(),
            lhs_cols: a_view.ncols(),
            rhs_rows: b_view.nrows(),
            rhs_cols: b_view.ncols(),
        });
    }

    if a_view.ncols() == 0 {
        if beta == 0.0 {
            c.as_mut_slice().fill(0.0);
        } else {
            c.scale_in_place(beta);
        }
        return Ok(());
    }

    if beta == 0.0 {
        let mut c_mat = view_mut(c);
        faer_matmul(&mut c_mat, Accum::Replace, a_view, b_view, alpha, Par::Seq);
    } else {
        c.scale_in_place(beta);
        let mut c_mat = view_mut(c);
        faer_matmul(&mut c_mat, Accum::Add, a_view, b_view, alpha, Par::Seq);
    }
    Ok(())
}

/// `A · B`
pub fn mat_mul(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    let mut c = Matrix::zeros(a.nrows(), b.ncols());
    gemm_into(&mut c, 1.0, a, b, 0.0, Transpose::None)?;
    Ok(c)
}

/// `Aᵗ · B`
pub fn mat_mul_tn(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    let mut c = Matrix::zeros(a.ncols(), b.ncols());
    gemm_into(&mut c, 1.0, a, b, 0.0, Transpose::Lhs)?;
    Ok(c)
}

/// `A · Bᵗ`
pub fn mat_mul_nt(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    let mut c = Matrix::zeros(a.nrows(), b.nrows());
    gemm_into(&mut c, 1.0, a, b, 0.0, Transpose::Rhs)?;
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat_mul_small() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let b = Matrix::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        let c = mat_mul(&a, &b).unwrap();
        assert_eq!(c, Matrix::from_rows(vec![vec![4.0, 5.0], vec![10.0, 11.0]]));
    }

    #[test]
    fn test_transposed_variants() {
        let a = Matrix::from_fn(3, 2, |i, j| (i + 2 * j) as f64);
        let b = Matrix::from_fn(3, 4, |i, j| (i * j) as f64 + 1.0);

        let tn = mat_mul_tn(&a, &b).unwrap();
        let expected = mat_mul(&a.transpose(), &b).unwrap();
        assert!(tn.minus(&expected).unwrap().norm_f() < 1e-12);

        let c = Matrix::from_fn(5, 2, |i, j| (i as f64) - (j as f64));
        let nt = mat_mul_nt(&a, &c).unwrap();
        let expected = mat_mul(&a, &c.transpose()).unwrap();
        assert!(nt.minus(&expected).unwrap().norm_f() < 1e-12);
    }

    #[test]
    fn test_gemm_accumulates() {
        let a = Matrix::identity(2);
        let b = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let mut c = Matrix::from_rows(vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        gemm_into(&mut c, 2.0, &a, &b, 3.0, Transpose::None).unwrap();
        assert_eq!(c, Matrix::from_rows(vec![vec![5.0, 7.0], vec![9.0, 11.0]]));
    }

    #[test]
    fn test_gemm_shape_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(mat_mul(&a, &b).is_err());
    }
}
