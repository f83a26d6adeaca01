//! Unpivoted LU factorization and triangular solves
//!
//! Hierarchical LU needs the factors of every diagonal leaf in place, so the
//! dense kernel here never pivots. `L` is unit lower triangular and is stored
//! below the diagonal, `U` occupies the diagonal and above.

use faer::linalg::triangular_solve::{
    solve_lower_triangular_in_place, solve_unit_lower_triangular_in_place,
    solve_upper_triangular_in_place,
};
use faer::Par;

use crate::backend::{view, view_mut};
use crate::error::{LinalgError, Result};
use crate::matrix::Matrix;

fn check_square(a: &Matrix) -> Result<usize> {
    if a.nrows() != a.ncols() {
        return Err(LinalgError::NotSquare {
            nrows: a.nrows(),
            ncols: a.ncols(),
        });
    }
    Ok(a.nrows())
}

fn check_rows(op: &'static str, tri: &Matrix, rhs_rows: usize, rhs_cols: usize) -> Result<()> {
    if tri.nrows() != rhs_rows {
        return Err(LinalgError::DimensionMismatch {
            op,
            lhs_rows: tri.nrows(),
            lhs_cols: tri.ncols(),
            rhs_rows,
            rhs_cols,
        });
    }
    Ok(())
}

/// Factor `a = L · U` in place without pivoting.
///
/// # Errors
/// `NotSquare` for rectangular input, `ZeroPivot` if elimination hits an
/// exactly zero diagonal entry.
pub fn lu_in_place(a: &mut Matrix) -> Result<()> {
    let n = check_square(a)?;

    for k in 0..n {
        let pivot = a[[k, k]];
        if pivot == 0.0 || !pivot.is_finite() {
            return Err(LinalgError::ZeroPivot { index: k });
        }

        for i in (k + 1)..n {
            let val = a[[i, k]] / pivot;
            a[[i, k]] = val;
        }

        // A[k+1:, k+1:] -= A[k+1:, k] * A[k, k+1:]
        for i in (k + 1)..n {
            let x = a[[i, k]];
            if x == 0.0 {
                continue;
            }
            for j in (k + 1)..n {
                let y = a[[k, j]];
                a[[i, j]] -= x * y;
            }
        }
    }
    Ok(())
}

/// Split packed LU storage into explicit `(L, U)`
pub fn unpack_lu(lu: &Matrix) -> (Matrix, Matrix) {
    let n = lu.nrows();
    let l = Matrix::from_fn(n, n, |i, j| match i.cmp(&j) {
        std::cmp::Ordering::Greater => lu[[i, j]],
        std::cmp::Ordering::Equal => 1.0,
        std::cmp::Ordering::Less => 0.0,
    });
    let u = Matrix::from_fn(n, n, |i, j| if i <= j { lu[[i, j]] } else { 0.0 });
    (l, u)
}

/// Solve `L · X = B` in place, `L` the unit lower part of `lu`
pub fn solve_unit_lower_in_place(lu: &Matrix, b: &mut Matrix) -> Result<()> {
    check_square(lu)?;
    check_rows("solve_unit_lower", lu, b.nrows(), b.ncols())?;
    if b.is_empty() {
        return Ok(());
    }
    solve_unit_lower_triangular_in_place(view(lu), view_mut(b), Par::Seq);
    Ok(())
}

/// Solve `U · X = B` in place, `U` the upper part of `lu`
pub fn solve_upper_in_place(lu: &Matrix, b: &mut Matrix) -> Result<()> {
    check_square(lu)?;
    check_rows("solve_upper", lu, b.nrows(), b.ncols())?;
    if b.is_empty() {
        return Ok(());
    }
    solve_upper_triangular_in_place(view(lu), view_mut(b), Par::Seq);
    Ok(())
}

/// Solve `X · U = B` in place, `U` the upper part of `lu`.
///
/// Equivalent to `Uᵗ · Xᵗ = Bᵗ`, solved on transposed views.
pub fn solve_upper_right_in_place(lu: &Matrix, b: &mut Matrix) -> Result<()> {
    check_square(lu)?;
    if lu.nrows() != b.ncols() {
        return Err(LinalgError::DimensionMismatch {
            op: "solve_upper_right",
            lhs_rows: b.nrows(),
            lhs_cols: b.ncols(),
            rhs_rows: lu.nrows(),
            rhs_cols: lu.ncols(),
        });
    }
    if b.is_empty() {
        return Ok(());
    }
    solve_lower_triangular_in_place(view(lu).transpose(), view_mut(b).transpose_mut(), Par::Seq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mat_mul;

    fn diag_dominant(n: usize) -> Matrix {
        Matrix::from_fn(n, n, |i, j| {
            if i == j {
                n as f64 + 1.0
            } else {
                1.0 / (1.0 + (i as f64 - j as f64).abs())
            }
        })
    }

    #[test]
    fn test_lu_reconstructs() {
        let a = diag_dominant(9);
        let mut lu = a.clone();
        lu_in_place(&mut lu).unwrap();
        let (l, u) = unpack_lu(&lu);
        let back = mat_mul(&l, &u).unwrap();
        assert!(back.minus(&a).unwrap().norm_f() < 1e-12 * a.norm_f());
    }

    #[test]
    fn test_lu_zero_pivot() {
        let mut a = Matrix::from_rows(vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert!(matches!(
            lu_in_place(&mut a),
            Err(LinalgError::ZeroPivot { index: 0 })
        ));
    }

    #[test]
    fn test_triangular_solves() {
        let a = diag_dominant(6);
        let mut lu = a.clone();
        lu_in_place(&mut lu).unwrap();
        let (l, u) = unpack_lu(&lu);

        let b = Matrix::from_fn(6, 3, |i, j| (i * 3 + j) as f64 - 4.0);

        let mut x = b.clone();
        solve_unit_lower_in_place(&lu, &mut x).unwrap();
        assert!(mat_mul(&l, &x).unwrap().minus(&b).unwrap().norm_f() < 1e-12);

        let mut y = b.clone();
        solve_upper_in_place(&lu, &mut y).unwrap();
        assert!(mat_mul(&u, &y).unwrap().minus(&b).unwrap().norm_f() < 1e-12);

        let bt = b.transpose();
        let mut z = bt.clone();
        solve_upper_right_in_place(&lu, &mut z).unwrap();
        assert!(mat_mul(&z, &u).unwrap().minus(&bt).unwrap().norm_f() < 1e-12);
    }
}
