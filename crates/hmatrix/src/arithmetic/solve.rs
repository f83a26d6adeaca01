//! Triangular solves against factored blocks
//!
//! A factored block stores `L` (unit lower triangular, strictly below the
//! diagonal) and `U` (diagonal and above) in the same structure, as left by
//! [`lu`](crate::arithmetic::lu).

use hmatrix_linalg::{solve_unit_lower_in_place, solve_upper_in_place, solve_upper_right_in_place, Matrix};

use crate::arithmetic::{as_grid_mut, conform, gemm, grid_of, Grid};
use crate::block::{Block, LowRankBlock};
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

fn check_left(op: &'static str, tri: &Block, rhs: (usize, usize)) -> Result<()> {
    if tri.nrows() != tri.ncols() || tri.ncols() != rhs.0 {
        return Err(HMatrixError::dimension(op, tri.shape(), rhs));
    }
    Ok(())
}

fn check_right(op: &'static str, tri: &Block, rhs: (usize, usize)) -> Result<()> {
    if tri.nrows() != tri.ncols() || tri.nrows() != rhs.1 {
        return Err(HMatrixError::dimension(op, tri.shape(), rhs));
    }
    Ok(())
}

/// Square grid view of a factored block with matching row and column groups
fn square_grid<'a>(tri: &'a Block, op: &'static str) -> Result<&'a dyn Grid> {
    let g = grid_of(tri, op)?;
    let (rs, cs) = (g.row_sizes(), g.col_sizes());
    if rs != cs {
        return Err(HMatrixError::dimension(op, (rs.len(), cs.len()), (cs.len(), rs.len())));
    }
    Ok(g)
}

/// Solve `L · X = B` (or `U · X = B` when `is_upper`) for a dense `B` in place
pub(crate) fn solve_matrix(tri: &Block, b: &mut Matrix, is_upper: bool) -> Result<()> {
    check_left("solve", tri, b.shape())?;
    match tri {
        Block::Dense(d) => {
            if is_upper {
                solve_upper_in_place(d.matrix(), b)?;
            } else {
                solve_unit_lower_in_place(d.matrix(), b)?;
            }
            Ok(())
        }
        Block::LowRank(_) => Err(HMatrixError::UnsupportedOperand { op: "solve", kind: tri.kind() }),
        _ => {
            let g = square_grid(tri, "solve")?;
            let sizes = g.row_sizes();
            let n = sizes.len();
            let mut starts = Vec::with_capacity(n);
            let mut parts = Vec::with_capacity(n);
            let mut offset = 0;
            for &s in &sizes {
                starts.push(offset);
                parts.push(b.rows(offset..offset + s));
                offset += s;
            }

            let order: Vec<usize> = if is_upper { (0..n).rev().collect() } else { (0..n).collect() };
            for (pos, &i) in order.iter().enumerate() {
                for &k in &order[..pos] {
                    let update = g.operand(i, k)?.mul_matrix(&parts[k])?;
                    parts[i].axpy(-1.0, &update)?;
                }
                solve_matrix(&*g.operand(i, i)?, &mut parts[i], is_upper)?;
            }

            for (start, part) in starts.into_iter().zip(&parts) {
                b.set_submatrix(start, 0, part)?;
            }
            Ok(())
        }
    }
}

/// Solve `X · U = B` for a dense `B` in place
pub(crate) fn solve_matrix_right(tri: &Block, b: &mut Matrix) -> Result<()> {
    check_right("solve_right_upper", tri, b.shape())?;
    match tri {
        Block::Dense(d) => Ok(solve_upper_right_in_place(d.matrix(), b)?),
        Block::LowRank(_) => Err(HMatrixError::UnsupportedOperand {
            op: "solve_right_upper",
            kind: tri.kind(),
        }),
        _ => {
            let g = square_grid(tri, "solve_right_upper")?;
            let sizes = g.col_sizes();
            let mut starts = Vec::with_capacity(sizes.len());
            let mut parts: Vec<Matrix> = Vec::with_capacity(sizes.len());
            let mut offset = 0;
            for &s in &sizes {
                starts.push(offset);
                parts.push(b.columns(offset..offset + s));
                offset += s;
            }

            for j in 0..sizes.len() {
                for k in 0..j {
                    // X_k · U_kj = (U_kjᵗ · X_kᵗ)ᵗ
                    let update = g.operand(k, j)?.tmul_matrix(&parts[k].transpose())?.transpose();
                    parts[j].axpy(-1.0, &update)?;
                }
                solve_matrix_right(&*g.operand(j, j)?, &mut parts[j])?;
            }

            for (start, part) in starts.into_iter().zip(&parts) {
                b.set_submatrix(0, start, part)?;
            }
            Ok(())
        }
    }
}

/// Overwrite `b` with `L⁻¹ · b`, or `U⁻¹ · b` when `is_upper`.
///
/// `tri` must be a factored block. A grid `b` is solved block-row by
/// block-row with `tri` re-partitioned to its row groups.
pub fn solve(tri: &Block, b: &mut Block, is_upper: bool, opts: &HMatrixOptions) -> Result<()> {
    check_left("solve", tri, b.shape())?;
    if matches!(tri, Block::LowRank(_)) {
        return Err(HMatrixError::UnsupportedOperand { op: "solve", kind: tri.kind() });
    }
    match b {
        Block::Dense(d) => solve_matrix(tri, d.matrix_mut(), is_upper),
        Block::LowRank(lr) => {
            let (mut u, v) = lr.clone().into_factors();
            solve_matrix(tri, &mut u, is_upper)?;
            *lr = LowRankBlock::new(u, v)?;
            Ok(())
        }
        Block::Hierarchical(_) | Block::Uniform(_) => {
            if let Block::Uniform(ub) = b {
                ub.flush_pending(opts)?;
            }
            let Some((row_sizes, _)) = b.grid_sizes() else {
                return Ok(());
            };
            let tc = conform(tri, &row_sizes, &row_sizes)?;
            let tg = grid_of(&tc, "solve")?;
            let kind = b.kind();
            let bg = as_grid_mut(b).ok_or(HMatrixError::UnsupportedOperand { op: "solve", kind })?;
            let (m, n) = bg.grid_shape();
            let order: Vec<usize> = if is_upper { (0..m).rev().collect() } else { (0..m).collect() };

            for j in 0..n {
                for (pos, &i) in order.iter().enumerate() {
                    let mut target = bg.take_child(i, j)?;
                    for &k in &order[..pos] {
                        let solved = bg.operand(k, j)?;
                        gemm(-1.0, &*tg.operand(i, k)?, &solved, 1.0, &mut target, opts)?;
                    }
                    solve(&*tg.operand(i, i)?, &mut target, is_upper, opts)?;
                    bg.put_child(i, j, target)?;
                }
            }
            Ok(())
        }
    }
}

/// Overwrite `b` with `b · U⁻¹`
pub fn solve_right_upper(tri: &Block, b: &mut Block, opts: &HMatrixOptions) -> Result<()> {
    check_right("solve_right_upper", tri, b.shape())?;
    if matches!(tri, Block::LowRank(_)) {
        return Err(HMatrixError::UnsupportedOperand {
            op: "solve_right_upper",
            kind: tri.kind(),
        });
    }
    match b {
        Block::Dense(d) => solve_matrix_right(tri, d.matrix_mut()),
        Block::LowRank(lr) => {
            // U · Vᵗ · U⁻¹ keeps U; Vᵗ ← Vᵗ · U⁻¹
            let (u, v) = lr.clone().into_factors();
            let mut vt = v.transpose();
            solve_matrix_right(tri, &mut vt)?;
            *lr = LowRankBlock::new(u, vt.transpose())?;
            Ok(())
        }
        Block::Hierarchical(_) | Block::Uniform(_) => {
            if let Block::Uniform(ub) = b {
                ub.flush_pending(opts)?;
            }
            let Some((_, col_sizes)) = b.grid_sizes() else {
                return Ok(());
            };
            let tc = conform(tri, &col_sizes, &col_sizes)?;
            let tg = grid_of(&tc, "solve_right_upper")?;
            let kind = b.kind();
            let bg = as_grid_mut(b).ok_or(HMatrixError::UnsupportedOperand {
                op: "solve_right_upper",
                kind,
            })?;
            let (m, n) = bg.grid_shape();

            for i in 0..m {
                for j in 0..n {
                    let mut target = bg.take_child(i, j)?;
                    for k in 0..j {
                        let solved = bg.operand(i, k)?;
                        gemm(-1.0, &solved, &*tg.operand(k, j)?, 1.0, &mut target, opts)?;
                    }
                    solve_right_upper(&*tg.operand(j, j)?, &mut target, opts)?;
                    bg.put_child(i, j, target)?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DenseBlock;
    use hmatrix_linalg::{lu_in_place, mat_mul, unpack_lu};

    fn diag_dominant(n: usize) -> Matrix {
        Matrix::from_fn(n, n, |i, j| if i == j { n as f64 } else { 1.0 / (1.0 + i as f64 + 2.0 * j as f64) })
    }

    fn factored(n: usize) -> (Matrix, Matrix, Matrix) {
        let a = diag_dominant(n);
        let mut packed = a.clone();
        lu_in_place(&mut packed).unwrap();
        let (l, u) = unpack_lu(&packed);
        (packed, l, u)
    }

    #[test]
    fn test_solve_grid_tri_dense_rhs() {
        let (packed, l, u) = factored(8);
        let tri = Block::Dense(DenseBlock::new(packed)).into_hierarchical(2, 2).unwrap();
        let b0 = Matrix::from_fn(8, 3, |i, j| (i + j) as f64);

        let mut x = b0.clone();
        solve_matrix(&tri, &mut x, false).unwrap();
        assert!(mat_mul(&l, &x).unwrap().minus(&b0).unwrap().norm_f() < 1e-10);

        let mut y = b0.clone();
        solve_matrix(&tri, &mut y, true).unwrap();
        assert!(mat_mul(&u, &y).unwrap().minus(&b0).unwrap().norm_f() < 1e-10);
    }

    #[test]
    fn test_solve_hierarchical_rhs() {
        let opts = HMatrixOptions::default();
        let (packed, l, _) = factored(8);
        let tri = Block::Dense(DenseBlock::new(packed)).into_hierarchical(2, 2).unwrap();
        let b0 = Matrix::from_fn(8, 8, |i, j| ((i * 3 + j) % 5) as f64);
        let mut b = Block::Dense(DenseBlock::new(b0.clone())).into_hierarchical(4, 2).unwrap();

        solve(&tri, &mut b, false, &opts).unwrap();
        let x = b.to_dense().unwrap();
        assert!(mat_mul(&l, &x).unwrap().minus(&b0).unwrap().norm_f() < 1e-10);
    }

    #[test]
    fn test_solve_right_upper_low_rank() {
        let opts = HMatrixOptions::default();
        let (packed, _, u) = factored(6);
        let tri = Block::Dense(DenseBlock::new(packed));
        let b0 = Matrix::from_fn(4, 6, |i, j| (i as f64 + 1.0) * (j as f64 - 2.0));
        let mut b = Block::LowRank(LowRankBlock::from_dense(&b0, &opts).unwrap());

        solve_right_upper(&tri, &mut b, &opts).unwrap();
        let x = b.to_dense().unwrap();
        assert!(mat_mul(&x, &u).unwrap().minus(&b0).unwrap().norm_f() < 1e-9);
    }

    #[test]
    fn test_low_rank_factor_rejected() {
        let opts = HMatrixOptions::default();
        let tri = Block::LowRank(LowRankBlock::zeros(4, 4));
        let mut b = Block::Dense(DenseBlock::zeros(4, 2));
        assert!(matches!(
            solve(&tri, &mut b, false, &opts),
            Err(HMatrixError::UnsupportedOperand { .. })
        ));
    }
}
