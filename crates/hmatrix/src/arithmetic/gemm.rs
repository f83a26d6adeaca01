//! Generalized multiply `C ← α · A · B + β · C`

use hmatrix_linalg::{gemm_into, Transpose};

use crate::arithmetic::{accumulate, as_grid_mut, conform, grid_of, product_low_rank, Term};
use crate::block::{Block, LowRankBlock, PendingUpdates};
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// `c ← alpha · a · b + beta · c`.
///
/// - low-rank `a`: `(α·U) · (Bᵗ·V)ᵗ`
/// - low-rank `b`: `(α·A·U) · Vᵗ`
/// - dense × dense: direct product
/// - otherwise, into a grid target: operands are re-partitioned to conform
///   to the target grid and the product recurses child by child
/// - otherwise, into a dense or low-rank target: the product is formed
///   densely and accumulated
pub fn gemm(alpha: f64, a: &Block, b: &Block, beta: f64, c: &mut Block, opts: &HMatrixOptions) -> Result<()> {
    if a.ncols() != b.nrows() || a.nrows() != c.nrows() || b.ncols() != c.ncols() {
        return Err(HMatrixError::dimension("gemm", a.shape(), b.shape()));
    }

    match (a, b) {
        (Block::LowRank(la), _) => {
            let v = b.tmul_matrix(la.v())?;
            let term = LowRankBlock::from_factors(la.u().scaled(alpha), v)?;
            return accumulate(c, beta, Term::LowRank(term), opts);
        }
        (_, Block::LowRank(lb)) => {
            let u = a.mul_matrix(lb.u())?.scaled(alpha);
            let term = LowRankBlock::from_factors(u, lb.v().clone())?;
            return accumulate(c, beta, Term::LowRank(term), opts);
        }
        (Block::Dense(da), Block::Dense(db)) => {
            if let Block::Dense(dc) = c {
                gemm_into(dc.matrix_mut(), alpha, da.matrix(), db.matrix(), beta, Transpose::None)?;
                return Ok(());
            }
            let p = a.mul_matrix(db.matrix())?.scaled(alpha);
            return accumulate(c, beta, Term::Dense(p), opts);
        }
        _ => {}
    }

    let Some((row_sizes, col_sizes)) = c.grid_sizes() else {
        let p = a.mul_matrix(&b.to_dense()?)?.scaled(alpha);
        return accumulate(c, beta, Term::Dense(p), opts);
    };

    let inner = match (a.grid_sizes(), b.grid_sizes()) {
        (Some((_, ks)), _) => ks,
        (None, Some((ks, _))) => ks,
        (None, None) => vec![a.ncols()],
    };
    let ac = conform(a, &row_sizes, &inner)?;
    let bc = conform(b, &inner, &col_sizes)?;
    let (ag, bg) = (grid_of(&ac, "gemm")?, grid_of(&bc, "gemm")?);

    if beta != 1.0 {
        c.scale(beta);
    }
    let kind = c.kind();
    let cg = as_grid_mut(c).ok_or(HMatrixError::UnsupportedOperand { op: "gemm", kind })?;
    let mut pending = PendingUpdates::new();
    for i in 0..row_sizes.len() {
        for j in 0..col_sizes.len() {
            if cg.is_coupled(i, j) {
                for k in 0..inner.len() {
                    let p = product_low_rank(alpha, &*ag.operand(i, k)?, &*bg.operand(k, j)?, opts)?;
                    pending.push(i, j, p)?;
                }
                cg.flush(i, j, &mut pending, opts)?;
            } else {
                let mut t = cg.take_child(i, j)?;
                for k in 0..inner.len() {
                    gemm(alpha, &*ag.operand(i, k)?, &*bg.operand(k, j)?, 1.0, &mut t, opts)?;
                }
                cg.put_child(i, j, t)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DenseBlock;
    use hmatrix_linalg::{mat_mul, Matrix};

    fn kernel(nrows: usize, ncols: usize, shift: usize) -> Matrix {
        Matrix::from_fn(nrows, ncols, |i, j| 1.0 / (1.0 + (i as f64 - (j + shift) as f64).abs()))
    }

    #[test]
    fn test_low_rank_times_dense() {
        let opts = HMatrixOptions::default();
        let a = Block::LowRank(LowRankBlock::from_dense(&kernel(8, 6, 20), &opts).unwrap());
        let b = Block::Dense(DenseBlock::new(kernel(6, 5, 0)));
        let mut c = Block::Dense(DenseBlock::zeros(8, 5));
        gemm(1.0, &a, &b, 0.0, &mut c, &opts).unwrap();
        let expected = mat_mul(&a.to_dense().unwrap(), &b.to_dense().unwrap()).unwrap();
        assert!(c.to_dense().unwrap().minus(&expected).unwrap().norm_f() < 1e-10);
    }

    #[test]
    fn test_hierarchical_into_hierarchical() {
        let opts = HMatrixOptions::default();
        let a = Block::Dense(DenseBlock::new(kernel(8, 8, 0))).into_hierarchical(2, 2).unwrap();
        let b = Block::Dense(DenseBlock::new(kernel(8, 8, 3))).into_hierarchical(4, 2).unwrap();
        let c0 = kernel(8, 8, 1);
        let mut c = Block::Dense(DenseBlock::new(c0.clone())).into_hierarchical(2, 2).unwrap();

        gemm(2.0, &a, &b, 0.5, &mut c, &opts).unwrap();

        let mut expected = mat_mul(&a.to_dense().unwrap(), &b.to_dense().unwrap()).unwrap();
        expected.scale_in_place(2.0);
        expected.axpy(0.5, &c0).unwrap();
        assert_eq!(c.kind(), crate::block::BlockKind::Hierarchical);
        assert!(c.to_dense().unwrap().minus(&expected).unwrap().norm_f() < 1e-10);
    }

    #[test]
    fn test_dimension_mismatch() {
        let opts = HMatrixOptions::default();
        let a = Block::Dense(DenseBlock::zeros(3, 4));
        let b = Block::Dense(DenseBlock::zeros(3, 4));
        let mut c = Block::Dense(DenseBlock::zeros(3, 4));
        assert!(matches!(
            gemm(1.0, &a, &b, 0.0, &mut c, &opts),
            Err(HMatrixError::Dimension { .. })
        ));
    }
}
