//! In-place hierarchical LU factorization

use hmatrix_linalg::lu_in_place;
use log::debug;

use crate::arithmetic::{gemm, product_low_rank, solve, solve_right_upper, Grid};
use crate::block::{Block, PendingUpdates};
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// Factor `block = L · U` in place, without pivoting.
///
/// Afterwards the strictly lower part of the structure holds `L` (unit
/// diagonal implied) and the rest holds `U`. Grids are eliminated block by
/// block: factor the diagonal, solve the panels, then apply the Schur
/// complement to the trailing grid. Low-rank contributions are truncated to
/// the target rank; updates of coupled uniform children are deferred and
/// flushed right before the child is next needed.
pub fn lu(block: &mut Block, opts: &HMatrixOptions) -> Result<()> {
    if block.nrows() != block.ncols() {
        return Err(HMatrixError::dimension("lu", block.shape(), block.shape()));
    }
    match block {
        Block::Dense(d) => Ok(lu_in_place(d.matrix_mut())?),
        Block::LowRank(_) => Err(HMatrixError::UnsupportedOperand {
            op: "lu",
            kind: block.kind(),
        }),
        Block::Hierarchical(h) => lu_grid(h, &mut PendingUpdates::new(), opts),
        Block::Uniform(u) => {
            let mut pending = u.take_pending();
            lu_grid(u, &mut pending, opts)
        }
    }
}

fn lu_grid(g: &mut dyn Grid, pending: &mut PendingUpdates, opts: &HMatrixOptions) -> Result<()> {
    let (m, n) = g.grid_shape();
    if m != n || g.row_sizes() != g.col_sizes() {
        return Err(HMatrixError::RaggedGrid {
            message: format!(
                "LU needs matching row and column groups, got {:?} x {:?}",
                g.row_sizes(),
                g.col_sizes()
            ),
        });
    }
    debug!("lu: eliminating a {}x{} grid", m, n);

    for k in 0..m {
        g.flush(k, k, pending, opts)?;
        let mut diag = g.take_child(k, k)?;
        lu(&mut diag, opts)?;

        for j in (k + 1)..m {
            g.flush(k, j, pending, opts)?;
            let mut t = g.take_child(k, j)?;
            solve(&diag, &mut t, false, opts)?;
            g.put_child(k, j, t)?;
        }
        for i in (k + 1)..m {
            g.flush(i, k, pending, opts)?;
            let mut t = g.take_child(i, k)?;
            solve_right_upper(&diag, &mut t, opts)?;
            g.put_child(i, k, t)?;
        }
        g.put_child(k, k, diag)?;

        schur_update(g, k, pending, opts)?;
    }

    for i in 0..m {
        for j in 0..m {
            g.flush(i, j, pending, opts)?;
        }
    }
    Ok(())
}

/// `A_ij ← A_ij − L_ik · U_kj` over the trailing grid after step `k`;
/// coupled targets collect the products in `pending`
fn schur_update(g: &mut dyn Grid, k: usize, pending: &mut PendingUpdates, opts: &HMatrixOptions) -> Result<()> {
    let (m, _) = g.grid_shape();
    let mut col_panel = Vec::with_capacity(m - k - 1);
    let mut row_panel = Vec::with_capacity(m - k - 1);
    for t in (k + 1)..m {
        col_panel.push(g.take_child(t, k)?);
        row_panel.push(g.take_child(k, t)?);
    }

    for (li, l) in col_panel.iter().enumerate() {
        for (uj, u) in row_panel.iter().enumerate() {
            let (i, j) = (k + 1 + li, k + 1 + uj);
            if g.is_coupled(i, j) {
                pending.push(i, j, product_low_rank(-1.0, l, u, opts)?)?;
            } else {
                let mut target = g.take_child(i, j)?;
                gemm(-1.0, l, u, 1.0, &mut target, opts)?;
                g.put_child(i, j, target)?;
            }
        }
    }

    for (t, (l, u)) in col_panel.into_iter().zip(row_panel).enumerate() {
        g.put_child(k + 1 + t, k, l)?;
        g.put_child(k, k + 1 + t, u)?;
    }
    Ok(())
}
