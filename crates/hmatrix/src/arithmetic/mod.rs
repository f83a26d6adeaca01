//! Block arithmetic dispatched over the block variants
//!
//! Every operation composes heterogeneous operands: a low-rank factor always
//! gives a closed form, dense operands multiply directly, and grid operands
//! are brought to a common partition (re-partitioning when they do not
//! conform) before recursing child by child.
//!
//! Low-rank results are truncated to the target rank as soon as they are
//! formed, except updates landing on coupled children of uniform blocks,
//! which are deferred in a [`PendingUpdates`] accumulator.

mod cache;
mod gemm;
mod lu;
mod solve;

pub use cache::{gemm_uniform, ProjectionCache};
pub use gemm::gemm;
pub use lu::lu;
pub use solve::{solve, solve_right_upper};

use std::borrow::Cow;
use std::ops::Range;

use hmatrix_linalg::{gemm_into, Matrix, Transpose};

use crate::basis::BasisRef;
use crate::block::{Block, DenseBlock, HierarchicalBlock, LowRankBlock, PendingUpdates, UniformBlock};
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// A summand in closed form
#[derive(Debug, Clone)]
pub(crate) enum Term {
    Dense(Matrix),
    LowRank(LowRankBlock),
}

impl Term {
    /// `alpha · block` in its cheapest closed form
    fn of(alpha: f64, block: &Block) -> Result<Term> {
        Ok(match block {
            Block::LowRank(lr) => {
                let mut lr = lr.clone();
                lr.scale(alpha);
                Term::LowRank(lr)
            }
            _ => Term::Dense(block.to_dense()?.scaled(alpha)),
        })
    }

    fn shape(&self) -> (usize, usize) {
        match self {
            Term::Dense(m) => m.shape(),
            Term::LowRank(lr) => (lr.nrows(), lr.ncols()),
        }
    }

    fn restrict(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Term> {
        Ok(match self {
            Term::Dense(m) => Term::Dense(m.submatrix(rows, cols)),
            Term::LowRank(lr) => Term::LowRank(lr.restrict(rows, cols)?),
        })
    }

    fn into_low_rank(self, opts: &HMatrixOptions) -> Result<LowRankBlock> {
        match self {
            Term::Dense(m) => LowRankBlock::from_dense(&m, opts),
            Term::LowRank(mut lr) => {
                lr.truncate(opts)?;
                Ok(lr)
            }
        }
    }
}

/// Child access shared by hierarchical and uniform grids
pub(crate) trait Grid {
    fn grid_shape(&self) -> (usize, usize);
    fn row_sizes(&self) -> Vec<usize>;
    fn col_sizes(&self) -> Vec<usize>;
    /// Child `(i, j)` as a read-only operand
    fn operand(&self, i: usize, j: usize) -> Result<Cow<'_, Block>>;
    /// Take child `(i, j)` out; must be paired with `put_child`
    fn take_child(&mut self, i: usize, j: usize) -> Result<Block>;
    fn put_child(&mut self, i: usize, j: usize, block: Block) -> Result<()>;

    /// True if updates of `(i, j)` are deferred
    fn is_coupled(&self, _i: usize, _j: usize) -> bool {
        false
    }

    /// Apply the deferred updates of `(i, j)`
    fn flush(&mut self, _i: usize, _j: usize, _pending: &mut PendingUpdates, _opts: &HMatrixOptions) -> Result<()> {
        Ok(())
    }

    /// Coupling of `(i, j)` if it is stored against exactly these bases
    fn coupling_mut(
        &mut self,
        _i: usize,
        _j: usize,
        _rows: &BasisRef,
        _cols: &BasisRef,
    ) -> Option<&mut Matrix> {
        None
    }
}

impl Grid for HierarchicalBlock {
    fn grid_shape(&self) -> (usize, usize) {
        HierarchicalBlock::grid_shape(self)
    }

    fn row_sizes(&self) -> Vec<usize> {
        HierarchicalBlock::row_sizes(self)
    }

    fn col_sizes(&self) -> Vec<usize> {
        HierarchicalBlock::col_sizes(self)
    }

    fn operand(&self, i: usize, j: usize) -> Result<Cow<'_, Block>> {
        Ok(Cow::Borrowed(self.get(i, j)?))
    }

    fn take_child(&mut self, i: usize, j: usize) -> Result<Block> {
        self.take(i, j)
    }

    fn put_child(&mut self, i: usize, j: usize, block: Block) -> Result<()> {
        self.put(i, j, block)
    }
}

impl Grid for UniformBlock {
    fn grid_shape(&self) -> (usize, usize) {
        UniformBlock::grid_shape(self)
    }

    fn row_sizes(&self) -> Vec<usize> {
        UniformBlock::row_sizes(self)
    }

    fn col_sizes(&self) -> Vec<usize> {
        UniformBlock::col_sizes(self)
    }

    fn operand(&self, i: usize, j: usize) -> Result<Cow<'_, Block>> {
        self.child_block(i, j)
    }

    fn take_child(&mut self, i: usize, j: usize) -> Result<Block> {
        self.take_block(i, j)
    }

    fn put_child(&mut self, i: usize, j: usize, block: Block) -> Result<()> {
        self.put_block(i, j, block)
    }

    fn is_coupled(&self, i: usize, j: usize) -> bool {
        UniformBlock::is_coupled(self, i, j)
    }

    fn flush(&mut self, i: usize, j: usize, pending: &mut PendingUpdates, opts: &HMatrixOptions) -> Result<()> {
        self.flush_child(i, j, pending, opts)
    }

    fn coupling_mut(
        &mut self,
        i: usize,
        j: usize,
        rows: &BasisRef,
        cols: &BasisRef,
    ) -> Option<&mut Matrix> {
        self.coupling_against(i, j, rows, cols)
    }
}

pub(crate) fn as_grid(block: &Block) -> Option<&dyn Grid> {
    match block {
        Block::Hierarchical(h) => Some(h),
        Block::Uniform(u) => Some(u),
        _ => None,
    }
}

pub(crate) fn as_grid_mut(block: &mut Block) -> Option<&mut dyn Grid> {
    match block {
        Block::Hierarchical(h) => Some(h),
        Block::Uniform(u) => Some(u),
        _ => None,
    }
}

/// `block` as a grid with the given group sizes, borrowed when it already
/// conforms
pub(crate) fn conform<'a>(block: &'a Block, row_sizes: &[usize], col_sizes: &[usize]) -> Result<Cow<'a, Block>> {
    if let Some((rs, cs)) = block.grid_sizes() {
        if rs == row_sizes && cs == col_sizes {
            return Ok(Cow::Borrowed(block));
        }
    }
    Ok(Cow::Owned(Block::Hierarchical(block.repartition(row_sizes, col_sizes)?)))
}

pub(crate) fn grid_of<'a>(block: &'a Block, op: &'static str) -> Result<&'a dyn Grid> {
    as_grid(block).ok_or(HMatrixError::UnsupportedOperand { op, kind: block.kind() })
}

/// `alpha · a · b` as a truncated low-rank block
pub(crate) fn product_low_rank(alpha: f64, a: &Block, b: &Block, opts: &HMatrixOptions) -> Result<LowRankBlock> {
    let mut lr = match (a, b) {
        (Block::LowRank(la), _) => LowRankBlock::from_factors(la.u().scaled(alpha), b.tmul_matrix(la.v())?)?,
        (_, Block::LowRank(lb)) => LowRankBlock::from_factors(a.mul_matrix(lb.u())?.scaled(alpha), lb.v().clone())?,
        _ => {
            let p = a.mul_matrix(&b.to_dense()?)?.scaled(alpha);
            return LowRankBlock::from_dense(&p, opts);
        }
    };
    lr.truncate(opts)?;
    Ok(lr)
}

/// `target ← beta · target + term`
pub(crate) fn accumulate(target: &mut Block, beta: f64, term: Term, opts: &HMatrixOptions) -> Result<()> {
    if target.shape() != term.shape() {
        return Err(HMatrixError::dimension("accumulate", target.shape(), term.shape()));
    }
    match target {
        Block::Dense(d) => {
            let m = d.matrix_mut();
            m.scale_in_place(beta);
            match term {
                Term::Dense(t) => m.axpy(1.0, &t)?,
                Term::LowRank(lr) => gemm_into(m, 1.0, lr.u(), lr.v(), 1.0, Transpose::Rhs)?,
            }
        }
        Block::LowRank(lr) => match term {
            Term::LowRank(t) => lr.add_scaled(beta, &t, opts)?,
            Term::Dense(mut t) => {
                t.axpy(beta, &lr.to_dense()?)?;
                *lr = LowRankBlock::from_dense(&t, opts)?;
            }
        },
        Block::Hierarchical(h) => {
            if beta != 1.0 {
                for child in h.children_mut() {
                    child.scale(beta);
                }
            }
            let (m, n) = h.grid_shape();
            for i in 0..m {
                for j in 0..n {
                    let sub = term.restrict(h.row_range(i), h.col_range(j))?;
                    accumulate(h.get_mut(i, j)?, 1.0, sub, opts)?;
                }
            }
        }
        Block::Uniform(u) => {
            if beta != 1.0 {
                u.scale(beta);
            }
            let (m, n) = u.grid_shape();
            for i in 0..m {
                for j in 0..n {
                    let sub = term.restrict(u.row_range(i), u.col_range(j))?;
                    if u.is_coupled(i, j) {
                        u.defer(i, j, sub.into_low_rank(opts)?, opts)?;
                    } else {
                        accumulate(u.child_block_mut(i, j)?, 1.0, sub, opts)?;
                    }
                }
            }
            u.flush_pending(opts)?;
        }
    }
    Ok(())
}

/// `target ← target + update`
pub fn add_low_rank(target: &mut Block, update: &LowRankBlock, opts: &HMatrixOptions) -> Result<()> {
    accumulate(target, 1.0, Term::LowRank(update.clone()), opts)
}

/// `c ← c + alpha · a`.
///
/// Conforming grids are added child by child; otherwise `a` is reduced to
/// a closed form and distributed over the structure of `c`.
pub fn add(alpha: f64, a: &Block, c: &mut Block, opts: &HMatrixOptions) -> Result<()> {
    if a.shape() != c.shape() {
        return Err(HMatrixError::dimension("add", a.shape(), c.shape()));
    }
    let conforming = match (a.grid_sizes(), c.grid_sizes()) {
        (Some(ga), Some(gc)) => ga == gc,
        _ => false,
    };
    if !conforming {
        return accumulate(c, 1.0, Term::of(alpha, a)?, opts);
    }

    let kind = c.kind();
    let ag = grid_of(a, "add")?;
    let cg = as_grid_mut(c).ok_or(HMatrixError::UnsupportedOperand { op: "add", kind })?;
    let (m, n) = cg.grid_shape();
    let mut pending = PendingUpdates::new();
    for i in 0..m {
        for j in 0..n {
            let child = ag.operand(i, j)?;
            if cg.is_coupled(i, j) {
                let mut lr = child.to_low_rank(opts)?;
                lr.scale(alpha);
                pending.push(i, j, lr)?;
                cg.flush(i, j, &mut pending, opts)?;
            } else {
                let mut t = cg.take_child(i, j)?;
                add(alpha, &child, &mut t, opts)?;
                cg.put_child(i, j, t)?;
            }
        }
    }
    Ok(())
}

/// Elementwise product.
///
/// Two low-rank operands combine through the Khatri-Rao product of their
/// factors; a dense operand makes the result dense; grids recurse.
pub fn hadamard(a: &Block, b: &Block, opts: &HMatrixOptions) -> Result<Block> {
    if a.shape() != b.shape() {
        return Err(HMatrixError::dimension("hadamard", a.shape(), b.shape()));
    }
    match (a, b) {
        (Block::LowRank(la), Block::LowRank(lb)) => Ok(Block::LowRank(la.hadamard(lb, opts)?)),
        (Block::Dense(_), _) | (_, Block::Dense(_)) => {
            let d = a.to_dense()?.hadamard(&b.to_dense()?)?;
            Ok(Block::Dense(DenseBlock::new(d)))
        }
        _ => {
            let (rs, cs) = a
                .grid_sizes()
                .or_else(|| b.grid_sizes())
                .ok_or(HMatrixError::UnsupportedOperand { op: "hadamard", kind: a.kind() })?;
            let ac = conform(a, &rs, &cs)?;
            let bc = conform(b, &rs, &cs)?;
            let (ag, bg) = (grid_of(&ac, "hadamard")?, grid_of(&bc, "hadamard")?);
            let mut children = Vec::with_capacity(rs.len() * cs.len());
            for i in 0..rs.len() {
                for j in 0..cs.len() {
                    children.push(hadamard(&*ag.operand(i, j)?, &*bg.operand(i, j)?, opts)?);
                }
            }
            Ok(Block::Hierarchical(HierarchicalBlock::from_grid(rs.len(), cs.len(), children)?))
        }
    }
}
