//! The block data model
//!
//! A [`Block`] is a closed sum over the four storage variants. Every variant
//! knows its row and column extent; operations dispatch on the variant.

mod dense;
mod hierarchical;
mod lowrank;
mod uniform;

pub use dense::DenseBlock;
pub use hierarchical::{HierarchicalBlock, HierarchicalBuilder};
pub use lowrank::{LowRankAccumulator, LowRankBlock};
pub use uniform::{PendingUpdates, UniformBlock, UniformChild};

pub(crate) use hierarchical::aligned;

use std::ops::Range;
use std::sync::Arc;

use hmatrix_linalg::{mat_mul, mat_mul_tn, Matrix};

use crate::basis::ClusterBasis;
use crate::cluster::{offsets, split_sizes};
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// Variant tag of a [`Block`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Dense,
    LowRank,
    Hierarchical,
    Uniform,
}

/// A node of a hierarchical matrix
#[derive(Debug, Clone)]
pub enum Block {
    Dense(DenseBlock),
    LowRank(LowRankBlock),
    Hierarchical(HierarchicalBlock),
    Uniform(UniformBlock),
}

impl Block {
    pub fn nrows(&self) -> usize {
        match self {
            Block::Dense(d) => d.nrows(),
            Block::LowRank(lr) => lr.nrows(),
            Block::Hierarchical(h) => h.nrows(),
            Block::Uniform(u) => u.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Block::Dense(d) => d.ncols(),
            Block::LowRank(lr) => lr.ncols(),
            Block::Hierarchical(h) => h.ncols(),
            Block::Uniform(u) => u.ncols(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Dense(_) => BlockKind::Dense,
            Block::LowRank(_) => BlockKind::LowRank,
            Block::Hierarchical(_) => BlockKind::Hierarchical,
            Block::Uniform(_) => BlockKind::Uniform,
        }
    }

    /// Row and column group sizes of a grid block
    pub fn grid_sizes(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        match self {
            Block::Hierarchical(h) => Some((h.row_sizes(), h.col_sizes())),
            Block::Uniform(u) => Some((u.row_sizes(), u.col_sizes())),
            _ => None,
        }
    }

    /// Materialize the full matrix
    pub fn to_dense(&self) -> Result<Matrix> {
        match self {
            Block::Dense(d) => Ok(d.matrix().clone()),
            Block::LowRank(lr) => lr.to_dense(),
            Block::Hierarchical(h) => {
                let mut out = Matrix::zeros(h.nrows(), h.ncols());
                let (m, n) = h.grid_shape();
                for i in 0..m {
                    for j in 0..n {
                        let child = h.get(i, j)?.to_dense()?;
                        out.set_submatrix(h.row_range(i).start, h.col_range(j).start, &child)?;
                    }
                }
                Ok(out)
            }
            Block::Uniform(u) => u.to_dense(),
        }
    }

    /// Truncated low-rank approximation of the whole block
    pub fn to_low_rank(&self, opts: &HMatrixOptions) -> Result<LowRankBlock> {
        match self {
            Block::Dense(d) => d.to_low_rank(opts),
            Block::LowRank(lr) => {
                let mut lr = lr.clone();
                lr.truncate(opts)?;
                Ok(lr)
            }
            Block::Hierarchical(_) => LowRankBlock::from_dense(&self.to_dense()?, opts),
            Block::Uniform(u) => u.to_low_rank(opts),
        }
    }

    /// Grid form with `m × n` near-equal groups.
    ///
    /// A grid block of the same grid shape is returned as is; anything else
    /// is densified and re-partitioned.
    pub fn into_hierarchical(self, m: usize, n: usize) -> Result<Block> {
        let (nrows, ncols) = self.shape();
        if m == 0 || n == 0 || m > nrows || n > ncols {
            return Err(HMatrixError::dimension("into_hierarchical", (nrows, ncols), (m, n)));
        }
        match &self {
            Block::Hierarchical(h) if h.grid_shape() == (m, n) => return Ok(self),
            Block::Uniform(u) if u.grid_shape() == (m, n) => return Ok(self),
            _ => {}
        }
        let dense = Block::Dense(DenseBlock::new(self.to_dense()?));
        let h = dense.repartition(&split_sizes(nrows, m), &split_sizes(ncols, n))?;
        Ok(Block::Hierarchical(h))
    }

    /// Grid with the given group sizes, each child the restriction of `self`
    pub fn repartition(&self, row_sizes: &[usize], col_sizes: &[usize]) -> Result<HierarchicalBlock> {
        let (nrows, ncols) = self.shape();
        let (rs, cs) = (row_sizes.iter().sum::<usize>(), col_sizes.iter().sum::<usize>());
        if (rs, ncols) != (nrows, cs) || row_sizes.is_empty() || col_sizes.is_empty() {
            return Err(HMatrixError::dimension("repartition", (nrows, ncols), (rs, cs)));
        }
        let ro = offsets(row_sizes);
        let co = offsets(col_sizes);
        let mut children = Vec::with_capacity(row_sizes.len() * col_sizes.len());
        for i in 0..row_sizes.len() {
            for j in 0..col_sizes.len() {
                children.push(self.restrict(ro[i]..ro[i + 1], co[j]..co[j + 1])?);
            }
        }
        HierarchicalBlock::from_grid(row_sizes.len(), col_sizes.len(), children)
    }

    /// Restriction to `rows × cols`.
    ///
    /// Dense and low-rank blocks are sliced; grid blocks keep their structure
    /// when the ranges follow child boundaries and are densified otherwise.
    pub fn restrict(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Block> {
        let (nrows, ncols) = self.shape();
        if rows.start > rows.end || cols.start > cols.end || rows.end > nrows || cols.end > ncols {
            return Err(HMatrixError::dimension(
                "restrict",
                (nrows, ncols),
                (rows.end, cols.end),
            ));
        }
        if rows == (0..nrows) && cols == (0..ncols) {
            return Ok(self.clone());
        }
        match self {
            Block::Dense(d) => Ok(Block::Dense(d.submatrix(rows, cols))),
            Block::LowRank(lr) => Ok(Block::LowRank(lr.restrict(rows, cols)?)),
            Block::Hierarchical(h) => match (h.aligned_rows(&rows), h.aligned_cols(&cols)) {
                (Some(ri), Some(cj)) => {
                    let mut children = Vec::with_capacity(ri.len() * cj.len());
                    for i in ri.clone() {
                        for j in cj.clone() {
                            children.push(h.get(i, j)?.clone());
                        }
                    }
                    grid_or_single(ri.len(), cj.len(), children)
                }
                _ => Ok(Block::Dense(DenseBlock::new(self.to_dense()?.submatrix(rows, cols)))),
            },
            Block::Uniform(u) => {
                let ro = offsets(&u.row_sizes());
                let co = offsets(&u.col_sizes());
                match (aligned(&ro, &rows), aligned(&co, &cols)) {
                    (Some(ri), Some(cj)) => {
                        let mut children = Vec::with_capacity(ri.len() * cj.len());
                        for i in ri.clone() {
                            for j in cj.clone() {
                                children.push(u.child_block(i, j)?.into_owned());
                            }
                        }
                        grid_or_single(ri.len(), cj.len(), children)
                    }
                    _ => Ok(Block::Dense(DenseBlock::new(u.to_dense()?.submatrix(rows, cols)))),
                }
            }
        }
    }

    /// `‖A − B‖_F / (rows · cols) < tol`; different extents compare unequal
    pub fn approx_eq(&self, other: &Block, tol: f64) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        let n = self.nrows() * self.ncols();
        if n == 0 {
            return true;
        }
        match (self.to_dense(), other.to_dense()) {
            (Ok(a), Ok(b)) => a
                .minus(&b)
                .map(|d| d.norm_f() / (n as f64) < tol)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// `self · x`
    pub fn mul_matrix(&self, x: &Matrix) -> Result<Matrix> {
        if x.nrows() != self.ncols() {
            return Err(HMatrixError::dimension("mul_matrix", self.shape(), x.shape()));
        }
        match self {
            Block::Dense(d) => Ok(mat_mul(d.matrix(), x)?),
            Block::LowRank(lr) => Ok(mat_mul(lr.u(), &mat_mul_tn(lr.v(), x)?)?),
            Block::Hierarchical(h) => {
                let (m, n) = h.grid_shape();
                let mut out = Matrix::zeros(h.nrows(), x.ncols());
                for i in 0..m {
                    let mut acc = Matrix::zeros(h.row_range(i).len(), x.ncols());
                    for j in 0..n {
                        acc.axpy(1.0, &h.get(i, j)?.mul_matrix(&x.rows(h.col_range(j)))?)?;
                    }
                    out.set_submatrix(h.row_range(i).start, 0, &acc)?;
                }
                Ok(out)
            }
            Block::Uniform(u) => u.mul_matrix(x),
        }
    }

    /// `selfᵗ · y`
    pub fn tmul_matrix(&self, y: &Matrix) -> Result<Matrix> {
        if y.nrows() != self.nrows() {
            return Err(HMatrixError::dimension("tmul_matrix", self.shape(), y.shape()));
        }
        match self {
            Block::Dense(d) => Ok(mat_mul_tn(d.matrix(), y)?),
            Block::LowRank(lr) => Ok(mat_mul(lr.v(), &mat_mul_tn(lr.u(), y)?)?),
            Block::Hierarchical(h) => {
                let (m, n) = h.grid_shape();
                let mut out = Matrix::zeros(h.ncols(), y.ncols());
                for j in 0..n {
                    let mut acc = Matrix::zeros(h.col_range(j).len(), y.ncols());
                    for i in 0..m {
                        acc.axpy(1.0, &h.get(i, j)?.tmul_matrix(&y.rows(h.row_range(i)))?)?;
                    }
                    out.set_submatrix(h.col_range(j).start, 0, &acc)?;
                }
                Ok(out)
            }
            Block::Uniform(u) => u.tmul_matrix(y),
        }
    }

    /// `self ← alpha · self`
    pub fn scale(&mut self, alpha: f64) {
        match self {
            Block::Dense(d) => d.matrix_mut().scale_in_place(alpha),
            Block::LowRank(lr) => lr.scale(alpha),
            Block::Hierarchical(h) => {
                for child in h.children_mut() {
                    child.scale(alpha);
                }
            }
            Block::Uniform(u) => u.scale(alpha),
        }
    }

    /// Stored doubles in the tree, shared bases excluded
    pub fn payload_len(&self) -> usize {
        match self {
            Block::Dense(d) => d.matrix().len(),
            Block::LowRank(lr) => lr.payload_len(),
            Block::Hierarchical(h) => h.children().map(Block::payload_len).sum(),
            Block::Uniform(u) => u.payload_len(),
        }
    }

    /// Stored doubles including every shared basis arena, each counted once
    pub fn storage_len(&self) -> usize {
        let mut arenas = Vec::new();
        self.collect_arenas(&mut arenas);
        self.payload_len() + arenas.iter().map(|a| a.storage_len()).sum::<usize>()
    }

    /// Stored doubles relative to the dense `rows · cols`
    pub fn compression_ratio(&self) -> f64 {
        let full = self.nrows() * self.ncols();
        if full == 0 {
            return 1.0;
        }
        self.storage_len() as f64 / full as f64
    }

    pub(crate) fn collect_arenas(&self, out: &mut Vec<Arc<ClusterBasis>>) {
        match self {
            Block::Hierarchical(h) => {
                for child in h.children() {
                    child.collect_arenas(out);
                }
            }
            Block::Uniform(u) => u.collect_arenas(out),
            _ => {}
        }
    }
}

fn grid_or_single(m: usize, n: usize, mut children: Vec<Block>) -> Result<Block> {
    if m == 1 && n == 1 {
        if let Some(only) = children.pop() {
            return Ok(only);
        }
    }
    Ok(Block::Hierarchical(HierarchicalBlock::from_grid(m, n, children)?))
}

impl From<DenseBlock> for Block {
    fn from(b: DenseBlock) -> Self {
        Block::Dense(b)
    }
}

impl From<LowRankBlock> for Block {
    fn from(b: LowRankBlock) -> Self {
        Block::LowRank(b)
    }
}

impl From<HierarchicalBlock> for Block {
    fn from(b: HierarchicalBlock) -> Self {
        Block::Hierarchical(b)
    }
}

impl From<UniformBlock> for Block {
    fn from(b: UniformBlock) -> Self {
        Block::Uniform(b)
    }
}
