//! Uniform (H2) hierarchical blocks
//!
//! A [`UniformBlock`] is a grid like [`HierarchicalBlock`](crate::HierarchicalBlock),
//! but it references one node of a shared row basis arena and one node of a
//! shared column basis arena. Admissible children store only the coupling
//! `S` between the child bases: the child's value is `Q_r · S · Q_cᵗ`.
//!
//! Updates landing on coupled children can be deferred in a
//! [`PendingUpdates`] accumulator and flushed later, either projected back
//! onto the shared bases or, when the bases do not capture them, recompressed
//! into a private low-rank child.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use hmatrix_linalg::{mat_mul, mat_mul_nt, Matrix};
use log::warn;

use crate::arithmetic::add_low_rank;
use crate::basis::{BasisRef, ClusterBasis};
use crate::block::{Block, LowRankAccumulator, LowRankBlock};
use crate::cluster::offsets;
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

/// Child slot of a uniform grid
#[derive(Debug, Clone)]
pub enum UniformChild {
    /// Coupling matrix between the child row and column bases
    Coupled(Matrix),
    /// Explicit child: dense leaf, private low-rank block or nested uniform block
    Block(Block),
}

/// Deferred low-rank updates keyed by grid position
#[derive(Debug, Clone, Default)]
pub struct PendingUpdates {
    entries: BTreeMap<(usize, usize), LowRankAccumulator>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of children with deferred updates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, i: usize, j: usize, update: LowRankBlock) -> Result<()> {
        let (nrows, ncols) = (update.nrows(), update.ncols());
        self.entries
            .entry((i, j))
            .or_insert_with(|| LowRankAccumulator::new(nrows, ncols))
            .push_block(update)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&LowRankAccumulator> {
        self.entries.get(&(i, j))
    }

    pub fn take(&mut self, i: usize, j: usize) -> Option<LowRankAccumulator> {
        self.entries.remove(&(i, j))
    }

    fn positions(&self) -> Vec<(usize, usize)> {
        self.entries.keys().copied().collect()
    }

    fn scale(&mut self, alpha: f64) {
        for acc in self.entries.values_mut() {
            acc.scale(alpha);
        }
    }

    fn payload_len(&self) -> usize {
        self.entries.values().map(LowRankAccumulator::payload_len).sum()
    }
}

/// Uniform hierarchical (H2) block
#[derive(Debug, Clone)]
pub struct UniformBlock {
    rows: BasisRef,
    cols: BasisRef,
    grid_rows: usize,
    grid_cols: usize,
    row_offsets: Vec<usize>,
    col_offsets: Vec<usize>,
    children: Vec<UniformChild>,
    pending: Option<PendingUpdates>,
}

impl UniformBlock {
    /// Assemble a grid over the children of `rows` and `cols`.
    ///
    /// All child basis nodes must exist; coupled children must match the
    /// ranks of their bases and explicit children the cluster extents.
    pub fn new(rows: BasisRef, cols: BasisRef, children: Vec<UniformChild>) -> Result<Self> {
        let row_children = child_refs(&rows)?;
        let col_children = child_refs(&cols)?;
        let (grid_rows, grid_cols) = (row_children.len(), col_children.len());
        if grid_rows == 0 || grid_cols == 0 || children.len() != grid_rows * grid_cols {
            return Err(HMatrixError::RaggedGrid {
                message: format!(
                    "{} children cannot fill a {}x{} uniform grid",
                    children.len(),
                    grid_rows,
                    grid_cols
                ),
            });
        }

        for (idx, child) in children.iter().enumerate() {
            let (r, c) = (&row_children[idx / grid_cols], &col_children[idx % grid_cols]);
            let (expected, got) = match child {
                UniformChild::Coupled(s) => ((r.rank(), c.rank()), s.shape()),
                UniformChild::Block(b) => ((r.dim(), c.dim()), (b.nrows(), b.ncols())),
            };
            if expected != got {
                return Err(HMatrixError::dimension("uniform_child", expected, got));
            }
        }

        let row_sizes: Vec<usize> = row_children.iter().map(BasisRef::dim).collect();
        let col_sizes: Vec<usize> = col_children.iter().map(BasisRef::dim).collect();
        Ok(Self {
            rows,
            cols,
            grid_rows,
            grid_cols,
            row_offsets: offsets(&row_sizes),
            col_offsets: offsets(&col_sizes),
            children,
            pending: None,
        })
    }

    pub fn nrows(&self) -> usize {
        self.row_offsets[self.grid_rows]
    }

    pub fn ncols(&self) -> usize {
        self.col_offsets[self.grid_cols]
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        (self.grid_rows, self.grid_cols)
    }

    /// First global row index of the row cluster
    pub fn row_start(&self) -> usize {
        self.rows.cluster().start
    }

    /// First global column index of the column cluster
    pub fn col_start(&self) -> usize {
        self.cols.cluster().start
    }

    pub fn row_basis(&self) -> &BasisRef {
        &self.rows
    }

    pub fn col_basis(&self) -> &BasisRef {
        &self.cols
    }

    pub fn row_range(&self, i: usize) -> Range<usize> {
        self.row_offsets[i]..self.row_offsets[i + 1]
    }

    pub fn col_range(&self, j: usize) -> Range<usize> {
        self.col_offsets[j]..self.col_offsets[j + 1]
    }

    pub fn row_sizes(&self) -> Vec<usize> {
        self.row_offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn col_sizes(&self) -> Vec<usize> {
        self.col_offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn row_child_basis(&self, i: usize) -> Result<BasisRef> {
        self.rows.child(i).ok_or(HMatrixError::IndexOutOfBounds {
            row: i,
            col: 0,
            nrows: self.grid_rows,
            ncols: self.grid_cols,
        })
    }

    pub fn col_child_basis(&self, j: usize) -> Result<BasisRef> {
        self.cols.child(j).ok_or(HMatrixError::IndexOutOfBounds {
            row: 0,
            col: j,
            nrows: self.grid_rows,
            ncols: self.grid_cols,
        })
    }

    pub fn child(&self, i: usize, j: usize) -> Result<&UniformChild> {
        let idx = self.index(i, j)?;
        Ok(&self.children[idx])
    }

    pub fn is_coupled(&self, i: usize, j: usize) -> bool {
        self.index(i, j)
            .map(|idx| matches!(self.children[idx], UniformChild::Coupled(_)))
            .unwrap_or(false)
    }

    pub fn pending(&self) -> Option<&PendingUpdates> {
        self.pending.as_ref()
    }

    /// Coupled child `(i, j)` as the low-rank block `(Q_r · S) · Q_cᵗ`
    pub fn coupled_to_low_rank(&self, i: usize, j: usize) -> Result<LowRankBlock> {
        match self.child(i, j)? {
            UniformChild::Coupled(s) => self.expand_coupling(i, j, s),
            UniformChild::Block(b) => Err(HMatrixError::UnsupportedOperand {
                op: "coupled_to_low_rank",
                kind: b.kind(),
            }),
        }
    }

    /// Child `(i, j)` as a block, including its deferred updates
    pub fn child_block(&self, i: usize, j: usize) -> Result<Cow<'_, Block>> {
        let pending = self.pending.as_ref().and_then(|p| p.get(i, j));
        match (self.child(i, j)?, pending) {
            (UniformChild::Block(b), None) => Ok(Cow::Borrowed(b)),
            (UniformChild::Coupled(s), None) => Ok(Cow::Owned(Block::LowRank(self.expand_coupling(i, j, s)?))),
            (UniformChild::Coupled(s), Some(acc)) => {
                let (u, v) = self.expand_coupling(i, j, s)?.into_factors();
                let (pu, pv) = acc.factors()?;
                let lr = LowRankBlock::from_factors(Matrix::hcat(&[&u, &pu])?, Matrix::hcat(&[&v, &pv])?)?;
                Ok(Cow::Owned(Block::LowRank(lr)))
            }
            (UniformChild::Block(b), Some(acc)) => {
                let mut d = b.to_dense()?;
                d.axpy(1.0, &acc.to_dense()?)?;
                Ok(Cow::Owned(Block::Dense(d.into())))
            }
        }
    }

    /// Mutable child `(i, j)`; a coupled child is first materialized into a
    /// private low-rank block
    pub fn child_block_mut(&mut self, i: usize, j: usize) -> Result<&mut Block> {
        let idx = self.index(i, j)?;
        if let UniformChild::Coupled(s) = &self.children[idx] {
            let lr = self.expand_coupling(i, j, s)?;
            self.children[idx] = UniformChild::Block(Block::LowRank(lr));
        }
        match &mut self.children[idx] {
            UniformChild::Block(b) => Ok(b),
            UniformChild::Coupled(_) => Err(HMatrixError::UnsetChild { row: i, col: j }),
        }
    }

    pub fn to_dense(&self) -> Result<Matrix> {
        let mut out = Matrix::zeros(self.nrows(), self.ncols());
        for i in 0..self.grid_rows {
            for j in 0..self.grid_cols {
                let child = self.child_block(i, j)?.to_dense()?;
                out.set_submatrix(self.row_offsets[i], self.col_offsets[j], &child)?;
            }
        }
        Ok(out)
    }

    /// Truncated low-rank form of the whole block
    pub fn to_low_rank(&self, opts: &HMatrixOptions) -> Result<LowRankBlock> {
        LowRankBlock::from_dense(&self.to_dense()?, opts)
    }

    /// `self · x`; coupled children are applied through their bases
    pub fn mul_matrix(&self, x: &Matrix) -> Result<Matrix> {
        if x.nrows() != self.ncols() {
            return Err(HMatrixError::dimension("mul_matrix", (self.nrows(), self.ncols()), x.shape()));
        }
        let mut out = Matrix::zeros(self.nrows(), x.ncols());
        for i in 0..self.grid_rows {
            let mut acc = Matrix::zeros(self.row_range(i).len(), x.ncols());
            for j in 0..self.grid_cols {
                let xj = x.rows(self.col_range(j));
                let part = match (&self.children[i * self.grid_cols + j], self.has_pending(i, j)) {
                    (UniformChild::Coupled(s), false) => {
                        let r = self.row_child_basis(i)?;
                        let c = self.col_child_basis(j)?;
                        r.reconstruct(&mat_mul(s, &c.project(&xj)?)?)?
                    }
                    _ => self.child_block(i, j)?.mul_matrix(&xj)?,
                };
                acc.axpy(1.0, &part)?;
            }
            out.set_submatrix(self.row_offsets[i], 0, &acc)?;
        }
        Ok(out)
    }

    /// `selfᵗ · y`
    pub fn tmul_matrix(&self, y: &Matrix) -> Result<Matrix> {
        if y.nrows() != self.nrows() {
            return Err(HMatrixError::dimension("tmul_matrix", (self.nrows(), self.ncols()), y.shape()));
        }
        let mut out = Matrix::zeros(self.ncols(), y.ncols());
        for j in 0..self.grid_cols {
            let mut acc = Matrix::zeros(self.col_range(j).len(), y.ncols());
            for i in 0..self.grid_rows {
                let yi = y.rows(self.row_range(i));
                let part = match (&self.children[i * self.grid_cols + j], self.has_pending(i, j)) {
                    (UniformChild::Coupled(s), false) => {
                        let r = self.row_child_basis(i)?;
                        let c = self.col_child_basis(j)?;
                        c.reconstruct(&mat_mul(&s.transpose(), &r.project(&yi)?)?)?
                    }
                    _ => self.child_block(i, j)?.tmul_matrix(&yi)?,
                };
                acc.axpy(1.0, &part)?;
            }
            out.set_submatrix(self.col_offsets[j], 0, &acc)?;
        }
        Ok(out)
    }

    pub fn scale(&mut self, alpha: f64) {
        for child in &mut self.children {
            match child {
                UniformChild::Coupled(s) => s.scale_in_place(alpha),
                UniformChild::Block(b) => b.scale(alpha),
            }
        }
        if let Some(p) = &mut self.pending {
            p.scale(alpha);
        }
    }

    /// Defer `update` onto coupled child `(i, j)`; other children are
    /// updated immediately
    pub fn defer(&mut self, i: usize, j: usize, update: LowRankBlock, opts: &HMatrixOptions) -> Result<()> {
        let expected = (self.row_range(i).len(), self.col_range(j).len());
        if (update.nrows(), update.ncols()) != expected {
            return Err(HMatrixError::dimension(
                "defer",
                expected,
                (update.nrows(), update.ncols()),
            ));
        }
        if self.is_coupled(i, j) {
            self.pending.get_or_insert_with(PendingUpdates::new).push(i, j, update)
        } else {
            add_low_rank(self.child_block_mut(i, j)?, &update, opts)
        }
    }

    /// Apply every deferred update owned by this block
    pub fn flush_pending(&mut self, opts: &HMatrixOptions) -> Result<()> {
        if let Some(mut pending) = self.pending.take() {
            for (i, j) in pending.positions() {
                self.flush_child(i, j, &mut pending, opts)?;
            }
        }
        Ok(())
    }

    /// Apply the updates of `pending` for child `(i, j)`, if any.
    ///
    /// A coupled child keeps its coupling when the shared bases reproduce the
    /// update within `eq_tol` per entry; otherwise it becomes a private
    /// low-rank child.
    pub fn flush_child(
        &mut self,
        i: usize,
        j: usize,
        pending: &mut PendingUpdates,
        opts: &HMatrixOptions,
    ) -> Result<()> {
        let Some(acc) = pending.take(i, j) else {
            return Ok(());
        };
        let idx = self.index(i, j)?;
        let projected = match &self.children[idx] {
            UniformChild::Coupled(s) => {
                let r = self.row_child_basis(i)?;
                let c = self.col_child_basis(j)?;
                let (u, v) = acc.factors()?;
                let ds = mat_mul_nt(&r.project(&u)?, &c.project(&v)?)?;
                let approx = r.reconstruct(&mat_mul_nt(&ds, &c.expand()?)?)?;
                let exact = mat_mul_nt(&u, &v)?;
                let n = (exact.len()).max(1) as f64;
                let err = approx.minus(&exact)?.norm_f() / n;
                if err <= opts.eq_tol {
                    let mut s = s.clone();
                    s.axpy(1.0, &ds)?;
                    Some(s)
                } else {
                    warn!(
                        "update of uniform child ({}, {}) not captured by the shared bases \
                         (error {:.3e} per entry); storing it as a private low-rank block",
                        i, j, err
                    );
                    None
                }
            }
            UniformChild::Block(_) => None,
        };

        match projected {
            Some(s) => self.children[idx] = UniformChild::Coupled(s),
            None => {
                let update = acc.to_low_rank(opts)?;
                let child = self.child_block_mut(i, j)?;
                add_low_rank(child, &update, opts)?;
            }
        }
        Ok(())
    }

    /// `self += other`.
    ///
    /// Coupled children over the same basis nodes are added on the
    /// couplings; anything else goes through the generic block addition.
    pub fn add_uniform(&mut self, other: &UniformBlock, opts: &HMatrixOptions) -> Result<()> {
        if (self.nrows(), self.ncols()) != (other.nrows(), other.ncols()) {
            return Err(HMatrixError::dimension(
                "add_uniform",
                (self.nrows(), self.ncols()),
                (other.nrows(), other.ncols()),
            ));
        }
        if self.grid_shape() != other.grid_shape()
            || self.row_sizes() != other.row_sizes()
            || self.col_sizes() != other.col_sizes()
        {
            let mut target = Block::Uniform(self.clone());
            crate::arithmetic::add(1.0, &Block::Uniform(other.clone()), &mut target, opts)?;
            if let Block::Uniform(u) = target {
                *self = u;
            }
            return Ok(());
        }

        let same_bases = self.rows.same_node(&other.rows) && self.cols.same_node(&other.cols);
        for i in 0..self.grid_rows {
            for j in 0..self.grid_cols {
                let idx = i * self.grid_cols + j;
                match &other.children[idx] {
                    UniformChild::Coupled(t) if same_bases && self.is_coupled(i, j) => {
                        if let UniformChild::Coupled(s) = &mut self.children[idx] {
                            s.axpy(1.0, t)?;
                        }
                    }
                    UniformChild::Block(Block::Uniform(b))
                        if matches!(self.children[idx], UniformChild::Block(Block::Uniform(_))) =>
                    {
                        if let UniformChild::Block(Block::Uniform(a)) = &mut self.children[idx] {
                            a.add_uniform(b, opts)?;
                        }
                    }
                    _ => {
                        let rhs = other.child_block(i, j)?.into_owned();
                        if self.is_coupled(i, j) {
                            let lr = rhs.to_low_rank(opts)?;
                            self.defer(i, j, lr, opts)?;
                        } else {
                            crate::arithmetic::add(1.0, &rhs, self.child_block_mut(i, j)?, opts)?;
                        }
                    }
                }
            }
        }
        if let Some(p) = &other.pending {
            for (i, j) in p.positions() {
                if let Some(acc) = p.get(i, j) {
                    let lr = acc.to_low_rank(opts)?;
                    self.defer(i, j, lr, opts)?;
                }
            }
        }
        self.flush_pending(opts)
    }

    /// Number of stored doubles in couplings, children and deferred updates
    /// (bases excluded)
    pub(crate) fn payload_len(&self) -> usize {
        let children: usize = self
            .children
            .iter()
            .map(|c| match c {
                UniformChild::Coupled(s) => s.len(),
                UniformChild::Block(b) => b.payload_len(),
            })
            .sum();
        children + self.pending.as_ref().map_or(0, PendingUpdates::payload_len)
    }

    pub(crate) fn collect_arenas(&self, out: &mut Vec<Arc<ClusterBasis>>) {
        for arena in [self.rows.arena(), self.cols.arena()] {
            if !out.iter().any(|a| Arc::ptr_eq(a, arena)) {
                out.push(Arc::clone(arena));
            }
        }
        for child in &self.children {
            if let UniformChild::Block(b) = child {
                b.collect_arenas(out);
            }
        }
    }

    pub(crate) fn take_pending(&mut self) -> PendingUpdates {
        self.pending.take().unwrap_or_default()
    }

    /// Take child `(i, j)` out as a block, materializing couplings
    pub(crate) fn take_block(&mut self, i: usize, j: usize) -> Result<Block> {
        let placeholder = Block::Dense(crate::block::DenseBlock::zeros(0, 0));
        Ok(std::mem::replace(self.child_block_mut(i, j)?, placeholder))
    }

    pub(crate) fn put_block(&mut self, i: usize, j: usize, block: Block) -> Result<()> {
        let idx = self.index(i, j)?;
        self.children[idx] = UniformChild::Block(block);
        Ok(())
    }

    /// Coupling of `(i, j)` when it is stored against exactly `rows` × `cols`
    pub(crate) fn coupling_against(
        &mut self,
        i: usize,
        j: usize,
        rows: &BasisRef,
        cols: &BasisRef,
    ) -> Option<&mut Matrix> {
        let r = self.row_child_basis(i).ok()?;
        let c = self.col_child_basis(j).ok()?;
        if !r.same_node(rows) || !c.same_node(cols) || self.has_pending(i, j) {
            return None;
        }
        let idx = self.index(i, j).ok()?;
        match &mut self.children[idx] {
            UniformChild::Coupled(s) => Some(s),
            UniformChild::Block(_) => None,
        }
    }

    fn has_pending(&self, i: usize, j: usize) -> bool {
        self.pending.as_ref().is_some_and(|p| p.get(i, j).is_some())
    }

    fn expand_coupling(&self, i: usize, j: usize, s: &Matrix) -> Result<LowRankBlock> {
        let r = self.row_child_basis(i)?;
        let c = self.col_child_basis(j)?;
        LowRankBlock::from_factors(r.reconstruct(s)?, c.expand()?)
    }

    fn index(&self, i: usize, j: usize) -> Result<usize> {
        if i >= self.grid_rows || j >= self.grid_cols {
            return Err(HMatrixError::IndexOutOfBounds {
                row: i,
                col: j,
                nrows: self.grid_rows,
                ncols: self.grid_cols,
            });
        }
        Ok(i * self.grid_cols + j)
    }
}

/// Child handles of a basis node, all of which must exist
fn child_refs(parent: &BasisRef) -> Result<Vec<BasisRef>> {
    let arena = parent.arena();
    let children: Vec<BasisRef> = arena
        .children(parent.node())
        .map(|id| BasisRef::new(Arc::clone(arena), id))
        .collect();
    let covered: usize = children.iter().map(BasisRef::dim).sum();
    if covered != parent.dim() {
        return Err(HMatrixError::Configuration(format!(
            "basis node {} has incomplete children",
            parent.node().index()
        )));
    }
    Ok(children)
}
