//! Nested cluster bases stored in an arena
//!
//! Every node of a [`ClusterBasis`] belongs to one index cluster. Leaf nodes
//! hold an orthonormal basis `Q` (`dim × rank`) of the sampled far field of
//! their cluster. Internal nodes are nested: their basis lies in the span of
//! the stacked child bases, `Q_p = diag(Q_c) · [E_c]`, so after
//! [`ClusterBasis::reduce_storage`] they keep only the transfer matrices
//! `E_c = Q_cᵗ · Q_p[rows of c]`.
//!
//! Children are referenced by index; the parent link is a plain index too.

use std::sync::Arc;

use hmatrix_linalg::{mat_mul, mat_mul_tn, retained_rank, svd, Matrix};
use log::debug;

use crate::cluster::{is_admissible, Cluster};
use crate::error::{HMatrixError, Result};
use crate::options::{HMatrixOptions, PartitionOptions};

/// Index of a node inside one [`ClusterBasis`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasisId(usize);

impl BasisId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct BasisNode {
    cluster: Cluster,
    rank: usize,
    basis: Option<Matrix>,
    transfer: Option<Matrix>,
    parent: Option<BasisId>,
    children: Vec<Option<BasisId>>,
    far_field: Vec<Cluster>,
}

impl BasisNode {
    fn new(cluster: Cluster, parent: Option<BasisId>, nblocks: usize) -> Self {
        Self {
            cluster,
            rank: 0,
            basis: None,
            transfer: None,
            parent,
            children: vec![None; cluster.split(nblocks).len()],
            far_field: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }
}

/// Arena of nested cluster bases
#[derive(Debug, Clone)]
pub struct ClusterBasis {
    nodes: Vec<BasisNode>,
    nblocks: usize,
    reduced: bool,
}

impl ClusterBasis {
    /// Arena with a single root node for `root`
    pub fn new(root: Cluster, nblocks: usize) -> Self {
        Self {
            nodes: vec![BasisNode::new(root, None, nblocks)],
            nblocks,
            reduced: false,
        }
    }

    /// Build the basis tree of `cluster` directly from an evaluator.
    ///
    /// The far field of every node is the set of admissible tiles (of the
    /// node's own size) of `0..extent`.
    pub fn from_fn<E>(
        eval: &E,
        cluster: Cluster,
        extent: usize,
        partition: &PartitionOptions,
        opts: &HMatrixOptions,
    ) -> Result<Self>
    where
        E: Fn(usize, usize) -> f64 + ?Sized,
    {
        partition.validate()?;
        opts.validate()?;
        if cluster.dim == 0 || cluster.end() > extent {
            return Err(HMatrixError::Configuration(format!(
                "cluster {:?} does not fit in 0..{}",
                cluster, extent
            )));
        }

        let mut cb = ClusterBasis::new(cluster, partition.nblocks);
        let mut stack = vec![(cb.root(), 0usize)];
        while let Some((id, level)) = stack.pop() {
            let c = cb.cluster(id);
            let mut start = 0;
            while start < extent {
                let tile = Cluster::new(start, c.dim.min(extent - start));
                if is_admissible(&c, &tile, partition.admissibility) {
                    cb.add_far_field(id, tile);
                }
                start += c.dim;
            }
            if c.dim > partition.leaf_size && level < partition.depth {
                for index in 0..cb.nodes[id.0].children.len() {
                    let child = cb.child_or_insert(id, index)?;
                    stack.push((child, level + 1));
                }
            }
        }

        cb.build_bases(eval, opts)?;
        cb.reduce_storage()?;
        Ok(cb)
    }

    pub fn root(&self) -> BasisId {
        BasisId(0)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn cluster(&self, id: BasisId) -> Cluster {
        self.nodes[id.0].cluster
    }

    pub fn rank(&self, id: BasisId) -> usize {
        self.nodes[id.0].rank
    }

    pub fn parent(&self, id: BasisId) -> Option<BasisId> {
        self.nodes[id.0].parent
    }

    pub fn child(&self, id: BasisId, index: usize) -> Option<BasisId> {
        self.nodes[id.0].children.get(index).copied().flatten()
    }

    /// Created children of `id`, in cluster order
    pub fn children(&self, id: BasisId) -> impl Iterator<Item = BasisId> + '_ {
        self.nodes[id.0].children.iter().filter_map(|c| *c)
    }

    pub fn is_leaf(&self, id: BasisId) -> bool {
        self.nodes[id.0].is_leaf()
    }

    /// Child `index` of `id`, created on first visit and reused afterwards
    pub fn child_or_insert(&mut self, id: BasisId, index: usize) -> Result<BasisId> {
        let slots = self.nodes[id.0].children.len();
        if index >= slots {
            return Err(HMatrixError::IndexOutOfBounds {
                row: index,
                col: 0,
                nrows: slots,
                ncols: 1,
            });
        }
        if let Some(existing) = self.nodes[id.0].children[index] {
            return Ok(existing);
        }
        let cluster = self.nodes[id.0].cluster.split(self.nblocks)[index];
        let child = BasisId(self.nodes.len());
        self.nodes.push(BasisNode::new(cluster, Some(id), self.nblocks));
        self.nodes[id.0].children[index] = Some(child);
        Ok(child)
    }

    /// Record an admissible partner cluster of `id`
    pub fn add_far_field(&mut self, id: BasisId, partner: Cluster) {
        let far = &mut self.nodes[id.0].far_field;
        if !far.contains(&partner) {
            far.push(partner);
        }
    }

    /// Compute every basis from far-field samples of `eval`.
    ///
    /// Leaves take the leading left singular vectors of
    /// `eval(rows of the cluster, far-field columns of the cluster and its
    /// ancestors)`. Internal nodes take the leading left singular vectors of
    /// the same sample projected onto their children's bases, which keeps the
    /// tree exactly nested. Internal nodes get all their children first.
    pub fn build_bases<E>(&mut self, eval: &E, opts: &HMatrixOptions) -> Result<()>
    where
        E: Fn(usize, usize) -> f64 + ?Sized,
    {
        for idx in 0..self.nodes.len() {
            if !self.nodes[idx].is_leaf() {
                for index in 0..self.nodes[idx].children.len() {
                    self.child_or_insert(BasisId(idx), index)?;
                }
            }
        }

        let trunc = opts.truncation();
        for idx in (0..self.nodes.len()).rev() {
            let cluster = self.nodes[idx].cluster;
            let cols = self.sample_columns(BasisId(idx), opts.sample_limit);
            let sample = Matrix::from_fn(cluster.dim, cols.len(), |i, j| eval(cluster.start + i, cols[j]));

            let basis = if self.nodes[idx].is_leaf() {
                let d = svd(&sample)?;
                d.u.columns(0..retained_rank(&d.s, &trunc))
            } else {
                let children: Vec<BasisId> = self.children(BasisId(idx)).collect();
                let mut projected = Vec::with_capacity(children.len());
                for &c in &children {
                    let q = self.full_basis(c)?;
                    let rows = self.local_rows(c);
                    projected.push(mat_mul_tn(q, &sample.rows(rows))?);
                }
                let refs: Vec<&Matrix> = projected.iter().collect();
                let d = svd(&Matrix::vcat(&refs)?)?;
                let w = d.u.columns(0..retained_rank(&d.s, &trunc));

                let mut parts = Vec::with_capacity(children.len());
                let mut row0 = 0;
                for &c in &children {
                    let k = self.nodes[c.0].rank;
                    parts.push(mat_mul(self.full_basis(c)?, &w.rows(row0..row0 + k))?);
                    row0 += k;
                }
                let refs: Vec<&Matrix> = parts.iter().collect();
                Matrix::vcat(&refs)?
            };

            let node = &mut self.nodes[idx];
            node.rank = basis.ncols();
            node.basis = Some(basis);
            node.transfer = None;
        }
        self.reduced = false;
        debug!(
            "built {} cluster bases over {} indices, storage {}",
            self.nodes.len(),
            self.nodes[0].cluster.dim,
            self.storage_len()
        );
        Ok(())
    }

    /// Full basis of `id`, if it is still stored
    pub fn basis(&self, id: BasisId) -> Option<&Matrix> {
        self.nodes[id.0].basis.as_ref()
    }

    /// Transfer matrix `E` from `id` to its parent (`k_id × k_parent`)
    pub fn transfer(&self, id: BasisId) -> Option<&Matrix> {
        self.nodes[id.0].transfer.as_ref()
    }

    pub fn is_reduced(&self) -> bool {
        self.reduced
    }

    /// Convert to reduced storage: compute all transfers, then drop the full
    /// bases of internal nodes. Leaves keep theirs.
    pub fn reduce_storage(&mut self) -> Result<()> {
        if self.reduced {
            return Ok(());
        }
        let mut transfers = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            let transfer = match self.nodes[idx].parent {
                Some(p) => {
                    let q_c = self.full_basis(BasisId(idx))?;
                    let q_p = self.full_basis(p)?;
                    Some(mat_mul_tn(q_c, &q_p.rows(self.local_rows(BasisId(idx))))?)
                }
                None => None,
            };
            transfers.push(transfer);
        }
        for (node, transfer) in self.nodes.iter_mut().zip(transfers) {
            node.transfer = transfer;
            if !node.is_leaf() {
                node.basis = None;
            }
        }
        self.reduced = true;
        Ok(())
    }

    /// Product of the transfers on the path `node → … → ancestor`
    /// (`k_node × k_ancestor`)
    pub fn chained_transfer(&self, node: BasisId, ancestor: BasisId) -> Result<Matrix> {
        let mut acc = Matrix::identity(self.rank(node));
        let mut cur = node;
        while cur != ancestor {
            let parent = self.parent(cur).ok_or_else(|| {
                HMatrixError::Configuration(format!(
                    "basis node {} is not an ancestor of {}",
                    ancestor.0, node.0
                ))
            })?;
            let e = self.transfer(cur).ok_or_else(|| {
                HMatrixError::Configuration("transfer matrices are only stored in reduced form".to_string())
            })?;
            acc = mat_mul(&acc, e)?;
            cur = parent;
        }
        Ok(acc)
    }

    /// Full `dim × rank` basis of `id`, rebuilt from the leaves if needed
    pub fn expand(&self, id: BasisId) -> Result<Matrix> {
        self.reconstruct(id, &Matrix::identity(self.rank(id)))
    }

    /// `Q_idᵗ · x`, computed bottom-up without forming internal bases
    pub fn project(&self, id: BasisId, x: &Matrix) -> Result<Matrix> {
        let node = &self.nodes[id.0];
        if x.nrows() != node.cluster.dim {
            return Err(HMatrixError::dimension(
                "project",
                (node.cluster.dim, node.rank),
                x.shape(),
            ));
        }
        if let Some(q) = &node.basis {
            return Ok(mat_mul_tn(q, x)?);
        }
        let mut acc = Matrix::zeros(node.rank, x.ncols());
        for c in self.children(id) {
            let pc = self.project(c, &x.rows(self.local_rows(c)))?;
            let e = self.stored_transfer(c)?;
            acc.axpy(1.0, &mat_mul_tn(e, &pc)?)?;
        }
        Ok(acc)
    }

    /// `Q_id · c`, computed top-down without forming internal bases
    pub fn reconstruct(&self, id: BasisId, c: &Matrix) -> Result<Matrix> {
        let node = &self.nodes[id.0];
        if c.nrows() != node.rank {
            return Err(HMatrixError::dimension(
                "reconstruct",
                (node.cluster.dim, node.rank),
                c.shape(),
            ));
        }
        if let Some(q) = &node.basis {
            return Ok(mat_mul(q, c)?);
        }
        let mut parts = Vec::new();
        for child in self.children(id) {
            let e = self.stored_transfer(child)?;
            parts.push(self.reconstruct(child, &mat_mul(e, c)?)?);
        }
        let refs: Vec<&Matrix> = parts.iter().collect();
        let out = Matrix::vcat(&refs)?;
        if out.nrows() != node.cluster.dim {
            return Err(HMatrixError::Configuration(format!(
                "basis node {} has neither a basis nor complete children",
                id.0
            )));
        }
        Ok(out)
    }

    /// Number of stored doubles (bases and transfers)
    pub fn storage_len(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.basis.as_ref().map_or(0, Matrix::len) + n.transfer.as_ref().map_or(0, Matrix::len))
            .sum()
    }

    fn full_basis(&self, id: BasisId) -> Result<&Matrix> {
        self.basis(id).ok_or_else(|| {
            HMatrixError::Configuration(format!("basis node {} holds no explicit basis", id.0))
        })
    }

    fn stored_transfer(&self, id: BasisId) -> Result<&Matrix> {
        self.transfer(id).ok_or_else(|| {
            HMatrixError::Configuration(format!("basis node {} holds no transfer matrix", id.0))
        })
    }

    /// Rows of `id` relative to its parent's cluster
    fn local_rows(&self, id: BasisId) -> std::ops::Range<usize> {
        let c = self.cluster(id);
        let base = self.parent(id).map_or(c.start, |p| self.cluster(p).start);
        c.start - base..c.end() - base
    }

    /// Far-field columns of `id` and all its ancestors, strided down to `limit`
    fn sample_columns(&self, id: BasisId, limit: usize) -> Vec<usize> {
        let mut cols = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            for c in &self.nodes[n.0].far_field {
                cols.extend(c.range());
            }
            cur = self.parent(n);
        }
        cols.sort_unstable();
        cols.dedup();
        if cols.len() > limit {
            let step = cols.len().div_ceil(limit);
            cols = cols.into_iter().step_by(step).collect();
        }
        cols
    }
}

/// Shared handle to one node of a frozen basis arena
#[derive(Debug, Clone)]
pub struct BasisRef {
    arena: Arc<ClusterBasis>,
    node: BasisId,
}

impl BasisRef {
    pub fn new(arena: Arc<ClusterBasis>, node: BasisId) -> Self {
        Self { arena, node }
    }

    pub fn root(arena: Arc<ClusterBasis>) -> Self {
        let node = arena.root();
        Self { arena, node }
    }

    pub fn arena(&self) -> &Arc<ClusterBasis> {
        &self.arena
    }

    pub fn node(&self) -> BasisId {
        self.node
    }

    pub fn cluster(&self) -> Cluster {
        self.arena.cluster(self.node)
    }

    pub fn dim(&self) -> usize {
        self.cluster().dim
    }

    pub fn rank(&self) -> usize {
        self.arena.rank(self.node)
    }

    pub fn child(&self, index: usize) -> Option<BasisRef> {
        self.arena
            .child(self.node, index)
            .map(|node| BasisRef::new(Arc::clone(&self.arena), node))
    }

    pub fn project(&self, x: &Matrix) -> Result<Matrix> {
        self.arena.project(self.node, x)
    }

    pub fn reconstruct(&self, c: &Matrix) -> Result<Matrix> {
        self.arena.reconstruct(self.node, c)
    }

    pub fn expand(&self) -> Result<Matrix> {
        self.arena.expand(self.node)
    }

    /// Coupling `Q_selfᵗ · a · Q_cols`
    pub fn coupling_of(&self, a: &Matrix, cols: &BasisRef) -> Result<Matrix> {
        let t = self.project(a)?;
        Ok(cols.project(&t.transpose())?.transpose())
    }

    /// True if both handles name the same node of the same arena
    pub fn same_node(&self, other: &BasisRef) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena) && self.node == other.node
    }

    pub(crate) fn key(&self) -> (usize, BasisId) {
        (Arc::as_ptr(&self.arena) as usize, self.node)
    }
}
