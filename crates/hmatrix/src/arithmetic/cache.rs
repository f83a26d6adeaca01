//! Uniform × uniform multiplication with cached basis projections

use std::collections::HashMap;

use hmatrix_linalg::{mat_mul, Matrix};
use log::trace;

use crate::arithmetic::{accumulate, as_grid_mut, gemm, Term};
use crate::basis::{BasisId, BasisRef};
use crate::block::{Block, LowRankBlock, PendingUpdates, UniformBlock, UniformChild};
use crate::error::{HMatrixError, Result};
use crate::options::HMatrixOptions;

type NodeKey = (usize, BasisId);

/// Memoized basis products `Q_leftᵗ · Q_right`.
///
/// Keys identify basis nodes by arena and node id, so a cache must not
/// outlive the arenas it was filled from.
#[derive(Debug, Default)]
pub struct ProjectionCache {
    entries: HashMap<(NodeKey, NodeKey), Matrix>,
    hits: usize,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered without recomputation
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
    }

    /// `Q_leftᵗ · Q_right`, computed once per pair of basis nodes
    pub fn get_or_insert(&mut self, left: &BasisRef, right: &BasisRef) -> Result<&Matrix> {
        if left.dim() != right.dim() {
            return Err(HMatrixError::dimension(
                "projection",
                (left.dim(), left.rank()),
                (right.dim(), right.rank()),
            ));
        }
        let key = (left.key(), right.key());
        if self.entries.contains_key(&key) {
            self.hits += 1;
        } else {
            let m = left.project(&right.expand()?)?;
            self.entries.insert(key, m);
        }
        self.entries.get(&key).ok_or(HMatrixError::Compression(
            "projection cache entry vanished".to_string(),
        ))
    }
}

/// `c ← alpha · a · b + beta · c` for two uniform operands.
///
/// Where both operand children are couplings, the product stays in coupling
/// space: `S_a · (Q_aᵗ Q_b) · S_b` with the middle factor taken from `cache`.
/// If the target child is coupled against the same outer bases the core is
/// added to its coupling directly. Other child pairs go through [`gemm`].
pub fn gemm_uniform(
    alpha: f64,
    a: &UniformBlock,
    b: &UniformBlock,
    beta: f64,
    c: &mut Block,
    opts: &HMatrixOptions,
    cache: &mut ProjectionCache,
) -> Result<()> {
    if a.ncols() != b.nrows() || a.nrows() != c.nrows() || b.ncols() != c.ncols() {
        return Err(HMatrixError::dimension(
            "gemm_uniform",
            (a.nrows(), a.ncols()),
            (b.nrows(), b.ncols()),
        ));
    }
    let conforming = a.col_sizes() == b.row_sizes()
        && c.grid_sizes() == Some((a.row_sizes(), b.col_sizes()))
        && a.pending().is_none_or(PendingUpdates::is_empty)
        && b.pending().is_none_or(PendingUpdates::is_empty);
    if !conforming {
        trace!("gemm_uniform: operands do not conform, using generic gemm");
        let (a, b) = (Block::Uniform(a.clone()), Block::Uniform(b.clone()));
        return gemm(alpha, &a, &b, beta, c, opts);
    }

    if beta != 1.0 {
        c.scale(beta);
    }
    let kind = c.kind();
    let cg = as_grid_mut(c).ok_or(HMatrixError::UnsupportedOperand {
        op: "gemm_uniform",
        kind,
    })?;
    let (m, n) = (a.grid_shape().0, b.grid_shape().1);
    let inner = a.grid_shape().1;
    let mut pending = PendingUpdates::new();

    for i in 0..m {
        let ri = a.row_child_basis(i)?;
        for j in 0..n {
            let cj = b.col_child_basis(j)?;
            for k in 0..inner {
                match (a.child(i, k)?, b.child(k, j)?) {
                    (UniformChild::Coupled(s1), UniformChild::Coupled(s2)) => {
                        let middle = cache.get_or_insert(&a.col_child_basis(k)?, &b.row_child_basis(k)?)?;
                        let mut core = mat_mul(&mat_mul(s1, middle)?, s2)?;
                        core.scale_in_place(alpha);
                        if let Some(s) = cg.coupling_mut(i, j, &ri, &cj) {
                            s.axpy(1.0, &core)?;
                            continue;
                        }
                        let lr = LowRankBlock::from_factors(ri.reconstruct(&core)?, cj.expand()?)?;
                        if cg.is_coupled(i, j) {
                            pending.push(i, j, lr)?;
                        } else {
                            let mut t = cg.take_child(i, j)?;
                            accumulate(&mut t, 1.0, Term::LowRank(lr), opts)?;
                            cg.put_child(i, j, t)?;
                        }
                    }
                    (UniformChild::Block(Block::Uniform(x)), UniformChild::Block(Block::Uniform(y)))
                        if !cg.is_coupled(i, j) =>
                    {
                        let mut t = cg.take_child(i, j)?;
                        gemm_uniform(alpha, x, y, 1.0, &mut t, opts, cache)?;
                        cg.put_child(i, j, t)?;
                    }
                    _ => {
                        let (x, y) = (a.child_block(i, k)?, b.child_block(k, j)?);
                        if cg.is_coupled(i, j) {
                            let lr = crate::arithmetic::product_low_rank(alpha, &x, &y, opts)?;
                            pending.push(i, j, lr)?;
                        } else {
                            let mut t = cg.take_child(i, j)?;
                            gemm(alpha, &x, &y, 1.0, &mut t, opts)?;
                            cg.put_child(i, j, t)?;
                        }
                    }
                }
            }
            cg.flush(i, j, &mut pending, opts)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::ClusterBasis;
    use crate::cluster::Cluster;
    use std::sync::Arc;

    fn arena() -> Arc<ClusterBasis> {
        let mut basis = ClusterBasis::new(Cluster::new(0, 16), 2);
        let root = basis.root();
        let left = basis.child_or_insert(root, 0).unwrap();
        basis.child_or_insert(root, 1).unwrap();
        basis.add_far_field(left, Cluster::new(8, 8));
        let eval = |i: usize, j: usize| 1.0 / (1.0 + (i as f64 - j as f64).abs());
        basis.build_bases(&eval, &HMatrixOptions::default().with_rank(4)).unwrap();
        Arc::new(basis)
    }

    #[test]
    fn test_cache_reuses_products() {
        let arena = arena();
        let root = BasisRef::root(Arc::clone(&arena));
        let left = root.child(0).unwrap();

        let mut cache = ProjectionCache::new();
        let first = cache.get_or_insert(&left, &left).unwrap().clone();
        let again = cache.get_or_insert(&left, &left).unwrap().clone();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(first, again);

        // Q_leftᵗ Q_left is the identity for an orthonormal basis
        let k = left.rank();
        let eye = Matrix::identity(k);
        assert!(first.minus(&eye).unwrap().norm_f() < 1e-10);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_rejects_mismatched_nodes() {
        let arena = arena();
        let root = BasisRef::root(Arc::clone(&arena));
        let left = root.child(0).unwrap();
        let mut cache = ProjectionCache::new();
        assert!(cache.get_or_insert(&left, &root).is_err());
    }
}
