//! Admissibility-driven construction from an evaluator
//!
//! Both index ranges are split into `nblocks` near-equal groups per level.
//! For every pair of clusters:
//! - admissible: a truncated low-rank block (or, for uniform blocks, a
//!   coupling against the shared bases)
//! - both extents within the leaf size, or the depth exhausted: a dense leaf
//! - otherwise: recurse
//!
//! The root is always subdivided.

use std::sync::Arc;

use hmatrix_linalg::Matrix;
use log::debug;

use crate::basis::{BasisId, BasisRef, ClusterBasis};
use crate::block::{Block, DenseBlock, HierarchicalBlock, UniformBlock, UniformChild};
use crate::cluster::{is_admissible, Cluster};
use crate::error::{HMatrixError, Result};
use crate::options::{HMatrixOptions, PartitionOptions};

#[derive(Debug, Default)]
struct BuildStats {
    dense: usize,
    low_rank: usize,
    grids: usize,
}

fn check_inputs(rows: usize, cols: usize, partition: &PartitionOptions, opts: &HMatrixOptions) -> Result<()> {
    partition.validate()?;
    opts.validate()?;
    if rows == 0 || cols == 0 {
        return Err(HMatrixError::Configuration(format!(
            "cannot build a {}x{} block",
            rows, cols
        )));
    }
    Ok(())
}

fn is_leaf(row: &Cluster, col: &Cluster, level: usize, partition: &PartitionOptions) -> bool {
    (row.dim <= partition.leaf_size && col.dim <= partition.leaf_size) || level >= partition.depth
}

fn sample<E>(eval: &E, row: Cluster, col: Cluster) -> Matrix
where
    E: Fn(usize, usize) -> f64 + ?Sized,
{
    Matrix::from_fn(row.dim, col.dim, |i, j| eval(row.start + i, col.start + j))
}

impl HierarchicalBlock {
    /// Build the hierarchical approximation of `eval` over `0..rows × 0..cols`.
    ///
    /// # Errors
    /// `Configuration` for empty extents or invalid options, `Compression`
    /// if a low-rank truncation fails.
    pub fn from_fn<E>(
        eval: &E,
        rows: usize,
        cols: usize,
        partition: &PartitionOptions,
        opts: &HMatrixOptions,
    ) -> Result<HierarchicalBlock>
    where
        E: Fn(usize, usize) -> f64 + ?Sized,
    {
        check_inputs(rows, cols, partition, opts)?;
        let mut stats = BuildStats::default();
        let h = build_grid(eval, Cluster::new(0, rows), Cluster::new(0, cols), 0, partition, opts, &mut stats)?;
        debug!(
            "built {}x{} hierarchical block: {} grids, {} dense leaves, {} low-rank leaves",
            rows, cols, stats.grids, stats.dense, stats.low_rank
        );
        Ok(h)
    }
}

fn build_grid<E>(
    eval: &E,
    row: Cluster,
    col: Cluster,
    level: usize,
    partition: &PartitionOptions,
    opts: &HMatrixOptions,
    stats: &mut BuildStats,
) -> Result<HierarchicalBlock>
where
    E: Fn(usize, usize) -> f64 + ?Sized,
{
    let (rs, cs) = (row.split(partition.nblocks), col.split(partition.nblocks));
    let mut children = Vec::with_capacity(rs.len() * cs.len());
    for r in &rs {
        for c in &cs {
            children.push(build_node(eval, *r, *c, level + 1, partition, opts, stats)?);
        }
    }
    stats.grids += 1;
    HierarchicalBlock::from_grid(rs.len(), cs.len(), children)
}

fn build_node<E>(
    eval: &E,
    row: Cluster,
    col: Cluster,
    level: usize,
    partition: &PartitionOptions,
    opts: &HMatrixOptions,
    stats: &mut BuildStats,
) -> Result<Block>
where
    E: Fn(usize, usize) -> f64 + ?Sized,
{
    if is_admissible(&row, &col, partition.admissibility) {
        stats.low_rank += 1;
        let dense = DenseBlock::from_fn(eval, row.start, col.start, row.dim, col.dim);
        return Ok(Block::LowRank(dense.to_low_rank(opts)?));
    }
    if is_leaf(&row, &col, level, partition) {
        stats.dense += 1;
        return Ok(Block::Dense(DenseBlock::from_fn(eval, row.start, col.start, row.dim, col.dim)));
    }
    Ok(Block::Hierarchical(build_grid(eval, row, col, level, partition, opts, stats)?))
}

impl UniformBlock {
    /// Build the uniform (H2) approximation of `eval` over `0..rows × 0..cols`.
    ///
    /// A first pass walks the block tree, creating basis nodes as their
    /// clusters are visited and recording the admissible partners of each.
    /// The row and column arenas are then filled from far-field samples,
    /// reduced to transfer form and frozen. A second pass stores dense
    /// leaves and couplings `S = Q_rᵗ · A · Q_c` against the frozen arenas.
    pub fn from_fn<E>(
        eval: &E,
        rows: usize,
        cols: usize,
        partition: &PartitionOptions,
        opts: &HMatrixOptions,
    ) -> Result<UniformBlock>
    where
        E: Fn(usize, usize) -> f64 + ?Sized,
    {
        check_inputs(rows, cols, partition, opts)?;

        let mut row_basis = ClusterBasis::new(Cluster::new(0, rows), partition.nblocks);
        let mut col_basis = ClusterBasis::new(Cluster::new(0, cols), partition.nblocks);
        let (row_root, col_root) = (row_basis.root(), col_basis.root());
        plan(&mut row_basis, &mut col_basis, row_root, col_root, 0, partition)?;

        row_basis.build_bases(eval, opts)?;
        let transposed = |i: usize, j: usize| eval(j, i);
        col_basis.build_bases(&transposed, opts)?;
        row_basis.reduce_storage()?;
        col_basis.reduce_storage()?;

        let rows_ref = BasisRef::root(Arc::new(row_basis));
        let cols_ref = BasisRef::root(Arc::new(col_basis));
        let mut stats = BuildStats::default();
        let u = assemble(eval, rows_ref, cols_ref, 0, partition, &mut stats)?;
        debug!(
            "built {}x{} uniform block: {} grids, {} dense leaves, {} couplings, basis storage {}",
            rows,
            cols,
            stats.grids,
            stats.dense,
            stats.low_rank,
            u.row_basis().arena().storage_len() + u.col_basis().arena().storage_len()
        );
        Ok(u)
    }
}

fn plan(
    rows: &mut ClusterBasis,
    cols: &mut ClusterBasis,
    rid: BasisId,
    cid: BasisId,
    level: usize,
    partition: &PartitionOptions,
) -> Result<()> {
    let rs = rows.cluster(rid).split(partition.nblocks);
    let cs = cols.cluster(cid).split(partition.nblocks);
    for (i, r) in rs.iter().enumerate() {
        let ri = rows.child_or_insert(rid, i)?;
        for (j, c) in cs.iter().enumerate() {
            let cj = cols.child_or_insert(cid, j)?;
            if is_admissible(r, c, partition.admissibility) {
                rows.add_far_field(ri, *c);
                cols.add_far_field(cj, *r);
            } else if !is_leaf(r, c, level + 1, partition) {
                plan(rows, cols, ri, cj, level + 1, partition)?;
            }
        }
    }
    Ok(())
}

fn assemble<E>(
    eval: &E,
    rows: BasisRef,
    cols: BasisRef,
    level: usize,
    partition: &PartitionOptions,
    stats: &mut BuildStats,
) -> Result<UniformBlock>
where
    E: Fn(usize, usize) -> f64 + ?Sized,
{
    let m = rows.cluster().split(partition.nblocks).len();
    let n = cols.cluster().split(partition.nblocks).len();
    let missing = |index: usize| HMatrixError::Configuration(format!("basis child {} was never planned", index));

    let mut children = Vec::with_capacity(m * n);
    for i in 0..m {
        let ri = rows.child(i).ok_or_else(|| missing(i))?;
        for j in 0..n {
            let cj = cols.child(j).ok_or_else(|| missing(j))?;
            let (r, c) = (ri.cluster(), cj.cluster());
            let child = if is_admissible(&r, &c, partition.admissibility) {
                stats.low_rank += 1;
                UniformChild::Coupled(ri.coupling_of(&sample(eval, r, c), &cj)?)
            } else if is_leaf(&r, &c, level + 1, partition) {
                stats.dense += 1;
                UniformChild::Block(Block::Dense(DenseBlock::new(sample(eval, r, c))))
            } else {
                UniformChild::Block(Block::Uniform(assemble(eval, ri.clone(), cj, level + 1, partition, stats)?))
            };
            children.push(child);
        }
    }
    stats.grids += 1;
    UniformBlock::new(rows, cols, children)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::BlockKind;

    fn kernel(i: usize, j: usize) -> f64 {
        1.0 / (1.0 + (i as f64 - j as f64).abs())
    }

    fn dense(n: usize) -> Matrix {
        Matrix::from_fn(n, n, kernel)
    }

    #[test]
    fn test_root_always_split() {
        let partition = PartitionOptions::default().with_leaf_size(64);
        let h = HierarchicalBlock::from_fn(&kernel, 16, 16, &partition, &HMatrixOptions::default()).unwrap();
        assert_eq!(h.grid_shape(), (2, 2));
        // 8|8 siblings sit at distance 8 with half width 4
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { BlockKind::Dense } else { BlockKind::LowRank };
                assert_eq!(h.get(i, j).unwrap().kind(), expected);
            }
        }

        let dense_only = partition.with_admissibility(0.0);
        let h = HierarchicalBlock::from_fn(&kernel, 16, 16, &dense_only, &HMatrixOptions::default()).unwrap();
        assert_eq!(h.grid_shape(), (2, 2));
        assert!(h.children().all(|c| c.kind() == BlockKind::Dense));
    }

    #[test]
    fn test_hierarchical_accuracy() {
        let partition = PartitionOptions::default().with_leaf_size(16).with_depth(3);
        let opts = HMatrixOptions::default().with_rank(24);
        let h = HierarchicalBlock::from_fn(&kernel, 128, 128, &partition, &opts).unwrap();
        let err = Block::Hierarchical(h).to_dense().unwrap().minus(&dense(128)).unwrap().norm_f();
        assert!(err / dense(128).norm_f() < 1e-6);
    }

    #[test]
    fn test_zero_admissibility_is_dense() {
        let partition = PartitionOptions::default().with_leaf_size(8).with_admissibility(0.0);
        let h = Block::Hierarchical(
            HierarchicalBlock::from_fn(&kernel, 32, 32, &partition, &HMatrixOptions::default()).unwrap(),
        );
        assert_eq!(h.compression_ratio(), 1.0);
        assert_eq!(h.to_dense().unwrap(), dense(32));
    }

    #[test]
    fn test_invalid_configuration() {
        let opts = HMatrixOptions::default();
        let bad = PartitionOptions::default().with_nblocks(0);
        assert!(matches!(
            HierarchicalBlock::from_fn(&kernel, 8, 8, &bad, &opts),
            Err(HMatrixError::Configuration(_))
        ));
        assert!(matches!(
            UniformBlock::from_fn(&kernel, 0, 8, &PartitionOptions::default(), &opts),
            Err(HMatrixError::Configuration(_))
        ));
    }

    #[test]
    fn test_uniform_accuracy() {
        let partition = PartitionOptions::default().with_leaf_size(16).with_depth(3);
        let opts = HMatrixOptions::default().with_rank(24);
        let u = UniformBlock::from_fn(&kernel, 128, 128, &partition, &opts).unwrap();
        assert_eq!(u.grid_shape(), (2, 2));
        let err = u.to_dense().unwrap().minus(&dense(128)).unwrap().norm_f();
        assert!(err / dense(128).norm_f() < 1e-4, "relative error {}", err);
    }
}
