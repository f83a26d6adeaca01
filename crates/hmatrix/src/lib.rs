//! Hierarchical matrices
//!
//! A [`Block`] is a dense leaf, a low-rank leaf `U·Vᵗ`, a grid of blocks
//! ([`HierarchicalBlock`], H-matrix) or a grid whose admissible children are
//! couplings against shared nested cluster bases ([`UniformBlock`],
//! H2-matrix). Blocks are built from an evaluator `(i, j) -> f64`, combined
//! with closed-form arithmetic (GEMM, triangular solves, in-place LU) and
//! persisted as a structure text plus a binary payload.
//!
//! # Example
//!
//! ```
//! use hmatrix::{lu, Block, HMatrixOptions, HierarchicalBlock, PartitionOptions};
//!
//! let kernel = |i: usize, j: usize| {
//!     let d = (i as f64 - j as f64).abs();
//!     if i == j { 4.0 } else { 1.0 / (1.0 + d) }
//! };
//! let partition = PartitionOptions::default().with_leaf_size(32);
//! let opts = HMatrixOptions::default();
//! let h = HierarchicalBlock::from_fn(&kernel, 256, 256, &partition, &opts).unwrap();
//!
//! let mut a = Block::Hierarchical(h);
//! assert!(a.compression_ratio() < 1.0);
//! lu(&mut a, &opts).unwrap();
//! ```

pub mod arithmetic;
pub mod basis;
pub mod block;
mod build;
pub mod cluster;
pub mod codec;
pub mod error;
pub mod options;
pub mod storage;

pub use arithmetic::{add, add_low_rank, gemm, gemm_uniform, hadamard, lu, solve, solve_right_upper, ProjectionCache};
pub use basis::{BasisId, BasisRef, ClusterBasis};
pub use block::{
    Block, BlockKind, DenseBlock, HierarchicalBlock, HierarchicalBuilder, LowRankAccumulator, LowRankBlock,
    PendingUpdates, UniformBlock, UniformChild,
};
pub use cluster::{is_admissible, split_sizes, Cluster};
pub use codec::parse_structure;
pub use error::{HMatrixError, Result};
pub use options::{HMatrixOptions, PartitionOptions};
pub use storage::{read_from_dir, write_to_dir, DEFAULT_STORAGE_DIR};
