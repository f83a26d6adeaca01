//! Dense matrix primitives for hierarchical matrices
//!
//! This crate provides the plain 2D building blocks the block algorithms are
//! written against:
//! - [`Matrix`]: row-major `f64` storage with sub-range read/write
//! - GEMM variants backed by faer ([`mat_mul`], [`gemm_into`])
//! - Thin QR and (truncated) SVD, low-rank recompression
//! - Unpivoted LU and triangular solves
//!
//! # Example
//!
//! ```
//! use hmatrix_linalg::{mat_mul_nt, truncated_svd, Matrix, TruncateOptions};
//!
//! let a = Matrix::from_fn(8, 6, |i, j| 1.0 / (1.0 + i as f64 + j as f64));
//! let opts = TruncateOptions::default().with_max_rank(4);
//! let (u, v) = truncated_svd(&a, &opts).unwrap();
//! assert_eq!(u.ncols(), 4);
//! let approx = mat_mul_nt(&u, &v).unwrap();
//! assert_eq!(approx.shape(), (8, 6));
//! ```

pub mod backend;
pub mod error;
pub mod lu;
pub mod matrix;
pub mod qr;
pub mod svd;

pub use backend::{gemm_into, mat_mul, mat_mul_nt, mat_mul_tn, Transpose};
pub use error::{LinalgError, Result};
pub use lu::{
    lu_in_place, solve_unit_lower_in_place, solve_upper_in_place, solve_upper_right_in_place,
    unpack_lu,
};
pub use matrix::{relative_error, Matrix};
pub use qr::qr;
pub use svd::{recompress, retained_rank, svd, truncated_svd, ThinSvd, TruncateOptions};
