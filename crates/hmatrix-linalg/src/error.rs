//! Error types for hmatrix-linalg

use thiserror::Error;

/// Errors that can occur in dense matrix primitives
#[derive(Debug, Error)]
pub enum LinalgError {
    /// Operand shapes are incompatible for the requested operation
    #[error("Dimension mismatch in {op}: ({lhs_rows}, {lhs_cols}) vs ({rhs_rows}, {rhs_cols})")]
    DimensionMismatch {
        op: &'static str,
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    /// A square matrix was required
    #[error("Matrix must be square, got ({nrows}, {ncols})")]
    NotSquare { nrows: usize, ncols: usize },

    /// Buffer length does not match the requested shape
    #[error("Data length {len} does not match shape ({nrows}, {ncols})")]
    DataLength { len: usize, nrows: usize, ncols: usize },

    /// The SVD backend did not converge
    #[error("SVD did not converge: {0}")]
    SvdNoConvergence(String),

    /// Unpivoted LU hit an exactly zero pivot
    #[error("Zero pivot encountered at index {index}")]
    ZeroPivot { index: usize },
}

/// Result type for dense primitives
pub type Result<T> = std::result::Result<T, LinalgError>;
