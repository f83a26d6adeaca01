//! Error types for hmatrix

use hmatrix_linalg::LinalgError;
use thiserror::Error;

use crate::block::BlockKind;

/// Errors that can occur while building, combining or persisting blocks
#[derive(Debug, Error)]
pub enum HMatrixError {
    /// Failure reading or writing persisted artifacts
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Structure text starts a node with a tag that is not `D`, `LR` or `H`
    #[error("Unknown block tag {tag:?} on structure line {line}")]
    UnknownBlockTag { line: usize, tag: String },

    /// Structure text is truncated or carries bad fields
    #[error("Malformed structure on line {line}: {message}")]
    MalformedStructure { line: usize, message: String },

    /// Operand shapes are incompatible
    #[error("Dimension mismatch in {op}: ({lhs_rows}, {lhs_cols}) vs ({rhs_rows}, {rhs_cols})")]
    Dimension {
        op: &'static str,
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    /// Grid position outside the block grid
    #[error("Index out of bounds: ({row}, {col}) is out of bounds for a ({nrows}, {ncols}) grid")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },

    /// A grid child was never assigned
    #[error("Grid child ({row}, {col}) is unset")]
    UnsetChild { row: usize, col: usize },

    /// Row or column groups of a grid do not share a common extent
    #[error("Ragged grid: {message}")]
    RaggedGrid { message: String },

    /// Low-rank truncation failed in the numeric backend
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Invalid construction parameters
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Operation is not defined for this block variant
    #[error("Operation {op} is not supported for {kind:?} blocks")]
    UnsupportedOperand { op: &'static str, kind: BlockKind },

    /// Other dense primitive failure
    #[error("Dense primitive failed: {0}")]
    Linalg(LinalgError),
}

impl From<LinalgError> for HMatrixError {
    fn from(err: LinalgError) -> Self {
        match err {
            LinalgError::SvdNoConvergence(msg) => HMatrixError::Compression(msg),
            LinalgError::DimensionMismatch {
                op,
                lhs_rows,
                lhs_cols,
                rhs_rows,
                rhs_cols,
            } => HMatrixError::Dimension {
                op,
                lhs_rows,
                lhs_cols,
                rhs_rows,
                rhs_cols,
            },
            other => HMatrixError::Linalg(other),
        }
    }
}

impl HMatrixError {
    pub(crate) fn dimension(op: &'static str, lhs: (usize, usize), rhs: (usize, usize)) -> Self {
        HMatrixError::Dimension {
            op,
            lhs_rows: lhs.0,
            lhs_cols: lhs.1,
            rhs_rows: rhs.0,
            rhs_cols: rhs.1,
        }
    }
}

/// Result type for hierarchical matrix operations
pub type Result<T> = std::result::Result<T, HMatrixError>;
