//! Immutable configuration values passed to construction and arithmetic

use hmatrix_linalg::TruncateOptions;

use crate::error::{HMatrixError, Result};

/// Numeric options shared by every algorithm entry point.
///
/// `rtol` drives low-rank truncation, `eq_tol` drives equality checks and
/// the decision whether a deferred update is captured by a shared basis.
/// The two are independent.
#[derive(Debug, Clone, Copy)]
pub struct HMatrixOptions {
    /// Target (maximum) rank of low-rank blocks and cluster bases
    pub rank: usize,
    /// Relative Frobenius tolerance for truncation
    pub rtol: f64,
    /// Tolerance for `‖A − B‖_F / (rows · cols)` comparisons
    pub eq_tol: f64,
    /// Maximum number of far-field columns sampled per cluster basis
    pub sample_limit: usize,
}

impl Default for HMatrixOptions {
    fn default() -> Self {
        Self {
            rank: 16,
            rtol: 1e-10,
            eq_tol: 1e-10,
            sample_limit: 512,
        }
    }
}

impl HMatrixOptions {
    /// Set the target rank.
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    /// Set the truncation tolerance.
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    /// Set the equality tolerance.
    pub fn with_eq_tol(mut self, eq_tol: f64) -> Self {
        self.eq_tol = eq_tol;
        self
    }

    /// Set the basis sample limit.
    pub fn with_sample_limit(mut self, sample_limit: usize) -> Self {
        self.sample_limit = sample_limit;
        self
    }

    /// Truncation options for the dense primitives
    pub fn truncation(&self) -> TruncateOptions {
        TruncateOptions::default()
            .with_max_rank(self.rank)
            .with_rtol(self.rtol)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(HMatrixError::Configuration(
                "target rank must be positive".to_string(),
            ));
        }
        if self.rtol.is_nan() || self.rtol < 0.0 || self.eq_tol.is_nan() || self.eq_tol < 0.0 {
            return Err(HMatrixError::Configuration(format!(
                "tolerances must be nonnegative (rtol = {}, eq_tol = {})",
                self.rtol, self.eq_tol
            )));
        }
        if self.sample_limit == 0 {
            return Err(HMatrixError::Configuration(
                "sample limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a square index range is recursively partitioned.
///
/// Recursion stops when both extents fit in `leaf_size` or after `depth`
/// levels below the root, whichever comes first.
#[derive(Debug, Clone, Copy)]
pub struct PartitionOptions {
    /// Largest extent stored as a dense leaf
    pub leaf_size: usize,
    /// Branching factor per dimension
    pub nblocks: usize,
    /// Number of subdivision levels below the root
    pub depth: usize,
    /// Admissibility ratio; 0 rejects every block
    pub admissibility: f64,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            leaf_size: 256,
            nblocks: 2,
            depth: 3,
            admissibility: 0.5,
        }
    }
}

impl PartitionOptions {
    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    pub fn with_nblocks(mut self, nblocks: usize) -> Self {
        self.nblocks = nblocks;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_admissibility(mut self, admissibility: f64) -> Self {
        self.admissibility = admissibility;
        self
    }

    /// Depth-driven dimension `leaf_size · nblocks^depth`
    pub fn dimension(&self) -> usize {
        let depth = u32::try_from(self.depth).unwrap_or(u32::MAX);
        self.nblocks
            .checked_pow(depth)
            .and_then(|p| p.checked_mul(self.leaf_size))
            .unwrap_or(usize::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.leaf_size == 0 {
            return Err(HMatrixError::Configuration(
                "leaf size must be positive".to_string(),
            ));
        }
        if self.nblocks == 0 {
            return Err(HMatrixError::Configuration(
                "branching factor must be positive".to_string(),
            ));
        }
        if self.depth == 0 {
            return Err(HMatrixError::Configuration(
                "depth must be positive".to_string(),
            ));
        }
        if self.admissibility.is_nan() || self.admissibility < 0.0 {
            return Err(HMatrixError::Configuration(format!(
                "admissibility ratio must be nonnegative, got {}",
                self.admissibility
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_from_depth() {
        let p = PartitionOptions::default()
            .with_leaf_size(128)
            .with_nblocks(2)
            .with_depth(2);
        assert_eq!(p.dimension(), 512);
    }

    #[test]
    fn test_partition_validation() {
        assert!(PartitionOptions::default().validate().is_ok());
        assert!(PartitionOptions::default()
            .with_leaf_size(0)
            .validate()
            .is_err());
        assert!(PartitionOptions::default().with_depth(0).validate().is_err());
        assert!(PartitionOptions::default()
            .with_admissibility(-0.5)
            .validate()
            .is_err());
        assert!(PartitionOptions::default()
            .with_admissibility(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_options_validation() {
        assert!(HMatrixOptions::default().validate().is_ok());
        assert!(HMatrixOptions::default().with_rank(0).validate().is_err());
        assert!(HMatrixOptions::default().with_rtol(-1.0).validate().is_err());

        let t = HMatrixOptions::default().with_rank(7).truncation();
        assert_eq!(t.max_rank, 7);
        assert_eq!(t.rtol, 1e-10);
    }
}
