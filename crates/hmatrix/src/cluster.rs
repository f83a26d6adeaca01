//! Index clusters and the admissibility predicate

use std::ops::Range;

/// Contiguous index range `start..start + dim`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cluster {
    pub start: usize,
    pub dim: usize,
}

impl Cluster {
    pub fn new(start: usize, dim: usize) -> Self {
        Self { start, dim }
    }

    pub fn end(&self) -> usize {
        self.start + self.dim
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Geometric center `start + dim / 2`
    pub fn center(&self) -> f64 {
        self.start as f64 + self.dim as f64 / 2.0
    }

    pub fn half_width(&self) -> f64 {
        self.dim as f64 / 2.0
    }

    /// Split into `parts` contiguous near-equal sub-clusters.
    ///
    /// The number of parts is capped at `dim`; the first clusters take the
    /// remainder.
    pub fn split(&self, parts: usize) -> Vec<Cluster> {
        let mut start = self.start;
        split_sizes(self.dim, parts)
            .into_iter()
            .map(|dim| {
                let c = Cluster::new(start, dim);
                start += dim;
                c
            })
            .collect()
    }

    /// True if `other` lies inside `self`
    pub fn contains(&self, other: &Cluster) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

/// Sizes of `parts` near-equal groups covering `n`, remainder first
pub fn split_sizes(n: usize, parts: usize) -> Vec<usize> {
    let parts = parts.min(n).max(1);
    let base = n / parts;
    let rem = n % parts;
    (0..parts).map(|i| base + usize::from(i < rem)).collect()
}

/// Prefix sums `[0, s0, s0 + s1, ...]`
pub(crate) fn offsets(sizes: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(sizes.len() + 1);
    let mut acc = 0;
    out.push(0);
    for s in sizes {
        acc += s;
        out.push(acc);
    }
    out
}

/// Admissibility of the block `row × col`.
///
/// The block is admissible when the clusters are apart
/// (`dist > 0`) and `ratio · dist ≥ max(half widths)`, `dist` being the
/// distance between the centers.
pub fn is_admissible(row: &Cluster, col: &Cluster, ratio: f64) -> bool {
    let dist = (row.center() - col.center()).abs();
    dist > 0.0 && ratio * dist >= row.half_width().max(col.half_width())
}
