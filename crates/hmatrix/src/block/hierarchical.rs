//! Recursively subdivided blocks

use std::ops::Range;

use crate::block::{Block, DenseBlock};
use crate::cluster::offsets;
use crate::error::{HMatrixError, Result};

/// Exclusively owned `m × n` grid of blocks.
///
/// Every block of a row group has the same row extent and every block of a
/// column group the same column extent.
#[derive(Debug, Clone)]
pub struct HierarchicalBlock {
    grid_rows: usize,
    grid_cols: usize,
    row_offsets: Vec<usize>,
    col_offsets: Vec<usize>,
    children: Vec<Block>,
}

impl HierarchicalBlock {
    /// Build from row-major children, checking the grid is not ragged
    pub fn from_grid(grid_rows: usize, grid_cols: usize, children: Vec<Block>) -> Result<Self> {
        if grid_rows == 0 || grid_cols == 0 || children.len() != grid_rows * grid_cols {
            return Err(HMatrixError::RaggedGrid {
                message: format!(
                    "{} children cannot fill a {}x{} grid",
                    children.len(),
                    grid_rows,
                    grid_cols
                ),
            });
        }

        let row_sizes: Vec<usize> = (0..grid_rows)
            .map(|i| children[i * grid_cols].nrows())
            .collect();
        let col_sizes: Vec<usize> = (0..grid_cols).map(|j| children[j].ncols()).collect();

        for (idx, child) in children.iter().enumerate() {
            let (i, j) = (idx / grid_cols, idx % grid_cols);
            if child.nrows() != row_sizes[i] || child.ncols() != col_sizes[j] {
                return Err(HMatrixError::RaggedGrid {
                    message: format!(
                        "child ({}, {}) is {}x{}, expected {}x{}",
                        i,
                        j,
                        child.nrows(),
                        child.ncols(),
                        row_sizes[i],
                        col_sizes[j]
                    ),
                });
            }
        }

        Ok(Self {
            grid_rows,
            grid_cols,
            row_offsets: offsets(&row_sizes),
            col_offsets: offsets(&col_sizes),
            children,
        })
    }

    /// Grid of zeroed dense leaves with the given group sizes
    pub fn zeros(row_sizes: &[usize], col_sizes: &[usize]) -> Result<Self> {
        let children = row_sizes
            .iter()
            .flat_map(|&r| col_sizes.iter().map(move |&c| Block::Dense(DenseBlock::zeros(r, c))))
            .collect();
        Self::from_grid(row_sizes.len(), col_sizes.len(), children)
    }

    pub fn nrows(&self) -> usize {
        self.row_offsets[self.grid_rows]
    }

    pub fn ncols(&self) -> usize {
        self.col_offsets[self.grid_cols]
    }

    /// `(m, n)` of the child grid
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.grid_rows, self.grid_cols)
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

    pub fn get(&self, i: usize, j: usize) -> Result<&Block> {
        let idx = self.index(i, j)?;
        Ok(&self.children[idx])
    }

    pub fn get_mut(&mut self, i: usize, j: usize) -> Result<&mut Block> {
        let idx = self.index(i, j)?;
        Ok(&mut self.children[idx])
    }

    /// Replace child `(i, j)`, returning the old one.
    ///
    /// The new child must have the extent of the slot.
    pub fn replace(&mut self, i: usize, j: usize, block: Block) -> Result<Block> {
        let idx = self.index(i, j)?;
        let expected = (self.row_range(i).len(), self.col_range(j).len());
        if (block.nrows(), block.ncols()) != expected {
            return Err(HMatrixError::dimension(
                "replace_child",
                expected,
                (block.nrows(), block.ncols()),
            ));
        }
        Ok(std::mem::replace(&mut self.children[idx], block))
    }

    pub fn children(&self) -> impl Iterator<Item = &Block> {
        self.children.iter()
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.children.iter_mut()
    }

    /// Child `(i, j)` taken out, leaving an empty placeholder.
    ///
    /// Must be paired with [`Self::put`].
    pub(crate) fn take(&mut self, i: usize, j: usize) -> Result<Block> {
        let idx = self.index(i, j)?;
        Ok(std::mem::replace(
            &mut self.children[idx],
            Block::Dense(DenseBlock::zeros(0, 0)),
        ))
    }

    pub(crate) fn put(&mut self, i: usize, j: usize, block: Block) -> Result<()> {
        let idx = self.index(i, j)?;
        self.children[idx] = block;
        Ok(())
    }

    /// Indices `i0..i1` whose row groups exactly cover `range`
    pub(crate) fn aligned_rows(&self, range: &Range<usize>) -> Option<Range<usize>> {
        aligned(&self.row_offsets, range)
    }

    pub(crate) fn aligned_cols(&self, range: &Range<usize>) -> Option<Range<usize>> {
        aligned(&self.col_offsets, range)
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

pub(crate) fn aligned(offsets: &[usize], range: &Range<usize>) -> Option<Range<usize>> {
    let i0 = offsets.iter().position(|&o| o == range.start)?;
    let i1 = offsets.iter().position(|&o| o == range.end)?;
    (i1 > i0).then_some(i0..i1)
}

/// Slot-by-slot assembly of a [`HierarchicalBlock`].
///
/// Out-of-range assignment and unassigned slots are reported instead of
/// being silently ignored.
#[derive(Debug)]
pub struct HierarchicalBuilder {
    grid_rows: usize,
    grid_cols: usize,
    slots: Vec<Option<Block>>,
}

impl HierarchicalBuilder {
    pub fn new(grid_rows: usize, grid_cols: usize) -> Self {
        Self {
            grid_rows,
            grid_cols,
            slots: (0..grid_rows * grid_cols).map(|_| None).collect(),
        }
    }

    pub fn set(&mut self, i: usize, j: usize, block: Block) -> Result<()> {
        if i >= self.grid_rows || j >= self.grid_cols {
            return Err(HMatrixError::IndexOutOfBounds {
                row: i,
                col: j,
                nrows: self.grid_rows,
                ncols: self.grid_cols,
            });
        }
        self.slots[i * self.grid_cols + j] = Some(block);
        Ok(())
    }

    pub fn build(self) -> Result<HierarchicalBlock> {
        let grid_cols = self.grid_cols;
        let children = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.ok_or(HMatrixError::UnsetChild {
                    row: idx / grid_cols,
                    col: idx % grid_cols,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        HierarchicalBlock::from_grid(self.grid_rows, grid_cols, children)
    }
}
