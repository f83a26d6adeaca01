//! Persistence of blocks as `<name>.struct` / `<name>.bin` pairs

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::block::{Block, HierarchicalBlock};
use crate::codec::parse_structure;
use crate::error::Result;

/// Directory the command-line driver writes into unless told otherwise
pub const DEFAULT_STORAGE_DIR: &str = "bin";

fn paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (dir.join(format!("{name}.struct")), dir.join(format!("{name}.bin")))
}

/// Write `block` as `dir/<name>.struct` and `dir/<name>.bin`, creating `dir`
/// if needed
pub fn write_to_dir(block: &Block, dir: impl AsRef<Path>, name: &str) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let (struct_path, bin_path) = paths(dir, name);

    fs::write(&struct_path, block.structure()?)?;
    let mut w = BufWriter::new(File::create(&bin_path)?);
    block.write_binary(&mut w)?;
    w.flush()?;
    debug!("wrote {} and {}", struct_path.display(), bin_path.display());
    Ok(())
}

/// Read a block written by [`write_to_dir`]
pub fn read_from_dir(dir: impl AsRef<Path>, name: &str) -> Result<Block> {
    let (struct_path, bin_path) = paths(dir.as_ref(), name);
    let mut block = parse_structure(&fs::read_to_string(&struct_path)?)?;
    let mut r = BufReader::new(File::open(&bin_path)?);
    block.load_binary(&mut r)?;
    Ok(block)
}

impl Block {
    /// See [`write_to_dir`]
    pub fn write_to_dir(&self, dir: impl AsRef<Path>, name: &str) -> Result<()> {
        write_to_dir(self, dir, name)
    }

    /// See [`read_from_dir`]
    pub fn read_from_dir(dir: impl AsRef<Path>, name: &str) -> Result<Block> {
        read_from_dir(dir, name)
    }
}

impl HierarchicalBlock {
    /// Read a persisted block as a grid; a leaf root becomes a 1×1 grid
    pub fn read_from_dir(dir: impl AsRef<Path>, name: &str) -> Result<HierarchicalBlock> {
        match read_from_dir(dir, name)? {
            Block::Hierarchical(h) => Ok(h),
            leaf => HierarchicalBlock::from_grid(1, 1, vec![leaf]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DenseBlock;
    use hmatrix_linalg::Matrix;

    #[test]
    fn test_leaf_root_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let block = Block::Dense(DenseBlock::new(Matrix::from_fn(3, 2, |i, j| (i * 2 + j) as f64)));
        block.write_to_dir(dir.path(), "leaf").unwrap();

        let h = HierarchicalBlock::read_from_dir(dir.path(), "leaf").unwrap();
        assert_eq!(h.grid_shape(), (1, 1));
        assert_eq!(h.get(0, 0).unwrap().to_dense().unwrap(), block.to_dense().unwrap());
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_from_dir(dir.path(), "absent"),
            Err(crate::error::HMatrixError::Io(_))
        ));
    }

    #[test]
    fn test_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out").join(DEFAULT_STORAGE_DIR);
        Block::Dense(DenseBlock::zeros(2, 2)).write_to_dir(&nested, "z").unwrap();
        assert!(nested.join("z.struct").exists());
        assert!(nested.join("z.bin").exists());
    }
}
