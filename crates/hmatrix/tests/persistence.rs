use hmatrix::{
    parse_structure, read_from_dir, Block, BlockKind, DenseBlock, HMatrixOptions, HierarchicalBlock, PartitionOptions,
    UniformBlock,
};
use hmatrix_linalg::Matrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn kernel(i: usize, j: usize) -> f64 {
    1.0 / (1.0 + (i as f64 - j as f64).abs())
}

#[test]
fn test_hierarchical_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let partition = PartitionOptions::default().with_leaf_size(16).with_depth(3);
    let opts = HMatrixOptions::default();
    let h = Block::Hierarchical(HierarchicalBlock::from_fn(&kernel, 128, 96, &partition, &opts).unwrap());

    h.write_to_dir(dir.path(), "kernel").unwrap();
    let back = Block::read_from_dir(dir.path(), "kernel").unwrap();

    assert!(back.approx_eq(&h, 1e-10));
    assert_eq!(back.structure().unwrap(), h.structure().unwrap());
}

#[test]
fn test_uniform_round_trip_as_hierarchical() {
    let dir = tempfile::tempdir().unwrap();
    let partition = PartitionOptions::default().with_leaf_size(16).with_depth(3);
    let opts = HMatrixOptions::default();
    let u = Block::Uniform(UniformBlock::from_fn(&kernel, 64, 64, &partition, &opts).unwrap());

    u.write_to_dir(dir.path(), "h2").unwrap();
    let back = read_from_dir(dir.path(), "h2").unwrap();

    assert_eq!(back.kind(), BlockKind::Hierarchical);
    assert!(back.approx_eq(&u, 1e-10));
    let text = std::fs::read_to_string(dir.path().join("h2.struct")).unwrap();
    assert!(text.starts_with("H 2 2\n"));
    assert!(text.contains("LR 32 32 "));
}

#[test]
fn test_random_dense_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let m = Matrix::from_fn(10, 13, |_, _| rng.random::<f64>());
    let block = Block::Dense(DenseBlock::new(m)).into_hierarchical(3, 2).unwrap();

    block.write_to_dir(dir.path(), "dense").unwrap();
    let bin = std::fs::metadata(dir.path().join("dense.bin")).unwrap();
    assert_eq!(bin.len(), (10 * 13 * 8) as u64);

    let back = read_from_dir(dir.path(), "dense").unwrap();
    assert_eq!(back.to_dense().unwrap(), block.to_dense().unwrap());
}

#[test]
fn test_parse_zero_grid() {
    let block = parse_structure("H 2 2\nD 4 4\nD 4 4\nD 4 4\nD 4 4\n").unwrap();
    let Block::Hierarchical(h) = &block else {
        panic!("expected a grid, got {:?}", block.kind());
    };
    assert_eq!(h.grid_shape(), (2, 2));
    for child in h.children() {
        assert_eq!(child.kind(), BlockKind::Dense);
        assert_eq!(child.shape(), (4, 4));
    }
    assert_eq!(block.to_dense().unwrap(), Matrix::zeros(8, 8));
}

#[test]
fn test_into_hierarchical_preserves_values() {
    let m = Matrix::from_fn(9, 7, |i, j| (i * 7 + j) as f64);
    let block = Block::Dense(DenseBlock::new(m.clone()));
    let grid = block.into_hierarchical(4, 3).unwrap();
    assert_eq!(grid.grid_sizes().unwrap(), (vec![3, 2, 2, 2], vec![3, 2, 2]));
    assert_eq!(grid.to_dense().unwrap(), m);

    let same = grid.clone().into_hierarchical(4, 3).unwrap();
    assert_eq!(same.structure().unwrap(), grid.structure().unwrap());

    assert!(matches!(
        Block::Dense(DenseBlock::new(m)).into_hierarchical(0, 2),
        Err(hmatrix::HMatrixError::Dimension { .. })
    ));
}
