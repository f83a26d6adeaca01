use hmatrix::{
    gemm, hadamard, lu, solve, solve_right_upper, Block, DenseBlock, HMatrixOptions, HierarchicalBlock,
    LowRankBlock, PartitionOptions,
};
use hmatrix_linalg::{mat_mul, unpack_lu, Matrix};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn kernel(i: usize, j: usize) -> f64 {
    1.0 / (1.0 + (i as f64 - j as f64).abs())
}

fn random_matrix(nrows: usize, ncols: usize, seed: u64) -> Matrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Matrix::from_fn(nrows, ncols, |_, _| rng.random::<f64>() - 0.5)
}

fn relative(a: &Matrix, b: &Matrix) -> f64 {
    a.minus(b).unwrap().norm_f() / b.norm_f()
}

#[test]
fn test_gemm_random_dense() {
    let opts = HMatrixOptions::default();
    let (a, b) = (random_matrix(12, 7, 1), random_matrix(7, 9, 2));
    let mut c = Block::Dense(DenseBlock::zeros(12, 9));

    gemm(
        1.0,
        &Block::Dense(DenseBlock::new(a.clone())),
        &Block::Dense(DenseBlock::new(b.clone())),
        0.0,
        &mut c,
        &opts,
    )
    .unwrap();

    assert!(relative(&c.to_dense().unwrap(), &mat_mul(&a, &b).unwrap()) < 1e-14);
}

#[test]
fn test_gemm_mixed_operands_into_grid() {
    let opts = HMatrixOptions::default();
    let a0 = random_matrix(16, 16, 3);
    let c0 = random_matrix(16, 16, 5);
    let a = Block::Dense(DenseBlock::new(a0.clone())).into_hierarchical(2, 2).unwrap();
    let b = Block::LowRank(LowRankBlock::new(random_matrix(16, 3, 6), random_matrix(16, 3, 7)).unwrap());
    let mut c = Block::Dense(DenseBlock::new(c0.clone())).into_hierarchical(4, 4).unwrap();

    gemm(-1.0, &a, &b, 2.0, &mut c, &opts).unwrap();

    let mut expected = mat_mul(&a0, &b.to_dense().unwrap()).unwrap();
    expected.scale_in_place(-1.0);
    expected.axpy(2.0, &c0).unwrap();
    assert!(relative(&c.to_dense().unwrap(), &expected) < 1e-12);
}

#[test]
fn test_hadamard_grid_and_low_rank() {
    let opts = HMatrixOptions::default();
    let x = random_matrix(8, 8, 8);
    let a = Block::Dense(DenseBlock::new(x.clone())).into_hierarchical(2, 2).unwrap();
    let b = Block::LowRank(LowRankBlock::new(random_matrix(8, 2, 9), random_matrix(8, 2, 10)).unwrap());

    let h = hadamard(&a, &b, &opts).unwrap();
    let expected = x.hadamard(&b.to_dense().unwrap()).unwrap();
    assert!(relative(&h.to_dense().unwrap(), &expected) < 1e-12);
}

#[test]
fn test_compression_ratio() {
    let opts = HMatrixOptions::default();
    let partition = PartitionOptions::default().with_leaf_size(128).with_admissibility(0.5);
    let h = Block::Hierarchical(HierarchicalBlock::from_fn(&kernel, 512, 512, &partition, &opts).unwrap());
    let ratio = h.compression_ratio();
    assert!(ratio > 0.0 && ratio < 0.5, "ratio {ratio}");

    let rejected = partition.with_admissibility(0.0);
    let d = Block::Hierarchical(HierarchicalBlock::from_fn(&kernel, 512, 512, &rejected, &opts).unwrap());
    assert_eq!(d.compression_ratio(), 1.0);
}

#[test]
fn test_hierarchical_lu_accuracy() {
    let opts = HMatrixOptions::default().with_rank(32);
    let partition = PartitionOptions::default()
        .with_leaf_size(128)
        .with_nblocks(2)
        .with_depth(2)
        .with_admissibility(0.5);
    let n = partition.dimension();
    assert_eq!(n, 512);

    let mut a = Block::Hierarchical(HierarchicalBlock::from_fn(&kernel, n, n, &partition, &opts).unwrap());
    lu(&mut a, &opts).unwrap();

    let (l, u) = unpack_lu(&a.to_dense().unwrap());
    let dense = Matrix::from_fn(n, n, kernel);
    let err = relative(&mat_mul(&l, &u).unwrap(), &dense);
    assert!(err < 1e-6, "relative factorization error {err}");
}

fn factored(n: usize, opts: &HMatrixOptions) -> Block {
    let partition = PartitionOptions::default().with_leaf_size(32).with_depth(2);
    let mut a = Block::Hierarchical(HierarchicalBlock::from_fn(&kernel, n, n, &partition, opts).unwrap());
    lu(&mut a, opts).unwrap();
    a
}

#[test]
fn test_solve_residual_dense_rhs() {
    let opts = HMatrixOptions::default().with_rank(32);
    let n = 128;
    let f = factored(n, &opts);
    let b0 = random_matrix(n, 4, 11);
    let mut x = Block::Dense(DenseBlock::new(b0.clone()));

    solve(&f, &mut x, false, &opts).unwrap();
    solve(&f, &mut x, true, &opts).unwrap();

    let a = Matrix::from_fn(n, n, kernel);
    let residual = relative(&mat_mul(&a, &x.to_dense().unwrap()).unwrap(), &b0);
    assert!(residual < 1e-6, "residual {residual}");
}

#[test]
fn test_solve_hierarchical_rhs_against_factors() {
    let opts = HMatrixOptions::default().with_rank(32);
    let n = 128;
    let f = factored(n, &opts);
    let (l, u) = unpack_lu(&f.to_dense().unwrap());
    let b0 = random_matrix(n, n, 12);

    let mut x = Block::Dense(DenseBlock::new(b0.clone())).into_hierarchical(4, 2).unwrap();
    solve(&f, &mut x, false, &opts).unwrap();
    assert!(relative(&mat_mul(&l, &x.to_dense().unwrap()).unwrap(), &b0) < 1e-10);

    let mut y = Block::Dense(DenseBlock::new(b0.clone())).into_hierarchical(2, 4).unwrap();
    solve_right_upper(&f, &mut y, &opts).unwrap();
    assert!(relative(&mat_mul(&y.to_dense().unwrap(), &u).unwrap(), &b0) < 1e-10);
}

#[test]
fn test_lu_of_low_rank_is_rejected() {
    let opts = HMatrixOptions::default();
    let mut b = Block::LowRank(LowRankBlock::zeros(4, 4));
    assert!(matches!(
        lu(&mut b, &opts),
        Err(hmatrix::HMatrixError::UnsupportedOperand { .. })
    ));
}
