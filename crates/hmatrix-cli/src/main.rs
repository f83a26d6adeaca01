//! Build hierarchical approximations of the kernel `1 / (1 + |i - j|)`,
//! report their accuracy and compression, and persist them.
//!
//! Usage: `hmatrix --level 3 --nblocks 2 --nleaf 256 --h test --d ref`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use hmatrix::{
    lu, BasisRef, Block, Cluster, ClusterBasis, DenseBlock, HMatrixOptions, HierarchicalBlock, PartitionOptions,
    UniformBlock, DEFAULT_STORAGE_DIR,
};
use hmatrix_linalg::{mat_mul, relative_error, unpack_lu, Matrix};
use log::{info, LevelFilter, Log, Metadata, Record};

#[derive(Parser, Debug)]
#[command(name = "hmatrix", version, about = "Hierarchical matrix compression driver")]
struct Cli {
    /// Number of subdivision levels
    #[arg(long, default_value_t = 3)]
    level: usize,

    /// Branching factor per dimension
    #[arg(long, default_value_t = 2)]
    nblocks: usize,

    /// Leaf size; the dimension becomes `nleaf · nblocks^level`
    #[arg(long)]
    nleaf: Option<usize>,

    /// Dimension; overrides --nleaf with `dim / nblocks^level`
    #[arg(long)]
    dim: Option<usize>,

    /// Admissibility ratio, 0 keeps every block dense
    #[arg(long, default_value_t = 0.5)]
    admis: f64,

    /// Target rank of low-rank blocks and cluster bases
    #[arg(long, default_value_t = 16)]
    rank: usize,

    /// Name of the persisted H-matrix
    #[arg(long = "h", value_name = "NAME", default_value = "test")]
    h_name: String,

    /// Name of the persisted dense reference
    #[arg(long = "d", value_name = "NAME")]
    d_name: Option<String>,

    /// Do not build or write the H-matrix
    #[arg(long)]
    skiph: bool,

    /// Do not write the dense reference
    #[arg(long)]
    skipd: bool,

    /// Output directory of persisted matrices
    #[arg(long, default_value = DEFAULT_STORAGE_DIR)]
    out_dir: PathBuf,

    /// Also build and check the uniform (H2) form
    #[arg(long)]
    h2: bool,

    /// Factorize the built matrices and report timing and accuracy
    #[arg(long)]
    lu: bool,

    /// Log construction and factorization progress
    #[arg(short, long)]
    verbose: bool,
}

const VALUE_FLAGS: &[&str] = &[
    "--level", "--nblocks", "--nleaf", "--dim", "--admis", "--rank", "--h", "--d", "--out-dir",
];
const SWITCHES: &[&str] = &[
    "--skiph", "--skipd", "--h2", "--lu", "--verbose", "-v", "--help", "-h", "--version", "-V",
];

/// Drop arguments the driver does not know, reporting each one
fn known_args(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut raw = raw.into_iter();
    let mut kept: Vec<String> = raw.next().into_iter().collect();
    while let Some(arg) = raw.next() {
        let name = arg.split('=').next().unwrap_or_default();
        if VALUE_FLAGS.contains(&name) {
            let inline = arg.contains('=');
            kept.push(arg);
            if !inline {
                kept.extend(raw.next());
            }
        } else if SWITCHES.contains(&arg.as_str()) {
            kept.push(arg);
        } else {
            println!("Ignored arg: {arg}");
        }
    }
    kept
}

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger(verbose: bool) -> Result<()> {
    log::set_logger(&LOGGER).map_err(|e| anyhow!("failed to install logger: {e}"))?;
    log::set_max_level(if verbose { LevelFilter::Debug } else { LevelFilter::Warn });
    Ok(())
}

fn kernel(i: usize, j: usize) -> f64 {
    1.0 / (1.0 + (i as f64 - j as f64).abs())
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(known_args(std::env::args()));
    init_logger(cli.verbose)?;

    let level = u32::try_from(cli.level).context("level out of range")?;
    let groups = cli
        .nblocks
        .checked_pow(level)
        .context("nblocks^level overflows")?;
    let (nleaf, dim) = match (cli.dim, cli.nleaf) {
        (Some(dim), _) => (dim / groups.max(1), dim),
        (None, Some(nleaf)) => (nleaf, nleaf * groups),
        (None, None) => (256, 256 * groups),
    };

    println!("Running Summary: ");
    println!("level: {}", cli.level);
    println!("nblocks: {}", cli.nblocks);
    println!("nleaf: {nleaf}");
    println!("dim: {dim}");
    println!("admis: {}", cli.admis);
    println!("rank: {}", cli.rank);

    if cli.level < 1 || cli.nblocks < 1 || nleaf < 1 || cli.admis.is_nan() || cli.admis < 0.0 {
        bail!("invalid parameters: level and nblocks must be positive, the leaf size nonzero and admis nonnegative");
    }

    let partition = PartitionOptions::default()
        .with_leaf_size(nleaf)
        .with_nblocks(cli.nblocks)
        .with_depth(cli.level)
        .with_admissibility(cli.admis);
    let opts = HMatrixOptions::default().with_rank(cli.rank);
    let dense = Matrix::from_fn(dim, dim, kernel);

    if cli.h2 {
        check_uniform(&cli, &dense, &partition, &opts)?;
    }

    if !cli.skiph || cli.lu {
        info!("building the {dim}x{dim} H-matrix");
        let h = Block::Hierarchical(
            HierarchicalBlock::from_fn(&kernel, dim, dim, &partition, &opts).context("building the H-matrix")?,
        );
        println!("h Reconstruction Error: {:e}", per_entry_error(&h.to_dense()?, &dense)?);
        println!("h Storage Compression Ratio: {}", h.compression_ratio());

        if !cli.skiph {
            print!("Writing H... ");
            h.write_to_dir(&cli.out_dir, &cli.h_name)
                .with_context(|| format!("writing {} to {}", cli.h_name, cli.out_dir.display()))?;
            println!("Done.");
        }
        if cli.lu {
            report_lu("h", h, &dense, &opts)?;
        }
    }

    if let Some(name) = cli.d_name.as_deref().filter(|_| !cli.skipd) {
        print!("Writing D... ");
        Block::Dense(DenseBlock::new(dense))
            .write_to_dir(&cli.out_dir, name)
            .with_context(|| format!("writing {} to {}", name, cli.out_dir.display()))?;
        println!("Done.");
    }
    Ok(())
}

fn per_entry_error(approx: &Matrix, exact: &Matrix) -> Result<f64> {
    let n = (exact.nrows() * exact.ncols()).max(1) as f64;
    Ok(approx.minus(exact)?.norm_f() / n)
}

fn check_uniform(cli: &Cli, dense: &Matrix, partition: &PartitionOptions, opts: &HMatrixOptions) -> Result<()> {
    let dim = dense.nrows();
    info!("building the {dim}x{dim} H2-matrix");
    let h2 = UniformBlock::from_fn(&kernel, dim, dim, partition, opts).context("building the H2-matrix")?;
    println!("h2 Reconstruction Error: {:e}", per_entry_error(&h2.to_dense()?, dense)?);
    println!(
        "h2 Storage Compression Ratio: {}",
        Block::Uniform(h2.clone()).compression_ratio()
    );

    // A far corner block projected onto stand-alone bases of its clusters
    if dim >= 128 {
        let sub = partition.with_leaf_size(32).with_nblocks(2);
        let transposed = |i: usize, j: usize| kernel(j, i);
        let rows = ClusterBasis::from_fn(&kernel, Cluster::new(dim - 64, 64), dim, &sub, opts)?;
        let cols = ClusterBasis::from_fn(&transposed, Cluster::new(0, 64), dim, &sub, opts)?;
        let corner = DenseBlock::from_fn(&kernel, dim - 64, 0, 64, 64);
        let lr = corner.to_low_rank_from_bases(&BasisRef::root(Arc::new(rows)), &BasisRef::root(Arc::new(cols)))?;
        println!("Basis Projection Error: {:e}", per_entry_error(&lr.to_dense()?, corner.matrix())?);
    }

    let lr = h2.to_low_rank(opts)?;
    println!("h2 Low-Rank Conversion Error: {:e}", per_entry_error(&lr.to_dense()?, &h2.to_dense()?)?);

    let mut twice = h2.clone();
    twice.add_uniform(&h2, opts)?;
    let mut expected = h2.to_dense()?;
    expected.scale_in_place(2.0);
    println!("h2 Addition Error: {:e}", per_entry_error(&twice.to_dense()?, &expected)?);

    if cli.lu {
        report_lu("h2", Block::Uniform(h2), dense, opts)?;
    }
    Ok(())
}

fn report_lu(label: &str, mut block: Block, dense: &Matrix, opts: &HMatrixOptions) -> Result<()> {
    info!("factorizing the {label} matrix");
    let start = Instant::now();
    lu(&mut block, opts).with_context(|| format!("{label} LU"))?;
    println!("{label} LU Time: {:.3} s", start.elapsed().as_secs_f64());

    let (l, u) = unpack_lu(&block.to_dense()?);
    let err = relative_error(&mat_mul(&l, &u)?, dense)?;
    println!("{label} LU Factorization Error: {err:e}");
    Ok(())
}
