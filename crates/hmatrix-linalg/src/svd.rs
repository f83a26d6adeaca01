//! Thin and truncated SVD on top of faer

use crate::backend::{from_faer, mat_mul, mat_mul_nt, view};
use crate::error::{LinalgError, Result};
use crate::matrix::Matrix;
use crate::qr::qr;

/// Options controlling rank truncation.
///
/// The retained rank `k` is the smallest one for which the discarded tail
/// satisfies `sqrt(Σ_{i≥k} σ_i²) ≤ rtol · ‖σ‖₂`, capped at `max_rank`.
#[derive(Debug, Clone, Copy)]
pub struct TruncateOptions {
    /// Maximum retained rank
    pub max_rank: usize,
    /// Relative Frobenius tolerance
    pub rtol: f64,
}

impl Default for TruncateOptions {
    fn default() -> Self {
        Self {
            max_rank: usize::MAX,
            rtol: 1e-10,
        }
    }
}

impl TruncateOptions {
    /// Set the maximum rank.
    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = max_rank;
        self
    }

    /// Set the relative tolerance.
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }
}

/// Thin SVD `A = U · diag(s) · Vᵗ` with `U (m×k)`, `V (n×k)`, `k = min(m, n)`.
///
/// Singular values are nonnegative and sorted in nonincreasing order.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    pub u: Matrix,
    pub s: Vec<f64>,
    pub v: Matrix,
}

/// Compute the thin SVD of `a`.
///
/// # Errors
/// Returns `LinalgError::SvdNoConvergence` if the backend fails to converge.
pub fn svd(a: &Matrix) -> Result<ThinSvd> {
    let k = a.nrows().min(a.ncols());
    if k == 0 {
        return Ok(ThinSvd {
            u: Matrix::zeros(a.nrows(), 0),
            s: Vec::new(),
            v: Matrix::zeros(a.ncols(), 0),
        });
    }

    let decomp = view(a)
        .thin_svd()
        .map_err(|e| LinalgError::SvdNoConvergence(format!("{e:?}")))?;

    let u = from_faer(&decomp.U().to_owned());
    let v = from_faer(&decomp.V().to_owned());
    let diag = decomp.S().column_vector();
    let s = (0..k).map(|i| diag[i]).collect();

    Ok(ThinSvd { u, s, v })
}

/// Retained rank for singular values `s` under `opts`
pub fn retained_rank(s: &[f64], opts: &TruncateOptions) -> usize {
    let total: f64 = s.iter().map(|x| x * x).sum();
    if total == 0.0 {
        return 0;
    }
    let budget = opts.rtol * opts.rtol * total;

    // Walk from the tail, dropping values while the discarded energy fits.
    let mut tail = 0.0;
    let mut k = s.len();
    while k > 0 {
        let next = tail + s[k - 1] * s[k - 1];
        if next > budget {
            break;
        }
        tail = next;
        k -= 1;
    }
    k.min(opts.max_rank)
}

/// Truncated factorization `A ≈ L · Rᵗ` with `L = U·diag(s)` (m×k) and
/// `R = V` (n×k).
pub fn truncated_svd(a: &Matrix, opts: &TruncateOptions) -> Result<(Matrix, Matrix)> {
    let ThinSvd { u, s, v } = svd(a)?;
    let k = retained_rank(&s, opts);
    let mut left = u.columns(0..k);
    for i in 0..left.nrows() {
        for (j, sj) in s.iter().take(k).enumerate() {
            left[[i, j]] *= sj;
        }
    }
    Ok((left, v.columns(0..k)))
}

/// Recompress a low-rank product `U · Vᵗ` to the truncation in `opts`.
///
/// Uses `U = Q_u R_u`, `V = Q_v R_v` and the SVD of the small core
/// `R_u R_vᵗ`, so the cost is linear in the outer dimensions.
pub fn recompress(u: &Matrix, v: &Matrix, opts: &TruncateOptions) -> Result<(Matrix, Matrix)> {
    if u.ncols() != v.ncols() {
        return Err(LinalgError::DimensionMismatch {
            op: "recompress",
            lhs_rows: u.nrows(),
            lhs_cols: u.ncols(),
            rhs_rows: v.nrows(),
            rhs_cols: v.ncols(),
        });
    }
    let r = u.ncols();
    if r == 0 {
        return Ok((u.clone(), v.clone()));
    }
    if r >= u.nrows().min(v.nrows()) {
        return truncated_svd(&mat_mul_nt(u, v)?, opts);
    }

    let (qu, ru) = qr(u)?;
    let (qv, rv) = qr(v)?;
    let core = mat_mul_nt(&ru, &rv)?;
    let (cl, cr) = truncated_svd(&core, opts)?;
    Ok((mat_mul(&qu, &cl)?, mat_mul(&qv, &cr)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retained_rank_tail_energy() {
        let s = [10.0, 1.0, 1e-6, 1e-9];
        let opts = TruncateOptions::default().with_rtol(1e-4);
        assert_eq!(retained_rank(&s, &opts), 2);

        let opts = TruncateOptions::default().with_rtol(0.0);
        assert_eq!(retained_rank(&s, &opts), 4);

        let opts = TruncateOptions::default().with_rtol(0.0).with_max_rank(3);
        assert_eq!(retained_rank(&s, &opts), 3);

        assert_eq!(retained_rank(&[0.0, 0.0], &TruncateOptions::default()), 0);
    }

    #[test]
    fn test_svd_diagonal() {
        let a = Matrix::from_rows(vec![vec![3.0, 0.0], vec![0.0, -4.0], vec![0.0, 0.0]]);
        let d = svd(&a).unwrap();
        assert_eq!(d.u.shape(), (3, 2));
        assert_eq!(d.v.shape(), (2, 2));
        assert!((d.s[0] - 4.0).abs() < 1e-12);
        assert!((d.s[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_truncated_rank_one() {
        let a = Matrix::from_fn(6, 4, |i, j| (i + 1) as f64 * (j as f64 - 1.5));
        let (l, r) = truncated_svd(&a, &TruncateOptions::default()).unwrap();
        assert_eq!(l.ncols(), 1);
        let back = mat_mul_nt(&l, &r).unwrap();
        assert!(back.minus(&a).unwrap().norm_f() < 1e-10 * a.norm_f());
    }

    #[test]
    fn test_recompress_duplicated_factors() {
        let u = Matrix::from_fn(20, 2, |i, j| ((i * (j + 1)) as f64).sin());
        let v = Matrix::from_fn(15, 2, |i, j| ((i + j) as f64).cos());
        let uu = Matrix::hcat(&[&u, &u]).unwrap();
        let vv = Matrix::hcat(&[&v, &v]).unwrap();

        let (cu, cv) = recompress(&uu, &vv, &TruncateOptions::default()).unwrap();
        assert_eq!(cu.ncols(), 2);
        let expected = mat_mul_nt(&uu, &vv).unwrap();
        let got = mat_mul_nt(&cu, &cv).unwrap();
        assert!(got.minus(&expected).unwrap().norm_f() < 1e-9 * expected.norm_f());
    }
}
