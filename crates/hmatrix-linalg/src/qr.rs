//! Thin QR decomposition on top of faer

use crate::backend::{from_faer, view};
use crate::error::Result;
use crate::matrix::Matrix;

/// Compute the thin QR decomposition `A = Q · R`.
///
/// For `A (m×n)` returns `Q (m×k)` with orthonormal columns and upper
/// trapezoidal `R (k×n)`, `k = min(m, n)`.
pub fn qr(a: &Matrix) -> Result<(Matrix, Matrix)> {
    let k = a.nrows().min(a.ncols());
    if k == 0 {
        return Ok((Matrix::zeros(a.nrows(), 0), Matrix::zeros(0, a.ncols())));
    }

    let decomp = view(a).qr();
    let q = from_faer(&decomp.compute_thin_Q());
    let r = from_faer(&decomp.thin_R().to_owned());
    Ok((q, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{mat_mul, mat_mul_tn};

    #[test]
    fn test_qr_reconstructs() {
        let a = Matrix::from_fn(7, 3, |i, j| 1.0 / (1.0 + i as f64 + 2.0 * j as f64));
        let (q, r) = qr(&a).unwrap();
        assert_eq!(q.shape(), (7, 3));
        assert_eq!(r.shape(), (3, 3));

        let back = mat_mul(&q, &r).unwrap();
        assert!(back.minus(&a).unwrap().norm_f() < 1e-12);

        let qtq = mat_mul_tn(&q, &q).unwrap();
        assert!(qtq.minus(&Matrix::identity(3)).unwrap().norm_f() < 1e-12);

        for i in 1..3 {
            for j in 0..i {
                assert!(r[[i, j]].abs() < 1e-14);
            }
        }
    }

    #[test]
    fn test_qr_wide() {
        let a = Matrix::from_fn(2, 5, |i, j| (i + j) as f64);
        let (q, r) = qr(&a).unwrap();
        assert_eq!(q.shape(), (2, 2));
        assert_eq!(r.shape(), (2, 5));
        let back = mat_mul(&q, &r).unwrap();
        assert!(back.minus(&a).unwrap().norm_f() < 1e-12);
    }
}
