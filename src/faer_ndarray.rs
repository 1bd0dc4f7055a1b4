//! ndarray front end for the faer kernels used by the Laplace fit, the
//! Gaussian sampler and the KL score.
//!
//! Matrices here are at most `D × D` or `N × D` with small `D`, so operands are
//! copied into faer storage instead of aliased.

use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{self, Solve};
use faer::{Accum, Mat, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
}

/// faer only pays off once the product is large; tiny Laplace systems stay
/// on ndarray.
fn use_faer_kernel(rows: usize, inner: usize, cols: usize) -> bool {
    const MIN_DIM: usize = 32;
    const MIN_WORK: usize = 64 * 64;
    rows.max(inner).max(cols) >= MIN_DIM
        && rows.saturating_mul(inner).saturating_mul(cols) >= MIN_WORK
}

fn parallelism(n_rows: usize) -> Par {
    if n_rows < 512 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

fn to_faer<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn column_to_faer<S: Data<Elem = f64>>(v: &ArrayBase<S, Ix1>) -> Mat<f64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

fn from_faer(m: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// `Aᵀ B` for `A: n × p`, `B: n × q`.
pub fn fast_atb<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    let (n, p) = a.dim();
    let q = b.ncols();
    debug_assert_eq!(n, b.nrows(), "row counts must agree");
    if !use_faer_kernel(p, n, q) {
        return a.t().dot(b);
    }
    let mut out = Mat::<f64>::zeros(p, q);
    let fa = to_faer(a);
    let fb = to_faer(b);
    matmul(
        out.as_mut(),
        Accum::Replace,
        fa.as_ref().transpose(),
        fb.as_ref(),
        1.0,
        parallelism(n),
    );
    from_faer(out.as_ref())
}

/// `Aᵀ v` for `A: n × p`.
pub fn fast_atv<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    v: &ArrayBase<S2, Ix1>,
) -> Array1<f64> {
    let (n, p) = a.dim();
    debug_assert_eq!(n, v.len(), "row count must match vector length");
    if !use_faer_kernel(p, n, 1) {
        return a.t().dot(v);
    }
    let mut out = Mat::<f64>::zeros(p, 1);
    let fa = to_faer(a);
    let fv = column_to_faer(v);
    matmul(
        out.as_mut(),
        Accum::Replace,
        fa.as_ref().transpose(),
        fv.as_ref(),
        1.0,
        parallelism(n),
    );
    Array1::from_shape_fn(p, |i| out[(i, 0)])
}

pub trait FaerEigh {
    /// Eigenvalues (ascending) and eigenvectors of a symmetric matrix.
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let evd = to_faer(self)
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let s = evd.S().column_vector();
        let values = Array1::from_shape_fn(s.nrows(), |i| s[i]);
        Ok((values, from_faer(evd.U())))
    }
}

/// Lower Cholesky factor `A = L Lᵀ` of a positive definite matrix.
pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn dim(&self) -> usize {
        self.factor.L().nrows()
    }

    pub fn solve_vec<S: Data<Elem = f64>>(&self, rhs: &ArrayBase<S, Ix1>) -> Array1<f64> {
        let mut x = column_to_faer(rhs);
        self.factor.solve_in_place(x.as_mut());
        Array1::from_shape_fn(rhs.len(), |i| x[(i, 0)])
    }

    pub fn solve_mat<S: Data<Elem = f64>>(&self, rhs: &ArrayBase<S, Ix2>) -> Array2<f64> {
        let mut x = to_faer(rhs);
        self.factor.solve_in_place(x.as_mut());
        from_faer(x.as_ref())
    }

    pub fn lower_triangular(&self) -> Array2<f64> {
        let l = self.factor.L();
        // Only the lower triangle of the faer factor is meaningful.
        Array2::from_shape_fn((l.nrows(), l.ncols()), |(i, j)| {
            if j <= i { l[(i, j)] } else { 0.0 }
        })
    }

    /// log|A| = 2 Σ log L_ii.
    pub fn log_determinant(&self) -> f64 {
        let l = self.factor.L();
        2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>()
    }

    /// A⁻¹, symmetrized.
    pub fn inverse(&self) -> Array2<f64> {
        symmetrize(&self.solve_mat(&Array2::<f64>::eye(self.dim())))
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let factor = to_faer(self)
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

pub fn symmetrize<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> Array2<f64> {
    (matrix + &matrix.t()) * 0.5
}

/// Smallest eigenvalue of the symmetric part, NaN if the decomposition fails.
pub fn min_eigenvalue<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> f64 {
    match symmetrize(matrix).eigh(Side::Lower) {
        Ok((values, _)) => values.iter().copied().fold(f64::INFINITY, f64::min),
        Err(_) => f64::NAN,
    }
}
