//! Sparse backend built on `sprs` and `sprs-ldl`.
//!
//! The design matrix is kept in CSR storage. Factorizing assembles the weighted normal
//! matrix `AᵀWA (+ λI)` as a sparse matrix and computes its LDLᵀ factorization with a
//! Reverse Cuthill-McKee fill-in reduction. Applying the factorization forms `Aᵀ(w∘b)` for
//! every instance and solves against the factors.
//!
//! Pivots of `D` below [`FactorSettings::normal_pivot_rcond`] cannot tell an
//! ill-conditioned system from a rank-deficient one. The backend then decides with a dense
//! SVD of the weighted design matrix, exactly like the dense backend, and either fails
//! (under `RankPolicy::Strict`) or solves with the resulting pseudo-inverse.

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use sprs::{CsMat, FillInReduction, SymmetryCheck, TriMat};
use sprs_ldl::{Ldl, LdlNumeric};

use crate::backends::dense::{scale_columns, scale_rows, svd_operator};
use crate::backends::{Backend, FactorSettings, Factorization};
use crate::builder::build_sparse;
use crate::errors::LinAlgError;
use crate::options::BackendKind;
use crate::system::LinearSystem;
use crate::types::SharedFactorization;

/// Sparse design matrix (equations × columns) in CSR storage.
#[derive(Debug, Clone)]
pub struct SparseBackend {
    matrix: Arc<CsMat<f64>>,
}

impl SparseBackend {
    pub fn new(system: &LinearSystem) -> Self {
        Self {
            matrix: Arc::new(build_sparse(system.rows(), system.num_columns())),
        }
    }

    pub fn matrix(&self) -> &CsMat<f64> {
        &self.matrix
    }

    /// Assembles `AᵀWA` in CSC storage together with its diagonal.
    fn normal_matrix(
        &self,
        weights: Option<&[f64]>,
        regularization: Option<f64>,
    ) -> (CsMat<f64>, Vec<f64>) {
        let columns = self.matrix.cols();
        let mut triplets = TriMat::new((columns, columns));
        let mut diagonal = vec![0.0; columns];

        for (i, row) in self.matrix.outer_iterator().enumerate() {
            let w = weights.map_or(1.0, |w| w[i]);
            if w == 0.0 {
                continue;
            }
            for (c1, &v1) in row.iter() {
                diagonal[c1] += w * v1 * v1;
                for (c2, &v2) in row.iter() {
                    triplets.add_triplet(c1, c2, w * v1 * v2);
                }
            }
        }

        if let Some(lambda) = regularization {
            for (c, d) in diagonal.iter_mut().enumerate() {
                triplets.add_triplet(c, c, lambda);
                *d += lambda;
            }
        }

        (triplets.to_csc(), diagonal)
    }

    /// Explicit operator `P` with `x = P·b` from a dense SVD of `W^½·A`.
    fn svd_fallback(
        &self,
        weights: Option<&[f64]>,
        settings: &FactorSettings<'_>,
    ) -> Result<NormalSolve, LinAlgError> {
        let sqrt_weights: Option<Vec<f64>> = weights.map(|w| w.iter().map(|w| w.sqrt()).collect());
        let mut a = to_dense(&self.matrix);
        if let Some(sqrt_w) = &sqrt_weights {
            scale_rows(&mut a, sqrt_w);
        }
        let mut operator = svd_operator(&a, settings)?;
        if let Some(sqrt_w) = &sqrt_weights {
            scale_columns(&mut operator, sqrt_w);
        }
        Ok(NormalSolve::Operator(operator))
    }
}

enum NormalSolve {
    Ldl(LdlNumeric<f64, usize>),
    /// Solve operator applied to the unweighted right-hand sides
    Operator(DMatrix<f64>),
}

/// A factorized normal matrix together with the data needed to form `Aᵀ(w∘b)`.
pub struct SparseFactorization {
    matrix: Arc<CsMat<f64>>,
    weights: Option<Vec<f64>>,
    solve: NormalSolve,
}

impl fmt::Debug for SparseFactorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SparseFactorization({}, {}x{}, nnz={})",
            self.method(),
            self.matrix.rows(),
            self.matrix.cols(),
            self.matrix.nnz()
        )
    }
}

impl SparseFactorization {
    /// `Aᵀ(w∘b)` for one right-hand side.
    fn weighted_projection(&self, b: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for (i, row) in self.matrix.outer_iterator().enumerate() {
            let wb = match &self.weights {
                Some(w) => w[i] * b[i],
                None => b[i],
            };
            if wb == 0.0 {
                continue;
            }
            for (c, &v) in row.iter() {
                out[c] += v * wb;
            }
        }
    }
}

impl Factorization for SparseFactorization {
    fn apply(&self, rhs: &DMatrix<f64>) -> DMatrix<f64> {
        let ldl = match &self.solve {
            NormalSolve::Ldl(ldl) => ldl,
            NormalSolve::Operator(operator) => return operator * rhs,
        };

        let columns = self.matrix.cols();
        let mut solutions = DMatrix::<f64>::zeros(columns, rhs.ncols());
        let mut projected = vec![0.0; columns];
        let mut b = vec![0.0; rhs.nrows()];

        for (k, column) in rhs.column_iter().enumerate() {
            for (dst, src) in b.iter_mut().zip(column.iter()) {
                *dst = *src;
            }
            self.weighted_projection(&b, &mut projected);
            let x = ldl.solve(&projected[..]);
            solutions.column_mut(k).copy_from_slice(&x);
        }

        solutions
    }

    fn method(&self) -> &'static str {
        match self.solve {
            NormalSolve::Ldl(_) => "ldl",
            NormalSolve::Operator(_) => "svd",
        }
    }
}

impl Backend for SparseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sparse
    }

    fn factorize(
        &self,
        weights: Option<&[f64]>,
        settings: &FactorSettings<'_>,
    ) -> Result<SharedFactorization, LinAlgError> {
        let (normal, diagonal) = self.normal_matrix(weights, settings.regularization);

        if settings.is_strict() {
            let unconstrained = diagonal
                .iter()
                .enumerate()
                .filter(|(_, &d)| d == 0.0)
                .map(|(c, _)| c)
                .collect();
            settings.reject_unconstrained(unconstrained)?;
        }

        let factored = Ldl::new()
            .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(normal.view());

        let solve = match (factored, settings.regularization) {
            (Ok(ldl), Some(_)) => NormalSolve::Ldl(ldl),
            (Err(e), Some(_)) => return Err(e.into()),
            (Ok(ldl), None) => {
                let pivots: Vec<f64> = ldl.d().iter().copied().collect();
                let max_pivot = pivots.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
                let tolerance = settings.normal_pivot_rcond(pivots.len()) * max_pivot;
                let unresolved = pivots.iter().filter(|&&d| d <= tolerance).count();
                if unresolved == 0 {
                    NormalSolve::Ldl(ldl)
                } else {
                    log::warn!(
                        "{} of {} LDLᵀ pivots are below tolerance, deciding the rank with a dense SVD",
                        unresolved,
                        pivots.len()
                    );
                    self.svd_fallback(weights, settings)?
                }
            }
            (Err(e), None) => {
                log::warn!(
                    "LDLᵀ factorization of the normal matrix failed ({:?}), falling back to a dense SVD",
                    e
                );
                self.svd_fallback(weights, settings)?
            }
        };

        log::debug!(
            "factorized {}x{} normal matrix with {} non-zeros",
            normal.rows(),
            normal.cols(),
            normal.nnz()
        );

        Ok(Arc::new(SparseFactorization {
            matrix: Arc::clone(&self.matrix),
            weights: weights.map(<[f64]>::to_vec),
            solve,
        }))
    }
}

fn to_dense(matrix: &CsMat<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::<f64>::zeros(matrix.rows(), matrix.cols());
    for (&value, (r, c)) in matrix.iter() {
        dense[(r, c)] += value;
    }
    dense
}
