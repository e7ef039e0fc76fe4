//! Dense backend built on `nalgebra`.
//!
//! Factorizing computes an explicit solve operator `P` (columns × equations) such that the
//! weighted least-squares solution of every instance is `x = P·b`. The weights are folded
//! into `P`, so applying a factorization is a single matrix product per instance block.
//!
//! The rank of the design matrix is always decided by its singular values. QR and Cholesky
//! are used while their pivots leave no doubt about full rank; otherwise the factorization
//! falls through to the SVD, so every method accepts and rejects the same systems.

use std::sync::Arc;

use nalgebra::DMatrix;

use crate::backends::{Backend, FactorSettings, Factorization};
use crate::builder::build_dense;
use crate::errors::LinAlgError;
use crate::options::{BackendKind, DenseMethod};
use crate::system::LinearSystem;
use crate::types::SharedFactorization;

/// Dense design matrix (equations × columns).
#[derive(Debug, Clone)]
pub struct DenseBackend {
    matrix: DMatrix<f64>,
}

impl DenseBackend {
    pub fn new(system: &LinearSystem) -> Self {
        Self {
            matrix: build_dense(system.rows(), system.num_columns()),
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

/// An explicit solve operator.
#[derive(Debug, Clone)]
pub struct DenseFactorization {
    operator: DMatrix<f64>,
    method: &'static str,
}

impl DenseFactorization {
    /// The operator `P` mapping right-hand sides to solutions.
    pub fn operator(&self) -> &DMatrix<f64> {
        &self.operator
    }
}

impl Factorization for DenseFactorization {
    fn apply(&self, rhs: &DMatrix<f64>) -> DMatrix<f64> {
        &self.operator * rhs
    }

    fn method(&self) -> &'static str {
        self.method
    }
}

impl Backend for DenseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dense
    }

    fn factorize(
        &self,
        weights: Option<&[f64]>,
        settings: &FactorSettings<'_>,
    ) -> Result<SharedFactorization, LinAlgError> {
        let sqrt_weights: Option<Vec<f64>> = weights.map(|w| w.iter().map(|w| w.sqrt()).collect());

        let mut a = self.matrix.clone();
        if let Some(sqrt_w) = &sqrt_weights {
            scale_rows(&mut a, sqrt_w);
        }

        if settings.is_strict() {
            let unconstrained = a
                .column_iter()
                .enumerate()
                .filter(|(_, column)| column.iter().all(|v| *v == 0.0))
                .map(|(c, _)| c)
                .collect();
            settings.reject_unconstrained(unconstrained)?;
        }

        let (mut operator, method) = match (settings.regularization, settings.dense_method) {
            (Some(lambda), _) => (regularized_operator(&a, lambda)?, "regularized-cholesky"),
            (None, DenseMethod::Svd) => (svd_operator(&a, settings)?, "svd"),
            (None, DenseMethod::Qr) => match qr_operator(&a, settings) {
                Some(operator) => (operator, "qr"),
                None => (svd_operator(&a, settings)?, "svd"),
            },
            (None, DenseMethod::Cholesky) => match cholesky_operator(&a, settings) {
                Some(operator) => (operator, "cholesky"),
                None => (svd_operator(&a, settings)?, "svd"),
            },
        };

        if let Some(sqrt_w) = &sqrt_weights {
            scale_columns(&mut operator, sqrt_w);
        }

        Ok(Arc::new(DenseFactorization { operator, method }))
    }
}

/// `W^½·A`
pub(crate) fn scale_rows(a: &mut DMatrix<f64>, sqrt_weights: &[f64]) {
    for (mut row, s) in a.row_iter_mut().zip(sqrt_weights) {
        row *= *s;
    }
}

/// `P·W^½`, so that `x = P·W^½·b`.
pub(crate) fn scale_columns(operator: &mut DMatrix<f64>, sqrt_weights: &[f64]) {
    for (mut column, s) in operator.column_iter_mut().zip(sqrt_weights) {
        column *= *s;
    }
}

/// Moore-Penrose pseudo-inverse via SVD, with singular values below `rcond·σ_max` cut off.
pub(crate) fn svd_operator(
    a: &DMatrix<f64>,
    settings: &FactorSettings<'_>,
) -> Result<DMatrix<f64>, LinAlgError> {
    let columns = a.ncols();
    let svd = a.clone().svd(true, true);
    let eps = settings.rcond * svd.singular_values.max();
    let rank = svd.rank(eps);

    if rank < columns {
        settings.reject_deficient(
            a,
            format!("rank-deficient design matrix: rank {} < {} columns", rank, columns),
        )?;
        log::warn!(
            "design matrix has rank {} < {} columns, returning the minimum-norm solution",
            rank,
            columns
        );
    }

    svd.pseudo_inverse(eps).map_err(LinAlgError::new)
}

/// `R⁻¹·Qᵀ` from a thin QR decomposition, `None` if the rank has to be decided by the SVD.
fn qr_operator(a: &DMatrix<f64>, settings: &FactorSettings<'_>) -> Option<DMatrix<f64>> {
    let (rows, columns) = a.shape();
    if rows < columns {
        return None;
    }

    let qr = a.clone().qr();
    let r = qr.r();
    let diagonal = r.diagonal().map(f64::abs);
    // |r_ii| scale like singular values, but the normal equations bound what is resolvable
    let tolerance = settings.normal_pivot_rcond(columns).sqrt() * diagonal.max();
    if diagonal.iter().any(|&d| d <= tolerance) {
        log::debug!("QR pivots do not resolve the rank, falling back to SVD");
        return None;
    }

    r.solve_upper_triangular(&qr.q().transpose())
}

/// `(AᵀA)⁻¹·Aᵀ` via Cholesky, `None` if the rank has to be decided by the SVD.
fn cholesky_operator(a: &DMatrix<f64>, settings: &FactorSettings<'_>) -> Option<DMatrix<f64>> {
    let normal = a.tr_mul(a);
    let columns = normal.ncols();
    let cholesky = normal.cholesky()?;

    let pivots = cholesky.l().diagonal().map(|l| l * l);
    let tolerance = settings.normal_pivot_rcond(columns) * pivots.max();
    if pivots.iter().any(|&d| d <= tolerance) {
        log::debug!("Cholesky pivots do not resolve the rank, falling back to SVD");
        return None;
    }

    Some(cholesky.solve(&a.transpose()))
}

/// `(AᵀA + λI)⁻¹·Aᵀ`.
fn regularized_operator(a: &DMatrix<f64>, lambda: f64) -> Result<DMatrix<f64>, LinAlgError> {
    let mut normal = a.tr_mul(a);
    for i in 0..normal.ncols() {
        normal[(i, i)] += lambda;
    }
    let cholesky = normal
        .cholesky()
        .ok_or_else(|| LinAlgError::new("regularized normal matrix is not positive definite"))?;
    Ok(cholesky.solve(&a.transpose()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::IntoInstanceArray;
    use crate::options::{RankPolicy, SolverOptions};

    fn system(equations: &[&str]) -> LinearSystem {
        let data = equations
            .iter()
            .map(|e| (e.to_string(), 0.0_f64.into_instance_array()))
            .collect();
        LinearSystem::build(data, Vec::new(), &SolverOptions::default()).unwrap()
    }

    fn solve(
        backend: &DenseBackend,
        system: &LinearSystem,
        options: &SolverOptions,
        b: &[f64],
    ) -> Result<Vec<f64>, LinAlgError> {
        let settings = FactorSettings::new(options, system.registry());
        let factorization = backend.factorize(None, &settings)?;
        let rhs = DMatrix::from_column_slice(b.len(), 1, b);
        Ok(factorization.apply(&rhs).as_slice().to_vec())
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_all_methods_agree() -> Result<(), LinAlgError> {
        let system = system(&["g1 + g2", "g1 - g2", "2*g1 + g2"]);
        let backend = DenseBackend::new(&system);
        let b = [3.0, 1.0, 5.0];
        for method in [DenseMethod::Svd, DenseMethod::Qr, DenseMethod::Cholesky] {
            let options = SolverOptions::default().with_dense_method(method);
            assert_close(&solve(&backend, &system, &options, &b)?, &[2.0, 1.0]);
        }
        Ok(())
    }

    #[test]
    fn test_weights_are_folded_into_operator() -> Result<(), LinAlgError> {
        // Two inconsistent measurements of g1; the heavier weight pulls the estimate
        let system = system(&["g1", "2*g1"]);
        let backend = DenseBackend::new(&system);
        let options = SolverOptions::default();
        let settings = FactorSettings::new(&options, system.registry());
        let factorization = backend.factorize(Some(&[1.0, 0.0]), &settings)?;
        let x = factorization.apply(&DMatrix::from_column_slice(2, 1, &[1.0, 4.0]));
        assert!((x[(0, 0)] - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_rank_deficient_strict() {
        let system = system(&["g1 + g2", "2*g1 + 2*g2"]);
        let backend = DenseBackend::new(&system);
        for method in [DenseMethod::Svd, DenseMethod::Qr, DenseMethod::Cholesky] {
            let options = SolverOptions::default().with_dense_method(method);
            let err = solve(&backend, &system, &options, &[3.0, 6.0]).unwrap_err();
            assert_eq!(err.parameters, vec!["g1", "g2"], "{}", err);
        }
    }

    #[test]
    fn test_rank_deficient_pseudo_inverse() -> Result<(), LinAlgError> {
        let system = system(&["g1 + g2", "2*g1 + 2*g2"]);
        let backend = DenseBackend::new(&system);
        for method in [DenseMethod::Svd, DenseMethod::Qr, DenseMethod::Cholesky] {
            let options = SolverOptions::default()
                .with_dense_method(method)
                .with_rank_policy(RankPolicy::PseudoInverse);
            assert_close(&solve(&backend, &system, &options, &[3.0, 6.0])?, &[1.5, 1.5]);
        }
        Ok(())
    }

    #[test]
    fn test_zero_weight_leaves_parameter_unconstrained() {
        let system = system(&["g1", "g2", "g1 + 2*g3"]);
        let backend = DenseBackend::new(&system);
        let options = SolverOptions::default();
        let settings = FactorSettings::new(&options, system.registry());
        let err = backend
            .factorize(Some(&[1.0, 0.0, 1.0]), &settings)
            .unwrap_err();
        assert_eq!(err.parameters, vec!["g2"]);
    }

    #[test]
    fn test_regularization() -> Result<(), LinAlgError> {
        let system = system(&["g1 + g2"]);
        let backend = DenseBackend::new(&system);
        let options = SolverOptions::default().with_regularization(1e-8);
        let x = solve(&backend, &system, &options, &[1.0])?;
        assert!((x[0] - 0.5).abs() < 1e-6 && (x[1] - 0.5).abs() < 1e-6);
        Ok(())
    }
}
