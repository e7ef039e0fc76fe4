//! Least-squares backends.
//!
//! A backend owns one representation of the design matrix and turns it into a
//! [`Factorization`] for a given set of equation weights. A factorization maps a block of
//! right-hand sides (equations × instances) to the least-squares solutions
//! (columns × instances), so one factorization serves every instance that shares the
//! design matrix and weights.
//!
//! Two backends are available:
//!
//! - [`dense::DenseBackend`]: `nalgebra` matrices and an explicit solve operator
//! - [`sparse::SparseBackend`]: `sprs` CSR storage and an LDLᵀ factorization of the normal
//!   equations

use std::fmt;

use itertools::Itertools;
use nalgebra::DMatrix;

use crate::errors::LinAlgError;
use crate::options::{BackendKind, DenseMethod, RankPolicy, SolverOptions};
use crate::registry::ParameterRegistry;
use crate::system::LinearSystem;
use crate::types::SharedFactorization;

pub mod dense;
pub mod sparse;

pub use dense::DenseBackend;
pub use sparse::SparseBackend;

/// Entries of a null-space vector with smaller magnitude are not attributed to a parameter.
const NULL_SPACE_THRESHOLD: f64 = 1e-6;

/// Pivots of the normal matrix within this many `n·ε` of zero are not trusted.
const NORMAL_PIVOT_EPSILONS: f64 = 1e3;

/// A reusable least-squares solve for one design matrix and one set of weights.
pub trait Factorization: Send + Sync + fmt::Debug {
    /// Solves a block of right-hand sides.
    ///
    /// # Arguments
    /// * `rhs` - Unweighted right-hand sides, one column per instance (equations × k)
    ///
    /// # Returns
    /// The solutions, one column per instance (columns × k)
    fn apply(&self, rhs: &DMatrix<f64>) -> DMatrix<f64>;

    /// Short name of the method that produced this factorization.
    fn method(&self) -> &'static str;
}

/// A design matrix representation that can be factorized.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Factorizes the (weighted) design matrix.
    ///
    /// # Arguments
    /// * `weights` - One weight per equation, or `None` for unit weights
    /// * `settings` - Tolerances and policies taken from the solver options
    ///
    /// # Errors
    /// Returns `LinAlgError` if the system is rank deficient under `RankPolicy::Strict`,
    /// or if the factorization itself fails.
    fn factorize(
        &self,
        weights: Option<&[f64]>,
        settings: &FactorSettings<'_>,
    ) -> Result<SharedFactorization, LinAlgError>;
}

/// Numeric settings used while factorizing.
#[derive(Debug, Clone, Copy)]
pub struct FactorSettings<'a> {
    pub rcond: f64,
    pub rank_policy: RankPolicy,
    pub regularization: Option<f64>,
    pub dense_method: DenseMethod,
    /// Used to name the parameters implicated in a failure
    pub registry: &'a ParameterRegistry,
}

impl<'a> FactorSettings<'a> {
    pub fn new(options: &SolverOptions, registry: &'a ParameterRegistry) -> Self {
        Self {
            rcond: options.rcond,
            rank_policy: options.rank_policy,
            regularization: options.regularization,
            dense_method: options.dense_method,
            registry,
        }
    }

    /// True if rank deficiency is an error rather than a reason for a pseudo-inverse.
    pub fn is_strict(&self) -> bool {
        self.regularization.is_none() && self.rank_policy == RankPolicy::Strict
    }

    /// Relative tolerance for pivots of the normal matrix `AᵀWA` of `columns` columns.
    ///
    /// The pivots scale with the squared singular values of `A`, so `rcond` is squared. It
    /// never drops below the resolution of the normal matrix in double precision; pivots
    /// under that floor leave the rank to an SVD of the design matrix.
    pub fn normal_pivot_rcond(&self, columns: usize) -> f64 {
        (self.rcond * self.rcond).max(NORMAL_PIVOT_EPSILONS * columns as f64 * f64::EPSILON)
    }

    /// Fails under `RankPolicy::Strict`, naming the parameters spanning the null space of
    /// `a` (the weighted design matrix W^½·A).
    pub(crate) fn reject_deficient(
        &self,
        a: &DMatrix<f64>,
        reason: impl Into<String>,
    ) -> Result<(), LinAlgError> {
        if self.rank_policy == RankPolicy::PseudoInverse {
            return Ok(());
        }
        Err(LinAlgError::new(reason)
            .with_parameters(null_space_labels(a, self.rcond, self.registry)))
    }

    /// Fails if any column has no non-zero weighted coefficient.
    pub(crate) fn reject_unconstrained(&self, columns: Vec<usize>) -> Result<(), LinAlgError> {
        if columns.is_empty() {
            return Ok(());
        }
        Err(LinAlgError::new("parameters are not constrained by any weighted equation")
            .with_parameters(self.registry.column_labels(columns)))
    }
}

/// Creates the backend selected by `kind` for the design matrix of `system`.
pub fn assemble(kind: BackendKind, system: &LinearSystem) -> Box<dyn Backend> {
    match kind {
        BackendKind::Dense => Box::new(DenseBackend::new(system)),
        BackendKind::Sparse => Box::new(SparseBackend::new(system)),
    }
}

/// Labels of the columns that take part in the (numerical) null space of `a`.
///
/// Right singular vectors whose singular value is at most `rcond·σ_max` span the null space.
pub(crate) fn null_space_labels(
    a: &DMatrix<f64>,
    rcond: f64,
    registry: &ParameterRegistry,
) -> Vec<String> {
    let svd = a.clone().svd(false, true);
    let Some(v_t) = svd.v_t.as_ref() else {
        return Vec::new();
    };
    let tolerance = rcond * svd.singular_values.max();

    let columns = svd
        .singular_values
        .iter()
        .enumerate()
        .filter(|(_, &s)| s <= tolerance)
        .flat_map(|(k, _)| {
            v_t.row(k)
                .iter()
                .enumerate()
                .filter(|(_, v)| v.abs() > NULL_SPACE_THRESHOLD)
                .map(|(c, _)| c)
                .collect::<Vec<_>>()
        })
        .sorted()
        .dedup()
        .collect::<Vec<_>>();

    registry.column_labels(columns)
}
