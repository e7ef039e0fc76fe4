//! Configuration options for the linear solver.

use std::collections::HashMap;

use crate::errors::SolverError;

/// Internal representation of the design matrix.
///
/// The choice is always explicit; it is never inferred from the system size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Dense `nalgebra` matrix with an explicit solve operator.
    #[default]
    Dense,
    /// Compressed sparse rows with an LDLᵀ factorization of the normal equations.
    Sparse,
}

/// Factorization used by the dense backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DenseMethod {
    /// Singular Value Decomposition pseudo-inverse.
    #[default]
    Svd,
    /// Householder QR (requires at least as many equations as columns).
    Qr,
    /// Cholesky factorization of the normal equations.
    Cholesky,
}

/// What to do with underdetermined or rank-deficient systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RankPolicy {
    /// Fail with `UnderdeterminedSystem` or `LinAlg`.
    #[default]
    Strict,
    /// Return the minimum-norm least-squares solution and log a warning.
    PseudoInverse,
}

/// Options for building and solving a linear system.
///
/// # Tolerance
///
/// `rcond` is a **relative** tolerance on the singular values of the (weighted) design
/// matrix: `σ_i <= rcond * σ_max` counts as zero. Both backends and every dense method make
/// the same rank decision. Pivots of the normal matrix (Cholesky, LDLᵀ) scale with `σ²` and
/// are compared against `rcond²`; where they cannot resolve the rank, an SVD decides.
///
/// # Example
///
/// ```
/// use linsolve::{RankPolicy, SolverOptions};
///
/// let opts = SolverOptions::default()
///     .sparse(true)
///     .with_rcond(1e-12)
///     .with_rank_policy(RankPolicy::PseudoInverse)
///     .with_vector_parameter("v", 3)
///     .with_constant("gain", 2.0);
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Matrix representation and factorization family.
    pub backend: BackendKind,

    /// Factorization used by the dense backend.
    pub dense_method: DenseMethod,

    /// Relative singular value tolerance.
    pub rcond: f64,

    /// Handling of underdetermined and rank-deficient systems.
    pub rank_policy: RankPolicy,

    /// Tikhonov regularization strength added to the normal equations.
    ///
    /// When set, every system is well-posed and the rank checks are skipped.
    pub regularization: Option<f64>,

    /// Identifiers substituted by numeric constants while parsing.
    pub constants: HashMap<String, f64>,

    /// Vector parameters and their lengths; all other parameters are scalar.
    pub vectors: HashMap<String, usize>,

    /// Number of instances solved per block.
    pub chunk_size: usize,

    /// Solve instance blocks on the rayon thread pool.
    pub parallel: bool,

    /// Maximum number of factorizations kept by a solver.
    ///
    /// Every distinct weight column needs its own factorization; beyond this count the
    /// least recently used one is dropped.
    pub cache_capacity: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Dense,
            dense_method: DenseMethod::Svd,
            rcond: 1e-10,
            rank_policy: RankPolicy::Strict,
            regularization: None,
            constants: HashMap::new(),
            vectors: HashMap::new(),
            chunk_size: 4096,
            parallel: true,
            cache_capacity: 8,
        }
    }
}

impl SolverOptions {
    /// Create options for the dense backend.
    pub fn dense() -> Self {
        Self::default()
    }

    /// Select the sparse (`true`) or dense (`false`) backend.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.backend = if sparse {
            BackendKind::Sparse
        } else {
            BackendKind::Dense
        };
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_dense_method(mut self, method: DenseMethod) -> Self {
        self.dense_method = method;
        self
    }

    pub fn with_rcond(mut self, rcond: f64) -> Self {
        self.rcond = rcond;
        self
    }

    pub fn with_rank_policy(mut self, policy: RankPolicy) -> Self {
        self.rank_policy = policy;
        self
    }

    pub fn with_regularization(mut self, lambda: f64) -> Self {
        self.regularization = Some(lambda);
        self
    }

    /// Declare a named constant.
    pub fn with_constant(mut self, name: impl Into<String>, value: f64) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    /// Declare a vector parameter referenced by element, e.g. `v(0)`.
    pub fn with_vector_parameter(mut self, name: impl Into<String>, length: usize) -> Self {
        self.vectors.insert(name.into(), length);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Checks that all values are in range.
    pub fn validate(&self) -> Result<(), SolverError> {
        if !self.rcond.is_finite() || self.rcond < 0.0 {
            return Err(SolverError::InvalidOption(format!(
                "rcond must be finite and non-negative, got {}",
                self.rcond
            )));
        }
        if let Some(lambda) = self.regularization {
            if !lambda.is_finite() || lambda <= 0.0 {
                return Err(SolverError::InvalidOption(format!(
                    "regularization must be finite and positive, got {}",
                    lambda
                )));
            }
        }
        if self.chunk_size == 0 {
            return Err(SolverError::InvalidOption(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(SolverError::InvalidOption(
                "cache_capacity must be positive".to_string(),
            ));
        }
        for (name, &length) in &self.vectors {
            if length == 0 {
                return Err(SolverError::InvalidOption(format!(
                    "vector parameter '{}' must have positive length",
                    name
                )));
            }
            if self.constants.contains_key(name) {
                return Err(SolverError::InvalidOption(format!(
                    "'{}' is declared both as a constant and as a vector parameter",
                    name
                )));
            }
        }
        for (name, value) in &self.constants {
            if !value.is_finite() {
                return Err(SolverError::InvalidOption(format!(
                    "constant '{}' must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Returns true if parsing depends on anything that differs between `self` and `other`.
    pub(crate) fn changes_parsing(&self, other: &SolverOptions) -> bool {
        self.constants != other.constants || self.vectors != other.vectors
    }

    /// Every option that influences a factorization.
    pub(crate) fn numeric_key(&self) -> NumericKey {
        NumericKey {
            backend: self.backend,
            dense_method: self.dense_method,
            rcond: self.rcond.to_bits(),
            rank_policy: self.rank_policy,
            regularization: self.regularization.map(f64::to_bits),
        }
    }
}

/// The options a factorization depends on, compared bit for bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NumericKey {
    backend: BackendKind,
    dense_method: DenseMethod,
    rcond: u64,
    rank_policy: RankPolicy,
    regularization: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SolverOptions::default();
        assert_eq!(opts.backend, BackendKind::Dense);
        assert_eq!(opts.dense_method, DenseMethod::Svd);
        assert_eq!(opts.rank_policy, RankPolicy::Strict);
        assert!(opts.regularization.is_none());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_sparse_switch() {
        assert_eq!(
            SolverOptions::default().sparse(true).backend,
            BackendKind::Sparse
        );
        assert_eq!(
            SolverOptions::default().sparse(true).sparse(false).backend,
            BackendKind::Dense
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SolverOptions::default().with_rcond(-1.0).validate().is_err());
        assert!(SolverOptions::default()
            .with_rcond(f64::NAN)
            .validate()
            .is_err());
        assert!(SolverOptions::default()
            .with_regularization(0.0)
            .validate()
            .is_err());
        assert!(SolverOptions::default()
            .with_chunk_size(0)
            .validate()
            .is_err());
        assert!(SolverOptions::default()
            .with_cache_capacity(0)
            .validate()
            .is_err());
        assert!(SolverOptions::default()
            .with_vector_parameter("v", 0)
            .validate()
            .is_err());
        assert!(SolverOptions::default()
            .with_vector_parameter("v", 2)
            .with_constant("v", 1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_changes_parsing() {
        let base = SolverOptions::default();
        assert!(!base.changes_parsing(&base.clone().with_rcond(1e-3)));
        assert!(base.changes_parsing(&base.clone().with_constant("k", 1.0)));
        assert!(base.changes_parsing(&base.clone().with_vector_parameter("v", 2)));
    }
}
