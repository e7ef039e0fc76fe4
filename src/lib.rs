//! Batched linear least squares from symbolic equation strings.
//!
//! This crate solves many independent linear systems that share one design matrix. Each
//! equation is a string such as `"g1 + 2*g2 - 3"` paired with an array of measurements, one
//! per instance. The equations are parsed with the [evalexpr](https://github.com/ISibboI/evalexpr)
//! tree builder into their linear terms, the design matrix is factorized once, and every
//! instance is solved against the shared factorization.
//!
//! # Features
//!
//! - Parsing of linear equation strings with named constants and vector parameters
//! - Dense (`nalgebra`) and sparse (`sprs` + LDLᵀ) backends behind one abstraction
//! - Per-solver factorization cache reused across `solve` and `set_data` calls
//! - Per-equation and per-instance weights
//! - Explicit handling of rank-deficient systems (strict, pseudo-inverse or regularized)
//! - Parallel solving of instance blocks with rayon
//!
//! # Example
//!
//! ```rust
//! use linsolve::LinearSolver;
//!
//! // Two instances of the same three equations
//! let mut solver = LinearSolver::new(vec![
//!     ("g1 + g2", vec![3.0, 5.0]),
//!     ("g1 - g2", vec![1.0, 1.0]),
//!     ("2*g1 + g2", vec![5.0, 8.0]),
//! ])
//! .unwrap();
//!
//! let solution = solver.solve().unwrap();
//! let g1: Vec<f64> = solution["g1"].iter().copied().collect();
//! let g2: Vec<f64> = solution["g2"].iter().copied().collect();
//! assert!((g1[0] - 2.0).abs() < 1e-10 && (g1[1] - 3.0).abs() < 1e-10);
//! assert!((g2[0] - 1.0).abs() < 1e-10 && (g2[1] - 2.0).abs() < 1e-10);
//! ```

pub use equation::Equation;
pub use errors::{DimensionError, LinAlgError, ParseError, SolverError};
pub use options::{BackendKind, DenseMethod, RankPolicy, SolverOptions};
pub use solution::Solution;
pub use solver::LinearSolver;

pub mod prelude {
    pub use crate::data::IntoInstanceArray;
    pub use crate::equation::Equation;
    pub use crate::errors::SolverError;
    pub use crate::options::{BackendKind, DenseMethod, RankPolicy, SolverOptions};
    pub use crate::solution::Solution;
    pub use crate::solver::LinearSolver;
}

/// Dense and sparse least-squares backends
pub mod backends;
/// Assembly of design matrices, right-hand sides and weights
pub mod builder;
/// Factorization cache owned by a solver
pub mod cache;
/// Conversion from parsed operator trees to linear expressions
pub mod convert;
/// Conversion of caller data into instance arrays
pub mod data;
/// Linear equation parsing
pub mod equation;
/// Error types for the various failure modes
pub mod errors;
/// Linear expression tree representation
pub mod expr;
/// Solver configuration
pub mod options;
/// Parameter registry and column assignment
pub mod registry;
/// Solved parameter values
pub mod solution;
/// The batched least-squares solver
pub mod solver;
/// Parsed linear systems with their batched data
pub mod system;
/// Shared type aliases
pub mod types;
