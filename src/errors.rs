//! Error types for the linsolve crate.
//!
//! This module defines the various error types that can occur while parsing equations,
//! assembling the linear system and solving it. The main error types are:
//!
//! - `ParseError`: Errors while turning an equation string into linear terms
//! - `DimensionError`: Shape problems in instance data, weights or parameter declarations
//! - `LinAlgError`: Singular or ill-conditioned systems and factorization failures
//! - `SolverError`: High-level errors returned by [`LinearSolver`](crate::LinearSolver)
//!
//! Each error type implements the standard Error trait and provides detailed error messages.

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors that can occur while converting an equation string into linear terms.
///
/// Equations are tokenized by evalexpr and then converted into a restricted AST that
/// only admits affine expressions. Anything that would make the equation nonlinear
/// or that cannot be resolved to a constant or a parameter ends up here.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Error when evalexpr fails to build an operator tree from the string
    #[error("Malformed equation syntax")]
    Syntax(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when the equation string contains no expression at all
    #[error("Equation is empty")]
    Empty,
    /// Error when two parameter-dependent expressions are multiplied
    #[error("Nonlinear term: ({lhs}) * ({rhs})")]
    Nonlinear { lhs: String, rhs: String },
    /// Error when a parameter appears in a power expression
    #[error("Nonlinear power: ({base}) ^ ({exponent})")]
    NonlinearPower { base: String, exponent: String },
    /// Error when an expression is divided by a parameter-dependent expression
    #[error("Division by parameter expression: {0}")]
    DivisionByParameter(String),
    /// Error when a constant divisor folds to zero
    #[error("Division by zero")]
    DivisionByZero,
    /// Error when encountering an operator that has no linear meaning
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when a literal is not numeric
    #[error("Unsupported literal: {0}")]
    UnsupportedLiteral(String),
    /// Error when a call does not reference an element of a vector parameter
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    /// Error when an element reference does not carry a valid index
    #[error("Invalid element index for '{parameter}': {index}")]
    InvalidElementIndex { parameter: String, index: String },
    /// Error when the equation folds to a constant without any parameter
    #[error("Equation does not reference any parameter")]
    NoParameters,
}

/// Errors caused by inconsistent shapes.
///
/// These surface while the matrix is assembled: instance data of different shapes,
/// weights that do not match their data, or parameter references that disagree with
/// the declared parameter shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DimensionError {
    /// Error when an equation's data does not match the common instance shape
    #[error("Instance shape mismatch in '{equation}': expected {expected:?}, got {got:?}")]
    InstanceShape {
        equation: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// Error when a weight array does not match the instance shape
    #[error("Weight shape mismatch in '{equation}': expected {expected:?}, got {got:?}")]
    WeightShape {
        equation: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// Error when a parameter is requested with a different length than it was registered with
    #[error("Conflicting length for parameter '{parameter}': registered {existing}, requested {requested}")]
    ParameterLength {
        parameter: String,
        existing: String,
        requested: String,
    },
    /// Error when an element is referenced on a parameter that was not declared as vector
    #[error("Parameter '{0}' is referenced by element but was not declared as a vector")]
    UndeclaredVector(String),
    /// Error when a vector parameter is referenced without an element index
    #[error("Vector parameter '{0}' must be referenced by element, e.g. {0}(0)")]
    MissingElement(String),
    /// Error when a scalar parameter is referenced with an element index
    #[error("Scalar parameter '{0}' cannot be referenced by element")]
    UnexpectedElement(String),
    /// Error when an element index exceeds the declared vector length
    #[error("Element {index} out of range for '{parameter}' of length {length}")]
    ElementOutOfRange {
        parameter: String,
        index: usize,
        length: usize,
    },
    /// Error when a parameter is not present in the registry
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
}

/// Errors raised by the numeric factorization.
///
/// Carries a human readable reason and the labels (`g1`, `v[2]`) of the parameters
/// that are implicated in the singularity, when they can be identified.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason} (parameters: [{}])", .parameters.join(", "))]
pub struct LinAlgError {
    /// What went wrong
    pub reason: String,
    /// Parameters spanning the ill-determined subspace
    pub parameters: Vec<String>,
}

impl LinAlgError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.parameters = parameters;
        self
    }
}

impl From<sprs::errors::LinalgError> for LinAlgError {
    fn from(e: sprs::errors::LinalgError) -> Self {
        LinAlgError::new(format!("sparse factorization failed: {:?}", e))
    }
}

/// High-level errors returned by the solver.
///
/// This enum wraps the lower-level parse, dimension and factorization errors and adds
/// the context (equation string, counts) needed to diagnose them.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Error when an equation string fails to parse
    #[error("Failed to parse equation '{equation}'")]
    Parse {
        equation: String,
        #[source]
        source: ParseError,
    },
    /// Error when shapes of data, weights or parameters are inconsistent
    #[error("Dimension mismatch")]
    DimensionMismatch(#[from] DimensionError),
    /// Error when there are fewer equations than unknowns and no regularization
    #[error("Underdetermined system: {equations} equations for {columns} unknowns")]
    UnderdeterminedSystem { equations: usize, columns: usize },
    /// Error when the system is singular beyond tolerance
    #[error("Linear algebra error")]
    LinAlg(#[from] LinAlgError),
    /// Error when a weight is negative or not finite
    #[error("Invalid weight for '{equation}': {reason}")]
    InvalidWeight { equation: String, reason: String },
    /// Error when weights refer to an equation that is not part of the system
    #[error("Unknown equation: {0}")]
    UnknownEquation(String),
    /// Error when the solver is constructed without any equation
    #[error("No equations given")]
    NoEquations,
    /// Error when a configuration value is out of range
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

impl SolverError {
    pub(crate) fn parse(equation: &str, source: ParseError) -> Self {
        SolverError::Parse {
            equation: equation.to_string(),
            source,
        }
    }
}
