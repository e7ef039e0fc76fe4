//! Assembly of design matrices and batched right-hand sides.
//!
//! This module turns parsed equations and their instance data into the numeric pieces of a
//! least-squares problem:
//!
//! - Resolved rows: each equation's terms mapped onto registry columns
//! - The right-hand side: an `Array2<f64>` of equations × instances with offsets subtracted
//! - Weights: unit, per equation, or per equation and instance
//! - The design matrix A, either dense (`nalgebra::DMatrix`) or sparse (`sprs::CsMat`, CSR)
//! - A structural fingerprint of A, with the exact coefficients, used to key cached
//!   factorizations
//!
//! All functions here are pure; ownership of the results lies with [`LinearSystem`](crate::system::LinearSystem).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use nalgebra::DMatrix;
use ndarray::{Array2, ArrayD};
use sprs::{CsMat, TriMat};

use crate::equation::Equation;
use crate::errors::{DimensionError, SolverError};
use crate::registry::{ParameterRegistry, ParameterShape};
use crate::system::Weights;
use crate::types::Row;

/// Registers every referenced parameter and resolves the equations into rows.
///
/// Parameters are registered in order of first appearance across all equations. Names found
/// in `vectors` are registered as vector parameters of the declared length.
///
/// # Errors
/// Returns `DimensionError::UndeclaredVector` for element references to a parameter that
/// is not declared as vector, and the registry's resolution errors otherwise.
pub fn resolve_rows(
    equations: &[Equation],
    vectors: &HashMap<String, usize>,
) -> Result<(ParameterRegistry, Vec<Row>), DimensionError> {
    let mut registry = ParameterRegistry::new();
    let mut rows = Vec::with_capacity(equations.len());

    for equation in equations {
        let mut row = Row::with_capacity(equation.terms().len());
        for term in equation.terms() {
            let param = &term.parameter;
            let shape = match (vectors.get(&param.name), param.element) {
                (Some(&length), _) => ParameterShape::Vector(length),
                (None, Some(_)) => {
                    return Err(DimensionError::UndeclaredVector(param.name.clone()))
                }
                (None, None) => ParameterShape::Scalar,
            };
            registry.get_or_create(&param.name, shape)?;
            row.push((registry.column(param)?, term.coefficient));
        }
        rows.push(row);
    }

    Ok((registry, rows))
}

/// Determines the common instance shape of all data arrays.
///
/// 0-d arrays broadcast and do not constrain the shape. If every array is 0-d the
/// instance shape is `[]` with a single instance.
pub fn instance_shape(data: &[(String, ArrayD<f64>)]) -> Result<Vec<usize>, DimensionError> {
    let mut shape: Option<(&str, &[usize])> = None;
    for (equation, array) in data {
        if array.ndim() == 0 {
            continue;
        }
        match shape {
            None => shape = Some((equation.as_str(), array.shape())),
            Some((_, expected)) if expected != array.shape() => {
                return Err(DimensionError::InstanceShape {
                    equation: equation.clone(),
                    expected: expected.to_vec(),
                    got: array.shape().to_vec(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(shape.map(|(_, s)| s.to_vec()).unwrap_or_default())
}

/// Number of instances described by an instance shape.
pub fn num_instances(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Batches the data into an equations × instances matrix with offsets moved to the RHS.
///
/// `data[i]` must belong to `equations[i]` and conform to `shape` (see [`instance_shape`]).
pub fn build_rhs(equations: &[Equation], data: &[(String, ArrayD<f64>)], shape: &[usize]) -> Array2<f64> {
    let n = num_instances(shape);
    let mut rhs = Array2::<f64>::zeros((equations.len(), n));

    for ((equation, (_, array)), mut row) in equations.iter().zip(data).zip(rhs.rows_mut()) {
        let offset = equation.offset();
        if array.ndim() == 0 {
            let value = array.iter().next().copied().unwrap_or(0.0);
            row.fill(value - offset);
        } else {
            for (dst, src) in row.iter_mut().zip(array.iter()) {
                *dst = src - offset;
            }
        }
    }

    rhs
}

/// Builds the weights of every equation from `(equation string, weight array)` pairs.
///
/// Equations without an entry get unit weight. If an equation string occurs several times,
/// the weight applies to all of its rows.
///
/// # Errors
/// - `SolverError::UnknownEquation` if a weight names an equation that is not in the system
/// - `SolverError::InvalidWeight` for negative or non-finite weights
/// - `DimensionError::WeightShape` if a weight array is neither 0-d nor instance shaped
pub fn build_weights(
    equations: &[Equation],
    weights: &[(String, ArrayD<f64>)],
    shape: &[usize],
) -> Result<Weights, SolverError> {
    if weights.is_empty() {
        return Ok(Weights::Unit);
    }

    let mut rows_by_source: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, equation) in equations.iter().enumerate() {
        rows_by_source.entry(equation.source()).or_default().push(idx);
    }

    for (equation, array) in weights {
        if array.ndim() != 0 && array.shape() != shape {
            return Err(DimensionError::WeightShape {
                equation: equation.clone(),
                expected: shape.to_vec(),
                got: array.shape().to_vec(),
            }
            .into());
        }
        if let Some(bad) = array.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(SolverError::InvalidWeight {
                equation: equation.clone(),
                reason: format!("weights must be finite and non-negative, got {}", bad),
            });
        }
        if !rows_by_source.contains_key(equation.as_str()) {
            return Err(SolverError::UnknownEquation(equation.clone()));
        }
    }

    let per_instance = weights.iter().any(|(_, array)| array.ndim() != 0);
    if !per_instance {
        let mut per_equation = vec![1.0; equations.len()];
        for (equation, array) in weights {
            let value = array.iter().next().copied().unwrap_or(1.0);
            for &row in &rows_by_source[equation.as_str()] {
                per_equation[row] = value;
            }
        }
        if per_equation.iter().all(|&w| w == 1.0) {
            return Ok(Weights::Unit);
        }
        return Ok(Weights::PerEquation(per_equation));
    }

    let mut matrix = Array2::<f64>::ones((equations.len(), num_instances(shape)));
    for (equation, array) in weights {
        for &row in &rows_by_source[equation.as_str()] {
            let mut dst = matrix.row_mut(row);
            if array.ndim() == 0 {
                dst.fill(array.iter().next().copied().unwrap_or(1.0));
            } else {
                for (d, s) in dst.iter_mut().zip(array.iter()) {
                    *d = *s;
                }
            }
        }
    }
    Ok(Weights::PerInstance(matrix))
}

/// Assembles the dense design matrix (equations × columns).
pub fn build_dense(rows: &[Row], num_columns: usize) -> DMatrix<f64> {
    let mut matrix = DMatrix::<f64>::zeros(rows.len(), num_columns);
    for (r, row) in rows.iter().enumerate() {
        for &(c, value) in row {
            matrix[(r, c)] += value;
        }
    }
    matrix
}

/// Assembles the sparse design matrix (equations × columns) in CSR storage.
pub fn build_sparse(rows: &[Row], num_columns: usize) -> CsMat<f64> {
    let nnz = rows.iter().map(|row| row.len()).sum();
    let mut triplets = TriMat::with_capacity((rows.len(), num_columns), nnz);
    for (r, row) in rows.iter().enumerate() {
        for &(c, value) in row {
            triplets.add_triplet(r, c, value);
        }
    }
    triplets.to_csr()
}

/// Hashes the shape, sparsity pattern and coefficients of the design matrix.
pub fn fingerprint(rows: &[Row], num_columns: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    rows.len().hash(&mut hasher);
    num_columns.hash(&mut hasher);
    for row in rows {
        row.len().hash(&mut hasher);
        for &(c, value) in row {
            c.hash(&mut hasher);
            value.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// The exact coefficients of a design matrix next to their [`fingerprint`].
///
/// Two structures are equal only if their coefficients match bit for bit, so a fingerprint
/// collision never makes two different design matrices equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignStructure {
    fingerprint: u64,
    num_columns: usize,
    rows: Vec<Vec<(usize, u64)>>,
}

impl DesignStructure {
    pub fn new(rows: &[Row], num_columns: usize) -> Self {
        Self::with_fingerprint(fingerprint(rows, num_columns), rows, num_columns)
    }

    pub(crate) fn with_fingerprint(fingerprint: u64, rows: &[Row], num_columns: usize) -> Self {
        Self {
            fingerprint,
            num_columns,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|&(c, v)| (c, v.to_bits())).collect())
                .collect(),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}
