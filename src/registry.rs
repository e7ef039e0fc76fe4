//! Parameter registry.
//!
//! Tracks every parameter of a linear system and assigns it a contiguous range of columns in
//! the design matrix. Scalar parameters take one column, vector parameters one column per
//! element. Columns are handed out in order of first appearance and never move for the
//! lifetime of the registry, so solution ordering is deterministic.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use crate::errors::DimensionError;
use crate::expr::ParamRef;
use crate::types::ColumnRange;

/// Shape of a parameter per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterShape {
    /// One value per instance
    Scalar,
    /// A fixed number of values per instance
    Vector(usize),
}

impl ParameterShape {
    /// Number of design matrix columns the parameter occupies.
    pub fn width(&self) -> usize {
        match self {
            ParameterShape::Scalar => 1,
            ParameterShape::Vector(len) => *len,
        }
    }
}

impl fmt::Display for ParameterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterShape::Scalar => write!(f, "scalar"),
            ParameterShape::Vector(len) => write!(f, "vector of length {}", len),
        }
    }
}

/// A registered parameter and its column placement.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub shape: ParameterShape,
    pub offset: usize,
}

impl ParameterInfo {
    /// The columns occupied by this parameter.
    pub fn columns(&self) -> ColumnRange {
        self.offset..self.offset + self.shape.width()
    }
}

/// Assigns stable column ranges to named parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    parameters: Vec<ParameterInfo>,
    lookup: HashMap<String, usize>,
    num_columns: usize,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the column range of `name`, allocating it if the name is new.
    ///
    /// # Errors
    /// Returns `DimensionError::ParameterLength` if `name` is already registered with a
    /// different shape.
    ///
    /// # Example
    /// ```
    /// # use linsolve::registry::{ParameterRegistry, ParameterShape};
    /// let mut registry = ParameterRegistry::new();
    /// assert_eq!(registry.get_or_create("g1", ParameterShape::Scalar).unwrap(), 0..1);
    /// assert_eq!(registry.get_or_create("v", ParameterShape::Vector(3)).unwrap(), 1..4);
    /// assert_eq!(registry.get_or_create("g1", ParameterShape::Scalar).unwrap(), 0..1);
    /// assert!(registry.get_or_create("v", ParameterShape::Vector(2)).is_err());
    /// ```
    pub fn get_or_create(
        &mut self,
        name: &str,
        shape: ParameterShape,
    ) -> Result<Range<usize>, DimensionError> {
        if let Some(&idx) = self.lookup.get(name) {
            let existing = &self.parameters[idx];
            if existing.shape != shape {
                return Err(DimensionError::ParameterLength {
                    parameter: name.to_string(),
                    existing: existing.shape.to_string(),
                    requested: shape.to_string(),
                });
            }
            return Ok(existing.columns());
        }

        let info = ParameterInfo {
            name: name.to_string(),
            shape,
            offset: self.num_columns,
        };
        let columns = info.columns();
        self.num_columns += shape.width();
        self.lookup.insert(name.to_string(), self.parameters.len());
        self.parameters.push(info);
        Ok(columns)
    }

    /// Returns the registered parameter with the given name.
    pub fn get(&self, name: &str) -> Option<&ParameterInfo> {
        self.lookup.get(name).map(|&idx| &self.parameters[idx])
    }

    /// Resolves a parameter reference to its column.
    pub fn column(&self, param: &ParamRef) -> Result<usize, DimensionError> {
        let info = self
            .get(&param.name)
            .ok_or_else(|| DimensionError::UnknownParameter(param.name.clone()))?;
        match (info.shape, param.element) {
            (ParameterShape::Scalar, None) => Ok(info.offset),
            (ParameterShape::Scalar, Some(_)) => {
                Err(DimensionError::UnexpectedElement(param.name.clone()))
            }
            (ParameterShape::Vector(_), None) => {
                Err(DimensionError::MissingElement(param.name.clone()))
            }
            (ParameterShape::Vector(length), Some(index)) if index >= length => {
                Err(DimensionError::ElementOutOfRange {
                    parameter: param.name.clone(),
                    index,
                    length,
                })
            }
            (ParameterShape::Vector(_), Some(index)) => Ok(info.offset + index),
        }
    }

    /// Human readable label of a column: `g1` for scalars, `v[2]` for vector elements.
    pub fn column_label(&self, column: usize) -> Option<String> {
        let idx = self
            .parameters
            .partition_point(|info| info.offset + info.shape.width() <= column);
        let info = self.parameters.get(idx)?;
        match info.shape {
            ParameterShape::Scalar => Some(info.name.clone()),
            ParameterShape::Vector(_) => Some(format!("{}[{}]", info.name, column - info.offset)),
        }
    }

    /// Labels for a set of columns, skipping columns out of range.
    pub fn column_labels(&self, columns: impl IntoIterator<Item = usize>) -> Vec<String> {
        columns
            .into_iter()
            .filter_map(|column| self.column_label(column))
            .collect()
    }

    /// Iterates over parameters in order of first appearance.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.parameters.iter()
    }

    /// Parameter names in order of first appearance.
    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Total number of columns allocated.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_order() {
        let mut registry = ParameterRegistry::new();
        registry.get_or_create("z", ParameterShape::Scalar).unwrap();
        registry.get_or_create("a", ParameterShape::Scalar).unwrap();
        registry.get_or_create("z", ParameterShape::Scalar).unwrap();
        assert_eq!(registry.names(), vec!["z", "a"]);
        assert_eq!(registry.num_columns(), 2);
    }

    #[test]
    fn test_vector_columns_are_contiguous() {
        let mut registry = ParameterRegistry::new();
        registry.get_or_create("g", ParameterShape::Scalar).unwrap();
        let range = registry
            .get_or_create("v", ParameterShape::Vector(3))
            .unwrap();
        assert_eq!(range, 1..4);
        registry.get_or_create("h", ParameterShape::Scalar).unwrap();
        assert_eq!(registry.get("h").unwrap().offset, 4);
        assert_eq!(registry.column(&ParamRef::element("v", 2)).unwrap(), 3);
    }

    #[test]
    fn test_conflicting_shape() {
        let mut registry = ParameterRegistry::new();
        registry.get_or_create("g", ParameterShape::Scalar).unwrap();
        let result = registry.get_or_create("g", ParameterShape::Vector(2));
        assert!(matches!(
            result,
            Err(DimensionError::ParameterLength { parameter, .. }) if parameter == "g"
        ));
    }

    #[test]
    fn test_column_resolution_errors() {
        let mut registry = ParameterRegistry::new();
        registry.get_or_create("g", ParameterShape::Scalar).unwrap();
        registry
            .get_or_create("v", ParameterShape::Vector(2))
            .unwrap();

        assert!(matches!(
            registry.column(&ParamRef::element("g", 0)),
            Err(DimensionError::UnexpectedElement(_))
        ));
        assert!(matches!(
            registry.column(&ParamRef::scalar("v")),
            Err(DimensionError::MissingElement(_))
        ));
        assert!(matches!(
            registry.column(&ParamRef::element("v", 2)),
            Err(DimensionError::ElementOutOfRange { index: 2, length: 2, .. })
        ));
        assert!(matches!(
            registry.column(&ParamRef::scalar("missing")),
            Err(DimensionError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_column_labels() {
        let mut registry = ParameterRegistry::new();
        registry.get_or_create("g", ParameterShape::Scalar).unwrap();
        registry
            .get_or_create("v", ParameterShape::Vector(2))
            .unwrap();
        assert_eq!(registry.column_label(0).as_deref(), Some("g"));
        assert_eq!(registry.column_label(2).as_deref(), Some("v[1]"));
        assert_eq!(registry.column_label(3), None);
        assert_eq!(registry.column_labels([1, 0, 7]), vec!["v[0]", "g"]);
    }
}
