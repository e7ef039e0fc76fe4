//! Solved parameter values.
//!
//! A [`Solution`] maps every parameter name to an array of fitted values. Scalar parameters
//! have the instance shape of the data; vector parameters have their element axis in front,
//! `[len, instance_shape...]`. Parameters keep the order in which they first appeared in the
//! equations.

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

use colored::Colorize;
use ndarray::{Array, Array2, ArrayD, IxDyn};

use crate::errors::DimensionError;
use crate::registry::{ParameterRegistry, ParameterShape};

/// Fitted parameter values in order of first appearance.
#[derive(Clone, PartialEq)]
pub struct Solution {
    values: Vec<(String, ArrayD<f64>)>,
    lookup: HashMap<String, usize>,
}

impl Solution {
    /// Values of the named parameter.
    pub fn get(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.lookup.get(name).map(|&idx| &self.values[idx].1)
    }

    /// Iterates over `(name, values)` in order of first appearance.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f64>)> {
        self.values.iter().map(|(name, values)| (name.as_str(), values))
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the solution into a map from parameter name to values.
    pub fn into_map(self) -> HashMap<String, ArrayD<f64>> {
        self.values.into_iter().collect()
    }

    /// Flattens the solution back into a columns × instances matrix laid out like `registry`.
    pub(crate) fn pack(
        &self,
        registry: &ParameterRegistry,
        num_instances: usize,
    ) -> Result<Array2<f64>, DimensionError> {
        let mut x = Array2::<f64>::zeros((registry.num_columns(), num_instances));
        for info in registry.iter() {
            let values = self
                .get(&info.name)
                .ok_or_else(|| DimensionError::UnknownParameter(info.name.clone()))?;
            let width = info.shape.width();
            if values.len() != width * num_instances {
                return Err(DimensionError::InstanceShape {
                    equation: info.name.clone(),
                    expected: vec![width, num_instances],
                    got: values.shape().to_vec(),
                });
            }
            for (dst, src) in x
                .slice_mut(ndarray::s![info.columns(), ..])
                .iter_mut()
                .zip(values.iter())
            {
                *dst = *src;
            }
        }
        Ok(x)
    }
}

impl Index<&str> for Solution {
    type Output = ArrayD<f64>;

    /// # Panics
    /// Panics if the parameter is not part of the solution.
    fn index(&self, name: &str) -> &Self::Output {
        match self.get(name) {
            Some(values) => values,
            None => panic!("parameter '{}' is not part of the solution", name),
        }
    }
}

impl IntoIterator for Solution {
    type Item = (String, ArrayD<f64>);
    type IntoIter = std::vec::IntoIter<(String, ArrayD<f64>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl fmt::Debug for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Solution".bold())?;
        for (name, values) in &self.values {
            writeln!(
                f,
                "  {} {}",
                name.cyan(),
                format!("{:?}", values.shape()).dimmed()
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Slices the columns × instances solution into one array per parameter.
///
/// Row `c` of `x` holds the values of design matrix column `c` for every instance, in the
/// row-major order of `instance_shape`.
pub(crate) fn unpack(
    x: &Array2<f64>,
    registry: &ParameterRegistry,
    instance_shape: &[usize],
) -> Result<Solution, DimensionError> {
    let mut values = Vec::with_capacity(registry.len());
    let mut lookup = HashMap::with_capacity(registry.len());

    for info in registry.iter() {
        let block = x.slice(ndarray::s![info.columns(), ..]);
        let shape: Vec<usize> = match info.shape {
            ParameterShape::Scalar => instance_shape.to_vec(),
            ParameterShape::Vector(len) => {
                std::iter::once(len).chain(instance_shape.iter().copied()).collect()
            }
        };
        let array = Array::from_shape_vec(IxDyn(&shape), block.iter().copied().collect())
            .map_err(|_| DimensionError::InstanceShape {
                equation: info.name.clone(),
                expected: shape.clone(),
                got: block.shape().to_vec(),
            })?;

        lookup.insert(info.name.clone(), values.len());
        values.push((info.name.clone(), array));
    }

    Ok(Solution { values, lookup })
}
