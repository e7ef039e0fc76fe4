//! Parsed and assembled linear systems.
//!
//! A [`LinearSystem`] owns everything derived from the caller's equations and data:
//!
//! - The parsed equations and their resolved rows
//! - The parameter registry with stable column assignments
//! - The batched right-hand side (equations × instances, offsets subtracted)
//! - The equation weights and their grouping into instances that can share a factorization
//!
//! The design matrix itself is assembled by the backends from [`LinearSystem::rows`], so the
//! system stays independent of the dense or sparse representation.
//!
//! # Example
//!
//! ```
//! use linsolve::data::IntoInstanceArray;
//! use linsolve::system::LinearSystem;
//! use linsolve::SolverOptions;
//!
//! let data = vec![
//!     ("g1 + g2".to_string(), vec![3.0, 5.0].into_instance_array()),
//!     ("g1 - g2 + 1".to_string(), vec![2.0, 2.0].into_instance_array()),
//! ];
//! let system = LinearSystem::build(data, Vec::new(), &SolverOptions::default()).unwrap();
//!
//! assert_eq!(system.num_equations(), 2);
//! assert_eq!(system.num_columns(), 2);
//! assert_eq!(system.instance_shape(), &[2]);
//! // the offset of the second equation is moved to the right-hand side
//! assert_eq!(system.rhs().row(1).to_vec(), vec![1.0, 1.0]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array2, ArrayD};

use crate::builder::{
    build_rhs, build_weights, instance_shape, num_instances, resolve_rows, DesignStructure,
};
use crate::equation::Equation;
use crate::errors::SolverError;
use crate::options::SolverOptions;
use crate::registry::ParameterRegistry;
use crate::types::Row;

/// Weights of all equations of a system.
#[derive(Debug, Clone, PartialEq)]
pub enum Weights {
    /// Every equation has weight one
    Unit,
    /// One weight per equation, shared by all instances
    PerEquation(Vec<f64>),
    /// One weight per equation and instance (equations × instances)
    PerInstance(Array2<f64>),
}

/// Instances covered by a weight group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceSet {
    /// Every instance `0..n`
    All(usize),
    /// An explicit, ascending list of instance indices
    Indices(Vec<usize>),
}

impl InstanceSet {
    pub fn len(&self) -> usize {
        match self {
            InstanceSet::All(n) => *n,
            InstanceSet::Indices(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The instance index at position `pos` of the set.
    pub fn get(&self, pos: usize) -> usize {
        match self {
            InstanceSet::All(_) => pos,
            InstanceSet::Indices(indices) => indices[pos],
        }
    }
}

/// Instances that share one weight column and therefore one factorization.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGroup {
    /// Per-equation weights, `None` for unit weights
    pub weights: Option<Vec<f64>>,
    pub instances: InstanceSet,
}

/// A parsed linear system together with its batched data.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    equations: Vec<Equation>,
    registry: ParameterRegistry,
    rows: Vec<Row>,
    structure: Arc<DesignStructure>,
    data: Vec<(String, ArrayD<f64>)>,
    instance_shape: Vec<usize>,
    rhs: Array2<f64>,
    weights: Weights,
}

impl LinearSystem {
    /// Parses the equations and assembles the system.
    ///
    /// # Arguments
    /// * `data` - `(equation string, data array)` pairs in the order of the system rows
    /// * `weights` - `(equation string, weight array)` pairs; missing equations get unit weight
    /// * `options` - Named constants and vector parameter declarations used while parsing
    ///
    /// # Errors
    /// - `SolverError::NoEquations` if `data` is empty
    /// - `SolverError::Parse` with the offending equation string
    /// - `SolverError::DimensionMismatch` for inconsistent shapes
    /// - `SolverError::UnknownEquation` / `SolverError::InvalidWeight` for bad weights
    pub fn build(
        data: Vec<(String, ArrayD<f64>)>,
        weights: Vec<(String, ArrayD<f64>)>,
        options: &SolverOptions,
    ) -> Result<Self, SolverError> {
        if data.is_empty() {
            return Err(SolverError::NoEquations);
        }

        let equations = data
            .iter()
            .map(|(source, _)| {
                Equation::parse_with_constants(source, &options.constants)
                    .map_err(|e| SolverError::parse(source, e))
            })
            .collect::<Result<Vec<_>, SolverError>>()?;

        let (registry, rows) = resolve_rows(&equations, &options.vectors)?;
        let shape = instance_shape(&data)?;
        let rhs = build_rhs(&equations, &data, &shape);
        let weights = build_weights(&equations, &weights, &shape)?;
        let structure = Arc::new(DesignStructure::new(&rows, registry.num_columns()));

        log::debug!(
            "assembled linear system: {} equations, {} parameters ({} columns), {} instances",
            equations.len(),
            registry.len(),
            registry.num_columns(),
            num_instances(&shape)
        );

        Ok(Self {
            equations,
            registry,
            rows,
            structure,
            data,
            instance_shape: shape,
            rhs,
            weights,
        })
    }

    /// Returns true if `data` lists exactly the equations of this system, in the same order.
    pub fn same_equations(&self, data: &[(String, ArrayD<f64>)]) -> bool {
        self.equations.len() == data.len()
            && self
                .equations
                .iter()
                .zip(data)
                .all(|(equation, (source, _))| equation.source() == source)
    }

    /// Replaces the data and weights of a system with an unchanged equation list.
    ///
    /// The system is left untouched if the new data or weights are rejected.
    ///
    /// # Errors
    /// Returns `SolverError::UnknownEquation` if the equation list differs, and the shape and
    /// weight errors of [`LinearSystem::build`] otherwise.
    pub fn replace_data(
        &mut self,
        data: Vec<(String, ArrayD<f64>)>,
        weights: &[(String, ArrayD<f64>)],
    ) -> Result<(), SolverError> {
        if !self.same_equations(&data) {
            let unknown = data
                .iter()
                .zip(&self.equations)
                .find(|((source, _), equation)| equation.source() != source)
                .map(|((source, _), _)| source.clone())
                .unwrap_or_default();
            return Err(SolverError::UnknownEquation(unknown));
        }

        let shape = instance_shape(&data)?;
        let rhs = build_rhs(&self.equations, &data, &shape);
        let weights = build_weights(&self.equations, weights, &shape)?;

        self.instance_shape = shape;
        self.rhs = rhs;
        self.weights = weights;
        self.data = data;
        Ok(())
    }

    /// Replaces the weights, keeping equations and data.
    pub fn set_weights(&mut self, weights: &[(String, ArrayD<f64>)]) -> Result<(), SolverError> {
        self.weights = build_weights(&self.equations, weights, &self.instance_shape)?;
        Ok(())
    }

    /// Partitions the instances into groups with identical weight columns.
    ///
    /// Unit and per-equation weights give a single group covering every instance. Groups are
    /// returned in order of their first instance.
    pub fn weight_groups(&self) -> Vec<WeightGroup> {
        let n = self.num_instances();
        match &self.weights {
            Weights::Unit => vec![WeightGroup {
                weights: None,
                instances: InstanceSet::All(n),
            }],
            Weights::PerEquation(w) => vec![WeightGroup {
                weights: Some(w.clone()),
                instances: InstanceSet::All(n),
            }],
            Weights::PerInstance(matrix) => {
                let mut lookup: HashMap<Vec<u64>, usize> = HashMap::new();
                let mut groups: Vec<(Vec<f64>, Vec<usize>)> = Vec::new();
                for (k, column) in matrix.columns().into_iter().enumerate() {
                    let key: Vec<u64> = column.iter().map(|w| w.to_bits()).collect();
                    let idx = *lookup.entry(key).or_insert_with(|| {
                        groups.push((column.to_vec(), Vec::new()));
                        groups.len() - 1
                    });
                    groups[idx].1.push(k);
                }

                let single = groups.len() == 1;
                groups
                    .into_iter()
                    .map(|(weights, indices)| {
                        let weights = if weights.iter().all(|&w| w == 1.0) {
                            None
                        } else {
                            Some(weights)
                        };
                        let instances = if single {
                            InstanceSet::All(n)
                        } else {
                            InstanceSet::Indices(indices)
                        };
                        WeightGroup { weights, instances }
                    })
                    .collect()
            }
        }
    }

    /// The `(equation string, data array)` pairs the system was built from, as given.
    pub fn raw_data(&self) -> &[(String, ArrayD<f64>)] {
        &self.data
    }

    /// Evaluates `A·x + offset` for every equation and instance.
    ///
    /// `x` holds one column per instance and one row per design matrix column.
    pub fn predict(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((self.num_equations(), x.ncols()));
        for ((row, equation), mut dst) in self
            .rows
            .iter()
            .zip(&self.equations)
            .zip(out.rows_mut())
        {
            dst.fill(equation.offset());
            for &(c, coefficient) in row {
                dst.scaled_add(coefficient, &x.row(c));
            }
        }
        out
    }

    /// Weighted squared residual `Σ_i w_i (A·x - b)_i²` per instance.
    pub fn chi_squared(&self, x: &Array2<f64>) -> Vec<f64> {
        let mut residuals = self.predict(x);
        for ((mut res, equation), rhs) in residuals
            .rows_mut()
            .into_iter()
            .zip(&self.equations)
            .zip(self.rhs.rows())
        {
            let offset = equation.offset();
            res.zip_mut_with(&rhs, |r, b| *r -= b + offset);
        }

        (0..residuals.ncols())
            .map(|k| {
                residuals
                    .column(k)
                    .iter()
                    .enumerate()
                    .map(|(i, r)| self.weight(i, k) * r * r)
                    .sum()
            })
            .collect()
    }

    /// Weight of equation `i` in instance `k`.
    pub fn weight(&self, i: usize, k: usize) -> f64 {
        match &self.weights {
            Weights::Unit => 1.0,
            Weights::PerEquation(w) => w[i],
            Weights::PerInstance(matrix) => matrix[[i, k]],
        }
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Resolved rows of the design matrix.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Right-hand side, equations × instances.
    pub fn rhs(&self) -> &Array2<f64> {
        &self.rhs
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn instance_shape(&self) -> &[usize] {
        &self.instance_shape
    }

    pub fn num_equations(&self) -> usize {
        self.equations.len()
    }

    /// Number of unknowns per instance (design matrix columns).
    pub fn num_columns(&self) -> usize {
        self.registry.num_columns()
    }

    pub fn num_instances(&self) -> usize {
        num_instances(&self.instance_shape)
    }

    /// Hash of the design matrix shape, sparsity pattern and coefficients.
    pub fn fingerprint(&self) -> u64 {
        self.structure.fingerprint()
    }

    /// Exact coefficients of the design matrix, shared with the factorization cache.
    pub fn structure(&self) -> &Arc<DesignStructure> {
        &self.structure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::IntoInstanceArray;
    use crate::errors::ParseError;
    use ndarray::array;

    fn data(items: &[(&str, Vec<f64>)]) -> Vec<(String, ArrayD<f64>)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone().into_instance_array()))
            .collect()
    }

    #[test]
    fn test_build() -> Result<(), Box<dyn std::error::Error>> {
        let system = LinearSystem::build(
            data(&[("g1 + g2", vec![1.0, 2.0, 3.0]), ("2*g2 - 1", vec![0.0, 1.0, 2.0])]),
            Vec::new(),
            &SolverOptions::default(),
        )?;
        assert_eq!(system.num_equations(), 2);
        assert_eq!(system.num_columns(), 2);
        assert_eq!(system.num_instances(), 3);
        assert_eq!(system.rhs().row(1).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(system.rows()[1], vec![(1, 2.0)]);
        Ok(())
    }

    #[test]
    fn test_parse_error_names_equation() {
        let result = LinearSystem::build(
            data(&[("g1 + g2", vec![1.0]), ("g1*g2", vec![1.0])]),
            Vec::new(),
            &SolverOptions::default(),
        );
        match result {
            Err(SolverError::Parse { equation, source }) => {
                assert_eq!(equation, "g1*g2");
                assert!(matches!(source, ParseError::Nonlinear { .. }));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_no_equations() {
        let result = LinearSystem::build(Vec::new(), Vec::new(), &SolverOptions::default());
        assert!(matches!(result, Err(SolverError::NoEquations)));
    }

    #[test]
    fn test_constants_are_substituted() -> Result<(), Box<dyn std::error::Error>> {
        let options = SolverOptions::default().with_constant("k", 3.0);
        let system = LinearSystem::build(data(&[("k*g1 + k", vec![6.0])]), Vec::new(), &options)?;
        assert_eq!(system.num_columns(), 1);
        assert_eq!(system.rows()[0], vec![(0, 3.0)]);
        assert_eq!(system.rhs()[[0, 0]], 3.0);
        Ok(())
    }

    #[test]
    fn test_replace_data_is_atomic() -> Result<(), Box<dyn std::error::Error>> {
        let mut system = LinearSystem::build(
            data(&[("g1", vec![1.0, 2.0]), ("g2", vec![3.0, 4.0])]),
            Vec::new(),
            &SolverOptions::default(),
        )?;
        let fingerprint = system.fingerprint();

        let bad = data(&[("g1", vec![1.0, 2.0, 3.0]), ("g2", vec![3.0, 4.0])]);
        assert!(system.replace_data(bad, &[]).is_err());
        assert_eq!(system.num_instances(), 2);

        let renamed = data(&[("g1", vec![1.0]), ("g3", vec![3.0])]);
        assert!(matches!(
            system.replace_data(renamed, &[]),
            Err(SolverError::UnknownEquation(name)) if name == "g3"
        ));

        system.replace_data(data(&[("g1", vec![5.0; 4]), ("g2", vec![6.0; 4])]), &[])?;
        assert_eq!(system.num_instances(), 4);
        assert_eq!(system.fingerprint(), fingerprint);
        Ok(())
    }

    #[test]
    fn test_weight_groups() -> Result<(), Box<dyn std::error::Error>> {
        let weights = vec![(
            "g1".to_string(),
            array![1.0, 2.0, 1.0, 2.0, 3.0].into_instance_array(),
        )];
        let system = LinearSystem::build(
            data(&[("g1", vec![0.0; 5]), ("g1 + g2", vec![0.0; 5])]),
            weights,
            &SolverOptions::default(),
        )?;

        let groups = system.weight_groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].weights, None);
        assert_eq!(groups[0].instances, InstanceSet::Indices(vec![0, 2]));
        assert_eq!(groups[1].weights, Some(vec![2.0, 1.0]));
        assert_eq!(groups[1].instances, InstanceSet::Indices(vec![1, 3]));
        assert_eq!(groups[2].instances.get(0), 4);
        assert_eq!(system.weight(0, 4), 3.0);
        Ok(())
    }

    #[test]
    fn test_uniform_instance_weights_form_one_group() -> Result<(), Box<dyn std::error::Error>> {
        let weights = vec![("g1".to_string(), array![2.0, 2.0].into_instance_array())];
        let system = LinearSystem::build(
            data(&[("g1", vec![0.0; 2]), ("g2", vec![0.0; 2])]),
            weights,
            &SolverOptions::default(),
        )?;
        let groups = system.weight_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].instances, InstanceSet::All(2));
        Ok(())
    }

    #[test]
    fn test_raw_data_is_kept_exactly() -> Result<(), Box<dyn std::error::Error>> {
        // 1e-20 - 1 + 1 is 0 in double precision
        let original = data(&[("g1 + 1", vec![1e-20, 2.5]), ("g2", vec![3.0, 4.0])]);
        let mut system =
            LinearSystem::build(original.clone(), Vec::new(), &SolverOptions::default())?;
        assert_eq!(system.raw_data(), original.as_slice());
        assert_eq!(system.raw_data()[0].1[[0]].to_bits(), 1e-20_f64.to_bits());

        let replaced = data(&[("g1 + 1", vec![1e-30]), ("g2", vec![5.0])]);
        system.replace_data(replaced.clone(), &[])?;
        assert_eq!(system.raw_data(), replaced.as_slice());
        Ok(())
    }

    #[test]
    fn test_predict_and_chi_squared() -> Result<(), Box<dyn std::error::Error>> {
        let system = LinearSystem::build(
            data(&[("g1 + g2 + 1", vec![4.0]), ("g1 - g2", vec![2.0])]),
            vec![("g1 - g2".to_string(), 2.0_f64.into_instance_array())],
            &SolverOptions::default(),
        )?;
        let x = array![[2.0], [1.0]];
        let predicted = system.predict(&x);
        assert_eq!(predicted.column(0).to_vec(), vec![4.0, 1.0]);
        // only the weighted second equation misses by one
        assert_eq!(system.chi_squared(&x), vec![2.0]);
        Ok(())
    }
}
