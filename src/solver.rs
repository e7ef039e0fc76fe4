//! Batched least-squares solver.
//!
//! [`LinearSolver`] ties together parsing, assembly, factorization and unpacking. It is
//! built from `(equation string, data)` pairs where the data carries one measurement per
//! instance, and solves every instance against the same design matrix:
//!
//! 1. The design matrix is factorized once per group of instances with equal weights
//! 2. Factorizations are kept in a bounded per-solver cache and reused across `solve` calls
//! 3. Instances are solved in blocks of `chunk_size`, in parallel when enabled
//!
//! # Example
//!
//! ```
//! use linsolve::{LinearSolver, SolverOptions};
//!
//! let mut solver = LinearSolver::with_options(
//!     vec![
//!         ("g1 + g2", vec![3.0, 5.0]),
//!         ("g1 - g2", vec![1.0, 1.0]),
//!         ("2*g1 + g2", vec![5.0, 8.0]),
//!     ],
//!     SolverOptions::default().with_parallel(false),
//! )
//! .unwrap();
//!
//! let solution = solver.solve().unwrap();
//! let g2: Vec<f64> = solution["g2"].iter().copied().collect();
//! assert!((g2[0] - 1.0).abs() < 1e-10 && (g2[1] - 2.0).abs() < 1e-10);
//!
//! // same equations, new data: the cached factorization is reused
//! solver
//!     .set_data(vec![
//!         ("g1 + g2", vec![2.0]),
//!         ("g1 - g2", vec![0.0]),
//!         ("2*g1 + g2", vec![3.0]),
//!     ])
//!     .unwrap();
//! let _solution = solver.solve().unwrap();
//! assert_eq!(solver.cache_stats().hits, 1);
//! ```

use std::collections::HashSet;
use std::fmt;

use colored::Colorize;
use nalgebra::DMatrix;
use ndarray::{Array, Array2, ArrayD, IxDyn};
use rayon::prelude::*;

use crate::backends::{self, Backend, FactorSettings, Factorization};
use crate::cache::{CacheKey, CacheStats, FactorizationCache};
use crate::data::{collect_pairs, IntoInstanceArray};
use crate::errors::{DimensionError, SolverError};
use crate::options::{RankPolicy, SolverOptions};
use crate::solution::{unpack, Solution};
use crate::system::{InstanceSet, LinearSystem};

/// Solves a batch of linear least-squares problems sharing one design matrix.
pub struct LinearSolver {
    system: LinearSystem,
    options: SolverOptions,
    weights: Vec<(String, ArrayD<f64>)>,
    backend: Box<dyn Backend>,
    cache: FactorizationCache,
}

impl fmt::Debug for LinearSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {:?}\n", "Backend".cyan(), self.backend.kind())?;
        writeln!(
            f,
            "    {}: {}\n",
            "Equations".cyan(),
            self.system.num_equations()
        )?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "Parameters".cyan(),
            self.system.registry().names()
        )?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "Instances".cyan(),
            self.system.instance_shape()
        )?;
        writeln!(f, "    {}: {:?}\n", "Cache".cyan(), self.cache.stats())?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl fmt::Display for LinearSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} equations, {} columns, instances {:?}",
            "LinearSolver".bold(),
            self.system.num_equations(),
            self.system.num_columns(),
            self.system.instance_shape()
        )?;
        for equation in self.system.equations() {
            writeln!(f, "  {}", equation)?;
        }
        Ok(())
    }
}

impl LinearSolver {
    /// Creates a solver with default options.
    ///
    /// # Arguments
    /// * `data` - `(equation string, data)` pairs; the data holds one value per instance
    ///
    /// # Errors
    /// See [`LinearSolver::weighted`].
    pub fn new<I, S, A>(data: I) -> Result<Self, SolverError>
    where
        I: IntoIterator<Item = (S, A)>,
        S: Into<String>,
        A: IntoInstanceArray,
    {
        Self::build(collect_pairs(data), Vec::new(), SolverOptions::default())
    }

    /// Creates a solver with the given options.
    pub fn with_options<I, S, A>(data: I, options: SolverOptions) -> Result<Self, SolverError>
    where
        I: IntoIterator<Item = (S, A)>,
        S: Into<String>,
        A: IntoInstanceArray,
    {
        Self::build(collect_pairs(data), Vec::new(), options)
    }

    /// Creates a solver whose equations carry weights.
    ///
    /// # Arguments
    /// * `data` - `(equation string, data)` pairs
    /// * `weights` - `(equation string, weight)` pairs; a weight is either a single value
    ///   or an array of the instance shape. Unlisted equations have weight one.
    /// * `options` - Backend, tolerances, constants and vector parameters
    ///
    /// # Errors
    /// - `SolverError::InvalidOption` if `options` fail validation
    /// - `SolverError::NoEquations` if `data` is empty
    /// - `SolverError::Parse` naming the first equation that is not linear or not valid syntax
    /// - `SolverError::DimensionMismatch` for inconsistent data, weight or parameter shapes
    /// - `SolverError::UnknownEquation` / `SolverError::InvalidWeight` for bad weights
    pub fn weighted<I, S, A, J, T, B>(
        data: I,
        weights: J,
        options: SolverOptions,
    ) -> Result<Self, SolverError>
    where
        I: IntoIterator<Item = (S, A)>,
        S: Into<String>,
        A: IntoInstanceArray,
        J: IntoIterator<Item = (T, B)>,
        T: Into<String>,
        B: IntoInstanceArray,
    {
        Self::build(collect_pairs(data), collect_pairs(weights), options)
    }

    fn build(
        data: Vec<(String, ArrayD<f64>)>,
        weights: Vec<(String, ArrayD<f64>)>,
        options: SolverOptions,
    ) -> Result<Self, SolverError> {
        options.validate()?;
        let system = LinearSystem::build(data, weights.clone(), &options)?;
        let backend = backends::assemble(options.backend, &system);
        let cache = FactorizationCache::new(options.cache_capacity);

        Ok(Self {
            system,
            options,
            weights,
            backend,
            cache,
        })
    }

    /// Solves every instance in the least-squares sense.
    ///
    /// # Returns
    /// The fitted values of every parameter, shaped like the instance axis of the data
    ///
    /// # Errors
    /// - `SolverError::UnderdeterminedSystem` if there are fewer equations than unknowns,
    ///   no regularization and `RankPolicy::Strict`
    /// - `SolverError::LinAlg` if the design matrix is rank deficient under
    ///   `RankPolicy::Strict` or cannot be factorized
    pub fn solve(&mut self) -> Result<Solution, SolverError> {
        let equations = self.system.num_equations();
        let columns = self.system.num_columns();
        if equations < columns && self.options.regularization.is_none() {
            match self.options.rank_policy {
                RankPolicy::Strict => {
                    return Err(SolverError::UnderdeterminedSystem { equations, columns })
                }
                RankPolicy::PseudoInverse => log::warn!(
                    "underdetermined system: {} equations for {} unknowns, returning the minimum-norm solution",
                    equations,
                    columns
                ),
            }
        }

        let mut x = Array2::<f64>::zeros((columns, self.system.num_instances()));
        let settings = FactorSettings::new(&self.options, self.system.registry());
        let backend = &self.backend;

        for group in self.system.weight_groups() {
            let weights = group.weights.as_deref();
            let key = CacheKey::new(self.system.structure(), weights, &self.options);
            let factorization = self
                .cache
                .get_or_try_insert_with(key, || backend.factorize(weights, &settings))?;

            log::debug!(
                "solving {} instances with {} factorization",
                group.instances.len(),
                factorization.method()
            );
            solve_instances(
                self.system.rhs(),
                &*factorization,
                &group.instances,
                &self.options,
                &mut x,
            );
        }

        Ok(unpack(&x, self.system.registry(), self.system.instance_shape())?)
    }

    /// Replaces the data of every equation.
    ///
    /// If the equation list is unchanged (same strings, same order) the parsed system and
    /// every cached factorization are kept, and the current weights still apply. Otherwise
    /// the system is rebuilt, the cache is cleared and the weights are reset to one.
    ///
    /// On error the solver keeps its previous state.
    pub fn set_data<I, S, A>(&mut self, data: I) -> Result<(), SolverError>
    where
        I: IntoIterator<Item = (S, A)>,
        S: Into<String>,
        A: IntoInstanceArray,
    {
        let data = collect_pairs(data);
        if self.system.same_equations(&data) {
            return self.system.replace_data(data, &self.weights);
        }
        self.rebuild(data, Vec::new())
    }

    /// Replaces data and weights together.
    ///
    /// Cached factorizations are kept if the equation list is unchanged.
    pub fn set_weighted_data<I, S, A, J, T, B>(&mut self, data: I, weights: J) -> Result<(), SolverError>
    where
        I: IntoIterator<Item = (S, A)>,
        S: Into<String>,
        A: IntoInstanceArray,
        J: IntoIterator<Item = (T, B)>,
        T: Into<String>,
        B: IntoInstanceArray,
    {
        let data = collect_pairs(data);
        let weights = collect_pairs(weights);
        if self.system.same_equations(&data) {
            self.system.replace_data(data, &weights)?;
            self.weights = weights;
            self.prune_cache();
            return Ok(());
        }
        self.rebuild(data, weights)
    }

    /// Replaces the weights; equations without an entry get weight one.
    ///
    /// Cached factorizations for weights that are no longer in use are dropped.
    pub fn set_weights<J, T, B>(&mut self, weights: J) -> Result<(), SolverError>
    where
        J: IntoIterator<Item = (T, B)>,
        T: Into<String>,
        B: IntoInstanceArray,
    {
        let weights = collect_pairs(weights);
        self.system.set_weights(&weights)?;
        self.weights = weights;
        self.prune_cache();
        Ok(())
    }

    /// Replaces the options.
    ///
    /// Changing constants or vector parameters re-parses the equations with the current data
    /// and clears the cache. Other changes only alter the cache key of future factorizations.
    pub fn set_options(&mut self, options: SolverOptions) -> Result<(), SolverError> {
        options.validate()?;

        if options.changes_parsing(&self.options) {
            let data = self.system.raw_data().to_vec();
            let system = LinearSystem::build(data, self.weights.clone(), &options)?;
            self.backend = backends::assemble(options.backend, &system);
            self.system = system;
            self.cache.clear();
        } else if options.backend != self.backend.kind() {
            self.backend = backends::assemble(options.backend, &self.system);
        }

        self.cache.set_capacity(options.cache_capacity);
        self.options = options;
        Ok(())
    }

    /// Drops cached factorizations that no weight group of the current system uses.
    fn prune_cache(&mut self) {
        let live: HashSet<CacheKey> = self
            .system
            .weight_groups()
            .iter()
            .map(|group| {
                CacheKey::new(self.system.structure(), group.weights.as_deref(), &self.options)
            })
            .collect();
        self.cache.retain(|key| live.contains(key));
    }

    fn rebuild(
        &mut self,
        data: Vec<(String, ArrayD<f64>)>,
        weights: Vec<(String, ArrayD<f64>)>,
    ) -> Result<(), SolverError> {
        let system = LinearSystem::build(data, weights.clone(), &self.options)?;
        log::debug!("equation list changed, rebuilding system and clearing factorization cache");
        self.backend = backends::assemble(self.options.backend, &system);
        self.system = system;
        self.weights = weights;
        self.cache.clear();
        Ok(())
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn system(&self) -> &LinearSystem {
        &self.system
    }

    /// Model prediction `A·x + offset` of every equation, shaped like the instance axis.
    pub fn evaluate(&self, solution: &Solution) -> Result<Vec<(String, ArrayD<f64>)>, SolverError> {
        let x = solution.pack(self.system.registry(), self.system.num_instances())?;
        let predicted = self.system.predict(&x);
        self.system
            .equations()
            .iter()
            .zip(predicted.rows())
            .map(|(equation, row)| -> Result<(String, ArrayD<f64>), SolverError> {
                let array =
                    instance_array(equation.source(), row.to_vec(), self.system.instance_shape())?;
                Ok((equation.source().to_string(), array))
            })
            .collect()
    }

    /// Weighted residual sum of squares of every instance.
    pub fn chi_squared(&self, solution: &Solution) -> Result<ArrayD<f64>, SolverError> {
        let x = solution.pack(self.system.registry(), self.system.num_instances())?;
        Ok(instance_array(
            "chi-squared",
            self.system.chi_squared(&x),
            self.system.instance_shape(),
        )?)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Solves the instances of one weight group and scatters the results into `x`.
fn solve_instances(
    rhs: &Array2<f64>,
    factorization: &dyn Factorization,
    instances: &InstanceSet,
    options: &SolverOptions,
    x: &mut Array2<f64>,
) {
    let len = instances.len();
    let chunks: Vec<(usize, usize)> = (0..len)
        .step_by(options.chunk_size)
        .map(|start| (start, (start + options.chunk_size).min(len)))
        .collect();

    let solve_chunk = |&(start, end): &(usize, usize)| {
        let block = DMatrix::from_fn(rhs.nrows(), end - start, |i, k| {
            rhs[[i, instances.get(start + k)]]
        });
        (start, factorization.apply(&block))
    };

    let solved: Vec<(usize, DMatrix<f64>)> = if options.parallel && chunks.len() > 1 {
        chunks.par_iter().map(solve_chunk).collect()
    } else {
        chunks.iter().map(solve_chunk).collect()
    };

    for (start, block) in solved {
        for (k, column) in block.column_iter().enumerate() {
            let instance = instances.get(start + k);
            for (c, value) in column.iter().enumerate() {
                x[[c, instance]] = *value;
            }
        }
    }
}

/// Reshapes one value per instance into the instance shape; `label` names the values.
fn instance_array(
    label: &str,
    values: Vec<f64>,
    shape: &[usize],
) -> Result<ArrayD<f64>, DimensionError> {
    let len = values.len();
    Array::from_shape_vec(IxDyn(shape), values).map_err(|_| DimensionError::InstanceShape {
        equation: label.to_string(),
        expected: shape.to_vec(),
        got: vec![len],
    })
}
