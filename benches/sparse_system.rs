//! Sparse System Benchmark
//!
//! A system with many independent parameters and a modest number of instances. Each
//! equation touches only 5 of the parameters, so the design matrix is mostly zeros and the
//! sparse backend can exploit its structure.
//!
//! ## System Description
//!
//! - `n` scalar parameters, each with true values `0, 1, ..., 99`
//! - `2.5 n` equations, each the sum of 5 distinct randomly chosen parameters
//! - 100 instances sharing the design matrix
//!
//! ## Implementations Compared
//!
//! 1. **Sparse**: CSR design matrix, LDLᵀ of the sparse normal equations
//! 2. **Dense**: `nalgebra` design matrix, Cholesky of the dense normal equations
//!
//! Both include assembly and factorization, since those dominate for this shape.
//!
//! ## Usage
//!
//! Run with: `cargo bench --bench sparse_system`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use linsolve::{DenseMethod, LinearSolver, SolverOptions};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const SIZE: usize = 100;
const TERMS: usize = 5;

/// Random 5-term sums over `num_params` parameters.
fn build_data(num_params: usize, num_equations: usize) -> Vec<(String, Vec<f64>)> {
    let mut rng = StdRng::seed_from_u64(0);
    let params: Vec<usize> = (0..num_params).collect();

    (0..num_equations)
        .map(|_| {
            let chosen: Vec<usize> = params.choose_multiple(&mut rng, TERMS).copied().collect();
            let equation = chosen
                .iter()
                .map(|p| format!("g{}", p))
                .collect::<Vec<_>>()
                .join("+");
            let data = (0..SIZE).map(|k| (k * TERMS) as f64).collect();
            (equation, data)
        })
        .collect()
}

fn benchmark_sparse_vs_dense(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sparse System");
    group.sample_size(10);

    for num_params in [200, 2000] {
        let data = build_data(num_params, num_params * 5 / 2);

        group.bench_with_input(BenchmarkId::new("Sparse", num_params), &data, |b, data| {
            b.iter_batched(
                || data.clone(),
                |data| {
                    let solution =
                        LinearSolver::with_options(data, SolverOptions::default().sparse(true))
                            .and_then(|mut solver| solver.solve());
                    black_box(solution)
                },
                BatchSize::LargeInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("Dense", num_params), &data, |b, data| {
            b.iter_batched(
                || data.clone(),
                |data| {
                    let options =
                        SolverOptions::default().with_dense_method(DenseMethod::Cholesky);
                    let solution = LinearSolver::with_options(data, options)
                        .and_then(|mut solver| solver.solve());
                    black_box(solution)
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_sparse_vs_dense);
criterion_main!(benches);
