//! Benchmarks for image finding and chi-square evaluation.
//!
//! The solver runs once per source for every trial of a fit, so its cost
//! sets the cost of fitting.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lensfit_rs::data::{Dataset, Simulation};
use lensfit_rs::fit::{FitConfig, FitContext};
use lensfit_rs::lens::{LensComponent, LensSystem};
use lensfit_rs::profiles::{Alpha, AlphaConfig, Shear, ShearConfig};
use lensfit_rs::solver::{ImageSolver, SolverConfig};
use nalgebra::Point2;

fn lens(q: f64) -> LensSystem {
    let alpha = Alpha::new(AlphaConfig {
        b: 4.5,
        q,
        theta: 30.0,
        xc: 0.7,
        yc: 0.3,
        ..AlphaConfig::default()
    })
    .unwrap();
    let shear = Shear::new(ShearConfig {
        shear: 0.02,
        theta: 10.0,
        ..ShearConfig::default()
    })
    .unwrap();

    let mut system = LensSystem::new();
    system.add(LensComponent::from_profile(alpha)).unwrap();
    system.add(LensComponent::from_profile(shear)).unwrap();
    system
}

fn bench_solve(c: &mut Criterion) {
    let source = Point2::new(0.5, 0.1);
    let mut group = c.benchmark_group("solve");

    // q = 1 takes the closed form, q < 1 integrates numerically
    for (label, q) in [("spherical", 1.0), ("elliptical", 0.8)] {
        let system = lens(q);
        let solver = ImageSolver::default();
        group.bench_function(label, |b| {
            b.iter(|| solver.solve(black_box(&system), black_box(&source)))
        });
    }
    group.finish();
}

fn bench_grid_size(c: &mut Criterion) {
    let system = lens(0.8);
    let source = Point2::new(0.5, 0.1);
    let mut group = c.benchmark_group("grid_size");
    group.sample_size(20);

    for n in [20, 40, 80] {
        let solver = ImageSolver::new(SolverConfig::default().with_grid_size(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| solver.solve(black_box(&system), black_box(&source)))
        });
    }
    group.finish();
}

fn bench_chisq(c: &mut Criterion) {
    let system = lens(0.8);
    let sources: Vec<Point2<f64>> = (0..8)
        .map(|i| Point2::new(0.45 + 0.02 * i as f64, 0.1 + 0.01 * i as f64))
        .collect();
    let data = Dataset::simulate(
        &system,
        &ImageSolver::default(),
        &sources,
        &Simulation::default().with_source_flux(1.0),
        &mut rand::thread_rng(),
    )
    .unwrap();

    let mut group = c.benchmark_group("chisq_8_sources");
    group.sample_size(10);
    for parallel in [false, true] {
        let fit = FitContext::new(system.clone(), data.clone())
            .unwrap()
            .with_config(FitConfig::default().with_parallel(parallel));
        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_function(label, |b| b.iter(|| fit.chisq()));
    }
    group.finish();
}

criterion_group!(benches, bench_solve, bench_grid_size, bench_chisq);
criterion_main!(benches);
