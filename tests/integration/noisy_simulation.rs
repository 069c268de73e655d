//! Fits to noisy simulations with a fixed random seed.

use lensfit_rs::data::{Dataset, Simulation};
use lensfit_rs::fit::{FitContext, OptimizerKind};
use lensfit_rs::solver::ImageSolver;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::test_helpers::{sis_shear_system, source_points};

fn noisy_data(seed: u64, sigma_pos: f64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Dataset::simulate(
        &sis_shear_system(1.2, 0.05, -0.02),
        &ImageSolver::default(),
        &source_points(),
        &Simulation::default()
            .with_sigma_pos(sigma_pos)
            .with_source_flux(1.0)
            .with_noise(true),
        &mut rng,
    )
    .unwrap()
}

#[test]
fn test_same_seed_same_data() {
    assert_eq!(noisy_data(11, 0.002), noisy_data(11, 0.002));
    assert_ne!(noisy_data(11, 0.002), noisy_data(12, 0.002));
}

#[test]
fn test_noisy_fit_is_close_to_truth() {
    let data = noisy_data(11, 0.002);
    let n_images = data.n_images();

    let mut start = sis_shear_system(1.1, 0.05, -0.02);
    start.component_mut(0).unwrap().set_vary("b", true).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();

    assert!(result.status.is_converged(), "{}", result);
    let b = result.param("alpha0.b").unwrap();
    assert!((b - 1.2).abs() < 0.01, "b = {}", b);

    // with correct error bars the chi-square is of order the image count
    assert!(result.chisq.total() < 10.0 * n_images as f64, "{}", result.chisq);
}

#[test]
fn test_noisy_images_scatter_about_the_model() {
    let sigma = 0.002;
    let data = noisy_data(5, sigma);
    let system = sis_shear_system(1.2, 0.05, -0.02);
    let exact = ImageSolver::default()
        .solve(&system, &source_points()[0])
        .unwrap();

    for observed in &data.sources[0].images {
        let nearest = exact
            .iter()
            .map(|img| (img.image_position - observed.position).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest < 6.0 * sigma);
        assert_eq!(observed.sigma_pos, sigma);
    }
}
