//! Fits to noise-free synthetic data must land on the true lens.

use approx::assert_relative_eq;
use lensfit_rs::data::{Dataset, ObservedImage, SourceData};
use lensfit_rs::fit::{AnnealingConfig, FitConfig, FitContext, FitStatus, OptimizerKind};
use lensfit_rs::lens::{LensComponent, LensSystem};
use lensfit_rs::profiles::{Alpha, AlphaConfig, MassSheet, MassSheetConfig};

use nalgebra::Point2;

use crate::test_helpers::{elliptical_system, exact_data, sis_shear_system, source_points};

const TRUE_B: f64 = 1.2;
const TRUE_XC: f64 = 0.05;
const TRUE_YC: f64 = -0.02;

fn truth() -> LensSystem {
    sis_shear_system(TRUE_B, TRUE_XC, TRUE_YC)
}

/// Drop the recorded source positions and fluxes.
fn without_sources(mut data: Dataset) -> Dataset {
    for record in &mut data.sources {
        record.source_position = None;
        record.source_flux = None;
    }
    data
}

#[test]
fn test_recover_lens_position_and_strength() {
    let data = exact_data(&truth(), &source_points());

    let mut start = sis_shear_system(1.15, 0.0, 0.0);
    let lens = start.component_mut(0).unwrap();
    lens.set_vary_flags_from_ints(&[1, 0, 0, 0, 0, 1, 1]).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();

    assert!(result.status.is_converged(), "{}", result);
    assert_relative_eq!(result.param("alpha0.b").unwrap(), TRUE_B, epsilon = 2e-3);
    assert_relative_eq!(result.param("alpha0.xc").unwrap(), TRUE_XC, epsilon = 2e-3);
    assert_relative_eq!(result.param("alpha0.yc").unwrap(), TRUE_YC, epsilon = 2e-3);
    assert!(result.chisq.total() < 1e-2, "{}", result.chisq);
}

#[test]
fn test_recover_with_estimated_sources() {
    let data = without_sources(exact_data(&truth(), &source_points()));

    let mut start = sis_shear_system(1.15, 0.0, 0.0);
    let lens = start.component_mut(0).unwrap();
    lens.set_vary_flags_from_ints(&[1, 0, 0, 0, 0, 1, 1]).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();

    assert!(result.status.is_converged(), "{}", result);
    assert_relative_eq!(result.param("alpha0.b").unwrap(), TRUE_B, epsilon = 2e-3);
    assert_relative_eq!(result.param("alpha0.xc").unwrap(), TRUE_XC, epsilon = 2e-3);
    assert_relative_eq!(result.param("alpha0.yc").unwrap(), TRUE_YC, epsilon = 2e-3);
}

#[test]
fn test_recover_external_shear() {
    let data = exact_data(&truth(), &source_points());

    let mut start = truth();
    let shear = start.component_mut(1).unwrap();
    shear.set_param("shear", 0.06).unwrap();
    shear.set_param("theta", 25.0).unwrap();
    shear.set_vary_flags(&[true, true, false, false]).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();

    assert!(result.status.is_converged(), "{}", result);
    assert_relative_eq!(result.param("shear1.shear").unwrap(), 0.08, epsilon = 1e-3);
    assert_relative_eq!(result.param("shear1.theta").unwrap(), 20.0, epsilon = 0.1);

    // only the free parameters moved
    let fitted = fit.system().component(0).unwrap();
    assert_eq!(fitted.param("b").unwrap().value, TRUE_B);
}

#[test]
fn test_recover_ellipticity_and_orientation() {
    let sources = [Point2::new(0.5, 0.1), Point2::new(0.9, 0.2)];
    let data = exact_data(&elliptical_system(), &sources);

    let mut start = elliptical_system();
    let lens = start.component_mut(0).unwrap();
    lens.set_param("q", 0.75).unwrap();
    lens.set_param("theta", 35.0).unwrap();
    lens.set_vary_flags_from_ints(&[0, 0, 0, 1, 1, 0, 0]).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();

    assert!(result.status.is_converged(), "{}", result);
    assert_relative_eq!(result.param("alpha0.q").unwrap(), 0.8, epsilon = 2e-3);
    assert_relative_eq!(result.param("alpha0.theta").unwrap(), 30.0, epsilon = 0.5);
    assert!(result.chisq.total() < 1e-2, "{}", result.chisq);
}

#[test]
fn test_image_plane_fit_with_flux() {
    let data = without_sources(exact_data(&truth(), &source_points()));

    let mut start = truth();
    let lens = start.component_mut(0).unwrap();
    lens.set_param("b", 1.1).unwrap();
    lens.set_vary("b", true).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    fit.include_flux_chisq(true);
    fit.use_image_plane_chisq(true);

    let initial = fit.chisq().unwrap();
    assert!(initial.flux > 0.0);

    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();
    assert!(result.status.is_converged(), "{}", result);
    assert_relative_eq!(result.param("alpha0.b").unwrap(), TRUE_B, epsilon = 1e-3);
    assert!(result.chisq.total() < initial.total());
    assert_eq!(result.chisq.n_missing + result.chisq.n_extra, 0);
}

#[test]
fn test_annealing_recovers_strength() {
    let data = exact_data(&truth(), &source_points());

    let mut start = truth();
    let lens = start.component_mut(0).unwrap();
    lens.set_param("b", 1.1).unwrap();
    lens.set_vary("b", true).unwrap();

    let config = FitConfig::default().with_annealing(
        AnnealingConfig::default()
            .with_seed(3)
            .with_max_iterations(300),
    );
    let mut fit = FitContext::new(start, data).unwrap().with_config(config);
    let result = fit.run_fit(OptimizerKind::Annealing).unwrap();

    assert_eq!(result.optimizer, OptimizerKind::Annealing);
    assert!(result.status.is_converged(), "{}", result);
    assert_relative_eq!(result.param("alpha0.b").unwrap(), TRUE_B, epsilon = 1e-3);
}

#[test]
fn test_fixed_model_reports_no_free_parameters() {
    let data = exact_data(&truth(), &source_points());
    let mut fit = FitContext::new(truth(), data).unwrap();
    fit.use_image_plane_chisq(true);

    let result = fit.fit().unwrap();
    assert_eq!(result.status, FitStatus::NoFreeParameters);
    assert_eq!(result.func_evals, 1);
    assert!(result.chisq.total() < 1e-8);
}

#[test]
fn test_reset_token_allows_a_new_fit() {
    let data = exact_data(&truth(), &source_points());

    let mut start = truth();
    let lens = start.component_mut(0).unwrap();
    lens.set_param("b", 1.1).unwrap();
    lens.set_vary("b", true).unwrap();

    let mut fit = FitContext::new(start, data).unwrap();
    let token = fit.cancel_token();
    token.cancel();
    let stopped = fit.run_fit(OptimizerKind::Simplex).unwrap();
    assert_eq!(stopped.status, FitStatus::Cancelled);
    assert_eq!(stopped.param("alpha0.b"), Some(1.1));

    token.reset();
    let resumed = fit.run_fit(OptimizerKind::Simplex).unwrap();
    assert!(resumed.status.is_converged());
    assert_relative_eq!(resumed.param("alpha0.b").unwrap(), TRUE_B, epsilon = 1e-3);
}

#[test]
fn test_fit_inside_mass_sheet() {
    // SIS in a kext = 0.5 sheet maps x = 8 to the source at x = 3 when b = 1
    let mut start = LensSystem::new();
    let mut lens = LensComponent::from_profile(
        Alpha::new(AlphaConfig {
            b: 1.1,
            ..AlphaConfig::default()
        })
        .unwrap(),
    );
    lens.set_vary("b", true).unwrap();
    start.add(lens).unwrap();
    start
        .add(LensComponent::from_profile(
            MassSheet::new(MassSheetConfig {
                kext: 0.5,
                ..MassSheetConfig::default()
            })
            .unwrap(),
        ))
        .unwrap();

    let mut data = Dataset::new();
    data.push(
        SourceData::new(vec![ObservedImage::new(8.0, 0.0, 0.01)]).with_source_position(3.0, 0.0),
    );

    let mut fit = FitContext::new(start, data).unwrap();
    let initial = fit.chisq().unwrap();
    assert_eq!(initial.failure, 0.0, "{}", initial);

    let result = fit.run_fit(OptimizerKind::Simplex).unwrap();
    assert!(result.status.is_converged(), "{}", result);
    assert_eq!(result.chisq.failure, 0.0);
    assert_relative_eq!(result.param("alpha0.b").unwrap(), 1.0, epsilon = 1e-3);
}
