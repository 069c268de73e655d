//! Tests for vary masks and the free-parameter vector

use lensfit_rs::error::LensError;
use lensfit_rs::lens::{LensComponent, LensSystem};
use lensfit_rs::parameters::vector;
use lensfit_rs::profiles::ProfileKind;
use ndarray::array;
use std::collections::HashMap;

use crate::test_helpers::elliptical_system;

#[test]
fn test_alphafit_vary_mask() {
    let alpha = HashMap::from([
        ("b".to_string(), 4.5),
        ("q".to_string(), 0.8),
        ("theta".to_string(), 30.0),
        ("xc".to_string(), 0.7),
        ("yc".to_string(), 0.3),
    ]);
    let mut lens = LensComponent::from_map(ProfileKind::Alpha, &alpha).unwrap();
    lens.set_vary_flags_from_ints(&[1, 0, 0, 1, 1, 1, 1]).unwrap();

    let shear = HashMap::from([("shear".to_string(), 0.02), ("theta".to_string(), 10.0)]);
    let mut external = LensComponent::from_map(ProfileKind::Shear, &shear).unwrap();
    external.set_vary_flags_from_ints(&[1, 1, 0, 0]).unwrap();

    let mut system = LensSystem::new();
    system.add_lenses([lens, external]).unwrap();

    assert_eq!(vector::free_parameter_count(&system), 7);
    assert_eq!(
        vector::free_parameter_names(&system),
        vec![
            "alpha0.b",
            "alpha0.q",
            "alpha0.theta",
            "alpha0.xc",
            "alpha0.yc",
            "shear1.shear",
            "shear1.theta",
        ]
    );
    assert_eq!(
        vector::gather(&system),
        array![4.5, 0.8, 30.0, 0.7, 0.3, 0.02, 10.0]
    );
}

#[test]
fn test_scatter_touches_only_free_parameters() {
    let mut system = elliptical_system();
    system.component_mut(0).unwrap().set_vary("b", true).unwrap();
    system.component_mut(1).unwrap().set_vary("shear", true).unwrap();

    let before: Vec<Vec<f64>> = system.components().map(|c| c.values()).collect();
    vector::scatter(&array![4.25, 0.05], &mut system).unwrap();
    let after: Vec<Vec<f64>> = system.components().map(|c| c.values()).collect();

    assert_eq!(after[0][0], 4.25);
    assert_eq!(after[1][0], 0.05);
    assert_eq!(&after[0][1..], &before[0][1..]);
    assert_eq!(&after[1][1..], &before[1][1..]);
    assert_eq!(vector::gather(&system), array![4.25, 0.05]);
}

#[test]
fn test_scatter_rejects_invalid_values() {
    let mut system = elliptical_system();
    system.component_mut(0).unwrap().set_vary("q", true).unwrap();

    // axis ratio above one is outside the profile's domain
    let err = vector::scatter(&array![1.5], &mut system).unwrap_err();
    assert!(matches!(err, LensError::Configuration(_)));
    assert_eq!(system.component(0).unwrap().param("q").unwrap().value, 0.8);

    let err = vector::scatter(&array![0.9, 0.1], &mut system).unwrap_err();
    assert!(matches!(
        err,
        LensError::Configuration(_) | LensError::DimensionMismatch(_)
    ));
}

#[test]
fn test_wrong_mask_length_is_rejected() {
    let mut system = elliptical_system();
    let lens = system.component_mut(0).unwrap();
    assert!(lens.set_vary_flags(&[true, false]).is_err());
    assert!(lens.set_vary_flags_from_ints(&[1, 0, 0, 1, 1, 1, 2]).is_err());
    assert_eq!(lens.n_vary_params(), 0);
}

#[test]
fn test_limits_and_steps_follow_the_mask() {
    let mut system = elliptical_system();
    let lens = system.component_mut(0).unwrap();
    lens.set_vary("b", true).unwrap();
    lens.set_vary("theta", true).unwrap();
    lens.set_limits("b", 4.0, 5.0).unwrap();

    let bounds = vector::gather_bounds(&system);
    assert_eq!(bounds.len(), 2);
    assert_eq!((bounds[0].min, bounds[0].max), (4.0, 5.0));
    assert!(!bounds[1].is_finite());

    let steps = vector::gather_stepsizes(&system);
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| *s > 0.0));

    assert!(vector::check_limits(&system).is_ok());
    system.component_mut(0).unwrap().set_param("b", 5.5).unwrap();
    assert!(matches!(
        vector::check_limits(&system),
        Err(LensError::Bounds(_))
    ));
}
