//! Flattened view of the free parameters of a lens system
//!
//! The optimizers work on a plain [`Array1<f64>`] holding only the varying
//! parameters, in component order and then in each profile's declared
//! parameter order. [`gather`] builds that vector from a [`LensSystem`] and
//! [`scatter`] writes a vector back into it.

use ndarray::Array1;

use crate::error::{LensError, Result};
use crate::lens::LensSystem;
use crate::parameters::bounds::Bounds;

/// Total number of varying parameters across all components.
pub fn free_parameter_count(system: &LensSystem) -> usize {
    system.components().map(|c| c.n_vary_params()).sum()
}

/// Collect the values of the varying parameters.
///
/// # Examples
///
/// ```
/// use lensfit_rs::lens::{LensComponent, LensSystem};
/// use lensfit_rs::parameters::vector::{gather, scatter};
/// use lensfit_rs::profiles::{Shear, ShearConfig};
///
/// let mut shear = LensComponent::from_profile(
///     Shear::new(ShearConfig { shear: 0.02, theta: 10.0, ..Default::default() }).unwrap(),
/// );
/// shear.set_vary("shear", true).unwrap();
///
/// let mut system = LensSystem::new();
/// system.add(shear).unwrap();
///
/// let free = gather(&system);
/// assert_eq!(free.to_vec(), vec![0.02]);
/// scatter(&free, &mut system).unwrap();
/// ```
pub fn gather(system: &LensSystem) -> Array1<f64> {
    let mut values = Vec::with_capacity(free_parameter_count(system));
    for component in system.components() {
        component.gather_into(&mut values);
    }
    Array1::from(values)
}

/// Write a free-parameter vector back into the system.
///
/// Only varying entries are touched. The vector length must equal
/// [`free_parameter_count`]; a mismatch is a configuration error. If any
/// component rejects its new values the system is left unchanged.
pub fn scatter(values: &Array1<f64>, system: &mut LensSystem) -> Result<()> {
    let expected = free_parameter_count(system);
    if values.len() != expected {
        return Err(LensError::config(format!(
            "parameter vector has {} entries, the vary masks select {}",
            values.len(),
            expected
        )));
    }

    let values = values.to_vec();
    let mut updated = system.clone();
    let mut offset = 0;
    for component in updated.components_mut() {
        offset += component.scatter_from(&values[offset..])?;
    }
    *system = updated;
    Ok(())
}

/// Names of the free parameters, as `"<profile><index>.<param>"`.
pub fn free_parameter_names(system: &LensSystem) -> Vec<String> {
    let mut names = Vec::new();
    for (index, component) in system.components().enumerate() {
        for (name, vary) in component.param_names().iter().zip(component.vary_flags()) {
            if *vary {
                names.push(format!("{}{}.{}", component.name(), index, name));
            }
        }
    }
    names
}

/// Initial search steps of the free parameters.
pub fn gather_stepsizes(system: &LensSystem) -> Array1<f64> {
    let mut steps = Vec::new();
    for component in system.components() {
        let all = component.stepsizes();
        steps.extend(
            all.into_iter()
                .zip(component.vary_flags())
                .filter(|(_, &vary)| vary)
                .map(|(s, _)| s),
        );
    }
    Array1::from(steps)
}

/// Limits of the free parameters.
pub fn gather_bounds(system: &LensSystem) -> Vec<Bounds> {
    let mut bounds = Vec::new();
    for component in system.components() {
        bounds.extend(
            component
                .bounds()
                .iter()
                .zip(component.vary_flags())
                .filter(|(_, &vary)| vary)
                .map(|(b, _)| *b),
        );
    }
    bounds
}

/// Check every varying parameter against its limits.
pub fn check_limits(system: &LensSystem) -> Result<()> {
    for component in system.components() {
        component.check_limits()?;
    }
    Ok(())
}
