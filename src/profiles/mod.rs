//! Lens mass profiles.
//!
//! A profile evaluates the lensing potential, the deflection field and the
//! deflection-derivative tensor (the Hessian of the potential) at a point of
//! the image plane. Profiles are used polymorphically through the
//! [`LensProfile`] trait; new mass models are new implementations of it.
//!
//! Built-in profiles and their configuration keys, in declared order:
//!
//! | name     | keys                                   | defaults                 |
//! |----------|----------------------------------------|--------------------------|
//! | `alpha`  | `b, alpha, s, q, theta, xc, yc`        | `1, 1, 0, 1, 0, 0, 0`    |
//! | `shear`  | `shear, theta, xc, yc`                 | `0, 0, 0, 0`             |
//! | `ptmass` | `b, xc, yc`                            | `1, 0, 0`                |
//! | `sheet`  | `kext, xc, yc`                         | `0, 0, 0`                |
//!
//! Angles are in degrees, measured counterclockwise from the +x axis.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{LensError, Result};

mod alpha;
mod mass_sheet;
mod point_mass;
pub(crate) mod quadrature;
mod shear;

pub use alpha::{Alpha, AlphaConfig};
pub use mass_sheet::{MassSheet, MassSheetConfig};
pub use point_mass::{PointMass, PointMassConfig};
pub use shear::{Shear, ShearConfig};

/// Capability set every lens profile provides.
///
/// Parameter values are exposed positionally in the order given by
/// [`LensProfile::param_names`]; that order is also the order of the vary
/// mask of the owning [`LensComponent`](crate::lens::LensComponent).
pub trait LensProfile: fmt::Debug + Send + Sync {
    /// Short profile name, e.g. `"alpha"`.
    fn name(&self) -> &'static str;

    /// Parameter names in declared order.
    fn param_names(&self) -> &'static [&'static str];

    /// Current parameter values in declared order.
    fn values(&self) -> Vec<f64>;

    /// Replace all parameter values.
    ///
    /// Values outside the physical domain of the profile are rejected with
    /// [`LensError::Configuration`] and leave the profile unchanged. Values
    /// are stored exactly as given.
    fn set_values(&mut self, values: &[f64]) -> Result<()>;

    /// Initial search step for each parameter, in declared order.
    fn default_stepsizes(&self) -> Vec<f64>;

    /// Centre of the profile.
    fn center(&self) -> Point2<f64>;

    /// Characteristic angular scale used to size the image search domain.
    fn einstein_radius(&self) -> Option<f64> {
        None
    }

    /// Convergence plus shear this profile keeps at large radius.
    ///
    /// Uniform sheets and external shear stretch the image plane by up to
    /// `1 / (1 - kappa - gamma)`, which the search domain must allow for.
    fn far_field_distortion(&self) -> f64 {
        0.0
    }

    /// Lensing potential.
    fn potential(&self, pos: &Point2<f64>) -> f64;

    /// Deflection angle.
    fn deflection(&self, pos: &Point2<f64>) -> Vector2<f64>;

    /// Derivatives of the deflection field (Hessian of the potential).
    fn hessian(&self, pos: &Point2<f64>) -> Matrix2<f64>;

    /// Dimensionless surface density.
    fn kappa(&self, pos: &Point2<f64>) -> f64 {
        0.5 * self.hessian(pos).trace()
    }

    /// Jacobian of the lens mapping for this profile acting alone.
    fn magnification_tensor(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        Matrix2::identity() - self.hessian(pos)
    }

    /// Clone into a new box.
    fn clone_box(&self) -> Box<dyn LensProfile>;
}

impl Clone for Box<dyn LensProfile> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// The built-in profile families, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Elliptical power-law mass with core radius.
    Alpha,
    /// External shear.
    Shear,
    /// Point mass.
    PointMass,
    /// Uniform convergence sheet.
    MassSheet,
}

impl ProfileKind {
    /// Name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Alpha => "alpha",
            ProfileKind::Shear => "shear",
            ProfileKind::PointMass => "ptmass",
            ProfileKind::MassSheet => "sheet",
        }
    }

    /// Parameter names of this family, in declared order.
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            ProfileKind::Alpha => Alpha::PARAM_NAMES,
            ProfileKind::Shear => Shear::PARAM_NAMES,
            ProfileKind::PointMass => PointMass::PARAM_NAMES,
            ProfileKind::MassSheet => MassSheet::PARAM_NAMES,
        }
    }

    /// Build a profile from a named-parameter map.
    ///
    /// Unknown keys are rejected; missing keys take the documented defaults.
    pub fn from_map(&self, map: &HashMap<String, f64>) -> Result<Box<dyn LensProfile>> {
        Ok(match self {
            ProfileKind::Alpha => Box::new(Alpha::from_map(map)?),
            ProfileKind::Shear => Box::new(Shear::from_map(map)?),
            ProfileKind::PointMass => Box::new(PointMass::from_map(map)?),
            ProfileKind::MassSheet => Box::new(MassSheet::from_map(map)?),
        })
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alpha" => Ok(ProfileKind::Alpha),
            "shear" => Ok(ProfileKind::Shear),
            "ptmass" | "pointmass" | "point_mass" => Ok(ProfileKind::PointMass),
            "sheet" | "mass_sheet" => Ok(ProfileKind::MassSheet),
            other => Err(LensError::config(format!("unknown lens profile '{}'", other))),
        }
    }
}

/// Deserialize a profile config struct from a named-parameter map.
///
/// The config structs are `#[serde(default, deny_unknown_fields)]`, so this
/// rejects unknown keys and fills missing ones from `Default`.
pub(crate) fn config_from_map<T: DeserializeOwned>(
    profile: &str,
    map: &HashMap<String, f64>,
) -> Result<T> {
    for (key, value) in map {
        if !value.is_finite() {
            return Err(LensError::config(format!(
                "{}: parameter '{}' must be finite, got {}",
                profile, key, value
            )));
        }
    }
    let value = serde_json::to_value(map)?;
    serde_json::from_value(value).map_err(|e| LensError::config(format!("{}: {}", profile, e)))
}

/// Check the length of a positional value slice.
pub(crate) fn check_value_count(profile: &str, expected: usize, values: &[f64]) -> Result<()> {
    if values.len() != expected {
        return Err(LensError::config(format!(
            "{} expects {} parameters, got {}",
            profile,
            expected,
            values.len()
        )));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(LensError::config(format!(
            "{}: parameter values must be finite, got {}",
            profile, bad
        )));
    }
    Ok(())
}

/// Rotation between the image plane and the frame of an elliptical profile.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Orientation {
    cos: f64,
    sin: f64,
}

impl Orientation {
    pub(crate) fn from_degrees(theta: f64) -> Self {
        let (sin, cos) = theta.to_radians().sin_cos();
        Self { cos, sin }
    }

    /// Offset from `center`, expressed in the rotated frame.
    pub(crate) fn to_local(&self, pos: &Point2<f64>, center: &Point2<f64>) -> Vector2<f64> {
        let d = pos - center;
        Vector2::new(
            d.x * self.cos + d.y * self.sin,
            -d.x * self.sin + d.y * self.cos,
        )
    }

    fn rotation(&self) -> Matrix2<f64> {
        Matrix2::new(self.cos, -self.sin, self.sin, self.cos)
    }

    pub(crate) fn vector_to_global(&self, v: &Vector2<f64>) -> Vector2<f64> {
        self.rotation() * v
    }

    pub(crate) fn tensor_to_global(&self, m: &Matrix2<f64>) -> Matrix2<f64> {
        let r = self.rotation();
        r * m * r.transpose()
    }
}
