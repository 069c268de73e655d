//! External shear.
//!
//! With `gamma1 = -shear * cos(2 theta)` and `gamma2 = -shear * sin(2 theta)`
//! the potential is `(gamma1 (x^2 - y^2) + 2 gamma2 x y) / 2` about
//! `(xc, yc)`; `theta` points towards the perturbing mass.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{check_value_count, config_from_map, LensProfile};
use crate::error::{LensError, Result};

/// Named configuration of a [`Shear`] profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShearConfig {
    /// Shear magnitude, >= 0.
    pub shear: f64,
    /// Shear direction in degrees.
    pub theta: f64,
    /// Centre x coordinate.
    pub xc: f64,
    /// Centre y coordinate.
    pub yc: f64,
}

impl Default for ShearConfig {
    fn default() -> Self {
        Self {
            shear: 0.0,
            theta: 0.0,
            xc: 0.0,
            yc: 0.0,
        }
    }
}

impl ShearConfig {
    fn validate(&self) -> Result<()> {
        check_value_count("shear", 4, &[self.shear, self.theta, self.xc, self.yc])?;
        if !(self.shear >= 0.0) {
            return Err(LensError::config(format!(
                "shear: magnitude must be >= 0, got {}",
                self.shear
            )));
        }
        Ok(())
    }
}

/// External shear lens.
#[derive(Debug, Clone)]
pub struct Shear {
    config: ShearConfig,
    gamma1: f64,
    gamma2: f64,
}

impl Shear {
    /// Declared parameter order.
    pub const PARAM_NAMES: &'static [&'static str] = &["shear", "theta", "xc", "yc"];

    /// Create a shear component, rejecting a negative magnitude.
    pub fn new(config: ShearConfig) -> Result<Self> {
        config.validate()?;
        let (sin2, cos2) = (2.0 * config.theta.to_radians()).sin_cos();
        Ok(Self {
            config,
            gamma1: -config.shear * cos2,
            gamma2: -config.shear * sin2,
        })
    }

    /// Create a shear component from a named-parameter map.
    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self> {
        Self::new(config_from_map("shear", map)?)
    }

    /// Current configuration.
    pub fn config(&self) -> &ShearConfig {
        &self.config
    }

    /// Cartesian shear components `(gamma1, gamma2)`.
    pub fn components(&self) -> (f64, f64) {
        (self.gamma1, self.gamma2)
    }
}

impl LensProfile for Shear {
    fn name(&self) -> &'static str {
        "shear"
    }

    fn param_names(&self) -> &'static [&'static str] {
        Self::PARAM_NAMES
    }

    fn values(&self) -> Vec<f64> {
        let c = &self.config;
        vec![c.shear, c.theta, c.xc, c.yc]
    }

    fn set_values(&mut self, values: &[f64]) -> Result<()> {
        check_value_count("shear", Self::PARAM_NAMES.len(), values)?;
        *self = Shear::new(ShearConfig {
            shear: values[0],
            theta: values[1],
            xc: values[2],
            yc: values[3],
        })?;
        Ok(())
    }

    fn default_stepsizes(&self) -> Vec<f64> {
        vec![0.03, 20.0, 0.1, 0.1]
    }

    fn center(&self) -> Point2<f64> {
        Point2::new(self.config.xc, self.config.yc)
    }

    fn far_field_distortion(&self) -> f64 {
        self.config.shear
    }

    fn potential(&self, pos: &Point2<f64>) -> f64 {
        let d = pos - self.center();
        0.5 * self.gamma1 * (d.x * d.x - d.y * d.y) + self.gamma2 * d.x * d.y
    }

    fn deflection(&self, pos: &Point2<f64>) -> Vector2<f64> {
        let d = pos - self.center();
        Vector2::new(
            self.gamma1 * d.x + self.gamma2 * d.y,
            self.gamma2 * d.x - self.gamma1 * d.y,
        )
    }

    fn hessian(&self, _pos: &Point2<f64>) -> Matrix2<f64> {
        Matrix2::new(self.gamma1, self.gamma2, self.gamma2, -self.gamma1)
    }

    fn kappa(&self, _pos: &Point2<f64>) -> f64 {
        0.0
    }

    fn clone_box(&self) -> Box<dyn LensProfile> {
        Box::new(self.clone())
    }
}
