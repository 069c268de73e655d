//! Point mass lens.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{check_value_count, config_from_map, LensProfile};
use crate::error::{LensError, Result};

/// Named configuration of a [`PointMass`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointMassConfig {
    /// Einstein radius, >= 0.
    pub b: f64,
    /// Centre x coordinate.
    pub xc: f64,
    /// Centre y coordinate.
    pub yc: f64,
}

impl Default for PointMassConfig {
    fn default() -> Self {
        Self {
            b: 1.0,
            xc: 0.0,
            yc: 0.0,
        }
    }
}

/// Point mass with Einstein radius `b`.
///
/// The position of the mass itself is singular; deflection and Hessian are
/// reported as zero there.
#[derive(Debug, Clone)]
pub struct PointMass {
    config: PointMassConfig,
}

impl PointMass {
    /// Declared parameter order.
    pub const PARAM_NAMES: &'static [&'static str] = &["b", "xc", "yc"];

    pub fn new(config: PointMassConfig) -> Result<Self> {
        check_value_count("ptmass", 3, &[config.b, config.xc, config.yc])?;
        if !(config.b >= 0.0) {
            return Err(LensError::config(format!(
                "ptmass: Einstein radius b must be >= 0, got {}",
                config.b
            )));
        }
        Ok(Self { config })
    }

    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self> {
        Self::new(config_from_map("ptmass", map)?)
    }

    pub fn config(&self) -> &PointMassConfig {
        &self.config
    }
}

impl LensProfile for PointMass {
    fn name(&self) -> &'static str {
        "ptmass"
    }

    fn param_names(&self) -> &'static [&'static str] {
        Self::PARAM_NAMES
    }

    fn values(&self) -> Vec<f64> {
        vec![self.config.b, self.config.xc, self.config.yc]
    }

    fn set_values(&mut self, values: &[f64]) -> Result<()> {
        check_value_count("ptmass", Self::PARAM_NAMES.len(), values)?;
        *self = PointMass::new(PointMassConfig {
            b: values[0],
            xc: values[1],
            yc: values[2],
        })?;
        Ok(())
    }

    fn default_stepsizes(&self) -> Vec<f64> {
        let scale = if self.config.b > 0.0 { self.config.b } else { 1.0 };
        vec![0.1 * scale, 0.1 * scale, 0.1 * scale]
    }

    fn center(&self) -> Point2<f64> {
        Point2::new(self.config.xc, self.config.yc)
    }

    fn einstein_radius(&self) -> Option<f64> {
        Some(self.config.b)
    }

    fn potential(&self, pos: &Point2<f64>) -> f64 {
        let rsq = (pos - self.center()).norm_squared();
        0.5 * self.config.b * self.config.b * rsq.ln()
    }

    fn deflection(&self, pos: &Point2<f64>) -> Vector2<f64> {
        let d = pos - self.center();
        let rsq = d.norm_squared();
        if rsq == 0.0 {
            return Vector2::zeros();
        }
        d * (self.config.b * self.config.b / rsq)
    }

    fn hessian(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        let d = pos - self.center();
        let rsq = d.norm_squared();
        if rsq == 0.0 {
            return Matrix2::zeros();
        }
        let f = self.config.b * self.config.b / (rsq * rsq);
        let hxy = -2.0 * f * d.x * d.y;
        Matrix2::new(
            f * (d.y * d.y - d.x * d.x),
            hxy,
            hxy,
            f * (d.x * d.x - d.y * d.y),
        )
    }

    fn kappa(&self, _pos: &Point2<f64>) -> f64 {
        0.0
    }

    fn clone_box(&self) -> Box<dyn LensProfile> {
        Box::new(self.clone())
    }
}
