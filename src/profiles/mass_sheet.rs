//! Uniform convergence sheet.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{check_value_count, config_from_map, LensProfile};
use crate::error::Result;

/// Named configuration of a [`MassSheet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MassSheetConfig {
    /// Convergence of the sheet; negative values are allowed.
    pub kext: f64,
    /// Reference point x coordinate.
    pub xc: f64,
    /// Reference point y coordinate.
    pub yc: f64,
}

/// Sheet of constant convergence `kext`.
#[derive(Debug, Clone)]
pub struct MassSheet {
    config: MassSheetConfig,
}

impl MassSheet {
    /// Declared parameter order.
    pub const PARAM_NAMES: &'static [&'static str] = &["kext", "xc", "yc"];

    pub fn new(config: MassSheetConfig) -> Result<Self> {
        check_value_count("sheet", 3, &[config.kext, config.xc, config.yc])?;
        Ok(Self { config })
    }

    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self> {
        Self::new(config_from_map("sheet", map)?)
    }
}

impl LensProfile for MassSheet {
    fn name(&self) -> &'static str {
        "sheet"
    }

    fn param_names(&self) -> &'static [&'static str] {
        Self::PARAM_NAMES
    }

    fn values(&self) -> Vec<f64> {
        vec![self.config.kext, self.config.xc, self.config.yc]
    }

    fn set_values(&mut self, values: &[f64]) -> Result<()> {
        check_value_count("sheet", Self::PARAM_NAMES.len(), values)?;
        self.config = MassSheetConfig {
            kext: values[0],
            xc: values[1],
            yc: values[2],
        };
        Ok(())
    }

    fn default_stepsizes(&self) -> Vec<f64> {
        vec![0.05, 0.1, 0.1]
    }

    fn center(&self) -> Point2<f64> {
        Point2::new(self.config.xc, self.config.yc)
    }

    fn far_field_distortion(&self) -> f64 {
        self.config.kext
    }

    fn potential(&self, pos: &Point2<f64>) -> f64 {
        0.5 * self.config.kext * (pos - self.center()).norm_squared()
    }

    fn deflection(&self, pos: &Point2<f64>) -> Vector2<f64> {
        (pos - self.center()) * self.config.kext
    }

    fn hessian(&self, _pos: &Point2<f64>) -> Matrix2<f64> {
        Matrix2::identity() * self.config.kext
    }

    fn kappa(&self, _pos: &Point2<f64>) -> f64 {
        self.config.kext
    }

    fn clone_box(&self) -> Box<dyn LensProfile> {
        Box::new(self.clone())
    }
}
