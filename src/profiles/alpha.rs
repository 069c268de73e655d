//! Elliptical power-law mass profile with a core.
//!
//! The surface density is
//!
//! ```text
//! kappa(xi) = (2 - alpha)/2 * b^alpha / (s^2 + xi^2)^(alpha/2),   xi^2 = x'^2 + y'^2/q^2
//! ```
//!
//! where `(x', y')` is the offset from `(xc, yc)` rotated by `theta`, so the
//! major axis lies along `theta`. `alpha = 1, s = 0` is the singular
//! isothermal ellipsoid and `b` is then its Einstein radius.
//!
//! Spherical models (`q == 1`) use closed forms. Elliptical models use the
//! one-dimensional integral representation of the potential derivatives,
//! evaluated with Gauss-Legendre quadrature after the substitution `u = t^2`
//! that removes the central cusp of the integrands.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::quadrature::GaussLegendre;
use super::{check_value_count, config_from_map, LensProfile, Orientation};
use crate::error::{LensError, Result};

/// Named configuration of an [`Alpha`] profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlphaConfig {
    /// Mass scale (Einstein radius for the isothermal case). Must be >= 0.
    pub b: f64,
    /// Power-law slope of the density, in (0, 2).
    pub alpha: f64,
    /// Core radius, >= 0.
    pub s: f64,
    /// Axis ratio, in (0, 1].
    pub q: f64,
    /// Position angle of the major axis in degrees.
    pub theta: f64,
    /// Centre x coordinate.
    pub xc: f64,
    /// Centre y coordinate.
    pub yc: f64,
}

impl Default for AlphaConfig {
    fn default() -> Self {
        Self {
            b: 1.0,
            alpha: 1.0,
            s: 0.0,
            q: 1.0,
            theta: 0.0,
            xc: 0.0,
            yc: 0.0,
        }
    }
}

impl AlphaConfig {
    fn to_values(self) -> Vec<f64> {
        vec![self.b, self.alpha, self.s, self.q, self.theta, self.xc, self.yc]
    }

    fn from_values(values: &[f64]) -> Self {
        Self {
            b: values[0],
            alpha: values[1],
            s: values[2],
            q: values[3],
            theta: values[4],
            xc: values[5],
            yc: values[6],
        }
    }

    fn validate(&self) -> Result<()> {
        check_value_count("alpha", Alpha::PARAM_NAMES.len(), &self.to_values())?;
        if !(self.b >= 0.0) {
            return Err(LensError::config(format!("alpha: b must be >= 0, got {}", self.b)));
        }
        if !(self.alpha > 0.0 && self.alpha < 2.0) {
            return Err(LensError::config(format!(
                "alpha: slope alpha must be in (0, 2), got {}",
                self.alpha
            )));
        }
        if !(self.s >= 0.0) {
            return Err(LensError::config(format!(
                "alpha: core radius s must be >= 0, got {}",
                self.s
            )));
        }
        if !(self.q > 0.0 && self.q <= 1.0) {
            return Err(LensError::config(format!(
                "alpha: axis ratio q must be in (0, 1], got {}",
                self.q
            )));
        }
        Ok(())
    }
}

/// Elliptical power-law lens with core radius.
#[derive(Debug, Clone)]
pub struct Alpha {
    config: AlphaConfig,
    orientation: Orientation,
}

impl Alpha {
    /// Declared parameter order.
    pub const PARAM_NAMES: &'static [&'static str] = &["b", "alpha", "s", "q", "theta", "xc", "yc"];

    /// Create a profile, rejecting values outside the physical domain.
    pub fn new(config: AlphaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            orientation: Orientation::from_degrees(config.theta),
        })
    }

    /// Create a profile from a named-parameter map.
    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self> {
        Self::new(config_from_map("alpha", map)?)
    }

    /// Current configuration.
    pub fn config(&self) -> &AlphaConfig {
        &self.config
    }

    fn is_spherical(&self) -> bool {
        self.config.q == 1.0
    }

    fn core_sq(&self) -> f64 {
        self.config.s * self.config.s
    }

    /// Surface density as a function of the squared elliptical radius.
    fn kappa_rsq(&self, rsq: f64) -> f64 {
        let a = self.config.alpha;
        (1.0 - 0.5 * a) * self.config.b.powf(a) * (self.core_sq() + rsq).powf(-0.5 * a)
    }

    /// Derivative of [`Alpha::kappa_rsq`] with respect to `rsq`.
    fn kappa_rsq_deriv(&self, rsq: f64) -> f64 {
        -0.5 * self.config.alpha * self.kappa_rsq(rsq) / (self.core_sq() + rsq)
    }

    /// Mass enclosed within radius `sqrt(rsq)` of the circular model, over pi.
    fn enclosed_mass(&self, rsq: f64) -> f64 {
        let a = self.config.alpha;
        let p = 1.0 - 0.5 * a;
        let ba = self.config.b.powf(a);
        let s2 = self.core_sq();
        if s2 == 0.0 {
            ba * rsq.powf(p)
        } else {
            // s^2p * ((1 + rsq/s^2)^p - 1) without cancellation at small rsq
            ba * s2.powf(p) * (p * (rsq / s2).ln_1p()).exp_m1()
        }
    }

    fn spherical_deflection(&self, d: &Vector2<f64>) -> Vector2<f64> {
        let rsq = d.norm_squared();
        if rsq == 0.0 {
            return Vector2::zeros();
        }
        d * (self.enclosed_mass(rsq) / rsq)
    }

    fn spherical_hessian(&self, d: &Vector2<f64>) -> Matrix2<f64> {
        let rsq = d.norm_squared();
        let s2 = self.core_sq();
        if rsq == 0.0 {
            // the cusp of a coreless model has no finite derivative
            return if s2 > 0.0 {
                Matrix2::identity() * self.kappa_rsq(0.0)
            } else {
                Matrix2::zeros()
            };
        }

        let mass = self.enclosed_mass(rsq);
        let f = mass / rsq;
        let fprime = if s2 > 0.0 && rsq < 1e-8 * s2 {
            0.5 * self.kappa_rsq_deriv(rsq)
        } else {
            (self.kappa_rsq(rsq) * rsq - mass) / (rsq * rsq)
        };

        Matrix2::new(
            f + 2.0 * fprime * d.x * d.x,
            2.0 * fprime * d.x * d.y,
            2.0 * fprime * d.x * d.y,
            f + 2.0 * fprime * d.y * d.y,
        )
    }

    /// `J_0` and `J_1` integrals at a point of the profile frame.
    fn j_integrals(&self, x: f64, y: f64) -> (f64, f64) {
        let e = 1.0 - self.config.q * self.config.q;
        let mut j0 = 0.0;
        let mut j1 = 0.0;
        for (t, wt) in GaussLegendre::shared().iter() {
            let u = t * t;
            let dd = 1.0 - e * u;
            let rsq = u * (x * x + y * y / dd);
            let base = 2.0 * t * wt * self.kappa_rsq(rsq) / dd.sqrt();
            j0 += base;
            j1 += base / dd;
        }
        (j0, j1)
    }

    /// `K_0`, `K_1` and `K_2` integrals at a point of the profile frame.
    fn k_integrals(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let e = 1.0 - self.config.q * self.config.q;
        let mut k0 = 0.0;
        let mut k1 = 0.0;
        let mut k2 = 0.0;
        for (t, wt) in GaussLegendre::shared().iter() {
            let u = t * t;
            let dd = 1.0 - e * u;
            let rsq = u * (x * x + y * y / dd);
            let base = 2.0 * t * wt * u * self.kappa_rsq_deriv(rsq) / dd.sqrt();
            k0 += base;
            k1 += base / dd;
            k2 += base / (dd * dd);
        }
        (k0, k1, k2)
    }

    fn elliptical_deflection(&self, local: &Vector2<f64>) -> Vector2<f64> {
        if self.config.s == 0.0 && local.x == 0.0 && local.y == 0.0 {
            return Vector2::zeros();
        }
        let q = self.config.q;
        let (j0, j1) = self.j_integrals(local.x, local.y);
        Vector2::new(q * local.x * j0, q * local.y * j1)
    }

    fn elliptical_hessian(&self, local: &Vector2<f64>) -> Matrix2<f64> {
        if self.config.s == 0.0 && local.x == 0.0 && local.y == 0.0 {
            return Matrix2::zeros();
        }
        let q = self.config.q;
        let (x, y) = (local.x, local.y);
        let (j0, j1) = self.j_integrals(x, y);
        let (k0, k1, k2) = self.k_integrals(x, y);
        let hxy = 2.0 * q * x * y * k1;
        Matrix2::new(
            2.0 * q * x * x * k0 + q * j0,
            hxy,
            hxy,
            2.0 * q * y * y * k2 + q * j1,
        )
    }
}

impl LensProfile for Alpha {
    fn name(&self) -> &'static str {
        "alpha"
    }

    fn param_names(&self) -> &'static [&'static str] {
        Self::PARAM_NAMES
    }

    fn values(&self) -> Vec<f64> {
        self.config.to_values()
    }

    fn set_values(&mut self, values: &[f64]) -> Result<()> {
        check_value_count("alpha", Self::PARAM_NAMES.len(), values)?;
        let config = AlphaConfig::from_values(values);
        config.validate()?;
        self.config = config;
        self.orientation = Orientation::from_degrees(config.theta);
        Ok(())
    }

    fn default_stepsizes(&self) -> Vec<f64> {
        let c = &self.config;
        let scale = if c.b > 0.0 { c.b } else { 1.0 };
        // step into the valid domain when a bounded parameter sits near its edge
        let alpha_step = if c.alpha + 0.1 >= 2.0 { -0.1 } else { 0.1 };
        let q_step = if c.q + 0.1 > 1.0 { -0.1 } else { 0.1 };
        vec![
            0.1 * scale,
            alpha_step,
            0.02 * scale,
            q_step,
            20.0,
            0.1 * scale,
            0.1 * scale,
        ]
    }

    fn center(&self) -> Point2<f64> {
        Point2::new(self.config.xc, self.config.yc)
    }

    fn einstein_radius(&self) -> Option<f64> {
        Some(self.config.b)
    }

    fn potential(&self, pos: &Point2<f64>) -> f64 {
        let local = self.orientation.to_local(pos, &self.center());
        let q = self.config.q;
        let e = 1.0 - q * q;
        let (x, y) = (local.x, local.y);
        q * GaussLegendre::shared().integrate(|t| {
            let u = t * t;
            let dd = 1.0 - e * u;
            self.enclosed_mass(u * (x * x + y * y / dd)) / (t * dd.sqrt())
        })
    }

    fn deflection(&self, pos: &Point2<f64>) -> Vector2<f64> {
        if self.is_spherical() {
            return self.spherical_deflection(&(pos - self.center()));
        }
        let local = self.orientation.to_local(pos, &self.center());
        self.orientation
            .vector_to_global(&self.elliptical_deflection(&local))
    }

    fn hessian(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        if self.is_spherical() {
            return self.spherical_hessian(&(pos - self.center()));
        }
        let local = self.orientation.to_local(pos, &self.center());
        self.orientation
            .tensor_to_global(&self.elliptical_hessian(&local))
    }

    fn kappa(&self, pos: &Point2<f64>) -> f64 {
        let local = self.orientation.to_local(pos, &self.center());
        let q = self.config.q;
        self.kappa_rsq(local.x * local.x + local.y * local.y / (q * q))
    }

    fn clone_box(&self) -> Box<dyn LensProfile> {
        Box::new(self.clone())
    }
}
