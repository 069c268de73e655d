//! A lens profile together with its fit configuration.

use nalgebra::{Matrix2, Point2, Vector2};
use std::collections::HashMap;

use crate::error::{LensError, Result};
use crate::parameters::{Bounds, Parameter};
use crate::profiles::{LensProfile, ProfileKind};

/// One lens in a [`LensSystem`](super::LensSystem).
///
/// Holds the profile (which owns the parameter values), a vary mask with one
/// flag per parameter, and per-parameter limits used while fitting. The mask
/// and the limits follow the profile's declared parameter order.
#[derive(Debug, Clone)]
pub struct LensComponent {
    profile: Box<dyn LensProfile>,
    vary: Vec<bool>,
    bounds: Vec<Bounds>,
}

impl LensComponent {
    /// Wrap a profile. All parameters start fixed and unbounded.
    pub fn new(profile: Box<dyn LensProfile>) -> Self {
        let n = profile.param_names().len();
        Self {
            profile,
            vary: vec![false; n],
            bounds: vec![Bounds::unbounded(); n],
        }
    }

    /// Wrap a concrete profile value.
    pub fn from_profile<P: LensProfile + 'static>(profile: P) -> Self {
        Self::new(Box::new(profile))
    }

    /// Build a component of a built-in family from a named-parameter map.
    ///
    /// # Examples
    ///
    /// ```
    /// use lensfit_rs::lens::LensComponent;
    /// use lensfit_rs::profiles::ProfileKind;
    /// use std::collections::HashMap;
    ///
    /// let map = HashMap::from([("shear".to_string(), 0.02), ("theta".to_string(), 10.0)]);
    /// let mut shear = LensComponent::from_map(ProfileKind::Shear, &map).unwrap();
    /// shear.set_vary_flags_from_ints(&[1, 1, 0, 0]).unwrap();
    /// assert_eq!(shear.n_vary_params(), 2);
    /// ```
    pub fn from_map(kind: ProfileKind, map: &HashMap<String, f64>) -> Result<Self> {
        Ok(Self::new(kind.from_map(map)?))
    }

    /// The underlying profile.
    pub fn profile(&self) -> &dyn LensProfile {
        self.profile.as_ref()
    }

    /// Profile name, e.g. `"alpha"`.
    pub fn name(&self) -> &'static str {
        self.profile.name()
    }

    /// Number of parameters of the profile.
    pub fn param_count(&self) -> usize {
        self.vary.len()
    }

    /// Parameter names in declared order.
    pub fn param_names(&self) -> &'static [&'static str] {
        self.profile.param_names()
    }

    /// Parameter values in declared order.
    pub fn values(&self) -> Vec<f64> {
        self.profile.values()
    }

    /// Replace all parameter values; invalid values are rejected.
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        self.profile.set_values(values)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.param_names()
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| {
                LensError::config(format!(
                    "{} has no parameter '{}' (expected one of {:?})",
                    self.name(),
                    name,
                    self.param_names()
                ))
            })
    }

    /// Named snapshot of one parameter.
    pub fn param(&self, name: &str) -> Result<Parameter> {
        let index = self.index_of(name)?;
        Ok(self.snapshot(index, &self.values(), &self.stepsizes()))
    }

    /// Set one parameter by name.
    pub fn set_param(&mut self, name: &str, value: f64) -> Result<()> {
        let index = self.index_of(name)?;
        let mut values = self.values();
        values[index] = value;
        self.profile.set_values(&values)
    }

    /// Named snapshots of all parameters, in declared order.
    pub fn parameters(&self) -> Vec<Parameter> {
        let values = self.values();
        let steps = self.stepsizes();
        (0..self.param_count())
            .map(|i| self.snapshot(i, &values, &steps))
            .collect()
    }

    fn snapshot(&self, index: usize, values: &[f64], steps: &[f64]) -> Parameter {
        Parameter {
            name: self.param_names()[index].to_string(),
            value: values[index],
            vary: self.vary[index],
            bounds: self.bounds[index],
            stepsize: steps[index],
        }
    }

    /// The vary mask.
    pub fn vary_flags(&self) -> &[bool] {
        &self.vary
    }

    /// Replace the vary mask; its length must equal the parameter count.
    pub fn set_vary_flags(&mut self, flags: &[bool]) -> Result<()> {
        if flags.len() != self.param_count() {
            return Err(LensError::config(format!(
                "{} vary mask needs {} flags, got {}",
                self.name(),
                self.param_count(),
                flags.len()
            )));
        }
        self.vary = flags.to_vec();
        Ok(())
    }

    /// Replace the vary mask from 0/1 flags.
    pub fn set_vary_flags_from_ints(&mut self, flags: &[u8]) -> Result<()> {
        let flags = flags
            .iter()
            .map(|&f| match f {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(LensError::config(format!(
                    "vary flags must be 0 or 1, got {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        self.set_vary_flags(&flags)
    }

    /// Set the vary flag of one parameter by name.
    pub fn set_vary(&mut self, name: &str, vary: bool) -> Result<()> {
        let index = self.index_of(name)?;
        self.vary[index] = vary;
        Ok(())
    }

    /// Number of free parameters.
    pub fn n_vary_params(&self) -> usize {
        self.vary.iter().filter(|&&v| v).count()
    }

    /// Limits of every parameter, in declared order.
    pub fn bounds(&self) -> &[Bounds] {
        &self.bounds
    }

    /// Set the fitting limits of one parameter.
    pub fn set_limits(&mut self, name: &str, min: f64, max: f64) -> Result<()> {
        let index = self.index_of(name)?;
        self.bounds[index] = Bounds::new(min, max)?;
        Ok(())
    }

    /// Initial search steps, in declared order.
    pub fn stepsizes(&self) -> Vec<f64> {
        self.profile.default_stepsizes()
    }

    /// Append the values of the varying parameters to `out`.
    pub(crate) fn gather_into(&self, out: &mut Vec<f64>) {
        let values = self.values();
        out.extend(
            values
                .into_iter()
                .zip(&self.vary)
                .filter(|(_, &vary)| vary)
                .map(|(v, _)| v),
        );
    }

    /// Overwrite the varying parameters from the front of `free`.
    ///
    /// Returns the number of values consumed.
    pub(crate) fn scatter_from(&mut self, free: &[f64]) -> Result<usize> {
        let needed = self.n_vary_params();
        if free.len() < needed {
            return Err(LensError::config(format!(
                "{} needs {} free values, only {} left",
                self.name(),
                needed,
                free.len()
            )));
        }
        if needed == 0 {
            return Ok(0);
        }

        let mut values = self.values();
        let mut next = free.iter();
        for (value, _) in values.iter_mut().zip(&self.vary).filter(|(_, &vary)| vary) {
            if let Some(v) = next.next() {
                *value = *v;
            }
        }
        self.profile.set_values(&values)?;
        Ok(needed)
    }

    /// Check the varying parameters against their limits.
    pub(crate) fn check_limits(&self) -> Result<()> {
        let values = self.values();
        for (i, name) in self.param_names().iter().enumerate() {
            if self.vary[i] {
                self.bounds[i].check(name, values[i])?;
            }
        }
        Ok(())
    }

    /// Deflection of this component alone.
    pub fn deflection(&self, pos: &Point2<f64>) -> Vector2<f64> {
        self.profile.deflection(pos)
    }

    /// Deflection-derivative tensor of this component alone.
    pub fn hessian(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        self.profile.hessian(pos)
    }

    /// Lensing potential of this component alone.
    pub fn potential(&self, pos: &Point2<f64>) -> f64 {
        self.profile.potential(pos)
    }

    /// Jacobian of the lens mapping for this component alone.
    pub fn magnification_tensor(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        self.profile.magnification_tensor(pos)
    }
}
