//! Named view of a single lens parameter
//!
//! Lens components store their values positionally. [`Parameter`] is the
//! named snapshot handed out at the configuration boundary and in fit
//! results, so callers never have to count positions in a vary mask.

use crate::parameters::bounds::Bounds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A snapshot of one lens parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter as declared by its profile (e.g. `"b"`, `"theta"`)
    pub name: String,

    /// Current value of the parameter
    pub value: f64,

    /// Whether this parameter can be varied during optimization
    pub vary: bool,

    /// Limits applied to trial values during fitting
    pub bounds: Bounds,

    /// Initial simplex step for this parameter
    pub stepsize: f64,
}

impl Parameter {
    /// Create a new varying, unbounded parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use lensfit_rs::parameters::Parameter;
    ///
    /// let param = Parameter::new("b", 4.5);
    /// assert_eq!(param.name(), "b");
    /// assert_eq!(param.value(), 4.5);
    /// assert!(param.vary());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            vary: true,
            bounds: Bounds::default(),
            stepsize: 0.1,
        }
    }

    /// Get the name of the parameter
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current value of the parameter
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether the parameter is free during fitting
    pub fn vary(&self) -> bool {
        self.vary
    }

    /// Get the minimum bound of the parameter
    pub fn min(&self) -> f64 {
        self.bounds.min
    }

    /// Get the maximum bound of the parameter
    pub fn max(&self) -> f64 {
        self.bounds.max
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:.8}", self.name, self.value)?;
        if !self.vary {
            write!(f, " (fixed)")?;
        }
        if self.bounds.has_lower_bound() || self.bounds.has_upper_bound() {
            write!(f, " [{}, {}]", self.bounds.min, self.bounds.max)?;
        }
        Ok(())
    }
}
