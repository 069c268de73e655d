//! Parameter limits
//!
//! Every lens parameter carries a pair of limits. The fitting loop treats a
//! trial value outside its limits as a rejected point: the value is never
//! pulled back inside the interval.

use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};
use thiserror::Error;

/// Errors raised by parameter limits
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid limits: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Parameter '{name}' value {value} is outside its limits [{min}, {max}]")]
    ValueOutsideBounds {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Closed interval of allowed values; either end may be open (infinite).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

/// Wire form: open ends are `null`, since JSON has no infinity.
#[derive(Serialize, Deserialize)]
struct WireBounds {
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        WireBounds {
            min: self.has_lower_bound().then_some(self.min),
            max: self.has_upper_bound().then_some(self.max),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = WireBounds::deserialize(deserializer)?;
        Bounds::new(
            wire.min.unwrap_or(NEG_INFINITY),
            wire.max.unwrap_or(INFINITY),
        )
        .map_err(serde::de::Error::custom)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Bounds {
    /// Limits `[min, max]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lensfit_rs::parameters::Bounds;
    ///
    /// let q_limits = Bounds::new(0.2, 1.0).unwrap();
    /// assert!(q_limits.is_within_bounds(0.8));
    /// assert!(!q_limits.is_within_bounds(1.2));
    /// assert!(Bounds::new(1.0, 0.2).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn unbounded() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }

    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Like [`Bounds::is_within_bounds`], but reports the offending parameter.
    pub fn check(&self, name: &str, value: f64) -> Result<(), BoundsError> {
        if self.is_within_bounds(value) {
            return Ok(());
        }
        Err(BoundsError::ValueOutsideBounds {
            name: name.to_string(),
            value,
            min: self.min,
            max: self.max,
        })
    }

    /// True when both ends are closed.
    pub fn is_finite(&self) -> bool {
        self.has_lower_bound() && self.has_upper_bound()
    }

    pub fn has_lower_bound(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.max.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_validated() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();
        assert!(bounds.is_finite());
        assert!(bounds.is_within_bounds(0.0) && bounds.is_within_bounds(10.0));

        assert!(Bounds::new(10.0, 0.0).is_err());
        assert!(Bounds::new(f64::NAN, 0.0).is_err());

        let open = Bounds::default();
        assert!(!open.has_lower_bound() && !open.has_upper_bound());
        assert!(open.is_within_bounds(-1e300));
    }

    #[test]
    fn test_check_reports_name() {
        let bounds = Bounds::new(0.0, 1.0).unwrap();
        assert!(bounds.check("q", 0.5).is_ok());

        match bounds.check("q", 1.5) {
            Err(BoundsError::ValueOutsideBounds { name, value, .. }) => {
                assert_eq!(name, "q");
                assert_eq!(value, 1.5);
            }
            other => panic!("Expected ValueOutsideBounds, got {:?}", other),
        }
    }

    #[test]
    fn test_open_ends_serialize_as_null() {
        let bounds = Bounds::new(0.0, INFINITY).unwrap();
        let json = serde_json::to_string(&bounds).unwrap();
        assert_eq!(json, r#"{"min":0.0,"max":null}"#);

        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bounds);

        let invalid = serde_json::from_str::<Bounds>(r#"{"min":3.0,"max":1.0}"#);
        assert!(invalid.is_err());
    }
}
