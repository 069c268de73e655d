use thiserror::Error;

use crate::parameters::bounds::BoundsError;

/// Error types for the lensfit-rs library.
#[derive(Error, Debug)]
pub enum LensError {
    /// Invalid lens configuration: a parameter outside its physical domain,
    /// an unknown configuration key, or a vary mask of the wrong length.
    ///
    /// Raised before any solve is attempted and never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The image solver found no image for a source position.
    ///
    /// Recoverable: the fitting loop turns it into a chi-square penalty.
    #[error("No image found for source position ({x}, {y})")]
    NoImageFound { x: f64, y: f64 },

    /// Error indicating a mismatch in vector or dataset dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed image-data record.
    #[error("Data format error on line {line}: {message}")]
    DataFormat { line: usize, message: String },

    /// Error raised by an optimizer before it could produce a result.
    #[error("Optimization failed: {0}")]
    Optimization(String),

    /// Error for boundary constraint problems.
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LensError {
    /// Build a configuration error from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        LensError::Configuration(message.into())
    }

    /// Returns true for errors that the fitting loop may absorb as a penalty.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LensError::NoImageFound { .. })
    }
}

/// Result type alias for lensfit-rs operations.
pub type Result<T> = std::result::Result<T, LensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LensError::config("q must be in (0, 1], got 1.5");
        assert!(format!("{}", err).contains("q must be in (0, 1], got 1.5"));

        let err = LensError::NoImageFound { x: 0.5, y: -0.25 };
        assert!(format!("{}", err).contains("(0.5, -0.25)"));

        let err = LensError::DataFormat {
            line: 7,
            message: "expected 3 fields".to_string(),
        };
        assert!(format!("{}", err).contains("line 7"));
    }

    #[test]
    fn test_error_conversion() {
        let bounds_err = BoundsError::InvalidBounds { min: 2.0, max: 1.0 };
        let err: LensError = bounds_err.into();
        match err {
            LensError::Bounds(_) => (),
            _ => panic!("Expected Bounds variant"),
        }

        let json_err = serde_json::from_str::<f64>("not json").unwrap_err();
        let err: LensError = json_err.into();
        match err {
            LensError::Json(_) => (),
            _ => panic!("Expected Json variant"),
        }
    }

    #[test]
    fn test_recoverable() {
        assert!(LensError::NoImageFound { x: 0.0, y: 0.0 }.is_recoverable());
        assert!(!LensError::config("bad").is_recoverable());
    }
}
