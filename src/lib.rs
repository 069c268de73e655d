//! # lensfit-rs
//!
//! `lensfit-rs` models strong gravitational lenses: it composes deflection
//! fields from analytic mass profiles, finds every image of a point source,
//! and fits lens parameters to observed image positions and fluxes.
//!
//! The library provides:
//! - Lens profiles (softened power-law `alpha`, external `shear`, point mass,
//!   mass sheet) behind the [`profiles::LensProfile`] trait
//! - A lens system that sums weighted deflections and magnification tensors
//! - An image solver that locates all roots of the lens equation
//! - Chi-square scoring in the source plane or image plane, with optional flux
//! - Derivative-free fitting over a per-parameter vary mask
//!
//! ## Basic Usage
//!
//! ```
//! use lensfit_rs::lens::{LensComponent, LensSystem};
//! use lensfit_rs::profiles::{Alpha, AlphaConfig};
//! use lensfit_rs::solver::ImageSolver;
//! use nalgebra::Point2;
//!
//! let sis = Alpha::new(AlphaConfig { b: 1.0, ..AlphaConfig::default() })?;
//! let mut system = LensSystem::new();
//! system.add(LensComponent::from_profile(sis))?;
//!
//! let images = ImageSolver::default().solve(&system, &Point2::new(0.2, 0.0))?;
//! assert!(images.n_images() >= 2);
//! # Ok::<(), lensfit_rs::LensError>(())
//! ```

pub mod chisq;
pub mod data;
pub mod error;
pub mod fit;
pub mod lens;
pub mod parameters;
pub mod profiles;
pub mod solver;

// Re-exports for convenience
pub use chisq::{ChiSquareBreakdown, FitOptions};
pub use data::{Dataset, ObservedImage, SourceData};
pub use error::{LensError, Result};
pub use fit::{FitConfig, FitContext, FitResult, FitStatus, OptimizerKind, QueryOptions};
pub use lens::{LensComponent, LensSystem};
pub use profiles::{LensProfile, ProfileKind};
pub use solver::{Image, ImageSet, ImageSolver, SolverConfig};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
