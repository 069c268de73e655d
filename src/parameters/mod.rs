//! # Parameter System
//!
//! Named parameter snapshots, fitting limits, and the flattened
//! free-parameter vector the optimizers work on.
//!
//! ## Core Components
//!
//! - [`Parameter`]: a named view of one lens parameter with its vary flag and limits
//! - [`Bounds`]: min/max limits applied to trial values during fitting
//! - [`vector`]: gather/scatter between a [`LensSystem`](crate::lens::LensSystem)
//!   and the free-parameter vector
//!
//! ## Example Usage
//!
//! ```rust
//! use lensfit_rs::lens::{LensComponent, LensSystem};
//! use lensfit_rs::parameters::vector;
//! use lensfit_rs::profiles::{Alpha, AlphaConfig};
//!
//! let mut lens = LensComponent::from_profile(Alpha::new(AlphaConfig::default()).unwrap());
//! lens.set_vary("b", true).unwrap();
//! lens.set_limits("b", 0.0, 10.0).unwrap();
//!
//! let mut system = LensSystem::new();
//! system.add(lens).unwrap();
//!
//! assert_eq!(vector::free_parameter_names(&system), vec!["alpha0.b"]);
//! let free = vector::gather(&system);
//! vector::scatter(&(free * 2.0), &mut system).unwrap();
//! assert_eq!(system.component(0).unwrap().param("b").unwrap().value, 2.0);
//! ```

pub mod bounds;
pub mod parameter;
pub mod vector;

// Re-export key types
pub use bounds::{Bounds, BoundsError};
pub use parameter::Parameter;
