//! Lens components and their composition.

mod component;
mod system;

pub use component::LensComponent;
pub use system::{
    LensEntry, LensSystem, ScalingFn, DEFAULT_LENS_REDSHIFT, DEFAULT_SOURCE_REDSHIFT,
};
