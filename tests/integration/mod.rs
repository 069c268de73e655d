//! Integration tests for the lensfit-rs library
//!
//! These tests simulate image data from a known lens and fit it back.

// Recovery of known parameters from noise-free data
pub mod fit_recovery;

// Fits to seeded noisy simulations
pub mod noisy_simulation;
