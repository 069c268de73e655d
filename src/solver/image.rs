//! Solved images of a source point.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image parity, the sign of the lens-mapping determinant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    Positive,
    Negative,
}

impl Parity {
    pub fn from_det(det: f64) -> Self {
        if det < 0.0 {
            Parity::Negative
        } else {
            Parity::Positive
        }
    }

    /// `+1` or `-1`.
    pub fn sign(&self) -> i8 {
        match self {
            Parity::Positive => 1,
            Parity::Negative => -1,
        }
    }
}

/// Marks an image found so close to a critical curve that its
/// magnification is numerically unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericalInstabilityWarning {
    /// Determinant of the lens mapping at the image.
    pub det: f64,
    /// Threshold the determinant fell below.
    pub min_stable_det: f64,
}

impl fmt::Display for NumericalInstabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "near-critical image: |det A| = {:.3e} < {:.1e}",
            self.det.abs(),
            self.min_stable_det
        )
    }
}

/// One image of a source point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub image_position: Point2<f64>,
    pub source_position: Point2<f64>,
    /// Signed magnification `1 / det A`.
    pub magnification: f64,
    pub parity: Parity,
    pub instability: Option<NumericalInstabilityWarning>,
}

impl Image {
    pub fn is_stable(&self) -> bool {
        self.instability.is_none()
    }

    /// Flux of this image for a source of the given flux.
    pub fn flux(&self, source_flux: f64) -> f64 {
        self.magnification.abs() * source_flux
    }
}

/// All images of one source point, in discovery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub source_position: Point2<f64>,
    pub images: Vec<Image>,
    /// Source flux the image fluxes are scaled by, when known.
    pub flux_normalization: Option<f64>,
}

impl ImageSet {
    pub fn new(source_position: Point2<f64>, images: Vec<Image>) -> Self {
        Self {
            source_position,
            images,
            flux_normalization: None,
        }
    }

    pub fn with_flux_normalization(mut self, source_flux: f64) -> Self {
        self.flux_normalization = Some(source_flux);
        self
    }

    pub fn n_images(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Image> {
        self.images.iter()
    }

    /// Images flagged as near-critical.
    pub fn unstable(&self) -> impl Iterator<Item = &Image> + '_ {
        self.images.iter().filter(|img| !img.is_stable())
    }

    /// Sum of the absolute magnifications.
    pub fn total_magnification(&self) -> f64 {
        self.images.iter().map(|img| img.magnification.abs()).sum()
    }
}

impl<'a> IntoIterator for &'a ImageSet {
    type Item = &'a Image;
    type IntoIter = std::slice::Iter<'a, Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

impl fmt::Display for ImageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "# source ({:.6}, {:.6}): {} image(s)",
            self.source_position.x,
            self.source_position.y,
            self.n_images()
        )?;
        writeln!(f, "#        x            y         magnification  parity")?;
        for img in &self.images {
            write!(
                f,
                "{:12.6} {:12.6} {:16.6e} {:+4}",
                img.image_position.x,
                img.image_position.y,
                img.magnification,
                img.parity.sign()
            )?;
            if let Some(flux) = self.flux_normalization {
                write!(f, "  flux {:.6}", img.flux(flux))?;
            }
            if img.instability.is_some() {
                write!(f, "  (unstable)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
