//! Composition of lens components into one deflection field.

use nalgebra::{Matrix2, Point2, Vector2};
use std::fmt;
use std::sync::Arc;

use super::LensComponent;
use crate::error::{LensError, Result};

/// Redshift-dependent weight applied to a component's deflection.
///
/// Called with `(lens_redshift, source_redshift)`; must return a finite,
/// positive value.
pub type ScalingFn = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Lens redshift used by [`LensSystem::add`].
pub const DEFAULT_LENS_REDSHIFT: f64 = 0.5;

/// Source redshift used by [`LensSystem::add`].
pub const DEFAULT_SOURCE_REDSHIFT: f64 = 1.0;

/// A component with its redshift pair and the resulting weight.
#[derive(Debug, Clone)]
pub struct LensEntry {
    pub component: LensComponent,
    pub lens_redshift: f64,
    pub source_redshift: f64,
    pub weight: f64,
}

/// Ordered collection of lens components.
///
/// Deflections and their derivatives are summed with per-component weights
/// `w_i = scaling(z_l, z_s)`. This is a single-plane approximation: every
/// component acts on the undeflected ray, and recursive multi-plane ray
/// tracing is not modelled.
///
/// The default scaling returns 1 for every redshift pair, so a system built
/// with [`LensSystem::new`] is a plain sum of its components.
#[derive(Clone)]
pub struct LensSystem {
    entries: Vec<LensEntry>,
    scaling: ScalingFn,
}

impl fmt::Debug for LensSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LensSystem")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl Default for LensSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LensSystem {
    /// Empty system with unit scaling.
    pub fn new() -> Self {
        Self::with_scaling(|_, _| 1.0)
    }

    /// Empty system with an injected redshift scaling function.
    ///
    /// # Examples
    ///
    /// ```
    /// use lensfit_rs::lens::{LensComponent, LensSystem};
    /// use lensfit_rs::profiles::{PointMass, PointMassConfig};
    /// use nalgebra::Point2;
    ///
    /// let mut system = LensSystem::with_scaling(|zl, zs| (zs - zl) / zs);
    /// system
    ///     .add_with_redshifts(
    ///         LensComponent::from_profile(PointMass::new(PointMassConfig::default()).unwrap()),
    ///         0.5,
    ///         2.0,
    ///     )
    ///     .unwrap();
    /// assert_eq!(system.entries()[0].weight, 0.75);
    /// let defl = system.total_deflection(&Point2::new(1.0, 0.0));
    /// assert!((defl.x - 0.75).abs() < 1e-12);
    /// ```
    pub fn with_scaling<F>(scaling: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            entries: Vec::new(),
            scaling: Arc::new(scaling),
        }
    }

    /// Add a component at the default redshifts `(0.5, 1.0)`.
    pub fn add(&mut self, component: LensComponent) -> Result<()> {
        self.add_with_redshifts(component, DEFAULT_LENS_REDSHIFT, DEFAULT_SOURCE_REDSHIFT)
    }

    /// Add a component at the given lens and source redshifts.
    pub fn add_with_redshifts(
        &mut self,
        component: LensComponent,
        lens_redshift: f64,
        source_redshift: f64,
    ) -> Result<()> {
        if !(lens_redshift >= 0.0) || !source_redshift.is_finite() {
            return Err(LensError::config(format!(
                "redshifts must be finite and non-negative, got ({}, {})",
                lens_redshift, source_redshift
            )));
        }
        if lens_redshift >= source_redshift {
            return Err(LensError::config(format!(
                "lens redshift {} must be below source redshift {}",
                lens_redshift, source_redshift
            )));
        }

        let weight = (self.scaling)(lens_redshift, source_redshift);
        if !weight.is_finite() || weight <= 0.0 {
            return Err(LensError::config(format!(
                "scaling for redshifts ({}, {}) must be finite and positive, got {}",
                lens_redshift, source_redshift, weight
            )));
        }

        self.entries.push(LensEntry {
            component,
            lens_redshift,
            source_redshift,
            weight,
        });
        Ok(())
    }

    /// Add several components at the default redshifts.
    pub fn add_lenses<I>(&mut self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = LensComponent>,
    {
        for component in components {
            self.add(component)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LensEntry] {
        &self.entries
    }

    pub fn components(&self) -> impl Iterator<Item = &LensComponent> + '_ {
        self.entries.iter().map(|e| &e.component)
    }

    pub(crate) fn components_mut(&mut self) -> impl Iterator<Item = &mut LensComponent> + '_ {
        self.entries.iter_mut().map(|e| &mut e.component)
    }

    pub fn component(&self, index: usize) -> Option<&LensComponent> {
        self.entries.get(index).map(|e| &e.component)
    }

    /// Mutable access for configuration (vary flags, limits, values).
    pub fn component_mut(&mut self, index: usize) -> Option<&mut LensComponent> {
        self.entries.get_mut(index).map(|e| &mut e.component)
    }

    /// Error unless at least one component is present.
    pub fn require_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LensError::config("lens system has no components"));
        }
        Ok(())
    }

    pub fn total_deflection(&self, pos: &Point2<f64>) -> Vector2<f64> {
        self.entries
            .iter()
            .fold(Vector2::zeros(), |acc, e| acc + e.component.deflection(pos) * e.weight)
    }

    pub fn total_hessian(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        self.entries
            .iter()
            .fold(Matrix2::zeros(), |acc, e| acc + e.component.hessian(pos) * e.weight)
    }

    /// Jacobian of the lens mapping, `I - total_hessian`.
    pub fn total_magnification_tensor(&self, pos: &Point2<f64>) -> Matrix2<f64> {
        Matrix2::identity() - self.total_hessian(pos)
    }

    pub fn total_potential(&self, pos: &Point2<f64>) -> f64 {
        self.entries
            .iter()
            .map(|e| e.component.potential(pos) * e.weight)
            .sum()
    }

    pub fn total_kappa(&self, pos: &Point2<f64>) -> f64 {
        self.entries
            .iter()
            .map(|e| e.component.profile().kappa(pos) * e.weight)
            .sum()
    }

    /// Map an image-plane position to the source plane.
    pub fn ray_trace(&self, pos: &Point2<f64>) -> Point2<f64> {
        pos - self.total_deflection(pos)
    }

    /// Signed magnification `1 / det(A)`; infinite on a critical curve.
    pub fn magnification(&self, pos: &Point2<f64>) -> f64 {
        1.0 / self.total_magnification_tensor(pos).determinant()
    }

    /// Half-width of a square around the origin that holds every
    /// component's centre plus its weighted Einstein radius.
    pub(crate) fn mass_extent(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| {
                let profile = e.component.profile();
                let c = profile.center();
                let r_e = profile.einstein_radius().unwrap_or(0.0);
                c.x.abs().max(c.y.abs()) + r_e * e.weight
            })
            .fold(0.0, f64::max)
    }

    /// Weighted sum of the sheet convergence and external shear, never
    /// negative.
    pub(crate) fn far_field_distortion(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.weight * e.component.profile().far_field_distortion())
            .sum::<f64>()
            .max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{Alpha, AlphaConfig, MassSheet, MassSheetConfig, Shear, ShearConfig};
    use approx::assert_relative_eq;

    fn sis(b: f64) -> LensComponent {
        LensComponent::from_profile(
            Alpha::new(AlphaConfig {
                b,
                ..AlphaConfig::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_deflections_add_linearly() {
        let shear = LensComponent::from_profile(
            Shear::new(ShearConfig {
                shear: 0.1,
                theta: 25.0,
                ..ShearConfig::default()
            })
            .unwrap(),
        );
        let mut system = LensSystem::new();
        system.add_lenses(vec![sis(1.5), shear.clone()]).unwrap();

        let pos = Point2::new(0.4, -1.2);
        let expected = sis(1.5).deflection(&pos) + shear.deflection(&pos);
        let defl = system.total_deflection(&pos);
        assert_relative_eq!(defl.x, expected.x, epsilon = 1e-14);
        assert_relative_eq!(defl.y, expected.y, epsilon = 1e-14);

        let traced = system.ray_trace(&pos);
        assert_relative_eq!(traced.x, pos.x - expected.x, epsilon = 1e-14);

        let a = system.total_magnification_tensor(&pos);
        let h = sis(1.5).hessian(&pos) + shear.hessian(&pos);
        assert_relative_eq!(a[(0, 1)], -h[(0, 1)], epsilon = 1e-14);
        assert_relative_eq!(system.magnification(&pos), 1.0 / a.determinant());
    }

    #[test]
    fn test_scaling_weights_components() {
        let mut system = LensSystem::with_scaling(|zl, zs| 1.0 - zl / zs);
        system.add(sis(2.0)).unwrap();
        assert_relative_eq!(system.entries()[0].weight, 0.5);

        let pos = Point2::new(3.0, 4.0);
        assert_relative_eq!(system.total_deflection(&pos).norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(system.total_kappa(&pos), 0.5 * 0.5 * 2.0 / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_redshifts_rejected() {
        let mut system = LensSystem::new();
        assert!(system.add_with_redshifts(sis(1.0), 1.0, 0.5).is_err());
        assert!(system.add_with_redshifts(sis(1.0), -0.1, 0.5).is_err());
        assert!(system.add_with_redshifts(sis(1.0), 0.3, f64::NAN).is_err());
        assert!(system.is_empty());
        assert!(system.require_non_empty().is_err());

        let mut zero = LensSystem::with_scaling(|_, _| 0.0);
        assert!(matches!(
            zero.add(sis(1.0)).unwrap_err(),
            LensError::Configuration(_)
        ));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut system = LensSystem::new();
        system.add(sis(1.0)).unwrap();
        let mut copy = system.clone();
        copy.component_mut(0).unwrap().set_param("b", 3.0).unwrap();
        assert_eq!(system.component(0).unwrap().param("b").unwrap().value, 1.0);
    }

    #[test]
    fn test_mass_extent_and_potential() {
        let mut system = LensSystem::new();
        system.add(sis(1.0)).unwrap();
        system
            .add(LensComponent::from_profile(
                MassSheet::new(MassSheetConfig {
                    kext: 0.2,
                    ..MassSheetConfig::default()
                })
                .unwrap(),
            ))
            .unwrap();
        assert_relative_eq!(system.mass_extent(), 1.0);
        assert_relative_eq!(system.far_field_distortion(), 0.2);

        let pos = Point2::new(2.0, 0.0);
        assert_relative_eq!(system.total_potential(&pos), 2.0 + 0.1 * 4.0, epsilon = 1e-10);
    }
}
