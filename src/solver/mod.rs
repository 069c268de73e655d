//! Image-plane solver for the lens equation.
//!
//! Finds every image position `theta` with `theta - alpha(theta) == beta`
//! inside a square search domain. The domain is covered by a grid whose
//! corners are mapped to the source plane; each cell is split into two
//! triangles, and a triangle whose mapped image contains `beta` yields a
//! starting point by barycentric interpolation. Cells whose corner
//! determinants change sign straddle a critical curve and are subdivided
//! before testing. Each starting point is then refined by damped Newton
//! iteration, and converged roots are deduplicated.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{LensError, Result};
use crate::lens::LensSystem;

pub mod image;

pub use image::{Image, ImageSet, NumericalInstabilityWarning, Parity};

/// Largest accepted number of grid cells per side.
pub const MAX_GRID_SIZE: usize = 2048;

/// Smallest `1 - kappa - gamma` used when sizing the automatic domain.
const MIN_FOCUS: f64 = 0.1;

/// Extra room left around points the domain has to cover.
const COVER_MARGIN: f64 = 1.25;

/// Square region of the image plane searched for images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SearchDomain {
    /// Centred on the origin, sized from the component centres, their
    /// Einstein radii and the source offset, then stretched by
    /// `1 / (1 - kappa - gamma)` for sheets and external shear.
    Auto,
    /// Explicit square.
    Square {
        center: Point2<f64>,
        half_width: f64,
    },
}

impl Default for SearchDomain {
    fn default() -> Self {
        SearchDomain::Auto
    }
}

/// Configuration options for the image solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Region searched for images. Default: Auto
    pub domain: SearchDomain,

    /// Smallest half-width of the automatic domain. Default: 1.0
    pub min_half_width: f64,

    /// Number of grid cells per side, at most [`MAX_GRID_SIZE`]. Default: 40
    pub grid_size: usize,

    /// Maximum recursive splits of a cell crossing a critical curve. Default: 3
    pub max_subdivisions: usize,

    /// Roots closer than this are the same image. Default: 1e-6
    pub position_tolerance: f64,

    /// Images with `|det A|` below this are flagged unstable. Default: 1e-4
    pub min_stable_det: f64,

    /// Source-plane residual at which Newton iteration stops. Default: 1e-11
    pub newton_tolerance: f64,

    /// Newton iterations per attempt. Default: 50
    pub max_newton_iterations: usize,

    /// Restarts from a shifted seed after a failed attempt. Default: 3
    pub max_retries: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            domain: SearchDomain::Auto,
            min_half_width: 1.0,
            grid_size: 40,
            max_subdivisions: 3,
            position_tolerance: 1e-6,
            min_stable_det: 1e-4,
            newton_tolerance: 1e-11,
            max_newton_iterations: 50,
            max_retries: 3,
        }
    }
}

impl SolverConfig {
    pub fn with_domain(mut self, center: Point2<f64>, half_width: f64) -> Self {
        self.domain = SearchDomain::Square { center, half_width };
        self
    }

    pub fn with_min_half_width(mut self, min_half_width: f64) -> Self {
        self.min_half_width = min_half_width;
        self
    }

    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn with_max_subdivisions(mut self, max_subdivisions: usize) -> Self {
        self.max_subdivisions = max_subdivisions;
        self
    }

    pub fn with_position_tolerance(mut self, tolerance: f64) -> Self {
        self.position_tolerance = tolerance;
        self
    }

    pub fn with_min_stable_det(mut self, min_stable_det: f64) -> Self {
        self.min_stable_det = min_stable_det;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(LensError::config(format!(
                "solver grid_size must be in 1..={}, got {}",
                MAX_GRID_SIZE, self.grid_size
            )));
        }
        if !(self.min_half_width > 0.0) || !self.min_half_width.is_finite() {
            return Err(LensError::config(format!(
                "min_half_width must be positive and finite, got {}",
                self.min_half_width
            )));
        }
        if !(self.position_tolerance > 0.0) || !(self.newton_tolerance > 0.0) {
            return Err(LensError::config("solver tolerances must be positive"));
        }
        if !(self.min_stable_det >= 0.0) {
            return Err(LensError::config("min_stable_det must be >= 0"));
        }
        if let SearchDomain::Square { center, half_width } = self.domain {
            let finite = half_width.is_finite() && center.x.is_finite() && center.y.is_finite();
            if !finite || half_width <= 0.0 {
                return Err(LensError::config(format!(
                    "invalid search domain: centre ({}, {}), half-width {}",
                    center.x, center.y, half_width
                )));
            }
        }
        Ok(())
    }
}

/// Grid corner with its source-plane image and mapping determinant.
#[derive(Debug, Clone, Copy)]
struct Corner {
    theta: Point2<f64>,
    beta: Point2<f64>,
    det: f64,
}

/// Starting point for Newton refinement.
#[derive(Debug, Clone, Copy)]
struct Seed {
    position: Point2<f64>,
    cell_size: f64,
}

#[derive(Debug, Clone, Copy)]
enum NewtonFailure {
    Singular(f64),
    NonFinite,
    NotConverged(f64),
}

impl fmt::Display for NewtonFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NewtonFailure::Singular(det) => write!(f, "singular Jacobian (det = {:.3e})", det),
            NewtonFailure::NonFinite => write!(f, "non-finite iterate"),
            NewtonFailure::NotConverged(r) => write!(f, "not converged (residual {:.3e})", r),
        }
    }
}

/// Determinants below this stop a Newton attempt.
const SINGULAR_DET: f64 = 1e-14;

/// Barycentric slack when testing whether a point lies in a triangle.
const BARYCENTRIC_SLACK: f64 = 1e-10;

/// Seed shifts for retries, in units of the seed's cell size.
const RETRY_SHIFTS: [(f64, f64); 4] = [
    (0.31, 0.13),
    (-0.13, 0.31),
    (-0.31, -0.13),
    (0.13, -0.31),
];

/// Finds all images of a source point for a given lens system.
#[derive(Debug, Clone, Default)]
pub struct ImageSolver {
    config: SolverConfig,
}

impl ImageSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Resolve the search domain for a source position.
    pub fn domain(&self, system: &LensSystem, source: &Point2<f64>) -> (Point2<f64>, f64) {
        match self.config.domain {
            SearchDomain::Square { center, half_width } => (center, half_width),
            SearchDomain::Auto => {
                let focus = (1.0 - system.far_field_distortion()).max(MIN_FOCUS);
                let half_width = (2.0 * system.mass_extent() + source.coords.norm()) / focus;
                (Point2::origin(), half_width.max(self.config.min_half_width))
            }
        }
    }

    /// A solver whose automatic domain also covers `points`.
    ///
    /// Used to make sure observed image positions lie inside the searched
    /// region. An explicit [`SearchDomain::Square`] is left as configured.
    pub fn covering<'a, I>(&self, points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point2<f64>>,
    {
        let reach = points
            .into_iter()
            .map(|p| p.x.abs().max(p.y.abs()))
            .filter(|r| r.is_finite())
            .fold(0.0, f64::max);
        let mut config = self.config.clone();
        config.min_half_width = config.min_half_width.max(COVER_MARGIN * reach);
        Self { config }
    }

    /// Find every image of `source`.
    ///
    /// Images are returned in discovery order: the row-major order of the
    /// grid cells that seeded them. Near-critical images are kept and carry
    /// a [`NumericalInstabilityWarning`].
    ///
    /// # Errors
    ///
    /// * [`LensError::Configuration`] if the system is empty or the solver
    ///   configuration is invalid
    /// * [`LensError::InvalidInput`] if the source position is not finite
    /// * [`LensError::NoImageFound`] if no root survives refinement
    pub fn solve(&self, system: &LensSystem, source: &Point2<f64>) -> Result<ImageSet> {
        system.require_non_empty()?;
        self.config.validate()?;
        if !source.x.is_finite() || !source.y.is_finite() {
            return Err(LensError::InvalidInput(format!(
                "source position ({}, {}) is not finite",
                source.x, source.y
            )));
        }

        let (center, half_width) = self.domain(system, source);
        let seeds = self.collect_seeds(system, source, &center, half_width);

        let mut roots: Vec<Point2<f64>> = Vec::new();
        for seed in &seeds {
            let Some(root) = self.refine(system, source, seed) else {
                continue;
            };
            let d = root - center;
            let margin = half_width + self.config.position_tolerance;
            if d.x.abs() > margin || d.y.abs() > margin {
                debug!(x = root.x, y = root.y, "dropping root outside the search domain");
                continue;
            }
            if roots
                .iter()
                .any(|r| (*r - root).norm() < self.config.position_tolerance)
            {
                continue;
            }
            roots.push(root);
        }

        if roots.is_empty() {
            return Err(LensError::NoImageFound {
                x: source.x,
                y: source.y,
            });
        }

        let images = roots
            .into_iter()
            .map(|root| self.make_image(system, source, root))
            .collect();
        Ok(ImageSet::new(*source, images))
    }

    fn make_image(&self, system: &LensSystem, source: &Point2<f64>, root: Point2<f64>) -> Image {
        let det = system.total_magnification_tensor(&root).determinant();
        let instability = (det.abs() < self.config.min_stable_det).then_some(
            NumericalInstabilityWarning {
                det,
                min_stable_det: self.config.min_stable_det,
            },
        );
        Image {
            image_position: root,
            source_position: *source,
            magnification: 1.0 / det,
            parity: Parity::from_det(det),
            instability,
        }
    }

    fn corner(&self, system: &LensSystem, theta: Point2<f64>) -> Corner {
        Corner {
            theta,
            beta: system.ray_trace(&theta),
            det: system.total_magnification_tensor(&theta).determinant(),
        }
    }

    fn collect_seeds(
        &self,
        system: &LensSystem,
        source: &Point2<f64>,
        center: &Point2<f64>,
        half_width: f64,
    ) -> Vec<Seed> {
        let n = self.config.grid_size;
        let step = 2.0 * half_width / n as f64;
        let origin = *center - Vector2::new(half_width, half_width);

        let corners: Vec<Corner> = (0..=n)
            .flat_map(|j| (0..=n).map(move |i| (i, j)))
            .map(|(i, j)| {
                let theta = origin + Vector2::new(i as f64 * step, j as f64 * step);
                self.corner(system, theta)
            })
            .collect();
        let at = |i: usize, j: usize| corners[j * (n + 1) + i];

        let mut seeds = Vec::new();
        for j in 0..n {
            for i in 0..n {
                let cell = [at(i, j), at(i + 1, j), at(i, j + 1), at(i + 1, j + 1)];
                self.scan_cell(system, source, cell, step, 0, &mut seeds);
            }
        }
        seeds
    }

    /// Test one cell, given as `[lower-left, lower-right, upper-left, upper-right]`.
    fn scan_cell(
        &self,
        system: &LensSystem,
        source: &Point2<f64>,
        cell: [Corner; 4],
        size: f64,
        depth: usize,
        seeds: &mut Vec<Seed>,
    ) {
        let [c00, c10, c01, c11] = cell;

        if depth < self.config.max_subdivisions && crosses_critical_curve(&cell) {
            let mid = |a: &Corner, b: &Corner| {
                self.corner(system, Point2::from((a.theta.coords + b.theta.coords) * 0.5))
            };
            let bottom = mid(&c00, &c10);
            let left = mid(&c00, &c01);
            let right = mid(&c10, &c11);
            let top = mid(&c01, &c11);
            let centre = mid(&c00, &c11);
            let half = 0.5 * size;

            for sub in [
                [c00, bottom, left, centre],
                [bottom, c10, centre, right],
                [left, centre, c01, top],
                [centre, right, top, c11],
            ] {
                self.scan_cell(system, source, sub, half, depth + 1, seeds);
            }
            return;
        }

        for triangle in [[c00, c10, c11], [c00, c11, c01]] {
            if let Some(position) = triangle_seed(&triangle, source) {
                seeds.push(Seed {
                    position,
                    cell_size: size,
                });
            }
        }
    }

    /// Refine a seed, retrying from shifted positions after a failure.
    fn refine(&self, system: &LensSystem, source: &Point2<f64>, seed: &Seed) -> Option<Point2<f64>> {
        let mut start = seed.position;
        for attempt in 0..=self.config.max_retries {
            match self.newton(system, source, start) {
                Ok(root) => return Some(root),
                Err(failure) => {
                    debug!(
                        x = start.x,
                        y = start.y,
                        attempt,
                        "Newton refinement failed: {}",
                        failure
                    );
                    let (dx, dy) = RETRY_SHIFTS[attempt % RETRY_SHIFTS.len()];
                    let scale = seed.cell_size * (1 + attempt / RETRY_SHIFTS.len()) as f64;
                    start = seed.position + Vector2::new(dx, dy) * scale;
                }
            }
        }
        None
    }

    /// Damped Newton iteration on `A(theta) d = beta(theta) - source`.
    fn newton(
        &self,
        system: &LensSystem,
        source: &Point2<f64>,
        start: Point2<f64>,
    ) -> std::result::Result<Point2<f64>, NewtonFailure> {
        let mut theta = start;
        let mut residual = system.ray_trace(&theta) - source;
        let mut norm = residual.norm();

        for _ in 0..self.config.max_newton_iterations {
            if norm < self.config.newton_tolerance {
                return Ok(theta);
            }

            let jacobian = system.total_magnification_tensor(&theta);
            let det = jacobian.determinant();
            if !det.is_finite() || det.abs() < SINGULAR_DET {
                return Err(NewtonFailure::Singular(det));
            }
            let step = match jacobian.try_inverse() {
                Some(inverse) => inverse * residual,
                None => return Err(NewtonFailure::Singular(det)),
            };

            // Backtrack until the residual decreases
            let mut lambda = 1.0;
            let (mut next, mut next_residual) = (theta, residual);
            for _ in 0..8 {
                next = theta - step * lambda;
                next_residual = system.ray_trace(&next) - source;
                if next_residual.norm() < norm {
                    break;
                }
                lambda *= 0.5;
            }

            if !next.x.is_finite() || !next.y.is_finite() || !next_residual.norm().is_finite() {
                return Err(NewtonFailure::NonFinite);
            }
            theta = next;
            residual = next_residual;
            norm = residual.norm();
        }

        if norm < self.config.newton_tolerance {
            Ok(theta)
        } else {
            Err(NewtonFailure::NotConverged(norm))
        }
    }
}

fn crosses_critical_curve(cell: &[Corner; 4]) -> bool {
    if cell.iter().any(|c| !c.det.is_finite()) {
        return true;
    }
    let positive = cell.iter().filter(|c| c.det > 0.0).count();
    positive != 0 && positive != cell.len()
}

/// Barycentric starting point if the mapped triangle contains `source`.
fn triangle_seed(triangle: &[Corner; 3], source: &Point2<f64>) -> Option<Point2<f64>> {
    let [a, b, c] = triangle;
    let v0 = b.beta - a.beta;
    let v1 = c.beta - a.beta;
    let v2 = *source - a.beta;

    let denom = v0.x * v1.y - v1.x * v0.y;
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let l1 = (v2.x * v1.y - v1.x * v2.y) / denom;
    let l2 = (v0.x * v2.y - v2.x * v0.y) / denom;
    let l0 = 1.0 - l1 - l2;
    if l0 < -BARYCENTRIC_SLACK || l1 < -BARYCENTRIC_SLACK || l2 < -BARYCENTRIC_SLACK {
        return None;
    }
    Some(Point2::from(
        a.theta.coords * l0 + b.theta.coords * l1 + c.theta.coords * l2,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::LensComponent;
    use crate::profiles::{
        Alpha, AlphaConfig, MassSheet, MassSheetConfig, PointMass, PointMassConfig, Shear,
        ShearConfig,
    };
    use approx::assert_relative_eq;

    fn example_system() -> LensSystem {
        let alpha = Alpha::new(AlphaConfig {
            b: 4.5,
            alpha: 1.0,
            s: 0.0,
            q: 0.8,
            theta: 30.0,
            xc: 0.7,
            yc: 0.3,
        })
        .unwrap();
        let shear = Shear::new(ShearConfig {
            shear: 0.02,
            theta: 10.0,
            xc: 0.0,
            yc: 0.0,
        })
        .unwrap();
        let mut system = LensSystem::new();
        system.add(LensComponent::from_profile(alpha)).unwrap();
        system.add(LensComponent::from_profile(shear)).unwrap();
        system
    }

    #[test]
    fn test_triangle_seed_interpolates() {
        let corner = |x: f64, y: f64| Corner {
            theta: Point2::new(x, y),
            beta: Point2::new(2.0 * x, 2.0 * y),
            det: 4.0,
        };
        let tri = [corner(0.0, 0.0), corner(1.0, 0.0), corner(0.0, 1.0)];
        let seed = triangle_seed(&tri, &Point2::new(0.5, 0.5)).unwrap();
        assert_relative_eq!(seed.x, 0.25, epsilon = 1e-14);
        assert_relative_eq!(seed.y, 0.25, epsilon = 1e-14);
        assert!(triangle_seed(&tri, &Point2::new(1.5, 1.5)).is_none());
    }

    #[test]
    fn test_point_mass_two_images() {
        let mut system = LensSystem::new();
        system
            .add(LensComponent::from_profile(
                PointMass::new(PointMassConfig::default()).unwrap(),
            ))
            .unwrap();
        let beta = 0.5;
        let set = ImageSolver::default()
            .solve(&system, &Point2::new(beta, 0.0))
            .unwrap();
        assert_eq!(set.n_images(), 2);

        // theta = (beta +- sqrt(beta^2 + 4)) / 2
        let mut xs: Vec<f64> = set.iter().map(|img| img.image_position.x).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        let root = (beta * beta + 4.0_f64).sqrt();
        assert_relative_eq!(xs[0], (beta - root) / 2.0, epsilon = 1e-8);
        assert_relative_eq!(xs[1], (beta + root) / 2.0, epsilon = 1e-8);

        let parities: Vec<i8> = set.iter().map(|img| img.parity.sign()).collect();
        assert!(parities.contains(&1) && parities.contains(&-1));
    }

    #[test]
    fn test_example_scenario() {
        let system = example_system();
        let source = Point2::new(0.5, 0.1);
        let set = ImageSolver::default().solve(&system, &source).unwrap();

        assert!(set.n_images() >= 2);
        assert!(set.iter().any(|img| img.parity == Parity::Positive));
        assert!(set.iter().any(|img| img.parity == Parity::Negative));
        for img in &set {
            assert!(img.magnification.is_finite());
            assert!(img.magnification != 0.0);
            let traced = system.ray_trace(&img.image_position);
            assert!((traced - source).norm() < 1e-6);
        }
    }

    #[test]
    fn test_solve_is_deterministic() {
        let system = example_system();
        let solver = ImageSolver::default();
        let source = Point2::new(0.9, 0.2);
        let first = solver.solve(&system, &source).unwrap();
        let second = solver.solve(&system, &source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_images_are_distinct() {
        let system = example_system();
        let solver = ImageSolver::new(SolverConfig::default().with_grid_size(60));
        let set = solver.solve(&system, &Point2::new(0.6, 0.35)).unwrap();
        for (i, a) in set.images.iter().enumerate() {
            for b in &set.images[i + 1..] {
                assert!((a.image_position - b.image_position).norm() >= 1e-6);
            }
        }
    }

    #[test]
    fn test_no_image_outside_domain() {
        let system = example_system();
        let solver = ImageSolver::new(
            SolverConfig::default().with_domain(Point2::new(100.0, 100.0), 1.0),
        );
        let err = solver.solve(&system, &Point2::new(0.5, 0.1)).unwrap_err();
        assert!(matches!(err, LensError::NoImageFound { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_empty_system_is_a_configuration_error() {
        let err = ImageSolver::default()
            .solve(&LensSystem::new(), &Point2::origin())
            .unwrap_err();
        assert!(matches!(err, LensError::Configuration(_)));
    }

    #[test]
    fn test_near_critical_images_are_flagged() {
        let system = example_system();
        let solver = ImageSolver::new(SolverConfig::default().with_min_stable_det(10.0));
        let set = solver.solve(&system, &Point2::new(0.5, 0.1)).unwrap();
        assert_eq!(set.unstable().count(), set.n_images());
        for img in &set {
            let warning = img.instability.unwrap();
            assert_relative_eq!(1.0 / warning.det, img.magnification);
        }
    }

    #[test]
    fn test_auto_domain_allows_for_mass_sheet() {
        // SIS b = 1 in a kext = 0.5 sheet: 0.5 * 8 - 1 = 3, a single image at x = 8
        let mut system = LensSystem::new();
        system
            .add(LensComponent::from_profile(
                Alpha::new(AlphaConfig::default()).unwrap(),
            ))
            .unwrap();
        system
            .add(LensComponent::from_profile(
                MassSheet::new(MassSheetConfig {
                    kext: 0.5,
                    ..MassSheetConfig::default()
                })
                .unwrap(),
            ))
            .unwrap();
        let source = Point2::new(3.0, 0.0);
        assert!((system.ray_trace(&Point2::new(8.0, 0.0)) - source).norm() < 1e-12);

        let solver = ImageSolver::default();
        let (_, half_width) = solver.domain(&system, &source);
        assert!(half_width > 8.0);

        let set = solver.solve(&system, &source).unwrap();
        assert_eq!(set.n_images(), 1);
        assert_relative_eq!(set.images[0].image_position.x, 8.0, epsilon = 1e-8);
        assert_relative_eq!(set.images[0].image_position.y, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_covering_widens_only_the_auto_domain() {
        let system = example_system();
        let source = Point2::new(0.5, 0.1);
        let far = [Point2::new(-40.0, 3.0)];

        let (_, half_width) = ImageSolver::default().covering(&far).domain(&system, &source);
        assert!(half_width >= 40.0);

        let fixed = ImageSolver::new(SolverConfig::default().with_domain(Point2::origin(), 5.0));
        assert_eq!(fixed.covering(&far).domain(&system, &source).1, 5.0);
    }

    #[test]
    fn test_grid_size_is_bounded() {
        let system = example_system();
        let source = Point2::new(0.5, 0.1);
        for grid_size in [0, MAX_GRID_SIZE + 1, usize::MAX] {
            let solver = ImageSolver::new(SolverConfig::default().with_grid_size(grid_size));
            assert!(matches!(
                solver.solve(&system, &source),
                Err(LensError::Configuration(_))
            ));
        }
    }
}
