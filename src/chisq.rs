//! Chi-square between computed and observed images.
//!
//! [`evaluate`] scores one source point. It is a pure function of its
//! arguments; the fitting loop sums it over every source in a dataset.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::AddAssign;

use crate::data::SourceData;
use crate::fit::OptimizerKind;
use crate::lens::LensSystem;
use crate::solver::ImageSet;

/// Options that shape the chi-square objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    /// Add a flux term for images with observed flux. Default: false
    pub include_flux_chisq: bool,

    /// Compare positions in the image plane instead of the source plane. Default: false
    pub use_image_plane_chisq: bool,

    /// Optimizer used by [`FitContext::fit`](crate::fit::FitContext::fit). Default: Simplex
    pub optimizer_kind: OptimizerKind,

    /// Weight source-plane residuals by the squared magnification. Default: true
    pub magnification_weighted_source_chisq: bool,

    /// Added per missing or extra image. Default: 100
    pub image_count_penalty: f64,

    /// Objective value for a trial that cannot be scored: no image found,
    /// a parameter outside its domain or limits, or a non-finite result.
    /// Default: 1e30
    pub failure_penalty: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            include_flux_chisq: false,
            use_image_plane_chisq: false,
            optimizer_kind: OptimizerKind::Simplex,
            magnification_weighted_source_chisq: true,
            image_count_penalty: 100.0,
            failure_penalty: 1e30,
        }
    }
}

impl FitOptions {
    pub fn with_flux_chisq(mut self, include: bool) -> Self {
        self.include_flux_chisq = include;
        self
    }

    pub fn with_image_plane_chisq(mut self, image_plane: bool) -> Self {
        self.use_image_plane_chisq = image_plane;
        self
    }

    pub fn with_optimizer(mut self, kind: OptimizerKind) -> Self {
        self.optimizer_kind = kind;
        self
    }

    pub fn with_magnification_weighting(mut self, weighted: bool) -> Self {
        self.magnification_weighted_source_chisq = weighted;
        self
    }

    pub fn with_image_count_penalty(mut self, penalty: f64) -> Self {
        self.image_count_penalty = penalty;
        self
    }
}

/// Terms of the chi-square.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChiSquareBreakdown {
    pub position: f64,
    pub flux: f64,
    /// Penalty for image-count mismatches.
    pub image_count: f64,
    /// Penalty for trials that could not be scored.
    pub failure: f64,
    pub n_missing: usize,
    pub n_extra: usize,
}

impl ChiSquareBreakdown {
    /// Breakdown of a trial that could not be scored.
    pub fn failed(penalty: f64) -> Self {
        Self {
            failure: penalty,
            ..Self::default()
        }
    }

    pub fn total(&self) -> f64 {
        self.position + self.flux + self.image_count + self.failure
    }
}

impl AddAssign for ChiSquareBreakdown {
    fn add_assign(&mut self, other: Self) {
        self.position += other.position;
        self.flux += other.flux;
        self.image_count += other.image_count;
        self.failure += other.failure;
        self.n_missing += other.n_missing;
        self.n_extra += other.n_extra;
    }
}

impl Sum for ChiSquareBreakdown {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, item| {
            acc += item;
            acc
        })
    }
}

impl fmt::Display for ChiSquareBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chisq = {:.6e} (position {:.6e}, flux {:.6e}",
            self.total(),
            self.position,
            self.flux
        )?;
        if self.n_missing + self.n_extra > 0 {
            write!(
                f,
                ", {} missing / {} extra image(s)",
                self.n_missing, self.n_extra
            )?;
        }
        if self.failure > 0.0 {
            write!(f, ", failure penalty {:.1e}", self.failure)?;
        }
        write!(f, ")")
    }
}

/// Source position that best explains the observed images.
///
/// Each observed image is traced back to the source plane; the result is
/// the mean of the traced points weighted by `mu^2 / sigma_pos^2`, or by
/// `1 / sigma_pos^2` when `magnification_weighted` is false. Images with a
/// non-finite weight are skipped.
pub fn estimate_source_position(
    lens: &LensSystem,
    observed: &SourceData,
    magnification_weighted: bool,
) -> Point2<f64> {
    let mut weighted_sum = Vector2::zeros();
    let mut weight_total = 0.0;
    let mut plain_sum = Vector2::zeros();

    for image in &observed.images {
        let beta = lens.ray_trace(&image.position);
        plain_sum += beta.coords;
        let weight =
            source_plane_weight(lens, &image.position, image.sigma_pos, magnification_weighted);
        if weight.is_finite() {
            weighted_sum += beta.coords * weight;
            weight_total += weight;
        }
    }

    if weight_total > 0.0 {
        Point2::from(weighted_sum / weight_total)
    } else {
        Point2::from(plain_sum / observed.images.len().max(1) as f64)
    }
}

/// Source flux that minimises the flux chi-square for the given
/// `(|mu|, observed flux, sigma_flux)` triples.
///
/// Returns `None` when no triple carries information.
pub fn best_fit_source_flux(matches: &[(f64, f64, f64)]) -> Option<f64> {
    let (num, den) = matches
        .iter()
        .fold((0.0, 0.0), |(num, den), &(mu, flux, sigma)| {
            let w = 1.0 / (sigma * sigma);
            (num + mu * flux * w, den + mu * mu * w)
        });
    (den > 0.0 && den.is_finite()).then(|| num / den)
}

fn source_plane_weight(
    lens: &LensSystem,
    position: &Point2<f64>,
    sigma_pos: f64,
    magnification_weighted: bool,
) -> f64 {
    let inv_var = 1.0 / (sigma_pos * sigma_pos);
    if magnification_weighted {
        let mu = lens.magnification(position);
        mu * mu * inv_var
    } else {
        inv_var
    }
}

/// Score one source point.
///
/// * `computed` - images solved for the trial source position
/// * `observed` - the observed images of that source
/// * `lens` - the trial lens system, used to trace observed images in
///   source-plane mode
/// * `options` - mode switches and penalties
pub fn evaluate(
    computed: &ImageSet,
    observed: &SourceData,
    lens: &LensSystem,
    options: &FitOptions,
) -> ChiSquareBreakdown {
    let mut breakdown = if options.use_image_plane_chisq {
        image_plane_terms(computed, observed, options)
    } else {
        let mut terms = source_plane_terms(observed, lens, options);
        terms.n_missing = observed.n_images().saturating_sub(computed.n_images());
        terms.n_extra = computed.n_images().saturating_sub(observed.n_images());
        terms
    };
    breakdown.image_count =
        (breakdown.n_missing + breakdown.n_extra) as f64 * options.image_count_penalty;
    breakdown
}

/// Pair each observed image with its nearest unused computed image.
///
/// Greedy in observation order; `None` marks an observed image left without
/// a partner.
fn match_images(computed: &ImageSet, observed: &SourceData) -> Vec<Option<(usize, f64)>> {
    let mut used = vec![false; computed.n_images()];
    observed
        .images
        .iter()
        .map(|obs| {
            let nearest = computed
                .images
                .iter()
                .enumerate()
                .filter(|(k, _)| !used[*k])
                .map(|(k, img)| (k, (img.image_position - obs.position).norm_squared()))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((k, _)) = nearest {
                used[k] = true;
            }
            nearest
        })
        .collect()
}

/// `(|mu|, observed flux, sigma_flux)` for every matched image with a flux.
fn image_plane_flux_matches(
    computed: &ImageSet,
    observed: &SourceData,
    pairs: &[Option<(usize, f64)>],
) -> Vec<(f64, f64, f64)> {
    observed
        .images
        .iter()
        .zip(pairs)
        .filter_map(|(obs, pair)| {
            let (k, _) = (*pair)?;
            let flux = obs.flux?;
            let mu = computed.images[k].magnification.abs();
            Some((mu, flux, obs.sigma_flux.unwrap_or(1.0)))
        })
        .collect()
}

/// Source flux the computed images are scaled by: the recorded value, or
/// the best fit to the observed fluxes of the matched images.
pub fn source_flux(computed: &ImageSet, observed: &SourceData) -> Option<f64> {
    observed.source_flux.or_else(|| {
        let pairs = match_images(computed, observed);
        best_fit_source_flux(&image_plane_flux_matches(computed, observed, &pairs))
    })
}

fn image_plane_terms(
    computed: &ImageSet,
    observed: &SourceData,
    options: &FitOptions,
) -> ChiSquareBreakdown {
    let mut breakdown = ChiSquareBreakdown::default();
    let pairs = match_images(computed, observed);

    for (obs, pair) in observed.images.iter().zip(&pairs) {
        match pair {
            Some((_, dist_sq)) => breakdown.position += dist_sq / (obs.sigma_pos * obs.sigma_pos),
            None => breakdown.n_missing += 1,
        }
    }
    let matched = pairs.iter().flatten().count();
    breakdown.n_extra = computed.n_images() - matched;

    if options.include_flux_chisq {
        let flux_matches = image_plane_flux_matches(computed, observed, &pairs);
        breakdown.flux = flux_term(observed.source_flux, &flux_matches);
    }
    breakdown
}

fn source_plane_terms(
    observed: &SourceData,
    lens: &LensSystem,
    options: &FitOptions,
) -> ChiSquareBreakdown {
    let weighted = options.magnification_weighted_source_chisq;
    let reference = observed
        .source_position
        .unwrap_or_else(|| estimate_source_position(lens, observed, weighted));

    let mut breakdown = ChiSquareBreakdown::default();
    let mut flux_matches = Vec::new();
    for obs in &observed.images {
        let beta = lens.ray_trace(&obs.position);
        let weight = source_plane_weight(lens, &obs.position, obs.sigma_pos, weighted);
        breakdown.position += weight * (beta - reference).norm_squared();

        if let Some(flux) = obs.flux {
            let mu = lens.magnification(&obs.position).abs();
            flux_matches.push((mu, flux, obs.sigma_flux.unwrap_or(1.0)));
        }
    }

    if options.include_flux_chisq {
        breakdown.flux = flux_term(observed.source_flux, &flux_matches);
    }
    breakdown
}

fn flux_term(source_flux: Option<f64>, matches: &[(f64, f64, f64)]) -> f64 {
    let Some(source_flux) = source_flux.or_else(|| best_fit_source_flux(matches)) else {
        return 0.0;
    };
    matches
        .iter()
        .map(|&(mu, flux, sigma)| {
            let r = (mu * source_flux - flux) / sigma;
            r * r
        })
        .sum()
}
