//! Observed image data used as the fitting target.
//!
//! A [`Dataset`] holds one [`SourceData`] record per source point. Each
//! record lists the observed images with their position uncertainty and,
//! optionally, a flux measurement.
//!
//! Besides serde JSON, datasets read and write a plain text record format:
//!
//! ```text
//! # comment lines and trailing comments start with '#'
//! 0.5 0.1 4            # src_x src_y n_images  (or just n_images)
//! x y flux [sigma_pos [sigma_flux]]
//! ...
//! ```
//!
//! A flux of `0` means the image has no flux measurement, and a missing
//! `sigma_pos` defaults to [`DEFAULT_SIGMA_POS`].

use nalgebra::Point2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LensError, Result};
use crate::lens::LensSystem;
use crate::solver::ImageSolver;

/// Position uncertainty assumed when a text record omits it.
pub const DEFAULT_SIGMA_POS: f64 = 0.01;

/// One observed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedImage {
    pub position: Point2<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flux: Option<f64>,
    pub sigma_pos: f64,
    /// Flux uncertainty; unit weight when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma_flux: Option<f64>,
}

impl ObservedImage {
    pub fn new(x: f64, y: f64, sigma_pos: f64) -> Self {
        Self {
            position: Point2::new(x, y),
            flux: None,
            sigma_pos,
            sigma_flux: None,
        }
    }

    pub fn with_flux(mut self, flux: f64, sigma_flux: f64) -> Self {
        self.flux = Some(flux);
        self.sigma_flux = Some(sigma_flux);
        self
    }

    fn validate(&self) -> Result<()> {
        let p = self.position;
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(LensError::InvalidInput(format!(
                "image position ({}, {}) is not finite",
                p.x, p.y
            )));
        }
        if !(self.sigma_pos > 0.0) || !self.sigma_pos.is_finite() {
            return Err(LensError::InvalidInput(format!(
                "sigma_pos must be positive, got {}",
                self.sigma_pos
            )));
        }
        if let Some(flux) = self.flux {
            if !flux.is_finite() {
                return Err(LensError::InvalidInput(format!("flux {} is not finite", flux)));
            }
        }
        if let Some(sigma) = self.sigma_flux {
            if !(sigma > 0.0) || !sigma.is_finite() {
                return Err(LensError::InvalidInput(format!(
                    "sigma_flux must be positive, got {}",
                    sigma
                )));
            }
        }
        Ok(())
    }
}

/// Observed images of one source point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    /// Known source position; estimated from the images when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_position: Option<Point2<f64>>,
    /// Known source flux; fitted analytically when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_flux: Option<f64>,
    pub images: Vec<ObservedImage>,
}

impl SourceData {
    pub fn new(images: Vec<ObservedImage>) -> Self {
        Self {
            source_position: None,
            source_flux: None,
            images,
        }
    }

    pub fn with_source_position(mut self, x: f64, y: f64) -> Self {
        self.source_position = Some(Point2::new(x, y));
        self
    }

    pub fn with_source_flux(mut self, flux: f64) -> Self {
        self.source_flux = Some(flux);
        self
    }

    pub fn n_images(&self) -> usize {
        self.images.len()
    }

    pub fn has_flux(&self) -> bool {
        self.images.iter().any(|img| img.flux.is_some())
    }
}

/// Observed data for all source points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub sources: Vec<SourceData>,
}

/// Settings for [`Dataset::simulate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    /// Position uncertainty recorded for every image, and the noise scale
    /// when noise is added. Default: 0.01
    pub sigma_pos: f64,

    /// Source flux; images carry no flux when `None`. Default: None
    pub source_flux: Option<f64>,

    /// Flux uncertainty, as a fraction of each image flux. Default: 0.05
    pub sigma_flux_fraction: f64,

    /// Perturb positions and fluxes with Gaussian noise. Default: false
    pub add_noise: bool,

    /// Record the true source position and flux in the dataset. Default: false
    pub record_source: bool,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            sigma_pos: DEFAULT_SIGMA_POS,
            source_flux: None,
            sigma_flux_fraction: 0.05,
            add_noise: false,
            record_source: false,
        }
    }
}

impl Simulation {
    pub fn with_source_flux(mut self, flux: f64) -> Self {
        self.source_flux = Some(flux);
        self
    }

    pub fn with_noise(mut self, add_noise: bool) -> Self {
        self.add_noise = add_noise;
        self
    }

    pub fn with_sigma_pos(mut self, sigma_pos: f64) -> Self {
        self.sigma_pos = sigma_pos;
        self
    }

    pub fn with_recorded_source(mut self, record_source: bool) -> Self {
        self.record_source = record_source;
        self
    }
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: SourceData) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceData> {
        self.sources.iter()
    }

    /// Total number of observed images.
    pub fn n_images(&self) -> usize {
        self.sources.iter().map(SourceData::n_images).sum()
    }

    /// Check that the dataset can be fitted.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LensError::InvalidInput("dataset has no sources".to_string()));
        }
        for (index, source) in self.sources.iter().enumerate() {
            if source.images.is_empty() {
                return Err(LensError::InvalidInput(format!(
                    "source {} has no observed images",
                    index
                )));
            }
            if let Some(p) = source.source_position {
                if !p.x.is_finite() || !p.y.is_finite() {
                    return Err(LensError::InvalidInput(format!(
                        "source {} position is not finite",
                        index
                    )));
                }
            }
            if let Some(flux) = source.source_flux {
                if !flux.is_finite() {
                    return Err(LensError::InvalidInput(format!(
                        "source {} flux is not finite",
                        index
                    )));
                }
            }
            for image in &source.images {
                image.validate()?;
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let dataset: Dataset = serde_json::from_str(json)?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Generate a dataset by solving for the images of each source point.
    ///
    /// Every image found by `solver` becomes an observed image. With
    /// `add_noise`, positions get Gaussian noise of width `sigma_pos` and
    /// fluxes get noise of width `sigma_flux_fraction * flux`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lensfit_rs::data::{Dataset, Simulation};
    /// use lensfit_rs::lens::{LensComponent, LensSystem};
    /// use lensfit_rs::profiles::{PointMass, PointMassConfig};
    /// use lensfit_rs::solver::ImageSolver;
    /// use nalgebra::Point2;
    ///
    /// let mut system = LensSystem::new();
    /// system
    ///     .add(LensComponent::from_profile(PointMass::new(PointMassConfig::default()).unwrap()))
    ///     .unwrap();
    ///
    /// let data = Dataset::simulate(
    ///     &system,
    ///     &ImageSolver::default(),
    ///     &[Point2::new(0.3, 0.0)],
    ///     &Simulation::default().with_source_flux(1.0),
    ///     &mut rand::thread_rng(),
    /// )
    /// .unwrap();
    /// assert_eq!(data.n_images(), 2);
    /// ```
    pub fn simulate<R: Rng + ?Sized>(
        system: &LensSystem,
        solver: &ImageSolver,
        sources: &[Point2<f64>],
        settings: &Simulation,
        rng: &mut R,
    ) -> Result<Self> {
        if !(settings.sigma_pos > 0.0) || !(settings.sigma_flux_fraction > 0.0) {
            return Err(LensError::config(
                "simulation uncertainties must be positive",
            ));
        }
        let position_noise = Normal::new(0.0, settings.sigma_pos)
            .map_err(|e| LensError::config(format!("position noise: {}", e)))?;
        let unit_noise = Normal::new(0.0, 1.0)
            .map_err(|e| LensError::config(format!("flux noise: {}", e)))?;

        let mut dataset = Dataset::new();
        for source in sources {
            let set = solver.solve(system, source)?;
            let mut images = Vec::with_capacity(set.n_images());
            for image in &set {
                let mut position = image.image_position;
                if settings.add_noise {
                    position.x += position_noise.sample(rng);
                    position.y += position_noise.sample(rng);
                }
                let mut observed = ObservedImage::new(position.x, position.y, settings.sigma_pos);

                if let Some(source_flux) = settings.source_flux {
                    let flux = image.flux(source_flux);
                    let sigma = (settings.sigma_flux_fraction * flux).max(f64::MIN_POSITIVE);
                    let measured = if settings.add_noise {
                        flux + sigma * unit_noise.sample(rng)
                    } else {
                        flux
                    };
                    observed = observed.with_flux(measured, sigma);
                }
                images.push(observed);
            }

            let mut record = SourceData::new(images);
            if settings.record_source {
                record.source_position = Some(*source);
                record.source_flux = settings.source_flux;
            }
            dataset.push(record);
        }
        Ok(dataset)
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a SourceData;
    type IntoIter = std::slice::Iter<'a, SourceData>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

fn parse_field(token: &str, line: usize, what: &str) -> Result<f64> {
    let value: f64 = token.parse().map_err(|_| LensError::DataFormat {
        line,
        message: format!("cannot parse {} from '{}'", what, token),
    })?;
    if !value.is_finite() {
        return Err(LensError::DataFormat {
            line,
            message: format!("{} must be finite, got {}", what, token),
        });
    }
    Ok(value)
}

impl FromStr for Dataset {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self> {
        let mut records = s.lines().enumerate().filter_map(|(i, raw)| {
            let content = raw.split('#').next().unwrap_or("").trim();
            (!content.is_empty()).then(|| (i + 1, content))
        });

        let mut dataset = Dataset::new();
        while let Some((line, header)) = records.next() {
            let fields: Vec<&str> = header.split_whitespace().collect();
            let (source_position, count_field) = match fields.as_slice() {
                [n] => (None, *n),
                [x, y, n] => (
                    Some(Point2::new(
                        parse_field(x, line, "src_x")?,
                        parse_field(y, line, "src_y")?,
                    )),
                    *n,
                ),
                _ => {
                    return Err(LensError::DataFormat {
                        line,
                        message: format!(
                            "expected 'src_x src_y n_images' or 'n_images', got {} fields",
                            fields.len()
                        ),
                    })
                }
            };
            let n_images: usize = count_field.parse().map_err(|_| LensError::DataFormat {
                line,
                message: format!("cannot parse image count from '{}'", count_field),
            })?;
            if n_images == 0 {
                return Err(LensError::DataFormat {
                    line,
                    message: "image count must be at least 1".to_string(),
                });
            }

            let mut images = Vec::with_capacity(n_images);
            for k in 0..n_images {
                let Some((line, record)) = records.next() else {
                    return Err(LensError::DataFormat {
                        line,
                        message: format!("expected {} images, found {}", n_images, k),
                    });
                };
                let fields: Vec<&str> = record.split_whitespace().collect();
                if !(3..=5).contains(&fields.len()) {
                    return Err(LensError::DataFormat {
                        line,
                        message: format!(
                            "expected 'x y flux [sigma_pos [sigma_flux]]', got {} fields",
                            fields.len()
                        ),
                    });
                }
                let x = parse_field(fields[0], line, "x")?;
                let y = parse_field(fields[1], line, "y")?;
                let flux = parse_field(fields[2], line, "flux")?;
                let sigma_pos = match fields.get(3) {
                    Some(token) => parse_field(token, line, "sigma_pos")?,
                    None => DEFAULT_SIGMA_POS,
                };
                let sigma_flux = fields
                    .get(4)
                    .map(|token| parse_field(token, line, "sigma_flux"))
                    .transpose()?;

                let image = ObservedImage {
                    position: Point2::new(x, y),
                    flux: (flux != 0.0).then_some(flux),
                    sigma_pos,
                    sigma_flux,
                };
                image.validate().map_err(|e| LensError::DataFormat {
                    line,
                    message: e.to_string(),
                })?;
                images.push(image);
            }

            dataset.push(SourceData {
                source_position,
                source_flux: None,
                images,
            });
        }

        if dataset.is_empty() {
            return Err(LensError::DataFormat {
                line: 0,
                message: "no source records".to_string(),
            });
        }
        Ok(dataset)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for source in &self.sources {
            match source.source_position {
                Some(p) => writeln!(f, "{} {} {}", p.x, p.y, source.n_images())?,
                None => writeln!(f, "{}", source.n_images())?,
            }
            for image in &source.images {
                write!(
                    f,
                    "{} {} {} {}",
                    image.position.x,
                    image.position.y,
                    image.flux.unwrap_or(0.0),
                    image.sigma_pos
                )?;
                if let Some(sigma) = image.sigma_flux {
                    write!(f, " {}", sigma)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "\
# alpha + shear fit target
0.5 0.1 2
  3.9  2.1  10.5  0.02  0.5   # first image
 -3.4 -1.7   0    0.02
3
1.0 1.0 2.0
";

    #[test]
    fn test_parse_text_records() {
        let data: Dataset = RECORD.parse().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.n_images(), 2 + 3);

        let first = &data.sources[0];
        assert_eq!(first.source_position, Some(Point2::new(0.5, 0.1)));
        assert_eq!(first.images[0].flux, Some(10.5));
        assert_eq!(first.images[0].sigma_flux, Some(0.5));
        assert_eq!(first.images[1].flux, None);
        assert_eq!(first.images[1].sigma_pos, 0.02);

        let second = &data.sources[1];
        assert_eq!(second.source_position, None);
        assert_eq!(second.images[2].sigma_pos, DEFAULT_SIGMA_POS);
    }

    #[test]
    fn test_text_round_trip() {
        let data: Dataset = RECORD.parse().unwrap();
        let reparsed: Dataset = data.to_string().parse().unwrap();
        assert_eq!(data, reparsed);
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = "0.5 0.1 2\n1.0 2.0 3.0\n".parse::<Dataset>().unwrap_err();
        assert!(matches!(err, LensError::DataFormat { line: 1, .. }));

        let err = "1\n1.0 two 3.0\n".parse::<Dataset>().unwrap_err();
        assert!(matches!(err, LensError::DataFormat { line: 2, .. }));

        let err = "1\n1.0 2.0 3.0 -0.1\n".parse::<Dataset>().unwrap_err();
        assert!(matches!(err, LensError::DataFormat { line: 2, .. }));

        assert!("# nothing here\n".parse::<Dataset>().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let mut data = Dataset::new();
        data.push(
            SourceData::new(vec![
                ObservedImage::new(1.0, 2.0, 0.01).with_flux(3.0, 0.1),
                ObservedImage::new(-1.0, 0.5, 0.01),
            ])
            .with_source_position(0.1, 0.2)
            .with_source_flux(1.5),
        );
        let json = data.to_json().unwrap();
        assert!(!json.contains("sigma_flux\": null"));
        assert_eq!(Dataset::from_json(&json).unwrap(), data);
    }

    #[test]
    fn test_validate() {
        assert!(Dataset::new().validate().is_err());

        let mut data = Dataset::new();
        data.push(SourceData::new(vec![ObservedImage::new(1.0, 2.0, 0.0)]));
        assert!(matches!(
            data.validate().unwrap_err(),
            LensError::InvalidInput(_)
        ));
    }
}
