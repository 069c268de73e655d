//! Parameter fitting.
//!
//! A [`FitContext`] owns the lens system, the observed dataset and the fit
//! options for one fitting run. [`FitContext::run_fit`] drives a
//! derivative-free [`Optimizer`] over the free-parameter vector selected by
//! the components' vary masks. Each trial vector is scattered into a private
//! copy of the lens system, the images of every source are solved (in
//! parallel across sources), and the chi-square is summed in source order.
//!
//! # Examples
//!
//! ```no_run
//! use lensfit_rs::data::Dataset;
//! use lensfit_rs::fit::{FitContext, OptimizerKind, QueryOptions};
//! use lensfit_rs::lens::{LensComponent, LensSystem};
//! use lensfit_rs::profiles::ProfileKind;
//! use nalgebra::Point2;
//! use std::collections::HashMap;
//!
//! let alpha = HashMap::from([
//!     ("b".to_string(), 4.5),
//!     ("q".to_string(), 0.8),
//!     ("theta".to_string(), 30.0),
//!     ("xc".to_string(), 0.7),
//!     ("yc".to_string(), 0.3),
//! ]);
//! let mut lens = LensComponent::from_map(ProfileKind::Alpha, &alpha)?;
//! lens.set_vary_flags_from_ints(&[1, 0, 0, 1, 1, 1, 1])?;
//!
//! let mut system = LensSystem::new();
//! system.add(lens)?;
//!
//! let data: Dataset = std::fs::read_to_string("alphafit.dat")?.parse()?;
//! let mut fit = FitContext::new(system, data)?;
//! fit.include_flux_chisq(true);
//! fit.use_image_plane_chisq(true);
//!
//! let result = fit.run_fit(OptimizerKind::Simplex)?;
//! println!("{}", result);
//!
//! let images = fit.image_set(&Point2::new(0.5, 0.1), &QueryOptions::default())?;
//! println!("{}", images);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use nalgebra::Point2;
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chisq::{self, ChiSquareBreakdown, FitOptions};
use crate::data::{Dataset, SourceData};
use crate::error::{LensError, Result};
use crate::lens::LensSystem;
use crate::parameters::vector;
use crate::solver::{ImageSet, ImageSolver, SolverConfig};

pub mod annealing;
pub mod simplex;

pub use annealing::{AnnealingConfig, SimulatedAnnealing};
pub use simplex::{DownhillSimplex, SimplexConfig};

/// A scalar function of the free-parameter vector to be minimised.
///
/// Evaluation never fails: trials that cannot be scored return a large
/// finite penalty instead.
pub trait Objective {
    fn eval_cost(&self, params: &Array1<f64>) -> f64;

    /// Costs at or above this value mark trials that could not be scored.
    ///
    /// An optimizer must not report convergence on such a point.
    fn failure_threshold(&self) -> Option<f64> {
        None
    }
}

/// True when `cost` is a failed-trial score for `objective`.
pub(crate) fn is_failure(objective: &dyn Objective, cost: f64) -> bool {
    objective
        .failure_threshold()
        .map_or(false, |threshold| cost >= threshold)
}

impl<F> Objective for F
where
    F: Fn(&Array1<f64>) -> f64,
{
    fn eval_cost(&self, params: &Array1<f64>) -> f64 {
        self(params)
    }
}

/// Shared flag that asks a running fit to stop.
///
/// The optimizers check it once per outer step and return the best point
/// found so far with [`FitStatus::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The objective spread fell below the tolerance.
    Converged,
    /// The iteration cap was reached first.
    MaxIterationsReached,
    /// The run was stopped through its [`CancelToken`].
    Cancelled,
    /// Every vary flag is off; the fixed chi-square was evaluated once.
    NoFreeParameters,
    /// The best point still scores the failure penalty.
    Failed,
}

impl FitStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::Converged | FitStatus::NoFreeParameters)
    }

    pub fn description(&self) -> &'static str {
        match self {
            FitStatus::Converged => "Converged: simplex spread below tolerance",
            FitStatus::MaxIterationsReached => "Terminated: maximum iterations reached",
            FitStatus::Cancelled => "Terminated: cancelled",
            FitStatus::NoFreeParameters => "No free parameters: chi-square evaluated once",
            FitStatus::Failed => "Failed: no trial point could be scored",
        }
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Available optimizers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Nelder-Mead downhill simplex.
    #[default]
    Simplex,
    /// Simulated annealing followed by a simplex polish.
    Annealing,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Simplex => "simplex",
            OptimizerKind::Annealing => "annealing",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simplex" | "nelder-mead" => Ok(OptimizerKind::Simplex),
            "annealing" | "simulated-annealing" => Ok(OptimizerKind::Annealing),
            other => Err(LensError::config(format!("unknown optimizer '{}'", other))),
        }
    }
}

/// Best point and bookkeeping returned by an [`Optimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    pub params: Array1<f64>,
    pub cost: f64,
    pub status: FitStatus,
    pub iterations: usize,
    pub func_evals: usize,
}

/// A derivative-free minimiser over the free-parameter vector.
pub trait Optimizer {
    /// Minimise `objective` starting from `initial`.
    ///
    /// # Arguments
    ///
    /// * `objective` - The function to minimise
    /// * `initial` - Starting point
    /// * `steps` - Initial search scale for each coordinate
    /// * `cancel` - Checked once per outer step
    fn minimize(
        &self,
        objective: &dyn Objective,
        initial: &Array1<f64>,
        steps: &Array1<f64>,
        cancel: &CancelToken,
    ) -> Result<OptimizerOutcome>;
}

/// Check that the step vector matches the starting point and is usable.
pub(crate) fn check_steps(initial: &Array1<f64>, steps: &Array1<f64>) -> Result<()> {
    if initial.len() != steps.len() {
        return Err(LensError::DimensionMismatch(format!(
            "expected {} step sizes, got {}",
            initial.len(),
            steps.len()
        )));
    }
    if let Some(bad) = steps.iter().find(|s| !s.is_finite() || **s == 0.0) {
        return Err(LensError::Optimization(format!(
            "step sizes must be finite and non-zero, got {}",
            bad
        )));
    }
    Ok(())
}

/// Run-level settings of a fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Image solver used for every trial.
    pub solver: SolverConfig,

    /// Simplex settings, also used to polish annealing results.
    pub simplex: SimplexConfig,

    /// Simulated annealing settings.
    pub annealing: AnnealingConfig,

    /// Solve the sources of one trial in parallel. Default: true
    pub parallel: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            simplex: SimplexConfig::default(),
            annealing: AnnealingConfig::default(),
            parallel: true,
        }
    }
}

impl FitConfig {
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_simplex(mut self, simplex: SimplexConfig) -> Self {
        self.simplex = simplex;
        self
    }

    pub fn with_annealing(mut self, annealing: AnnealingConfig) -> Self {
        self.annealing = annealing;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Tolerances for a standalone image query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Roots closer than this are the same image. Default: 1e-6
    pub position_tolerance: f64,

    /// Images with `|det A|` below this are flagged unstable. Default: 1e-4
    pub min_stable_det: f64,

    /// Log the image table at info level. Default: false
    pub verbose: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            position_tolerance: 1e-6,
            min_stable_det: 1e-4,
            verbose: false,
        }
    }
}

impl QueryOptions {
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Result of a fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best values of the free parameters, named `"<profile><index>.<param>"`.
    pub parameters: Vec<(String, f64)>,
    /// Chi-square terms at the best point.
    pub chisq: ChiSquareBreakdown,
    pub status: FitStatus,
    pub optimizer: OptimizerKind,
    pub iterations: usize,
    pub func_evals: usize,
}

impl FitResult {
    /// Best value of a free parameter by name.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Best free-parameter vector.
    pub fn values(&self) -> Array1<f64> {
        self.parameters.iter().map(|(_, v)| *v).collect()
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit Result ({}):", self.optimizer)?;
        writeln!(f, "  Status: {}", self.status)?;
        writeln!(f, "  {}", self.chisq)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        for (name, value) in &self.parameters {
            writeln!(f, "  {:<16} {:.8}", name, value)?;
        }
        Ok(())
    }
}

/// Chi-square of a lens system against a dataset.
///
/// A source whose images cannot be found contributes the failure penalty;
/// any other error is returned.
fn evaluate_system(
    system: &LensSystem,
    dataset: &Dataset,
    options: &FitOptions,
    solver: &ImageSolver,
    parallel: bool,
) -> Result<ChiSquareBreakdown> {
    let score = |data: &SourceData| -> Result<ChiSquareBreakdown> {
        let source = data.source_position.unwrap_or_else(|| {
            chisq::estimate_source_position(
                system,
                data,
                options.magnification_weighted_source_chisq,
            )
        });
        let solver = solver.covering(data.images.iter().map(|img| &img.position));
        match solver.solve(system, &source) {
            Ok(set) => Ok(chisq::evaluate(&set, data, system, options)),
            Err(e) if e.is_recoverable() => {
                debug!("{}", e);
                Ok(ChiSquareBreakdown::failed(options.failure_penalty))
            }
            Err(e) => Err(e),
        }
    };

    // Collect before summing so the total does not depend on scheduling
    let parts: Vec<ChiSquareBreakdown> = if parallel {
        dataset.sources.par_iter().map(score).collect::<Result<_>>()?
    } else {
        dataset.sources.iter().map(score).collect::<Result<_>>()?
    };
    Ok(parts.into_iter().sum())
}

/// The fitting objective over a template lens system.
struct FitObjective<'a> {
    template: &'a LensSystem,
    dataset: &'a Dataset,
    options: &'a FitOptions,
    solver: ImageSolver,
    parallel: bool,
}

impl FitObjective<'_> {
    fn breakdown(&self, params: &Array1<f64>) -> ChiSquareBreakdown {
        let mut trial = self.template.clone();
        let scored = vector::scatter(params, &mut trial)
            .and_then(|_| vector::check_limits(&trial))
            .and_then(|_| {
                evaluate_system(&trial, self.dataset, self.options, &self.solver, self.parallel)
            });
        match scored {
            Ok(breakdown) if breakdown.total().is_finite() => breakdown,
            Ok(breakdown) => {
                debug!("non-finite chi-square: {}", breakdown);
                ChiSquareBreakdown::failed(self.options.failure_penalty)
            }
            Err(e) => {
                debug!("trial rejected: {}", e);
                ChiSquareBreakdown::failed(self.options.failure_penalty)
            }
        }
    }
}

impl Objective for FitObjective<'_> {
    fn eval_cost(&self, params: &Array1<f64>) -> f64 {
        self.breakdown(params).total()
    }

    fn failure_threshold(&self) -> Option<f64> {
        Some(self.options.failure_penalty)
    }
}

/// State of one fitting run: lens system, dataset, options.
#[derive(Debug)]
pub struct FitContext {
    system: LensSystem,
    dataset: Dataset,
    options: FitOptions,
    config: FitConfig,
    cancel: CancelToken,
}

impl FitContext {
    /// Create a fit context. The dataset is validated here.
    pub fn new(system: LensSystem, dataset: Dataset) -> Result<Self> {
        system.require_non_empty()?;
        dataset.validate()?;
        Ok(Self {
            system,
            dataset,
            options: FitOptions::default(),
            config: FitConfig::default(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, config: FitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system(&self) -> &LensSystem {
        &self.system
    }

    /// Mutable access for configuration between fits.
    pub fn system_mut(&mut self) -> &mut LensSystem {
        &mut self.system
    }

    pub fn into_system(self) -> LensSystem {
        self.system
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn include_flux_chisq(&mut self, include: bool) {
        self.options.include_flux_chisq = include;
    }

    pub fn use_image_plane_chisq(&mut self, image_plane: bool) {
        self.options.use_image_plane_chisq = image_plane;
    }

    /// Token that cancels a running fit from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Chi-square of the current lens system.
    pub fn chisq(&self) -> Result<ChiSquareBreakdown> {
        evaluate_system(
            &self.system,
            &self.dataset,
            &self.options,
            &ImageSolver::new(self.config.solver.clone()),
            self.config.parallel,
        )
    }

    /// Fit with the optimizer named in the options.
    pub fn fit(&mut self) -> Result<FitResult> {
        self.run_fit(self.options.optimizer_kind)
    }

    /// Fit the free parameters with the given optimizer.
    ///
    /// On return the lens system holds the best parameters found. A fit that
    /// stops without converging is reported through [`FitResult::status`].
    ///
    /// # Errors
    ///
    /// Configuration problems found before the first trial: an empty system,
    /// an invalid dataset, starting values outside their limits, or unusable
    /// step sizes.
    pub fn run_fit(&mut self, kind: OptimizerKind) -> Result<FitResult> {
        self.system.require_non_empty()?;
        self.dataset.validate()?;
        vector::check_limits(&self.system)?;

        let initial = vector::gather(&self.system);
        let names = vector::free_parameter_names(&self.system);

        if initial.is_empty() {
            let chisq = self.chisq()?;
            info!(chisq = chisq.total(), "no free parameters, skipping search");
            return Ok(FitResult {
                parameters: Vec::new(),
                chisq,
                status: FitStatus::NoFreeParameters,
                optimizer: kind,
                iterations: 0,
                func_evals: 1,
            });
        }

        let steps = vector::gather_stepsizes(&self.system);
        info!(
            optimizer = %kind,
            n_free = initial.len(),
            n_sources = self.dataset.len(),
            "starting fit"
        );

        let (outcome, chisq) = {
            let objective = FitObjective {
                template: &self.system,
                dataset: &self.dataset,
                options: &self.options,
                solver: ImageSolver::new(self.config.solver.clone()),
                parallel: self.config.parallel,
            };
            let optimizer: Box<dyn Optimizer> = match kind {
                OptimizerKind::Simplex => {
                    Box::new(DownhillSimplex::new(self.config.simplex.clone()))
                }
                OptimizerKind::Annealing => Box::new(SimulatedAnnealing::new(
                    self.config.annealing.clone(),
                    self.config.simplex.clone(),
                )),
            };
            let outcome = optimizer.minimize(&objective, &initial, &steps, &self.cancel)?;
            let chisq = objective.breakdown(&outcome.params);
            (outcome, chisq)
        };

        vector::scatter(&outcome.params, &mut self.system)?;

        let status = if chisq.failure > 0.0 && outcome.status.is_converged() {
            FitStatus::Failed
        } else {
            outcome.status
        };
        if !status.is_converged() {
            warn!(
                status = ?status,
                iterations = outcome.iterations,
                "fit stopped before converging"
            );
        }
        if chisq.failure > 0.0 {
            warn!("best fit still carries a failure penalty: {}", chisq);
        }
        info!(
            chisq = chisq.total(),
            iterations = outcome.iterations,
            func_evals = outcome.func_evals,
            "fit finished"
        );

        Ok(FitResult {
            parameters: names.into_iter().zip(outcome.params.iter().copied()).collect(),
            chisq,
            status,
            optimizer: kind,
            iterations: outcome.iterations,
            func_evals: outcome.func_evals,
        })
    }

    /// Images of a source point under the current lens system.
    ///
    /// `NoImageFound` is returned to the caller here, not absorbed.
    pub fn image_set(&self, source: &Point2<f64>, query: &QueryOptions) -> Result<ImageSet> {
        let config = self
            .config
            .solver
            .clone()
            .with_position_tolerance(query.position_tolerance)
            .with_min_stable_det(query.min_stable_det);
        let set = ImageSolver::new(config).solve(&self.system, source)?;

        for image in set.unstable() {
            if let Some(warning) = &image.instability {
                warn!(
                    x = image.image_position.x,
                    y = image.image_position.y,
                    "{}",
                    warning
                );
            }
        }
        if query.verbose {
            info!("\n{}", set);
        }
        Ok(set)
    }

    /// Images of every dataset source under the current lens system.
    ///
    /// Each set is solved at the recorded (or estimated) source position and
    /// carries the source flux its image fluxes are scaled by, when one is
    /// recorded or can be fitted from the observed fluxes.
    pub fn source_image_sets(&self) -> Result<Vec<ImageSet>> {
        let solver = ImageSolver::new(self.config.solver.clone());
        self.dataset
            .iter()
            .map(|data| {
                let source = data.source_position.unwrap_or_else(|| {
                    chisq::estimate_source_position(
                        &self.system,
                        data,
                        self.options.magnification_weighted_source_chisq,
                    )
                });
                let set = solver
                    .covering(data.images.iter().map(|img| &img.position))
                    .solve(&self.system, &source)?;
                Ok(match chisq::source_flux(&set, data) {
                    Some(flux) => set.with_flux_normalization(flux),
                    None => set,
                })
            })
            .collect()
    }
}
