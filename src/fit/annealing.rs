//! Simulated annealing over the free-parameter vector.
//!
//! Candidates are drawn by perturbing each coordinate uniformly within its
//! step size, scaled down as the temperature falls. Worse candidates are
//! accepted with probability `exp(-delta / T)`. The best point found is
//! optionally polished with a downhill simplex.

use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::simplex::{DownhillSimplex, SimplexConfig};
use super::{
    check_steps, is_failure, CancelToken, FitStatus, Objective, Optimizer, OptimizerOutcome,
};
use crate::error::Result;

/// Configuration options for simulated annealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealingConfig {
    /// Initial temperature, relative to the starting chi-square. Default: 1.0
    pub initial_temp: f64,

    /// Factor applied to the temperature after each step. Default: 0.98
    pub cooling_rate: f64,

    /// Maximum number of annealing steps. Default: 2000
    pub max_iterations: usize,

    /// Stop after this many steps without a new best point. Default: 300
    pub max_no_improvement: usize,

    /// Seed of the candidate generator. Default: 0
    pub seed: u64,

    /// Polish the best point with a downhill simplex. Default: true
    pub polish: bool,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temp: 1.0,
            cooling_rate: 0.98,
            max_iterations: 2000,
            max_no_improvement: 300,
            seed: 0,
            polish: true,
        }
    }
}

impl AnnealingConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_polish(mut self, polish: bool) -> Self {
        self.polish = polish;
        self
    }
}

/// Simulated annealing, followed by an optional simplex polish.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAnnealing {
    config: AnnealingConfig,
    polish: SimplexConfig,
}

impl SimulatedAnnealing {
    /// # Arguments
    ///
    /// * `config` - Annealing schedule
    /// * `polish` - Simplex settings used for the final polish
    pub fn new(config: AnnealingConfig, polish: SimplexConfig) -> Self {
        Self { config, polish }
    }

    /// Perturb each coordinate by up to `scale` times its step.
    fn perturb(
        &self,
        solution: &Array1<f64>,
        steps: &Array1<f64>,
        scale: f64,
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        let unit = Uniform::new_inclusive(-1.0, 1.0);
        let mut candidate = solution.clone();
        for (value, step) in candidate.iter_mut().zip(steps.iter()) {
            *value += step.abs() * scale * unit.sample(rng);
        }
        candidate
    }
}

impl Optimizer for SimulatedAnnealing {
    fn minimize(
        &self,
        objective: &dyn Objective,
        initial: &Array1<f64>,
        steps: &Array1<f64>,
        cancel: &CancelToken,
    ) -> Result<OptimizerOutcome> {
        check_steps(initial, steps)?;

        if initial.is_empty() {
            return Ok(OptimizerOutcome {
                params: initial.clone(),
                cost: objective.eval_cost(initial),
                status: FitStatus::NoFreeParameters,
                iterations: 0,
                func_evals: 1,
            });
        }

        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let mut current = initial.clone();
        let mut current_cost = objective.eval_cost(&current);
        let mut best = current.clone();
        let mut best_cost = current_cost;

        let initial_temp = cfg.initial_temp * current_cost.abs().max(1.0);
        let mut temperature = initial_temp;
        let mut iterations = 0;
        let mut no_improvement = 0;
        let mut func_evals = 1;

        let status = loop {
            if cancel.is_cancelled() {
                break FitStatus::Cancelled;
            }
            if no_improvement >= cfg.max_no_improvement {
                if is_failure(objective, best_cost) {
                    break FitStatus::Failed;
                }
                break FitStatus::Converged;
            }
            if iterations >= cfg.max_iterations {
                break FitStatus::MaxIterationsReached;
            }
            iterations += 1;

            // Step size follows the temperature, never below 1% of the steps
            let scale = (temperature / initial_temp).sqrt().max(0.01);
            let candidate = self.perturb(&current, steps, scale, &mut rng);
            let candidate_cost = objective.eval_cost(&candidate);
            func_evals += 1;

            let delta = candidate_cost - current_cost;
            let accept = delta <= 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();

            if accept {
                current = candidate;
                current_cost = candidate_cost;
            }
            if current_cost < best_cost {
                best = current.clone();
                best_cost = current_cost;
                no_improvement = 0;
            } else {
                no_improvement += 1;
            }

            temperature *= cfg.cooling_rate;
            if iterations % 100 == 0 {
                debug!(iterations, temperature, best_cost, "annealing");
            }
        };

        if !cfg.polish || matches!(status, FitStatus::Cancelled | FitStatus::Failed) {
            return Ok(OptimizerOutcome {
                params: best,
                cost: best_cost,
                status,
                iterations,
                func_evals,
            });
        }

        let polished = DownhillSimplex::new(self.polish.clone()).minimize(
            objective,
            &best,
            &(steps * 0.1),
            cancel,
        )?;
        let (params, cost) = if polished.cost <= best_cost {
            (polished.params, polished.cost)
        } else {
            (best, best_cost)
        };
        let status = if is_failure(objective, cost) && polished.status.is_converged() {
            FitStatus::Failed
        } else {
            polished.status
        };
        Ok(OptimizerOutcome {
            params,
            cost,
            status,
            iterations: iterations + polished.iterations,
            func_evals: func_evals + polished.func_evals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn bowl(x: &Array1<f64>) -> f64 {
        (x[0] - 1.5).powi(2) + (x[1] + 0.5).powi(2)
    }

    #[test]
    fn test_annealing_finds_minimum() {
        let annealing =
            SimulatedAnnealing::new(AnnealingConfig::default().with_seed(42), SimplexConfig::default());
        let outcome = annealing
            .minimize(&bowl, &array![0.0, 0.0], &array![1.0, 1.0], &CancelToken::new())
            .unwrap();
        assert!(outcome.status.is_converged());
        assert_relative_eq!(outcome.params[0], 1.5, epsilon = 1e-4);
        assert_relative_eq!(outcome.params[1], -0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_same_seed_same_path() {
        let config = AnnealingConfig::default()
            .with_seed(7)
            .with_max_iterations(200)
            .with_polish(false);
        let run = || {
            SimulatedAnnealing::new(config.clone(), SimplexConfig::default())
                .minimize(&bowl, &array![3.0, 3.0], &array![0.5, 0.5], &CancelToken::new())
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.params, b.params);
        assert_eq!(a.func_evals, b.func_evals);
        assert!(a.cost < bowl(&array![3.0, 3.0]));
    }

    struct Unscorable;

    impl Objective for Unscorable {
        fn eval_cost(&self, _params: &Array1<f64>) -> f64 {
            1e30
        }

        fn failure_threshold(&self) -> Option<f64> {
            Some(1e30)
        }
    }

    #[test]
    fn test_penalty_plateau_fails() {
        let outcome = SimulatedAnnealing::default()
            .minimize(&Unscorable, &array![0.0, 0.0], &array![1.0, 1.0], &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.status, FitStatus::Failed);
        assert!(!outcome.status.is_converged());
        assert_eq!(outcome.cost, 1e30);
    }

    #[test]
    fn test_cancelled_annealing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = SimulatedAnnealing::default()
            .minimize(&bowl, &array![3.0, 3.0], &array![0.5, 0.5], &cancel)
            .unwrap();
        assert_eq!(outcome.status, FitStatus::Cancelled);
        assert_eq!(outcome.params, array![3.0, 3.0]);
    }
}
