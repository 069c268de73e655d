//! Nelder-Mead downhill simplex.
//!
//! The simplex holds `n + 1` vertices in the free-parameter space. Each
//! iteration replaces the worst vertex by reflecting it through the centroid
//! of the others, expanding or contracting that move depending on how the
//! trial scores, or shrinks the whole simplex towards the best vertex when no
//! move helps. The run stops when the relative spread of the vertex values
//!
//! ```text
//! 2 |f_hi - f_lo| / (|f_hi| + |f_lo| + TINY)
//! ```
//!
//! drops below `ftol`, when the iteration cap is hit, or when cancelled.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    check_steps, is_failure, CancelToken, FitStatus, Objective, Optimizer, OptimizerOutcome,
};
use crate::error::Result;

/// Keeps the convergence test finite when the objective reaches zero.
const TINY: f64 = 1e-10;

/// Configuration options for the downhill simplex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplexConfig {
    /// Relative spread of vertex values at which a run converges. Default: 1e-6
    pub ftol: f64,

    /// Maximum number of simplex iterations, summed over restarts. Default: 5000
    pub max_iterations: usize,

    /// Number of times the simplex is rebuilt around the best point after
    /// converging. Default: 2
    pub restarts: usize,

    /// Reflection coefficient. Default: 1.0
    pub reflection: f64,

    /// Expansion coefficient. Default: 2.0
    pub expansion: f64,

    /// Contraction coefficient. Default: 0.5
    pub contraction: f64,

    /// Shrink coefficient. Default: 0.5
    pub shrink: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            ftol: 1e-6,
            max_iterations: 5000,
            restarts: 2,
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
        }
    }
}

impl SimplexConfig {
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }
}

/// Move accepted in one simplex iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reflect,
    Expand,
    Contract,
    Shrink,
}

/// Simplex vertices with their objective values.
struct Simplex {
    vertices: Vec<Array1<f64>>,
    values: Vec<f64>,
}

impl Simplex {
    /// Build the initial simplex: `initial` plus one vertex per coordinate,
    /// displaced by that coordinate's step.
    fn new(objective: &dyn Objective, initial: &Array1<f64>, steps: &Array1<f64>) -> Self {
        let mut vertices = Vec::with_capacity(initial.len() + 1);
        vertices.push(initial.clone());
        for (i, step) in steps.iter().enumerate() {
            let mut vertex = initial.clone();
            vertex[i] += step;
            vertices.push(vertex);
        }
        let values = vertices.iter().map(|v| objective.eval_cost(v)).collect();
        Self { vertices, values }
    }

    /// Indices of the best, worst and second-worst vertices.
    fn rank(&self) -> (usize, usize, usize) {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        let n = order.len();
        (order[0], order[n - 1], order[n.saturating_sub(2)])
    }

    fn centroid_without(&self, worst: usize) -> Array1<f64> {
        let mut sum = Array1::zeros(self.vertices[0].len());
        for (k, vertex) in self.vertices.iter().enumerate() {
            if k != worst {
                sum += vertex;
            }
        }
        sum / (self.vertices.len() - 1) as f64
    }

    fn best(&self) -> (Array1<f64>, f64) {
        let (lo, _, _) = self.rank();
        (self.vertices[lo].clone(), self.values[lo])
    }
}

/// Nelder-Mead downhill simplex minimiser.
#[derive(Debug, Clone, Default)]
pub struct DownhillSimplex {
    config: SimplexConfig,
}

/// Result of one simplex run.
struct Run {
    params: Array1<f64>,
    cost: f64,
    status: FitStatus,
    iterations: usize,
    func_evals: usize,
}

impl DownhillSimplex {
    pub fn new(config: SimplexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimplexConfig {
        &self.config
    }

    /// One run from a freshly built simplex.
    fn run(
        &self,
        objective: &dyn Objective,
        initial: &Array1<f64>,
        steps: &Array1<f64>,
        max_iterations: usize,
        cancel: &CancelToken,
    ) -> Run {
        let cfg = &self.config;
        let mut simplex = Simplex::new(objective, initial, steps);
        let mut func_evals = simplex.values.len();
        let mut iterations = 0;

        let status = loop {
            // Check for cancellation
            if cancel.is_cancelled() {
                break FitStatus::Cancelled;
            }

            let (lo, hi, nhi) = simplex.rank();
            let (f_lo, f_hi) = (simplex.values[lo], simplex.values[hi]);

            // Check convergence
            let spread = 2.0 * (f_hi - f_lo).abs() / (f_hi.abs() + f_lo.abs() + TINY);
            if spread < cfg.ftol {
                if is_failure(objective, f_lo) {
                    break FitStatus::Failed;
                }
                break FitStatus::Converged;
            }

            // Check iterations
            if iterations >= max_iterations {
                break FitStatus::MaxIterationsReached;
            }
            iterations += 1;

            let centroid = simplex.centroid_without(hi);
            let worst = simplex.vertices[hi].clone();

            // Reflect the worst vertex through the centroid
            let reflected = &centroid + &((&centroid - &worst) * cfg.reflection);
            let f_reflected = objective.eval_cost(&reflected);
            func_evals += 1;

            let step = if f_reflected < f_lo {
                let expanded = &centroid + &((&reflected - &centroid) * cfg.expansion);
                let f_expanded = objective.eval_cost(&expanded);
                func_evals += 1;
                if f_expanded < f_reflected {
                    simplex.vertices[hi] = expanded;
                    simplex.values[hi] = f_expanded;
                    Step::Expand
                } else {
                    simplex.vertices[hi] = reflected;
                    simplex.values[hi] = f_reflected;
                    Step::Reflect
                }
            } else if f_reflected < simplex.values[nhi] {
                simplex.vertices[hi] = reflected;
                simplex.values[hi] = f_reflected;
                Step::Reflect
            } else {
                // Contract towards the better of the reflected and worst points
                let (anchor, f_anchor) = if f_reflected < f_hi {
                    (&reflected, f_reflected)
                } else {
                    (&worst, f_hi)
                };
                let contracted = &centroid + &((anchor - &centroid) * cfg.contraction);
                let f_contracted = objective.eval_cost(&contracted);
                func_evals += 1;

                if f_contracted < f_anchor {
                    simplex.vertices[hi] = contracted;
                    simplex.values[hi] = f_contracted;
                    Step::Contract
                } else {
                    let best = simplex.vertices[lo].clone();
                    for k in 0..simplex.vertices.len() {
                        if k == lo {
                            continue;
                        }
                        let shrunk = &best + &((&simplex.vertices[k] - &best) * cfg.shrink);
                        simplex.values[k] = objective.eval_cost(&shrunk);
                        simplex.vertices[k] = shrunk;
                        func_evals += 1;
                    }
                    Step::Shrink
                }
            };

            debug!(iteration = iterations, ?step, f_lo, f_hi, "simplex step");
        };

        let (params, cost) = simplex.best();
        Run {
            params,
            cost,
            status,
            iterations,
            func_evals,
        }
    }
}

impl Optimizer for DownhillSimplex {
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

        let mut best = self.run(objective, initial, steps, self.config.max_iterations, cancel);
        let mut iterations = best.iterations;
        let mut func_evals = best.func_evals;

        for restart in 0..self.config.restarts {
            if best.status != FitStatus::Converged {
                break;
            }
            let remaining = self.config.max_iterations.saturating_sub(iterations);
            let next = self.run(objective, &best.params, steps, remaining, cancel);
            iterations += next.iterations;
            func_evals += next.func_evals;
            debug!(restart, cost = next.cost, previous = best.cost, "simplex restart");

            let improvement = best.cost - next.cost;
            let significant =
                improvement > 0.5 * self.config.ftol * (best.cost.abs() + next.cost.abs() + TINY);
            let status = next.status;
            if next.cost <= best.cost {
                best = next;
            } else {
                best.status = status;
            }
            if !significant {
                break;
            }
        }

        Ok(OptimizerOutcome {
            params: best.params,
            cost: best.cost,
            status: best.status,
            iterations,
            func_evals,
        })
    }
}
