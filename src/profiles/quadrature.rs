//! Gauss-Legendre quadrature on the unit interval.

use std::f64::consts::PI;
use std::sync::OnceLock;

/// Number of nodes used by the elliptical profile integrals.
pub(crate) const DEFAULT_NODES: usize = 64;

/// Nodes and weights for integrals over `[0, 1]`.
#[derive(Debug, Clone)]
pub(crate) struct GaussLegendre {
    points: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussLegendre {
    /// Compute an `n`-point rule by Newton iteration on the Legendre polynomial.
    pub(crate) fn new(n: usize) -> Self {
        let mut points = vec![0.0; n];
        let mut weights = vec![0.0; n];
        let nf = n as f64;

        for i in 0..(n + 1) / 2 {
            let mut z = (PI * (i as f64 + 0.75) / (nf + 0.5)).cos();
            let mut pp = 1.0;

            for _ in 0..100 {
                let mut p1 = 1.0;
                let mut p2 = 0.0;
                for j in 0..n {
                    let p3 = p2;
                    p2 = p1;
                    let jf = j as f64;
                    p1 = ((2.0 * jf + 1.0) * z * p2 - jf * p3) / (jf + 1.0);
                }
                pp = nf * (z * p1 - p2) / (z * z - 1.0);
                let z_prev = z;
                z = z_prev - p1 / pp;
                if (z - z_prev).abs() < 1e-15 {
                    break;
                }
            }

            // Map from [-1, 1] to [0, 1]; the weights halve
            let w = 1.0 / ((1.0 - z * z) * pp * pp);
            points[i] = 0.5 * (1.0 - z);
            points[n - 1 - i] = 0.5 * (1.0 + z);
            weights[i] = w;
            weights[n - 1 - i] = w;
        }

        Self { points, weights }
    }

    /// Shared rule with [`DEFAULT_NODES`] nodes.
    pub(crate) fn shared() -> &'static GaussLegendre {
        static RULE: OnceLock<GaussLegendre> = OnceLock::new();
        RULE.get_or_init(|| GaussLegendre::new(DEFAULT_NODES))
    }

    /// Iterate over `(node, weight)` pairs.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().copied().zip(self.weights.iter().copied())
    }

    /// Integrate `f` over `[0, 1]`.
    pub(crate) fn integrate<F: Fn(f64) -> f64>(&self, f: F) -> f64 {
        self.iter().map(|(x, w)| w * f(x)).sum()
    }
}
