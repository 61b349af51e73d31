use std::io;

use log::warn;

/// Finds the posterior mode of a perturbed Dirichlet count vector
pub trait ModeFinder {
    /// Return a count vector of length `dim` replacing `counts`
    fn mode(&self, dim: usize, counts: &[f64], epsilon: f64) -> io::Result<Vec<f64>>;
}

/// Mode of a Dirichlet posterior with a probability floor.
///
/// Maximizes `sum_i w_i ln(theta_i)` over the probability simplex subject to
/// `theta_i >= epsilon`, then rescales `theta` by the positive mass of `w`.
/// Negative weights (counts pushed below zero by a negative prior) end up at
/// the floor; without any positive weight the result is uniform. The
/// proportional solution is used whenever it is feasible; otherwise the
/// problem is solved with L-BFGS over `theta = epsilon + (1 - K epsilon) softmax(z)`.
#[derive(Debug, Clone)]
pub struct ModifiedDirichlet {
    max_iterations: usize,
    tolerance: f64,
}

impl Default for ModifiedDirichlet {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-6,
        }
    }
}

impl ModifiedDirichlet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> io::Result<()> {
        if max_iterations == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_iterations must be positive",
            ));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: f64) -> io::Result<()> {
        if !(tolerance > 0.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tolerance must be positive",
            ));
        }
        self.tolerance = tolerance;
        Ok(())
    }

    fn optimize(&self, weights: &[f64], epsilon: f64) -> io::Result<Vec<f64>> {
        let mut z: Vec<f64> = weights.iter().map(|&w| w.max(epsilon).ln()).collect();

        let evaluate = |x: &[f64], gx: &mut [f64]| -> Result<f64, anyhow::Error> {
            Ok(objective(weights, epsilon, x, gx))
        };
        let max_iterations = self.max_iterations;
        let progress = |prgr: &liblbfgs::Progress| -> bool {
            if prgr.niter >= max_iterations {
                warn!(
                    "mode finder reached {} iterations, ||g|| = {:.3e}",
                    prgr.niter, prgr.gnorm
                );
            }
            false
        };

        let result = liblbfgs::lbfgs()
            .with_max_iterations(self.max_iterations)
            .with_epsilon(self.tolerance)
            .with_fx_delta(1e-10, 10)
            .with_max_linesearch(40)
            .minimize(&mut z, evaluate, progress);

        if let Err(e) = result {
            // Line searches give up on the flat tail near the floor; keep the
            // last point if it is stationary anyway.
            let mut gx = vec![0.0; z.len()];
            objective(weights, epsilon, &z, &mut gx);
            let gnorm = gx.iter().map(|g| g * g).sum::<f64>().sqrt();
            let xnorm = z.iter().map(|v| v * v).sum::<f64>().sqrt().max(1.0);
            if !(gnorm <= 1e-4 * xnorm) {
                return Err(io::Error::other(format!("mode finder failed: {}", e)));
            }
            warn!("mode finder stopped early ({}), ||g|| = {:.3e}", e, gnorm);
        }

        let c = 1.0 - weights.len() as f64 * epsilon;
        Ok(softmax(&z).into_iter().map(|s| epsilon + c * s).collect())
    }
}

/// Negative log objective at `theta = epsilon + c softmax(z)` and its gradient in `z`
fn objective(weights: &[f64], epsilon: f64, z: &[f64], gx: &mut [f64]) -> f64 {
    let c = 1.0 - weights.len() as f64 * epsilon;
    let s = softmax(z);
    let mut fx = 0.0;
    let mut avg = 0.0;
    for i in 0..weights.len() {
        let theta = epsilon + c * s[i];
        fx -= weights[i] * theta.ln();
        avg += weights[i] / theta * s[i];
    }
    for i in 0..weights.len() {
        let theta = epsilon + c * s[i];
        gx[i] = -c * s[i] * (weights[i] / theta - avg);
    }
    fx
}

impl ModeFinder for ModifiedDirichlet {
    fn mode(&self, dim: usize, counts: &[f64], epsilon: f64) -> io::Result<Vec<f64>> {
        if dim == 0 || counts.len() != dim {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("expected {} counts, got {}", dim, counts.len()),
            ));
        }
        if !(epsilon > 0.0) || dim as f64 * epsilon >= 1.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("epsilon {} is infeasible for dimension {}", epsilon, dim),
            ));
        }
        if counts.iter().any(|w| !w.is_finite()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "counts must be finite",
            ));
        }

        let mass: f64 = counts.iter().map(|&w| w.max(0.0)).sum();
        let theta = if dim == 1 {
            vec![1.0]
        } else if mass == 0.0 {
            vec![1.0 / dim as f64; dim]
        } else if let Some(theta) = proportional(counts, epsilon) {
            theta
        } else {
            self.optimize(counts, epsilon)?
        };

        let scale = if mass > 0.0 { mass } else { 1.0 };
        Ok(theta.into_iter().map(|t| t * scale).collect())
    }
}

fn proportional(weights: &[f64], epsilon: f64) -> Option<Vec<f64>> {
    if weights.iter().any(|&w| !(w > 0.0)) {
        return None;
    }
    let total: f64 = weights.iter().sum();
    let theta: Vec<f64> = weights.iter().map(|&w| w / total).collect();
    if theta.iter().all(|&t| t >= epsilon) {
        Some(theta)
    } else {
        None
    }
}

fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = z.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(got: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < tol, "{:?} vs {:?}", got, expected);
        }
    }

    #[test]
    fn test_proportional_mode() {
        let md = ModifiedDirichlet::new();
        let mode = md.mode(2, &[2.0, 6.0], 0.01).unwrap();
        assert_close(&mode, &[2.0, 6.0], 1e-12);
        assert_close(&md.mode(1, &[3.0], 0.5).unwrap(), &[3.0], 1e-12);
    }

    #[test]
    fn test_floor_is_enforced() {
        let md = ModifiedDirichlet::new();
        let counts = [10.0, 10.0, 0.001];
        let mode = md.mode(3, &counts, 0.01).unwrap();
        let mass: f64 = counts.iter().sum();
        let theta: Vec<f64> = mode.iter().map(|m| m / mass).collect();
        assert_close(&theta, &[0.495, 0.495, 0.01], 1e-4);
    }

    #[test]
    fn test_negative_weight_goes_to_floor() {
        let md = ModifiedDirichlet::new();
        let mode = md.mode(2, &[4.0, -1.0], 0.05).unwrap();
        assert_close(&mode, &[3.8, 0.2], 1e-3);
    }

    #[test]
    fn test_invalid_input() {
        let md = ModifiedDirichlet::new();
        assert!(md.mode(3, &[1.0, 2.0], 0.01).is_err());
        assert!(md.mode(4, &[1.0; 4], 0.25).is_err());
        assert!(md.mode(2, &[1.0, f64::NAN], 0.01).is_err());
    }

    #[test]
    fn test_no_positive_mass() {
        let md = ModifiedDirichlet::new();
        assert_close(&md.mode(4, &[0.0; 4], 0.01).unwrap(), &[0.25; 4], 1e-12);
        assert_close(&md.mode(2, &[-1.0, 0.0], 0.01).unwrap(), &[0.5, 0.5], 1e-12);
    }

    #[test]
    fn test_softmax() {
        let s = softmax(&[0.0, 0.0, 2f64.ln()]);
        assert_close(&s, &[0.25, 0.25, 0.5], 1e-12);
    }
}
