//! Linear quantile regression
//!
//! Each estimator minimizes the pinball loss for one quantile level with
//! L1-penalized stochastic subgradient descent on standardized inputs.
//! Sample order is shuffled with a seeded [`StdRng`], and the returned
//! coefficients are the average of the iterates over the second half of
//! training, so a fit is a pure function of (data, level, params, seed).

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::EstimatorParams;

/// Pinball (quantile) loss of one prediction
pub fn pinball_loss(actual: f64, predicted: f64, level: f64) -> f64 {
    let error = actual - predicted;
    if error >= 0.0 {
        level * error
    } else {
        (level - 1.0) * error
    }
}

/// Derive an independent seed for one (level, step) fit
///
/// Hash-based, so the seed does not depend on the order fits are run in.
pub fn derive_seed(master: u64, level_index: usize, step: usize) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&master.to_le_bytes());
    hasher.update(&(level_index as u64).to_le_bytes());
    hasher.update(&(step as u64).to_le_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Column-wise z-score scaling fitted on training data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    /// Fit means and standard deviations; constant columns get scale 1
    pub fn fit(rows: &[&[f64]]) -> Self {
        let width = rows.first().map_or(0, |r| r.len());
        let n = rows.len().max(1) as f64;

        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row.iter()) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut scales = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row.iter()).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut scales {
            *s = (*s / n).sqrt();
            if !s.is_normal() || *s < 1e-12 {
                *s = 1.0;
            }
        }

        Self { means, scales }
    }

    /// Scale one row
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// A fitted linear model for one quantile level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearQuantileRegressor {
    level: f64,
    scaler: Standardizer,
    weights: Vec<f64>,
    bias: f64,
    target_scale: f64,
}

impl LinearQuantileRegressor {
    /// Fit on rows `x` with targets `y`
    ///
    /// `x` and `y` must have the same, non-zero length.
    pub fn fit(x: &[&[f64]], y: &[f64], level: f64, params: &EstimatorParams, seed: u64) -> Self {
        debug_assert_eq!(x.len(), y.len());
        let n = x.len();
        let scaler = Standardizer::fit(x);
        let rows: Vec<Vec<f64>> = x.iter().map(|r| scaler.transform(r)).collect();
        let width = rows.first().map_or(0, Vec::len);

        let target_scale = {
            let mean = y.iter().sum::<f64>() / n.max(1) as f64;
            let sd = (y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n.max(1) as f64).sqrt();
            if sd.is_normal() && sd > 1e-12 { sd } else { 1.0 }
        };
        let targets: Vec<f64> = y.iter().map(|v| v / target_scale).collect();

        let mut weights = vec![0.0; width];
        let mut bias = empirical_quantile(&targets, level);

        let mut avg_weights = vec![0.0; width];
        let mut avg_bias = 0.0;
        let mut averaged = 0_usize;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..n).collect();
        let averaging_from = params.epochs / 2;

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let lr = params.learning_rate / (1.0 + epoch as f64).sqrt();
            let shrink = lr * params.alpha;

            for &i in &order {
                let row = &rows[i];
                let pred = bias + dot(&weights, row);
                let residual = targets[i] - pred;
                let grad = if residual > 0.0 {
                    -level
                } else if residual < 0.0 {
                    1.0 - level
                } else {
                    0.0
                };

                bias -= lr * grad;
                for (w, xj) in weights.iter_mut().zip(row) {
                    let stepped = *w - lr * grad * xj;
                    *w = stepped.signum() * (stepped.abs() - shrink).max(0.0);
                }

                if epoch >= averaging_from {
                    for (a, w) in avg_weights.iter_mut().zip(&weights) {
                        *a += w;
                    }
                    avg_bias += bias;
                    averaged += 1;
                }
            }
        }

        if averaged > 0 {
            let k = averaged as f64;
            for a in &mut avg_weights {
                *a /= k;
            }
            weights = avg_weights;
            bias = avg_bias / k;
        }

        Self {
            level,
            scaler,
            weights,
            bias,
            target_scale,
        }
    }

    /// Predict the conditional quantile for one row
    pub fn predict(&self, row: &[f64]) -> f64 {
        let z = self.scaler.transform(row);
        (self.bias + dot(&self.weights, &z)) * self.target_scale
    }

    /// Quantile level this model was fitted for
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Fitted weights on standardized features
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn empirical_quantile(values: &[f64], level: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (level * (sorted.len() - 1) as f64).round() as usize;
    sorted[pos.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EstimatorParams {
        EstimatorParams::default()
    }

    #[test]
    fn test_pinball_loss_is_asymmetric() {
        assert!((pinball_loss(1.0, 0.0, 0.9) - 0.9).abs() < 1e-12);
        assert!((pinball_loss(0.0, 1.0, 0.9) - 0.1).abs() < 1e-12);
        assert_eq!(pinball_loss(2.0, 2.0, 0.3), 0.0);
    }

    #[test]
    fn test_derive_seed_is_stable_and_distinct() {
        assert_eq!(derive_seed(42, 0, 1), derive_seed(42, 0, 1));
        assert_ne!(derive_seed(42, 0, 1), derive_seed(42, 1, 1));
        assert_ne!(derive_seed(42, 0, 1), derive_seed(42, 0, 2));
        assert_ne!(derive_seed(42, 0, 1), derive_seed(43, 0, 1));
    }

    #[test]
    fn test_standardizer_handles_constant_column() {
        let rows: Vec<Vec<f64>> = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let refs: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let scaler = Standardizer::fit(&refs);
        let z = scaler.transform(&[3.0, 5.0]);
        assert!((z[0] - 1.0).abs() < 1e-12);
        assert_eq!(z[1], 0.0);
    }

    #[test]
    fn test_intercept_only_fit_tracks_quantiles() {
        // Uninformative feature; targets uniform on [0, 1)
        let n = 400;
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![((i * 37) % 11) as f64]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let y: Vec<f64> = (0..n).map(|i| ((i * 7919) % n) as f64 / n as f64).collect();

        let lo = LinearQuantileRegressor::fit(&refs, &y, 0.1, &params(), 1);
        let hi = LinearQuantileRegressor::fit(&refs, &y, 0.9, &params(), 1);

        let p_lo = lo.predict(&[5.0]);
        let p_hi = hi.predict(&[5.0]);
        assert!((p_lo - 0.1).abs() < 0.15, "q10 prediction {p_lo}");
        assert!((p_hi - 0.9).abs() < 0.15, "q90 prediction {p_hi}");
        assert!(p_lo < p_hi);
    }

    #[test]
    fn test_fit_learns_linear_relation() {
        let n = 300;
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64 / n as f64]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let y: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] + 0.5).collect();

        let model = LinearQuantileRegressor::fit(&refs, &y, 0.5, &params(), 9);
        assert!(model.weights()[0] > 0.0);
        assert!(model.predict(&[0.9]) > model.predict(&[0.1]));
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let rows: Vec<Vec<f64>> = (0..100)
            .map(|i| vec![(i as f64).sin(), (i as f64 * 0.3).cos()])
            .collect();
        let refs: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        let y: Vec<f64> = (0..100).map(|i| (i as f64 * 0.11).sin()).collect();

        let a = LinearQuantileRegressor::fit(&refs, &y, 0.25, &params(), 77);
        let b = LinearQuantileRegressor::fit(&refs, &y, 0.25, &params(), 77);
        assert_eq!(a, b);
        assert_eq!(a.predict(&[0.2, 0.4]).to_bits(), b.predict(&[0.2, 0.4]).to_bits());
    }
}
