use anyhow::{Result, bail};
use ndarray::{Array1, Axis, s};
use rand::SeedableRng;
use rand::prelude::*;
use rand::rngs::StdRng;

use super::{BinaryClassifier, ModelFamily, Standardizer, TrainingSet, sigmoid};
use crate::config::MarginConfig;

/// Linear hinge-loss classifier trained with Pegasos sub-gradient steps.
/// The bias is an extra constant feature. Decision values are mapped to a
/// probability with Platt scaling fitted on the training set.
pub struct MarginModel {
    scaler: Standardizer,
    /// Last entry multiplies the constant feature.
    weights: Array1<f64>,
    platt_a: f64,
    platt_b: f64,
}

impl MarginModel {
    pub fn train(set: &TrainingSet, config: &MarginConfig, seed: u64) -> Result<Self> {
        if config.lambda <= 0.0 {
            bail!("margin lambda must be positive");
        }
        let n = set.n_samples();
        let scaler = Standardizer::fit(&set.x)?;
        let ones = Array1::<f64>::ones(n).insert_axis(Axis(1));
        let scaled = scaler.transform(&set.x);
        let x = ndarray::concatenate(Axis(1), &[scaled.view(), ones.view()])?;
        let signs: Vec<f64> = set.y.iter().map(|&v| if v > 0.5 { 1.0 } else { -1.0 }).collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..n).collect();
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let radius = 1.0 / config.lambda.sqrt();
        let mut step = 0usize;

        for _ in 0..config.epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                step += 1;
                let eta = 1.0 / (config.lambda * step as f64);
                let xi = x.row(i);
                let margin = signs[i] * xi.dot(&weights);
                weights *= 1.0 - eta * config.lambda;
                if margin < 1.0 {
                    weights.scaled_add(eta * signs[i], &xi);
                }
                let norm = weights.dot(&weights).sqrt();
                if norm > radius {
                    weights *= radius / norm;
                }
            }
        }

        if weights.iter().any(|w| !w.is_finite()) {
            bail!("margin weights diverged");
        }

        let decisions: Vec<f64> = x.rows().into_iter().map(|row| row.dot(&weights)).collect();
        let (platt_a, platt_b) = fit_platt(&decisions, &signs, config.platt_iterations)?;
        Ok(Self { scaler, weights, platt_a, platt_b })
    }

    fn decision(&self, row: &[f64]) -> f64 {
        let z = self.scaler.transform_row(row);
        let d = z.len();
        z.dot(&self.weights.slice(s![..d])) + self.weights[d]
    }
}

/// Newton iterations for `P(y=1 | f) = sigmoid(a·f + b)` with Platt's
/// smoothed targets.
fn fit_platt(decisions: &[f64], signs: &[f64], iterations: usize) -> Result<(f64, f64)> {
    let n_pos = signs.iter().filter(|&&s| s > 0.0).count() as f64;
    let n_neg = signs.len() as f64 - n_pos;
    let hi = (n_pos + 1.0) / (n_pos + 2.0);
    let lo = 1.0 / (n_neg + 2.0);
    let targets: Vec<f64> = signs.iter().map(|&s| if s > 0.0 { hi } else { lo }).collect();

    let mut a = 0.0f64;
    let mut b = ((n_pos + 1.0) / (n_neg + 1.0)).ln();

    for _ in 0..iterations {
        let (mut ga, mut gb) = (0.0, 0.0);
        let (mut haa, mut hab, mut hbb) = (1e-9, 0.0, 1e-9);
        for (&f, &t) in decisions.iter().zip(&targets) {
            let p = sigmoid(a * f + b);
            let w = p * (1.0 - p);
            ga += (p - t) * f;
            gb += p - t;
            haa += w * f * f;
            hab += w * f;
            hbb += w;
        }
        let det = haa * hbb - hab * hab;
        if det.abs() < 1e-18 {
            break;
        }
        let da = (hbb * ga - hab * gb) / det;
        let db = (haa * gb - hab * ga) / det;
        a -= da;
        b -= db;
        if da.abs() < 1e-10 && db.abs() < 1e-10 {
            break;
        }
    }

    if !a.is_finite() || !b.is_finite() {
        bail!("platt scaling diverged");
    }
    Ok((a, b))
}

impl BinaryClassifier for MarginModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Margin
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.platt_a * self.decision(row) + self.platt_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::separable_set;

    #[test]
    fn test_margin_orders_classes() {
        let set = separable_set(200);
        let model = MarginModel::train(&set, &MarginConfig::default(), 7).unwrap();
        let high = model.predict_proba(&[0.9, 0.5, 0.5]);
        let low = model.predict_proba(&[0.1, 0.5, 0.5]);
        assert!(high > low, "high {} low {}", high, low);
        assert!((0.0..=1.0).contains(&high) && (0.0..=1.0).contains(&low));
    }

    #[test]
    fn test_margin_is_deterministic_for_seed() {
        let set = separable_set(80);
        let a = MarginModel::train(&set, &MarginConfig::default(), 3).unwrap();
        let b = MarginModel::train(&set, &MarginConfig::default(), 3).unwrap();
        let row = [0.4, 0.1, 0.9];
        assert_eq!(a.predict_proba(&row), b.predict_proba(&row));
    }

    #[test]
    fn test_platt_on_separated_decisions() {
        let decisions = [-2.0, -1.5, -1.0, 1.0, 1.5, 2.0];
        let signs = [-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        let (a, b) = fit_platt(&decisions, &signs, 100).unwrap();
        assert!(a > 0.0);
        assert!(sigmoid(a * 2.0 + b) > 0.5);
        assert!(sigmoid(a * -2.0 + b) < 0.5);
    }

    #[test]
    fn test_non_positive_lambda_rejected() {
        let set = separable_set(20);
        let config = MarginConfig { lambda: 0.0, ..Default::default() };
        assert!(MarginModel::train(&set, &config, 1).is_err());
    }
}
