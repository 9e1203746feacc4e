use anyhow::{Result, bail};
use ndarray::Array1;

use super::{BinaryClassifier, ModelFamily, Standardizer, TrainingSet, sigmoid};
use crate::config::LogisticConfig;

/// L2-regularised logistic regression on z-scored features.
pub struct LogisticModel {
    scaler: Standardizer,
    weights: Array1<f64>,
    bias: f64,
}

impl LogisticModel {
    pub fn train(set: &TrainingSet, config: &LogisticConfig) -> Result<Self> {
        let n_samples = set.n_samples() as f64;
        let scaler = Standardizer::fit(&set.x)?;
        let x_norm = scaler.transform(&set.x);

        // full-batch gradient descent, L2 on the weights only
        let mut weights = Array1::<f64>::zeros(set.n_features());
        let mut bias = 0.0f64;

        for _ in 0..config.epochs {
            let logits = x_norm.dot(&weights) + bias;
            let preds = logits.mapv(sigmoid);
            let errors = &preds - &set.y;

            let grad_w = x_norm.t().dot(&errors) / n_samples + &weights * (config.lambda * 2.0);
            let grad_b = errors.sum() / n_samples;

            weights = weights - &grad_w * config.learning_rate;
            bias -= grad_b * config.learning_rate;
        }

        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            bail!("logistic weights diverged");
        }
        Ok(Self { scaler, weights, bias })
    }
}

impl BinaryClassifier for LogisticModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Logistic
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        let feat = self.scaler.transform_row(row);
        sigmoid(feat.dot(&self.weights) + self.bias)
    }
}
