pub mod gbdt;
pub mod logistic;
pub mod margin;
pub mod trainer;

use anyhow::{Result, anyhow, bail};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

pub use trainer::{ModelBundle, NumberProbability, ProbabilitySource, ProbabilityTable, train_models};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    GradientBoosting,
    Logistic,
    Margin,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [ModelFamily::GradientBoosting, ModelFamily::Logistic, ModelFamily::Margin];

    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::GradientBoosting => "gradient_boosting",
            ModelFamily::Logistic => "logistic",
            ModelFamily::Margin => "margin",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A trained "appears in the next draw" classifier for one number.
pub trait BinaryClassifier: Send + Sync {
    fn family(&self) -> ModelFamily;
    /// Probability of the positive class for one model input row.
    fn predict_proba(&self, row: &[f64]) -> f64;
}

/// Outcome of one family for one number. A failure is data, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelVote {
    Success { family: ModelFamily, probability: f64 },
    Failed { family: ModelFamily, reason: String },
}

impl ModelVote {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelVote::Success { family, .. } | ModelVote::Failed { family, .. } => *family,
        }
    }

    pub fn probability(&self) -> Option<f64> {
        match self {
            ModelVote::Success { probability, .. } => Some(*probability),
            ModelVote::Failed { .. } => None,
        }
    }
}

/// Design matrix and 0/1 labels for one number.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl TrainingSet {
    pub fn from_rows(rows: &[Vec<f64>], labels: &[bool]) -> Result<Self> {
        if rows.is_empty() {
            bail!("empty training set");
        }
        if rows.len() != labels.len() {
            bail!("{} rows but {} labels", rows.len(), labels.len());
        }
        let n_features = rows[0].len();
        let mut x = Array2::<f64>::zeros((rows.len(), n_features));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_features {
                bail!("row {} has {} features, expected {}", i, row.len(), n_features);
            }
            for (j, &val) in row.iter().enumerate() {
                x[[i, j]] = val;
            }
        }
        let y = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        Ok(Self { x, y })
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn positives(&self) -> usize {
        self.y.iter().filter(|&&v| v > 0.5).count()
    }
}

/// Column-wise z-score fitted on the training matrix.
#[derive(Debug, Clone)]
pub(crate) struct Standardizer {
    means: Array1<f64>,
    stds: Array1<f64>,
}

impl Standardizer {
    pub(crate) fn fit(x: &Array2<f64>) -> Result<Self> {
        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow!("cannot standardize an empty matrix"))?;
        let n = x.nrows() as f64;
        let stds = x
            .axis_iter(Axis(0))
            .fold(Array1::<f64>::zeros(x.ncols()), |acc, row| {
                let diff = &row - &means;
                acc + &diff.mapv(|v| v * v)
            })
            .mapv(|v| (v / n).sqrt().max(1e-10));
        Ok(Self { means, stds })
    }

    pub(crate) fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            row -= &self.means;
            row /= &self.stds;
        }
        out
    }

    pub(crate) fn transform_row(&self, row: &[f64]) -> Array1<f64> {
        row.iter()
            .enumerate()
            .map(|(j, &v)| (v - self.means[j]) / self.stds[j])
            .collect()
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::TrainingSet;

    /// Separable toy problem: label is `x0 > 0.5`, plus two noise columns.
    pub fn separable_set(n: usize) -> TrainingSet {
        let mut rows = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let x0 = (i % 10) as f64 / 10.0;
            let noise = ((i * 7919) % 13) as f64 / 13.0;
            rows.push(vec![x0, noise, 1.0 - noise]);
            labels.push(x0 > 0.5);
        }
        TrainingSet::from_rows(&rows, &labels).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_set_shape() {
        let set = test_support::separable_set(40);
        assert_eq!(set.n_samples(), 40);
        assert_eq!(set.n_features(), 3);
        assert_eq!(set.positives(), 16);
    }

    #[test]
    fn test_training_set_rejects_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(TrainingSet::from_rows(&rows, &[true, false]).is_err());
        assert!(TrainingSet::from_rows(&[], &[]).is_err());
    }

    #[test]
    fn test_standardizer_centers_columns() {
        let set = test_support::separable_set(50);
        let scaler = Standardizer::fit(&set.x).unwrap();
        let z = scaler.transform(&set.x);
        for col in z.axis_iter(Axis(1)) {
            assert!(col.mean().unwrap().abs() < 1e-9);
        }
        let row = scaler.transform_row(&[0.3, 0.5, 0.5]);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_constant_column_does_not_blow_up() {
        let rows = vec![vec![1.0, 0.0], vec![1.0, 1.0], vec![1.0, 2.0]];
        let set = TrainingSet::from_rows(&rows, &[false, true, true]).unwrap();
        let scaler = Standardizer::fit(&set.x).unwrap();
        assert!(scaler.transform(&set.x).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_vote_accessors() {
        let ok = ModelVote::Success { family: ModelFamily::Logistic, probability: 0.2 };
        let failed = ModelVote::Failed { family: ModelFamily::Margin, reason: "nan".into() };
        assert_eq!(ok.probability(), Some(0.2));
        assert_eq!(failed.probability(), None);
        assert_eq!(failed.family(), ModelFamily::Margin);
        assert_eq!(ModelFamily::GradientBoosting.to_string(), "gradient_boosting");
    }
}
