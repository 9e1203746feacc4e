use anyhow::{Result, bail};
use ndarray::Array2;
use rand::SeedableRng;
use rand::prelude::*;
use rand::rngs::StdRng;

use super::{BinaryClassifier, ModelFamily, TrainingSet, sigmoid};
use crate::config::GbdtConfig;

#[derive(Debug)]
enum TreeNode {
    Leaf { value: f64 },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

fn predict_tree(node: &TreeNode, features: &[f64]) -> f64 {
    match node {
        TreeNode::Leaf { value } => *value,
        TreeNode::Split { feature_idx, threshold, left, right } => {
            if features[*feature_idx] <= *threshold {
                predict_tree(left, features)
            } else {
                predict_tree(right, features)
            }
        }
    }
}

/// Split candidates per feature. Value `v` falls in bin `b` = number of
/// thresholds strictly below `v`, so `v <= thresholds[b]` iff bin <= b.
struct Binning {
    thresholds: Vec<Vec<f64>>,
    /// `bins[[row, feature]]`
    bins: Array2<u16>,
}

impl Binning {
    fn new(x: &Array2<f64>, max_bins: usize) -> Self {
        let (n, d) = x.dim();
        let max_bins = max_bins.max(2);
        let mut thresholds = Vec::with_capacity(d);
        let mut bins = Array2::<u16>::zeros((n, d));

        for j in 0..d {
            let mut values: Vec<f64> = x.column(j).to_vec();
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();

            let cuts: Vec<f64> = if values.len() <= max_bins {
                values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
            } else {
                let mut q: Vec<f64> = (1..max_bins)
                    .map(|k| values[k * values.len() / max_bins])
                    .collect();
                q.dedup();
                q
            };

            for i in 0..n {
                bins[[i, j]] = cuts.partition_point(|&t| t < x[[i, j]]) as u16;
            }
            thresholds.push(cuts);
        }

        Self { thresholds, bins }
    }
}

struct TreeBuilder<'a> {
    binning: &'a Binning,
    grad: &'a [f64],
    hess: &'a [f64],
    config: &'a GbdtConfig,
}

struct SplitChoice {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn leaf(&self, rows: &[usize]) -> TreeNode {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        TreeNode::Leaf { value: -g / (h + self.config.lambda) * self.config.learning_rate }
    }

    fn best_split(&self, rows: &[usize], features: &[usize]) -> Option<SplitChoice> {
        let lambda = self.config.lambda;
        let min_leaf = self.config.min_samples_leaf.max(1);
        let g_total: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h_total: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let parent = g_total * g_total / (h_total + lambda);

        let mut best: Option<SplitChoice> = None;
        for &j in features {
            let cuts = &self.binning.thresholds[j];
            if cuts.is_empty() {
                continue;
            }
            let n_bins = cuts.len() + 1;
            let mut g_hist = vec![0.0f64; n_bins];
            let mut h_hist = vec![0.0f64; n_bins];
            let mut c_hist = vec![0usize; n_bins];
            for &i in rows {
                let b = self.binning.bins[[i, j]] as usize;
                g_hist[b] += self.grad[i];
                h_hist[b] += self.hess[i];
                c_hist[b] += 1;
            }

            let (mut gl, mut hl, mut cl) = (0.0, 0.0, 0usize);
            for b in 0..cuts.len() {
                gl += g_hist[b];
                hl += h_hist[b];
                cl += c_hist[b];
                let cr = rows.len() - cl;
                if cl < min_leaf || cr < min_leaf {
                    continue;
                }
                let gr = g_total - gl;
                let hr = h_total - hl;
                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent;
                if gain > best.as_ref().map_or(1e-12, |s| s.gain) {
                    best = Some(SplitChoice { feature: j, bin: b, gain });
                }
            }
        }
        best
    }

    fn build(&self, rows: &[usize], features: &[usize], depth: usize) -> TreeNode {
        if depth == 0 || rows.len() < 2 * self.config.min_samples_leaf.max(1) {
            return self.leaf(rows);
        }
        let Some(split) = self.best_split(rows, features) else {
            return self.leaf(rows);
        };
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.binning.bins[[i, split.feature]] as usize <= split.bin);

        TreeNode::Split {
            feature_idx: split.feature,
            threshold: self.binning.thresholds[split.feature][split.bin],
            left: Box::new(self.build(&left, features, depth - 1)),
            right: Box::new(self.build(&right, features, depth - 1)),
        }
    }
}

/// Gradient-boosted regression trees on the logistic loss.
pub struct GradientBoostingModel {
    base_score: f64,
    trees: Vec<TreeNode>,
}

impl GradientBoostingModel {
    pub fn train(set: &TrainingSet, config: &GbdtConfig, seed: u64) -> Result<Self> {
        let n = set.n_samples();
        let d = set.n_features();
        if n == 0 || d == 0 {
            bail!("empty training set");
        }

        let prior = (set.y.sum() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (prior / (1.0 - prior)).ln();
        let binning = Binning::new(&set.x, config.max_bins);
        let rows_per_tree = ((n as f64 * config.subsample).ceil() as usize).clamp(1, n);
        let features_per_tree = ((d as f64 * config.feature_fraction).ceil() as usize).clamp(1, d);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut margin = vec![base_score; n];
        let mut grad = vec![0.0f64; n];
        let mut hess = vec![0.0f64; n];
        let mut trees = Vec::with_capacity(config.n_estimators);
        let mut feature_pool: Vec<usize> = (0..d).collect();

        for _ in 0..config.n_estimators {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                grad[i] = p - set.y[i];
                hess[i] = (p * (1.0 - p)).max(1e-12);
            }

            let mut rows = rand::seq::index::sample(&mut rng, n, rows_per_tree).into_vec();
            rows.sort_unstable();
            feature_pool.shuffle(&mut rng);
            let mut features = feature_pool[..features_per_tree].to_vec();
            features.sort_unstable();

            let builder = TreeBuilder { binning: &binning, grad: &grad, hess: &hess, config };
            let tree = builder.build(&rows, &features, config.max_depth);

            for (i, m) in margin.iter_mut().enumerate() {
                let row = set.x.row(i);
                *m += match row.as_slice() {
                    Some(slice) => predict_tree(&tree, slice),
                    None => predict_tree(&tree, &row.to_vec()),
                };
            }
            trees.push(tree);
        }

        if margin.iter().any(|m| !m.is_finite()) {
            bail!("boosting produced non-finite scores");
        }
        Ok(Self { base_score, trees })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl BinaryClassifier for GradientBoostingModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::GradientBoosting
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        let score: f64 = self.trees.iter().map(|t| predict_tree(t, row)).sum();
        sigmoid(self.base_score + score)
    }
}
