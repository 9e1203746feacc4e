use std::cmp::Ordering;

use anyhow::{Result, bail};
use indicatif::ProgressBar;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use daletou_db::models::Draw;

use crate::backtest::{BacktestSummary, run_backtest};
use crate::config::{AnalysisConfig, ScoreWeights};

#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub trial: usize,
    pub weights: ScoreWeights,
    pub points: u64,
    pub mean_front_matches: f64,
    pub evaluated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuningResult {
    pub best: TrialResult,
    /// In trial order.
    pub trials: Vec<TrialResult>,
}

pub fn tier_points(tier: u8) -> u64 {
    match tier {
        1 => 1000,
        2 => 200,
        3 => 50,
        4 => 10,
        5 => 2,
        6..=9 => 1,
        _ => 0,
    }
}

pub fn summary_points(summary: &BacktestSummary) -> u64 {
    summary
        .tier_counts
        .iter()
        .map(|(&tier, &count)| tier_points(tier) * count as u64)
        .sum()
}

/// Each weight drawn uniformly from [0.5·w, 2·w].
fn sample_weights(base: &ScoreWeights, rng: &mut StdRng) -> ScoreWeights {
    let mut w = base.as_array();
    for v in w.iter_mut() {
        if *v > 0.0 {
            *v = rng.random_range(0.5 * *v..=2.0 * *v);
        }
    }
    base.with_terms(w)
}

/// Higher points, then higher mean front matches, then earlier trial.
fn better(a: &TrialResult, b: &TrialResult) -> Ordering {
    a.points
        .cmp(&b.points)
        .then(a.mean_front_matches.total_cmp(&b.mean_front_matches))
        .then(b.trial.cmp(&a.trial))
}

/// Random search over the score weights. Trial 0 evaluates the configured
/// weights as they are.
pub fn tune_weights(draws: &[Draw], config: &AnalysisConfig, pb: &ProgressBar) -> Result<TuningResult> {
    let trials = config.tuning.trials;
    if trials == 0 {
        bail!("tuning needs at least one trial");
    }
    let periods = config.tuning.periods;
    if periods == 0 {
        bail!("tuning needs at least one backtest period");
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    pb.set_length(trials as u64);

    let mut history = Vec::with_capacity(trials);
    for trial in 0..trials {
        let weights = if trial == 0 {
            config.weights.clone()
        } else {
            sample_weights(&config.weights, &mut rng)
        };
        let trial_config = AnalysisConfig { weights: weights.clone(), ..config.quiet() };
        let report = run_backtest(draws, &trial_config, periods)?;
        let result = TrialResult {
            trial,
            weights,
            points: summary_points(&report.summary),
            mean_front_matches: report.summary.mean_front_matches,
            evaluated: report.summary.evaluated,
        };
        log::log!(
            config.verbosity.detail_level(),
            "trial {}: {} points, mean front {:.3}, weights {:?}",
            trial,
            result.points,
            result.mean_front_matches,
            result.weights.as_array()
        );
        history.push(result);
        pb.inc(1);
    }

    let best = history
        .iter()
        .max_by(|a, b| better(a, b))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no tuning trial ran"))?;
    if best.evaluated == 0 {
        bail!("no backtest cutoff had enough history to score the weights");
    }
    log::info!(
        "best weights from trial {}: {} points, mean front matches {:.3}",
        best.trial,
        best.points,
        best.mean_front_matches
    );
    Ok(TuningResult { best, trials: history })
}
