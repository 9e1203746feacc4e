use anyhow::Result;

use daletou_db::models::{Draw, Zone};

use crate::combination::{self, Combination};
use crate::config::AnalysisConfig;
use crate::error::InsufficientData;
use crate::models::{ModelVote, ProbabilitySource, ProbabilityTable, train_models};
use crate::scoring::{ScoreTable, score_numbers};
use crate::stats::{HistoryStats, analyze};

/// A number whose probability did not come from a full model vote.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedItem {
    pub zone: Zone,
    pub number: u8,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub history_len: usize,
    pub last_period: u32,
    /// Follows the `YYNNN` year rollover when the history uses it.
    pub next_period: u32,
    pub training_rows: usize,
    pub stats: HistoryStats,
    pub probabilities: ProbabilityTable,
    pub scores: ScoreTable,
    pub single: Combination,
    pub complex: Combination,
    pub degraded: Vec<DegradedItem>,
}

impl PipelineOutput {
    pub fn next_period(&self) -> u32 {
        self.next_period
    }
}

fn collect_degraded(probabilities: &ProbabilityTable) -> Vec<DegradedItem> {
    let mut items = Vec::new();
    for zone in Zone::ALL {
        for p in probabilities.zone(zone) {
            match &p.source {
                ProbabilitySource::Fallback { reason, .. } => items.push(DegradedItem {
                    zone,
                    number: p.number,
                    detail: format!("frequency fallback: {}", reason),
                }),
                ProbabilitySource::Ensemble { votes } => {
                    for vote in votes {
                        if let ModelVote::Failed { family, reason } = vote {
                            items.push(DegradedItem {
                                zone,
                                number: p.number,
                                detail: format!("{} dropped: {}", family, reason),
                            });
                        }
                    }
                }
            }
        }
    }
    items
}

/// Statistics, models, scores and recommendations for the draw following
/// `draws`. Nothing after the last element of `draws` is consulted.
pub fn run_pipeline(draws: &[Draw], config: &AnalysisConfig) -> Result<PipelineOutput> {
    let required = config.lag_window + 1;
    let Some(last) = draws.last() else {
        return Err(InsufficientData { required, available: 0 }.into());
    };
    if draws.len() < required {
        return Err(InsufficientData { required, available: draws.len() }.into());
    }

    let stats = analyze(draws, config);
    let bundle = train_models(draws, config)?;
    let probabilities = bundle.predict(draws, &stats, &config.model)?;
    let scores = score_numbers(&stats, &probabilities, Some(last), config);
    let single = combination::single(&scores)?;
    let complex = combination::complex(&scores)?;
    let degraded = collect_degraded(&probabilities);
    let next_period = last.next_period_id();

    log::log!(
        config.verbosity.detail_level(),
        "period {}: single {}, {} numbers without models, {} degraded items",
        next_period,
        single,
        bundle.skipped(),
        degraded.len()
    );

    Ok(PipelineOutput {
        history_len: draws.len(),
        last_period: last.period_id,
        next_period,
        training_rows: bundle.training_rows,
        stats,
        probabilities,
        scores,
        single,
        complex,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;
    use crate::error::is_insufficient_data;
    use daletou_db::models::make_test_draws;

    fn test_config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.verbosity = Verbosity::Quiet;
        config.model.gbdt.n_estimators = 10;
        config.model.logistic.epochs = 30;
        config.model.margin.epochs = 3;
        config
    }

    #[test]
    fn test_pipeline_produces_valid_combinations() {
        let draws = make_test_draws(60);
        let output = run_pipeline(&draws, &test_config()).unwrap();
        assert_eq!(output.history_len, 60);
        assert_eq!(output.next_period(), 61);
        assert_eq!(output.single.front.len(), 5);
        assert_eq!(output.single.back.len(), 2);
        assert_eq!(output.complex.front.len(), 7);
        assert_eq!(output.complex.back.len(), 7);
        // front single is the head of the front ranking
        let mut top5 = output.scores.front.top(5);
        top5.sort_unstable();
        assert_eq!(output.single.front, top5);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let config = test_config();
        let err = run_pipeline(&make_test_draws(config.lag_window), &config).unwrap_err();
        assert!(is_insufficient_data(&err));
        let err = run_pipeline(&[], &config).unwrap_err();
        assert!(is_insufficient_data(&err));
    }

    #[test]
    fn test_skipped_numbers_are_reported_as_degraded() {
        // 60 draws give ~8.6 positives per front number, below the default 25
        let draws = make_test_draws(60);
        let output = run_pipeline(&draws, &test_config()).unwrap();
        assert!(output.degraded.iter().any(|d| d.zone == Zone::Front && d.detail.contains("fallback")));
    }

    #[test]
    fn test_failed_model_family_is_reported_as_dropped() {
        let draws = make_test_draws(60);
        let mut config = test_config();
        config.model.min_positive_samples = 5;
        config.model.margin.lambda = 0.0;
        let output = run_pipeline(&draws, &config).unwrap();
        let dropped: Vec<&DegradedItem> = output.degraded.iter().filter(|d| d.detail.contains("margin dropped")).collect();
        assert!(!dropped.is_empty());
        assert!(dropped.iter().all(|d| d.detail.contains("lambda")));
    }

    #[test]
    fn test_next_period_rolls_over_year() {
        let mut draws = make_test_draws(60);
        let start = chrono::NaiveDate::from_ymd_opt(2024, 7, 6).unwrap();
        for (i, d) in draws.iter_mut().enumerate() {
            d.period_id = 24091 + i as u32;
            d.date = start + chrono::TimeDelta::days(3 * i as i64);
        }
        // last draw 2024-12-30 (Monday), next is 2025-01-01
        assert_eq!(draws[59].date, chrono::NaiveDate::from_ymd_opt(2024, 12, 30).unwrap());
        let output = run_pipeline(&draws, &test_config()).unwrap();
        assert_eq!(output.last_period, 24150);
        assert_eq!(output.next_period(), 25001);
    }
}
