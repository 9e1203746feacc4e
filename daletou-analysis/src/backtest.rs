use std::collections::BTreeMap;

use anyhow::Result;
use indicatif::ProgressBar;
use rayon::prelude::*;

use daletou_db::models::{Draw, Zone, history_before};

use crate::combination::{Combination, suggest};
use crate::config::AnalysisConfig;
use crate::error::InsufficientData;
use crate::pipeline::run_pipeline;

/// Matches of one 5+2 ticket against the actual draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketHit {
    pub front_matches: usize,
    pub back_matches: usize,
    pub prize_tier: Option<u8>,
}

impl TicketHit {
    pub fn new(front: &[u8], back: &[u8], actual: &Draw) -> Self {
        let front_matches = front.iter().filter(|n| actual.front.contains(n)).count();
        let back_matches = back.iter().filter(|n| actual.back.contains(n)).count();
        Self { front_matches, back_matches, prize_tier: prize_tier(front_matches, back_matches) }
    }

    /// Higher is better: winning tier first, then total matches.
    fn rank_key(&self) -> (std::cmp::Reverse<u8>, usize, usize) {
        (
            std::cmp::Reverse(self.prize_tier.unwrap_or(u8::MAX)),
            self.front_matches + self.back_matches,
            self.front_matches,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub period_id: u32,
    pub combination: Combination,
    pub actual: Draw,
    pub front_matches: usize,
    pub back_matches: usize,
    pub pool_front_matches: usize,
    pub pool_back_matches: usize,
    pub prize_tier: Option<u8>,
    /// One entry per suggested ticket, in suggestion order.
    pub suggestion_hits: Vec<TicketHit>,
    /// Best of the single ticket and the suggestions.
    pub best_hit: TicketHit,
}

impl BacktestResult {
    pub fn single_hit(&self) -> TicketHit {
        TicketHit {
            front_matches: self.front_matches,
            back_matches: self.back_matches,
            prize_tier: self.prize_tier,
        }
    }

    /// Single ticket followed by the suggestions.
    pub fn tickets(&self) -> impl Iterator<Item = TicketHit> + '_ {
        std::iter::once(self.single_hit()).chain(self.suggestion_hits.iter().copied())
    }
}

fn best_hit(hits: impl Iterator<Item = TicketHit>) -> Option<TicketHit> {
    hits.max_by_key(|h| h.rank_key())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCutoff {
    pub period_id: u32,
    pub reason: String,
}

/// Share of cutoffs reaching at least `threshold` matches, next to the
/// chance of doing so with a random ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRate {
    pub threshold: usize,
    pub hits: usize,
    pub rate: f64,
    pub baseline: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSummary {
    pub evaluated: usize,
    pub skipped: usize,
    /// Thresholds 1..=5.
    pub front_hit_rates: Vec<HitRate>,
    /// Thresholds 1..=2.
    pub back_hit_rates: Vec<HitRate>,
    pub mean_front_matches: f64,
    pub mean_back_matches: f64,
    pub mean_pool_front_matches: f64,
    pub mean_pool_back_matches: f64,
    /// Expected matches of a random single ticket.
    pub baseline_front_matches: f64,
    pub baseline_back_matches: f64,
    /// Single ticket plus suggestions, over all cutoffs.
    pub tickets_scored: usize,
    /// Prize tier → winning tickets, suggestions included.
    pub tier_counts: BTreeMap<u8, usize>,
    /// Prize tier → cutoffs, single ticket only.
    pub single_tier_counts: BTreeMap<u8, usize>,
    /// Prize tier → cutoffs, best ticket of each cutoff.
    pub best_tier_counts: BTreeMap<u8, usize>,
    pub mean_best_front_matches: f64,
    pub mean_best_back_matches: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    /// Sorted by period.
    pub results: Vec<BacktestResult>,
    pub skipped: Vec<SkippedCutoff>,
    pub summary: BacktestSummary,
}

/// DLT prize tier for a single ticket, `None` when nothing is won.
pub fn prize_tier(front: usize, back: usize) -> Option<u8> {
    match (front, back) {
        (5, 2) => Some(1),
        (5, 1) => Some(2),
        (5, 0) => Some(3),
        (4, 2) => Some(4),
        (4, 1) => Some(5),
        (3, 2) => Some(6),
        (4, 0) => Some(7),
        (3, 1) => Some(8),
        (2, 2) | (3, 0) | (1, 2) | (2, 1) | (0, 2) => Some(9),
        _ => None,
    }
}

fn choose(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// P(X >= threshold) when `picked` numbers are chosen at random from a zone
/// where `zone.pick_count()` are drawn.
pub fn random_hit_probability(zone: Zone, picked: usize, threshold: usize) -> f64 {
    let size = zone.size();
    let drawn = zone.pick_count();
    let total = choose(size, picked);
    (threshold..=picked.min(drawn))
        .map(|k| choose(drawn, k) * choose(size - drawn, picked - k) / total)
        .sum()
}

fn hit_rates(matches: &[usize], zone: Zone, picked: usize) -> Vec<HitRate> {
    let n = matches.len();
    (1..=zone.pick_count())
        .map(|threshold| {
            let hits = matches.iter().filter(|&&m| m >= threshold).count();
            HitRate {
                threshold,
                hits,
                rate: if n > 0 { hits as f64 / n as f64 } else { 0.0 },
                baseline: random_hit_probability(zone, picked, threshold),
            }
        })
        .collect()
}

fn mean(values: impl Iterator<Item = usize>, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    values.sum::<usize>() as f64 / n as f64
}

fn tally(tiers: impl Iterator<Item = Option<u8>>) -> BTreeMap<u8, usize> {
    let mut counts = BTreeMap::new();
    for tier in tiers.flatten() {
        *counts.entry(tier).or_insert(0) += 1;
    }
    counts
}

/// Integer sums only, so the result does not depend on input order.
pub fn summarize(results: &[BacktestResult], skipped: usize) -> BacktestSummary {
    let n = results.len();
    let front: Vec<usize> = results.iter().map(|r| r.front_matches).collect();
    let back: Vec<usize> = results.iter().map(|r| r.back_matches).collect();
    let tier_counts = tally(results.iter().flat_map(|r| r.tickets()).map(|h| h.prize_tier));
    let single_tier_counts = tally(results.iter().map(|r| r.prize_tier));
    let best_tier_counts = tally(results.iter().map(|r| r.best_hit.prize_tier));
    let front_zone = Zone::Front;
    let back_zone = Zone::Back;

    BacktestSummary {
        evaluated: n,
        skipped,
        front_hit_rates: hit_rates(&front, front_zone, front_zone.pick_count()),
        back_hit_rates: hit_rates(&back, back_zone, back_zone.pick_count()),
        mean_front_matches: mean(front.iter().copied(), n),
        mean_back_matches: mean(back.iter().copied(), n),
        mean_pool_front_matches: mean(results.iter().map(|r| r.pool_front_matches), n),
        mean_pool_back_matches: mean(results.iter().map(|r| r.pool_back_matches), n),
        baseline_front_matches: (front_zone.pick_count() * front_zone.pick_count()) as f64 / front_zone.size() as f64,
        baseline_back_matches: (back_zone.pick_count() * back_zone.pick_count()) as f64 / back_zone.size() as f64,
        tickets_scored: results.iter().map(|r| 1 + r.suggestion_hits.len()).sum(),
        tier_counts,
        single_tier_counts,
        best_tier_counts,
        mean_best_front_matches: mean(results.iter().map(|r| r.best_hit.front_matches), n),
        mean_best_back_matches: mean(results.iter().map(|r| r.best_hit.back_matches), n),
    }
}

enum CutoffOutcome {
    Evaluated(BacktestResult),
    Skipped(SkippedCutoff),
}

fn evaluate_cutoff(draws: &[Draw], index: usize, config: &AnalysisConfig) -> Result<CutoffOutcome> {
    let actual = &draws[index];
    match run_pipeline(history_before(draws, actual.period_id), config) {
        Ok(output) => {
            let single = TicketHit::new(&output.single.front, &output.single.back, actual);
            let suggestions = suggest(&output.scores, &output.stats, config)
                .map_err(|e| e.context(format!("backtest cutoff {}", actual.period_id)))?;
            let suggestion_hits: Vec<TicketHit> =
                suggestions.iter().map(|s| TicketHit::new(&s.front, &s.back, actual)).collect();
            let best = best_hit(std::iter::once(single).chain(suggestion_hits.iter().copied())).unwrap_or(single);
            Ok(CutoffOutcome::Evaluated(BacktestResult {
                period_id: actual.period_id,
                front_matches: single.front_matches,
                back_matches: single.back_matches,
                pool_front_matches: output.complex.front_matches(actual),
                pool_back_matches: output.complex.back_matches(actual),
                prize_tier: single.prize_tier,
                suggestion_hits,
                best_hit: best,
                combination: output.single,
                actual: actual.clone(),
            }))
        }
        Err(e) => match e.downcast_ref::<InsufficientData>() {
            Some(insufficient) => Ok(CutoffOutcome::Skipped(SkippedCutoff {
                period_id: actual.period_id,
                reason: insufficient.to_string(),
            })),
            None => Err(e.context(format!("backtest cutoff {}", actual.period_id))),
        },
    }
}

pub fn run_backtest(draws: &[Draw], config: &AnalysisConfig, periods: usize) -> Result<BacktestReport> {
    run_backtest_with_progress(draws, config, periods, &ProgressBar::hidden())
}

/// Replays the pipeline for each of the last `periods` draws using only the
/// draws before it. Cutoffs run in parallel.
pub fn run_backtest_with_progress(
    draws: &[Draw],
    config: &AnalysisConfig,
    periods: usize,
    pb: &ProgressBar,
) -> Result<BacktestReport> {
    let quiet = config.quiet();
    let start = draws.len().saturating_sub(periods);
    let indices: Vec<usize> = (start..draws.len()).collect();
    pb.set_length(indices.len() as u64);

    let outcomes: Vec<Result<CutoffOutcome>> = indices
        .par_iter()
        .map(|&i| {
            let outcome = evaluate_cutoff(draws, i, &quiet);
            pb.inc(1);
            outcome
        })
        .collect();

    let mut results = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome? {
            CutoffOutcome::Evaluated(r) => results.push(r),
            CutoffOutcome::Skipped(s) => {
                log::warn!("cutoff {} skipped: {}", s.period_id, s.reason);
                skipped.push(s);
            }
        }
    }
    results.sort_by_key(|r| r.period_id);
    skipped.sort_by_key(|s| s.period_id);

    let summary = summarize(&results, skipped.len());
    log::info!(
        "backtest: {} cutoffs evaluated, {} skipped, {} tickets scored, mean front matches {:.3} (best {:.3}, random {:.3})",
        summary.evaluated,
        summary.skipped,
        summary.tickets_scored,
        summary.mean_front_matches,
        summary.mean_best_front_matches,
        summary.baseline_front_matches
    );
    Ok(BacktestReport { results, skipped, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combination::CombinationKind;
    use crate::config::Verbosity;
    use daletou_db::models::make_test_draws;

    fn fast_config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.verbosity = Verbosity::Quiet;
        config.model.gbdt.n_estimators = 5;
        config.model.logistic.epochs = 20;
        config.model.margin.epochs = 2;
        config
    }

    fn hit(front: usize, back: usize) -> TicketHit {
        TicketHit { front_matches: front, back_matches: back, prize_tier: prize_tier(front, back) }
    }

    fn fake_result(period_id: u32, front: usize, back: usize) -> BacktestResult {
        let actual = make_test_draws(1).remove(0);
        BacktestResult {
            suggestion_hits: Vec::new(),
            best_hit: hit(front, back),
            period_id,
            combination: Combination::new(CombinationKind::Single, vec![1, 2, 3, 4, 5], vec![1, 2]).unwrap(),
            actual,
            front_matches: front,
            back_matches: back,
            pool_front_matches: front + 1,
            pool_back_matches: back,
            prize_tier: prize_tier(front, back),
        }
    }

    #[test]
    fn test_backtest_scenario_last_ten_periods() {
        let draws = make_test_draws(50);
        let config = AnalysisConfig { lag_window: 5, ..fast_config() };
        let report = run_backtest(&draws, &config, 10).unwrap();
        assert_eq!(report.results.len(), 10);
        assert!(report.skipped.is_empty());
        let periods: Vec<u32> = report.results.iter().map(|r| r.period_id).collect();
        assert_eq!(periods, (41..=50).collect::<Vec<u32>>());
        for r in &report.results {
            assert!(r.front_matches <= 5);
            assert!(r.back_matches <= 2);
            assert!(r.pool_front_matches >= r.front_matches);
            assert!(r.pool_back_matches >= r.back_matches);
            assert_eq!(r.actual.period_id, r.period_id);
        }
        assert_eq!(report.summary.evaluated, 10);
    }

    #[test]
    fn test_short_cutoffs_are_skipped() {
        let draws = make_test_draws(10);
        let config = AnalysisConfig { lag_window: 5, ..fast_config() };
        let report = run_backtest(&draws, &config, 8).unwrap();
        // cutoffs at indices 2..=9; indices 2..=5 lack W + 1 draws
        assert_eq!(report.skipped.len(), 4);
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.summary.skipped, 4);
        assert_eq!(report.skipped[0].period_id, 3);
    }

    #[test]
    fn test_summary_is_order_independent() {
        let results = vec![fake_result(1, 2, 1), fake_result(2, 0, 0), fake_result(3, 5, 2), fake_result(4, 3, 0)];
        let mut reversed = results.clone();
        reversed.reverse();
        assert_eq!(summarize(&results, 1), summarize(&reversed, 1));

        let summary = summarize(&results, 1);
        assert_eq!(summary.front_hit_rates.len(), 5);
        assert_eq!(summary.back_hit_rates.len(), 2);
        assert_eq!(summary.front_hit_rates[0].hits, 3);
        assert_eq!(summary.front_hit_rates[4].hits, 1);
        assert_eq!(summary.tier_counts.get(&1), Some(&1));
        assert_eq!(summary.tier_counts.get(&9), Some(&2));
        assert_eq!(summary.single_tier_counts, summary.tier_counts);
        assert_eq!(summary.tickets_scored, 4);
        assert!((summary.mean_front_matches - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_tier_counts_include_suggestion_tickets() {
        let mut with_suggestions = fake_result(1, 0, 0);
        with_suggestions.suggestion_hits = vec![hit(3, 1), hit(1, 0), hit(4, 2)];
        with_suggestions.best_hit = hit(4, 2);
        let results = vec![with_suggestions, fake_result(2, 2, 1)];

        let summary = summarize(&results, 0);
        assert_eq!(summary.tickets_scored, 5);
        // single tickets: nothing, then 2+1
        assert_eq!(summary.single_tier_counts, BTreeMap::from([(9, 1)]));
        assert_eq!(summary.tier_counts, BTreeMap::from([(4, 1), (8, 1), (9, 1)]));
        assert_eq!(summary.best_tier_counts, BTreeMap::from([(4, 1), (9, 1)]));
        assert!((summary.mean_best_front_matches - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_best_hit_prefers_prize_tier() {
        // 0+2 wins tier 9, 2+0 wins nothing despite the same total
        let best = best_hit([hit(2, 0), hit(0, 2), hit(1, 0)].into_iter()).unwrap();
        assert_eq!(best, hit(0, 2));
        let best = best_hit([hit(3, 1), hit(4, 0)].into_iter()).unwrap();
        assert_eq!(best.prize_tier, Some(7));
        assert_eq!(best_hit(std::iter::empty()), None);
    }

    #[test]
    fn test_backtest_scores_suggested_tickets() {
        let draws = make_test_draws(40);
        let mut config = AnalysisConfig { lag_window: 5, ..fast_config() };
        config.suggestions.count = 3;
        let report = run_backtest(&draws, &config, 4).unwrap();
        assert_eq!(report.results.len(), 4);
        for r in &report.results {
            assert!(!r.suggestion_hits.is_empty());
            assert!(r.suggestion_hits.len() <= 3);
            for h in &r.suggestion_hits {
                assert_eq!(h.prize_tier, prize_tier(h.front_matches, h.back_matches));
            }
            let best = best_hit(r.tickets()).unwrap();
            assert_eq!(r.best_hit, best);
        }
        let expected: usize = report.results.iter().map(|r| 1 + r.suggestion_hits.len()).sum();
        assert_eq!(report.summary.tickets_scored, expected);
        let winning: usize = report.results.iter().flat_map(|r| r.tickets()).filter(|h| h.prize_tier.is_some()).count();
        assert_eq!(report.summary.tier_counts.values().sum::<usize>(), winning);
    }

    #[test]
    fn test_cutoff_history_ends_before_actual_period() {
        let draws = make_test_draws(30);
        let config = AnalysisConfig { lag_window: 5, ..fast_config() };
        let CutoffOutcome::Evaluated(result) = evaluate_cutoff(&draws, 20, &config).unwrap() else {
            panic!("cutoff 21 should be evaluated");
        };
        let direct = run_pipeline(&draws[..20], &config).unwrap();
        assert_eq!(result.period_id, 21);
        assert_eq!(result.combination, direct.single);
    }

    #[test]
    fn test_prize_tiers() {
        assert_eq!(prize_tier(5, 2), Some(1));
        assert_eq!(prize_tier(4, 0), Some(7));
        assert_eq!(prize_tier(0, 2), Some(9));
        assert_eq!(prize_tier(2, 0), None);
        assert_eq!(prize_tier(1, 1), None);
    }

    #[test]
    fn test_random_baseline() {
        let p5 = random_hit_probability(Zone::Front, 5, 5);
        assert!((p5 - 1.0 / 324_632.0).abs() < 1e-15);
        assert!((random_hit_probability(Zone::Back, 2, 2) - 1.0 / 66.0).abs() < 1e-12);
        assert!((random_hit_probability(Zone::Front, 5, 0) - 1.0).abs() < 1e-12);
        let p1 = random_hit_probability(Zone::Front, 5, 1);
        assert!(p1 > 0.5 && p1 < 0.6);
    }
}
