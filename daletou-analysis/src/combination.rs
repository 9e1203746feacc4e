use std::collections::BTreeSet;

use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;

use daletou_db::models::{Draw, Suggestion, Zone};

use crate::config::AnalysisConfig;
use crate::features::front_zone_index;
use crate::scoring::{ScoreTable, ZoneScores};
use crate::stats::HistoryStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationKind {
    /// 5 front + 2 back.
    Single,
    /// 7 front + 7 back pool.
    Complex,
}

impl CombinationKind {
    pub fn sizes(&self) -> (usize, usize) {
        match self {
            CombinationKind::Single => (5, 2),
            CombinationKind::Complex => (7, 7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub kind: CombinationKind,
    /// Sorted ascending.
    pub front: Vec<u8>,
    /// Sorted ascending.
    pub back: Vec<u8>,
}

fn binomial(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    (0..k).fold(1u64, |acc, i| acc * (n - i) as u64 / (i as u64 + 1))
}

fn check_zone(numbers: &[u8], zone: Zone, expected: usize) -> Result<()> {
    if numbers.len() != expected {
        bail!("{} pool has {} numbers, need {}", zone, numbers.len(), expected);
    }
    let distinct: BTreeSet<u8> = numbers.iter().copied().collect();
    if distinct.len() != numbers.len() {
        bail!("duplicate {} numbers in {:?}", zone, numbers);
    }
    if let Some(&bad) = numbers.iter().find(|&&n| !zone.contains(n)) {
        bail!("{} number {} out of range", zone, bad);
    }
    Ok(())
}

impl Combination {
    pub fn new(kind: CombinationKind, mut front: Vec<u8>, mut back: Vec<u8>) -> Result<Self> {
        let (front_len, back_len) = kind.sizes();
        check_zone(&front, Zone::Front, front_len)?;
        check_zone(&back, Zone::Back, back_len)?;
        front.sort_unstable();
        back.sort_unstable();
        Ok(Self { kind, front, back })
    }

    /// Single tickets implied by the combination: C(7,5)·C(7,2) = 441 for
    /// a complex pool.
    pub fn ticket_count(&self) -> u64 {
        binomial(self.front.len(), 5) * binomial(self.back.len(), 2)
    }

    pub fn front_matches(&self, draw: &Draw) -> usize {
        self.front.iter().filter(|n| draw.front.contains(n)).count()
    }

    pub fn back_matches(&self, draw: &Draw) -> usize {
        self.back.iter().filter(|n| draw.back.contains(n)).count()
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |v: &[u8]| v.iter().map(|n| format!("{:02}", n)).collect::<Vec<_>>().join(" ");
        write!(f, "{} + {}", join(&self.front), join(&self.back))
    }
}

fn pick(scores: &ZoneScores, k: usize) -> Result<Vec<u8>> {
    if scores.ranked.len() < k {
        bail!("{} ranking has {} numbers, need {}", scores.zone, scores.ranked.len(), k);
    }
    Ok(scores.top(k))
}

/// Top-5 front and top-2 back.
pub fn single(scores: &ScoreTable) -> Result<Combination> {
    Combination::new(CombinationKind::Single, pick(&scores.front, 5)?, pick(&scores.back, 2)?)
}

/// Top-7 front and top-7 back pool; the tickets are not expanded.
pub fn complex(scores: &ScoreTable) -> Result<Combination> {
    Combination::new(CombinationKind::Complex, pick(&scores.front, 7)?, pick(&scores.back, 7)?)
}

/// Front numbers of `a` absent from `b`.
fn front_distance(a: &[u8; 5], b: &[u8; 5]) -> usize {
    a.iter().filter(|x| !b.contains(x)).count()
}

/// Greedy pick: best score first, keeping a minimum front distance.
fn select_diverse(candidates: &[Suggestion], count: usize, min_front_diff: usize) -> Vec<Suggestion> {
    // candidates are sorted best first
    let mut selected: Vec<Suggestion> = Vec::with_capacity(count);

    for candidate in candidates {
        if selected.len() >= count {
            break;
        }
        let too_close = selected
            .iter()
            .any(|s| front_distance(&candidate.front, &s.front) < min_front_diff);
        if !too_close {
            selected.push(candidate.clone());
        }
    }

    selected
}

fn sample_without_replacement(pool: &[(u8, f64)], count: usize, rng: &mut StdRng) -> Result<Vec<u8>> {
    let mut available = pool.to_vec();
    let mut chosen = Vec::with_capacity(count);
    for _ in 0..count {
        let weights: Vec<f64> = available.iter().map(|(_, w)| *w).collect();
        let dist = WeightedIndex::new(&weights)?;
        let (number, _) = available.remove(dist.sample(rng));
        chosen.push(number);
    }
    chosen.sort_unstable();
    Ok(chosen)
}

fn odd_count(numbers: &[u8]) -> u8 {
    numbers.iter().filter(|&&n| n % 2 == 1).count() as u8
}

/// Sum of number scores plus pattern and association bonuses.
fn ticket_score(front: &[u8; 5], back: &[u8; 2], scores: &ScoreTable, stats: &HistoryStats, config: &AnalysisConfig) -> f64 {
    let s = &config.suggestions;
    let number_score = |zone: &ZoneScores, n: u8| zone.get(n).map_or(0.0, |x| x.score);
    let mut total: f64 = front.iter().map(|&n| number_score(&scores.front, n)).sum::<f64>()
        + back.iter().map(|&n| number_score(&scores.back, n)).sum::<f64>();

    let patterns = &stats.patterns;
    if patterns.modal_odd_count() == Some(odd_count(front)) {
        total += s.odd_match_bonus;
    }
    let mut zones = [0u8; 3];
    for &n in front {
        zones[front_zone_index(n)] += 1;
    }
    if patterns.modal_zone_distribution() == Some(zones) {
        total += s.zone_match_bonus;
    }
    if patterns.modal_back_odd_count() == Some(odd_count(back)) {
        total += s.back_odd_match_bonus;
    }
    for rule in &stats.rules {
        if rule.applies_to(front) && rule.consequent.iter().all(|n| front.contains(n)) {
            total += s.rule_bonus
                * (1.0 + s.rule_lift_factor * (rule.lift - 1.0) + s.rule_confidence_factor * rule.confidence);
        }
    }
    total
}

/// Diversified single tickets sampled from the top-N pools, weighted by
/// score. Deterministic for a given seed.
pub fn suggest(scores: &ScoreTable, stats: &HistoryStats, config: &AnalysisConfig) -> Result<Vec<Suggestion>> {
    let s = &config.suggestions;
    let pool = |zone: &ZoneScores, n: usize| -> Vec<(u8, f64)> {
        zone.ranked.iter().take(n).map(|x| (x.number, x.score.max(0.0) + 0.01)).collect()
    };
    let front_pool = pool(&scores.front, s.top_n_front);
    let back_pool = pool(&scores.back, s.top_n_back);
    if front_pool.len() < 5 || back_pool.len() < 2 {
        bail!("candidate pools too small: {} front, {} back", front_pool.len(), back_pool.len());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let wanted = (s.count * s.oversample).max(s.count);
    let mut seen = BTreeSet::new();
    let mut candidates = Vec::with_capacity(wanted);

    for _ in 0..wanted * 20 {
        if candidates.len() >= wanted {
            break;
        }
        let front_vec = sample_without_replacement(&front_pool, 5, &mut rng)?;
        let back_vec = sample_without_replacement(&back_pool, 2, &mut rng)?;
        let front = [front_vec[0], front_vec[1], front_vec[2], front_vec[3], front_vec[4]];
        let back = [back_vec[0], back_vec[1]];
        if !seen.insert((front, back)) {
            continue;
        }
        let score = ticket_score(&front, &back, scores, stats, config);
        candidates.push(Suggestion { front, back, score });
    }

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.front.cmp(&b.front))
            .then_with(|| a.back.cmp(&b.back))
    });

    let selected = select_diverse(&candidates, s.count, s.min_front_diff);
    log::log!(
        config.verbosity.detail_level(),
        "{} suggestions kept out of {} sampled tickets",
        selected.len(),
        candidates.len()
    );
    Ok(selected)
}
