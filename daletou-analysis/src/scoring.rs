use std::cmp::Ordering;

use daletou_db::models::{Draw, Zone};

use crate::config::AnalysisConfig;
use crate::features::front_zone_index;
use crate::models::ProbabilityTable;
use crate::stats::HistoryStats;

/// Closeness-to-average-interval sharpness per zone.
const FRONT_OMISSION_K: f64 = 0.005;
const BACK_OMISSION_K: f64 = 0.01;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreTerms {
    pub frequency: f64,
    pub omission: f64,
    pub pattern: f64,
    pub model: f64,
}

impl ScoreTerms {
    fn as_array(&self) -> [f64; 4] {
        [self.frequency, self.omission, self.pattern, self.model]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNumber {
    pub number: u8,
    /// Raw appearance count, first tie-break.
    pub frequency_count: u32,
    pub raw: ScoreTerms,
    pub normalized: ScoreTerms,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneScores {
    pub zone: Zone,
    /// Best first.
    pub ranked: Vec<ScoredNumber>,
}

impl ZoneScores {
    /// The `k` best numbers, in rank order.
    pub fn top(&self, k: usize) -> Vec<u8> {
        self.ranked.iter().take(k).map(|s| s.number).collect()
    }

    pub fn get(&self, number: u8) -> Option<&ScoredNumber> {
        self.ranked.iter().find(|s| s.number == number)
    }

    pub fn rank_of(&self, number: u8) -> Option<usize> {
        self.ranked.iter().position(|s| s.number == number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    pub front: ZoneScores,
    pub back: ZoneScores,
}

impl ScoreTable {
    pub fn zone(&self, zone: Zone) -> &ZoneScores {
        match zone {
            Zone::Front => &self.front,
            Zone::Back => &self.back,
        }
    }
}

/// Scales to [0, 1]; a constant input maps to 0.5 everywhere.
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range < 1e-12 {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Score desc, then raw frequency count desc, then number asc.
pub fn rank_order(a: &ScoredNumber, b: &ScoredNumber) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.frequency_count.cmp(&a.frequency_count))
        .then(a.number.cmp(&b.number))
}

pub fn rank(entries: &mut [ScoredNumber]) {
    entries.sort_by(rank_order);
}

pub fn omission_signal(current_omission: u32, average_interval: f64, zone: Zone) -> f64 {
    let k = match zone {
        Zone::Front => FRONT_OMISSION_K,
        Zone::Back => BACK_OMISSION_K,
    };
    let d = current_omission as f64 - average_interval;
    (-k * d * d).exp()
}

/// Parity fit + sub-range fit + association fit (front only).
fn pattern_fit(zone: Zone, number: u8, stats: &HistoryStats, last_draw: Option<&Draw>) -> f64 {
    let p = &stats.patterns;
    let odd = number % 2 == 1;
    match zone {
        Zone::Front => {
            let parity = p
                .modal_odd_count()
                .map_or(0.5, |m| if odd { m as f64 / 5.0 } else { (5 - m) as f64 / 5.0 });
            let sub_range = p
                .modal_zone_distribution()
                .map_or(1.0 / 3.0, |z| z[front_zone_index(number)] as f64 / 5.0);
            let association: f64 = last_draw
                .map(|d| {
                    stats
                        .rules
                        .iter()
                        .filter(|r| r.applies_to(&d.front) && r.implies(number))
                        .map(|r| r.confidence * r.lift)
                        .sum()
                })
                .unwrap_or(0.0);
            parity + sub_range + association
        }
        Zone::Back => {
            let parity = p
                .modal_back_odd_count()
                .map_or(0.5, |m| if odd { m as f64 / 2.0 } else { (2 - m) as f64 / 2.0 });
            let upper = number > 6;
            let half = p
                .modal_back_upper_count()
                .map_or(0.5, |u| if upper { u as f64 / 2.0 } else { (2 - u) as f64 / 2.0 });
            parity + half
        }
    }
}

fn score_zone(
    zone: Zone,
    stats: &HistoryStats,
    probabilities: &ProbabilityTable,
    last_draw: Option<&Draw>,
    config: &AnalysisConfig,
) -> ZoneScores {
    let freq = stats.frequencies(zone);
    let w = &config.weights;
    let recent_draws = config.recent_window.min(freq.total_draws);
    let raw: Vec<(u8, u32, ScoreTerms)> = zone
        .numbers()
        .map(|n| {
            let (count, frequency, omission) = freq.get(n).map_or((0, 0.0, 0.0), |f| {
                let recent = if recent_draws > 0 { f.recent_count as f64 / recent_draws as f64 } else { 0.0 };
                let ratio = if f.max_omission > 0 {
                    f.current_omission as f64 / f.max_omission as f64
                } else {
                    0.0
                };
                (
                    f.count,
                    f.frequency + w.recent_frequency * recent,
                    omission_signal(f.current_omission, f.average_interval, zone) + w.max_omission_ratio * ratio,
                )
            });
            let model = probabilities.get(zone, n).map_or(0.0, |p| p.probability);
            let terms = ScoreTerms {
                frequency,
                omission,
                pattern: pattern_fit(zone, n, stats, last_draw),
                model,
            };
            (n, count, terms)
        })
        .collect();

    let column = |pick: fn(&ScoreTerms) -> f64| min_max(&raw.iter().map(|(_, _, t)| pick(t)).collect::<Vec<_>>());
    let norm_freq = column(|t| t.frequency);
    let norm_omission = column(|t| t.omission);
    let norm_pattern = column(|t| t.pattern);
    let norm_model = column(|t| t.model);

    let weights = w.as_array();
    let mut ranked: Vec<ScoredNumber> = raw
        .iter()
        .enumerate()
        .map(|(i, &(number, frequency_count, terms))| {
            let normalized = ScoreTerms {
                frequency: norm_freq[i],
                omission: norm_omission[i],
                pattern: norm_pattern[i],
                model: norm_model[i],
            };
            let score: f64 = normalized
                .as_array()
                .iter()
                .zip(weights.iter())
                .map(|(v, w)| v * w)
                .sum();
            ScoredNumber { number, frequency_count, raw: terms, normalized, score }
        })
        .collect();
    rank(&mut ranked);

    log::log!(
        config.verbosity.detail_level(),
        "{} ranking head: {:?}",
        zone,
        ranked.iter().take(7).map(|s| s.number).collect::<Vec<_>>()
    );
    ZoneScores { zone, ranked }
}

/// `last_draw` is the most recent draw of the history; it drives the
/// association fit.
pub fn score_numbers(
    stats: &HistoryStats,
    probabilities: &ProbabilityTable,
    last_draw: Option<&Draw>,
    config: &AnalysisConfig,
) -> ScoreTable {
    ScoreTable {
        front: score_zone(Zone::Front, stats, probabilities, last_draw, config),
        back: score_zone(Zone::Back, stats, probabilities, last_draw, config),
    }
}
