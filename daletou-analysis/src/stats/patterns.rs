use std::collections::BTreeMap;

use crate::features::DrawFeatures;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternSummary {
    pub total_draws: usize,
    /// Front odd count (0..=5) → draws.
    pub odd_counts: BTreeMap<u8, u32>,
    /// Counts per front sub-range → draws.
    pub zone_distributions: BTreeMap<[u8; 3], u32>,
    /// Lower bound of the front-sum bucket → draws.
    pub sum_ranges: BTreeMap<u32, u32>,
    pub sum_bucket_width: u32,
    pub back_odd_counts: BTreeMap<u8, u32>,
    /// Back numbers in 7..=12 (0..=2) → draws.
    pub back_upper_counts: BTreeMap<u8, u32>,
}

/// Highest count wins, ties go to the smallest key.
fn mode<K: Copy + Ord>(hist: &BTreeMap<K, u32>) -> Option<K> {
    hist.iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(k, _)| *k)
}

fn top<K: Copy + Ord>(hist: &BTreeMap<K, u32>, n: usize) -> Vec<(K, u32)> {
    let mut items: Vec<(K, u32)> = hist.iter().map(|(k, v)| (*k, *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    items.truncate(n);
    items
}

impl PatternSummary {
    pub fn modal_odd_count(&self) -> Option<u8> {
        mode(&self.odd_counts)
    }

    pub fn modal_zone_distribution(&self) -> Option<[u8; 3]> {
        mode(&self.zone_distributions)
    }

    pub fn modal_sum_range(&self) -> Option<u32> {
        mode(&self.sum_ranges)
    }

    pub fn modal_back_odd_count(&self) -> Option<u8> {
        mode(&self.back_odd_counts)
    }

    pub fn modal_back_upper_count(&self) -> Option<u8> {
        mode(&self.back_upper_counts)
    }

    pub fn top_odd_counts(&self, n: usize) -> Vec<(u8, u32)> {
        top(&self.odd_counts, n)
    }

    pub fn top_zone_distributions(&self, n: usize) -> Vec<([u8; 3], u32)> {
        top(&self.zone_distributions, n)
    }

    pub fn top_sum_ranges(&self, n: usize) -> Vec<(u32, u32)> {
        top(&self.sum_ranges, n)
    }

    pub fn sum_bucket(&self, sum: u32) -> u32 {
        (sum / self.sum_bucket_width) * self.sum_bucket_width
    }
}

pub fn analyze_patterns(features: &[DrawFeatures], sum_bucket_width: u32) -> PatternSummary {
    let width = sum_bucket_width.max(1);
    let mut summary = PatternSummary {
        total_draws: features.len(),
        sum_bucket_width: width,
        ..Default::default()
    };

    for f in features {
        *summary.odd_counts.entry(f.front_odd_count).or_insert(0) += 1;
        *summary.zone_distributions.entry(f.front_zone_counts).or_insert(0) += 1;
        *summary.sum_ranges.entry((f.front_sum / width) * width).or_insert(0) += 1;
        *summary.back_odd_counts.entry(f.back_odd_count).or_insert(0) += 1;
        *summary.back_upper_counts.entry(f.back_upper_count).or_insert(0) += 1;
    }

    summary
}
