pub mod association;
pub mod frequency;
pub mod patterns;

use daletou_db::models::{Draw, Zone};

use crate::config::AnalysisConfig;
use crate::features::describe_draws;

pub use association::{AssociationRule, mine_rules};
pub use frequency::{FrequencyTable, NumberFrequency, frequency_table};
pub use patterns::{PatternSummary, analyze_patterns};

/// Everything the scorer needs to know about a history slice.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub total_draws: usize,
    pub front: FrequencyTable,
    pub back: FrequencyTable,
    pub patterns: PatternSummary,
    pub rules: Vec<AssociationRule>,
}

impl HistoryStats {
    pub fn frequencies(&self, zone: Zone) -> &FrequencyTable {
        match zone {
            Zone::Front => &self.front,
            Zone::Back => &self.back,
        }
    }
}

/// Statistics of `draws` as given; the caller cuts the slice at its cutoff.
pub fn analyze(draws: &[Draw], config: &AnalysisConfig) -> HistoryStats {
    let level = config.verbosity.detail_level();
    let features = describe_draws(draws);
    let stats = HistoryStats {
        total_draws: draws.len(),
        front: frequency_table(draws, Zone::Front, config.recent_window),
        back: frequency_table(draws, Zone::Back, config.recent_window),
        patterns: analyze_patterns(&features, config.sum_bucket_width),
        rules: mine_rules(draws, &config.association),
    };
    log::log!(
        level,
        "stats over {} draws: {} association rules, modal odd count {:?}",
        stats.total_draws,
        stats.rules.len(),
        stats.patterns.modal_odd_count()
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use daletou_db::models::make_test_draws;

    #[test]
    fn test_analyze_is_order_independent_of_calls() {
        let draws = make_test_draws(120);
        let config = AnalysisConfig::default();
        let late = analyze(&draws[..100], &config);
        let _ = analyze(&draws, &config);
        let early = analyze(&draws[..100], &config);
        assert_eq!(late, early);
        assert_eq!(early.total_draws, 100);
        assert_eq!(early.frequencies(Zone::Back).entries.len(), 12);
    }
}
