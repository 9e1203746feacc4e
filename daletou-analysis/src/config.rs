use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::models::ModelFamily;

/// How loudly per-component detail is logged. Warnings and the final
/// summary are not affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn detail_level(self) -> log::Level {
        match self {
            Verbosity::Quiet => log::Level::Trace,
            Verbosity::Normal => log::Level::Debug,
            Verbosity::Verbose => log::Level::Info,
        }
    }
}

/// Relative importance of each score term. They need not sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub frequency: f64,
    pub omission: f64,
    pub pattern: f64,
    pub model: f64,
    /// Extra omission signal from `current / max` omission. Off by default.
    pub max_omission_ratio: f64,
    /// Extra frequency signal from appearances in the recent window. Off by
    /// default.
    pub recent_frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            frequency: 0.30,
            omission: 0.20,
            pattern: 0.15,
            model: 0.35,
            max_omission_ratio: 0.0,
            recent_frequency: 0.0,
        }
    }
}

impl ScoreWeights {
    pub fn as_array(&self) -> [f64; 4] {
        [self.frequency, self.omission, self.pattern, self.model]
    }

    /// Replaces the four term weights, keeping the signal mixing weights.
    pub fn with_terms(&self, w: [f64; 4]) -> Self {
        Self {
            frequency: w[0],
            omission: w[1],
            pattern: w[2],
            model: w[3],
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    pub min_support: f64,
    pub min_confidence: f64,
    pub min_lift: f64,
    pub max_itemset_len: usize,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            min_support: 0.01,
            min_confidence: 0.53,
            min_lift: 1.53,
            max_itemset_len: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub lambda: f64,
    pub subsample: f64,
    pub feature_fraction: f64,
    pub max_bins: usize,
}

impl Default for GbdtConfig {
    fn default() -> Self {
        Self {
            n_estimators: 60,
            learning_rate: 0.05,
            max_depth: 3,
            min_samples_leaf: 15,
            lambda: 1.0,
            subsample: 0.8,
            feature_fraction: 0.7,
            max_bins: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub lambda: f64,
    pub epochs: usize,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            lambda: 0.001,
            epochs: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginConfig {
    pub lambda: f64,
    pub epochs: usize,
    pub platt_iterations: usize,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            lambda: 0.01,
            epochs: 10,
            platt_iterations: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Numbers with fewer positive labels fall back to their frequency.
    pub min_positive_samples: usize,
    /// Lower bound of the frequency fallback.
    pub probability_floor: f64,
    /// Only the most recent rows are used for training.
    pub max_training_rows: usize,
    pub aggregation: Aggregation,
    /// Order used by `Aggregation::Priority`.
    pub priority: Vec<ModelFamily>,
    pub gbdt: GbdtConfig,
    pub logistic: LogisticConfig,
    pub margin: MarginConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_positive_samples: 25,
            probability_floor: 0.01,
            max_training_rows: 400,
            aggregation: Aggregation::Mean,
            priority: vec![ModelFamily::GradientBoosting, ModelFamily::Logistic, ModelFamily::Margin],
            gbdt: GbdtConfig::default(),
            logistic: LogisticConfig::default(),
            margin: MarginConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub count: usize,
    pub top_n_front: usize,
    pub top_n_back: usize,
    /// Candidates sampled = count × oversample.
    pub oversample: usize,
    pub min_front_diff: usize,
    pub odd_match_bonus: f64,
    pub zone_match_bonus: f64,
    pub back_odd_match_bonus: f64,
    pub rule_bonus: f64,
    pub rule_lift_factor: f64,
    pub rule_confidence_factor: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            count: 10,
            top_n_front: 25,
            top_n_back: 8,
            oversample: 50,
            min_front_diff: 3,
            odd_match_bonus: 0.13,
            zone_match_bonus: 0.13,
            back_odd_match_bonus: 0.004,
            rule_bonus: 0.19,
            rule_lift_factor: 0.48,
            rule_confidence_factor: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub trials: usize,
    pub periods: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self { trials: 30, periods: 20 }
    }
}

/// Every component receives this value explicitly; nothing reads global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// W: preceding draws used to build a training row.
    pub lag_window: usize,
    pub recent_window: usize,
    pub sum_bucket_width: u32,
    /// K: cutoffs replayed by the backtester.
    pub backtest_periods: usize,
    pub seed: u64,
    pub verbosity: Verbosity,
    pub weights: ScoreWeights,
    pub association: AssociationConfig,
    pub model: ModelConfig,
    pub suggestions: SuggestionConfig,
    pub tuning: TuningConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lag_window: 5,
            recent_window: 50,
            sum_bucket_width: 10,
            backtest_periods: 100,
            seed: 42,
            verbosity: Verbosity::Normal,
            weights: ScoreWeights::default(),
            association: AssociationConfig::default(),
            model: ModelConfig::default(),
            suggestions: SuggestionConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Copy used inside backtest and tuning loops.
    pub fn quiet(&self) -> Self {
        Self {
            verbosity: Verbosity::Quiet,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lag_window == 0 {
            bail!("lag_window must be at least 1");
        }
        if self.sum_bucket_width == 0 {
            bail!("sum_bucket_width must be at least 1");
        }
        let w = &self.weights;
        if w.as_array()
            .iter()
            .chain([&w.max_omission_ratio, &w.recent_frequency])
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            bail!("score weights must be finite and non-negative");
        }
        let a = &self.association;
        if !(0.0..=1.0).contains(&a.min_support) || !(0.0..=1.0).contains(&a.min_confidence) {
            bail!("association support and confidence must lie in [0, 1]");
        }
        if !(0.0..1.0).contains(&self.model.probability_floor) {
            bail!("probability_floor must lie in [0, 1)");
        }
        if self.suggestions.top_n_front < 5 || self.suggestions.top_n_back < 2 {
            bail!("suggestion pools need at least 5 front and 2 back numbers");
        }
        let g = &self.model.gbdt;
        if g.subsample <= 0.0 || g.subsample > 1.0 || g.feature_fraction <= 0.0 || g.feature_fraction > 1.0 {
            bail!("gbdt subsample and feature_fraction must lie in (0, 1]");
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(g.learning_rate) {
            bail!("gbdt learning_rate must be positive");
        }
        if !positive(self.model.logistic.learning_rate) {
            bail!("logistic learning_rate must be positive");
        }
        if !positive(self.model.margin.lambda) {
            bail!("margin lambda must be positive");
        }
        if self.tuning.trials == 0 || self.tuning.periods == 0 {
            bail!("tuning needs at least one trial and one period");
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {:?}", path))?;
        let config: AnalysisConfig = serde_json::from_str(&json)
            .with_context(|| format!("invalid JSON in {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("cannot write {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lag_window, 5);
        assert_eq!(config.model.min_positive_samples, 25);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = AnalysisConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let restored: AnalysisConfig =
            serde_json::from_str(r#"{"lag_window": 8, "weights": {"model": 0.9}}"#).unwrap();
        assert_eq!(restored.lag_window, 8);
        assert_eq!(restored.weights.model, 0.9);
        assert_eq!(restored.weights.frequency, ScoreWeights::default().frequency);
        assert_eq!(restored.backtest_periods, 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalysisConfig { lag_window: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.weights.pattern = -1.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.weights.recent_frequency = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_rates_and_tuning_ranges_rejected() {
        let rejected = |edit: fn(&mut AnalysisConfig), needle: &str| {
            let mut config = AnalysisConfig::default();
            edit(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(needle), "{}", err);
        };
        rejected(|c| c.model.margin.lambda = 0.0, "margin lambda");
        rejected(|c| c.model.margin.lambda = -0.5, "margin lambda");
        rejected(|c| c.model.logistic.learning_rate = 0.0, "logistic learning_rate");
        rejected(|c| c.model.logistic.learning_rate = f64::INFINITY, "logistic learning_rate");
        rejected(|c| c.model.gbdt.learning_rate = -0.1, "gbdt learning_rate");
        rejected(|c| c.tuning.trials = 0, "tuning");
        rejected(|c| c.tuning.periods = 0, "tuning");
    }

    #[test]
    fn test_with_terms_keeps_signal_weights() {
        let base = ScoreWeights { recent_frequency: 0.4, max_omission_ratio: 0.2, ..Default::default() };
        let w = base.with_terms([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(w.as_array(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(w.recent_frequency, 0.4);
        assert_eq!(w.max_omission_ratio, 0.2);
    }

    #[test]
    fn test_quiet_keeps_everything_else() {
        let config = AnalysisConfig { seed: 7, ..Default::default() };
        let quiet = config.quiet();
        assert_eq!(quiet.verbosity, Verbosity::Quiet);
        assert_eq!(quiet.seed, 7);
        assert_eq!(Verbosity::Quiet.detail_level(), log::Level::Trace);
    }
}
