use anyhow::Result;
use rayon::prelude::*;

use daletou_db::models::{Draw, Zone};

use super::gbdt::GradientBoostingModel;
use super::logistic::LogisticModel;
use super::margin::MarginModel;
use super::{BinaryClassifier, ModelFamily, ModelVote, TrainingSet};
use crate::config::{Aggregation, AnalysisConfig, ModelConfig};
use crate::error::InsufficientData;
use crate::features::{LaggedRow, build_lagged_rows, prediction_row};
use crate::stats::HistoryStats;

enum Predictor {
    Ready(Box<dyn BinaryClassifier>),
    Failed { family: ModelFamily, reason: String },
}

enum ModelState {
    Trained(Vec<Predictor>),
    Skipped { reason: String },
}

struct NumberModels {
    zone: Zone,
    number: u8,
    positives: usize,
    state: ModelState,
}

/// Per-number classifiers for both zones, trained on one history slice.
pub struct ModelBundle {
    pub lag_window: usize,
    pub training_rows: usize,
    numbers: Vec<NumberModels>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbabilitySource {
    Ensemble { votes: Vec<ModelVote> },
    /// Frequency estimate; `votes` is empty when modelling was skipped.
    Fallback { reason: String, votes: Vec<ModelVote> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberProbability {
    pub number: u8,
    pub probability: f64,
    pub source: ProbabilitySource,
}

impl NumberProbability {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ProbabilitySource::Fallback { .. })
    }
}

/// Next-draw appearance probabilities, indexed by number - 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    pub front: Vec<NumberProbability>,
    pub back: Vec<NumberProbability>,
}

impl ProbabilityTable {
    pub fn zone(&self, zone: Zone) -> &[NumberProbability] {
        match zone {
            Zone::Front => &self.front,
            Zone::Back => &self.back,
        }
    }

    pub fn get(&self, zone: Zone, number: u8) -> Option<&NumberProbability> {
        self.zone(zone).get((number as usize).checked_sub(1)?)
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = (Zone, &NumberProbability)> {
        Zone::ALL
            .into_iter()
            .flat_map(move |zone| self.zone(zone).iter().map(move |p| (zone, p)))
            .filter(|(_, p)| p.is_fallback())
    }
}

fn number_seed(base: u64, zone: Zone, number: u8) -> u64 {
    let offset = match zone {
        Zone::Front => 0u64,
        Zone::Back => 100,
    };
    base.wrapping_add((offset + number as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn train_family(family: ModelFamily, set: &TrainingSet, config: &ModelConfig, seed: u64) -> Predictor {
    let trained: Result<Box<dyn BinaryClassifier>> = match family {
        ModelFamily::GradientBoosting => {
            GradientBoostingModel::train(set, &config.gbdt, seed).map(|m| Box::new(m) as Box<dyn BinaryClassifier>)
        }
        ModelFamily::Logistic => {
            LogisticModel::train(set, &config.logistic).map(|m| Box::new(m) as Box<dyn BinaryClassifier>)
        }
        ModelFamily::Margin => {
            MarginModel::train(set, &config.margin, seed).map(|m| Box::new(m) as Box<dyn BinaryClassifier>)
        }
    };
    match trained {
        Ok(model) => Predictor::Ready(model),
        Err(e) => Predictor::Failed { family, reason: format!("{:#}", e) },
    }
}

fn train_number(rows: &[LaggedRow], zone: Zone, number: u8, config: &AnalysisConfig) -> NumberModels {
    let level = config.verbosity.detail_level();
    let model_config = &config.model;
    let labels: Vec<bool> = rows.iter().map(|r| r.label(zone, number).unwrap_or(false)).collect();
    let positives = labels.iter().filter(|&&l| l).count();

    let skip = if positives < model_config.min_positive_samples {
        Some(format!(
            "{} positive samples, need {}",
            positives, model_config.min_positive_samples
        ))
    } else if positives == 0 || positives == labels.len() {
        Some("single-class labels".to_string())
    } else {
        None
    };
    if let Some(reason) = skip {
        log::log!(level, "{} {:02}: modelling skipped ({})", zone, number, reason);
        return NumberModels { zone, number, positives, state: ModelState::Skipped { reason } };
    }

    let design: Vec<Vec<f64>> = rows.iter().map(|r| r.number_row(zone, number)).collect();
    let set = match TrainingSet::from_rows(&design, &labels) {
        Ok(set) => set,
        Err(e) => {
            return NumberModels {
                zone,
                number,
                positives,
                state: ModelState::Skipped { reason: format!("{:#}", e) },
            };
        }
    };

    let seed = number_seed(config.seed, zone, number);
    let predictors: Vec<Predictor> = ModelFamily::ALL
        .iter()
        .map(|&family| train_family(family, &set, model_config, seed))
        .collect();
    for p in &predictors {
        if let Predictor::Failed { family, reason } = p {
            log::warn!("{} {:02}: {} failed: {}", zone, number, family, reason);
        }
    }
    NumberModels { zone, number, positives, state: ModelState::Trained(predictors) }
}

/// Trains every number of both zones on `draws` (oldest first). Needs at
/// least `lag_window + 1` draws.
pub fn train_models(draws: &[Draw], config: &AnalysisConfig) -> Result<ModelBundle> {
    let w = config.lag_window;
    let mut rows = build_lagged_rows(draws, w)?;
    if rows.is_empty() {
        return Err(InsufficientData { required: w + 1, available: draws.len() }.into());
    }
    let limit = config.model.max_training_rows;
    if limit > 0 && rows.len() > limit {
        rows.drain(..rows.len() - limit);
    }

    let tasks: Vec<(Zone, u8)> = Zone::ALL
        .iter()
        .flat_map(|&zone| zone.numbers().map(move |n| (zone, n)))
        .collect();
    // collect() keeps task order regardless of which thread finished first
    let numbers: Vec<NumberModels> = tasks
        .par_iter()
        .map(|&(zone, n)| train_number(&rows, zone, n, config))
        .collect();

    let skipped = numbers.iter().filter(|m| matches!(m.state, ModelState::Skipped { .. })).count();
    log::log!(
        config.verbosity.detail_level(),
        "trained models on {} rows (W={}), {} numbers skipped",
        rows.len(),
        w,
        skipped
    );

    Ok(ModelBundle { lag_window: w, training_rows: rows.len(), numbers })
}

fn aggregate(votes: &[ModelVote], config: &ModelConfig) -> Option<f64> {
    match config.aggregation {
        Aggregation::Mean => {
            let probs: Vec<f64> = votes.iter().filter_map(|v| v.probability()).collect();
            if probs.is_empty() {
                None
            } else {
                Some(probs.iter().sum::<f64>() / probs.len() as f64)
            }
        }
        Aggregation::Priority => {
            let listed = config.priority.iter().copied();
            let rest = ModelFamily::ALL.into_iter().filter(|f| !config.priority.contains(f));
            listed
                .chain(rest)
                .find_map(|family| votes.iter().find(|v| v.family() == family)?.probability())
        }
    }
}

fn fallback_probability(stats: &HistoryStats, zone: Zone, number: u8, floor: f64) -> f64 {
    let freq = stats.frequencies(zone).get(number).map_or(0.0, |f| f.frequency);
    freq.max(floor)
}

impl ModelBundle {
    /// Probabilities for the draw that follows `draws`, which must be the
    /// slice the bundle was trained on.
    pub fn predict(&self, draws: &[Draw], stats: &HistoryStats, config: &ModelConfig) -> Result<ProbabilityTable> {
        let row = prediction_row(draws, self.lag_window)?;
        let mut table = ProbabilityTable { front: Vec::new(), back: Vec::new() };

        for models in &self.numbers {
            let fallback = fallback_probability(stats, models.zone, models.number, config.probability_floor);
            let entry = match &models.state {
                ModelState::Skipped { reason } => NumberProbability {
                    number: models.number,
                    probability: fallback,
                    source: ProbabilitySource::Fallback { reason: reason.clone(), votes: Vec::new() },
                },
                ModelState::Trained(predictors) => {
                    let input = row.number_row(models.zone, models.number);
                    let votes: Vec<ModelVote> = predictors
                        .iter()
                        .map(|p| match p {
                            Predictor::Ready(model) => {
                                let probability = model.predict_proba(&input);
                                if probability.is_finite() && (0.0..=1.0).contains(&probability) {
                                    ModelVote::Success { family: model.family(), probability }
                                } else {
                                    ModelVote::Failed {
                                        family: model.family(),
                                        reason: format!("invalid probability {}", probability),
                                    }
                                }
                            }
                            Predictor::Failed { family, reason } => {
                                ModelVote::Failed { family: *family, reason: reason.clone() }
                            }
                        })
                        .collect();
                    match aggregate(&votes, config) {
                        Some(probability) => NumberProbability {
                            number: models.number,
                            probability,
                            source: ProbabilitySource::Ensemble { votes },
                        },
                        None => NumberProbability {
                            number: models.number,
                            probability: fallback,
                            source: ProbabilitySource::Fallback {
                                reason: "every model family failed".to_string(),
                                votes,
                            },
                        },
                    }
                }
            };
            match models.zone {
                Zone::Front => table.front.push(entry),
                Zone::Back => table.back.push(entry),
            }
        }

        Ok(table)
    }

    pub fn skipped(&self) -> usize {
        self.numbers
            .iter()
            .filter(|m| matches!(m.state, ModelState::Skipped { .. }))
            .count()
    }

    pub fn positives(&self, zone: Zone, number: u8) -> Option<usize> {
        self.numbers
            .iter()
            .find(|m| m.zone == zone && m.number == number)
            .map(|m| m.positives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;
    use crate::stats::analyze;
    use daletou_db::models::make_test_draws;

    fn fast_config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.verbosity = Verbosity::Quiet;
        config.model.min_positive_samples = 3;
        config.model.gbdt.n_estimators = 10;
        config.model.gbdt.min_samples_leaf = 5;
        config.model.logistic.epochs = 30;
        config.model.margin.epochs = 3;
        config
    }

    /// Replace front number 7 everywhere with a number absent from the draw.
    fn without_seven(mut draws: Vec<Draw>) -> Vec<Draw> {
        for d in &mut draws {
            if let Some(pos) = d.front.iter().position(|&n| n == 7) {
                let replacement = (8..=35u8).find(|n| !d.front.contains(n)).unwrap_or(8);
                d.front[pos] = replacement;
                d.front.sort_unstable();
            }
        }
        draws
    }

    #[test]
    fn test_insufficient_history_is_typed_error() {
        let draws = make_test_draws(5);
        let err = train_models(&draws, &fast_config()).err().unwrap();
        assert!(crate::error::is_insufficient_data(&err));
    }

    #[test]
    fn test_every_number_gets_a_probability() {
        let draws = make_test_draws(80);
        let config = fast_config();
        let stats = analyze(&draws, &config);
        let bundle = train_models(&draws, &config).unwrap();
        assert_eq!(bundle.training_rows, 75);
        let table = bundle.predict(&draws, &stats, &config.model).unwrap();
        assert_eq!(table.front.len(), 35);
        assert_eq!(table.back.len(), 12);
        for zone in Zone::ALL {
            for (i, p) in table.zone(zone).iter().enumerate() {
                assert_eq!(p.number as usize, i + 1);
                assert!((0.0..=1.0).contains(&p.probability));
            }
        }
    }

    #[test]
    fn test_never_seen_number_falls_back_to_floor() {
        let draws = without_seven(make_test_draws(60));
        let config = fast_config();
        let stats = analyze(&draws, &config);
        let bundle = train_models(&draws, &config).unwrap();
        let table = bundle.predict(&draws, &stats, &config.model).unwrap();
        let seven = table.get(Zone::Front, 7).unwrap();
        assert!(seven.is_fallback());
        assert_eq!(seven.probability, config.model.probability_floor);
        assert_eq!(bundle.positives(Zone::Front, 7), Some(0));
        assert!(table.fallbacks().any(|(zone, p)| zone == Zone::Front && p.number == 7));
    }

    #[test]
    fn test_training_is_deterministic() {
        let draws = make_test_draws(70);
        let config = fast_config();
        let stats = analyze(&draws, &config);
        let a = train_models(&draws, &config).unwrap().predict(&draws, &stats, &config.model).unwrap();
        let b = train_models(&draws, &config).unwrap().predict(&draws, &stats, &config.model).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_training_rows_limits_rows() {
        let draws = make_test_draws(90);
        let mut config = fast_config();
        config.model.max_training_rows = 40;
        let bundle = train_models(&draws, &config).unwrap();
        assert_eq!(bundle.training_rows, 40);
    }

    #[test]
    fn test_aggregate_mean_and_priority() {
        let votes = vec![
            ModelVote::Failed { family: ModelFamily::GradientBoosting, reason: "x".into() },
            ModelVote::Success { family: ModelFamily::Logistic, probability: 0.2 },
            ModelVote::Success { family: ModelFamily::Margin, probability: 0.4 },
        ];
        let mut config = ModelConfig::default();
        assert!((aggregate(&votes, &config).unwrap() - 0.3).abs() < 1e-12);

        config.aggregation = Aggregation::Priority;
        assert_eq!(aggregate(&votes, &config), Some(0.2));
        config.priority = vec![ModelFamily::Margin];
        assert_eq!(aggregate(&votes, &config), Some(0.4));

        let all_failed: Vec<ModelVote> = ModelFamily::ALL
            .iter()
            .map(|&family| ModelVote::Failed { family, reason: "nan".into() })
            .collect();
        assert_eq!(aggregate(&all_failed, &config), None);
    }
}
