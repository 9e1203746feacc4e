pub mod compute;

use anyhow::{Result, bail};
use daletou_db::models::{Draw, Zone};

use crate::error::InsufficientData;

pub use compute::{DrawFeatures, describe_draws, front_zone_index};

/// Front sub-ranges used for zone counts.
pub const FRONT_ZONES: [(u8, u8); 3] = [(1, 12), (13, 24), (25, 35)];

pub const DRAW_FEATURE_NAMES: &[&str] = &[
    "front_sum",
    "front_span",
    "front_odd_count",
    "front_zone1_count",
    "front_zone2_count",
    "front_zone3_count",
    "front_consecutive_count",
    "front_repeat_count",
    "back_sum",
    "back_span",
    "back_odd_count",
    "back_is_large",
    "front_sum_x_odd_count",
    "front_span_sq",
];

/// Lagged features for one target draw, built only from the `lag_window`
/// draws that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct LaggedRow {
    /// Index of the target draw; equals the history length for the
    /// prediction row.
    pub target_index: usize,
    pub lag_window: usize,
    /// Descriptive features of draws t-1 .. t-W, lag 1 first.
    pub shared: Vec<f64>,
    /// Per zone, `size * W` flags laid out number-major: flag for number n
    /// at lag k sits at `(n - 1) * W + (k - 1)`.
    front_flags: Vec<f64>,
    back_flags: Vec<f64>,
    /// Numbers of the target draw; `None` for the prediction row.
    pub target: Option<([u8; 5], [u8; 2])>,
}

impl LaggedRow {
    pub fn number_flags(&self, zone: Zone, number: u8) -> &[f64] {
        let w = self.lag_window;
        let Some(idx) = zone.index_of(number) else {
            return &[];
        };
        let start = idx * w;
        match zone {
            Zone::Front => &self.front_flags[start..start + w],
            Zone::Back => &self.back_flags[start..start + w],
        }
    }

    /// Model input for one number: shared lags, own flags, own rate.
    pub fn number_row(&self, zone: Zone, number: u8) -> Vec<f64> {
        let flags = self.number_flags(zone, number);
        let rate = flags.iter().sum::<f64>() / self.lag_window as f64;
        let mut row = Vec::with_capacity(self.shared.len() + flags.len() + 1);
        row.extend_from_slice(&self.shared);
        row.extend_from_slice(flags);
        row.push(rate);
        row
    }

    pub fn label(&self, zone: Zone, number: u8) -> Option<bool> {
        self.target.map(|(front, back)| match zone {
            Zone::Front => front.contains(&number),
            Zone::Back => back.contains(&number),
        })
    }
}

pub fn number_row_len(lag_window: usize) -> usize {
    lag_window * (DRAW_FEATURE_NAMES.len() + 1) + 1
}

fn lagged_row(draws: &[Draw], target_index: usize, lag_window: usize) -> LaggedRow {
    let window = &draws[target_index - lag_window..target_index];
    let described = describe_draws(window);

    let mut shared = Vec::with_capacity(lag_window * DRAW_FEATURE_NAMES.len());
    for features in described.iter().rev() {
        shared.extend(features.as_vector());
    }

    let mut front_flags = vec![0.0; Zone::Front.size() * lag_window];
    let mut back_flags = vec![0.0; Zone::Back.size() * lag_window];
    for (lag_idx, draw) in window.iter().rev().enumerate() {
        for idx in draw.front.iter().filter_map(|&n| Zone::Front.index_of(n)) {
            front_flags[idx * lag_window + lag_idx] = 1.0;
        }
        for idx in draw.back.iter().filter_map(|&n| Zone::Back.index_of(n)) {
            back_flags[idx * lag_window + lag_idx] = 1.0;
        }
    }

    LaggedRow {
        target_index,
        lag_window,
        shared,
        front_flags,
        back_flags,
        target: draws.get(target_index).map(|d| (d.front, d.back)),
    }
}

/// One row per draw that has a full trailing window: `draws.len() - W` rows.
pub fn build_lagged_rows(draws: &[Draw], lag_window: usize) -> Result<Vec<LaggedRow>> {
    if lag_window == 0 {
        bail!("lag window must be at least 1");
    }
    if draws.len() <= lag_window {
        return Ok(Vec::new());
    }
    Ok((lag_window..draws.len())
        .map(|t| lagged_row(draws, t, lag_window))
        .collect())
}

/// Row describing the draw that follows the last one in `draws`.
pub fn prediction_row(draws: &[Draw], lag_window: usize) -> Result<LaggedRow> {
    if lag_window == 0 {
        bail!("lag window must be at least 1");
    }
    if draws.len() < lag_window {
        return Err(InsufficientData { required: lag_window, available: draws.len() }.into());
    }
    Ok(lagged_row(draws, draws.len(), lag_window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use daletou_db::models::make_test_draws;

    #[test]
    fn test_row_count_is_len_minus_window() {
        let draws = make_test_draws(30);
        for w in [1, 3, 5, 10] {
            let rows = build_lagged_rows(&draws, w).unwrap();
            assert_eq!(rows.len(), 30 - w);
            assert_eq!(rows[0].target_index, w);
        }
    }

    #[test]
    fn test_short_history_yields_no_rows() {
        let draws = make_test_draws(5);
        assert!(build_lagged_rows(&draws, 5).unwrap().is_empty());
        assert!(build_lagged_rows(&draws, 0).is_err());
    }

    #[test]
    fn test_row_ignores_draws_outside_window() {
        let draws = make_test_draws(20);
        let mut altered = draws.clone();
        // Rewrite everything before the window of target 15 (W = 5).
        for d in altered.iter_mut().take(10) {
            d.front = [31, 32, 33, 34, 35];
            d.back = [11, 12];
        }
        let original = build_lagged_rows(&draws, 5).unwrap();
        let changed = build_lagged_rows(&altered, 5).unwrap();
        let target = 15 - 5;
        assert_eq!(original[target], changed[target]);
    }

    #[test]
    fn test_flags_match_window() {
        let draws = make_test_draws(12);
        let rows = build_lagged_rows(&draws, 3).unwrap();
        let row = &rows[0];
        assert_eq!(row.target_index, 3);
        for n in Zone::Front.numbers() {
            let flags = row.number_flags(Zone::Front, n);
            for k in 1..=3 {
                let expected = draws[3 - k].front.contains(&n);
                assert_eq!(flags[k - 1] == 1.0, expected, "number {} lag {}", n, k);
            }
        }
        assert_eq!(row.label(Zone::Front, draws[3].front[0]), Some(true));
    }

    #[test]
    fn test_out_of_range_numbers_leave_no_flags() {
        let mut draws = make_test_draws(6);
        draws[4].front[0] = 0;
        draws[4].back[1] = 13;
        let rows = build_lagged_rows(&draws, 5).unwrap();
        let front_flags: f64 = Zone::Front.numbers().map(|n| rows[0].number_flags(Zone::Front, n)[0]).sum();
        let back_flags: f64 = Zone::Back.numbers().map(|n| rows[0].number_flags(Zone::Back, n)[0]).sum();
        assert_eq!(front_flags, 4.0);
        assert_eq!(back_flags, 1.0);
        assert!(rows[0].number_flags(Zone::Front, 0).is_empty());
    }

    #[test]
    fn test_number_row_length() {
        let draws = make_test_draws(12);
        let rows = build_lagged_rows(&draws, 4).unwrap();
        assert_eq!(rows[0].number_row(Zone::Back, 12).len(), number_row_len(4));
    }

    #[test]
    fn test_prediction_row_has_no_label() {
        let draws = make_test_draws(10);
        let row = prediction_row(&draws, 5).unwrap();
        assert_eq!(row.target_index, 10);
        assert_eq!(row.label(Zone::Front, 1), None);
        let err = prediction_row(&draws[..3], 5).unwrap_err();
        assert!(crate::error::is_insufficient_data(&err));
    }

    #[test]
    fn test_deterministic() {
        let draws = make_test_draws(40);
        assert_eq!(build_lagged_rows(&draws, 5).unwrap(), build_lagged_rows(&draws, 5).unwrap());
    }
}
