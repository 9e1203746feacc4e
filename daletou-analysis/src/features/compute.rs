use daletou_db::models::Draw;

use super::FRONT_ZONES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawFeatures {
    pub period_id: u32,
    pub front_sum: u32,
    pub front_span: u8,
    pub front_odd_count: u8,
    pub front_zone_counts: [u8; 3],
    /// Pairs of consecutive values, e.g. 11-12.
    pub front_consecutive_count: u8,
    /// Front numbers shared with the previous draw of the slice.
    pub front_repeat_count: u8,
    pub back_sum: u8,
    pub back_span: u8,
    pub back_odd_count: u8,
    /// Back numbers in 7..=12.
    pub back_upper_count: u8,
}

impl DrawFeatures {
    pub fn back_is_large(&self) -> bool {
        self.back_upper_count > 0
    }

    /// Numeric layout follows `DRAW_FEATURE_NAMES`.
    pub fn as_vector(&self) -> Vec<f64> {
        let sum = self.front_sum as f64;
        let span = self.front_span as f64;
        let odd = self.front_odd_count as f64;
        vec![
            sum,
            span,
            odd,
            self.front_zone_counts[0] as f64,
            self.front_zone_counts[1] as f64,
            self.front_zone_counts[2] as f64,
            self.front_consecutive_count as f64,
            self.front_repeat_count as f64,
            self.back_sum as f64,
            self.back_span as f64,
            self.back_odd_count as f64,
            if self.back_is_large() { 1.0 } else { 0.0 },
            sum * odd,
            span * span,
        ]
    }
}

/// Index into `FRONT_ZONES`.
pub fn front_zone_index(number: u8) -> usize {
    FRONT_ZONES
        .iter()
        .position(|&(lo, hi)| number >= lo && number <= hi)
        .unwrap_or(FRONT_ZONES.len() - 1)
}

fn describe(draw: &Draw, previous: Option<&Draw>) -> DrawFeatures {
    let front = &draw.front;
    let back = &draw.back;

    let mut zone_counts = [0u8; 3];
    for &n in front {
        zone_counts[front_zone_index(n)] += 1;
    }

    // front is sorted when built through Draw::new; an unsorted literal only
    // loses pairs, it never underflows
    let consecutive = front.windows(2).filter(|w| w[1].checked_sub(w[0]) == Some(1)).count() as u8;
    let (front_min, front_max) = front
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &n| (lo.min(n), hi.max(n)));

    let repeat = previous
        .map(|p| front.iter().filter(|n| p.front.contains(n)).count() as u8)
        .unwrap_or(0);

    DrawFeatures {
        period_id: draw.period_id,
        front_sum: front.iter().map(|&n| n as u32).sum(),
        front_span: front_max - front_min,
        front_odd_count: front.iter().filter(|&&n| n % 2 == 1).count() as u8,
        front_zone_counts: zone_counts,
        front_consecutive_count: consecutive,
        front_repeat_count: repeat,
        back_sum: back[0].saturating_add(back[1]),
        back_span: back[0].abs_diff(back[1]),
        back_odd_count: back.iter().filter(|&&n| n % 2 == 1).count() as u8,
        back_upper_count: back.iter().filter(|&&n| n > 6).count() as u8,
    }
}

/// One entry per draw. The repeat count of the first draw is 0: nothing
/// outside the slice is consulted.
pub fn describe_draws(draws: &[Draw]) -> Vec<DrawFeatures> {
    draws
        .iter()
        .enumerate()
        .map(|(i, d)| describe(d, if i > 0 { draws.get(i - 1) } else { None }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DRAW_FEATURE_NAMES;
    use chrono::NaiveDate;

    fn draw(period_id: u32, front: [u8; 5], back: [u8; 2]) -> Draw {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Draw::new(period_id, date, front, back).unwrap()
    }

    #[test]
    fn test_basic_features() {
        let features = describe_draws(&[draw(1, [3, 4, 13, 25, 35], [6, 7])]);
        let f = features[0];
        assert_eq!(f.front_sum, 80);
        assert_eq!(f.front_span, 32);
        assert_eq!(f.front_odd_count, 4);
        assert_eq!(f.front_zone_counts, [2, 1, 2]);
        assert_eq!(f.front_consecutive_count, 1);
        assert_eq!(f.front_repeat_count, 0);
        assert_eq!(f.back_sum, 13);
        assert_eq!(f.back_span, 1);
        assert_eq!(f.back_odd_count, 1);
        assert!(f.back_is_large());
    }

    #[test]
    fn test_unsorted_literal_draw_does_not_underflow() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let raw = Draw { period_id: 1, date, front: [30, 2, 17, 9, 4], back: [11, 3] };
        let f = describe_draws(&[raw])[0];
        assert_eq!(f.front_span, 28);
        assert_eq!(f.back_span, 8);
        assert_eq!(f.back_sum, 14);
        assert_eq!(f.front_consecutive_count, 0);
    }

    #[test]
    fn test_repeat_count_uses_previous_draw() {
        let features = describe_draws(&[
            draw(1, [1, 2, 3, 4, 5], [1, 2]),
            draw(2, [1, 2, 10, 20, 30], [1, 3]),
        ]);
        assert_eq!(features[1].front_repeat_count, 2);
        assert!(!features[1].back_is_large());
    }

    #[test]
    fn test_vector_matches_names() {
        let features = describe_draws(&[draw(1, [1, 2, 3, 4, 5], [1, 2])]);
        let v = features[0].as_vector();
        assert_eq!(v.len(), DRAW_FEATURE_NAMES.len());
        assert_eq!(v[12], 15.0 * 3.0);
        assert_eq!(v[13], 16.0);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_zone_index() {
        assert_eq!(front_zone_index(1), 0);
        assert_eq!(front_zone_index(12), 0);
        assert_eq!(front_zone_index(13), 1);
        assert_eq!(front_zone_index(24), 1);
        assert_eq!(front_zone_index(25), 2);
        assert_eq!(front_zone_index(35), 2);
    }
}
