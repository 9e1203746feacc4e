use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate, TimeDelta, Weekday};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub period_id: u32,
    pub date: NaiveDate,
    /// Sorted ascending.
    pub front: [u8; 5],
    /// Sorted ascending.
    pub back: [u8; 2],
}

impl Draw {
    pub fn new(period_id: u32, date: NaiveDate, mut front: [u8; 5], mut back: [u8; 2]) -> Result<Self> {
        validate_draw(&front, &back)?;
        front.sort_unstable();
        back.sort_unstable();
        Ok(Self { period_id, date, front, back })
    }

    /// Draws are held on Monday, Wednesday and Saturday.
    pub fn next_draw_date(&self) -> NaiveDate {
        let mut date = self.date + TimeDelta::days(1);
        while !matches!(date.weekday(), Weekday::Mon | Weekday::Wed | Weekday::Sat) {
            date += TimeDelta::days(1);
        }
        date
    }

    /// Period ids of the form `YYNNN` restart at `NNN = 001` with the new
    /// year; any other numbering just increments.
    pub fn next_period_id(&self) -> u32 {
        let year_prefix = (self.date.year().rem_euclid(100)) as u32;
        if self.period_id < 1000 || self.period_id / 1000 != year_prefix {
            return self.period_id + 1;
        }
        let next_year = self.next_draw_date().year();
        if next_year != self.date.year() {
            (next_year.rem_euclid(100) as u32) * 1000 + 1
        } else {
            self.period_id + 1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    Front,
    Back,
}

impl Zone {
    pub const ALL: [Zone; 2] = [Zone::Front, Zone::Back];

    pub fn size(&self) -> usize {
        match self {
            Zone::Front => 35,
            Zone::Back => 12,
        }
    }

    pub fn pick_count(&self) -> usize {
        match self {
            Zone::Front => 5,
            Zone::Back => 2,
        }
    }

    pub fn numbers(&self) -> std::ops::RangeInclusive<u8> {
        1..=self.size() as u8
    }

    pub fn numbers_from<'a>(&self, draw: &'a Draw) -> &'a [u8] {
        match self {
            Zone::Front => &draw.front,
            Zone::Back => &draw.back,
        }
    }

    pub fn contains(&self, number: u8) -> bool {
        number >= 1 && number as usize <= self.size()
    }

    /// Zero-based slot of `number`, `None` when it is outside the zone.
    pub fn index_of(&self, number: u8) -> Option<usize> {
        self.contains(number).then(|| number as usize - 1)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Zone::Front => "front",
            Zone::Back => "back",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single ticket (5 front + 2 back) with its combined score.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub front: [u8; 5],
    pub back: [u8; 2],
    pub score: f64,
}

pub fn validate_draw(front: &[u8; 5], back: &[u8; 2]) -> Result<()> {
    for &f in front {
        if !Zone::Front.contains(f) {
            bail!("front number {} out of range (1-35)", f);
        }
    }
    for &b in back {
        if !Zone::Back.contains(b) {
            bail!("back number {} out of range (1-12)", b);
        }
    }
    for i in 0..front.len() {
        for j in (i + 1)..front.len() {
            if front[i] == front[j] {
                bail!("duplicate front number: {}", front[i]);
            }
        }
    }
    if back[0] == back[1] {
        bail!("duplicate back number: {}", back[0]);
    }
    Ok(())
}

/// Draws strictly before `period_id`. `draws` must be sorted by period.
pub fn history_before(draws: &[Draw], period_id: u32) -> &[Draw] {
    let end = draws.partition_point(|d| d.period_id < period_id);
    &draws[..end]
}

struct TestRng(u64);

impl TestRng {
    fn next_in(&mut self, max: u8) -> u8 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % max as u64) as u8 + 1
    }

    fn distinct<const N: usize>(&mut self, max: u8) -> [u8; N] {
        let mut out = [0u8; N];
        let mut filled = 0;
        while filled < N {
            let n = self.next_in(max);
            if !out[..filled].contains(&n) {
                out[filled] = n;
                filled += 1;
            }
        }
        out.sort_unstable();
        out
    }
}

/// Deterministic pseudo-random history, periods 1..=n, chronological order.
pub fn make_test_draws(n: usize) -> Vec<Draw> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid start date");
    let mut rng = TestRng(0x9E37_79B9_7F4A_7C15);
    (0..n)
        .map(|i| Draw {
            period_id: i as u32 + 1,
            date: start + TimeDelta::days(3 * i as i64),
            front: rng.distinct::<5>(35),
            back: rng.distinct::<2>(12),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_draw_ok() {
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[1, 2]).is_ok());
        assert!(validate_draw(&[35, 34, 33, 32, 31], &[11, 12]).is_ok());
    }

    #[test]
    fn test_validate_draw_front_out_of_range() {
        assert!(validate_draw(&[0, 2, 3, 4, 5], &[1, 2]).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 36], &[1, 2]).is_err());
    }

    #[test]
    fn test_validate_draw_back_out_of_range() {
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[0, 2]).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[1, 13]).is_err());
    }

    #[test]
    fn test_validate_draw_duplicates() {
        assert!(validate_draw(&[1, 1, 3, 4, 5], &[1, 2]).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[3, 3]).is_err());
    }

    #[test]
    fn test_draw_new_sorts_numbers() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let draw = Draw::new(7, date, [30, 2, 17, 9, 1], [12, 3]).unwrap();
        assert_eq!(draw.front, [1, 2, 9, 17, 30]);
        assert_eq!(draw.back, [3, 12]);
    }

    #[test]
    fn test_zone_size_and_pick() {
        assert_eq!(Zone::Front.size(), 35);
        assert_eq!(Zone::Back.size(), 12);
        assert_eq!(Zone::Front.pick_count(), 5);
        assert_eq!(Zone::Back.pick_count(), 2);
        assert_eq!(Zone::Back.numbers().count(), 12);
    }

    #[test]
    fn test_zone_numbers_from() {
        let draws = make_test_draws(1);
        assert_eq!(Zone::Front.numbers_from(&draws[0]), &draws[0].front);
        assert_eq!(Zone::Back.numbers_from(&draws[0]), &draws[0].back);
    }

    #[test]
    fn test_history_before_is_strict() {
        let draws = make_test_draws(10);
        assert_eq!(history_before(&draws, 6).len(), 5);
        assert_eq!(history_before(&draws, 1).len(), 0);
        assert_eq!(history_before(&draws, 99).len(), 10);
    }

    #[test]
    fn test_zone_index_of() {
        assert_eq!(Zone::Front.index_of(1), Some(0));
        assert_eq!(Zone::Front.index_of(35), Some(34));
        assert_eq!(Zone::Front.index_of(0), None);
        assert_eq!(Zone::Back.index_of(13), None);
    }

    fn dated(period_id: u32, y: i32, m: u32, d: u32) -> Draw {
        let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        Draw::new(period_id, date, [1, 2, 3, 4, 5], [1, 2]).unwrap()
    }

    #[test]
    fn test_next_draw_date_skips_to_draw_day() {
        // 2024-12-28 is a Saturday, 2024-12-30 a Monday
        assert_eq!(dated(24149, 2024, 12, 28).next_draw_date(), NaiveDate::from_ymd_opt(2024, 12, 30).unwrap());
        assert_eq!(dated(24150, 2024, 12, 30).next_draw_date(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_next_period_id_rolls_over_year() {
        assert_eq!(dated(24149, 2024, 12, 28).next_period_id(), 24150);
        assert_eq!(dated(24150, 2024, 12, 30).next_period_id(), 25001);
        // plain sequential numbering is just incremented
        assert_eq!(dated(60, 2024, 12, 30).next_period_id(), 61);
        assert_eq!(dated(1234, 2024, 12, 30).next_period_id(), 1235);
    }

    #[test]
    fn test_make_test_draws_valid() {
        let draws = make_test_draws(200);
        for (i, d) in draws.iter().enumerate() {
            assert!(validate_draw(&d.front, &d.back).is_ok());
            assert_eq!(d.period_id, i as u32 + 1);
            assert!(d.front.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(draws.windows(2).all(|w| w[0].date < w[1].date));
    }
}
