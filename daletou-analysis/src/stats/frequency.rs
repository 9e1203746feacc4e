use daletou_db::models::{Draw, Zone};

#[derive(Debug, Clone, PartialEq)]
pub struct NumberFrequency {
    pub number: u8,
    pub count: u32,
    /// count / draws considered.
    pub frequency: f64,
    /// Draws since the last appearance; 0 when in the latest draw.
    pub current_omission: u32,
    /// Longest run of absences, including the leading one and the current one.
    pub max_omission: u32,
    /// Expected gap between appearances.
    pub average_interval: f64,
    /// Appearances in the last `recent_window` draws.
    pub recent_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    pub zone: Zone,
    pub total_draws: usize,
    /// Indexed by number - 1.
    pub entries: Vec<NumberFrequency>,
}

impl FrequencyTable {
    pub fn get(&self, number: u8) -> Option<&NumberFrequency> {
        self.entries.get((number as usize).checked_sub(1)?)
    }

    /// Most frequent first; ties by number.
    pub fn hottest(&self, n: usize) -> Vec<&NumberFrequency> {
        let mut sorted: Vec<&NumberFrequency> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.count.cmp(&a.count).then(a.number.cmp(&b.number)));
        sorted.truncate(n);
        sorted
    }
}

/// Built from `draws` only (chronological, oldest first); the caller slices
/// the history at its cutoff.
pub fn frequency_table(draws: &[Draw], zone: Zone, recent_window: usize) -> FrequencyTable {
    let total = draws.len();
    let size = zone.size();
    let recent_start = total.saturating_sub(recent_window);

    let mut counts = vec![0u32; size];
    let mut recent = vec![0u32; size];
    let mut last_seen: Vec<Option<usize>> = vec![None; size];
    let mut max_gap = vec![0u32; size];

    for (t, draw) in draws.iter().enumerate() {
        for &n in zone.numbers_from(draw) {
            let Some(idx) = zone.index_of(n) else {
                continue;
            };
            counts[idx] += 1;
            if t >= recent_start {
                recent[idx] += 1;
            }
            let gap = match last_seen[idx] {
                Some(prev) => (t - prev - 1) as u32,
                None => t as u32,
            };
            max_gap[idx] = max_gap[idx].max(gap);
            last_seen[idx] = Some(t);
        }
    }

    let entries = (0..size)
        .map(|idx| {
            let current_omission = match last_seen[idx] {
                Some(t) => (total - 1 - t) as u32,
                None => total as u32,
            };
            NumberFrequency {
                number: (idx + 1) as u8,
                count: counts[idx],
                frequency: if total > 0 { counts[idx] as f64 / total as f64 } else { 0.0 },
                current_omission,
                max_omission: max_gap[idx].max(current_omission),
                average_interval: total as f64 / (counts[idx] as f64 + 1e-9),
                recent_count: recent[idx],
            }
        })
        .collect();

    FrequencyTable { zone, total_draws: total, entries }
}
