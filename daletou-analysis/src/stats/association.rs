use std::collections::{BTreeMap, BTreeSet};

use daletou_db::models::Draw;

use crate::config::AssociationConfig;

/// `antecedent → consequent` over front numbers of the same draw.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRule {
    /// Sorted ascending.
    pub antecedent: Vec<u8>,
    /// Sorted ascending, disjoint from the antecedent.
    pub consequent: Vec<u8>,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
}

impl AssociationRule {
    /// True when every antecedent number is among `numbers`.
    pub fn applies_to(&self, numbers: &[u8]) -> bool {
        self.antecedent.iter().all(|n| numbers.contains(n))
    }

    pub fn implies(&self, number: u8) -> bool {
        self.consequent.contains(&number)
    }
}

impl std::fmt::Display for AssociationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} -> {:?} (support {:.3}, confidence {:.3}, lift {:.2})",
            self.antecedent, self.consequent, self.support, self.confidence, self.lift
        )
    }
}

// Bit n set for front number n (1..=35).
fn to_mask(numbers: &[u8]) -> u64 {
    numbers.iter().fold(0u64, |m, &n| m | (1u64 << n))
}

fn to_numbers(mask: u64) -> Vec<u8> {
    (1..64u8).filter(|&n| mask & (1u64 << n) != 0).collect()
}

fn support_count(mask: u64, transactions: &[u64]) -> u32 {
    transactions.iter().filter(|&&t| t & mask == mask).count() as u32
}

/// Apriori: every frequent itemset up to `max_len` with its support count.
fn frequent_itemsets(transactions: &[u64], min_count: u32, max_len: usize) -> BTreeMap<u64, u32> {
    let mut frequent = BTreeMap::new();

    let mut level: BTreeMap<u64, u32> = (1..=35u8)
        .map(|n| {
            let mask = 1u64 << n;
            (mask, support_count(mask, transactions))
        })
        .filter(|&(_, count)| count >= min_count)
        .collect();

    let mut k = 1;
    while !level.is_empty() {
        frequent.extend(level.iter().map(|(&m, &c)| (m, c)));
        if k >= max_len {
            break;
        }

        let items: Vec<u64> = level.keys().copied().collect();
        let mut candidates = BTreeSet::new();
        for (i, &a) in items.iter().enumerate() {
            for &b in &items[i + 1..] {
                let union = a | b;
                if union.count_ones() as usize != k + 1 {
                    continue;
                }
                // every k-subset must itself be frequent
                let closed = to_numbers(union)
                    .iter()
                    .all(|&n| level.contains_key(&(union & !(1u64 << n))));
                if closed {
                    candidates.insert(union);
                }
            }
        }

        level = candidates
            .into_iter()
            .map(|mask| (mask, support_count(mask, transactions)))
            .filter(|&(_, count)| count >= min_count)
            .collect();
        k += 1;
    }

    frequent
}

/// Rules mined from the front numbers of `draws`, sorted by lift desc,
/// confidence desc, then antecedent and consequent.
pub fn mine_rules(draws: &[Draw], config: &AssociationConfig) -> Vec<AssociationRule> {
    if draws.is_empty() || config.max_itemset_len < 2 {
        return Vec::new();
    }

    let transactions: Vec<u64> = draws.iter().map(|d| to_mask(&d.front)).collect();
    let total = transactions.len() as f64;
    let min_count = ((config.min_support * total).ceil() as u32).max(1);
    let frequent = frequent_itemsets(&transactions, min_count, config.max_itemset_len);

    let mut rules = Vec::new();
    for (&itemset, &count) in &frequent {
        if itemset.count_ones() < 2 {
            continue;
        }
        let mut antecedent = (itemset - 1) & itemset;
        while antecedent > 0 {
            let consequent = itemset ^ antecedent;
            // subsets of a frequent itemset are frequent
            if let (Some(&ante_count), Some(&cons_count)) =
                (frequent.get(&antecedent), frequent.get(&consequent))
            {
                let confidence = count as f64 / ante_count as f64;
                let lift = confidence / (cons_count as f64 / total);
                if confidence >= config.min_confidence && lift >= config.min_lift {
                    rules.push(AssociationRule {
                        antecedent: to_numbers(antecedent),
                        consequent: to_numbers(consequent),
                        support: count as f64 / total,
                        confidence,
                        lift,
                    });
                }
            }
            antecedent = (antecedent - 1) & itemset;
        }
    }

    rules.sort_by(|a, b| {
        b.lift
            .total_cmp(&a.lift)
            .then(b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.antecedent.cmp(&b.antecedent))
            .then_with(|| a.consequent.cmp(&b.consequent))
    });
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use daletou_db::models::make_test_draws;

    fn paired_history() -> Vec<Draw> {
        let mut draws = make_test_draws(20);
        for (i, d) in draws.iter_mut().enumerate() {
            d.front = if i % 2 == 0 { [1, 2, 3, 4, 5] } else { [10, 11, 12, 13, 14] };
        }
        draws
    }

    fn config(min_lift: f64) -> AssociationConfig {
        AssociationConfig {
            min_support: 0.1,
            min_confidence: 0.5,
            min_lift,
            max_itemset_len: 2,
        }
    }

    #[test]
    fn test_pairs_always_together() {
        let rules = mine_rules(&paired_history(), &config(1.5));
        // 2 groups × C(5,2) pairs × 2 directions
        assert_eq!(rules.len(), 40);
        for rule in &rules {
            assert!((rule.confidence - 1.0).abs() < 1e-12);
            assert!((rule.lift - 2.0).abs() < 1e-12);
            assert!((rule.support - 0.5).abs() < 1e-12);
        }
        assert_eq!(rules[0].antecedent, vec![1]);
        assert_eq!(rules[0].consequent, vec![2]);
    }

    #[test]
    fn test_lift_filter() {
        assert!(mine_rules(&paired_history(), &config(2.5)).is_empty());
    }

    #[test]
    fn test_triples_respect_cap() {
        let mut cfg = config(1.0);
        cfg.max_itemset_len = 3;
        let rules = mine_rules(&paired_history(), &cfg);
        assert!(rules.iter().all(|r| r.antecedent.len() + r.consequent.len() <= 3));
        assert!(rules.iter().any(|r| r.antecedent.len() + r.consequent.len() == 3));
    }

    #[test]
    fn test_sorted_by_lift_then_confidence() {
        let cfg = AssociationConfig {
            min_support: 0.02,
            min_confidence: 0.0,
            min_lift: 0.0,
            max_itemset_len: 2,
        };
        let rules = mine_rules(&make_test_draws(150), &cfg);
        assert!(!rules.is_empty());
        for w in rules.windows(2) {
            assert!(w[0].lift >= w[1].lift);
            if w[0].lift == w[1].lift {
                assert!(w[0].confidence >= w[1].confidence);
            }
        }
    }

    #[test]
    fn test_applies_to() {
        let rule = AssociationRule {
            antecedent: vec![3, 9],
            consequent: vec![20],
            support: 0.1,
            confidence: 0.6,
            lift: 1.8,
        };
        assert!(rule.applies_to(&[1, 3, 9, 17, 30]));
        assert!(!rule.applies_to(&[1, 3, 10, 17, 30]));
        assert!(rule.implies(20));
    }

    #[test]
    fn test_empty_history() {
        assert!(mine_rules(&[], &AssociationConfig::default()).is_empty());
    }
}
