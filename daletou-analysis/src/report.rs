use std::collections::BTreeSet;
use std::fmt::Write;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};

use daletou_db::loader::LoadReport;
use daletou_db::models::{Draw, Suggestion, Zone};

use crate::backtest::BacktestReport;
use crate::combination::{self, Combination, CombinationKind};
use crate::config::AnalysisConfig;
use crate::pipeline::PipelineOutput;
use crate::scoring::{ScoreTable, ScoreTerms, ScoredNumber, ZoneScores, rank};
use crate::tuning::TuningResult;

const END_MARKER: &str = "[end]";
const SINGLE_PREFIX: &str = "recommendation single:";
const COMPLEX_PREFIX: &str = "recommendation complex:";

pub struct ReportInput<'a> {
    pub generated_at: String,
    pub source: String,
    pub config: &'a AnalysisConfig,
    pub load: Option<&'a LoadReport>,
    pub draws: &'a [Draw],
    pub output: &'a PipelineOutput,
    pub suggestions: &'a [Suggestion],
    pub backtest: Option<&'a BacktestReport>,
    pub tuning: Option<&'a TuningResult>,
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn numbers(v: &[u8]) -> String {
    v.iter().map(|n| format!("{:02}", n)).collect::<Vec<_>>().join(" ")
}

fn section(out: &mut String, title: &str) -> std::fmt::Result {
    writeln!(out, "\n==== {} ====", title)
}

fn write_header(out: &mut String, input: &ReportInput) -> std::fmt::Result {
    writeln!(out, "daletou analysis report")?;
    writeln!(out, "generated: {}", input.generated_at)?;
    writeln!(out, "source: {}", input.source)?;
    if let (Some(first), Some(last)) = (input.draws.first(), input.draws.last()) {
        writeln!(
            out,
            "history: {} draws, period {} ({}) to period {} ({})",
            input.draws.len(),
            first.period_id,
            first.date,
            last.period_id,
            last.date
        )?;
    }
    writeln!(out, "next period: {}", input.output.next_period())?;
    writeln!(out, "training rows: {}", input.output.training_rows)
}

fn write_load(out: &mut String, load: &LoadReport) -> std::fmt::Result {
    section(out, "data load")?;
    writeln!(
        out,
        "records: {}, accepted: {}, rejected: {}",
        load.total_records,
        load.accepted,
        load.rejected.len()
    )?;
    for row in &load.rejected {
        let period = row.period_id.map_or("?".to_string(), |p| p.to_string());
        writeln!(out, "  line {} (period {}): {}", row.line, period, row.reason)?;
    }
    Ok(())
}

fn write_frequencies(out: &mut String, output: &PipelineOutput) -> std::fmt::Result {
    section(out, "frequency and omission")?;
    for zone in Zone::ALL {
        let mut table = new_table(vec!["Number", "Count", "Freq", "Omission", "Max omission", "Avg interval", "Recent"]);
        for f in &output.stats.frequencies(zone).entries {
            table.add_row(vec![
                format!("{:02}", f.number),
                f.count.to_string(),
                format!("{:.4}", f.frequency),
                f.current_omission.to_string(),
                f.max_omission.to_string(),
                format!("{:.2}", f.average_interval),
                f.recent_count.to_string(),
            ]);
        }
        writeln!(out, "-- {} --\n{table}", zone)?;
    }
    Ok(())
}

fn write_patterns(out: &mut String, output: &PipelineOutput) -> std::fmt::Result {
    section(out, "patterns")?;
    let p = &output.stats.patterns;
    let total = p.total_draws.max(1) as f64;
    let share = |count: u32| 100.0 * count as f64 / total;

    writeln!(out, "front odd counts:")?;
    for (odd, count) in p.top_odd_counts(6) {
        writeln!(out, "  {} odd / {} even: {} ({:.1}%)", odd, 5 - odd, count, share(count))?;
    }
    writeln!(out, "front zone distributions:")?;
    for (zones, count) in p.top_zone_distributions(5) {
        writeln!(out, "  {}-{}-{}: {} ({:.1}%)", zones[0], zones[1], zones[2], count, share(count))?;
    }
    writeln!(out, "front sum ranges:")?;
    for (lo, count) in p.top_sum_ranges(5) {
        writeln!(out, "  {}-{}: {} ({:.1}%)", lo, lo + p.sum_bucket_width - 1, count, share(count))?;
    }
    writeln!(out, "back odd counts:")?;
    for (odd, count) in &p.back_odd_counts {
        writeln!(out, "  {} odd: {} ({:.1}%)", odd, count, share(*count))?;
    }
    writeln!(out, "back numbers above 6:")?;
    for (upper, count) in &p.back_upper_counts {
        writeln!(out, "  {}: {} ({:.1}%)", upper, count, share(*count))?;
    }

    section(out, "association rules")?;
    if output.stats.rules.is_empty() {
        writeln!(out, "no rule passed the support, confidence and lift thresholds")?;
    }
    for rule in output.stats.rules.iter().take(20) {
        writeln!(out, "  {}", rule)?;
    }
    Ok(())
}

fn write_scores(out: &mut String, scores: &ScoreTable) -> std::fmt::Result {
    section(out, "number scores")?;
    for zone in Zone::ALL {
        let mut table = new_table(vec!["Rank", "Number", "Score", "Frequency", "Omission", "Pattern", "Model"]);
        for (i, s) in scores.zone(zone).ranked.iter().enumerate() {
            table.add_row(vec![
                (i + 1).to_string(),
                format!("{:02}", s.number),
                format!("{:.4}", s.score),
                format!("{:.3}", s.normalized.frequency),
                format!("{:.3}", s.normalized.omission),
                format!("{:.3}", s.normalized.pattern),
                format!("{:.3}", s.normalized.model),
            ]);
        }
        writeln!(out, "-- {} --\n{table}", zone)?;
    }

    // machine-readable copy: number, raw count, exact score
    for zone in Zone::ALL {
        writeln!(out, "[scores:{}]", zone)?;
        for s in &scores.zone(zone).ranked {
            writeln!(out, "{} {} {}", s.number, s.frequency_count, s.score)?;
        }
        writeln!(out, "{}", END_MARKER)?;
    }
    Ok(())
}

fn write_recommendations(out: &mut String, output: &PipelineOutput, suggestions: &[Suggestion]) -> std::fmt::Result {
    section(out, "recommendations")?;
    writeln!(out, "{} {} + {}", SINGLE_PREFIX, numbers(&output.single.front), numbers(&output.single.back))?;
    writeln!(
        out,
        "{} {} + {}",
        COMPLEX_PREFIX,
        numbers(&output.complex.front),
        numbers(&output.complex.back)
    )?;
    writeln!(out, "complex pool expands to {} single tickets", output.complex.ticket_count())?;

    if !suggestions.is_empty() {
        let mut table = new_table(vec!["#", "Front", "Back", "Score"]);
        for (i, s) in suggestions.iter().enumerate() {
            table.add_row(vec![
                (i + 1).to_string(),
                numbers(&s.front),
                numbers(&s.back),
                format!("{:.3}", s.score),
            ]);
        }
        writeln!(out, "sampled tickets:\n{table}")?;
    }
    Ok(())
}

fn write_backtest(out: &mut String, report: &BacktestReport) -> std::fmt::Result {
    section(out, "backtest")?;
    let s = &report.summary;
    writeln!(out, "cutoffs evaluated: {}, skipped: {}", s.evaluated, s.skipped)?;
    let mut table = new_table(vec!["Hits", "Count", "Rate", "Random"]);
    for (label, rates) in [("front", &s.front_hit_rates), ("back", &s.back_hit_rates)] {
        for h in rates {
            table.add_row(vec![
                format!("{} >= {}", label, h.threshold),
                h.hits.to_string(),
                format!("{:.2}%", 100.0 * h.rate),
                format!("{:.2}%", 100.0 * h.baseline),
            ]);
        }
    }
    writeln!(out, "{table}")?;
    writeln!(
        out,
        "mean matches: front {:.3} (random {:.3}), back {:.3} (random {:.3})",
        s.mean_front_matches, s.baseline_front_matches, s.mean_back_matches, s.baseline_back_matches
    )?;
    writeln!(
        out,
        "mean complex pool matches: front {:.3}, back {:.3}",
        s.mean_pool_front_matches, s.mean_pool_back_matches
    )?;
    writeln!(
        out,
        "best ticket per cutoff: front {:.3}, back {:.3}",
        s.mean_best_front_matches, s.mean_best_back_matches
    )?;
    writeln!(out, "tickets scored (single + suggestions): {}", s.tickets_scored)?;
    if s.tier_counts.is_empty() {
        writeln!(out, "no prize tier reached")?;
    }
    for (tier, count) in &s.tier_counts {
        let single = s.single_tier_counts.get(tier).copied().unwrap_or(0);
        writeln!(out, "  tier {}: {} tickets ({} single)", tier, count, single)?;
    }
    for skipped in &report.skipped {
        writeln!(out, "  skipped period {}: {}", skipped.period_id, skipped.reason)?;
    }
    Ok(())
}

fn write_tuning(out: &mut String, tuning: &TuningResult) -> std::fmt::Result {
    section(out, "weight tuning")?;
    let mut table = new_table(vec!["Trial", "Frequency", "Omission", "Pattern", "Model", "Points", "Mean front"]);
    for t in &tuning.trials {
        let w = &t.weights;
        table.add_row(vec![
            t.trial.to_string(),
            format!("{:.3}", w.frequency),
            format!("{:.3}", w.omission),
            format!("{:.3}", w.pattern),
            format!("{:.3}", w.model),
            t.points.to_string(),
            format!("{:.3}", t.mean_front_matches),
        ]);
    }
    writeln!(out, "{table}")?;
    writeln!(out, "best trial: {}", tuning.best.trial)
}

fn write_degraded(out: &mut String, output: &PipelineOutput) -> std::fmt::Result {
    section(out, "degraded items")?;
    if output.degraded.is_empty() {
        return writeln!(out, "none");
    }
    for item in &output.degraded {
        writeln!(out, "  {} {:02}: {}", item.zone, item.number, item.detail)?;
    }
    Ok(())
}

pub fn render_report(input: &ReportInput) -> Result<String> {
    let mut out = String::new();
    write_header(&mut out, input)?;
    section(&mut out, "configuration")?;
    writeln!(out, "{}", serde_json::to_string_pretty(input.config)?)?;
    if let Some(load) = input.load {
        write_load(&mut out, load)?;
    }
    write_frequencies(&mut out, input.output)?;
    write_patterns(&mut out, input.output)?;
    write_scores(&mut out, &input.output.scores)?;
    write_recommendations(&mut out, input.output, input.suggestions)?;
    if let Some(backtest) = input.backtest {
        write_backtest(&mut out, backtest)?;
    }
    if let Some(tuning) = input.tuning {
        write_tuning(&mut out, tuning)?;
    }
    write_degraded(&mut out, input.output)?;
    Ok(out)
}

fn parse_zone_block(text: &str, zone: Zone) -> Result<ZoneScores> {
    let marker = format!("[scores:{}]", zone);
    let mut lines = text.lines().skip_while(|l| l.trim() != marker);
    if lines.next().is_none() {
        bail!("no {} block in report", marker);
    }

    let mut ranked = Vec::new();
    let mut seen = BTreeSet::new();
    for line in lines {
        let line = line.trim();
        if line == END_MARKER {
            if ranked.len() != zone.size() {
                bail!("{} block has {} numbers, expected {}", marker, ranked.len(), zone.size());
            }
            rank(&mut ranked);
            return Ok(ZoneScores { zone, ranked });
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [number, count, score] = fields.as_slice() else {
            bail!("malformed score line '{}'", line);
        };
        let number: u8 = number.parse().with_context(|| format!("bad number in '{}'", line))?;
        if !zone.contains(number) || !seen.insert(number) {
            bail!("invalid or repeated {} number {}", zone, number);
        }
        ranked.push(ScoredNumber {
            number,
            frequency_count: count.parse().with_context(|| format!("bad count in '{}'", line))?,
            raw: ScoreTerms::default(),
            normalized: ScoreTerms::default(),
            score: score.parse().with_context(|| format!("bad score in '{}'", line))?,
        });
    }
    bail!("{} block is not terminated", marker)
}

/// Score tables read back from a rendered report, re-ranked.
pub fn parse_score_tables(text: &str) -> Result<ScoreTable> {
    Ok(ScoreTable {
        front: parse_zone_block(text, Zone::Front)?,
        back: parse_zone_block(text, Zone::Back)?,
    })
}

fn parse_numbers(raw: &str) -> Result<Vec<u8>> {
    raw.split_whitespace()
        .map(|n| n.parse::<u8>().with_context(|| format!("bad number '{}'", n)))
        .collect()
}

/// The combination stated on the report's recommendation line.
pub fn parse_recommendation(text: &str, kind: CombinationKind) -> Result<Combination> {
    let prefix = match kind {
        CombinationKind::Single => SINGLE_PREFIX,
        CombinationKind::Complex => COMPLEX_PREFIX,
    };
    let line = text
        .lines()
        .find_map(|l| l.trim().strip_prefix(prefix))
        .ok_or_else(|| anyhow!("no '{}' line in report", prefix))?;
    let (front, back) = line
        .split_once('+')
        .ok_or_else(|| anyhow!("recommendation line lacks '+': {}", line))?;
    Combination::new(kind, parse_numbers(front)?, parse_numbers(back)?)
}

/// Recommendations stated in a report next to the ones re-derived from its
/// score tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Rederived {
    pub stated_single: Combination,
    pub stated_complex: Combination,
    pub single: Combination,
    pub complex: Combination,
}

impl Rederived {
    pub fn consistent(&self) -> bool {
        self.stated_single == self.single && self.stated_complex == self.complex
    }
}

pub fn rederive(text: &str) -> Result<Rederived> {
    let scores = parse_score_tables(text)?;
    Ok(Rederived {
        stated_single: parse_recommendation(text, CombinationKind::Single)?,
        stated_complex: parse_recommendation(text, CombinationKind::Complex)?,
        single: combination::single(&scores)?,
        complex: combination::complex(&scores)?,
    })
}
