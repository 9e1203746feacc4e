use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use textplots::Plot;

use daletou_analysis::backtest::BacktestReport;
use daletou_analysis::pipeline::PipelineOutput;
use daletou_analysis::scoring::ZoneScores;
use daletou_analysis::stats::HistoryStats;
use daletou_analysis::tuning::TuningResult;
use daletou_db::loader::LoadReport;
use daletou_db::models::{Suggestion, Zone};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn join(numbers: &[u8]) -> String {
    numbers.iter().map(|n| format!("{:02}", n)).collect::<Vec<_>>().join(" ")
}

pub fn display_load_summary(report: &LoadReport) {
    println!(
        "{} rows read, {} accepted, {} rejected",
        report.total_records,
        report.accepted,
        report.rejected.len()
    );
    if report.rejected.is_empty() {
        return;
    }
    let mut table = new_table();
    table.set_header(vec!["Line", "Period", "Reason"]);
    for row in &report.rejected {
        table.add_row(vec![
            row.line.to_string(),
            row.period_id.map_or("?".to_string(), |p| p.to_string()),
            row.reason.clone(),
        ]);
    }
    println!("{table}");
}

pub fn display_stats(stats: &HistoryStats, top: usize) {
    println!("\n== Statistics over {} draws ==", stats.total_draws);

    for zone in Zone::ALL {
        let table_data = stats.frequencies(zone);
        println!("\n── {} ──", zone);
        let mut table = new_table();
        table.set_header(vec!["Number", "Count", "Freq", "Omission", "Max", "Avg interval", "Recent", ""]);

        let max_freq = table_data
            .entries
            .iter()
            .map(|e| e.frequency)
            .fold(0.0_f64, f64::max)
            .max(f64::EPSILON);
        let hot: Vec<u8> = table_data.hottest(top).iter().map(|e| e.number).collect();

        for e in &table_data.entries {
            let bar = "█".repeat((e.frequency / max_freq * 20.0).round() as usize);
            let number = if hot.contains(&e.number) {
                Cell::new(format!("{:02}", e.number)).fg(Color::Green)
            } else {
                Cell::new(format!("{:02}", e.number))
            };
            table.add_row(vec![
                number,
                Cell::new(e.count),
                Cell::new(format!("{:.3}", e.frequency)),
                Cell::new(e.current_omission),
                Cell::new(e.max_omission),
                Cell::new(format!("{:.1}", e.average_interval)),
                Cell::new(e.recent_count),
                Cell::new(bar),
            ]);
        }
        println!("{table}");
    }

    let p = &stats.patterns;
    println!("\n── Patterns ──");
    if let Some(odd) = p.modal_odd_count() {
        println!("  modal front odd/even: {}/{}", odd, 5 - odd);
    }
    if let Some(zones) = p.modal_zone_distribution() {
        println!("  modal zone distribution: {}-{}-{}", zones[0], zones[1], zones[2]);
    }
    if let Some(lo) = p.modal_sum_range() {
        println!("  modal front sum range: {}-{}", lo, lo + p.sum_bucket_width - 1);
    }
    if let Some(odd) = p.modal_back_odd_count() {
        println!("  modal back odd count: {}", odd);
    }

    println!("\n── Association rules ({}) ──", stats.rules.len());
    let mut table = new_table();
    table.set_header(vec!["If", "Then", "Support", "Confidence", "Lift"]);
    for rule in stats.rules.iter().take(top) {
        table.add_row(vec![
            join(&rule.antecedent),
            join(&rule.consequent),
            format!("{:.3}", rule.support),
            format!("{:.3}", rule.confidence),
            format!("{:.2}", rule.lift),
        ]);
    }
    println!("{table}");
}

fn display_zone_scores(scores: &ZoneScores, top: usize) {
    println!("\n── Top {} {} ──", top, scores.zone);
    let mut table = new_table();
    table.set_header(vec!["#", "Number", "Score", "Freq", "Omission", "Pattern", "Model"]);
    for (i, s) in scores.ranked.iter().take(top).enumerate() {
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
    println!("{table}");
}

pub fn display_prediction(output: &PipelineOutput) {
    println!(
        "\n== Period {} (from {} draws, {} training rows) ==",
        output.next_period(),
        output.history_len,
        output.training_rows
    );
    display_zone_scores(&output.scores.front, 15);
    display_zone_scores(&output.scores.back, 6);

    println!("\nSingle:  {}", output.single);
    println!(
        "Complex: {} ({} tickets)",
        output.complex,
        output.complex.ticket_count()
    );
    if !output.degraded.is_empty() {
        println!("{} numbers used a degraded estimate (see report)", output.degraded.len());
    }
}

pub fn display_suggestions(suggestions: &[Suggestion]) {
    println!("\n== Suggested tickets ==\n");
    let mut table = new_table();
    table.set_header(vec!["#", "Front", "Back", "Score"]);
    for (i, s) in suggestions.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            join(&s.front),
            join(&s.back),
            format!("{:.3}", s.score),
        ]);
    }
    println!("{table}");
}

pub fn display_backtest(report: &BacktestReport) {
    let s = &report.summary;
    println!("\n== Backtest: {} cutoffs, {} skipped ==\n", s.evaluated, s.skipped);

    let mut table = new_table();
    table.set_header(vec!["Hits", "Count", "Rate", "Random"]);
    for (label, rates) in [("front", &s.front_hit_rates), ("back", &s.back_hit_rates)] {
        for h in rates {
            let rate = Cell::new(format!("{:.2}%", 100.0 * h.rate));
            let rate = if h.rate > h.baseline { rate.fg(Color::Green) } else { rate };
            table.add_row(vec![
                Cell::new(format!("{} ≥ {}", label, h.threshold)),
                Cell::new(h.hits),
                rate,
                Cell::new(format!("{:.2}%", 100.0 * h.baseline)),
            ]);
        }
    }
    println!("{table}");
    println!(
        "Mean matches: front {:.3} (random {:.3}), back {:.3} (random {:.3})",
        s.mean_front_matches, s.baseline_front_matches, s.mean_back_matches, s.baseline_back_matches
    );
    println!(
        "Best ticket per cutoff: front {:.3}, back {:.3}",
        s.mean_best_front_matches, s.mean_best_back_matches
    );
    println!("Tickets scored (single + suggestions): {}", s.tickets_scored);
    for (tier, count) in &s.tier_counts {
        let single = s.single_tier_counts.get(tier).copied().unwrap_or(0);
        let best = s.best_tier_counts.get(tier).copied().unwrap_or(0);
        println!("  prize tier {}: {} tickets, {} single, best in {} cutoffs", tier, count, single, best);
    }

    display_backtest_chart(report);
}

fn display_backtest_chart(report: &BacktestReport) {
    let points: Vec<(f32, f32)> = report
        .results
        .iter()
        .map(|r| (r.period_id as f32, r.front_matches as f32))
        .collect();
    if points.len() < 2 {
        return;
    }
    let x_min = points[0].0;
    let x_max = points[points.len() - 1].0;

    println!("\n── Front matches per cutoff ──");
    let shape = textplots::Shape::Steps(&points);
    let mut chart = textplots::Chart::new_with_y_range(120, 40, x_min, x_max, 0.0, 5.0);
    println!("{}", chart.lineplot(&shape));
}

pub fn display_tuning(result: &TuningResult) {
    println!("\n== Weight tuning: {} trials ==\n", result.trials.len());
    let mut table = new_table();
    table.set_header(vec!["Trial", "Frequency", "Omission", "Pattern", "Model", "Points", "Mean front"]);
    for t in &result.trials {
        let row = vec![
            Cell::new(t.trial),
            Cell::new(format!("{:.3}", t.weights.frequency)),
            Cell::new(format!("{:.3}", t.weights.omission)),
            Cell::new(format!("{:.3}", t.weights.pattern)),
            Cell::new(format!("{:.3}", t.weights.model)),
            Cell::new(t.points),
            Cell::new(format!("{:.3}", t.mean_front_matches)),
        ];
        let row: Vec<Cell> = if t.trial == result.best.trial {
            row.into_iter().map(|c| c.fg(Color::Green)).collect()
        } else {
            row
        };
        table.add_row(row);
    }
    println!("{table}");
}
