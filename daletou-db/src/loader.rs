use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::models::Draw;

/// period_id, date, 5 front, 2 back.
pub const COLUMN_COUNT: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub line: u64,
    pub period_id: Option<u32>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub total_records: u32,
    pub accepted: u32,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug, Clone)]
pub struct LoadedHistory {
    /// Sorted by period_id ascending.
    pub draws: Vec<Draw>,
    pub report: LoadReport,
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .with_context(|| format!("invalid date '{}'", raw))
}

fn parse_record(record: &csv::StringRecord) -> Result<Draw> {
    if record.len() != COLUMN_COUNT {
        bail!("expected {} fields, found {}", COLUMN_COUNT, record.len());
    }

    let get = |idx: usize| -> Result<&str> {
        record
            .get(idx)
            .map(str::trim)
            .with_context(|| format!("missing field at index {}", idx))
    };

    let get_u8 = |idx: usize| -> Result<u8> {
        let s = get(idx)?;
        s.parse::<u8>()
            .with_context(|| format!("cannot parse '{}' (index {})", s, idx))
    };

    let raw_period = get(0)?;
    let period_id = raw_period
        .parse::<u32>()
        .with_context(|| format!("invalid period_id '{}'", raw_period))?;
    let date = parse_date(get(1)?)?;

    let front = [get_u8(2)?, get_u8(3)?, get_u8(4)?, get_u8(5)?, get_u8(6)?];
    let back = [get_u8(7)?, get_u8(8)?];
    Draw::new(period_id, date, front, back)
}

pub fn load_csv(path: &Path) -> Result<LoadedHistory> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {:?}", path))?;
    load_from_reader(file).with_context(|| format!("cannot load draws from {:?}", path))
}

/// Malformed rows are logged and reported, never fatal. Only a missing or
/// malformed header aborts the load.
pub fn load_from_reader<R: Read>(input: R) -> Result<LoadedHistory> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader.headers().context("cannot read header row")?;
    if headers.len() != COLUMN_COUNT {
        bail!(
            "header row must have {} columns (period_id,date,front_1..front_5,back_1,back_2), found {}",
            COLUMN_COUNT,
            headers.len()
        );
    }

    let mut report = LoadReport::default();
    let mut parsed: Vec<(u64, Draw)> = Vec::new();

    for record_result in reader.records() {
        report.total_records += 1;
        let record = match record_result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                log::warn!("line {}: unreadable record: {}", line, e);
                report.rejected.push(RejectedRow { line, period_id: None, reason: e.to_string() });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        match parse_record(&record) {
            Ok(draw) => parsed.push((line, draw)),
            Err(e) => {
                let period_id = record.get(0).and_then(|s| s.trim().parse().ok());
                log::warn!("line {}: row rejected: {:#}", line, e);
                report.rejected.push(RejectedRow { line, period_id, reason: format!("{:#}", e) });
            }
        }
    }

    // stable: rows sharing a period keep file order
    parsed.sort_by_key(|(_, d)| d.period_id);

    // a period counts as seen only once one of its rows passed the date check
    let mut seen = HashSet::new();
    let mut draws: Vec<Draw> = Vec::with_capacity(parsed.len());
    for (line, draw) in parsed {
        if seen.contains(&draw.period_id) {
            log::warn!("line {}: duplicate period {} rejected", line, draw.period_id);
            report.rejected.push(RejectedRow {
                line,
                period_id: Some(draw.period_id),
                reason: format!("duplicate period_id {}", draw.period_id),
            });
            continue;
        }
        if let Some(prev) = draws.last() {
            if draw.date < prev.date {
                log::warn!(
                    "line {}: period {} dated {} precedes period {} ({})",
                    line, draw.period_id, draw.date, prev.period_id, prev.date
                );
                report.rejected.push(RejectedRow {
                    line,
                    period_id: Some(draw.period_id),
                    reason: format!("date {} out of order with period {}", draw.date, prev.period_id),
                });
                continue;
            }
        }
        seen.insert(draw.period_id);
        draws.push(draw);
    }

    report.rejected.sort_by_key(|r| r.line);
    report.accepted = draws.len() as u32;
    log::info!(
        "{} records read, {} draws accepted, {} rejected",
        report.total_records,
        report.accepted,
        report.rejected.len()
    );

    Ok(LoadedHistory { draws, report })
}
