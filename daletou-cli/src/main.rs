mod display;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use daletou_analysis::backtest::run_backtest_with_progress;
use daletou_analysis::combination::suggest;
use daletou_analysis::config::{AnalysisConfig, Verbosity};
use daletou_analysis::pipeline::run_pipeline;
use daletou_analysis::report::{ReportInput, render_report, rederive};
use daletou_analysis::stats::analyze;
use daletou_analysis::tuning::tune_weights;
use daletou_db::loader::{LoadedHistory, load_csv};

use crate::display::{
    display_backtest, display_load_summary, display_prediction, display_stats, display_suggestions,
    display_tuning,
};

#[derive(Parser)]
#[command(name = "daletou", about = "Draw history analysis and combination scoring for Super Lotto")]
struct Cli {
    /// Draw history CSV
    #[arg(short, long, global = true, default_value = "daletou.csv")]
    file: PathBuf,

    /// JSON configuration file (defaults apply to missing fields)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// RNG seed, overrides the configuration
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Lag window W, overrides the configuration
    #[arg(long, global = true)]
    lag_window: Option<usize>,

    /// More detail (-v per-component, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Warnings and results only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Frequency, omission, pattern and association statistics
    Stats {
        /// Rows shown in the hot-number and rule listings
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Score numbers and recommend combinations for the next draw
    Predict {
        /// Number of sampled tickets to suggest
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Replay the pipeline over the last K draws
    Backtest {
        /// Cutoffs to replay (K)
        #[arg(short, long)]
        periods: Option<usize>,
    },

    /// Random search over the score weights
    Tune {
        #[arg(long)]
        trials: Option<usize>,

        /// Backtest cutoffs per trial
        #[arg(short, long)]
        periods: Option<usize>,

        /// Write the configuration with the best weights to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Write the full text report
    Report {
        /// Defaults to daletou_report_<YYYYmmdd_HHMMSS>.txt
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave out the backtest section
        #[arg(long)]
        no_backtest: bool,

        /// Tune the weights first and report with the best ones
        #[arg(long)]
        tune: bool,
    },

    /// Re-rank the score tables of a report and check its recommendations
    Rederive {
        #[arg(short, long)]
        report: PathBuf,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn effective_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(w) = cli.lag_window {
        config.lag_window = w;
    }
    if cli.quiet {
        config.verbosity = Verbosity::Quiet;
    } else if cli.verbose > 0 {
        config.verbosity = Verbosity::Verbose;
    }
    config.validate()?;
    Ok(config)
}

fn load_history(path: &Path) -> Result<LoadedHistory> {
    let history = load_csv(path)?;
    if history.draws.is_empty() {
        bail!("no valid draw in {:?}", path);
    }
    log::info!(
        "{} draws loaded from {:?} (periods {} to {})",
        history.draws.len(),
        path,
        history.draws[0].period_id,
        history.draws[history.draws.len() - 1].period_id
    );
    Ok(history)
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = effective_config(&cli)?;

    match &cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Rederive { report } => cmd_rederive(report),
        Command::Stats { top } => cmd_stats(&cli.file, &config, *top),
        Command::Predict { count } => cmd_predict(&cli.file, &config, *count),
        Command::Backtest { periods } => cmd_backtest(&cli.file, &config, *periods),
        Command::Tune { trials, periods, save } => cmd_tune(&cli.file, &config, *trials, *periods, save.as_deref()),
        Command::Report { output, no_backtest, tune } => {
            cmd_report(&cli.file, &config, output.clone(), !*no_backtest, *tune)
        }
    }
}

fn cmd_stats(file: &Path, config: &AnalysisConfig, top: usize) -> Result<()> {
    let history = load_history(file)?;
    display_load_summary(&history.report);
    let stats = analyze(&history.draws, config);
    display_stats(&stats, top);
    Ok(())
}

fn cmd_predict(file: &Path, config: &AnalysisConfig, count: Option<usize>) -> Result<()> {
    let history = load_history(file)?;
    let mut config = config.clone();
    if let Some(count) = count {
        config.suggestions.count = count;
    }

    let output = run_pipeline(&history.draws, &config)?;
    display_prediction(&output);
    let suggestions = suggest(&output.scores, &output.stats, &config)?;
    display_suggestions(&suggestions);
    Ok(())
}

fn cmd_backtest(file: &Path, config: &AnalysisConfig, periods: Option<usize>) -> Result<()> {
    let history = load_history(file)?;
    let periods = periods.unwrap_or(config.backtest_periods);

    println!("Backtesting {} cutoffs over {} draws...", periods, history.draws.len());
    let pb = progress_bar(periods as u64)?;
    let report = run_backtest_with_progress(&history.draws, config, periods, &pb)?;
    pb.finish_and_clear();

    display_backtest(&report);
    Ok(())
}

fn cmd_tune(
    file: &Path,
    config: &AnalysisConfig,
    trials: Option<usize>,
    periods: Option<usize>,
    save: Option<&Path>,
) -> Result<()> {
    let history = load_history(file)?;
    let mut config = config.clone();
    if let Some(trials) = trials {
        config.tuning.trials = trials;
    }
    if let Some(periods) = periods {
        config.tuning.periods = periods;
    }

    println!(
        "Tuning weights: {} trials of {} cutoffs each...",
        config.tuning.trials, config.tuning.periods
    );
    let pb = progress_bar(config.tuning.trials as u64)?;
    let result = tune_weights(&history.draws, &config, &pb)?;
    pb.finish_and_clear();
    display_tuning(&result);

    if let Some(path) = save {
        let tuned = AnalysisConfig { weights: result.best.weights.clone(), ..config };
        tuned.save(path)?;
        log::info!("configuration with the best weights saved to {:?}", path);
    }
    Ok(())
}

fn cmd_report(
    file: &Path,
    config: &AnalysisConfig,
    output: Option<PathBuf>,
    with_backtest: bool,
    tune: bool,
) -> Result<()> {
    let history = load_history(file)?;
    let mut config = config.clone();

    let tuning = if tune {
        let pb = progress_bar(config.tuning.trials as u64)?;
        pb.set_message("tuning");
        let result = tune_weights(&history.draws, &config, &pb)?;
        pb.finish_and_clear();
        config.weights = result.best.weights.clone();
        Some(result)
    } else {
        None
    };

    let pipeline = run_pipeline(&history.draws, &config)?;
    let suggestions = suggest(&pipeline.scores, &pipeline.stats, &config)?;

    let backtest = if with_backtest {
        let pb = progress_bar(config.backtest_periods as u64)?;
        pb.set_message("backtest");
        let report = run_backtest_with_progress(&history.draws, &config, config.backtest_periods, &pb)?;
        pb.finish_and_clear();
        Some(report)
    } else {
        None
    };

    let now = chrono::Local::now();
    let path = output
        .unwrap_or_else(|| PathBuf::from(format!("daletou_report_{}.txt", now.format("%Y%m%d_%H%M%S"))));
    let text = render_report(&ReportInput {
        generated_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        source: file.display().to_string(),
        config: &config,
        load: Some(&history.report),
        draws: &history.draws,
        output: &pipeline,
        suggestions: &suggestions,
        backtest: backtest.as_ref(),
        tuning: tuning.as_ref(),
    })?;
    std::fs::write(&path, text).with_context(|| format!("cannot write report {:?}", path))?;

    display_prediction(&pipeline);
    println!("\nReport written to {}", path.display());
    Ok(())
}

fn cmd_rederive(report: &Path) -> Result<()> {
    let text = std::fs::read_to_string(report).with_context(|| format!("cannot read report {:?}", report))?;
    let rederived = rederive(&text)?;

    println!("stated single:    {}", rederived.stated_single);
    println!("re-derived:       {}", rederived.single);
    println!("stated complex:   {}", rederived.stated_complex);
    println!("re-derived:       {}", rederived.complex);
    if !rederived.consistent() {
        bail!("score tables in {:?} do not reproduce the stated recommendation", report);
    }
    println!("Score tables reproduce the stated recommendation.");
    Ok(())
}
