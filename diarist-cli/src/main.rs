//! CLI entry point for diarist

mod progress;

use anyhow::{Context, Result};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use diarist_agent::{ledger_path, BackgroundDeriver, Pipeline, RunOptions, RunReport, RunState};
use diarist_core::config::{validate_backend_ready, Config, ConfigLoader};
use diarist_core::logging::init_logging;
use diarist_core::{ArtifactStore, ProgressLedger, RecordStore};
use diarist_providers::{LLMProvider, OpenAiClient};

const DEFAULT_INPUT: &str = "data/conversations_by_date.json";

/// Exit status for a run stopped by Ctrl+C
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(name = "diarist")]
#[command(about = "Turn date-grouped conversation logs into a first-person diary")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate diary entries and the yearly summaries they affect
    Generate {
        /// Conversations grouped by date
        #[arg(default_value = DEFAULT_INPUT)]
        input: PathBuf,

        /// Only the first few dates overall
        #[arg(long)]
        test: bool,

        /// Only the first few dates of each year
        #[arg(long)]
        quick: bool,

        /// Regenerate dates that are already done
        #[arg(long)]
        overwrite: bool,

        /// Stop at the first failure
        #[arg(long)]
        fail_fast: bool,
    },
    /// Recompute yearly summaries from the entries on disk
    Summarize {
        /// Conversations grouped by date
        #[arg(default_value = DEFAULT_INPUT)]
        input: PathBuf,

        /// Only years whose entries changed since their last summary
        #[arg(long)]
        stale_only: bool,
    },
    /// Show progress per year
    Status {
        /// Conversations grouped by date
        #[arg(default_value = DEFAULT_INPUT)]
        input: PathBuf,
    },
    /// Derive per-year background notes from a biography and store them in
    /// the configuration file
    Background {
        /// Plain-text biography
        #[arg(long)]
        resume: PathBuf,

        /// Conversations grouped by date; sets the year range
        #[arg(default_value = DEFAULT_INPUT)]
        input: PathBuf,

        /// First year (defaults to the input's first year)
        #[arg(long)]
        from: Option<i32>,

        /// Last year (defaults to the input's last year)
        #[arg(long)]
        to: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_file(path),
        None => ConfigLoader::new(),
    };
    let config = loader
        .load()
        .with_context(|| format!("loading {}", loader.config_path().display()))?;
    let _guard = init_logging(&config.logging);

    match cli.command {
        Commands::Generate {
            input,
            test,
            quick,
            overwrite,
            fail_fast,
        } => {
            let options = RunOptions::from_flags(test, quick, overwrite, fail_fast, &config.run);
            info!(input = %input.display(), mode = ?options.mode, overwrite, "Starting generation");
            run_generate(config, &input, options).await
        }
        Commands::Summarize { input, stale_only } => {
            info!(input = %input.display(), stale_only, "Recomputing summaries");
            run_summarize(config, &input, !stale_only).await
        }
        Commands::Status { input } => {
            run_status(&config, &input)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Background {
            resume,
            input,
            from,
            to,
        } => {
            run_background(&loader, config, &resume, &input, from, to).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_store(config: &Config, input: &Path) -> Result<RecordStore> {
    let store = RecordStore::from_path(input, config.diary.min_message_length)
        .with_context(|| format!("reading {}", input.display()))?;
    for rejected in store.rejected() {
        warn!(key = %rejected.key, reason = %rejected.reason, "Skipping input date");
    }
    Ok(store)
}

fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    validate_backend_ready(config)?;
    Ok(Arc::new(OpenAiClient::from_config(&config.llm)))
}

/// Cancel `token` on Ctrl+C so the pipeline stops at a consistent point
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    });
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.state {
        RunState::Failed => ExitCode::FAILURE,
        RunState::Interrupted => ExitCode::from(INTERRUPTED_EXIT),
        _ => ExitCode::SUCCESS,
    }
}

async fn run_generate(config: Config, input: &Path, options: RunOptions) -> Result<ExitCode> {
    let store = load_store(&config, input)?;
    let provider = build_provider(&config)?;

    println!("{}", style("diarist").bold().cyan());
    println!("Input: {}", input.display());
    println!("Output: {}\n", config.output.base_dir);

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let display = progress::spawn_display(rx);

    let mut pipeline = Pipeline::new(provider, config)
        .with_events(tx)
        .with_cancellation(cancel);
    let result = pipeline.run(&store, &options).await;
    // Dropping the pipeline closes the event channel and ends the display.
    drop(pipeline);
    let _ = display.await;

    let report = result?;
    progress::print_report(&report);
    Ok(exit_code(&report))
}

async fn run_summarize(config: Config, input: &Path, force: bool) -> Result<ExitCode> {
    let store = load_store(&config, input)?;
    let provider = build_provider(&config)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let display = progress::spawn_display(rx);

    let mut pipeline = Pipeline::new(provider, config)
        .with_events(tx)
        .with_cancellation(cancel);
    let result = pipeline.summarize_periods(Some(&store), force).await;
    drop(pipeline);
    let _ = display.await;

    let report = result?;
    progress::print_report(&report);
    Ok(exit_code(&report))
}

/// Show progress per year
fn run_status(config: &Config, input: &Path) -> Result<()> {
    let store = load_store(config, input)?;
    let artifacts = ArtifactStore::new(&config.output.base_dir);
    let ledger_file = ledger_path(config);
    let ledger = match ProgressLedger::read(&ledger_file) {
        Ok(record) => Some(record),
        Err(e) => {
            println!("{} {}", style("Ledger unreadable:").red().bold(), e);
            None
        }
    };

    println!("{}", style("diarist status").bold().cyan());
    println!("Input: {}", input.display());
    println!("Output: {}", artifacts.base_dir().display());
    println!("Ledger: {}\n", ledger_file.display());

    let mut total_done = 0;
    for (year, buckets) in store.grouped_by_year() {
        let done = ledger
            .as_ref()
            .map(|record| {
                buckets
                    .iter()
                    .filter(|b| record.processed_dates.contains(&b.date))
                    .count()
            })
            .unwrap_or(0);
        total_done += done;

        let summary = match (artifacts.load_summary(year), &ledger) {
            (None, _) => style("no summary").dim(),
            (Some(_), Some(record)) => {
                let current = record
                    .summaries
                    .get(&year)
                    .is_some_and(|s| s.entries == record.completed_in_year(year));
                if current {
                    style("summary current").green()
                } else {
                    style("summary stale").yellow()
                }
            }
            (Some(_), None) => style("summary present").dim(),
        };

        let count = format!("{}/{}", done, buckets.len());
        let count = if done == buckets.len() {
            style(count).green()
        } else {
            style(count).yellow()
        };
        println!("  {}: {} dates  {}", year, count, summary);
    }

    println!();
    println!("Dates done: {}/{}", total_done, store.len());
    if !store.rejected().is_empty() {
        println!(
            "Rejected input dates: {}",
            style(store.rejected().len()).red()
        );
    }
    if let Some(last) = ledger.as_ref().and_then(|r| r.last_processed) {
        println!("Last processed: {}", last);
    }
    Ok(())
}

async fn run_background(
    loader: &ConfigLoader,
    mut config: Config,
    resume: &Path,
    input: &Path,
    from: Option<i32>,
    to: Option<i32>,
) -> Result<()> {
    let biography = std::fs::read_to_string(resume)
        .with_context(|| format!("reading {}", resume.display()))?;

    let (first_year, last_year) = match (from, to) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            let store = load_store(&config, input)?;
            let dates = store.buckets_in_order();
            let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
                anyhow::bail!("{} has no usable dates; pass --from and --to", input.display());
            };
            (
                from.unwrap_or_else(|| first.date.year()),
                to.unwrap_or_else(|| last.date.year()),
            )
        }
    };

    let provider = build_provider(&config)?;
    let deriver = BackgroundDeriver::new(provider, &config);
    println!(
        "Deriving background for {}..={} from {}",
        first_year,
        last_year,
        resume.display()
    );
    let derived = deriver.derive(&biography, first_year, last_year).await?;

    if !derived.text.trim().is_empty() {
        config.background.text = derived.text;
    }
    let years = derived.by_year.len();
    config.background.by_year.extend(derived.by_year);
    loader.save_background(&config.background)?;

    println!(
        "{} {} years written to {}",
        style("✓").green().bold(),
        years,
        loader.config_path().display()
    );
    Ok(())
}
