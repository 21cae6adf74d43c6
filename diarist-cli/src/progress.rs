//! Terminal rendering of pipeline events and run reports

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use diarist_agent::{BucketOutcome, PeriodOutcome, PipelineEvent, RunReport, RunState};

const BAR_TEMPLATE: &str = "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Drive a progress bar from pipeline events until the channel closes
pub fn spawn_display(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;

        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::SelectionMade {
                    selected,
                    already_done,
                    rejected,
                } => {
                    println!(
                        "{} dates to write, {} already done, {} rejected",
                        style(selected).bold(),
                        already_done,
                        rejected
                    );
                    let pb = ProgressBar::new(selected as u64);
                    pb.set_style(bar_style());
                    bar = Some(pb);
                }
                PipelineEvent::BucketStarted { date, index, total } => {
                    if let Some(pb) = &bar {
                        pb.set_message(format!("{} ({}/{})", date, index + 1, total));
                    }
                }
                PipelineEvent::BucketFinished { date, outcome } => {
                    let line = match &outcome {
                        BucketOutcome::Completed { title, .. } => {
                            format!("{} {} {}", style("✓").green(), date, title)
                        }
                        BucketOutcome::Failed { error } => {
                            format!("{} {} {}", style("✗").red(), date, style(error).red())
                        }
                        BucketOutcome::Skipped { reason } => {
                            format!("{} {} {}", style("-").dim(), date, style(reason).dim())
                        }
                    };
                    match &bar {
                        Some(pb) => {
                            pb.println(line);
                            pb.inc(1);
                        }
                        None => println!("{}", line),
                    }
                }
                PipelineEvent::SummaryStarted { year } => {
                    if let Some(pb) = &bar {
                        pb.set_message(format!("summary {}", year));
                    }
                }
                PipelineEvent::SummaryFinished { year, outcome } => {
                    let line = match &outcome {
                        PeriodOutcome::Completed { path } => format!(
                            "{} summary {} -> {}",
                            style("✓").green(),
                            year,
                            path.display()
                        ),
                        PeriodOutcome::Failed { error } => {
                            format!("{} summary {} {}", style("✗").red(), year, style(error).red())
                        }
                        PeriodOutcome::Skipped { reason } => {
                            format!("{} summary {} {}", style("-").dim(), year, style(reason).dim())
                        }
                    };
                    match &bar {
                        Some(pb) => pb.println(line),
                        None => println!("{}", line),
                    }
                }
                PipelineEvent::StateChanged(state) => {
                    if state.is_terminal() {
                        if let Some(pb) = bar.take() {
                            pb.finish_and_clear();
                        }
                    }
                }
            }
        }

        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
    })
}

/// Print the end-of-run summary
pub fn print_report(report: &RunReport) {
    println!();
    let state = match report.state {
        RunState::Done => style("done").green().bold(),
        RunState::Interrupted => style("interrupted").yellow().bold(),
        RunState::Failed => style("failed").red().bold(),
        _ => style("incomplete").dim(),
    };
    println!("{} {}", style("Run").bold(), state);

    println!(
        "  Dates: {} written, {} skipped, {} failed",
        style(report.completed()).green(),
        report.skipped(),
        style(report.failed()).red()
    );
    if !report.periods.is_empty() {
        println!(
            "  Summaries: {} written, {} failed",
            style(report.periods_completed()).green(),
            style(report.periods_failed()).red()
        );
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\n{}", style("Failed dates:").red().bold());
        for (date, error) in failures {
            println!("  {}: {}", date, error);
        }
    }

    if report.state == RunState::Interrupted {
        println!(
            "\n{}",
            style("Progress is saved; run the same command again to resume.").yellow()
        );
    }
}
