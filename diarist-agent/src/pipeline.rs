//! Pipeline driver.
//!
//! Walks the dates of a [`RecordStore`] in global chronological order, one
//! at a time. Each date's entry is generated from the narrative written so
//! far, persisted, appended to memory and only then recorded in the ledger.
//! When the walk leaves a year, and again at the end of the run, years with
//! new entries get their summary recomputed.

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use diarist_core::config::{Config, PartialPeriodPolicy, RunConfig};
use diarist_core::{
    ArtifactStore, DiaryEntry, Error, NarrativeMemory, ProgressLedger, RecordStore, Result,
    TimeBucket,
};
use diarist_providers::{LLMProvider, RetryPolicy};

use crate::generator::DiaryGenerator;
use crate::summarizer::PeriodSummarizer;

/// Which dates a run considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Every date
    Full,
    /// The first `per_year` dates of each year
    Quick { per_year: usize },
    /// The first `limit` dates overall
    Test { limit: usize },
}

/// Directives for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Regenerate dates even if the ledger lists them as done
    pub overwrite: bool,
    /// Stop at the first failed date or summary
    pub fail_fast: bool,
    /// Recompute period summaries
    pub summarize: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            overwrite: false,
            fail_fast: false,
            summarize: true,
        }
    }
}

impl RunOptions {
    /// Build options from command-line style flags. Test mode wins over
    /// quick mode when both are requested.
    pub fn from_flags(test: bool, quick: bool, overwrite: bool, fail_fast: bool, run: &RunConfig) -> Self {
        let mode = if test {
            RunMode::Test {
                limit: run.test_limit,
            }
        } else if quick {
            RunMode::Quick {
                per_year: run.quick_per_year,
            }
        } else {
            RunMode::Full
        };
        Self {
            mode,
            overwrite,
            fail_fast: fail_fast || run.fail_fast,
            summarize: true,
        }
    }
}

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Selecting,
    Generating,
    Summarizing,
    Done,
    Failed,
    Interrupted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Interrupted)
    }
}

/// Result for one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BucketOutcome {
    Completed { title: String, path: PathBuf },
    Skipped { reason: String },
    Failed { error: String },
}

/// Result for one year's summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodOutcome {
    Completed { path: PathBuf },
    Skipped { reason: String },
    Failed { error: String },
}

/// End-of-run report
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    /// Keyed by the input's date key, so rejected keys are listed too
    pub buckets: BTreeMap<String, BucketOutcome>,
    pub periods: BTreeMap<i32, PeriodOutcome>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            buckets: BTreeMap::new(),
            periods: BTreeMap::new(),
        }
    }

    pub fn completed(&self) -> usize {
        self.buckets
            .values()
            .filter(|o| matches!(o, BucketOutcome::Completed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.buckets
            .values()
            .filter(|o| matches!(o, BucketOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.buckets
            .values()
            .filter(|o| matches!(o, BucketOutcome::Failed { .. }))
            .count()
    }

    pub fn periods_completed(&self) -> usize {
        self.periods
            .values()
            .filter(|o| matches!(o, PeriodOutcome::Completed { .. }))
            .count()
    }

    pub fn periods_failed(&self) -> usize {
        self.periods
            .values()
            .filter(|o| matches!(o, PeriodOutcome::Failed { .. }))
            .count()
    }

    /// The run-level error, if the run did not reach `Done`
    pub fn error(&self) -> Option<Error> {
        match self.state {
            RunState::Failed => Some(Error::Generation(format!(
                "run stopped with {} failed dates and {} failed summaries",
                self.failed(),
                self.periods_failed()
            ))),
            RunState::Interrupted => Some(Error::Interrupted(format!(
                "run interrupted after {} completed dates",
                self.completed()
            ))),
            _ => None,
        }
    }

    /// Failed dates with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.buckets.iter().filter_map(|(id, o)| match o {
            BucketOutcome::Failed { error } => Some((id.as_str(), error.as_str())),
            _ => None,
        })
    }
}

/// Progress notifications for displays
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StateChanged(RunState),
    SelectionMade {
        selected: usize,
        already_done: usize,
        rejected: usize,
    },
    BucketStarted {
        date: NaiveDate,
        index: usize,
        total: usize,
    },
    BucketFinished {
        date: NaiveDate,
        outcome: BucketOutcome,
    },
    SummaryStarted {
        year: i32,
    },
    SummaryFinished {
        year: i32,
        outcome: PeriodOutcome,
    },
}

/// Dates chosen for a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Dates to generate, in order
    pub pending: Vec<NaiveDate>,
    /// Dates within the mode bound that the ledger lists as done
    pub already_done: Vec<NaiveDate>,
}

/// Apply the run-mode bound and then the ledger to the store's dates
pub fn select_buckets(store: &RecordStore, ledger: &ProgressLedger, mode: RunMode) -> Selection {
    let bounded: Vec<&TimeBucket> = match mode {
        RunMode::Full => store.buckets_in_order(),
        RunMode::Test { limit } => store.buckets_in_order().into_iter().take(limit).collect(),
        RunMode::Quick { per_year } => store
            .grouped_by_year()
            .into_values()
            .flat_map(|buckets| buckets.into_iter().take(per_year))
            .collect(),
    };

    let mut selection = Selection::default();
    for bucket in bounded {
        if ledger.is_done(bucket.date) {
            selection.already_done.push(bucket.date);
        } else {
            selection.pending.push(bucket.date);
        }
    }
    selection
}

/// Ledger path: `progress_file` as given when absolute, else under `base_dir`
pub fn ledger_path(config: &Config) -> PathBuf {
    let file = Path::new(&config.output.progress_file);
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        Path::new(&config.output.base_dir).join(file)
    }
}

enum Step<T> {
    Finished(Result<T>),
    Cancelled,
}

/// Orchestrates one run over a record store
pub struct Pipeline {
    config: Config,
    generator: DiaryGenerator,
    summarizer: PeriodSummarizer,
    artifacts: ArtifactStore,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
    cancel: CancellationToken,
    state: RunState,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn LLMProvider>, config: Config) -> Self {
        Self {
            generator: DiaryGenerator::new(Arc::clone(&provider), &config),
            summarizer: PeriodSummarizer::new(provider, &config),
            artifacts: ArtifactStore::new(&config.output.base_dir),
            config,
            events: None,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Replace the retry policy of both generation steps
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.generator = self.generator.with_retry_policy(retry.clone());
        self.summarizer = self.summarizer.with_retry_policy(retry);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn ledger_path(&self) -> PathBuf {
        ledger_path(&self.config)
    }

    /// Load the ledger the way a run does
    pub fn load_ledger(&self, overwrite: bool) -> ProgressLedger {
        let path = self.ledger_path();
        if self.config.run.recover_ledger_from_artifacts {
            ProgressLedger::load_with_recovery(path, overwrite, &self.artifacts)
        } else {
            ProgressLedger::load(path, overwrite)
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Pipeline state change");
            self.state = state;
            self.emit(PipelineEvent::StateChanged(state));
        }
    }

    fn finish(&mut self, mut report: RunReport, state: RunState) -> RunReport {
        self.set_state(state);
        report.state = state;
        info!(
            state = ?state,
            completed = report.completed(),
            skipped = report.skipped(),
            failed = report.failed(),
            periods_completed = report.periods_completed(),
            periods_failed = report.periods_failed(),
            "Run finished"
        );
        report
    }

    /// Generate diary entries for the selected dates and recompute the
    /// summaries they affect.
    ///
    /// Per-date and per-year failures are recorded in the report; only setup
    /// failures are returned as errors.
    pub async fn run(&mut self, store: &RecordStore, options: &RunOptions) -> Result<RunReport> {
        let mut report = RunReport::new();
        self.set_state(RunState::Selecting);

        let mut ledger = self.load_ledger(options.overwrite);

        for rejected in store.rejected() {
            report.buckets.insert(
                rejected.key.clone(),
                BucketOutcome::Skipped {
                    reason: rejected.reason.clone(),
                },
            );
        }

        let selection = select_buckets(store, &ledger, options.mode);
        for date in &selection.already_done {
            report.buckets.insert(
                date.format("%Y-%m-%d").to_string(),
                BucketOutcome::Skipped {
                    reason: "already completed".to_string(),
                },
            );
        }
        info!(
            mode = ?options.mode,
            overwrite = options.overwrite,
            pending = selection.pending.len(),
            already_done = selection.already_done.len(),
            rejected = store.rejected().len(),
            "Selection made"
        );
        self.emit(PipelineEvent::SelectionMade {
            selected: selection.pending.len(),
            already_done: selection.already_done.len(),
            rejected: store.rejected().len(),
        });

        // Entries already on disk join memory as the walk passes their dates.
        let mut on_disk: VecDeque<DiaryEntry> = self.artifacts.load_all_entries().into();
        let mut memory = NarrativeMemory::new();
        let mut dirty_years: BTreeSet<i32> = BTreeSet::new();
        let mut summarized: BTreeSet<i32> = BTreeSet::new();
        let total = selection.pending.len();

        for (index, date) in selection.pending.iter().copied().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(date = %date, "Run interrupted before date");
                return Ok(self.finish(report, RunState::Interrupted));
            }
            let Some(bucket) = store.get(date) else {
                continue;
            };

            replay_until(&mut memory, &mut on_disk, date);

            self.set_state(RunState::Generating);
            self.emit(PipelineEvent::BucketStarted { date, index, total });
            debug!(date = %date, memory = memory.len(), "Generating entry");

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                result = self.generator.generate(bucket, memory.snapshot_before(date)) => Step::Finished(result),
            };

            let outcome = match step {
                Step::Cancelled => {
                    warn!(date = %date, "Run interrupted during generation, entry discarded");
                    return Ok(self.finish(report, RunState::Interrupted));
                }
                Step::Finished(Ok(entry)) => {
                    match self.commit_entry(entry, &mut memory, &mut ledger) {
                        Ok(outcome) => {
                            dirty_years.insert(date.year());
                            outcome
                        }
                        Err(e) => {
                            error!(date = %date, error = %e, "Failed to persist entry");
                            BucketOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
                Step::Finished(Err(e)) => {
                    error!(date = %date, error = %e, "Failed to generate entry");
                    BucketOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            let failed = matches!(outcome, BucketOutcome::Failed { .. });
            report.buckets.insert(bucket.id(), outcome.clone());
            self.emit(PipelineEvent::BucketFinished { date, outcome });

            if failed && options.fail_fast {
                error!(date = %date, "Stopping run on first failure");
                return Ok(self.finish(report, RunState::Failed));
            }

            let next_year = selection.pending.get(index + 1).map(|d| d.year());
            if options.summarize && self.config.summary.enabled && next_year != Some(date.year()) {
                let year = date.year();
                if dirty_years.contains(&year) || ledger.summary_is_stale(year) {
                    summarized.insert(year);
                    let ok = self
                        .summarize_year(year, Some(store), &mut ledger, &mut report)
                        .await;
                    if self.cancel.is_cancelled() {
                        return Ok(self.finish(report, RunState::Interrupted));
                    }
                    if !ok && options.fail_fast {
                        return Ok(self.finish(report, RunState::Failed));
                    }
                }
            }
        }

        if options.summarize && self.config.summary.enabled {
            let remaining: Vec<i32> = ledger
                .years()
                .union(&dirty_years)
                .copied()
                .filter(|y| !summarized.contains(y))
                .filter(|y| dirty_years.contains(y) || ledger.summary_is_stale(*y))
                .collect();
            for year in remaining {
                if self.cancel.is_cancelled() {
                    return Ok(self.finish(report, RunState::Interrupted));
                }
                let ok = self
                    .summarize_year(year, Some(store), &mut ledger, &mut report)
                    .await;
                if self.cancel.is_cancelled() {
                    return Ok(self.finish(report, RunState::Interrupted));
                }
                if !ok && options.fail_fast {
                    return Ok(self.finish(report, RunState::Failed));
                }
            }
        }

        Ok(self.finish(report, RunState::Done))
    }

    /// Recompute summaries without generating entries. With `force`, every
    /// year with entries is summarized; otherwise only stale years.
    pub async fn summarize_periods(
        &mut self,
        store: Option<&RecordStore>,
        force: bool,
    ) -> Result<RunReport> {
        let mut report = RunReport::new();
        self.set_state(RunState::Selecting);
        let mut ledger = self.load_ledger(false);

        let years: BTreeSet<i32> = self
            .artifacts
            .load_all_entries()
            .iter()
            .map(|e| e.date.year())
            .collect();
        for year in years {
            if !force && !ledger.summary_is_stale(year) {
                report.periods.insert(
                    year,
                    PeriodOutcome::Skipped {
                        reason: "summary up to date".to_string(),
                    },
                );
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(self.finish(report, RunState::Interrupted));
            }
            self.summarize_year(year, store, &mut ledger, &mut report)
                .await;
            if self.cancel.is_cancelled() {
                return Ok(self.finish(report, RunState::Interrupted));
            }
        }
        Ok(self.finish(report, RunState::Done))
    }

    /// Persist a generated entry, record the date in the ledger, then extend
    /// memory. A failed step leaves the date out of both ledger and memory.
    fn commit_entry(
        &self,
        entry: DiaryEntry,
        memory: &mut NarrativeMemory,
        ledger: &mut ProgressLedger,
    ) -> Result<BucketOutcome> {
        if let Some(last) = memory.last_date().filter(|last| *last >= entry.date) {
            return Err(Error::Validation(format!(
                "entry {} would follow {} in memory",
                entry.date_id(),
                last
            )));
        }
        let path = self.artifacts.write_entry(&entry)?;
        let date = entry.date;
        let title = entry.title.clone();
        ledger.commit_done(date, Utc::now())?;
        memory.append(entry)?;
        info!(date = %date, path = %path.display(), "Entry written");
        Ok(BucketOutcome::Completed { title, path })
    }

    /// Summarize one year from the entries on disk. Returns false when the
    /// summary failed.
    async fn summarize_year(
        &mut self,
        year: i32,
        store: Option<&RecordStore>,
        ledger: &mut ProgressLedger,
        report: &mut RunReport,
    ) -> bool {
        self.set_state(RunState::Summarizing);
        self.emit(PipelineEvent::SummaryStarted { year });

        let outcome = self.summarize_year_inner(year, store, ledger).await;
        let ok = !matches!(outcome, PeriodOutcome::Failed { .. });
        report.periods.insert(year, outcome.clone());
        self.emit(PipelineEvent::SummaryFinished { year, outcome });
        ok
    }

    async fn summarize_year_inner(
        &self,
        year: i32,
        store: Option<&RecordStore>,
        ledger: &mut ProgressLedger,
    ) -> PeriodOutcome {
        let entries = self.artifacts.entries_for_year(year);
        if entries.is_empty() {
            return PeriodOutcome::Skipped {
                reason: "no entries".to_string(),
            };
        }

        if self.config.summary.partial_period_policy == PartialPeriodPolicy::Skip {
            if let Some(store) = store {
                let written: BTreeSet<NaiveDate> = entries.iter().map(|e| e.date).collect();
                let missing = store
                    .grouped_by_year()
                    .get(&year)
                    .map(|buckets| buckets.iter().filter(|b| !written.contains(&b.date)).count())
                    .unwrap_or(0);
                if missing > 0 {
                    info!(year, missing, "Period incomplete, summary deferred");
                    return PeriodOutcome::Skipped {
                        reason: format!("period incomplete, {} dates without entries", missing),
                    };
                }
            }
        }

        let previous = if self.config.summary.include_previous_summary {
            self.artifacts.load_summary(year - 1)
        } else {
            None
        };

        let step = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            result = self.summarizer.summarize(year, &entries, previous.as_ref()) => Step::Finished(result),
        };

        let summary = match step {
            Step::Cancelled => {
                warn!(year, "Summary interrupted, discarded");
                return PeriodOutcome::Skipped {
                    reason: "interrupted".to_string(),
                };
            }
            Step::Finished(Err(e)) => {
                error!(year, error = %e, "Failed to generate summary");
                return PeriodOutcome::Failed {
                    error: e.to_string(),
                };
            }
            Step::Finished(Ok(summary)) => summary,
        };

        let persisted = self.artifacts.write_summary(&summary).and_then(|path| {
            let covered = ledger.record().completed_in_year(year);
            ledger.commit_summarized(year, covered, Utc::now())?;
            Ok(path)
        });
        match persisted {
            Ok(path) => {
                info!(year, path = %path.display(), "Summary written");
                PeriodOutcome::Completed { path }
            }
            Err(e) => {
                error!(year, error = %e, "Failed to persist summary");
                PeriodOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Move persisted entries dated before `date` into memory, keeping order.
/// Entries for dates memory already covers are dropped.
fn replay_until(memory: &mut NarrativeMemory, on_disk: &mut VecDeque<DiaryEntry>, date: NaiveDate) {
    while on_disk.front().is_some_and(|e| e.date < date) {
        let Some(entry) = on_disk.pop_front() else {
            break;
        };
        if memory.last_date().map_or(true, |last| entry.date > last) {
            // Order is guaranteed by the check above.
            let _ = memory.append(entry);
        }
    }
}
