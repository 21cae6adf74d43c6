//! Durable progress ledger.
//!
//! One JSON document records which dates are finished and which entry set
//! each yearly summary was built from. It is rewritten atomically after every
//! completed date and every summary, so a crash loses at most the date that
//! was in flight.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::ArtifactStore;
use crate::utils::write_atomic;
use crate::{Error, Result};

/// Entry set a yearly summary was last computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub entries: BTreeSet<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub processed_dates: BTreeSet<NaiveDate>,
    #[serde(default)]
    pub last_processed: Option<NaiveDate>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summaries: BTreeMap<i32, SummaryRecord>,
}

impl ProgressRecord {
    fn mark_done(&mut self, date: NaiveDate, at: DateTime<Utc>) {
        self.processed_dates.insert(date);
        self.last_processed = Some(date);
        self.last_updated = Some(at);
    }

    fn mark_summarized(&mut self, year: i32, entries: BTreeSet<NaiveDate>, at: DateTime<Utc>) {
        self.summaries.insert(
            year,
            SummaryRecord {
                entries,
                updated_at: at,
            },
        );
        self.last_updated = Some(at);
    }

    /// Completed dates falling in one year
    pub fn completed_in_year(&self, year: i32) -> BTreeSet<NaiveDate> {
        self.processed_dates
            .iter()
            .filter(|d| d.year() == year)
            .copied()
            .collect()
    }
}

/// Tracks completed dates for one run
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    record: ProgressRecord,
    overwrite: bool,
}

impl ProgressLedger {
    /// Read the ledger file.
    ///
    /// An absent file is empty progress; unreadable content is
    /// [`Error::LedgerCorruption`].
    pub fn read(path: &Path) -> Result<ProgressRecord> {
        if !path.exists() {
            return Ok(ProgressRecord::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::LedgerCorruption(format!("{}: {}", path.display(), e)))?;
        if content.trim().is_empty() {
            return Err(Error::LedgerCorruption(format!("{} is empty", path.display())));
        }
        serde_json::from_str(&content)
            .map_err(|e| Error::LedgerCorruption(format!("{}: {}", path.display(), e)))
    }

    /// Load the ledger, treating corruption as empty progress
    pub fn load<P: AsRef<Path>>(path: P, overwrite: bool) -> Self {
        let path = path.as_ref().to_path_buf();
        let record = match Self::read(&path) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Progress ledger unreadable, starting from empty progress");
                ProgressRecord::default()
            }
        };
        Self {
            path,
            record,
            overwrite,
        }
    }

    /// Load the ledger; on corruption, re-derive completed dates from the
    /// diary artifacts present on disk
    pub fn load_with_recovery<P: AsRef<Path>>(
        path: P,
        overwrite: bool,
        artifacts: &ArtifactStore,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let record = match Self::read(&path) {
            Ok(record) => record,
            Err(e) => {
                let dates = artifacts.entry_dates();
                warn!(
                    error = %e,
                    recovered = dates.len(),
                    "Progress ledger unreadable, recovering completed dates from artifacts"
                );
                ProgressRecord {
                    last_processed: dates.iter().next_back().copied(),
                    last_updated: Some(Utc::now()),
                    processed_dates: dates,
                    summaries: BTreeMap::new(),
                }
            }
        };
        Self {
            path,
            record,
            overwrite,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    /// Whether the date should be skipped; always false under overwrite
    pub fn is_done(&self, date: NaiveDate) -> bool {
        !self.overwrite && self.is_recorded(date)
    }

    /// Whether the date is recorded as completed, regardless of overwrite
    pub fn is_recorded(&self, date: NaiveDate) -> bool {
        self.record.processed_dates.contains(&date)
    }

    /// Record a completed date. Calling it twice for the same date is harmless.
    pub fn mark_done(&mut self, date: NaiveDate, at: DateTime<Utc>) {
        self.record.mark_done(date, at);
    }

    /// Record the entry set a year's summary was computed from
    pub fn mark_summarized(&mut self, year: i32, entries: BTreeSet<NaiveDate>, at: DateTime<Utc>) {
        self.record.mark_summarized(year, entries, at);
    }

    /// Mark a date done and persist it. If the write fails the ledger keeps
    /// its previous state.
    pub fn commit_done(&mut self, date: NaiveDate, at: DateTime<Utc>) -> Result<()> {
        self.commit(|record| record.mark_done(date, at))
    }

    /// Record a year's summary and persist it, with the same guarantee as
    /// [`ProgressLedger::commit_done`]
    pub fn commit_summarized(
        &mut self,
        year: i32,
        entries: BTreeSet<NaiveDate>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.commit(|record| record.mark_summarized(year, entries, at))
    }

    fn commit<F: FnOnce(&mut ProgressRecord)>(&mut self, apply: F) -> Result<()> {
        let mut next = self.record.clone();
        apply(&mut next);
        write_record(&self.path, &next)?;
        self.record = next;
        Ok(())
    }

    /// A summary is stale when the year's completed dates differ from the set
    /// it was last computed from, or when none was recorded
    pub fn summary_is_stale(&self, year: i32) -> bool {
        match self.record.summaries.get(&year) {
            Some(summary) => summary.entries != self.record.completed_in_year(year),
            None => true,
        }
    }

    /// Years with at least one completed date
    pub fn years(&self) -> BTreeSet<i32> {
        self.record.processed_dates.iter().map(|d| d.year()).collect()
    }

    /// Write the ledger atomically
    pub fn persist(&self) -> Result<()> {
        write_record(&self.path, &self.record)
    }

    /// Drop all recorded progress and persist the empty ledger
    pub fn reset(&mut self) -> Result<()> {
        info!(path = %self.path.display(), "Resetting progress ledger");
        self.record = ProgressRecord::default();
        self.persist()
    }
}

fn write_record(path: &Path, record: &ProgressRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    write_atomic(path, &json).map_err(|e| {
        Error::Persistence(format!("failed to write ledger {}: {}", path.display(), e))
    })
}
