//! Markdown artifacts on disk.
//!
//! Layout under the base directory:
//!
//! ```text
//! {base}/{YYYY}/{YYYY-MM-DD}-{slug}.md
//! {base}/{YYYY}/{YYYY}-summary.md
//! ```
//!
//! These files are the durable form of the narrative; memory is rebuilt from
//! them when a run resumes.

use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::diary::{summary_filename, DiaryEntry, PeriodSummary};
use crate::records::{parse_date, DATE_FORMAT};
use crate::utils::write_atomic;
use crate::{Error, Result};

/// Reads and writes diary and summary artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn year_dir(&self, year: i32) -> PathBuf {
        self.base_dir.join(format!("{:04}", year))
    }

    /// Path the entry will be written to
    pub fn entry_path(&self, entry: &DiaryEntry) -> PathBuf {
        self.year_dir(entry.date.year()).join(entry.filename())
    }

    pub fn summary_path(&self, year: i32) -> PathBuf {
        self.year_dir(year).join(summary_filename(year))
    }

    /// Write a diary entry, replacing any earlier artifact for the same date
    pub fn write_entry(&self, entry: &DiaryEntry) -> Result<PathBuf> {
        let path = self.entry_path(entry);
        write_atomic(&path, &entry.to_markdown()).map_err(|e| {
            Error::Persistence(format!("failed to write {}: {}", path.display(), e))
        })?;

        // The new artifact is in place; a leftover old file is only logged.
        remove_superseded(&self.entry_files_for(entry.date), &path);
        Ok(path)
    }

    pub fn write_summary(&self, summary: &PeriodSummary) -> Result<PathBuf> {
        let path = self.summary_path(summary.year);
        write_atomic(&path, &summary.to_markdown()).map_err(|e| {
            Error::Persistence(format!("failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    /// Entry files whose name starts with the given date
    fn entry_files_for(&self, date: NaiveDate) -> Vec<PathBuf> {
        let prefix = format!("{}-", date.format(DATE_FORMAT));
        let mut files: Vec<PathBuf> = self
            .markdown_files(&self.year_dir(date.year()))
            .into_iter()
            .filter(|p| file_name(p).is_some_and(|n| n.starts_with(&prefix)))
            .collect();
        files.sort();
        files
    }

    fn markdown_files(&self, dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect()
    }

    fn year_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir() && file_name(p).is_some_and(|n| n.parse::<i32>().is_ok()))
            .collect();
        dirs.sort();
        dirs
    }

    /// Diary entry files across all years; summaries are excluded
    fn all_entry_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .year_dirs()
            .iter()
            .flat_map(|dir| self.markdown_files(dir))
            .filter(|p| entry_date_from_name(p).is_some())
            .collect();
        files.sort();
        files
    }

    fn read_entry(path: &Path) -> Option<DiaryEntry> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read entry, skipping");
                return None;
            }
        };
        match DiaryEntry::from_markdown(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unparseable entry, skipping");
                None
            }
        }
    }

    /// Load the entry for one date, if present
    pub fn load_entry(&self, date: NaiveDate) -> Option<DiaryEntry> {
        self.entry_files_for(date)
            .iter()
            .filter_map(|p| Self::read_entry(p))
            .find(|e| e.date == date)
    }

    /// All readable entries, one per date, in date order
    pub fn load_all_entries(&self) -> Vec<DiaryEntry> {
        let mut by_date: BTreeMap<NaiveDate, DiaryEntry> = BTreeMap::new();
        for path in self.all_entry_files() {
            if let Some(entry) = Self::read_entry(&path) {
                by_date.entry(entry.date).or_insert(entry);
            }
        }
        by_date.into_values().collect()
    }

    /// Entries of one calendar year, in date order
    pub fn entries_for_year(&self, year: i32) -> Vec<DiaryEntry> {
        let mut by_date: BTreeMap<NaiveDate, DiaryEntry> = BTreeMap::new();
        let mut files: Vec<PathBuf> = self
            .markdown_files(&self.year_dir(year))
            .into_iter()
            .filter(|p| entry_date_from_name(p).is_some())
            .collect();
        files.sort();
        for path in files {
            if let Some(entry) = Self::read_entry(&path) {
                if entry.date.year() == year {
                    by_date.entry(entry.date).or_insert(entry);
                }
            }
        }
        by_date.into_values().collect()
    }

    pub fn load_summary(&self, year: i32) -> Option<PeriodSummary> {
        let path = self.summary_path(year);
        let content = std::fs::read_to_string(&path).ok()?;
        match PeriodSummary::from_markdown(&content) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unparseable summary, ignoring");
                None
            }
        }
    }

    /// Dates with a readable entry artifact present
    pub fn entry_dates(&self) -> BTreeSet<NaiveDate> {
        self.load_all_entries().into_iter().map(|e| e.date).collect()
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn entry_date_from_name(path: &Path) -> Option<NaiveDate> {
    let name = file_name(path)?;
    let prefix = name.get(..10)?;
    if name.as_bytes().get(10) != Some(&b'-') {
        return None;
    }
    parse_date(prefix).ok()
}

/// Remove every file in `candidates` except `keep`; returns how many went
fn remove_superseded(candidates: &[PathBuf], keep: &Path) -> usize {
    let mut removed = 0;
    for stale in candidates.iter().filter(|p| p.as_path() != keep) {
        debug!(path = %stale.display(), "Removing superseded entry");
        match std::fs::remove_file(stale) {
            Ok(()) => removed += 1,
            Err(e) => warn!(
                path = %stale.display(),
                error = %e,
                "Failed to remove superseded entry"
            ),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_write_entry_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        let entry = DiaryEntry::new(date("2023-01-08"), "First day", "Body text");

        let path = store.write_entry(&entry).unwrap();
        assert_eq!(
            path,
            temp_dir.path().join("2023").join("2023-01-08-First_day.md")
        );
        assert_eq!(store.load_entry(date("2023-01-08")), Some(entry));
    }

    #[test]
    fn test_rewrite_with_new_title_leaves_single_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        store
            .write_entry(&DiaryEntry::new(date("2023-01-08"), "Old title", "old"))
            .unwrap();
        store
            .write_entry(&DiaryEntry::new(date("2023-01-08"), "New title", "new"))
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(temp_dir.path().join("2023"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(store.load_entry(date("2023-01-08")).unwrap().body, "new");
    }

    #[test]
    fn test_superseded_removal_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let keep = temp.path().join("2023-01-08-new.md");
        let old = temp.path().join("2023-01-08-old.md");
        let vanished = temp.path().join("2023-01-08-gone.md");
        std::fs::write(&keep, "new").unwrap();
        std::fs::write(&old, "old").unwrap();

        let removed = remove_superseded(&[vanished, old.clone(), keep.clone()], &keep);
        assert_eq!(removed, 1);
        assert!(keep.exists());
        assert!(!old.exists());
    }

    #[test]
    fn test_multiline_title_entry_loads_back() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let entry = DiaryEntry::new(date("2023-01-08"), "Morning\nEvening", "Body");
        let path = store.write_entry(&entry).unwrap();
        assert!(path.ends_with("2023/2023-01-08-Morning_Evening.md"));

        let loaded = store.load_all_entries();
        assert_eq!(loaded, vec![entry.clone()]);
        assert_eq!(store.entries_for_year(2023), vec![entry]);
        assert!(store.entry_dates().contains(&date("2023-01-08")));
    }

    #[test]
    fn test_load_all_entries_in_date_order_skips_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        store
            .write_entry(&DiaryEntry::new(date("2023-02-01"), "b", "2"))
            .unwrap();
        store
            .write_entry(&DiaryEntry::new(date("2022-12-31"), "a", "1"))
            .unwrap();
        store
            .write_summary(&PeriodSummary::new(2022, "Year", "sum"))
            .unwrap();
        std::fs::write(temp_dir.path().join("2023").join("2023-03-01-x.md"), "junk").unwrap();
        std::fs::write(temp_dir.path().join("2023").join("notes.md"), "# n").unwrap();

        let entries = store.load_all_entries();
        let dates: Vec<String> = entries.iter().map(|e| e.date_id()).collect();
        assert_eq!(dates, vec!["2022-12-31", "2023-02-01"]);
        assert_eq!(store.entries_for_year(2023).len(), 1);

        assert_eq!(store.entry_dates().len(), 2);
    }

    #[test]
    fn test_summary_round_trip_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        assert!(store.load_summary(2023).is_none());

        let summary = PeriodSummary::new(2023, "Looking back", "A long year.");
        let path = store.write_summary(&summary).unwrap();
        assert_eq!(path, temp_dir.path().join("2023").join("2023-summary.md"));
        assert_eq!(store.load_summary(2023), Some(summary));
        assert!(store.load_all_entries().is_empty());
    }

    #[test]
    fn test_missing_base_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path().join("absent"));
        assert!(store.load_all_entries().is_empty());
        assert!(store.entry_dates().is_empty());
    }
}
