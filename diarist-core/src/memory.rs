//! Narrative memory: the diary written so far, used as context for the next
//! date.

use chrono::NaiveDate;

use crate::diary::DiaryEntry;
use crate::{Error, Result};

/// Prior entries in strictly increasing date order
#[derive(Debug, Clone, Default)]
pub struct NarrativeMemory {
    entries: Vec<DiaryEntry>,
}

impl NarrativeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild memory from persisted entries. Entries are sorted by date and
    /// only the first entry per date is kept.
    pub fn rebuild(mut entries: Vec<DiaryEntry>) -> Self {
        entries.sort_by_key(|e| e.date);
        entries.dedup_by_key(|e| e.date);
        Self { entries }
    }

    /// Add an entry at the end. Its date must be later than every entry
    /// already held.
    pub fn append(&mut self, entry: DiaryEntry) -> Result<()> {
        if let Some(last) = self.last_date() {
            if entry.date <= last {
                return Err(Error::Validation(format!(
                    "memory entry {} is not after {}",
                    entry.date, last
                )));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// All entries in date order
    pub fn snapshot(&self) -> &[DiaryEntry] {
        &self.entries
    }

    /// Entries strictly before `date`
    pub fn snapshot_before(&self, date: NaiveDate) -> &[DiaryEntry] {
        let end = self.entries.partition_point(|e| e.date < date);
        &self.entries[..end]
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.entries.last().map(|e| e.date)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(d: &str) -> DiaryEntry {
        DiaryEntry::new(
            NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap(),
            format!("title {}", d),
            "body",
        )
    }

    #[test]
    fn test_append_in_order() {
        let mut memory = NarrativeMemory::new();
        memory.append(entry("2023-01-08")).unwrap();
        memory.append(entry("2023-01-09")).unwrap();
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.last_date(), Some(entry("2023-01-09").date));
    }

    #[test]
    fn test_append_out_of_order_rejected() {
        let mut memory = NarrativeMemory::new();
        memory.append(entry("2023-01-09")).unwrap();
        assert!(memory.append(entry("2023-01-08")).is_err());
        assert!(memory.append(entry("2023-01-09")).is_err());
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_rebuild_sorts_and_dedups() {
        let memory = NarrativeMemory::rebuild(vec![
            entry("2023-01-09"),
            entry("2022-12-31"),
            entry("2023-01-09"),
        ]);
        let dates: Vec<String> = memory.snapshot().iter().map(|e| e.date_id()).collect();
        assert_eq!(dates, vec!["2022-12-31", "2023-01-09"]);
    }

    #[test]
    fn test_snapshot_before_excludes_same_and_later_dates() {
        let memory = NarrativeMemory::rebuild(vec![
            entry("2023-01-07"),
            entry("2023-01-08"),
            entry("2023-01-10"),
        ]);
        let before = memory.snapshot_before(entry("2023-01-08").date);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].date_id(), "2023-01-07");
        assert!(memory.snapshot_before(entry("2023-01-01").date).is_empty());
    }
}
