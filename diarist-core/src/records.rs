//! Read-only view over dated conversational records.
//!
//! The input is a JSON object mapping ISO dates to arrays of records. Each
//! date becomes a [`TimeBucket`] once short or non-conversational messages
//! are filtered out; dates whose records cannot be interpreted are kept
//! aside as [`RejectedBucket`]s instead of failing the whole load.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Date format used for bucket identifiers and artifact names
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Who said something in a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
    Other(String),
}

impl Speaker {
    fn from_author(author: &str) -> Self {
        match author.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Speaker::User,
            "assistant" | "ai" => Speaker::Assistant,
            other => Speaker::Other(other.to_string()),
        }
    }

    /// Only the two sides of the conversation feed the diary
    pub fn is_conversational(&self) -> bool {
        matches!(self, Speaker::User | Speaker::Assistant)
    }
}

/// One message inside a record
#[derive(Debug, Clone)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
}

/// One exchange or message group
#[derive(Debug, Clone)]
pub struct ConversationalRecord {
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub utterances: Vec<Utterance>,
}

impl ConversationalRecord {
    /// Plain text of the record, one utterance per line
    pub fn content(&self) -> String {
        self.utterances
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Length of the content in characters
    pub fn len(&self) -> usize {
        self.utterances.iter().map(|u| u.text.chars().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }
}

/// All qualifying records for one calendar date
#[derive(Debug, Clone)]
pub struct TimeBucket {
    pub date: NaiveDate,
    /// Ordered by timestamp
    pub records: Vec<ConversationalRecord>,
}

impl TimeBucket {
    /// Bucket identifier, the ISO date
    pub fn id(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }
}

/// A date key whose records could not be interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedBucket {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default, alias = "role")]
    author: Option<String>,
    #[serde(default, alias = "content")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "timestamp")]
    create_time: Option<f64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    messages: Option<Vec<RawMessage>>,
}

/// Parse an ISO date string into a bucket date
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| Error::MalformedInput(format!("invalid date '{}': {}", raw, e)))
}

fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// In-memory store of time buckets, keyed and ordered by date
#[derive(Debug, Default)]
pub struct RecordStore {
    buckets: BTreeMap<NaiveDate, TimeBucket>,
    rejected: Vec<RejectedBucket>,
    dropped_records: usize,
}

impl RecordStore {
    /// Load the store from a JSON file
    pub fn from_path<P: AsRef<Path>>(path: P, min_message_length: usize) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::MalformedInput(format!("cannot read input {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content, min_message_length)
    }

    /// Load the store from JSON text
    pub fn from_json_str(content: &str, min_message_length: usize) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::MalformedInput(format!("input is not valid JSON: {}", e)))?;
        Self::from_value(value, min_message_length)
    }

    /// Build the store from a parsed JSON value.
    ///
    /// Fails only when the top level is not an object; per-date problems are
    /// collected in [`RecordStore::rejected`].
    pub fn from_value(value: Value, min_message_length: usize) -> Result<Self> {
        let Value::Object(by_date) = value else {
            return Err(Error::MalformedInput(
                "input must be an object mapping dates to records".to_string(),
            ));
        };

        let mut store = RecordStore::default();
        for (key, records) in by_date {
            match Self::build_bucket(&key, records, min_message_length) {
                Ok((Some(bucket), dropped)) => {
                    store.dropped_records += dropped;
                    store.insert_bucket(&key, bucket);
                }
                Ok((None, dropped)) => {
                    store.dropped_records += dropped;
                    debug!(date = %key, "No qualifying records, date excluded");
                }
                Err(e) => {
                    warn!(date = %key, error = %e, "Rejecting malformed date");
                    store.rejected.push(RejectedBucket {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        store.rejected.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(
            buckets = store.buckets.len(),
            rejected = store.rejected.len(),
            dropped_records = store.dropped_records,
            "Record store loaded"
        );
        Ok(store)
    }

    /// Add a bucket, merging with one already stored for the same date.
    /// Keys such as `2023-1-8` and `2023-01-08` name the same day.
    fn insert_bucket(&mut self, key: &str, bucket: TimeBucket) {
        match self.buckets.get_mut(&bucket.date) {
            Some(existing) => {
                warn!(
                    date = %existing.id(),
                    key = %key,
                    records = bucket.records.len(),
                    "Merging records from a second key for the same date"
                );
                existing.records.extend(bucket.records);
                existing.records.sort_by_key(|r| r.timestamp);
            }
            None => {
                self.buckets.insert(bucket.date, bucket);
            }
        }
    }

    fn build_bucket(
        key: &str,
        records: Value,
        min_message_length: usize,
    ) -> Result<(Option<TimeBucket>, usize)> {
        let date = parse_date(key)?;
        let raw_records: Vec<RawRecord> = serde_json::from_value(records)
            .map_err(|e| Error::MalformedInput(format!("records for {}: {}", key, e)))?;

        let mut kept = Vec::new();
        let mut dropped = 0;
        for (index, raw) in raw_records.into_iter().enumerate() {
            let record = Self::build_record(key, index, raw, min_message_length)?;
            if record.is_empty() {
                dropped += 1;
            } else {
                kept.push(record);
            }
        }

        if kept.is_empty() {
            return Ok((None, dropped));
        }
        kept.sort_by_key(|r| r.timestamp);
        Ok((Some(TimeBucket { date, records: kept }), dropped))
    }

    fn build_record(
        key: &str,
        index: usize,
        raw: RawRecord,
        min_message_length: usize,
    ) -> Result<ConversationalRecord> {
        let secs = raw.create_time.ok_or_else(|| {
            Error::MalformedInput(format!("record {} on {} has no timestamp", index, key))
        })?;
        let timestamp = timestamp_from_secs(secs).ok_or_else(|| {
            Error::MalformedInput(format!("record {} on {} has an invalid timestamp", index, key))
        })?;

        let utterances: Vec<Utterance> = match (raw.messages, raw.content) {
            (Some(messages), _) => messages
                .into_iter()
                .filter_map(|m| {
                    let text = m.text?.trim().to_string();
                    let speaker = Speaker::from_author(m.author.as_deref().unwrap_or_default());
                    Some(Utterance { speaker, text })
                })
                .collect(),
            (None, Some(content)) => vec![Utterance {
                speaker: Speaker::User,
                text: content.trim().to_string(),
            }],
            (None, None) => {
                return Err(Error::MalformedInput(format!(
                    "record {} on {} has neither messages nor content",
                    index, key
                )))
            }
        };

        let utterances = utterances
            .into_iter()
            .filter(|u| u.speaker.is_conversational())
            .filter(|u| !u.text.is_empty() && u.text.chars().count() >= min_message_length)
            .collect();

        Ok(ConversationalRecord {
            title: raw.title.filter(|t| !t.trim().is_empty()),
            timestamp,
            utterances,
        })
    }

    /// Buckets in strictly increasing date order
    pub fn buckets_in_order(&self) -> Vec<&TimeBucket> {
        self.buckets.values().collect()
    }

    /// Buckets grouped by calendar year, date order kept within each year
    pub fn grouped_by_year(&self) -> BTreeMap<i32, Vec<&TimeBucket>> {
        let mut years: BTreeMap<i32, Vec<&TimeBucket>> = BTreeMap::new();
        for bucket in self.buckets.values() {
            years.entry(bucket.year()).or_default().push(bucket);
        }
        years
    }

    pub fn get(&self, date: NaiveDate) -> Option<&TimeBucket> {
        self.buckets.get(&date)
    }

    /// Dates rejected as malformed, sorted by key
    pub fn rejected(&self) -> &[RejectedBucket] {
        &self.rejected
    }

    /// Records dropped by the minimum-length filter
    pub fn dropped_records(&self) -> usize {
        self.dropped_records
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation(title: &str, ts: f64, user: &str, assistant: &str) -> Value {
        json!({
            "title": title,
            "create_time": ts,
            "messages": [
                {"author": "user", "text": user},
                {"author": "assistant", "text": assistant}
            ]
        })
    }

    #[test]
    fn test_buckets_strictly_increasing_despite_insertion_order() {
        let input = json!({
            "2023-03-01": [conversation("c", 1677628800.0, "third day question", "an answer here")],
            "2022-12-31": [conversation("a", 1672444800.0, "first day question", "an answer here")],
            "2023-01-15": [conversation("b", 1673740800.0, "second day question", "an answer here")],
        });
        let store = RecordStore::from_value(input, 5).unwrap();
        let ids: Vec<String> = store.buckets_in_order().iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec!["2022-12-31", "2023-01-15", "2023-03-01"]);
        for pair in store.buckets_in_order().windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
    }

    #[test]
    fn test_grouped_by_year_preserves_order() {
        let input = json!({
            "2023-02-02": [conversation("x", 1675296000.0, "some long message", "another long one")],
            "2022-05-05": [conversation("y", 1651708800.0, "some long message", "another long one")],
            "2023-01-01": [conversation("z", 1672531200.0, "some long message", "another long one")],
        });
        let store = RecordStore::from_value(input, 5).unwrap();
        let years = store.grouped_by_year();
        assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![2022, 2023]);
        let ids_2023: Vec<String> = years[&2023].iter().map(|b| b.id()).collect();
        assert_eq!(ids_2023, vec!["2023-01-01", "2023-02-02"]);
    }

    #[test]
    fn test_records_sorted_by_timestamp_within_bucket() {
        let input = json!({
            "2023-01-08": [
                conversation("late", 1673190000.0, "evening question", "evening answer"),
                conversation("early", 1673150000.0, "morning question", "morning answer"),
            ]
        });
        let store = RecordStore::from_value(input, 5).unwrap();
        let bucket = store.buckets_in_order()[0];
        assert_eq!(bucket.records[0].title.as_deref(), Some("early"));
        assert_eq!(bucket.records[1].title.as_deref(), Some("late"));
    }

    #[test]
    fn test_short_messages_dropped_and_empty_bucket_excluded() {
        let input = json!({
            "2023-01-08": [conversation("tiny", 1673150000.0, "hi", "yo")],
            "2023-01-09": [
                conversation("tiny", 1673236400.0, "ok", "k"),
                conversation("real", 1673236500.0, "a meaningful question", "a meaningful answer"),
            ],
        });
        let store = RecordStore::from_value(input, 10).unwrap();
        assert_eq!(store.len(), 1);
        let bucket = store.buckets_in_order()[0];
        assert_eq!(bucket.id(), "2023-01-09");
        assert_eq!(bucket.records.len(), 1);
        assert_eq!(store.dropped_records(), 2);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let input = json!({
            "2023-01-08": [{"timestamp": 1673150000.0, "content": "exactly10!"}]
        });
        let store = RecordStore::from_value(input.clone(), 10).unwrap();
        assert_eq!(store.len(), 1);
        let store = RecordStore::from_value(input, 11).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_non_conversational_authors_ignored() {
        let input = json!({
            "2023-01-08": [{
                "title": "sys",
                "create_time": 1673150000.0,
                "messages": [
                    {"author": "system", "text": "You are a helpful assistant."},
                    {"author": "tool", "text": "tool output that is long enough"}
                ]
            }]
        });
        let store = RecordStore::from_value(input, 1).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_dates_are_rejected_not_fatal() {
        let input = json!({
            "not-a-date": [conversation("a", 1673150000.0, "valid question", "valid answer")],
            "2023-01-09": [{"title": "no content", "create_time": 1673236400.0}],
            "2023-01-10": [{"title": "no timestamp", "content": "something long enough"}],
            "2023-01-11": [conversation("ok", 1673409200.0, "valid question", "valid answer")],
        });
        let store = RecordStore::from_value(input, 5).unwrap();
        assert_eq!(store.len(), 1);
        let rejected: Vec<&str> = store.rejected().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(rejected, vec!["2023-01-09", "2023-01-10", "not-a-date"]);
        assert!(store.rejected()[2].reason.contains("invalid date"));
    }

    #[test]
    fn test_keys_for_the_same_day_are_merged() {
        let input = json!({
            "2023-01-08": [conversation("late", 1673200000.0, "an evening question", "an answer here")],
            "2023-1-8": [conversation("early", 1673160000.0, "a morning question", "an answer here")],
        });
        let store = RecordStore::from_value(input, 5).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.rejected().is_empty());

        let bucket = store.buckets_in_order()[0];
        assert_eq!(bucket.id(), "2023-01-08");
        let titles: Vec<_> = bucket.records.iter().map(|r| r.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("early"), Some("late")]);
    }

    #[test]
    fn test_top_level_must_be_object() {
        let err = RecordStore::from_value(json!([1, 2, 3]), 5).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_deterministic_across_loads() {
        let text = r#"{
            "2023-01-09": [{"create_time": 1673236400.0, "content": "second entry text"}],
            "2023-01-08": [{"create_time": 1673150000.0, "content": "first entry text"}]
        }"#;
        let a = RecordStore::from_json_str(text, 5).unwrap();
        let b = RecordStore::from_json_str(text, 5).unwrap();
        let ids_a: Vec<String> = a.buckets_in_order().iter().map(|x| x.id()).collect();
        let ids_b: Vec<String> = b.buckets_in_order().iter().map(|x| x.id()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
