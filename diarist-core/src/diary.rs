//! Diary entry and period summary data structures

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{parse_date, DATE_FORMAT};
use crate::utils::{single_line, slugify};
use crate::{Error, Result};

const DATE_MARKER: &str = "**Date**:";
const YEAR_MARKER: &str = "**Year**:";

/// Generated narrative for one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub date: NaiveDate,
    pub title: String,
    pub body: String,
}

impl DiaryEntry {
    /// The title is kept on one line so it survives the markdown heading.
    pub fn new(date: NaiveDate, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            date,
            title: single_line(&title.into()),
            body: body.into(),
        }
    }

    /// ISO date of the entry
    pub fn date_id(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    /// Artifact file name, `{date}-{slug}.md`
    pub fn filename(&self) -> String {
        format!("{}-{}.md", self.date_id(), slugify(&self.title))
    }

    /// Render as markdown
    pub fn to_markdown(&self) -> String {
        format!(
            "# {}\n\n{} {}\n\n{}\n",
            single_line(&self.title),
            DATE_MARKER,
            self.date_id(),
            self.body.trim()
        )
    }

    /// Parse an entry previously written by [`DiaryEntry::to_markdown`]
    pub fn from_markdown(content: &str) -> Result<Self> {
        let (title, marker_value, body) = split_artifact(content, DATE_MARKER)?;
        let date = parse_date(&marker_value)?;
        Ok(Self { date, title, body })
    }
}

/// Generated narrative for one calendar year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub year: i32,
    pub title: String,
    pub body: String,
}

impl PeriodSummary {
    pub fn new(year: i32, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            year,
            title: single_line(&title.into()),
            body: body.into(),
        }
    }

    /// Artifact file name, `{year}-summary.md`
    pub fn filename(&self) -> String {
        summary_filename(self.year)
    }

    pub fn to_markdown(&self) -> String {
        format!(
            "# {}\n\n{} {}\n\n{}\n",
            single_line(&self.title),
            YEAR_MARKER,
            self.year,
            self.body.trim()
        )
    }

    pub fn from_markdown(content: &str) -> Result<Self> {
        let (title, marker_value, body) = split_artifact(content, YEAR_MARKER)?;
        let year = marker_value
            .parse::<i32>()
            .map_err(|e| Error::Serialization(format!("invalid year '{}': {}", marker_value, e)))?;
        Ok(Self { year, title, body })
    }
}

pub(crate) fn summary_filename(year: i32) -> String {
    format!("{}-summary.md", year)
}

/// Split `# title`, `marker value` and the remaining body
fn split_artifact(content: &str, marker: &str) -> Result<(String, String, String)> {
    let mut lines = content.lines();

    let title = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .ok_or_else(|| Error::Serialization("artifact has no title heading".to_string()))?;

    let marker_value = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().strip_prefix(marker))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| Error::Serialization(format!("artifact has no '{}' line", marker)))?;

    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    Ok((title, marker_value, body))
}
