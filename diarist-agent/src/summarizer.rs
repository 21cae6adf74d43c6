//! Yearly summaries folded from a period's diary entries

use chrono::Datelike;
use std::sync::Arc;
use tracing::info;

use diarist_core::config::Config;
use diarist_core::{DiaryEntry, Error, PeriodSummary, Result};
use diarist_providers::{LLMProvider, RetryPolicy};

use crate::context::ContextBuilder;
use crate::generator::{complete_with, ChatSettings};
use crate::structured::parse_titled;

pub struct PeriodSummarizer {
    provider: Arc<dyn LLMProvider>,
    context: ContextBuilder,
    settings: ChatSettings,
    retry: RetryPolicy,
}

impl PeriodSummarizer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &Config) -> Self {
        Self {
            provider,
            context: ContextBuilder::from_config(config),
            settings: ChatSettings::from(&config.llm),
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Summarize `year` from its complete, date-ordered entry set. The
    /// summary is always recomputed from scratch.
    pub async fn summarize(
        &self,
        year: i32,
        entries: &[DiaryEntry],
        previous: Option<&PeriodSummary>,
    ) -> Result<PeriodSummary> {
        if entries.is_empty() {
            return Err(Error::Validation(format!("{} has no entries to summarize", year)));
        }
        if let Some(foreign) = entries.iter().find(|e| e.date.year() != year) {
            return Err(Error::Validation(format!(
                "entry {} does not belong to {}",
                foreign.date_id(),
                year
            )));
        }
        let previous = previous.filter(|p| p.year < year);

        let messages = self.context.build_summary_messages(year, entries, previous);
        let label = format!("summary {}", year);
        let summary = complete_with(
            &self.provider,
            &self.settings,
            &self.retry,
            &label,
            messages,
            |text| parse_titled(text).map(|(title, body)| PeriodSummary::new(year, title, body)),
        )
        .await?;

        info!(year, entries = entries.len(), title = %summary.title, "Period summary generated");
        Ok(summary)
    }
}
