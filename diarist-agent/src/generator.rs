//! Diary entry generation for one date

use std::sync::Arc;
use tracing::{debug, info};

use diarist_core::config::{Config, LlmConfig};
use diarist_core::{DiaryEntry, Error, Result, TimeBucket};
use diarist_providers::{LLMProvider, Message, RetryPolicy};

use crate::context::ContextBuilder;
use crate::structured::parse_titled;

/// Fixed sampling settings sent with every request
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&LlmConfig> for ChatSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Send `messages` under the retry policy and return the raw text of the
/// first response that `accept` turns into a value
pub(crate) async fn complete_with<T, F>(
    provider: &Arc<dyn LLMProvider>,
    settings: &ChatSettings,
    retry: &RetryPolicy,
    label: &str,
    messages: Vec<Message>,
    accept: F,
) -> Result<T>
where
    F: Fn(&str) -> Result<T>,
{
    retry
        .run(label, |attempt| {
            let provider = Arc::clone(provider);
            let messages = messages.clone();
            let settings = settings.clone();
            let accept = &accept;
            async move {
                debug!(task = label, attempt = attempt + 1, "Calling generation backend");
                let response = provider
                    .chat(
                        messages,
                        Some(settings.model),
                        settings.max_tokens,
                        settings.temperature,
                    )
                    .await?;
                let text = response
                    .content
                    .ok_or_else(|| Error::Generation("empty response".to_string()))?;
                accept(&text)
            }
        })
        .await
}

/// Turns one date's conversations plus prior entries into a diary entry
pub struct DiaryGenerator {
    provider: Arc<dyn LLMProvider>,
    context: ContextBuilder,
    settings: ChatSettings,
    retry: RetryPolicy,
}

impl DiaryGenerator {
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

    /// Generate the entry for `bucket`.
    ///
    /// `memory` is the narrative so far and must not reach the bucket's date.
    pub async fn generate(&self, bucket: &TimeBucket, memory: &[DiaryEntry]) -> Result<DiaryEntry> {
        if let Some(future) = memory.iter().find(|e| e.date >= bucket.date) {
            return Err(Error::Validation(format!(
                "memory for {} contains entry dated {}",
                bucket.id(),
                future.date_id()
            )));
        }
        if bucket.records.is_empty() {
            return Err(Error::MalformedInput(format!(
                "{} has no qualifying records",
                bucket.id()
            )));
        }

        let messages = self.context.build_entry_messages(bucket, memory);
        let label = format!("entry {}", bucket.id());
        let date = bucket.date;
        let entry = complete_with(
            &self.provider,
            &self.settings,
            &self.retry,
            &label,
            messages,
            |text| parse_titled(text).map(|(title, body)| DiaryEntry::new(date, title, body)),
        )
        .await?;

        info!(date = %bucket.id(), title = %entry.title, "Diary entry generated");
        Ok(entry)
    }
}
