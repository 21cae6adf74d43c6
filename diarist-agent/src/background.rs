//! Year-by-year background derived from a plain biography

use std::sync::Arc;
use tracing::{info, warn};

use diarist_core::config::{BackgroundConfig, Config};
use diarist_core::{Error, Result};
use diarist_providers::{LLMProvider, RetryPolicy};

use crate::context::build_background_messages;
use crate::generator::{complete_with, ChatSettings};
use crate::structured::parse_string_map;

/// Key holding everything before the first requested year
pub const BEFORE_KEY: &str = "before";

pub struct BackgroundDeriver {
    provider: Arc<dyn LLMProvider>,
    settings: ChatSettings,
    retry: RetryPolicy,
}

impl BackgroundDeriver {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &Config) -> Self {
        Self {
            provider,
            settings: ChatSettings::from(&config.llm),
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the backend to split `biography` into notes for each year in
    /// `first_year..=last_year`, plus a note for everything earlier
    pub async fn derive(
        &self,
        biography: &str,
        first_year: i32,
        last_year: i32,
    ) -> Result<BackgroundConfig> {
        if biography.trim().is_empty() {
            return Err(Error::Validation("biography text is empty".to_string()));
        }
        if first_year > last_year {
            return Err(Error::Validation(format!(
                "year range {}..{} is empty",
                first_year, last_year
            )));
        }

        let messages = build_background_messages(biography, first_year, last_year);
        let notes = complete_with(
            &self.provider,
            &self.settings,
            &self.retry,
            "background",
            messages,
            parse_string_map,
        )
        .await?;

        let mut background = BackgroundConfig::default();
        for (key, value) in notes {
            if key.trim().eq_ignore_ascii_case(BEFORE_KEY) {
                background.text = value;
                continue;
            }
            match key.trim().parse::<i32>() {
                Ok(year) if (first_year..=last_year).contains(&year) => {
                    background.by_year.insert(year.to_string(), value);
                }
                _ => warn!(key = %key, "Ignoring background note outside the requested years"),
            }
        }
        info!(years = background.by_year.len(), "Background derived");
        Ok(background)
    }
}
