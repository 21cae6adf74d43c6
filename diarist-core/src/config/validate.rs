//! Configuration validation rules.

use super::schema::{Config, PLACEHOLDER_API_BASE};

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.llm.model.trim().is_empty() {
        errors.push("llm.model must not be empty".to_string());
    }
    if config.llm.api_base.trim().is_empty() {
        errors.push("llm.api_base must not be empty".to_string());
    }
    if config.llm.max_tokens == 0 {
        errors.push("llm.max_tokens must be > 0".to_string());
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        errors.push("llm.temperature must be in [0.0, 2.0]".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be > 0".to_string());
    }
    if config.retry.timeout_secs == 0 {
        errors.push("retry.timeout_secs must be > 0".to_string());
    }
    if config.retry.backoff_multiplier < 1.0 {
        errors.push("retry.backoff_multiplier must be >= 1.0".to_string());
    }
    if config.retry.initial_delay_ms > config.retry.max_delay_ms {
        errors.push("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
    }

    if config.diary.max_message_chars == 0 {
        errors.push("diary.max_message_chars must be > 0".to_string());
    }

    if config.output.base_dir.trim().is_empty() {
        errors.push("output.base_dir must not be empty".to_string());
    }
    if config.output.progress_file.trim().is_empty() {
        errors.push("output.progress_file must not be empty".to_string());
    }

    if config.run.quick_per_year == 0 {
        errors.push("run.quick_per_year must be > 0".to_string());
    }
    if config.run.test_limit == 0 {
        errors.push("run.test_limit must be > 0".to_string());
    }

    for key in config.background.by_year.keys() {
        if key.trim().parse::<i32>().is_err() {
            errors.push(format!("background.by_year.{} is not a year", key));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

/// Checks that only matter once the backend is actually going to be called.
pub fn validate_backend_ready(config: &Config) -> crate::Result<()> {
    if config.llm.api_base.trim() == PLACEHOLDER_API_BASE {
        return Err(crate::Error::Validation(
            "llm.api_base still holds the placeholder; update the configuration".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        let config = Config::default();
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_validate_aggregates_errors() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        config.run.test_limit = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("retry.max_attempts"));
        assert!(err.contains("run.test_limit"));
    }

    #[test]
    fn test_validate_rejects_non_year_background_keys() {
        let mut config = Config::default();
        config
            .background
            .by_year
            .insert("someday".to_string(), "text".to_string());

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("background.by_year.someday"));
    }

    #[test]
    fn test_backend_ready_rejects_placeholder() {
        let mut config = Config::default();
        config.llm.api_base = PLACEHOLDER_API_BASE.to_string();
        assert!(validate_backend_ready(&config).is_err());
    }
}
