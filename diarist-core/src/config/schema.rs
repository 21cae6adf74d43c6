//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Root configuration for diarist
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Generation backend configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Backend retry and timeout policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Diary generation settings
    #[serde(default)]
    pub diary: DiaryConfig,
    /// Static biography used as background context
    #[serde(default)]
    pub background: BackgroundConfig,
    /// Period summary settings
    #[serde(default)]
    pub summary: SummaryConfig,
    /// Artifact locations
    #[serde(default)]
    pub output: OutputConfig,
    /// Run mode bounds and failure policy
    #[serde(default)]
    pub run: RunConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Placeholder shipped in sample configs; a run refuses to start with it.
pub const PLACEHOLDER_API_BASE: &str = "YOUR_BASE_URL_HERE";

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identity sent with every request
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub extra_headers: Option<HashMap<String, String>>,
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            extra_headers: None,
        }
    }
}

/// Retry budget and per-call timeout for backend calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per generation, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_timeout_secs() -> u64 {
    180
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Diary generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryConfig {
    /// Messages shorter than this many characters are dropped
    #[serde(default = "default_min_message_length")]
    pub min_message_length: usize,
    /// Messages longer than this are truncated inside prompts
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Most recent memory entries rendered into each prompt
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_language")]
    pub language: String,
    /// Sample entry showing the desired voice
    #[serde(default)]
    pub example_diary: String,
    /// Free-form extra requirements appended to the instructions
    #[serde(default)]
    pub requirements: String,
}

fn default_min_message_length() -> usize {
    10
}

fn default_max_message_chars() -> usize {
    500
}

fn default_context_window() -> usize {
    50
}

fn default_language() -> String {
    "English".to_string()
}

impl Default for DiaryConfig {
    fn default() -> Self {
        Self {
            min_message_length: default_min_message_length(),
            max_message_chars: default_max_message_chars(),
            context_window: default_context_window(),
            language: default_language(),
            example_diary: String::new(),
            requirements: String::new(),
        }
    }
}

/// Background text keyed by year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackgroundConfig {
    /// Applies to every date
    #[serde(default)]
    pub text: String,
    /// Year (as a string, e.g. "2023") to background for that year
    #[serde(default)]
    pub by_year: BTreeMap<String, String>,
}

impl BackgroundConfig {
    /// Background visible from `year`: the static text plus every yearly
    /// entry up to and including `year`.
    pub fn until(&self, year: i32) -> String {
        let mut parts = Vec::new();
        if !self.text.trim().is_empty() {
            parts.push(self.text.trim().to_string());
        }
        let mut years: Vec<(i32, &String)> = self
            .by_year
            .iter()
            .filter_map(|(key, value)| key.trim().parse::<i32>().ok().map(|y| (y, value)))
            .filter(|(y, value)| *y <= year && !value.trim().is_empty())
            .collect();
        years.sort_by_key(|(y, _)| *y);
        for (y, value) in years {
            parts.push(format!("{}: {}", y, value.trim()));
        }
        parts.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.by_year.values().all(|v| v.trim().is_empty())
    }
}

/// What to do with a period whose buckets were only partly generated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartialPeriodPolicy {
    /// Summarize whatever entries exist
    #[default]
    Summarize,
    /// Only summarize once every bucket of the period has an entry
    Skip,
}

/// Period summary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub partial_period_policy: PartialPeriodPolicy,
    /// Feed the previous period's summary into the prompt
    #[serde(default = "default_true")]
    pub include_previous_summary: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            partial_period_policy: PartialPeriodPolicy::default(),
            include_previous_summary: true,
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_progress_file")]
    pub progress_file: String,
}

fn default_base_dir() -> String {
    "output/diaries".to_string()
}

fn default_progress_file() -> String {
    "progress.json".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            progress_file: default_progress_file(),
        }
    }
}

/// Run mode bounds and failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Buckets per year selected by quick runs
    #[serde(default = "default_quick_per_year")]
    pub quick_per_year: usize,
    /// Buckets selected overall by test runs
    #[serde(default = "default_test_limit")]
    pub test_limit: usize,
    /// Stop at the first bucket or period failure
    #[serde(default)]
    pub fail_fast: bool,
    /// Re-derive completed buckets from artifacts when the ledger is corrupt
    #[serde(default = "default_true")]
    pub recover_ledger_from_artifacts: bool,
}

fn default_quick_per_year() -> usize {
    10
}

fn default_test_limit() -> usize {
    3
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            quick_per_year: default_quick_per_year(),
            test_limit: default_test_limit(),
            fail_fast: false,
            recover_ledger_from_artifacts: true,
        }
    }
}
