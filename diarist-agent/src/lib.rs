//! Diary generation logic for diarist
//!
//! This crate provides prompt building, structured output parsing, the
//! per-date generation step, yearly summaries and the pipeline driver.

pub mod background;
pub mod context;
pub mod generator;
pub mod pipeline;
pub mod structured;
pub mod summarizer;

pub use background::BackgroundDeriver;
pub use context::ContextBuilder;
pub use generator::{ChatSettings, DiaryGenerator};
pub use pipeline::{
    ledger_path, select_buckets, BucketOutcome, PeriodOutcome, Pipeline, PipelineEvent, RunMode, RunOptions,
    RunReport, RunState, Selection,
};
pub use summarizer::PeriodSummarizer;
