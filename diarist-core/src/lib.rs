//! Core types and storage for diarist
//!
//! This crate provides the configuration, error taxonomy, input records,
//! on-disk artifacts, progress ledger and narrative memory shared by the
//! other diarist crates.

pub mod artifact;
pub mod config;
pub mod diary;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod memory;
pub mod records;
pub mod utils;

pub use artifact::ArtifactStore;
pub use diary::{DiaryEntry, PeriodSummary};
pub use error::{Error, Result};
pub use ledger::{ProgressLedger, ProgressRecord};
pub use memory::NarrativeMemory;
pub use records::{ConversationalRecord, RecordStore, RejectedBucket, Speaker, TimeBucket, Utterance};
