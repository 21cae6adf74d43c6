//! Generation backend integrations for diarist
//!
//! This crate defines the backend boundary used by the diary pipeline and an
//! OpenAI-compatible HTTP implementation of it.

pub mod base;
pub mod openai;
pub mod retry;

pub use base::{LLMProvider, LLMResponse, Message, ProviderError, ProviderResult};
pub use openai::OpenAiClient;
pub use retry::RetryPolicy;
