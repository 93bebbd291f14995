//! # Deepdive Core
//!
//! Core library for the Deepdive research agent.
//! Provides the research job engine, the LLM interface (brain), search
//! provider access, retry policy, configuration, and fundamental types.

pub mod brain;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod retry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{DeepdiveConfig, load_config};
pub use error::{DeepdiveError, Result};
pub use research::{JobManager, JobState, ResearchContext, ResearchEvent, SubmitOutcome};
pub use retry::RetryPolicy;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
