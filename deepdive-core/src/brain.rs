//! Brain module - LLM provider abstraction and interaction.
//!
//! Defines the `LlmProvider` trait for model-agnostic LLM interactions and
//! the `Brain` struct that every research step uses to ask for a judgment,
//! a synthesis, or a report.

use crate::error::{JudgmentParseError, LlmError};
use crate::retry::RetryPolicy;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Number of trailing conversation turns forwarded with a prompt.
pub const HISTORY_WINDOW: usize = 10;

/// Trait for LLM providers, supporting full completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Estimate the token count for a set of messages.
    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.len() / 4 + 4).sum()
    }

    /// Return the context window size for this provider/model.
    fn context_window(&self) -> usize;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// The Brain wraps an LLM provider with retry, prompt assembly and usage
/// accounting. It is shared by reference between research components.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: Option<usize>,
    total_usage: Mutex<TokenUsage>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            temperature: 0.7,
            max_tokens: None,
            total_usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Override sampling temperature and output cap for every request.
    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<usize>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Cumulative usage over every successful completion.
    pub fn total_usage(&self) -> TokenUsage {
        *self.total_usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send the messages as-is and return the reply text.
    pub async fn complete(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let estimated = self.provider.estimate_tokens(&messages);
        let limit = self.provider.context_window();
        if estimated > limit {
            return Err(LlmError::ContextOverflow {
                used: estimated,
                limit,
            });
        }

        let request = CompletionRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
        };

        let response = self
            .retry
            .run_with_hint(
                "llm",
                || self.provider.complete(request.clone()),
                LlmError::is_retryable,
                LlmError::retry_after,
            )
            .await?;

        self.total_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accumulate(&response.usage);
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );
        Ok(response.message.content)
    }

    /// System prompt, then the last `HISTORY_WINDOW` history turns, then the
    /// user prompt.
    pub async fn ask(
        &self,
        system: &str,
        user: &str,
        history: &[Message],
    ) -> Result<String, LlmError> {
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        let mut messages = Vec::with_capacity(history.len() - start + 2);
        messages.push(Message::system(system));
        messages.extend(history[start..].iter().cloned());
        messages.push(Message::user(user));
        self.complete(messages).await
    }
}

/// Decode a JSON value from model output.
///
/// Accepts a bare JSON document, or the first fenced code block whose body
/// starts with `{` or `[`.
pub fn extract_json(text: &str) -> Result<serde_json::Value, JudgmentParseError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let mut rest = trimmed;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let lang = after_fence[..body_start].trim();
        let body = &after_fence[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        let block = body[..close].trim();
        if (lang.is_empty() || lang.eq_ignore_ascii_case("json"))
            && (block.starts_with('{') || block.starts_with('['))
        {
            return serde_json::from_str(block)
                .map_err(|e| JudgmentParseError::new(format!("fenced block: {e}")));
        }
        rest = &body[close + 3..];
    }

    Err(JudgmentParseError::new(format!(
        "no JSON found in response ({} chars)",
        trimmed.len()
    )))
}

/// A mock LLM provider for testing. Replies are served in queue order;
/// queued failures are returned in their slot.
pub struct MockLlmProvider {
    model: String,
    context_window: usize,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            context_window: 128_000,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that serves the given replies in order.
    pub fn with_responses<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for text in texts {
            provider.queue_text(text.as_ref());
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push_back(Ok(response));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push_back(Err(error));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_responses().len()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.lock_responses().pop_front().unwrap_or_else(|| {
            Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            ))
        })
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
