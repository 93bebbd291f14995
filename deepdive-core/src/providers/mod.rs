//! LLM provider implementations.
//!
//! Every supported backend (OpenAI, Azure, Ollama, vLLM, LM Studio) speaks the
//! OpenAI chat completions format. Use `create_provider()` to instantiate one
//! from config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Create the configured LLM provider.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" | "azure" | "ollama" | "vllm" | "lmstudio" => {}
        other => tracing::warn!(
            provider = other,
            "Unknown provider name; treating it as OpenAI-compatible"
        ),
    }
    Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_with_inline_key() {
        let config = LlmConfig {
            provider: "vllm".into(),
            model: "test-model".into(),
            api_key: Some("test-key".into()),
            ..LlmConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "test-model");
    }

    #[test]
    fn test_create_provider_missing_key() {
        let config = LlmConfig {
            api_key_env: "DEEPDIVE_NONEXISTENT_KEY".into(),
            ..LlmConfig::default()
        };
        match create_provider(&config) {
            Err(LlmError::AuthFailed { provider }) => {
                assert!(provider.contains("DEEPDIVE_NONEXISTENT_KEY"))
            }
            Err(other) => panic!("Expected AuthFailed, got {other:?}"),
            Ok(_) => panic!("Expected AuthFailed"),
        }
    }
}
