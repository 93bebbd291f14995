//! Configuration system for Deepdive.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.deepdive/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::retry::RetryConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepdiveConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub retry: RetryConfig,
    pub research: ResearchSettings,
    pub storage: StorageConfig,
}

/// Configuration for the language-model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name. Every supported backend speaks the OpenAI chat format.
    pub provider: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Custom base URL (Ollama, vLLM, Azure, LM Studio).
    pub base_url: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub context_window: usize,
    pub timeout_secs: u64,
    /// Directly provided API key. Never serialized.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            context_window: 128_000,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

/// Live-crawl policy for content retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Livecrawl {
    Always,
    /// Crawl only when no cached copy exists.
    #[default]
    Fallback,
    Never,
}

/// Configuration for the search/content provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Result cap for subtopic searches.
    pub num_results: usize,
    /// Result cap for the clarification preview.
    pub preview_num_results: usize,
    pub max_characters: usize,
    pub livecrawl: Livecrawl,
    pub livecrawl_timeout_ms: u64,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "EXA_API_KEY".to_string(),
            base_url: "https://api.exa.ai".to_string(),
            timeout_secs: 30,
            num_results: 10,
            preview_num_results: 5,
            max_characters: 5000,
            livecrawl: Livecrawl::Fallback,
            livecrawl_timeout_ms: 5000,
            api_key: None,
        }
    }
}

/// Limits and pacing for the research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    pub max_iterations: usize,
    /// Budgeting hint given to the supervisor; subtopics are researched one at a time.
    pub max_concurrent_research_units: usize,
    /// Content-fetch batch size.
    pub max_concurrent_fetches: usize,
    /// Note count at which compression starts.
    pub compression_threshold: usize,
    pub iteration_pause_ms: u64,
    pub batch_pause_ms: u64,
    /// Per-note summary cap in the uncompressed findings digest.
    pub findings_digest_chars: usize,
    pub event_channel_capacity: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            max_concurrent_research_units: 3,
            max_concurrent_fetches: 3,
            compression_threshold: 4,
            iteration_pause_ms: 500,
            batch_pause_ms: 500,
            findings_digest_chars: 500,
            event_channel_capacity: 64,
        }
    }
}

impl ResearchSettings {
    /// Settings with every pause removed.
    pub fn without_pauses(mut self) -> Self {
        self.iteration_pause_ms = 0;
        self.batch_pause_ms = 0;
        self
    }

    pub fn iteration_pause(&self) -> Duration {
        Duration::from_millis(self.iteration_pause_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// Where finished reports are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub reports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "deepdive", "deepdive")
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Directory for rolling log files.
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Load configuration by merging layers, highest priority last:
///
/// 1. Built-in defaults
/// 2. User config (`<config dir>/deepdive/config.toml`)
/// 3. Workspace-local config (`.deepdive/config.toml`)
/// 4. Environment variables (prefixed with `DEEPDIVE_`, nested with `__`)
/// 5. Explicit overrides (passed as argument)
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepdiveConfig>,
) -> Result<DeepdiveConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DeepdiveConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepdive").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPDIVE_RESEARCH__MAX_ITERATIONS, DEEPDIVE_LLM__MODEL, etc.
    figment = figment.merge(Env::prefixed("DEEPDIVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Render the merged configuration as TOML.
pub fn to_toml(config: &DeepdiveConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DeepdiveConfig::default();
        assert_eq!(config.research.max_iterations, 4);
        assert_eq!(config.research.max_concurrent_research_units, 3);
        assert_eq!(config.research.max_concurrent_fetches, 3);
        assert_eq!(config.research.compression_threshold, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.search.livecrawl, Livecrawl::Fallback);
        assert_eq!(config.search.max_characters, 5000);
    }

    #[test]
    fn test_without_pauses() {
        let settings = ResearchSettings::default().without_pauses();
        assert_eq!(settings.iteration_pause(), Duration::ZERO);
        assert_eq!(settings.batch_pause(), Duration::ZERO);
    }

    #[test]
    fn test_workspace_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_dir(".deepdive")?;
            jail.create_file(
                ".deepdive/config.toml",
                r#"
[research]
max_iterations = 7
batch_pause_ms = 0

[search]
livecrawl = "always"
"#,
            )?;
            jail.set_env("DEEPDIVE_LLM__MODEL", "llama3.1:8b");
            jail.set_env("DEEPDIVE_RESEARCH__MAX_CONCURRENT_FETCHES", "5");

            let config = load_config(Some(jail.directory()), None).unwrap();
            assert_eq!(config.research.max_iterations, 7);
            assert_eq!(config.research.batch_pause_ms, 0);
            assert_eq!(config.research.max_concurrent_fetches, 5);
            assert_eq!(config.research.iteration_pause_ms, 500);
            assert_eq!(config.search.livecrawl, Livecrawl::Always);
            assert_eq!(config.llm.model, "llama3.1:8b");
            Ok(())
        });
    }

    #[test]
    fn test_overrides_win() {
        Jail::expect_with(|jail| {
            jail.set_env("DEEPDIVE_RESEARCH__MAX_ITERATIONS", "9");
            let mut overrides = DeepdiveConfig::default();
            overrides.research.max_iterations = 2;
            let config = load_config(None, Some(&overrides)).unwrap();
            assert_eq!(config.research.max_iterations, 2);
            Ok(())
        });
    }

    #[test]
    fn test_api_keys_not_serialized() {
        let mut config = DeepdiveConfig::default();
        config.llm.api_key = Some("sk-secret".into());
        config.search.api_key = Some("exa-secret".into());
        let rendered = to_toml(&config).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[research]"));
    }
}
