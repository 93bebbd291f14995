//! Shared collaborators for one research session.

use super::events::EventSink;
use super::search::{
    ContentOptions, ExaClient, ScriptedSearchProvider, SearchClient, SearchProvider,
};
use super::storage::{FileReportStore, ReportStore};
use crate::brain::{Brain, MockLlmProvider};
use crate::config::{DeepdiveConfig, ResearchSettings, SearchConfig};
use crate::error::DeepdiveError;
use crate::providers::create_provider;
use crate::retry::RetryPolicy;
use crate::types::Message;
use std::sync::Arc;

/// Everything a research component needs, passed by reference.
/// Cloning is cheap; every field is shared.
#[derive(Clone)]
pub struct ResearchContext {
    pub settings: Arc<ResearchSettings>,
    pub search_config: Arc<SearchConfig>,
    pub brain: Arc<Brain>,
    pub search: SearchClient,
    pub events: EventSink,
    pub store: Arc<dyn ReportStore>,
    /// Conversation turns forwarded to judgment calls.
    pub history: Arc<Vec<Message>>,
}

impl ResearchContext {
    pub fn new(
        settings: ResearchSettings,
        search_config: SearchConfig,
        brain: Arc<Brain>,
        search: SearchClient,
        events: EventSink,
        store: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            search_config: Arc::new(search_config),
            brain,
            search,
            events,
            store,
            history: Arc::default(),
        }
    }

    /// Build the production collaborators: OpenAI-compatible LLM, Exa
    /// search and file-backed report storage.
    pub fn from_config(config: &DeepdiveConfig, events: EventSink) -> Result<Self, DeepdiveError> {
        let retry = RetryPolicy::from(&config.retry);
        let provider = create_provider(&config.llm)?;
        let brain = Brain::new(provider, retry.clone())
            .with_sampling(config.llm.temperature, Some(config.llm.max_tokens));
        let exa: Arc<dyn SearchProvider> = Arc::new(ExaClient::new(&config.search)?);
        Ok(Self::new(
            config.research.clone(),
            config.search.clone(),
            Arc::new(brain),
            SearchClient::new(exa, retry),
            events,
            Arc::new(FileReportStore::new(config.storage.reports_dir.clone())),
        ))
    }

    /// Wire in-memory doubles with every pause and retry delay removed.
    pub fn scripted(
        llm: Arc<MockLlmProvider>,
        search: Arc<ScriptedSearchProvider>,
        store: Arc<dyn ReportStore>,
        events: EventSink,
    ) -> Self {
        let retry = RetryPolicy::immediate(3);
        Self::new(
            ResearchSettings::default().without_pauses(),
            SearchConfig::default(),
            Arc::new(Brain::new(llm, retry.clone())),
            SearchClient::new(search, retry),
            events,
            store,
        )
    }

    /// Replace the research limits.
    pub fn with_settings(mut self, settings: ResearchSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = Arc::new(history);
        self
    }

    /// Options used when fetching subtopic sources.
    pub fn content_options(&self) -> ContentOptions {
        ContentOptions::from_config(&self.search_config)
    }
}
