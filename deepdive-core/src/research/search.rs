//! Search and content retrieval.
//!
//! `SearchProvider` is the raw transport (Exa over HTTP, or a scripted double
//! in tests). `SearchClient` wraps any provider with the shared retry policy
//! and adds batched content fetching.

use super::events::{EventSink, Phase};
use crate::config::{Livecrawl, SearchConfig};
use crate::error::ProviderError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub url: String,
    pub title: String,
    pub score: Option<f64>,
    pub published_date: Option<String>,
    pub author: Option<String>,
}

impl SearchResult {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            url,
            title: title.into(),
            score: None,
            published_date: None,
            author: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Retrieved body of one URL. Either field may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub url: String,
    pub title: String,
    pub text: Option<String>,
    pub summary: Option<String>,
}

impl Content {
    pub fn with_text(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            url,
            title: title.into(),
            text: Some(text.into()),
            summary: None,
        }
    }

    /// Text if present and non-empty, else summary if present and non-empty.
    pub fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.summary.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Auto,
    Keyword,
    Neural,
}

/// Search request, serialized in the provider's camelCase wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    #[serde(rename = "type")]
    pub search_type: SearchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub num_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_crawl_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_crawl_date: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_text: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_text: Vec<String>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            search_type: SearchType::Auto,
            category: None,
            num_results: 10,
            start_published_date: None,
            end_published_date: None,
            start_crawl_date: None,
            end_crawl_date: None,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            include_text: Vec::new(),
            exclude_text: Vec::new(),
        }
    }

    pub fn with_num_results(mut self, n: usize) -> Self {
        self.num_results = n;
        self
    }
}

/// What to retrieve for each URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentOptions {
    pub text: bool,
    pub max_characters: Option<usize>,
    pub summary: bool,
    pub livecrawl: Livecrawl,
    pub livecrawl_timeout_ms: Option<u64>,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            text: true,
            max_characters: Some(5000),
            summary: false,
            livecrawl: Livecrawl::Fallback,
            livecrawl_timeout_ms: Some(5000),
        }
    }
}

impl ContentOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            text: true,
            max_characters: Some(config.max_characters),
            summary: false,
            livecrawl: config.livecrawl,
            livecrawl_timeout_ms: Some(config.livecrawl_timeout_ms),
        }
    }

    fn to_request_body(&self, urls: &[String]) -> Value {
        let mut body = json!({ "urls": urls, "livecrawl": self.livecrawl });
        if self.text {
            body["text"] = match self.max_characters {
                Some(max) => json!({ "maxCharacters": max }),
                None => json!(true),
            };
        }
        if self.summary {
            body["summary"] = json!({});
        }
        if let Some(timeout) = self.livecrawl_timeout_ms {
            body["livecrawlTimeout"] = json!(timeout);
        }
        body
    }
}

/// Raw access to a search/content backend. Implementations do not retry.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, params: &SearchParams) -> Result<Vec<SearchResult>, ProviderError>;

    /// May return fewer items than requested; missing URLs are not an error.
    async fn fetch_contents(
        &self,
        urls: &[String],
        options: &ContentOptions,
    ) -> Result<Vec<Content>, ProviderError>;
}

/// Exa search API over HTTP.
pub struct ExaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

const EXA: &str = "exa";

impl ExaClient {
    /// Reads the API key from `config.api_key` or the `api_key_env` variable.
    pub fn new(config: &SearchConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport {
                provider: EXA.into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Sending Exa request");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: EXA.into(),
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Parse {
            provider: EXA.into(),
            message: e.to_string(),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: EXA.into(),
                timeout_secs: self.timeout_secs,
            }
        } else {
            ProviderError::Transport {
                provider: EXA.into(),
                message: e.to_string(),
            }
        }
    }

    fn results_array(body: &Value) -> Result<&Vec<Value>, ProviderError> {
        body.get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ProviderError::Parse {
                provider: EXA.into(),
                message: "response has no results array".into(),
            })
    }

    fn str_field(item: &Value, key: &str) -> Option<String> {
        item.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    fn parse_results(body: &Value) -> Result<Vec<SearchResult>, ProviderError> {
        Ok(Self::results_array(body)?
            .iter()
            .filter_map(|item| {
                let url = Self::str_field(item, "url")?;
                Some(SearchResult {
                    id: Self::str_field(item, "id").unwrap_or_else(|| url.clone()),
                    title: Self::str_field(item, "title").unwrap_or_default(),
                    score: item.get("score").and_then(|s| s.as_f64()),
                    published_date: Self::str_field(item, "publishedDate"),
                    author: Self::str_field(item, "author"),
                    url,
                })
            })
            .collect())
    }

    fn parse_contents(body: &Value) -> Result<Vec<Content>, ProviderError> {
        Ok(Self::results_array(body)?
            .iter()
            .filter_map(|item| {
                let url = Self::str_field(item, "url")?;
                Some(Content {
                    id: Self::str_field(item, "id").unwrap_or_else(|| url.clone()),
                    title: Self::str_field(item, "title").unwrap_or_default(),
                    text: Self::str_field(item, "text"),
                    summary: Self::str_field(item, "summary"),
                    url,
                })
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for ExaClient {
    fn name(&self) -> &str {
        EXA
    }

    async fn search(&self, params: &SearchParams) -> Result<Vec<SearchResult>, ProviderError> {
        let body = serde_json::to_value(params).map_err(|e| ProviderError::Parse {
            provider: EXA.into(),
            message: e.to_string(),
        })?;
        Self::parse_results(&self.post("search", &body).await?)
    }

    async fn fetch_contents(
        &self,
        urls: &[String],
        options: &ContentOptions,
    ) -> Result<Vec<Content>, ProviderError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let body = options.to_request_body(urls);
        Self::parse_contents(&self.post("contents", &body).await?)
    }
}

/// A search provider with retry.
#[derive(Clone)]
pub struct SearchClient {
    provider: Arc<dyn SearchProvider>,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(provider: Arc<dyn SearchProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchResult>, ProviderError> {
        self.retry
            .run(
                "search",
                || self.provider.search(params),
                ProviderError::is_retryable,
            )
            .await
    }

    pub async fn fetch_contents(
        &self,
        urls: &[String],
        options: &ContentOptions,
    ) -> Result<Vec<Content>, ProviderError> {
        self.retry
            .run(
                "fetch_contents",
                || self.provider.fetch_contents(urls, options),
                ProviderError::is_retryable,
            )
            .await
    }

    /// Fetch `urls` in consecutive batches of `batch_size`, each URL of a
    /// batch concurrently, pausing between batches. URLs that still fail
    /// after retries are skipped. Output follows input order.
    pub async fn fetch_contents_in_batches(
        &self,
        urls: &[String],
        options: &ContentOptions,
        batch_size: usize,
        pause: Duration,
    ) -> Vec<Content> {
        let batch_size = batch_size.max(1);
        let batch_count = urls.len().div_ceil(batch_size);
        let mut contents = Vec::with_capacity(urls.len());

        for (index, batch) in urls.chunks(batch_size).enumerate() {
            let fetches = batch
                .iter()
                .map(|url| self.fetch_contents(std::slice::from_ref(url), options));
            for (url, outcome) in batch.iter().zip(join_all(fetches).await) {
                match outcome {
                    Ok(items) => contents.extend(items),
                    Err(e) => warn!(url = %url, error = %e, "Content fetch failed; skipping URL"),
                }
            }
            debug!(batch = index + 1, batch_count, size = batch.len(), "Content batch done");

            if index + 1 < batch_count && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        contents
    }
}

/// Small preview search used to judge whether a query needs clarification.
pub async fn quick_search(
    client: &SearchClient,
    events: &EventSink,
    request_id: &str,
    query: &str,
    num_results: usize,
) -> Result<Vec<SearchResult>, ProviderError> {
    info!(request_id, query, "Quick search");
    events.status(
        request_id,
        Phase::Clarifying,
        "Quick search",
        format!("Searching for: {query}"),
        json!({}),
    );
    let results = client
        .search(&SearchParams::new(query).with_num_results(num_results))
        .await?;
    info!(request_id, count = results.len(), "Quick search finished");
    Ok(results)
}

/// A call observed by [`ScriptedSearchProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchCall {
    Search {
        query: String,
        num_results: usize,
    },
    Fetch {
        urls: Vec<String>,
        at: tokio::time::Instant,
    },
}

/// In-memory search provider for tests. Results are looked up by exact
/// query, contents by URL; queued failures are served first.
#[derive(Default)]
pub struct ScriptedSearchProvider {
    results: Mutex<HashMap<String, Vec<SearchResult>>>,
    default_results: Mutex<Vec<SearchResult>>,
    contents: Mutex<HashMap<String, Content>>,
    search_failures: Mutex<VecDeque<ProviderError>>,
    url_failures: Mutex<HashMap<String, usize>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<SearchCall>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(self, query: &str, results: Vec<SearchResult>) -> Self {
        lock(&self.results).insert(query.to_string(), results);
        self
    }

    /// Results for any query without an exact entry.
    pub fn with_default_results(self, results: Vec<SearchResult>) -> Self {
        *lock(&self.default_results) = results;
        self
    }

    pub fn with_content(self, content: Content) -> Self {
        lock(&self.contents).insert(content.url.clone(), content);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = latency;
        self
    }

    pub fn fail_next_search(&self, error: ProviderError) {
        lock(&self.search_failures).push_back(error);
    }

    /// Fail the next `times` fetches that include `url`.
    pub fn fail_url(&self, url: &str, times: usize) {
        lock(&self.url_failures).insert(url.to_string(), times);
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        lock(&self.calls).clone()
    }

    pub fn fetch_calls(&self) -> Vec<(Vec<String>, tokio::time::Instant)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SearchCall::Fetch { urls, at } => Some((urls, at)),
                SearchCall::Search { .. } => None,
            })
            .collect()
    }

    pub fn search_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SearchCall::Search { .. }))
            .count()
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearchProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, params: &SearchParams) -> Result<Vec<SearchResult>, ProviderError> {
        lock(&self.calls).push(SearchCall::Search {
            query: params.query.clone(),
            num_results: params.num_results,
        });
        self.simulate_latency().await;
        if let Some(error) = lock(&self.search_failures).pop_front() {
            return Err(error);
        }
        let results = lock(&self.results)
            .get(&params.query)
            .cloned()
            .unwrap_or_else(|| lock(&self.default_results).clone());
        Ok(results.into_iter().take(params.num_results).collect())
    }

    async fn fetch_contents(
        &self,
        urls: &[String],
        _options: &ContentOptions,
    ) -> Result<Vec<Content>, ProviderError> {
        lock(&self.calls).push(SearchCall::Fetch {
            urls: urls.to_vec(),
            at: tokio::time::Instant::now(),
        });
        self.simulate_latency().await;
        {
            let mut failures = lock(&self.url_failures);
            for url in urls {
                if let Some(remaining) = failures.get_mut(url)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return Err(ProviderError::Status {
                        provider: "scripted".into(),
                        status: 503,
                        body: format!("unavailable: {url}"),
                    });
                }
            }
        }
        let contents = lock(&self.contents);
        Ok(urls.iter().filter_map(|u| contents.get(u).cloned()).collect())
    }
}
