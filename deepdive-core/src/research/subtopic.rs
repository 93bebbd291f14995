//! Research of a single subtopic: search, batched content fetch, then
//! cited synthesis.

use super::context::ResearchContext;
use super::events::Phase;
use super::notes::{Citation, ResearchNote, truncate_chars};
use super::prompts;
use super::search::{Content, SearchParams};
use crate::error::DeepdiveError;
use serde_json::json;
use tracing::{info, warn};

/// Characters of source text kept as a citation quote.
const QUOTE_CHARS: usize = 600;

/// Research `subtopic` and return its note. Zero search results or zero
/// readable sources yield an explanatory note, not an error.
pub async fn research_subtopic(
    ctx: &ResearchContext,
    request_id: &str,
    subtopic: &str,
    original_query: &str,
    brief: &str,
) -> Result<ResearchNote, DeepdiveError> {
    info!(request_id, subtopic, "Starting subtopic research");
    ctx.events.status(
        request_id,
        Phase::Researching,
        "Starting research",
        format!("Investigating: {subtopic}"),
        json!({ "subtopic": subtopic }),
    );

    let params = SearchParams::new(subtopic).with_num_results(ctx.search_config.num_results);
    let results = ctx.search.search(&params).await?;
    info!(request_id, subtopic, results = results.len(), "Subtopic search finished");

    if results.is_empty() {
        let note = ResearchNote::empty(subtopic, format!("No results found for: {subtopic}"));
        ctx.events.note(request_id, &note);
        return Ok(note);
    }

    ctx.events.status(
        request_id,
        Phase::Researching,
        "Gathering sources",
        format!("Found {} relevant sources about {subtopic}", results.len()),
        json!({ "subtopic": subtopic, "results": results.len() }),
    );

    let urls: Vec<String> = results.into_iter().map(|r| r.url).collect();
    let contents = ctx
        .search
        .fetch_contents_in_batches(
            &urls,
            &ctx.content_options(),
            ctx.settings.max_concurrent_fetches,
            ctx.settings.batch_pause(),
        )
        .await;

    ctx.events.status(
        request_id,
        Phase::Researching,
        "Synthesizing findings",
        format!("Analyzing {} sources about {subtopic}", contents.len()),
        json!({ "subtopic": subtopic, "sources_fetched": contents.len() }),
    );

    let note = synthesize(ctx, subtopic, &contents, original_query, brief).await?;
    info!(
        request_id,
        subtopic,
        citations = note.citations.len(),
        "Subtopic note ready"
    );
    ctx.events.note(request_id, &note);
    Ok(note)
}

/// Numbered source listing; `[n]` in the synthesis refers to `contents[n - 1]`.
pub fn format_sources(contents: &[Content]) -> String {
    contents
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "\n\n---\n\n**[{}] {}**\nURL: {}\n\n{}",
                i + 1,
                c.title,
                c.url,
                c.body().unwrap_or("(No content available)")
            )
        })
        .collect()
}

/// One citation per fetched source, in presentation order.
pub fn citations_for(contents: &[Content]) -> Vec<Citation> {
    contents
        .iter()
        .map(|c| Citation {
            id: c.id.clone(),
            url: c.url.clone(),
            title: c.title.clone(),
            quote: truncate_chars(c.body().unwrap_or(""), QUOTE_CHARS).to_string(),
            published_at: None,
        })
        .collect()
}

async fn synthesize(
    ctx: &ResearchContext,
    subtopic: &str,
    contents: &[Content],
    original_query: &str,
    brief: &str,
) -> Result<ResearchNote, DeepdiveError> {
    if contents.is_empty() {
        warn!(subtopic, "No sources fetched");
        return Ok(ResearchNote::empty(
            subtopic,
            format!("No sources found for: {subtopic}"),
        ));
    }
    if contents.iter().all(|c| c.body().is_none()) {
        warn!(subtopic, sources = contents.len(), "No content extracted");
        return Ok(ResearchNote::empty(
            subtopic,
            format!("No content could be extracted from {} sources", contents.len()),
        ));
    }

    let system = prompts::researcher_system_prompt(&prompts::today(), original_query, brief);
    let user = prompts::synthesis_user_prompt(
        subtopic,
        &prompts::research_context(original_query, brief),
        &format_sources(contents),
    );
    let reply = ctx.brain.ask(&system, &user, &ctx.history).await?;

    let summary = match reply.trim() {
        "" => format!("Could not generate summary for: {subtopic}"),
        text => text.to_string(),
    };
    Ok(ResearchNote::new(subtopic, summary, citations_for(contents)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::research::events::{EventSink, ResearchEvent};
    use crate::research::search::{ScriptedSearchProvider, SearchResult};
    use crate::research::storage::MemoryReportStore;
    use std::sync::Arc;

    fn context(
        llm: Arc<MockLlmProvider>,
        search: Arc<ScriptedSearchProvider>,
    ) -> (ResearchContext, tokio::sync::mpsc::Receiver<ResearchEvent>) {
        let (events, rx) = EventSink::channel(32);
        (
            ResearchContext::scripted(llm, search, Arc::new(MemoryReportStore::new()), events),
            rx,
        )
    }

    #[test]
    fn test_format_sources_numbering_and_fallback() {
        let mut empty = Content::with_text("https://b", "B", "");
        empty.text = None;
        let text = format_sources(&[Content::with_text("https://a", "A", "alpha"), empty]);
        assert_eq!(
            text,
            "\n\n---\n\n**[1] A**\nURL: https://a\n\nalpha\n\n---\n\n**[2] B**\nURL: https://b\n\n(No content available)"
        );
    }

    #[test]
    fn test_citation_quote_is_capped() {
        let long = "x".repeat(1000);
        let citations = citations_for(&[Content::with_text("https://a", "A", long)]);
        assert_eq!(citations[0].quote.chars().count(), 600);
        assert_eq!(citations[0].url, "https://a");
    }

    #[tokio::test]
    async fn test_zero_results_is_a_note() {
        let llm = Arc::new(MockLlmProvider::new());
        let (ctx, _rx) = context(llm.clone(), Arc::new(ScriptedSearchProvider::new()));
        let note = research_subtopic(&ctx, "r", "Tesla Inc. patents", "Tesla", "brief")
            .await
            .unwrap();
        assert_eq!(note.summary_markdown, "No results found for: Tesla Inc. patents");
        assert!(note.citations.is_empty());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_sources_skip_synthesis() {
        let mut blank = Content::with_text("https://a", "A", "");
        blank.text = None;
        let search = Arc::new(
            ScriptedSearchProvider::new()
                .with_default_results(vec![SearchResult::new("https://a", "A")])
                .with_content(blank),
        );
        let llm = Arc::new(MockLlmProvider::new());
        let (ctx, _rx) = context(llm.clone(), search);
        let note = research_subtopic(&ctx, "r", "topic", "q", "b").await.unwrap();
        assert_eq!(note.summary_markdown, "No content could be extracted from 1 sources");
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_with_citations_and_events() {
        let search = Arc::new(
            ScriptedSearchProvider::new()
                .with_default_results(vec![
                    SearchResult::new("https://tesla.com/a", "Cells"),
                    SearchResult::new("https://tesla.com/b", "Packs"),
                ])
                .with_content(Content::with_text("https://tesla.com/a", "Cells", "4680 cells"))
                .with_content(Content::with_text("https://tesla.com/b", "Packs", "structural pack")),
        );
        let llm = Arc::new(MockLlmProvider::with_responses(["Tesla uses 4680 cells [1] in packs [2]."]));
        let (ctx, mut rx) = context(llm.clone(), search);

        let note = research_subtopic(&ctx, "r1", "Tesla Inc. batteries", "Tesla", "brief")
            .await
            .unwrap();
        assert_eq!(note.citations.len(), 2);
        assert!(note.summary_markdown.contains("[2]"));

        let requests = llm.requests();
        let prompt = &requests[0].messages.last().unwrap().content;
        assert!(prompt.contains("**[2] Packs**"));
        assert!(prompt.contains("Nikola Tesla"));

        let mut titles = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ResearchEvent::Status(update) => titles.push(update.title),
                ResearchEvent::Note { .. } => titles.push("note".into()),
                ResearchEvent::ReportReady { .. } => {}
            }
        }
        assert_eq!(
            titles,
            vec!["Starting research", "Gathering sources", "Synthesizing findings", "note"]
        );
    }

    #[tokio::test]
    async fn test_empty_synthesis_reply() {
        let search = Arc::new(
            ScriptedSearchProvider::new()
                .with_default_results(vec![SearchResult::new("https://a", "A")])
                .with_content(Content::with_text("https://a", "A", "text")),
        );
        let llm = Arc::new(MockLlmProvider::with_responses(["   "]));
        let (ctx, _rx) = context(llm, search);
        let note = research_subtopic(&ctx, "r", "topic", "q", "b").await.unwrap();
        assert_eq!(note.summary_markdown, "Could not generate summary for: topic");
        assert_eq!(note.citations.len(), 1);
    }
}
