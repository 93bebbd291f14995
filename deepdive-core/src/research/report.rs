//! Final report generation with globally renumbered citations.
//!
//! Each note numbers its sources locally (`[1]` is its first citation).
//! Before the report is written, every citation URL gets one global index in
//! first-seen order across the notes, and each note's markers are rewritten
//! to those indices. The sources list appended to the report uses the same
//! numbering.

use super::context::ResearchContext;
use super::events::Phase;
use super::notes::ResearchNote;
use super::prompts;
use crate::error::LlmError;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::info;

/// `[3]`, `[1,2]`, `[1, 3, 5]`.
static CITATION_GROUP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").ok());

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());

/// One entry of the report-wide source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSource {
    /// 1-based global citation number.
    pub index: usize,
    pub url: String,
    pub title: String,
}

/// A generated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub body: String,
    pub source_count: usize,
}

/// De-duplicate citations by URL in first-seen order. Citations without a
/// URL are not listed.
pub fn collect_global_sources(notes: &[ResearchNote]) -> Vec<GlobalSource> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut sources = Vec::new();
    for citation in notes.iter().flat_map(|n| &n.citations) {
        if citation.url.is_empty() || seen.contains_key(citation.url.as_str()) {
            continue;
        }
        let index = sources.len() + 1;
        seen.insert(&citation.url, index);
        sources.push(GlobalSource {
            index,
            url: citation.url.clone(),
            title: citation.title.clone(),
        });
    }
    sources
}

/// Local citation number → global number for one note.
pub fn local_to_global(note: &ResearchNote, sources: &[GlobalSource]) -> HashMap<usize, usize> {
    let by_url: HashMap<&str, usize> = sources.iter().map(|s| (s.url.as_str(), s.index)).collect();
    note.citations
        .iter()
        .enumerate()
        .filter_map(|(i, c)| by_url.get(c.url.as_str()).map(|global| (i + 1, *global)))
        .collect()
}

/// Rewrite citation markers through `mapping` in a single pass, so a
/// rewritten number is never rewritten again. Numbers without a mapping are
/// left as they are.
pub fn remap_citations(text: &str, mapping: &HashMap<usize, usize>) -> String {
    let (Some(group), Some(number)) = (CITATION_GROUP.as_ref(), NUMBER.as_ref()) else {
        return text.to_string();
    };
    group
        .replace_all(text, |caps: &Captures<'_>| {
            let inner = number.replace_all(&caps[1], |n: &Captures<'_>| {
                let local = n[0].parse::<usize>().ok();
                match local.and_then(|l| mapping.get(&l)) {
                    Some(global) => global.to_string(),
                    None => n[0].to_string(),
                }
            });
            format!("[{inner}]")
        })
        .into_owned()
}

/// Every note as a `### subtopic` section with global citation numbers.
pub fn format_findings(notes: &[ResearchNote], sources: &[GlobalSource]) -> String {
    notes
        .iter()
        .map(|note| {
            let remapped = remap_citations(&note.summary_markdown, &local_to_global(note, sources));
            format!("### {}\n\n{}\n\n", note.subtopic, remapped)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Append a `### Sources` list unless the report already has a sources
/// heading or there is nothing to list.
pub fn append_sources(report: &str, sources: &[GlobalSource]) -> String {
    let mut body = report.trim().to_string();
    if sources.is_empty() || body.contains("### Sources") || body.contains("## Sources") {
        return body;
    }
    body.push_str("\n\n### Sources\n\n");
    for source in sources {
        body.push_str(&format!("[{}] {}: {}\n", source.index, source.title, source.url));
    }
    body
}

/// Write the final report for `notes`.
pub async fn generate_report(
    ctx: &ResearchContext,
    request_id: &str,
    title: &str,
    brief: &str,
    notes: &[ResearchNote],
) -> Result<Report, LlmError> {
    info!(request_id, title, notes = notes.len(), "Generating final report");
    ctx.events.status(
        request_id,
        Phase::Reporting,
        "Writing final report",
        format!("Compiling all findings into a comprehensive report on: {title}"),
        json!({ "title": title }),
    );

    let sources = collect_global_sources(notes);
    let findings = format_findings(notes, &sources);
    let prompt = prompts::final_report_prompt(brief, &prompts::today(), &findings);
    let reply = ctx
        .brain
        .complete(vec![crate::types::Message::user(prompt)])
        .await?;

    let body = append_sources(&reply, &sources);
    info!(
        request_id,
        sources = sources.len(),
        chars = body.len(),
        "Final report ready"
    );
    ctx.events
        .report_ready(request_id, title, &body, sources.len());
    Ok(Report {
        title: title.to_string(),
        body,
        source_count: sources.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::notes::Citation;
    use pretty_assertions::assert_eq;

    fn cite(url: &str) -> Citation {
        Citation {
            id: url.to_string(),
            url: url.to_string(),
            title: format!("T {url}"),
            quote: String::new(),
            published_at: None,
        }
    }

    fn note(subtopic: &str, summary: &str, urls: &[&str]) -> ResearchNote {
        ResearchNote::new(subtopic, summary, urls.iter().map(|u| cite(u)).collect())
    }

    #[test]
    fn test_global_sources_first_seen_wins() {
        let notes = vec![
            note("a", "", &["u1", "u2"]),
            note("b", "", &["u2", "", "u3"]),
        ];
        let urls: Vec<(usize, String)> = collect_global_sources(&notes)
            .into_iter()
            .map(|s| (s.index, s.url))
            .collect();
        assert_eq!(
            urls,
            vec![(1, "u1".into()), (2, "u2".into()), (3, "u3".into())]
        );
    }

    #[test]
    fn test_remap_to_offset_indices() {
        let mapping = HashMap::from([(1, 5), (2, 6)]);
        let text = remap_citations("X is true [1]. Y too [2][1].", &mapping);
        assert_eq!(text, "X is true [5]. Y too [6][5].");
    }

    #[test]
    fn test_remap_is_single_pass() {
        // 2 -> 1 and 1 -> 5 must not chain into 2 -> 5.
        let mapping = HashMap::from([(1, 5), (2, 1), (12, 3)]);
        assert_eq!(
            remap_citations("[2] [1] [12] [1, 2,12]", &mapping),
            "[1] [5] [3] [5, 1,3]"
        );
    }

    #[test]
    fn test_remap_leaves_unknown_and_non_citations() {
        let mapping = HashMap::from([(1, 4)]);
        assert_eq!(
            remap_citations("[9] [a] [1] arr[ 1 ]", &mapping),
            "[9] [a] [4] arr[ 1 ]"
        );
    }

    #[test]
    fn test_format_findings_uses_global_numbers() {
        let notes = vec![
            note("First", "Alpha [1].", &["u1"]),
            note("Second", "Beta [1], gamma [2].", &["u2", "u1"]),
        ];
        let sources = collect_global_sources(&notes);
        assert_eq!(
            format_findings(&notes, &sources),
            "### First\n\nAlpha [1].\n\n\n\n### Second\n\nBeta [2], gamma [1].\n\n"
        );
    }

    #[test]
    fn test_append_sources_once() {
        let sources = vec![GlobalSource {
            index: 1,
            url: "https://a".into(),
            title: "A".into(),
        }];
        assert_eq!(
            append_sources("  Body  ", &sources),
            "Body\n\n### Sources\n\n[1] A: https://a\n"
        );
        assert_eq!(append_sources("Body\n## Sources\n[1]", &sources), "Body\n## Sources\n[1]");
        assert_eq!(append_sources("Body", &[]), "Body");
    }

    #[test]
    fn test_regeneration_is_idempotent() {
        let notes = vec![note("a", "[1][2]", &["u1", "u2"]), note("b", "[1]", &["u3"])];
        assert_eq!(collect_global_sources(&notes), collect_global_sources(&notes));
        let s = collect_global_sources(&notes);
        assert_eq!(format_findings(&notes, &s), format_findings(&notes, &s));
    }
}
