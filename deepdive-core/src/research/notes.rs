//! Research notes and their citations.
//!
//! A `ResearchNote` is the unit of accumulated knowledge: one synthesized,
//! cited summary per researched subtopic. Notes are immutable once created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source referenced by a note. Local citation `[n]` in the note's summary
/// refers to `citations[n - 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Provider-assigned identifier.
    pub id: String,
    pub url: String,
    pub title: String,
    /// Leading excerpt of the source text.
    pub quote: String,
    pub published_at: Option<String>,
}

/// Synthesized findings for one subtopic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchNote {
    pub subtopic: String,
    /// Markdown with inline `[n]` citations.
    pub summary_markdown: String,
    pub citations: Vec<Citation>,
    pub timestamp: DateTime<Utc>,
}

impl ResearchNote {
    pub fn new(
        subtopic: impl Into<String>,
        summary_markdown: impl Into<String>,
        citations: Vec<Citation>,
    ) -> Self {
        Self {
            subtopic: subtopic.into(),
            summary_markdown: summary_markdown.into(),
            citations,
            timestamp: Utc::now(),
        }
    }

    /// A note that records the absence of findings.
    pub fn empty(subtopic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(subtopic, message, Vec::new())
    }

    /// Markdown rendering with a citation list, as fed to the compressor.
    pub fn to_markdown(&self) -> String {
        let mut text = format!("## {}\n\n{}\n\n", self.subtopic, self.summary_markdown);
        if !self.citations.is_empty() {
            text.push_str("**Citations:**\n");
            for cit in &self.citations {
                text.push_str(&format!("- [{}]({})\n", cit.title, cit.url));
            }
        }
        text
    }
}

/// The planning artifact produced before research starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub title: String,
    pub brief: String,
    /// Search-ready subtopic queries, in preferred order.
    pub subtopics: Vec<String>,
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(n: usize) -> Citation {
        Citation {
            id: format!("id{n}"),
            url: format!("https://example.com/{n}"),
            title: format!("Source {n}"),
            quote: String::new(),
            published_at: None,
        }
    }

    #[test]
    fn test_to_markdown_with_citations() {
        let note = ResearchNote::new("Battery tech", "Cells improved [1].", vec![citation(1)]);
        assert_eq!(
            note.to_markdown(),
            "## Battery tech\n\nCells improved [1].\n\n**Citations:**\n- [Source 1](https://example.com/1)\n"
        );
    }

    #[test]
    fn test_to_markdown_without_citations() {
        let note = ResearchNote::empty("X", "No results found for: X");
        assert_eq!(note.to_markdown(), "## X\n\nNo results found for: X\n\n");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
