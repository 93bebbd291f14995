//! Research planning: turns the confirmed query into a brief, a title and a
//! list of search-ready subtopics.

use super::context::ResearchContext;
use super::events::Phase;
use super::notes::{ResearchBrief, truncate_chars};
use super::prompts;
use crate::brain::extract_json;
use crate::error::LlmError;
use serde_json::{Value, json};
use tracing::{info, warn};

fn default_title(query: &str) -> String {
    format!("Research: {}", truncate_chars(query, 50))
}

/// Decode the planning reply. Never fails: missing pieces fall back to the
/// query, a default title and no subtopics.
pub fn decode_brief(query: &str, reply: &str) -> ResearchBrief {
    let object = match extract_json(reply) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!("Brief reply was not a JSON object; using raw text");
            let text = reply.trim();
            return ResearchBrief {
                title: default_title(query),
                brief: if text.is_empty() { query.to_string() } else { text.to_string() },
                subtopics: Vec::new(),
            };
        }
    };

    let string_field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let subtopics = match object.get("subtopics") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    ResearchBrief {
        title: string_field("title").unwrap_or_else(|| default_title(query)),
        brief: string_field("brief").unwrap_or_else(|| query.to_string()),
        subtopics,
    }
}

/// Ask the model for a research plan.
pub async fn write_brief(
    ctx: &ResearchContext,
    request_id: &str,
    query: &str,
) -> Result<ResearchBrief, LlmError> {
    info!(request_id, query, "Creating research plan");
    ctx.events.status(
        request_id,
        Phase::Briefing,
        "Planning research",
        format!("Creating research plan for: {query}"),
        json!({}),
    );

    let reply = ctx
        .brain
        .ask(
            &prompts::brief_system_prompt(query),
            &prompts::brief_user_prompt(query),
            &ctx.history,
        )
        .await?;
    let brief = decode_brief(query, &reply);

    info!(
        request_id,
        title = %brief.title,
        subtopics = brief.subtopics.len(),
        "Research plan ready"
    );
    ctx.events.status(
        request_id,
        Phase::Briefing,
        brief.title.clone(),
        format!("Research plan ready: {}", brief.title),
        json!({}),
    );
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_full_plan() {
        let reply = r#"{"title": "Tesla Batteries", "brief": "Study cells", "subtopics": ["Tesla Inc. 4680 cells", " ", 7, "Tesla Inc. battery suppliers"]}"#;
        assert_eq!(
            decode_brief("Tesla", reply),
            ResearchBrief {
                title: "Tesla Batteries".into(),
                brief: "Study cells".into(),
                subtopics: vec![
                    "Tesla Inc. 4680 cells".into(),
                    "Tesla Inc. battery suppliers".into()
                ],
            }
        );
    }

    #[test]
    fn test_decode_missing_fields_fall_back() {
        let query = "x".repeat(60);
        let brief = decode_brief(&query, r#"{"subtopics": "not a list"}"#);
        assert_eq!(brief.brief, query);
        assert_eq!(brief.title, format!("Research: {}", "x".repeat(50)));
        assert!(brief.subtopics.is_empty());
    }

    #[test]
    fn test_decode_plain_text_reply() {
        let brief = decode_brief("Tesla", "Investigate Tesla's battery roadmap.");
        assert_eq!(brief.brief, "Investigate Tesla's battery roadmap.");
        assert_eq!(brief.title, "Research: Tesla");
        assert_eq!(decode_brief("Tesla", "   ").brief, "Tesla");
    }
}
