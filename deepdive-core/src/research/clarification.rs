//! Decides whether a query is specific enough to research directly.
//!
//! Every doubtful outcome asks the user instead of proceeding: an empty
//! preview, a low-confidence or unreadable judgment, or a failed model call.

use super::context::ResearchContext;
use super::prompts;
use super::search::SearchResult;
use crate::brain::extract_json;
use crate::error::JudgmentParseError;
use serde_json::Value;
use tracing::{info, warn};

/// Outcome of the clarification analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClarificationDecision {
    pub needs_clarification: bool,
    /// The question to put to the user when clarification is needed.
    pub message: Option<String>,
}

impl ClarificationDecision {
    pub fn proceed() -> Self {
        Self {
            needs_clarification: false,
            message: None,
        }
    }

    pub fn ask(message: impl Into<String>) -> Self {
        Self {
            needs_clarification: true,
            message: Some(message.into()),
        }
    }
}

pub fn no_results_message(query: &str) -> String {
    format!("I couldn't find any results for '{query}'. Could you clarify what you're looking for?")
}

fn uncertain_message(query: &str) -> String {
    format!(
        "I found some results for '{query}', but I want to make sure I'm researching the right thing. Could you clarify?"
    )
}

/// Decode the model's judgment. Proceeds only on an explicit
/// `needs_clarification: false` with `confidence: "high"`.
pub fn decode_judgment(query: &str, reply: &str) -> Result<ClarificationDecision, JudgmentParseError> {
    let Value::Object(object) = extract_json(reply)? else {
        return Err(JudgmentParseError::new("clarification reply is not a JSON object"));
    };

    let needs = match object.get("needs_clarification") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    };
    let confidence = object
        .get("confidence")
        .and_then(Value::as_str)
        .unwrap_or("medium")
        .trim()
        .to_ascii_lowercase();
    info!(needs_clarification = needs, confidence = %confidence, "Clarification judgment");

    if !needs && confidence == "high" {
        return Ok(ClarificationDecision::proceed());
    }
    let message = object
        .get("clarification_message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| needs && !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uncertain_message(query));
    Ok(ClarificationDecision::ask(message))
}

/// Judge `query` against its preview `results`.
pub async fn analyze(ctx: &ResearchContext, query: &str, results: &[SearchResult]) -> ClarificationDecision {
    if results.is_empty() {
        return ClarificationDecision::ask(no_results_message(query));
    }

    let reply = ctx
        .brain
        .ask(
            prompts::CLARIFICATION_SYSTEM_PROMPT,
            &prompts::clarification_user_prompt(query, results),
            &ctx.history,
        )
        .await;

    match reply {
        Ok(text) => decode_judgment(query, &text).unwrap_or_else(|e| {
            warn!(error = %e, "Clarification judgment unreadable; asking the user");
            ClarificationDecision::ask(format!(
                "I found some results for '{query}'. Is this what you're looking for?"
            ))
        }),
        Err(e) => {
            warn!(error = %e, "Clarification call failed; asking the user");
            ClarificationDecision::ask(format!(
                "I found some results for '{query}'. Could you confirm this is what you're looking for?"
            ))
        }
    }
}
