//! The iterative supervisor: evaluates accumulated findings and decides,
//! one iteration at a time, whether to research another topic or stop.
//!
//! Topics are researched strictly one per iteration. The configured
//! `max_concurrent_research_units` only reaches the model as a budgeting
//! hint in its prompt.

use super::compression::compress_notes;
use super::context::ResearchContext;
use super::events::Phase;
use super::job::SharedJob;
use super::notes::{ResearchBrief, ResearchNote, truncate_chars};
use super::prompts;
use super::subtopic::research_subtopic;
use crate::brain::extract_json;
use crate::error::{DeepdiveError, JudgmentParseError};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// What the supervisor wants to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorDecision {
    /// Research this topic. May be empty if the model omitted it.
    Continue(String),
    /// Stop; the string is the stated reason.
    Complete(String),
}

impl SupervisorDecision {
    /// Strict decode of `{"action", "topic", "reason"}`. A missing action
    /// means completion.
    pub fn parse(reply: &str) -> Result<Self, JudgmentParseError> {
        let Value::Object(object) = extract_json(reply)? else {
            return Err(JudgmentParseError::new("supervisor reply is not a JSON object"));
        };
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };
        match object.get("action").and_then(Value::as_str).unwrap_or("research_complete") {
            "research_complete" => {
                let reason = text("reason");
                Ok(Self::Complete(if reason.is_empty() {
                    "Research is comprehensive".to_string()
                } else {
                    reason
                }))
            }
            _ => Ok(Self::Continue(text("topic"))),
        }
    }

    /// Decode with the fail-open fallback: an unreadable reply researches
    /// the brief itself.
    pub fn decode(reply: &str, brief: &str) -> Self {
        Self::parse(reply).unwrap_or_else(|e| {
            warn!(error = %e, "Supervisor reply unreadable; researching the brief");
            Self::Continue(brief.to_string())
        })
    }
}

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Complete(String),
    EmptyTopic,
    DuplicateNearCap(String),
    IterationCap,
}

/// Result of a supervised research run.
#[derive(Debug, Clone)]
pub struct SupervisorOutcome {
    pub notes: Vec<ResearchNote>,
    pub iterations: usize,
    pub stop: StopReason,
}

fn normalized(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// Whether `topic` overlaps an already researched topic: a case-insensitive
/// substring match in either direction.
pub fn is_covered<'a>(topic: &str, researched: impl IntoIterator<Item = &'a String>) -> bool {
    let topic = normalized(topic);
    researched.into_iter().any(|done| {
        let done = normalized(done);
        done.contains(&topic) || topic.contains(&done)
    })
}

/// Planned topics not yet covered by anything researched.
pub fn remaining_planned(planned: &[String], researched: &BTreeSet<String>) -> Vec<String> {
    planned
        .iter()
        .filter(|topic| !is_covered(topic, researched))
        .cloned()
        .collect()
}

/// The findings section shown to the supervisor: the compressed digest if
/// there is one, else each note's summary cut to `digest_chars`.
pub fn findings_digest(notes: &[ResearchNote], compressed: &str, digest_chars: usize) -> String {
    if !compressed.is_empty() {
        return format!("\n\n## Current Research Findings (Compressed):\n\n{compressed}\n");
    }
    if notes.is_empty() {
        return String::new();
    }
    let mut digest = String::from("\n\n## Current Research Findings:\n\n");
    for (i, note) in notes.iter().enumerate() {
        digest.push_str(&format!(
            "### Research {}: {}\n{}...\n\n",
            i + 1,
            note.subtopic,
            truncate_chars(&note.summary_markdown, digest_chars)
        ));
    }
    digest
}

/// Run the supervisor loop until the model completes, proposes nothing,
/// repeats itself near the cap, or the iteration cap is reached.
pub async fn supervise(
    ctx: &ResearchContext,
    job: &SharedJob,
    request_id: &str,
    brief: &ResearchBrief,
    original_query: &str,
) -> Result<SupervisorOutcome, DeepdiveError> {
    let settings = &ctx.settings;
    let max_iterations = settings.max_iterations;
    let system = prompts::supervisor_system_prompt(
        &prompts::today(),
        settings.max_concurrent_research_units,
    );

    let mut notes: Vec<ResearchNote> = Vec::new();
    let mut compressed = String::new();
    let mut researched: BTreeSet<String> = BTreeSet::new();
    let mut iteration = 0;
    let mut stop = StopReason::IterationCap;

    while iteration < max_iterations {
        iteration += 1;
        job.set_iteration(iteration);
        info!(request_id, iteration, max_iterations, "Supervisor iteration");
        ctx.events.status(
            request_id,
            Phase::Researching,
            "Evaluating research",
            format!("Assessing findings and deciding next steps (iteration {iteration})"),
            json!({ "iteration": iteration }),
        );

        let researched_list: Vec<String> = researched.iter().cloned().collect();
        let user = prompts::supervisor_user_prompt(
            &brief.brief,
            &researched_list,
            &remaining_planned(&brief.subtopics, &researched),
            &findings_digest(&notes, &compressed, settings.findings_digest_chars),
            settings.max_concurrent_research_units,
        );
        let reply = ctx.brain.ask(&system, &user, &ctx.history).await?;

        let topic = match SupervisorDecision::decode(&reply, &brief.brief) {
            SupervisorDecision::Complete(reason) => {
                info!(request_id, reason = %reason, "Supervisor completed research");
                ctx.events.status(
                    request_id,
                    Phase::Researching,
                    "Research complete",
                    format!("Supervisor determined research is comprehensive: {reason}"),
                    json!({ "iterations": iteration }),
                );
                stop = StopReason::Complete(reason);
                break;
            }
            SupervisorDecision::Continue(topic) if topic.is_empty() => {
                warn!(request_id, "Supervisor asked for research without a topic; completing");
                stop = StopReason::EmptyTopic;
                break;
            }
            SupervisorDecision::Continue(topic) => topic,
        };

        if is_covered(&topic, &researched) {
            if iteration + 1 >= max_iterations {
                warn!(request_id, topic = %topic, "Repeated topic near the iteration cap; completing");
                stop = StopReason::DuplicateNearCap(topic);
                break;
            }
            info!(request_id, topic = %topic, "Supervisor repeated a researched topic");
        }

        researched.insert(topic.clone());
        job.begin_subtopic(&topic);
        let note = research_subtopic(ctx, request_id, &topic, original_query, &brief.brief).await?;
        job.record_note(note.clone());
        notes.push(note);

        if notes.len() >= settings.compression_threshold {
            match compress_notes(ctx, request_id, &notes).await {
                Ok(text) if !text.trim().is_empty() => {
                    compressed = text;
                    job.set_compressed_context(&compressed);
                }
                Ok(_) => warn!(request_id, "Compression returned nothing; keeping previous digest"),
                Err(e) => warn!(request_id, error = %e, "Compression failed; keeping previous digest"),
            }
        }

        let pause = settings.iteration_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    if stop == StopReason::IterationCap {
        warn!(request_id, max_iterations, "Iteration cap ended research");
        ctx.events.status(
            request_id,
            Phase::Researching,
            "Max iterations reached",
            format!("Completed {iteration} research iterations"),
            json!({ "iterations": iteration }),
        );
    }
    info!(request_id, iterations = iteration, notes = notes.len(), "Supervisor finished");

    Ok(SupervisorOutcome {
        notes,
        iterations: iteration,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_research_topic() {
        let reply = r#"{"action": "research_topic", "topic": " Tesla Inc. supply chain ", "reason": "gap"}"#;
        assert_eq!(
            SupervisorDecision::parse(reply).unwrap(),
            SupervisorDecision::Continue("Tesla Inc. supply chain".into())
        );
    }

    #[test]
    fn test_parse_complete_with_default_reason() {
        assert_eq!(
            SupervisorDecision::parse(r#"{"action": "research_complete"}"#).unwrap(),
            SupervisorDecision::Complete("Research is comprehensive".into())
        );
        assert_eq!(
            SupervisorDecision::parse(r#"{"reason": "enough"}"#).unwrap(),
            SupervisorDecision::Complete("enough".into())
        );
    }

    #[test]
    fn test_decode_fails_open_to_brief() {
        assert_eq!(
            SupervisorDecision::decode("Let me think about it.", "The brief"),
            SupervisorDecision::Continue("The brief".into())
        );
    }

    #[test]
    fn test_is_covered_either_direction() {
        let done: BTreeSet<String> = ["Tesla Inc. battery technology".to_string()].into();
        assert!(is_covered("tesla inc. BATTERY", &done));
        assert!(is_covered("  Tesla Inc. battery technology innovations ", &done));
        assert!(!is_covered("Tesla Inc. autopilot", &done));
    }

    #[test]
    fn test_remaining_planned() {
        let planned = vec![
            "Tesla Inc. battery".to_string(),
            "Tesla Inc. autopilot".to_string(),
        ];
        let done: BTreeSet<String> = ["Tesla Inc. battery technology".to_string()].into();
        assert_eq!(remaining_planned(&planned, &done), vec!["Tesla Inc. autopilot"]);
    }

    #[test]
    fn test_findings_digest_prefers_compressed() {
        let notes = vec![ResearchNote::empty("A", "abcdef")];
        assert_eq!(
            findings_digest(&notes, "digest", 3),
            "\n\n## Current Research Findings (Compressed):\n\ndigest\n"
        );
        assert_eq!(
            findings_digest(&notes, "", 3),
            "\n\n## Current Research Findings:\n\n### Research 1: A\nabc...\n\n"
        );
        assert_eq!(findings_digest(&[], "", 3), "");
    }
}
