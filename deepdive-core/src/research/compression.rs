//! Consolidation of accumulated notes into one findings digest.

use super::context::ResearchContext;
use super::events::Phase;
use super::notes::ResearchNote;
use super::prompts;
use crate::error::LlmError;
use crate::types::Message;
use serde_json::json;
use tracing::info;

/// System prompt, every note as a prior assistant turn, then the
/// clean-up instruction.
pub fn compression_messages(notes: &[ResearchNote], date: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(notes.len() + 2);
    messages.push(Message::system(prompts::compression_system_prompt(date)));
    messages.extend(notes.iter().map(|n| Message::assistant(n.to_markdown())));
    messages.push(Message::user(prompts::COMPRESSION_INSTRUCTION));
    messages
}

/// Remove duplication across `notes`, keeping every fact and source.
/// The returned text replaces any previous digest.
pub async fn compress_notes(
    ctx: &ResearchContext,
    request_id: &str,
    notes: &[ResearchNote],
) -> Result<String, LlmError> {
    info!(request_id, notes = notes.len(), "Compressing research notes");
    ctx.events.status(
        request_id,
        Phase::Compressing,
        "Organizing findings",
        format!(
            "Consolidating {} research topics to keep everything organized",
            notes.len()
        ),
        json!({ "notes_count": notes.len() }),
    );

    let compressed = ctx
        .brain
        .complete(compression_messages(notes, &prompts::today()))
        .await?;
    info!(request_id, chars = compressed.len(), "Notes compressed");
    Ok(compressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_message_layout() {
        let notes = vec![
            ResearchNote::empty("A", "alpha"),
            ResearchNote::empty("B", "beta"),
        ];
        let messages = compression_messages(&notes, "2025-01-01");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::Assistant, Role::Assistant, Role::User]
        );
        assert_eq!(messages[1].content, "## A\n\nalpha\n\n");
        assert!(messages[3].content.starts_with("All above messages"));
        assert!(messages[0].content.contains("2025-01-01"));
    }
}
