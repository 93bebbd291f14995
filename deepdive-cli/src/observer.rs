//! Terminal rendering of research progress.

use async_trait::async_trait;
use deepdive_core::research::{Phase, ResearchNote, ResearchObserver, StatusUpdate};

/// Prints every research event to stdout.
pub struct TerminalObserver {
    /// Print the full report when it is ready.
    pub print_report: bool,
}

fn phase_color(phase: Phase) -> &'static str {
    match phase {
        Phase::Done => "\x1b[1;32m",
        Phase::Canceled => "\x1b[1;33m",
        Phase::Error => "\x1b[1;31m",
        Phase::Compressing => "\x1b[35m",
        _ => "\x1b[36m",
    }
}

#[async_trait]
impl ResearchObserver for TerminalObserver {
    async fn on_status(&self, update: &StatusUpdate) {
        println!(
            "{}[{}]\x1b[0m {}: {}",
            phase_color(update.phase),
            update.phase,
            update.title,
            update.message
        );
    }

    async fn on_note(&self, _request_id: &str, note: &ResearchNote) {
        println!(
            "  \x1b[32m✓\x1b[0m {} ({} sources)",
            note.subtopic,
            note.citations.len()
        );
    }

    async fn on_report_ready(&self, _request_id: &str, title: &str, report: &str, source_count: usize) {
        println!("\n\x1b[1m{title}\x1b[0m ({source_count} sources)\n");
        if self.print_report {
            println!("{report}\n");
        }
    }
}
