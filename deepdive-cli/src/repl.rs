//! Single-query and interactive research modes.

use crate::observer::TerminalObserver;
use deepdive_core::config::DeepdiveConfig;
use deepdive_core::error::JobError;
use deepdive_core::research::{EventSink, JobManager, ResearchContext, SubmitOutcome, spawn_dispatcher};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Plain text: a new query, or the answer to a clarification.
    Submit(String),
    Confirm(Option<String>),
    Cancel,
    Status,
    Report,
    Notes,
    Reset,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        let (command, slashed) = match line.strip_prefix('/') {
            Some(command) => (command, true),
            None => (line, false),
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        if !slashed {
            // Bare words are commands only in their exact form; anything else is a query.
            return match (name.to_lowercase().as_str(), arg.is_empty()) {
                ("research", false) => ReplCommand::Submit(arg.to_string()),
                ("confirm", _) => ReplCommand::Confirm((!arg.is_empty()).then(|| arg.to_string())),
                ("cancel", true) => ReplCommand::Cancel,
                ("status", true) => ReplCommand::Status,
                ("report", true) => ReplCommand::Report,
                ("quit" | "exit", true) => ReplCommand::Quit,
                _ => ReplCommand::Submit(line.to_string()),
            };
        }
        match name {
            "research" | "r" if !arg.is_empty() => ReplCommand::Submit(arg.to_string()),
            "confirm" | "yes" => ReplCommand::Confirm((!arg.is_empty()).then(|| arg.to_string())),
            "cancel" | "stop" => ReplCommand::Cancel,
            "status" => ReplCommand::Status,
            "report" => ReplCommand::Report,
            "notes" => ReplCommand::Notes,
            "reset" => ReplCommand::Reset,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => ReplCommand::Unknown(other.to_string()),
        }
    }
}

const HELP: &str = "\
  <text>              research <text>, or answer a clarification question
  research <query>    start a new research job
  /confirm [query]    research the original (or corrected) query as is
  /cancel             cancel the active research job
  /status             show progress
  /report             print the last report
  /notes              list the research notes so far
  /reset              clear a finished job
  /quit               exit";

struct Session {
    manager: Arc<JobManager>,
    dispatcher: JoinHandle<()>,
}

fn start_session(config: &DeepdiveConfig, print_report: bool) -> anyhow::Result<Session> {
    let (events, rx) = EventSink::channel(config.research.event_channel_capacity);
    let ctx = ResearchContext::from_config(config, events)?;
    let dispatcher = spawn_dispatcher(rx, Arc::new(TerminalObserver { print_report }));
    Ok(Session {
        manager: Arc::new(JobManager::new(ctx)),
        dispatcher,
    })
}

impl Session {
    /// Drop the manager so the event channel closes, then let the
    /// dispatcher print what is left.
    async fn close(self) {
        drop(self.manager);
        if let Err(e) = self.dispatcher.await {
            tracing::warn!(error = %e, "Event dispatcher ended abnormally");
        }
    }
}

fn print_outcome(result: Result<SubmitOutcome, JobError>) {
    match result {
        Ok(SubmitOutcome::NeedsClarification { question, .. }) => {
            println!("\x1b[1;33m?\x1b[0m {question}");
            println!("  (answer with more detail, or /confirm to research as is)");
        }
        Ok(outcome) => println!("{}", outcome.message()),
        Err(JobError::AlreadyActive { state }) => println!(
            "A research job is already {state}. Use /status to check on it or /cancel to stop it."
        ),
        Err(e) => println!("\x1b[31m{e}\x1b[0m"),
    }
}

async fn read_line(
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) -> anyhow::Result<Option<String>> {
    Ok(lines.next_line().await?)
}

/// Research one query to completion. Ctrl-C cancels the job.
pub async fn run_single_query(query: &str, yes: bool, config: DeepdiveConfig) -> anyhow::Result<()> {
    let session = start_session(&config, true)?;
    let manager = session.manager.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut outcome = manager.submit(query, false).await;
    while let Ok(SubmitOutcome::NeedsClarification { question, .. }) = &outcome {
        if yes {
            outcome = manager.confirm_clarification(None).await;
            continue;
        }
        println!("\x1b[1;33m?\x1b[0m {question}");
        print!("  answer (empty to research as is): ");
        std::io::stdout().flush()?;
        outcome = match read_line(&mut lines).await?.map(|l| l.trim().to_string()) {
            Some(answer) if !answer.is_empty() => manager.submit(&answer, true).await,
            _ => manager.confirm_clarification(None).await,
        };
    }
    let outcome = outcome?;
    println!("{}", outcome.message());

    tokio::select! {
        _ = manager.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nCanceling research...");
            manager.cancel().await;
        }
    }

    println!("{}", manager.status_message());
    if let Some(location) = manager.snapshot().report_location {
        println!("Report saved to {location}");
    }
    let failed = manager.snapshot().error;
    drop(manager);
    session.close().await;
    match failed {
        Some(error) => Err(anyhow::anyhow!(error)),
        None => Ok(()),
    }
}

/// Interactive REPL around one job manager.
pub async fn run_interactive(config: DeepdiveConfig) -> anyhow::Result<()> {
    println!(
        "\x1b[1;32mDeepdive\x1b[0m | Model: {} | Max iterations: {}",
        config.llm.model, config.research.max_iterations
    );
    println!("  Type a research question, /help for commands, /quit to exit\n");

    let session = start_session(&config, false)?;
    let manager = session.manager.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\x1b[1;34m> \x1b[0m");
        std::io::stdout().flush()?;
        let Some(line) = read_line(&mut lines).await? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Submit(text) => print_outcome(manager.submit(&text, false).await),
            ReplCommand::Confirm(query) => {
                print_outcome(manager.confirm_clarification(query.as_deref()).await)
            }
            ReplCommand::Cancel => {
                if manager.cancel().await {
                    println!("Research canceled.");
                } else {
                    println!("No research job is running.");
                }
            }
            ReplCommand::Status => println!("{}", manager.status_message()),
            ReplCommand::Report => match manager.last_report_markdown() {
                Some(markdown) => println!("{markdown}"),
                None => println!("No report yet."),
            },
            ReplCommand::Notes => {
                let notes = manager.notes();
                if notes.is_empty() {
                    println!("No notes yet.");
                }
                for (i, note) in notes.iter().enumerate() {
                    println!("{}. {} ({} sources)", i + 1, note.subtopic, note.citations.len());
                }
            }
            ReplCommand::Reset => match manager.reset().await {
                Ok(()) => println!("Cleared."),
                Err(e) => println!("\x1b[31m{e}\x1b[0m"),
            },
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(name) => println!("Unknown command: /{name}. Type /help."),
        }
    }

    if manager.cancel().await {
        println!("Canceled the running job.");
    }
    println!("Goodbye!");
    drop(manager);
    session.close().await;
    Ok(())
}
