//! Single-job lifecycle: state machine, cancellation and progress.
//!
//! At most one job is active per `JobManager`. `submit` runs the preview
//! search and clarification inline, then hands the rest of the pipeline to
//! a background task that owns the job until it reaches a terminal state.

use super::clarification;
use super::context::ResearchContext;
use super::events::Phase;
use super::notes::{ResearchBrief, ResearchNote};
use super::orchestrator::run_job;
use super::search::quick_search;
use crate::error::JobError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle state of the research job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Clarifying,
    Briefing,
    Researching,
    Reporting,
    Done,
    Canceled,
    Error,
}

impl JobState {
    pub const ALL: [JobState; 8] = [
        JobState::Idle,
        JobState::Clarifying,
        JobState::Briefing,
        JobState::Researching,
        JobState::Reporting,
        JobState::Done,
        JobState::Canceled,
        JobState::Error,
    ];

    /// True while a job is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Clarifying | JobState::Briefing | JobState::Researching | JobState::Reporting
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::Clarifying => "clarifying",
            JobState::Briefing => "briefing",
            JobState::Researching => "researching",
            JobState::Reporting => "reporting",
            JobState::Done => "done",
            JobState::Canceled => "canceled",
            JobState::Error => "error",
        };
        f.write_str(name)
    }
}

/// All mutable state of one research job.
#[derive(Debug, Clone, Default)]
pub struct Job {
    pub request_id: String,
    pub state: JobState,
    pub original_query: String,
    pub clarified_query: Option<String>,
    /// A clarification question was asked and the job waits for the answer.
    /// False while the preview search is still running.
    pub awaiting_confirmation: bool,
    pub brief: String,
    pub title: String,
    pub planned_subtopics: Vec<String>,
    pub notes: Vec<ResearchNote>,
    pub compressed_context: String,
    pub final_report: Option<String>,
    pub report_location: Option<String>,
    pub cancel_requested: bool,
    pub current_subtopic: Option<String>,
    pub sources_found: usize,
    pub iteration: usize,
    /// User-safe failure text, set on ERROR.
    pub error: Option<String>,
}

/// The job shared between the manager and its background task.
#[derive(Clone, Default)]
pub struct SharedJob {
    inner: Arc<Mutex<Job>>,
}

impl SharedJob {
    fn lock(&self) -> std::sync::MutexGuard<'_, Job> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the job under its lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> Job {
        self.lock().clone()
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    pub fn set_state(&self, state: JobState) {
        self.lock().state = state;
    }

    pub fn apply_brief(&self, brief: &ResearchBrief) {
        let mut job = self.lock();
        job.brief = brief.brief.clone();
        job.title = brief.title.clone();
        job.planned_subtopics = brief.subtopics.clone();
    }

    pub fn set_iteration(&self, iteration: usize) {
        self.lock().iteration = iteration;
    }

    pub fn begin_subtopic(&self, subtopic: &str) {
        self.lock().current_subtopic = Some(subtopic.to_string());
    }

    pub fn record_note(&self, note: ResearchNote) {
        let mut job = self.lock();
        job.sources_found += note.citations.len();
        job.current_subtopic = None;
        job.notes.push(note);
    }

    pub fn set_compressed_context(&self, text: &str) {
        self.lock().compressed_context = text.to_string();
    }

    /// Move to a terminal state.
    pub fn finish(&self, state: JobState, error: Option<String>) {
        let mut job = self.lock();
        job.state = state;
        job.current_subtopic = None;
        job.error = error;
    }
}

/// Progress snapshot for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub request_id: Option<String>,
    pub state: JobState,
    pub title: String,
    pub current_subtopic: Option<String>,
    pub subtopics_completed: usize,
    pub planned_subtopics: usize,
    pub sources_found: usize,
    pub iteration: usize,
    pub max_iterations: usize,
    pub note_count: usize,
}

/// Result of a [`JobManager::submit`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Research was launched in the background.
    Started { request_id: String, message: String },
    /// The preview looked doubtful; the user should answer `question`.
    NeedsClarification { request_id: String, question: String },
    /// A clarification is pending and the call did not answer it.
    AwaitingAnswer { message: String },
}

impl SubmitOutcome {
    /// The text to show the user.
    pub fn message(&self) -> &str {
        match self {
            SubmitOutcome::Started { message, .. } => message,
            SubmitOutcome::NeedsClarification { question, .. } => question,
            SubmitOutcome::AwaitingAnswer { message } => message,
        }
    }
}

struct RunningTask {
    token: CancellationToken,
    done: Shared<BoxFuture<'static, ()>>,
}

/// Owns the single research job of a session.
pub struct JobManager {
    ctx: ResearchContext,
    job: SharedJob,
    task: tokio::sync::Mutex<Option<RunningTask>>,
}

fn new_request_id() -> String {
    format!("research_{}", chrono::Utc::now().timestamp())
}

impl JobManager {
    pub fn new(ctx: ResearchContext) -> Self {
        Self {
            ctx,
            job: SharedJob::default(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &ResearchContext {
        &self.ctx
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Start research on `query`, or answer a pending clarification.
    ///
    /// Once a clarification question is pending, `confirmed = true` launches
    /// on `query` if it differs from the original, else on the original; a
    /// different `query` without confirmation is taken as the answer.
    /// Anything else while a job is active, including a submit while the
    /// preview search is still running, fails with `AlreadyActive`.
    pub async fn submit(&self, query: &str, confirmed: bool) -> Result<SubmitOutcome, JobError> {
        let query = query.trim();

        let pending = self.job.update(|job| {
            (job.state == JobState::Clarifying && job.awaiting_confirmation)
                .then(|| job.original_query.clone())
        });
        if let Some(original) = pending {
            let changed = !query.is_empty() && query != original;
            if !confirmed && !changed {
                return Ok(SubmitOutcome::AwaitingAnswer {
                    message: "I'm waiting for your answer to the clarification question above. \
                              Please confirm or provide more details."
                        .to_string(),
                });
            }
            let final_query = if changed { query.to_string() } else { original };
            let message = format!(
                "Perfect! Starting deep research on: {final_query}. I'll keep you updated as I make progress!"
            );
            return self.launch(&final_query, message).await;
        }

        if query.is_empty() {
            return Err(JobError::EmptyQuery);
        }
        let request_id = self.begin(query)?;
        self.clarify_and_launch(&request_id, query).await
    }

    /// Launch research after a clarification, on `final_query` or the
    /// original query.
    pub async fn confirm_clarification(
        &self,
        final_query: Option<&str>,
    ) -> Result<SubmitOutcome, JobError> {
        let (state, awaiting) = self.job.update(|job| (job.state, job.awaiting_confirmation));
        if state != JobState::Clarifying {
            return Err(JobError::NotClarifying { state });
        }
        if !awaiting {
            return Err(JobError::AlreadyActive { state });
        }
        self.submit(final_query.unwrap_or_default(), true).await
    }

    /// Reset a finished job and enter CLARIFYING, atomically.
    fn begin(&self, query: &str) -> Result<String, JobError> {
        self.job.update(|job| {
            if job.state.is_active() {
                warn!(state = %job.state, "Blocked submit; research already active");
                return Err(JobError::AlreadyActive { state: job.state });
            }
            let request_id = new_request_id();
            *job = Job {
                request_id: request_id.clone(),
                state: JobState::Clarifying,
                original_query: query.to_string(),
                ..Job::default()
            };
            info!(request_id = %request_id, query, "Research job accepted");
            Ok(request_id)
        })
    }

    async fn clarify_and_launch(&self, request_id: &str, query: &str) -> Result<SubmitOutcome, JobError> {
        let ctx = &self.ctx;
        let preview = quick_search(
            &ctx.search,
            &ctx.events,
            request_id,
            query,
            ctx.search_config.preview_num_results,
        )
        .await;

        let results = match preview {
            Ok(results) => results,
            Err(e) => {
                warn!(request_id, error = %e, "Preview search failed; researching the raw query");
                let message =
                    format!("Starting deep research on: {query}. I'll keep you updated as I make progress!");
                return self.launch(query, message).await;
            }
        };

        let decision = clarification::analyze(ctx, query, &results).await;
        if decision.needs_clarification {
            let question = decision
                .message
                .unwrap_or_else(|| clarification::no_results_message(query));
            self.job.update(|job| match job.state {
                JobState::Clarifying => {
                    job.awaiting_confirmation = true;
                    Ok(())
                }
                JobState::Canceled => Err(JobError::Canceled),
                state => Err(JobError::NotClarifying { state }),
            })?;
            info!(request_id, "Clarification needed");
            ctx.events.status(
                request_id,
                Phase::Clarifying,
                "Clarification needed",
                question.clone(),
                json!({ "original_query": query }),
            );
            return Ok(SubmitOutcome::NeedsClarification {
                request_id: request_id.to_string(),
                question,
            });
        }

        let message = format!(
            "Perfect! I found relevant results. Starting deep research on: {query}. I'll keep you updated as I make progress!"
        );
        self.launch(query, message).await
    }

    /// Move CLARIFYING → BRIEFING and spawn the background pipeline.
    async fn launch(&self, query: &str, message: String) -> Result<SubmitOutcome, JobError> {
        let mut slot = self.task.lock().await;
        let request_id = self.job.update(|job| match job.state {
            JobState::Clarifying => {
                job.state = JobState::Briefing;
                job.awaiting_confirmation = false;
                job.clarified_query = Some(query.to_string());
                if job.request_id.is_empty() {
                    job.request_id = new_request_id();
                }
                Ok(job.request_id.clone())
            }
            JobState::Canceled => Err(JobError::Canceled),
            state => Err(JobError::NotClarifying { state }),
        })?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_job(
            self.ctx.clone(),
            self.job.clone(),
            request_id.clone(),
            query.to_string(),
            token.clone(),
        ));
        let done = async move {
            if let Err(e) = handle.await {
                warn!(error = %e, "Research task did not finish cleanly");
            }
        }
        .boxed()
        .shared();
        *slot = Some(RunningTask { token, done });

        info!(request_id = %request_id, query, "Research launched");
        Ok(SubmitOutcome::Started { request_id, message })
    }

    /// Cancel the active job. Returns false if nothing was active. When it
    /// returns, the job is terminal and its task has stopped.
    pub async fn cancel(&self) -> bool {
        let slot = self.task.lock().await;
        let state = self.job.update(|job| {
            if job.state.is_active() {
                job.cancel_requested = true;
            }
            job.state
        });
        if !state.is_active() {
            return false;
        }
        info!(state = %state, "Cancel requested");

        match slot.as_ref() {
            Some(task) if state != JobState::Clarifying => {
                task.token.cancel();
                task.done.clone().await;
            }
            _ => {}
        }

        // Covers CLARIFYING (no task yet) and a task that died without
        // reaching a terminal state.
        let forced = self.job.update(|job| {
            if job.state.is_active() {
                job.state = JobState::Canceled;
                true
            } else {
                false
            }
        });
        if forced {
            let request_id = self.job.snapshot().request_id;
            self.ctx.events.clear_pending();
            self.ctx.events.status(
                &request_id,
                Phase::Canceled,
                "Research canceled",
                "The research job was canceled.",
                json!({}),
            );
        }
        true
    }

    /// Clear a finished job back to IDLE.
    pub async fn reset(&self) -> Result<(), JobError> {
        let mut slot = self.task.lock().await;
        self.job.update(|job| {
            if job.state.is_active() {
                return Err(JobError::NotTerminal { state: job.state });
            }
            *job = Job::default();
            Ok(())
        })?;
        *slot = None;
        self.ctx.events.clear_pending();
        Ok(())
    }

    /// Wait for the background task, if any, to finish.
    pub async fn wait(&self) {
        let done = self.task.lock().await.as_ref().map(|t| t.done.clone());
        if let Some(done) = done {
            done.await;
        }
    }

    pub fn status(&self) -> JobStatus {
        let job = self.job.snapshot();
        JobStatus {
            request_id: (!job.request_id.is_empty()).then_some(job.request_id),
            state: job.state,
            title: job.title,
            current_subtopic: job.current_subtopic,
            subtopics_completed: job.notes.len(),
            planned_subtopics: job.planned_subtopics.len(),
            sources_found: job.sources_found,
            iteration: job.iteration,
            max_iterations: self.ctx.settings.max_iterations,
            note_count: job.notes.len(),
        }
    }

    /// One sentence describing the job for the user.
    pub fn status_message(&self) -> String {
        let status = self.status();
        match status.state {
            JobState::Idle => {
                "No research job is currently running. You can start one by asking me to research a topic!"
                    .to_string()
            }
            JobState::Done => format!(
                "Research completed! I found {} key insights. The full report is ready on your screen.",
                status.note_count
            ),
            JobState::Canceled => "The research job was canceled.".to_string(),
            JobState::Error => {
                "The research job encountered an error and couldn't complete.".to_string()
            }
            state => {
                let mut message = format!("Research is currently {state}");
                if let Some(subtopic) = &status.current_subtopic {
                    message.push_str(&format!(". Working on: {subtopic}"));
                }
                if status.planned_subtopics > 0 {
                    message.push_str(&format!(
                        ". Progress: {}/{} subtopics completed",
                        status.subtopics_completed, status.planned_subtopics
                    ));
                }
                if status.sources_found > 0 {
                    message.push_str(&format!(". Found {} sources so far", status.sources_found));
                }
                message.push('.');
                message
            }
        }
    }

    /// `(title, report)` of the last finished job.
    pub fn last_report(&self) -> Option<(String, String)> {
        let job = self.job.snapshot();
        let report = job.final_report?;
        let title = if job.title.is_empty() {
            "Research Report".to_string()
        } else {
            job.title
        };
        Some((title, report))
    }

    /// The last report as a markdown document.
    pub fn last_report_markdown(&self) -> Option<String> {
        self.last_report()
            .map(|(title, report)| format!("# {title}\n\n{report}"))
    }

    pub fn notes(&self) -> Vec<ResearchNote> {
        self.job.snapshot().notes
    }

    /// Full copy of the job.
    pub fn snapshot(&self) -> Job {
        self.job.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        let active: Vec<JobState> = JobState::ALL.into_iter().filter(|s| s.is_active()).collect();
        assert_eq!(
            active,
            vec![
                JobState::Clarifying,
                JobState::Briefing,
                JobState::Researching,
                JobState::Reporting
            ]
        );
    }

    #[test]
    fn test_state_display_matches_serde() {
        for state in JobState::ALL {
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::Value::String(state.to_string())
            );
        }
    }

    #[test]
    fn test_record_note_updates_progress() {
        let job = SharedJob::default();
        job.begin_subtopic("A");
        let citation = crate::research::notes::Citation {
            id: "1".into(),
            url: "https://a".into(),
            title: "A".into(),
            quote: String::new(),
            published_at: None,
        };
        job.record_note(ResearchNote::new("A", "[1]", vec![citation]));
        let snapshot = job.snapshot();
        assert_eq!(snapshot.notes.len(), 1);
        assert_eq!(snapshot.sources_found, 1);
        assert_eq!(snapshot.current_subtopic, None);
    }

    #[test]
    fn test_outcome_message() {
        let outcome = SubmitOutcome::NeedsClarification {
            request_id: "r".into(),
            question: "Which Tesla?".into(),
        };
        assert_eq!(outcome.message(), "Which Tesla?");
    }
}
