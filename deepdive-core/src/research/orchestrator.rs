//! The background research pipeline: brief, supervised research, report,
//! storage.

use super::briefing::write_brief;
use super::context::ResearchContext;
use super::events::Phase;
use super::job::{JobState, SharedJob};
use super::notes::truncate_chars;
use super::report::{Report, generate_report};
use super::supervisor::supervise;
use crate::error::{DeepdiveError, JobError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run a launched job to a terminal state. Cancellation through `token` is
/// observed at the next suspension point; the job is CANCELED before this
/// returns and a terminal status event is always emitted.
///
/// Once the report is written the job can no longer be canceled: the
/// report is stored and the job ends DONE even if a cancel arrives while
/// the store is saving.
pub async fn run_job(
    ctx: ResearchContext,
    job: SharedJob,
    request_id: String,
    query: String,
    token: CancellationToken,
) -> JobState {
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(DeepdiveError::Job(JobError::Canceled)),
        result = pipeline(&ctx, &job, &request_id, &query) => result,
    };
    let outcome = match outcome {
        Ok(report) => {
            store_report(&ctx, &job, &request_id, &report).await;
            Ok(())
        }
        Err(e) => Err(e),
    };

    ctx.events.clear_pending();
    match outcome {
        Ok(()) => {
            job.finish(JobState::Done, None);
            let snapshot = job.snapshot();
            info!(request_id = %request_id, notes = snapshot.notes.len(), "Research job done");
            ctx.events.status(
                &request_id,
                Phase::Done,
                "Research complete",
                format!("Report ready: {}", snapshot.title),
                json!({ "notes": snapshot.notes.len(), "sources": snapshot.sources_found }),
            );
            JobState::Done
        }
        Err(DeepdiveError::Job(JobError::Canceled)) => {
            job.finish(JobState::Canceled, None);
            info!(request_id = %request_id, "Research job canceled");
            ctx.events.status(
                &request_id,
                Phase::Canceled,
                "Research canceled",
                "Research was canceled.",
                json!({}),
            );
            JobState::Canceled
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Research job failed");
            let message = user_error_message(&e);
            job.finish(JobState::Error, Some(message.clone()));
            ctx.events
                .status(&request_id, Phase::Error, "Research failed", message, json!({}));
            JobState::Error
        }
    }
}

/// Short, user-safe description of a failure.
pub fn user_error_message(err: &DeepdiveError) -> String {
    format!(
        "Sorry, I encountered an error during research: {}",
        truncate_chars(&err.to_string(), 100)
    )
}

async fn pipeline(
    ctx: &ResearchContext,
    job: &SharedJob,
    request_id: &str,
    query: &str,
) -> Result<Report, DeepdiveError> {
    let brief = write_brief(ctx, request_id, query).await?;
    job.apply_brief(&brief);
    job.set_state(JobState::Researching);

    let original_query = job.update(|j| {
        if j.original_query.is_empty() {
            query.to_string()
        } else {
            j.original_query.clone()
        }
    });
    let outcome = supervise(ctx, job, request_id, &brief, &original_query).await?;
    info!(
        request_id,
        iterations = outcome.iterations,
        notes = outcome.notes.len(),
        stop = ?outcome.stop,
        "Research phase finished"
    );

    job.set_state(JobState::Reporting);
    let report = generate_report(ctx, request_id, &brief.title, &brief.brief, &outcome.notes).await?;
    Ok(report)
}

async fn store_report(ctx: &ResearchContext, job: &SharedJob, request_id: &str, report: &Report) {
    job.update(|j| j.final_report = Some(report.body.clone()));
    match ctx.store.save(&report.title, &report.body).await {
        Ok(location) => job.update(|j| j.report_location = Some(location)),
        Err(e) => warn!(request_id, error = %e, "Failed to save report"),
    }
}
