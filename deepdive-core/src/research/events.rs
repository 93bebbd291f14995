//! Progress events streamed out of a running research job.
//!
//! The job never calls into a presentation layer directly. It pushes
//! `ResearchEvent`s into a bounded channel through an `EventSink`; a
//! dispatcher task drains the channel into a `ResearchObserver`. Emitting
//! never blocks and never fails: a full or closed channel drops the event.

use super::notes::ResearchNote;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Phase label carried by status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Clarifying,
    Briefing,
    Researching,
    Compressing,
    Reporting,
    Done,
    Canceled,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Clarifying => "clarifying",
            Phase::Briefing => "briefing",
            Phase::Researching => "researching",
            Phase::Compressing => "compressing",
            Phase::Reporting => "reporting",
            Phase::Done => "done",
            Phase::Canceled => "canceled",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// A progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub request_id: String,
    pub phase: Phase,
    pub title: String,
    pub message: String,
    pub stats: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    Status(StatusUpdate),
    Note {
        request_id: String,
        note: ResearchNote,
    },
    ReportReady {
        request_id: String,
        title: String,
        report: String,
        source_count: usize,
    },
}

/// A status line queued for spoken/primary announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub phase: Phase,
    pub title: String,
    pub message: String,
}

/// Only subtopic starts and the reporting phase are worth announcing.
fn should_announce(phase: Phase, title: &str) -> bool {
    match phase {
        Phase::Researching => title.contains("Starting research"),
        Phase::Reporting => true,
        _ => false,
    }
}

/// Cloneable, non-blocking sender for research events.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ResearchEvent>>,
    pending: Arc<Mutex<VecDeque<Announcement>>>,
}

impl EventSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResearchEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                pending: Arc::default(),
            },
            rx,
        )
    }

    /// A sink with no observer attached. Every event is dropped.
    pub fn disconnected() -> Self {
        Self {
            tx: None,
            pending: Arc::default(),
        }
    }

    fn emit(&self, event: ResearchEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(kind = event_kind(&event), "Event channel full; dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(kind = event_kind(&event), "Event channel closed; dropping event");
            }
        }
    }

    /// Emit a status update. `stats` should be a JSON object; anything else
    /// is recorded as an empty map.
    pub fn status(
        &self,
        request_id: &str,
        phase: Phase,
        title: impl Into<String>,
        message: impl Into<String>,
        stats: Value,
    ) {
        let title = title.into();
        let message = message.into();
        if should_announce(phase, &title) {
            self.lock_pending().push_back(Announcement {
                phase,
                title: title.clone(),
                message: message.clone(),
            });
        }
        let stats = match stats {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.emit(ResearchEvent::Status(StatusUpdate {
            request_id: request_id.to_string(),
            phase,
            title,
            message,
            stats,
            timestamp: Utc::now(),
        }));
    }

    pub fn note(&self, request_id: &str, note: &ResearchNote) {
        self.emit(ResearchEvent::Note {
            request_id: request_id.to_string(),
            note: note.clone(),
        });
    }

    pub fn report_ready(&self, request_id: &str, title: &str, report: &str, source_count: usize) {
        self.emit(ResearchEvent::ReportReady {
            request_id: request_id.to_string(),
            title: title.to_string(),
            report: report.to_string(),
            source_count,
        });
    }

    /// Pop the oldest queued announcement.
    pub fn next_announcement(&self) -> Option<Announcement> {
        self.lock_pending().pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Drop every queued announcement.
    pub fn clear_pending(&self) {
        self.lock_pending().clear();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Announcement>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn event_kind(event: &ResearchEvent) -> &'static str {
    match event {
        ResearchEvent::Status(_) => "status",
        ResearchEvent::Note { .. } => "note",
        ResearchEvent::ReportReady { .. } => "report_ready",
    }
}

/// Receives research events. All methods default to no-ops.
#[async_trait]
pub trait ResearchObserver: Send + Sync {
    async fn on_status(&self, _update: &StatusUpdate) {}

    async fn on_note(&self, _request_id: &str, _note: &ResearchNote) {}

    async fn on_report_ready(
        &self,
        _request_id: &str,
        _title: &str,
        _report: &str,
        _source_count: usize,
    ) {
    }
}

/// Drain `rx` into `observer` until every sender is dropped.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<ResearchEvent>,
    observer: Arc<dyn ResearchObserver>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                ResearchEvent::Status(update) => observer.on_status(update).await,
                ResearchEvent::Note { request_id, note } => {
                    observer.on_note(request_id, note).await
                }
                ResearchEvent::ReportReady {
                    request_id,
                    title,
                    report,
                    source_count,
                } => {
                    observer
                        .on_report_ready(request_id, title, report, *source_count)
                        .await
                }
            }
        }
        debug!("Event dispatcher finished");
    })
}

/// An observer that discards everything.
pub struct NoOpObserver;

#[async_trait]
impl ResearchObserver for NoOpObserver {}

/// An observer that records every event, for tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: tokio::sync::Mutex<Vec<ResearchEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ResearchEvent> {
        self.events.lock().await.clone()
    }

    pub async fn statuses(&self) -> Vec<StatusUpdate> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                ResearchEvent::Status(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn notes(&self) -> Vec<ResearchNote> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                ResearchEvent::Note { note, .. } => Some(note.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ResearchObserver for RecordingObserver {
    async fn on_status(&self, update: &StatusUpdate) {
        self.events
            .lock()
            .await
            .push(ResearchEvent::Status(update.clone()));
    }

    async fn on_note(&self, request_id: &str, note: &ResearchNote) {
        self.events.lock().await.push(ResearchEvent::Note {
            request_id: request_id.to_string(),
            note: note.clone(),
        });
    }

    async fn on_report_ready(&self, request_id: &str, title: &str, report: &str, source_count: usize) {
        self.events.lock().await.push(ResearchEvent::ReportReady {
            request_id: request_id.to_string(),
            title: title.to_string(),
            report: report.to_string(),
            source_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Compressing.to_string(), "compressing");
        assert_eq!(
            serde_json::to_value(Phase::Canceled).unwrap(),
            json!("canceled")
        );
    }

    #[tokio::test]
    async fn test_status_reaches_receiver() {
        let (sink, mut rx) = EventSink::channel(8);
        sink.status("r1", Phase::Briefing, "Planning research", "msg", json!({"n": 1}));
        match rx.recv().await.unwrap() {
            ResearchEvent::Status(update) => {
                assert_eq!(update.request_id, "r1");
                assert_eq!(update.phase, Phase::Briefing);
                assert_eq!(update.stats.get("n"), Some(&json!(1)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_full_channel_drops_without_error() {
        let (sink, _rx) = EventSink::channel(1);
        sink.status("r", Phase::Briefing, "a", "", Value::Null);
        sink.status("r", Phase::Briefing, "b", "", Value::Null);
    }

    #[test]
    fn test_closed_channel_drops_without_error() {
        let (sink, rx) = EventSink::channel(4);
        drop(rx);
        sink.report_ready("r", "t", "body", 3);
        EventSink::disconnected().status("r", Phase::Done, "x", "y", Value::Null);
    }

    #[test]
    fn test_announcement_policy() {
        let sink = EventSink::disconnected();
        sink.status("r", Phase::Researching, "Starting research", "Investigating: X", Value::Null);
        sink.status("r", Phase::Researching, "Gathering sources", "Found 3", Value::Null);
        sink.status("r", Phase::Briefing, "Planning research", "", Value::Null);
        sink.status("r", Phase::Reporting, "Writing final report", "", Value::Null);
        assert_eq!(sink.pending_len(), 2);
        assert_eq!(
            sink.next_announcement().unwrap().message,
            "Investigating: X"
        );
        sink.clear_pending();
        assert_eq!(sink.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_forwards_to_observer() {
        let (sink, rx) = EventSink::channel(8);
        let observer = Arc::new(RecordingObserver::new());
        let handle = spawn_dispatcher(rx, observer.clone());

        sink.status("r", Phase::Reporting, "Writing final report", "", Value::Null);
        sink.note("r", &ResearchNote::empty("topic", "nothing"));
        sink.report_ready("r", "Title", "Body", 2);
        drop(sink);
        handle.await.unwrap();

        let events = observer.events().await;
        assert_eq!(events.len(), 3);
        assert_eq!(observer.notes().await[0].subtopic, "topic");
        assert!(matches!(
            events[2],
            ResearchEvent::ReportReady { source_count: 2, .. }
        ));
    }
}
