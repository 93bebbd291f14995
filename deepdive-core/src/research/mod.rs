//! Deep research job engine.
//!
//! Turns one research request into a cancellable background job:
//! 1. **Clarify**: preview search and an ambiguity judgment
//! 2. **Brief**: title, scope and search-ready subtopics
//! 3. **Research**: supervisor loop over subtopic research, with periodic
//!    note compression
//! 4. **Report**: cited report with globally renumbered sources
//!
//! Progress streams to observers through [`events::EventSink`].

pub mod briefing;
pub mod clarification;
pub mod compression;
pub mod context;
pub mod events;
pub mod job;
pub mod notes;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod search;
pub mod storage;
pub mod subtopic;
pub mod supervisor;

pub use context::ResearchContext;
pub use events::{EventSink, Phase, ResearchEvent, ResearchObserver, StatusUpdate, spawn_dispatcher};
pub use job::{JobManager, JobState, JobStatus, SubmitOutcome};
pub use notes::{Citation, ResearchBrief, ResearchNote};
pub use search::{Content, ContentOptions, ExaClient, SearchClient, SearchParams, SearchProvider, SearchResult};
pub use storage::{FileReportStore, MemoryReportStore, ReportStore};
pub use supervisor::SupervisorDecision;
