//! Persistence of finished reports.

use crate::error::StorageError;
use crate::persistence::atomic_write_async;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Accepts a finished report and returns where it was stored.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, title: &str, body: &str) -> Result<String, StorageError>;
}

/// Writes each report as a markdown file under `dir`.
pub struct FileReportStore {
    dir: PathBuf,
}

impl FileReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

/// `YYYY-MM-DD_HHMMSS_<title>.md`, keeping only alphanumerics, space, `-`
/// and `_` from the title, trimmed and cut to 50 characters.
pub fn report_file_name(title: &str, at: DateTime<Local>) -> String {
    let safe: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe: String = safe.trim().chars().take(50).collect();
    let safe = if safe.is_empty() { "report".to_string() } else { safe };
    format!("{}_{}.md", at.format("%Y-%m-%d_%H%M%S"), safe)
}

fn render_report_file(title: &str, body: &str, at: DateTime<Local>) -> String {
    format!(
        "# {title}\n\n*Generated: {}*\n\n---\n\n{body}",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[async_trait]
impl ReportStore for FileReportStore {
    async fn save(&self, title: &str, body: &str) -> Result<String, StorageError> {
        let now = Local::now();
        let path = self.dir.join(report_file_name(title, now));
        let contents = render_report_file(title, body, now);
        atomic_write_async(path.clone(), contents.into_bytes())
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "Report saved");
        Ok(path.display().to_string())
    }
}

/// Keeps reports in memory.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every save fails.
    pub fn failing() -> Self {
        Self {
            reports: Mutex::default(),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save(&self, title: &str, body: &str) -> Result<String, StorageError> {
        if self.fail {
            return Err(StorageError::Unavailable {
                message: "memory store configured to fail".into(),
            });
        }
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        reports.push((title.to_string(), body.to_string()));
        Ok(format!("memory://{}", reports.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 15, 12, 34, 56).unwrap()
    }

    #[test]
    fn test_report_file_name_sanitizes_title() {
        assert_eq!(
            report_file_name("  Tesla: Battery/Tech?  ", fixed_time()),
            "2025-01-15_123456_Tesla BatteryTech.md"
        );
    }

    #[test]
    fn test_report_file_name_truncates_and_defaults() {
        let long = "a".repeat(80);
        let name = report_file_name(&long, fixed_time());
        assert_eq!(name, format!("2025-01-15_123456_{}.md", "a".repeat(50)));
        assert_eq!(report_file_name("???", fixed_time()), "2025-01-15_123456_report.md");
    }

    #[test]
    fn test_render_report_file() {
        let text = render_report_file("T", "Body", fixed_time());
        assert_eq!(text, "# T\n\n*Generated: 2025-01-15 12:34:56*\n\n---\n\nBody");
    }

    #[tokio::test]
    async fn test_file_store_writes_report() {
        let dir = TempDir::new().unwrap();
        let store = FileReportStore::new(dir.path().join("reports"));
        let location = store.save("Battery Report", "Findings [1]").await.unwrap();
        let written = std::fs::read_to_string(&location).unwrap();
        assert!(written.starts_with("# Battery Report\n\n*Generated: "));
        assert!(written.ends_with("---\n\nFindings [1]"));
        assert!(location.ends_with("_Battery Report.md"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryReportStore::new();
        assert_eq!(store.save("a", "b").await.unwrap(), "memory://1");
        assert_eq!(store.reports(), vec![("a".to_string(), "b".to_string())]);
        assert!(MemoryReportStore::failing().save("a", "b").await.is_err());
    }
}
