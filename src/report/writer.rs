use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json as json;

use crate::config::{ReportFormat, ReportOptions};
use crate::report::render::render_markdown;
use crate::report::Report;

/// Writes `report` in the configured format, replacing any earlier report.
pub async fn write_report(
    report: &Report,
    options: &ReportOptions,
) -> Result<PathBuf> {
    let path = options.path();
    let contents = match options.format {
        ReportFormat::Markdown => render_markdown(report),
        ReportFormat::Json => json::to_string_pretty(&report.to_json())?,
    };
    tokio::fs::create_dir_all(&options.output_directory)
        .await
        .with_context(|| {
            format!("creating {}", options.output_directory.display())
        })?;
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("writing report to {}", path.display()))?;
    log::info!("wrote {} issues to {}", report.total(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::issue::{IssueRecord, Severity};

    fn report() -> Report {
        let issue = IssueRecord::new(
            Severity::High,
            "Health endpoint not healthy",
            "Health Check",
            "http://localhost:3000/health",
            "Server Error",
            "/health returned 500 Internal Server Error",
        )
        .unwrap();
        Report::from_issues(vec![issue], Utc::now(), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_writes_markdown_into_new_directory() {
        let root = tempfile::TempDir::new().unwrap();
        let options = ReportOptions {
            output_directory: root.path().join("reports"),
            format: ReportFormat::Markdown,
        };
        let path = write_report(&report(), &options).await.unwrap();
        assert_eq!(path, root.path().join("reports/qa_report.md"));
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with("# QA Report"));
        assert!(contents.contains("### 1. Health endpoint not healthy"));
    }

    #[tokio::test]
    async fn test_writes_json() {
        let root = tempfile::TempDir::new().unwrap();
        let options = ReportOptions {
            output_directory: root.path().to_path_buf(),
            format: ReportFormat::Json,
        };
        let path = write_report(&report(), &options).await.unwrap();
        let value: json::Value =
            json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["summary"]["high"], 1);
        assert_eq!(value["issues"][0]["issue_type"], "Server Error");
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_an_error() {
        let root = tempfile::TempDir::new().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let options = ReportOptions {
            output_directory: blocker.join("reports"),
            format: ReportFormat::Markdown,
        };
        assert!(write_report(&report(), &options).await.is_err());
    }
}
