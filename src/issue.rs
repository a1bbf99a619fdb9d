use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// All severities, most urgent first. Reports are laid out in this order.
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Domain rank, 0 being the most urgent.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    /// Whether `self` is at least as urgent as `threshold`.
    pub fn at_least(self, threshold: Severity) -> bool {
        self.rank() <= threshold.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!("unknown severity: {:?}", other)),
        }
    }
}

pub const TEST_ERROR: &str = "Test Error";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIssue {
    #[error("issue title must not be empty")]
    EmptyTitle,
    #[error("issue description must not be empty (title: {0:?})")]
    EmptyDescription(String),
}

/// One discovered defect. Optional fields are attached with the `with_*`
/// methods before the record is handed to a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    severity: Severity,
    title: String,
    page: String,
    url: String,
    issue_type: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot: Option<PathBuf>,
    timestamp: DateTime<Utc>,
}

impl IssueRecord {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        page: impl Into<String>,
        url: impl Into<String>,
        issue_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, InvalidIssue> {
        let title = title.into();
        let description = description.into();
        if title.trim().is_empty() {
            return Err(InvalidIssue::EmptyTitle);
        }
        if description.trim().is_empty() {
            return Err(InvalidIssue::EmptyDescription(title));
        }
        Ok(IssueRecord {
            severity,
            title,
            page: page.into(),
            url: url.into(),
            issue_type: issue_type.into(),
            description,
            error_message: None,
            expected: None,
            actual: None,
            screenshot: None,
            timestamp: monotonic_now(),
        })
    }

    /// The record standing in for a probe that could not finish. Blank
    /// inputs are replaced so the record is always valid.
    pub(crate) fn test_error(
        severity: Severity,
        title: &str,
        page: &str,
        url: &str,
        error: &str,
    ) -> Self {
        let title = if title.trim().is_empty() {
            "Probe failed".to_string()
        } else {
            title.to_string()
        };
        let description = if error.trim().is_empty() {
            format!("{} without a diagnostic", title)
        } else {
            format!("{}: {}", title, error)
        };
        IssueRecord {
            severity,
            title,
            page: page.to_string(),
            url: url.to_string(),
            issue_type: TEST_ERROR.to_string(),
            description,
            error_message: Some(error.to_string()).filter(|e| !e.trim().is_empty()),
            expected: None,
            actual: None,
            screenshot: None,
            timestamp: monotonic_now(),
        }
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_comparison(
        mut self,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    pub fn with_screenshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.screenshot = Some(path.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn issue_type(&self) -> &str {
        &self.issue_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn expected(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    pub fn actual(&self) -> Option<&str> {
        self.actual.as_deref()
    }

    pub fn screenshot(&self) -> Option<&PathBuf> {
        self.screenshot.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

// Wall clocks can step backwards; record timestamps must not.
fn monotonic_now() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_TIMESTAMP_MICROS.fetch_max(now, Ordering::SeqCst);
    let micros = previous.max(now);
    DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: Severity, title: &str) -> IssueRecord {
        IssueRecord::new(
            severity,
            title,
            "Login Page",
            "http://localhost:3000/es/users/sign_in",
            "Server Error",
            "something broke",
        )
        .unwrap()
    }

    #[test]
    fn test_severity_rank_is_explicit_domain_order() {
        let ranks: Vec<u8> =
            Severity::ALL.iter().map(|severity| severity.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(Severity::Critical.at_least(Severity::High));
        assert!(Severity::High.at_least(Severity::High));
        assert!(!Severity::Medium.at_least(Severity::High));
    }

    #[test]
    fn test_severity_parses_case_insensitively() {
        assert_eq!("high".parse::<Severity>(), Ok(Severity::High));
        assert_eq!(" CRITICAL ".parse::<Severity>(), Ok(Severity::Critical));
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let result = IssueRecord::new(
            Severity::Low,
            "  ",
            "Home",
            "http://localhost",
            "UX Issue",
            "description",
        );
        assert_eq!(result, Err(InvalidIssue::EmptyTitle));
    }

    #[test]
    fn test_empty_description_is_rejected() {
        let result = IssueRecord::new(
            Severity::Low,
            "title",
            "Home",
            "http://localhost",
            "UX Issue",
            "",
        );
        assert_eq!(
            result,
            Err(InvalidIssue::EmptyDescription("title".to_string()))
        );
    }

    #[test]
    fn test_optional_fields_are_attached() {
        let record = issue(Severity::High, "Login failed")
            .with_error_message("timeout")
            .with_comparison("LoggedIn", "AuthFailed")
            .with_screenshot("/tmp/login.png");
        assert_eq!(record.error_message(), Some("timeout"));
        assert_eq!(record.expected(), Some("LoggedIn"));
        assert_eq!(record.actual(), Some("AuthFailed"));
        assert_eq!(
            record.screenshot(),
            Some(&PathBuf::from("/tmp/login.png"))
        );
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let records: Vec<IssueRecord> = (0..100)
            .map(|index| issue(Severity::Low, &format!("issue {}", index)))
            .collect();
        for pair in records.windows(2) {
            assert!(pair[0].timestamp() <= pair[1].timestamp());
        }
    }

    #[test]
    fn test_test_error_is_valid_with_blank_inputs() {
        let record = IssueRecord::test_error(Severity::Medium, " ", "", "", "");
        assert_eq!(record.title(), "Probe failed");
        assert_eq!(record.issue_type(), TEST_ERROR);
        assert!(!record.description().trim().is_empty());
        assert_eq!(record.error_message(), None);
    }

    #[test]
    fn test_serializes_severity_in_uppercase() {
        let json = serde_json::to_value(issue(Severity::Medium, "x")).unwrap();
        assert_eq!(json["severity"], "MEDIUM");
        assert!(json.get("error_message").is_none());
    }
}
