use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::browser::{Driver, DriverError};
use crate::collector::Collector;
use crate::config::{Role, Target, Timeouts};
use crate::issue::{InvalidIssue, IssueRecord, Severity};
use crate::session::Session;

/// Body fragments rendered by the application's error pages.
pub const SERVER_ERROR_MARKERS: [&str; 2] = [
    "Internal Server Error",
    "We're sorry, but something went wrong",
];

/// What the runner prepares before invoking a probe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Plain HTTP client only; no browser is launched.
    Http,
    Browser,
    /// A browser session on which a login for the role has been attempted.
    Authenticated(Role),
}

impl Requirement {
    pub fn needs_browser(self) -> bool {
        !matches!(self, Requirement::Http)
    }
}

pub struct ProbeContext<'a> {
    pub target: &'a Target,
    pub http: &'a reqwest::Client,
    pub timeouts: &'a Timeouts,
    session: Option<&'a Session>,
    found: Option<&'a Collector>,
}

impl<'a> ProbeContext<'a> {
    pub fn new(
        target: &'a Target,
        http: &'a reqwest::Client,
        timeouts: &'a Timeouts,
        session: Option<&'a Session>,
    ) -> Self {
        ProbeContext {
            target,
            http,
            timeouts,
            session,
            found: None,
        }
    }

    /// Mirrors every issue pushed through `findings` into `found` as soon as
    /// it is recorded, so it outlives a probe that never returns.
    pub fn recording_into(mut self, found: &'a Collector) -> Self {
        self.found = Some(found);
        self
    }

    pub fn findings(
        &self,
        page: impl Into<String>,
        url: impl Into<String>,
    ) -> Findings<'a> {
        Findings {
            found: self.found,
            ..Findings::new(page, url)
        }
    }

    pub fn session(&self) -> Result<&'a Session> {
        self.session
            .ok_or_else(|| anyhow!("probe needs a browser session but none was opened"))
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        self.get_within(path, self.timeouts.http_request).await
    }

    pub async fn get_within(
        &self,
        path: &str,
        limit: Duration,
    ) -> Result<reqwest::Response> {
        let url = self.target.url(path);
        log::debug!("GET {}", url);
        Ok(self.http.get(&url).timeout(limit).send().await?)
    }
}

#[derive(Debug)]
pub enum ProbeResult {
    Ok,
    Issues(Vec<IssueRecord>),
    Failed(ProbeFailure),
}

/// A probe that could not finish. Issues it found before failing are kept.
#[derive(Debug)]
pub struct ProbeFailure {
    pub severity: Severity,
    pub title: String,
    pub page: String,
    pub url: String,
    pub error: String,
    pub found: Vec<IssueRecord>,
}

impl ProbeFailure {
    pub fn into_issues(self) -> Vec<IssueRecord> {
        let mut issues = self.found;
        issues.push(IssueRecord::test_error(
            self.severity,
            &self.title,
            &self.page,
            &self.url,
            &self.error,
        ));
        issues
    }
}

impl ProbeResult {
    pub fn into_issues(self) -> Vec<IssueRecord> {
        match self {
            ProbeResult::Ok => Vec::new(),
            ProbeResult::Issues(issues) => issues,
            ProbeResult::Failed(failure) => failure.into_issues(),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    fn group(&self) -> &str;

    fn requirement(&self) -> Requirement;

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult;
}

/// Accumulates a probe's issues against the page currently being checked.
pub struct Findings<'a> {
    page: String,
    url: String,
    issues: Vec<IssueRecord>,
    found: Option<&'a Collector>,
}

impl<'a> Findings<'a> {
    pub fn new(page: impl Into<String>, url: impl Into<String>) -> Self {
        Findings {
            page: page.into(),
            url: url.into(),
            issues: Vec::new(),
            found: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Moves on to another page; later issues are attributed to it.
    pub fn locate(&mut self, page: impl Into<String>, url: impl Into<String>) {
        self.page = page.into();
        self.url = url.into();
    }

    pub fn record(
        &self,
        severity: Severity,
        title: impl Into<String>,
        issue_type: &str,
        description: impl Into<String>,
    ) -> Result<IssueRecord, InvalidIssue> {
        IssueRecord::new(
            severity,
            title,
            self.page.clone(),
            self.url.clone(),
            issue_type,
            description,
        )
    }

    pub fn issue(
        &mut self,
        severity: Severity,
        title: impl Into<String>,
        issue_type: &str,
        description: impl Into<String>,
    ) -> Result<(), InvalidIssue> {
        let record = self.record(severity, title, issue_type, description)?;
        self.push(record);
        Ok(())
    }

    pub fn push(&mut self, issue: IssueRecord) {
        log::info!("[{}] {} at {}", issue.severity(), issue.title(), issue.url());
        if let Some(found) = self.found {
            found.report(issue.clone());
        }
        self.issues.push(issue);
    }

    /// Records a server error if the current document shows one.
    pub async fn check_page(
        &mut self,
        driver: &dyn Driver,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<bool> {
        let Some(reason) = server_error(driver).await? else {
            return Ok(false);
        };
        let record = self
            .record(severity, title, "Server Error", description)?
            .with_error_message(reason);
        self.push(record);
        Ok(true)
    }

    /// Records a server error if `response` is one.
    pub async fn check_response(
        &mut self,
        response: reqwest::Response,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<bool> {
        let Some(reason) = response_error(response).await? else {
            return Ok(false);
        };
        let record = self
            .record(severity, title, "Server Error", description)?
            .with_error_message(reason);
        self.push(record);
        Ok(true)
    }

    /// Turns the outcome of a probe body into its result. An error keeps
    /// what was found so far and adds a failure with `severity`.
    pub fn conclude(
        self,
        outcome: Result<()>,
        severity: Severity,
        title: &str,
    ) -> ProbeResult {
        match outcome {
            Ok(()) if self.issues.is_empty() => ProbeResult::Ok,
            Ok(()) => ProbeResult::Issues(self.issues),
            Err(error) => ProbeResult::Failed(ProbeFailure {
                severity,
                title: title.to_string(),
                page: self.page,
                url: self.url,
                error: format!("{:#}", error),
                found: self.issues,
            }),
        }
    }
}

/// Why the current document looks like a server error, if it does.
pub async fn server_error(
    driver: &dyn Driver,
) -> Result<Option<String>, DriverError> {
    if let Some(status) = driver.response_status().await?
        && status >= 500
    {
        return Ok(Some(format!("HTTP {}", status)));
    }
    let content = driver.content().await?;
    Ok(SERVER_ERROR_MARKERS
        .iter()
        .find(|marker| content.contains(*marker))
        .map(|marker| format!("page shows {:?}", marker)))
}

/// Why an HTTP response looks like a server error, if it does. Consumes the
/// body only when the status itself is not conclusive.
pub async fn response_error(
    response: reqwest::Response,
) -> Result<Option<String>, reqwest::Error> {
    let status = response.status();
    if status.is_server_error() {
        return Ok(Some(format!("HTTP {}", status.as_u16())));
    }
    let body = response.text().await?;
    Ok(SERVER_ERROR_MARKERS
        .iter()
        .find(|marker| body.contains(*marker))
        .map(|marker| format!("body shows {:?}", marker)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::scripted::{ScriptedDriver, ScriptedPage};
    use crate::issue::TEST_ERROR;

    const URL: &str = "http://localhost:3000/es";

    #[test]
    fn test_conclude_without_issues_is_ok() {
        let findings = Findings::new("Home", URL);
        assert!(matches!(
            findings.conclude(Ok(()), Severity::Medium, "x"),
            ProbeResult::Ok
        ));
    }

    #[test]
    fn test_failure_keeps_earlier_issues_before_test_error() {
        let mut findings = Findings::new("Home", URL);
        findings
            .issue(Severity::High, "Missing h1", "Accessibility", "no h1")
            .unwrap();
        let result = findings.conclude(
            Err(anyhow!("navigation timed out")),
            Severity::Low,
            "Home page test failed",
        );
        let issues = result.into_issues();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].title(), "Missing h1");
        assert_eq!(issues[1].issue_type(), TEST_ERROR);
        assert_eq!(issues[1].severity(), Severity::Low);
        assert_eq!(issues[1].error_message(), Some("navigation timed out"));
    }

    #[test]
    fn test_locate_attributes_later_issues() {
        let mut findings = Findings::new("Home", URL);
        findings.locate("Admin", "http://localhost:3000/admin");
        findings
            .issue(Severity::Critical, "500", "Server Error", "boom")
            .unwrap();
        let issues = findings.conclude(Ok(()), Severity::Low, "x").into_issues();
        assert_eq!(issues[0].page(), "Admin");
        assert_eq!(issues[0].url(), "http://localhost:3000/admin");
    }

    #[test]
    fn test_findings_are_recorded_as_they_are_pushed() {
        let target = Target::new(url::Url::parse("http://localhost:3000").unwrap());
        let http = reqwest::Client::new();
        let timeouts = Timeouts::default();
        let found = Collector::new();
        let cx = ProbeContext::new(&target, &http, &timeouts, None)
            .recording_into(&found);

        let mut findings = cx.findings("Home", URL);
        findings
            .issue(Severity::Critical, "Server error on /es", "Server Error", "boom")
            .unwrap();
        // Visible before the probe concludes.
        assert_eq!(found.len(), 1);
        assert_eq!(found.drain()[0].title(), "Server error on /es");
        assert_eq!(
            findings.conclude(Ok(()), Severity::Low, "x").into_issues().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_server_error_from_status_or_body() {
        let driver = ScriptedDriver::new()
            .page("http://a/500", ScriptedPage::html("oops").status(500))
            .page(
                "http://a/body",
                ScriptedPage::html("<h1>We're sorry, but something went wrong</h1>"),
            )
            .page("http://a/ok", ScriptedPage::html("Error 500 in docs"));

        driver.navigate("http://a/500").await.unwrap();
        assert_eq!(
            server_error(&driver).await.unwrap(),
            Some("HTTP 500".to_string())
        );
        driver.navigate("http://a/body").await.unwrap();
        assert!(server_error(&driver).await.unwrap().is_some());
        driver.navigate("http://a/ok").await.unwrap();
        assert_eq!(server_error(&driver).await.unwrap(), None);
    }
}
