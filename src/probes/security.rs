use anyhow::Result;
use async_trait::async_trait;

use crate::issue::Severity;
use crate::probe::{
    server_error, Probe, ProbeContext, ProbeResult, Requirement,
};
use crate::session::{Session, EMAIL_FIELD, PASSWORD_FIELD, SUBMIT_BUTTON};

const GROUP: &str = "security";

pub const CSRF_TOKEN: &str =
    "input[name='authenticity_token'], meta[name='csrf-token']";
pub const SCRIPT_PAYLOAD: &str = "<script>alert('XSS')</script>";
pub const SQL_PAYLOAD: &str = "' OR '1'='1";
pub const DATABASE_ERROR_MARKERS: [&str; 4] =
    ["syntax error", "postgresql", "pg::", "activerecord"];
pub const INVALID_IDS: [&str; 6] =
    ["abc", "-1", "1.5", "null", "undefined", "' OR 1=1 --"];
pub const TRAVERSAL_PATHS: [&str; 4] = [
    "test<script>alert('xss')</script>",
    "test%00null",
    "test/../../../etc/passwd",
    "test%2F..%2F..%2Fetc%2Fpasswd",
];

/// The sign-in form carries an anti-forgery token.
pub struct CsrfToken;

#[async_trait]
impl Probe for CsrfToken {
    fn name(&self) -> &str {
        "csrf token"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Login Page", cx.target.sign_in_url());
        let outcome = async {
            let session = cx.session()?;
            session.visit(findings.url()).await?;
            if session.driver().find_elements(CSRF_TOKEN).await?.is_empty() {
                findings.issue(
                    Severity::High,
                    "Missing CSRF protection",
                    "Security Issue",
                    "The sign-in form has no authenticity token",
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "CSRF test failed")
    }
}

async fn submit_sign_in(
    cx: &ProbeContext<'_>,
    session: &Session,
    email: &str,
) -> Result<String> {
    session.visit(&cx.target.sign_in_url()).await?;
    session.wait_for(EMAIL_FIELD).await?;
    let driver = session.driver();
    driver.fill(EMAIL_FIELD, email).await?;
    driver.fill(PASSWORD_FIELD, "x").await?;
    session.submit(SUBMIT_BUTTON).await?;
    Ok(driver.content().await?)
}

/// A script typed into the login form is not echoed back unescaped.
pub struct ReflectedScript;

#[async_trait]
impl Probe for ReflectedScript {
    fn name(&self) -> &str {
        "reflected script"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Login Page", cx.target.sign_in_url());
        let outcome = async {
            let content = submit_sign_in(cx, cx.session()?, SCRIPT_PAYLOAD).await?;
            if content.contains(SCRIPT_PAYLOAD) {
                findings.issue(
                    Severity::Critical,
                    "Reflected XSS in login form",
                    "Security Issue",
                    "The submitted script is rendered back without escaping",
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "XSS test failed")
    }
}

/// An injection payload does not surface database errors.
pub struct SqlErrorExposure;

#[async_trait]
impl Probe for SqlErrorExposure {
    fn name(&self) -> &str {
        "sql error exposure"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Login Page", cx.target.sign_in_url());
        let outcome = async {
            let content = submit_sign_in(cx, cx.session()?, SQL_PAYLOAD)
                .await?
                .to_lowercase();
            if let Some(marker) = database_error(&content) {
                findings.push(
                    findings
                        .record(
                            Severity::Critical,
                            "Database error exposed",
                            "Security Issue",
                            "An injection payload produced a database error message",
                        )?
                        .with_error_message(format!("page mentions {:?}", marker)),
                );
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "SQL injection test failed")
    }
}

fn database_error(lowercase_content: &str) -> Option<&'static str> {
    DATABASE_ERROR_MARKERS
        .into_iter()
        .find(|marker| lowercase_content.contains(marker))
}

/// Malformed record ids are rejected without leaking internals.
pub struct InvalidResourceIds;

#[async_trait]
impl Probe for InvalidResourceIds {
    fn name(&self) -> &str {
        "invalid resource ids"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Microcredits", cx.target.url("/es/microcreditos"));
        let outcome = async {
            let session = cx.session()?;
            for id in INVALID_IDS {
                findings.locate("Microcredits", cx.target.url(&format!("/es/microcreditos/{}", id)));
                session.visit(findings.url()).await?;
                let content = session.driver().content().await?.to_lowercase();
                if let Some(marker) = database_error(&content) {
                    findings.push(
                        findings
                            .record(
                                Severity::Critical,
                                "Database error leaked for invalid id",
                                "Security Issue",
                                format!("Requesting id {:?} exposed database details", id),
                            )?
                            .with_error_message(format!("page mentions {:?}", marker)),
                    );
                } else if let Some(reason) = server_error(session.driver()).await? {
                    findings.push(
                        findings
                            .record(
                                Severity::Medium,
                                "Server error for invalid id",
                                "Server Error",
                                format!("Requesting id {:?} crashed the page", id),
                            )?
                            .with_error_message(reason),
                    );
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Invalid id test failed")
    }
}

/// Crafted paths never expose files outside the web root.
pub struct PathTraversal;

#[async_trait]
impl Probe for PathTraversal {
    fn name(&self) -> &str {
        "path traversal"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Edge Cases", cx.target.url("/es"));
        let outcome = async {
            let session = cx.session()?;
            for path in TRAVERSAL_PATHS {
                findings.locate("Edge Cases", cx.target.url(&format!("/es/{}", path)));
                // Unreachable crafted URLs are not findings.
                if let Err(error) = session.visit(findings.url()).await {
                    log::debug!("skipping {}: {}", findings.url(), error);
                    continue;
                }
                if let Some(reason) = server_error(session.driver()).await? {
                    findings.push(
                        findings
                            .record(
                                Severity::Medium,
                                "Server error on special characters in URL",
                                "Server Error",
                                format!("Requesting /es/{} crashed the page", path),
                            )?
                            .with_error_message(reason),
                    );
                }
                let content = session.driver().content().await?.to_lowercase();
                if content.contains("root:") || content.contains("/etc/passwd") {
                    findings.issue(
                        Severity::Critical,
                        "Path traversal vulnerability",
                        "Security Issue",
                        format!("Requesting /es/{} exposed a system file", path),
                    )?;
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Path traversal test failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_markers_match_lowercase_content() {
        assert_eq!(
            database_error("pg::syntaxerror: error:  syntax error at or near"),
            Some("syntax error")
        );
        assert_eq!(database_error("activerecord::recordnotfound"), Some("activerecord"));
        assert_eq!(database_error("<h1>not found</h1>"), None);
    }
}
