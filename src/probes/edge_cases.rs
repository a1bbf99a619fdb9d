//! Unusual requests and inputs the application should survive: malformed
//! URLs, odd encodings, exotic characters and sessions that vanish.

use anyhow::Result;
use async_trait::async_trait;
use serde_json as json;

use crate::config::Role;
use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};
use crate::session::{is_on_path, EMAIL_FIELD, PASSWORD_FIELD, SUBMIT_BUTTON};

const GROUP: &str = "edge cases";

const PAGE: &str = "Edge Cases";

/// A family of crafted URLs that must not crash the server.
pub struct CraftedUrls {
    pub name: &'static str,
    pub paths: &'static [&'static str],
    pub severity: Severity,
    pub title: &'static str,
}

pub const CRAFTED_URLS: [CraftedUrls; 4] = [
    CraftedUrls {
        name: "empty url parameters",
        paths: &["/es/microcreditos/", "/es/votos//", "/es/propuestas/"],
        severity: Severity::High,
        title: "Server error on empty parameter",
    },
    CraftedUrls {
        name: "non-existent ids",
        paths: &[
            "/es/microcreditos/999999999",
            "/es/propuestas/999999999",
            "/es/votos/999999999",
        ],
        severity: Severity::High,
        title: "Server error on non-existent id",
    },
    CraftedUrls {
        name: "direct action urls",
        paths: &["/es/users/sign_out", "/users/confirmation", "/users/unlock"],
        severity: Severity::Medium,
        title: "Server error on direct action URL",
    },
    CraftedUrls {
        name: "encoded urls",
        paths: &[
            "/es/%252e%252e%252f",
            "/es/%2525252e%2525252e%2525252f",
            "/es/test%00.html",
        ],
        severity: Severity::Medium,
        title: "Server error on encoded URL",
    },
];

#[async_trait]
impl Probe for CraftedUrls {
    fn name(&self) -> &str {
        self.name
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings(PAGE, cx.target.url(self.paths[0]));
        let outcome = async {
            for path in self.paths {
                findings.locate(PAGE, cx.target.url(path));
                // Unreachable crafted URLs are not findings.
                let response = match cx.get(path).await {
                    Ok(response) => response,
                    Err(error) => {
                        log::debug!("GET {} failed: {:#}", path, error);
                        continue;
                    }
                };
                findings
                    .check_response(
                        response,
                        self.severity,
                        self.title,
                        format!("GET {} failed", path),
                    )
                    .await?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Crafted URL test failed")
    }
}

pub const LONG_SEGMENT: usize = 5000;

/// A path far longer than any real route.
pub struct LongUrl;

#[async_trait]
impl Probe for LongUrl {
    fn name(&self) -> &str {
        "very long url"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let path = format!("/es/{}", "a".repeat(LONG_SEGMENT));
        let shown: String = cx.target.url(&path).chars().take(100).collect();
        let mut findings = cx.findings(PAGE, format!("{}...", shown));
        let outcome = async {
            match cx.get(&path).await {
                Ok(response) => {
                    findings
                        .check_response(
                            response,
                            Severity::Medium,
                            "Server error on very long URL",
                            format!("A {}-character path crashed the server", LONG_SEGMENT),
                        )
                        .await?;
                }
                // Servers may drop oversized request lines outright.
                Err(error) => {
                    log::debug!("long URL refused: {:#}", error);
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Long URL test failed")
    }
}

/// The home page renders for a client that sends no cookies at all.
pub struct NoCookies;

#[async_trait]
impl Probe for NoCookies {
    fn name(&self) -> &str {
        "no cookies"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings(PAGE, cx.target.url("/es"));
        let outcome = async {
            let response = cx.get("/es").await?;
            findings
                .check_response(
                    response,
                    Severity::High,
                    "Server error without cookies",
                    "The home page failed for a client without cookies",
                )
                .await?;
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "No cookies test failed")
    }
}

pub const UNICODE_EMAILS: [(&str, &str); 4] = [
    ("Japanese", "テスト@example.com"),
    ("Arabic", "اختبار@example.com"),
    ("Emoji", "test😀@example.com"),
    ("RTL", "מבחן@example.com"),
];

/// Non-Latin scripts typed into the sign-in form.
pub struct UnicodeSignIn;

#[async_trait]
impl Probe for UnicodeSignIn {
    fn name(&self) -> &str {
        "unicode sign-in"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Unicode Input", cx.target.sign_in_url());
        let outcome = async {
            let session = cx.session()?;
            let driver = session.driver();
            for (script, email) in UNICODE_EMAILS {
                session.visit(findings.url()).await?;
                session.wait_for(EMAIL_FIELD).await?;
                driver.fill(EMAIL_FIELD, email).await?;
                driver.fill(PASSWORD_FIELD, "password123").await?;
                session.submit(SUBMIT_BUTTON).await?;
                findings
                    .check_page(
                        driver,
                        Severity::Medium,
                        format!("Server error on {} input", script),
                        format!("Signing in as {:?} crashed the server", email),
                    )
                    .await?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Unicode input test failed")
    }
}

pub const RAPID_CLICKS: usize = 5;

/// The sign-in button pressed several times in a row.
pub struct RapidSubmission;

#[async_trait]
impl Probe for RapidSubmission {
    fn name(&self) -> &str {
        "rapid form submission"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Rapid Submission", cx.target.sign_in_url());
        let outcome = async {
            let session = cx.session()?;
            let driver = session.driver();
            session.visit(findings.url()).await?;
            session.wait_for(EMAIL_FIELD).await?;
            driver.fill(EMAIL_FIELD, "test@example.com").await?;
            driver.fill(PASSWORD_FIELD, "wrongpassword").await?;
            for attempt in 0..RAPID_CLICKS {
                // Later clicks may land after the form is gone.
                if let Err(error) = driver.click(SUBMIT_BUTTON).await {
                    log::debug!("click {} not delivered: {}", attempt, error);
                    break;
                }
            }
            session.pause_after_submit().await;
            findings
                .check_page(
                    driver,
                    Severity::Medium,
                    "Server error on rapid form submission",
                    format!("Submitting the sign-in form {} times crashed the server", RAPID_CLICKS),
                )
                .await?;
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Rapid submission test failed")
    }
}

/// Appends a hidden `_method=DELETE` field to the first form on the page.
pub const METHOD_OVERRIDE: &str = r#"(() => {
    const form = document.querySelector('form');
    if (!form) return false;
    const input = document.createElement('input');
    input.type = 'hidden';
    input.name = '_method';
    input.value = 'DELETE';
    form.appendChild(input);
    return true;
})()"#;

/// The sign-in form submitted with a Rails method override.
pub struct MethodOverride;

#[async_trait]
impl Probe for MethodOverride {
    fn name(&self) -> &str {
        "method override"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Method Override", cx.target.sign_in_url());
        let outcome = async {
            let session = cx.session()?;
            let driver = session.driver();
            session.visit(findings.url()).await?;
            session.wait_for(EMAIL_FIELD).await?;
            let appended = driver.evaluate(METHOD_OVERRIDE).await?;
            if appended != json::Value::Bool(true) {
                log::debug!("no form to override on {}", findings.url());
            }
            driver.fill(EMAIL_FIELD, "test@example.com").await?;
            driver.fill(PASSWORD_FIELD, "wrongpassword").await?;
            session.submit(SUBMIT_BUTTON).await?;
            findings
                .check_page(
                    driver,
                    Severity::Medium,
                    "Server error on method override",
                    "Signing in with _method=DELETE crashed the server",
                )
                .await?;
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Method override test failed")
    }
}

pub const PROTECTED_PATH: &str = "/es/users/edit";

/// A signed-in browser loses its cookies and asks for a protected page.
pub struct ExpiredSession;

#[async_trait]
impl Probe for ExpiredSession {
    fn name(&self) -> &str {
        "expired session"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::User)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Session Expiry", cx.target.url(PROTECTED_PATH));
        let outcome = inspect_expired_session(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "Session expiry test failed")
    }
}

async fn inspect_expired_session(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    if !session.is_logged_in() {
        log::warn!("skipping session expiry: {:?}", session.auth());
        return Ok(());
    }
    let driver = session.driver();
    driver.clear_cookies().await?;
    session.visit(findings.url()).await?;
    let crashed = findings
        .check_page(
            driver,
            Severity::High,
            "Server error on expired session",
            "A protected page crashed once the session cookies were gone",
        )
        .await?;
    if crashed {
        return Ok(());
    }
    let location = driver.current_url().await?;
    if !is_on_path(&location, &cx.target.sign_in_path) {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Protected page served without a session",
                    "Access Control",
                    format!("{} rendered after the cookies were cleared", PROTECTED_PATH),
                )?
                .with_comparison(cx.target.sign_in_url(), location),
        );
    }
    Ok(())
}
