use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json as json;

use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};

const GROUP: &str = "api";

pub const STATUS_ENDPOINTS: [&str; 3] =
    ["/api/v1/status", "/api/status", "/status.json"];
pub const JSON_SIGN_IN_PATH: &str = "/users/sign_in";
pub const UNKNOWN_API_PATH: &str = "/api/nonexistent/endpoint/12345";
pub const SPECIAL_CHARACTERS: [&str; 5] = [
    "test@example.com'; DROP TABLE users; --",
    "ñáéíóú@ejemplo.es",
    "<>&\"'%00",
    "test\u{0000}null@example.com",
    "𝕥𝕖𝕤𝕥@example.com",
];

/// JSON status endpoints answer with parseable JSON and never 5xx.
pub struct StatusEndpoints;

#[async_trait]
impl Probe for StatusEndpoints {
    fn name(&self) -> &str {
        "api status endpoints"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("API", cx.target.url(STATUS_ENDPOINTS[0]));
        let outcome = inspect_status_endpoints(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "API status test failed")
    }
}

async fn inspect_status_endpoints(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    for path in STATUS_ENDPOINTS {
        findings.locate("API", cx.target.url(path));
        let response = cx.get(path).await?;
        let status = response.status();
        if status.is_server_error() {
            findings.issue(
                Severity::High,
                format!("API endpoint returns {}", status.as_u16()),
                "Server Error",
                format!("{} failed with {}", path, status),
            )?;
        } else if status == StatusCode::OK {
            let body = response.text().await?;
            if let Err(error) = json::from_str::<json::Value>(&body) {
                findings.push(
                    findings
                        .record(
                            Severity::Medium,
                            "API returns invalid JSON",
                            "API Error",
                            format!("{} answered 200 with a body that is not JSON", path),
                        )?
                        .with_error_message(error.to_string()),
                );
            }
        }
    }
    Ok(())
}

/// Unknown API routes are answered with a client error.
pub struct UnknownApiPath;

#[async_trait]
impl Probe for UnknownApiPath {
    fn name(&self) -> &str {
        "unknown api path"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("API", cx.target.url(UNKNOWN_API_PATH));
        let outcome = async {
            let status = cx.get(UNKNOWN_API_PATH).await?.status();
            if status.is_server_error() {
                findings.issue(
                    Severity::High,
                    "Unknown API path causes server error",
                    "Server Error",
                    format!("Expected 404 but got {}", status),
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Unknown API path test failed")
    }
}

/// An unsupported verb on a page is refused without a server error.
pub struct UnsupportedMethod;

#[async_trait]
impl Probe for UnsupportedMethod {
    fn name(&self) -> &str {
        "unsupported http method"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let url = cx.target.url("/es");
        let mut findings = cx.findings("HTTP Methods", url.clone());
        let outcome = async {
            let status = cx
                .http
                .request(Method::DELETE, &url)
                .timeout(cx.timeouts.http_request)
                .send()
                .await?
                .status();
            if status.is_server_error() {
                findings.issue(
                    Severity::Medium,
                    "DELETE on a page causes server error",
                    "Server Error",
                    format!("DELETE /es returned {}", status),
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "HTTP method test failed")
    }
}

/// Unusual characters in the sign-in form are handled gracefully.
pub struct SpecialCharacters;

#[async_trait]
impl Probe for SpecialCharacters {
    fn name(&self) -> &str {
        "special characters in sign-in"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let url = cx.target.sign_in_url();
        let mut findings = cx.findings("Input Handling", url.clone());
        let outcome = async {
            for payload in SPECIAL_CHARACTERS {
                let status = cx
                    .http
                    .post(&url)
                    .form(&[("user[email]", payload), ("user[password]", "x")])
                    .timeout(cx.timeouts.http_request)
                    .send()
                    .await?
                    .status();
                if status.is_server_error() {
                    findings.push(
                        findings
                            .record(
                                Severity::High,
                                "Special characters cause server error",
                                "Server Error",
                                format!("Signing in with {:?} returned {}", payload, status),
                            )?
                            .with_error_message(status.to_string()),
                    );
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Special characters test failed")
    }
}

/// Sign-in over JSON, the way an API client would.
pub struct JsonSignIn;

#[async_trait]
impl Probe for JsonSignIn {
    fn name(&self) -> &str {
        "json sign-in"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let url = cx.target.url(JSON_SIGN_IN_PATH);
        let mut findings = cx.findings("API Authentication", url.clone());
        let outcome = async {
            let body = json::json!({
                "user": {"email": "test@example.com", "password": "wrongpassword"}
            });
            let status = cx
                .http
                .post(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&body)
                .timeout(cx.timeouts.http_request)
                .send()
                .await?
                .status();
            if status.is_server_error() {
                findings.issue(
                    Severity::High,
                    "Auth API server error",
                    "Server Error",
                    format!("JSON sign-in returned {}", status),
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "JSON sign-in test failed")
    }
}

pub const LARGE_FIELD: usize = 10_000;

/// Oversized credentials posted to the sign-in form.
pub struct LargeRequest;

#[async_trait]
impl Probe for LargeRequest {
    fn name(&self) -> &str {
        "large request"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let url = cx.target.sign_in_url();
        let mut findings = cx.findings("Large Request", url.clone());
        let outcome = async {
            let email = "a".repeat(LARGE_FIELD);
            let password = "b".repeat(LARGE_FIELD);
            let limit = cx.timeouts.slow_http_request;
            let response = cx
                .http
                .post(&url)
                .form(&[("user[email]", &email), ("user[password]", &password)])
                .timeout(limit)
                .send()
                .await;
            match response {
                Ok(response) if response.status().is_server_error() => findings.issue(
                    Severity::Medium,
                    "Server error on large request",
                    "Server Error",
                    format!(
                        "{}-character credentials returned {}",
                        LARGE_FIELD,
                        response.status()
                    ),
                )?,
                Ok(_) => {}
                Err(error) if error.is_timeout() => findings.issue(
                    Severity::Medium,
                    "Timeout on large request",
                    "Performance",
                    format!("No response within {}s", limit.as_secs()),
                )?,
                Err(error) => return Err(anyhow::Error::from(error)),
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Large request test failed")
    }
}

pub const RAPID_REQUESTS: usize = 20;

/// A burst of sign-in attempts is throttled or refused, never a crash.
pub struct RapidRequests;

#[async_trait]
impl Probe for RapidRequests {
    fn name(&self) -> &str {
        "rapid requests"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let url = cx.target.sign_in_url();
        let mut findings = cx.findings("Rate Limiting", url.clone());
        let outcome = async {
            for attempt in 1..=RAPID_REQUESTS {
                let status = cx
                    .http
                    .post(&url)
                    .form(&[("user[email]", "test@example.com"), ("user[password]", "wrong")])
                    .timeout(cx.timeouts.http_request)
                    .send()
                    .await?
                    .status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    log::debug!("throttled after {} requests", attempt);
                    break;
                }
                if status.is_server_error() {
                    findings.issue(
                        Severity::High,
                        "Server error under rapid requests",
                        "Server Error",
                        format!("Request {} of {} returned {}", attempt, RAPID_REQUESTS, status),
                    )?;
                    break;
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Rapid requests test failed")
    }
}
