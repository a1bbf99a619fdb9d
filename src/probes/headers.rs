use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_CREDENTIALS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_METHOD, CACHE_CONTROL,
    CONTENT_ENCODING, CONTENT_TYPE, ORIGIN, SET_COOKIE,
};
use reqwest::Method;

use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};

const GROUP: &str = "headers";

pub const CONTENT_TYPES: [(&str, &str); 1] = [("/es", "text/html")];
pub const FOREIGN_ORIGIN: &str = "http://example.com";

fn header<'h>(headers: &'h HeaderMap, name: reqwest::header::HeaderName) -> &'h str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Pages are served with the content type their body has.
pub struct ContentType;

#[async_trait]
impl Probe for ContentType {
    fn name(&self) -> &str {
        "content type"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Headers", cx.target.url(CONTENT_TYPES[0].0));
        let outcome = async {
            for (path, expected) in CONTENT_TYPES {
                findings.locate("Headers", cx.target.url(path));
                let response = cx.get(path).await?;
                let actual = header(response.headers(), CONTENT_TYPE);
                if !actual.contains(expected) {
                    findings.push(
                        findings
                            .record(
                                Severity::Low,
                                format!("Unexpected content type: {}", path),
                                "Response Error",
                                format!("{} is not served as {}", path, expected),
                            )?
                            .with_comparison(expected, actual),
                    );
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Content type test failed")
    }
}

/// Pages are compressed for clients that accept it.
pub struct Compression;

#[async_trait]
impl Probe for Compression {
    fn name(&self) -> &str {
        "compression"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let url = cx.target.url("/es");
        let mut findings = cx.findings("Headers", url.clone());
        let outcome = async {
            // Only the headers are read; the body may stay compressed.
            let response = cx
                .http
                .get(&url)
                .header(ACCEPT_ENCODING, "gzip, deflate")
                .timeout(cx.timeouts.http_request)
                .send()
                .await?;
            let encoding = header(response.headers(), CONTENT_ENCODING);
            if !["gzip", "deflate"].iter().any(|scheme| encoding.contains(scheme)) {
                findings.push(
                    findings
                        .record(
                            Severity::Low,
                            "No compression",
                            "Performance",
                            "The home page is sent uncompressed to a client accepting gzip",
                        )?
                        .with_comparison("gzip or deflate", encoding),
                );
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Compression test failed")
    }
}

/// A cross-origin preflight is neither a crash nor a blanket grant.
pub struct CorsPolicy;

#[async_trait]
impl Probe for CorsPolicy {
    fn name(&self) -> &str {
        "cors policy"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("CORS", cx.target.url("/health"));
        let outcome = inspect_cors(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "CORS test failed")
    }
}

async fn inspect_cors(cx: &ProbeContext<'_>, findings: &mut Findings<'_>) -> Result<()> {
    let response = cx
        .http
        .request(Method::OPTIONS, findings.url())
        .header(ORIGIN, FOREIGN_ORIGIN)
        .header(ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .timeout(cx.timeouts.http_request)
        .send()
        .await?;
    let status = response.status();
    if status.is_server_error() {
        findings.issue(
            Severity::Medium,
            "CORS preflight causes server error",
            "Server Error",
            format!("OPTIONS /health returned {}", status),
        )?;
        return Ok(());
    }
    let headers = response.headers();
    let allowed = header(headers, ACCESS_CONTROL_ALLOW_ORIGIN);
    let credentials = header(headers, ACCESS_CONTROL_ALLOW_CREDENTIALS);
    if is_permissive(allowed, credentials) {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Permissive CORS policy",
                    "Security Issue",
                    format!("{} may read credentialed responses", FOREIGN_ORIGIN),
                )?
                .with_comparison("no credentials for foreign origins", allowed),
        );
    }
    Ok(())
}

fn is_permissive(allowed: &str, credentials: &str) -> bool {
    (allowed == "*" || allowed == FOREIGN_ORIGIN)
        && credentials.eq_ignore_ascii_case("true")
}

/// Responses that set a cookie must not be cached by shared caches.
pub struct CacheHeaders;

#[async_trait]
impl Probe for CacheHeaders {
    fn name(&self) -> &str {
        "cache headers"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Headers", cx.target.url("/es"));
        let outcome = async {
            let response = cx.get("/es").await?;
            let headers = response.headers();
            let cache_control = header(headers, CACHE_CONTROL);
            if headers.contains_key(SET_COOKIE) && cache_control.contains("public") {
                findings.push(
                    findings
                        .record(
                            Severity::Medium,
                            "Session page publicly cacheable",
                            "Security Issue",
                            "A response setting a cookie allows shared caching",
                        )?
                        .with_comparison("private or no-store", cache_control),
                );
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Cache header test failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_needs_credentials_to_be_permissive() {
        assert!(is_permissive("*", "true"));
        assert!(is_permissive(FOREIGN_ORIGIN, "TRUE"));
        assert!(!is_permissive(FOREIGN_ORIGIN, ""));
        assert!(!is_permissive("http://localhost:3000", "true"));
    }
}
