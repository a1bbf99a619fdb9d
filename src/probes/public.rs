use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::issue::Severity;
use crate::probe::{
    response_error, server_error, Findings, Probe, ProbeContext, ProbeResult,
    Requirement,
};

pub const LOCALES: [&str; 4] = ["es", "ca", "eu", "en"];

const GROUP: &str = "public";

/// `/health` answers 200 over plain HTTP.
pub struct HealthEndpoint;

#[async_trait]
impl Probe for HealthEndpoint {
    fn name(&self) -> &str {
        "health endpoint"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Health Check", cx.target.url("/health"));
        let outcome = async {
            match cx.get("/health").await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => findings.issue(
                    Severity::Critical,
                    "Health endpoint not healthy",
                    "Server Error",
                    format!("/health returned {}", response.status()),
                )?,
                Err(error) => findings.push(
                    findings
                        .record(
                            Severity::Critical,
                            "Health endpoint unreachable",
                            "Server Error",
                            "Could not reach /health",
                        )?
                        .with_error_message(format!("{:#}", error)),
                ),
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Critical, "Health check failed")
    }
}

/// `/` lands on a locale-prefixed page.
pub struct RootRedirect;

#[async_trait]
impl Probe for RootRedirect {
    fn name(&self) -> &str {
        "root redirects to locale"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Root", cx.target.url("/"));
        let outcome = inspect_root(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Medium, "Root redirect test failed")
    }
}

async fn inspect_root(cx: &ProbeContext<'_>, findings: &mut Findings<'_>) -> Result<()> {
    let session = cx.session()?;
    session.visit(findings.url()).await?;
    let location = session.driver().current_url().await?;
    if !has_locale_prefix(&location) {
        findings.push(
            findings
                .record(
                    Severity::Medium,
                    "Root does not redirect to a locale",
                    "UX Issue",
                    format!("Visiting / ended on {}", location),
                )?
                .with_comparison(
                    format!("one of /{}", LOCALES.join(", /")),
                    location.clone(),
                ),
        );
    }
    Ok(())
}

fn has_locale_prefix(location: &str) -> bool {
    let Ok(url) = Url::parse(location) else {
        return false;
    };
    let first = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .unwrap_or_default();
    LOCALES.contains(&first)
}

/// The home page of one locale renders without a server error.
pub struct LocaleHome {
    pub locale: &'static str,
    name: String,
}

impl LocaleHome {
    pub fn new(locale: &'static str) -> Self {
        LocaleHome {
            locale,
            name: format!("home page ({})", locale),
        }
    }

    fn severity(&self) -> Severity {
        if self.locale == LOCALES[0] {
            Severity::Critical
        } else {
            Severity::High
        }
    }
}

#[async_trait]
impl Probe for LocaleHome {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings(
            format!("Home ({})", self.locale),
            cx.target.url(&format!("/{}", self.locale)),
        );
        let outcome = async {
            let session = cx.session()?;
            session.visit(findings.url()).await?;
            if let Some(reason) = server_error(session.driver()).await? {
                findings.push(
                    findings
                        .record(
                            self.severity(),
                            format!("Server error on /{}", self.locale),
                            "Server Error",
                            format!("The {} home page failed to render", self.locale),
                        )?
                        .with_error_message(reason),
                );
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Home page test failed")
    }
}

pub const PUBLIC_PAGES: [(&str, &str, Severity); 3] = [
    ("Impulsa", "/es/impulsa", Severity::High),
    ("Contact", "/es/contacto", Severity::High),
    ("Audio Captcha", "/es/audio_captcha", Severity::Medium),
];

/// Public pages beyond the home pages render without a server error.
pub struct PublicPages;

#[async_trait]
impl Probe for PublicPages {
    fn name(&self) -> &str {
        "public pages"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings(PUBLIC_PAGES[0].0, cx.target.url(PUBLIC_PAGES[0].1));
        let outcome = async {
            let session = cx.session()?;
            for (page, path, severity) in PUBLIC_PAGES {
                findings.locate(page, cx.target.url(path));
                session.visit(findings.url()).await?;
                findings
                    .check_page(
                        session.driver(),
                        severity,
                        format!("Server error on {}", path),
                        format!("The {} page failed to render", page),
                    )
                    .await?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Public pages test failed")
    }
}

pub const MISSING_PATH: &str = "/es/nonexistent-page-12345";

/// A path with no route is answered with a 404.
pub struct MissingPage;

#[async_trait]
impl Probe for MissingPage {
    fn name(&self) -> &str {
        "missing page"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("404 Page", cx.target.url(MISSING_PATH));
        let outcome = async {
            let response = cx.get(MISSING_PATH).await?;
            let status = response.status();
            if let Some(reason) = response_error(response).await? {
                findings.push(
                    findings
                        .record(
                            Severity::High,
                            "Server error instead of 404",
                            "Error Handling",
                            format!("{} should be a missing page", MISSING_PATH),
                        )?
                        .with_error_message(reason)
                        .with_comparison("404", status.as_u16().to_string()),
                );
            } else if status.is_success() {
                findings.push(
                    findings
                        .record(
                            Severity::Low,
                            "Missing page answers with success",
                            "Error Handling",
                            format!("{} has no route but returned {}", MISSING_PATH, status),
                        )?
                        .with_comparison("404", status.as_u16().to_string()),
                );
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Missing page test failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_prefix_detection() {
        assert!(has_locale_prefix("http://localhost:3000/es"));
        assert!(has_locale_prefix("http://localhost:3000/eu/colabora"));
        assert!(!has_locale_prefix("http://localhost:3000/"));
        assert!(!has_locale_prefix("http://localhost:3000/espana"));
        assert!(!has_locale_prefix("not a url"));
    }

    #[test]
    fn test_default_locale_is_critical() {
        assert_eq!(LocaleHome::new("es").severity(), Severity::Critical);
        assert_eq!(LocaleHome::new("ca").severity(), Severity::High);
    }
}
