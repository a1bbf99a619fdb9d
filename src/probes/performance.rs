use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};

const GROUP: &str = "performance";

pub const LOAD_TIME_PAGES: [(&str, &str); 2] =
    [("Home", "/es"), ("Login Page", "/es/users/sign_in")];

pub const RESPONSE_TIME_PATHS: [&str; 3] = ["/health", "/es", "/es/colabora"];

/// Thresholds above which a duration is reported.
#[derive(Copy, Clone, Debug)]
pub struct Budget {
    pub high: Duration,
    pub medium: Duration,
}

impl Budget {
    pub const PAGE_LOAD: Budget = Budget {
        high: Duration::from_secs(10),
        medium: Duration::from_secs(5),
    };

    pub const RESPONSE: Budget = Budget {
        high: Duration::from_secs(5),
        medium: Duration::from_secs(2),
    };

    pub fn classify(self, elapsed: Duration) -> Option<Severity> {
        if elapsed > self.high {
            Some(Severity::High)
        } else if elapsed > self.medium {
            Some(Severity::Medium)
        } else {
            None
        }
    }
}

/// Time from starting a browser navigation until the page is loaded.
pub struct PageLoadTime;

#[async_trait]
impl Probe for PageLoadTime {
    fn name(&self) -> &str {
        "page load time"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Performance", cx.target.url("/es"));
        let outcome = async {
            let driver = cx.session()?.driver();
            for (page, path) in LOAD_TIME_PAGES {
                findings.locate(page, cx.target.url(path));
                let started = Instant::now();
                driver.navigate(findings.url()).await?;
                let elapsed = started.elapsed();
                log::debug!("{} loaded in {:?}", path, elapsed);
                if let Some(severity) = Budget::PAGE_LOAD.classify(elapsed) {
                    findings.push(
                        findings
                            .record(
                                severity,
                                format!("Slow page load: {}", path),
                                "Performance",
                                format!("Loading took {:.2}s", elapsed.as_secs_f64()),
                            )?
                            .with_comparison(
                                format!("under {}s", Budget::PAGE_LOAD.medium.as_secs()),
                                format!("{:.2}s", elapsed.as_secs_f64()),
                            ),
                    );
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Page load test failed")
    }
}

/// Server response time over plain HTTP.
pub struct ResponseTime;

#[async_trait]
impl Probe for ResponseTime {
    fn name(&self) -> &str {
        "http response time"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Http
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Response Time", cx.target.url("/health"));
        let outcome = inspect_response_times(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "Response time test failed")
    }
}

async fn inspect_response_times(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let limit = cx.timeouts.slow_http_request;
    for path in RESPONSE_TIME_PATHS {
        findings.locate("Response Time", cx.target.url(path));
        let started = Instant::now();
        let response = cx.get_within(path, limit).await;
        let elapsed = started.elapsed();
        match response {
            Err(error)
                if error
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(reqwest::Error::is_timeout) =>
            {
                findings.issue(
                    Severity::Critical,
                    format!("Request timed out: {}", path),
                    "Performance",
                    format!("No response within {}s", limit.as_secs()),
                )?;
            }
            Err(error) => return Err(error),
            Ok(_) => {
                if let Some(severity) = Budget::RESPONSE.classify(elapsed) {
                    findings.issue(
                        severity,
                        format!("Slow response: {}", path),
                        "Performance",
                        format!("Responded in {:.2}s", elapsed.as_secs_f64()),
                    )?;
                }
            }
        }
    }
    Ok(())
}

pub const BROKEN_IMAGES: &str = "Array.from(document.images).filter((image) => image.complete && image.naturalWidth === 0).length";
pub const DOM_SIZE: &str = "document.getElementsByTagName('*').length";
pub const LAZY_IMAGES: &str = "img[loading='lazy']";
pub const MAX_DOM_ELEMENTS: u64 = 3000;
pub const EAGER_IMAGE_ALLOWANCE: usize = 10;
pub const SHOWN_CONSOLE_ERRORS: usize = 5;

/// What the home page loads: scripts that fail, images that break and the
/// weight of the document itself.
pub struct PageAssets;

#[async_trait]
impl Probe for PageAssets {
    fn name(&self) -> &str {
        "page assets"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Home", cx.target.url("/es"));
        let outcome = inspect_assets(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "Page assets test failed")
    }
}

async fn inspect_assets(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    session.visit(findings.url()).await?;
    let driver = session.driver();

    let errors = driver.console_errors().await?;
    if !errors.is_empty() {
        let shown: Vec<&str> = errors
            .iter()
            .take(SHOWN_CONSOLE_ERRORS)
            .map(String::as_str)
            .collect();
        findings.push(
            findings
                .record(
                    Severity::Medium,
                    "JavaScript console errors",
                    "JavaScript Error",
                    format!("{} errors logged while loading the page", errors.len()),
                )?
                .with_error_message(shown.join("; ")),
        );
    }

    let broken = count(driver.evaluate(BROKEN_IMAGES).await?);
    if broken > 0 {
        findings.issue(
            Severity::Medium,
            "Broken images on page",
            "Missing Resource",
            format!("{} images failed to load", broken),
        )?;
    }

    let elements = count(driver.evaluate(DOM_SIZE).await?);
    if elements > MAX_DOM_ELEMENTS {
        findings.push(
            findings
                .record(
                    Severity::Medium,
                    "Large DOM size",
                    "Performance",
                    format!("The page has {} elements", elements),
                )?
                .with_comparison(
                    format!("at most {}", MAX_DOM_ELEMENTS),
                    elements.to_string(),
                ),
        );
    }

    let images = driver.find_elements("img").await?.len();
    if images > EAGER_IMAGE_ALLOWANCE
        && driver.find_elements(LAZY_IMAGES).await?.is_empty()
    {
        findings.issue(
            Severity::Low,
            "No lazy-loaded images",
            "Performance",
            format!("All {} images load eagerly", images),
        )?;
    }
    Ok(())
}

/// A count returned by a script; anything else reads as zero.
fn count(value: serde_json::Value) -> u64 {
    value.as_u64().unwrap_or_default()
}
