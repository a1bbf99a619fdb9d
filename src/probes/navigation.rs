use anyhow::Result;
use async_trait::async_trait;

use crate::browser::Element;
use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};

const GROUP: &str = "navigation";

pub const NAVIGATION_LINKS: &str = "nav a, .navbar a, .nav a, header a";
pub const EXTERNAL_LINKS: &str = "a[href^='http']";
pub const LINKS_CHECKED: usize = 20;

/// The first navigation links on the home page resolve.
pub struct NavigationLinks;

#[async_trait]
impl Probe for NavigationLinks {
    fn name(&self) -> &str {
        "navigation links"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Main Navigation", cx.target.url("/es"));
        let outcome = inspect_navigation_links(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "Navigation links test failed")
    }
}

async fn inspect_navigation_links(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    session.visit(findings.url()).await?;
    let links = session.driver().find_elements(NAVIGATION_LINKS).await?;
    let hrefs: Vec<String> = links
        .iter()
        .take(LINKS_CHECKED)
        .filter_map(|link| resolve_href(cx, link))
        .collect();
    log::debug!("checking {} navigation links", hrefs.len());
    for href in hrefs {
        // Unreachable links are not reported, only error statuses.
        let status = match cx
            .http
            .get(&href)
            .timeout(cx.timeouts.http_request)
            .send()
            .await
        {
            Ok(response) => response.status(),
            Err(error) => {
                log::debug!("could not check {}: {}", href, error);
                continue;
            }
        };
        if status.as_u16() >= 400 {
            findings.locate("Main Navigation", href);
            findings.issue(
                Severity::Medium,
                format!("Broken navigation link: {}", status.as_u16()),
                "Broken Link",
                format!("Navigation link returns {}", status),
            )?;
        }
    }
    Ok(())
}

fn resolve_href(cx: &ProbeContext<'_>, link: &Element) -> Option<String> {
    let href = link.non_blank_attribute("href")?;
    if href.starts_with("http") {
        Some(href.to_string())
    } else if href.starts_with('/') {
        Some(cx.target.url(href))
    } else {
        None
    }
}

/// Links opening a new tab do not hand it a reference to this window.
pub struct ExternalLinkRel;

#[async_trait]
impl Probe for ExternalLinkRel {
    fn name(&self) -> &str {
        "external link rel"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("External Links", cx.target.url("/es"));
        let outcome = async {
            let session = cx.session()?;
            session.visit(findings.url()).await?;
            for link in session.driver().find_elements(EXTERNAL_LINKS).await? {
                if !opens_without_opener(&link) {
                    continue;
                }
                let href = link.attribute("href").unwrap_or_default().to_string();
                findings.issue(
                    Severity::Low,
                    "External link without noopener",
                    "Security Issue",
                    format!("{} opens in a new tab without rel=noopener", href),
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "External links test failed")
    }
}

fn opens_without_opener(link: &Element) -> bool {
    let new_tab = link.attribute("target") == Some("_blank");
    let guarded = link
        .attribute("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|token| token == "noopener"));
    new_tab && !guarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::scripted::element;

    #[test]
    fn test_noopener_detection() {
        assert!(opens_without_opener(&element(
            "a",
            &[("href", "https://x.org"), ("target", "_blank")]
        )));
        assert!(!opens_without_opener(&element(
            "a",
            &[
                ("href", "https://x.org"),
                ("target", "_blank"),
                ("rel", "noreferrer noopener")
            ]
        )));
        assert!(!opens_without_opener(&element("a", &[("href", "https://x.org")])));
    }
}
