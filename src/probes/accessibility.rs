use anyhow::Result;
use async_trait::async_trait;

use crate::browser::Element;
use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};

pub const LABELLED_INPUTS: &str = "input:not([type='hidden']):not([type='submit']):not([type='button']), select, textarea";

/// Basic WCAG checks on one page.
pub struct Accessibility {
    page: &'static str,
    path: &'static str,
    name: String,
}

impl Accessibility {
    pub fn new(page: &'static str, path: &'static str) -> Self {
        Accessibility {
            page,
            path,
            name: format!("accessibility ({})", path),
        }
    }
}

#[async_trait]
impl Probe for Accessibility {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self) -> &str {
        "accessibility"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings(self.page, cx.target.url(self.path));
        let outcome = inspect(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "Accessibility test failed")
    }
}

async fn inspect(cx: &ProbeContext<'_>, findings: &mut Findings<'_>) -> Result<()> {
    let session = cx.session()?;
    session.visit(findings.url()).await?;
    let driver = session.driver();

    let images = driver.find_elements("img").await?;
    let without_alt = images
        .iter()
        .filter(|image| image.attribute("alt").is_none())
        .count();
    if without_alt > 0 {
        findings.issue(
            Severity::Medium,
            "Images without alt text",
            "Accessibility",
            format!("{} of {} images have no alt attribute", without_alt, images.len()),
        )?;
    }

    let mut unlabelled = Vec::new();
    for input in driver.find_elements(LABELLED_INPUTS).await? {
        if !has_label(&input) {
            unlabelled.push(describe(&input));
        }
    }
    if !unlabelled.is_empty() {
        findings.issue(
            Severity::Medium,
            "Form fields without labels",
            "Accessibility",
            format!("Unlabelled fields: {}", unlabelled.join(", ")),
        )?;
    }

    if driver.find_elements("h1").await?.is_empty() {
        findings.issue(
            Severity::Medium,
            "Page has no h1 heading",
            "Accessibility",
            "Screen readers rely on a top-level heading to announce the page",
        )?;
    }

    let lang = driver
        .find_elements("html")
        .await?
        .first()
        .and_then(|html| html.non_blank_attribute("lang").map(str::to_string));
    if lang.is_none() {
        findings.issue(
            Severity::Low,
            "Document language not declared",
            "Accessibility",
            "The html element has no lang attribute",
        )?;
    }
    Ok(())
}

pub const HEADINGS: &str = "h1, h2, h3, h4, h5, h6";
pub const SKIP_LINKS: &str =
    "a[href='#main'], a[href='#content'], .skip-link, .skip-nav";
pub const MAIN_LANDMARK: &str = "main, [role='main']";
pub const NAVIGATION_LANDMARK: &str = "nav, [role='navigation']";
pub const VAGUE_LINK_TEXT: [&str; 5] = ["click here", "here", "read more", "more", "link"];

/// Headings, landmarks and links that let assistive technology move around
/// the home page.
pub struct PageStructure;

#[async_trait]
impl Probe for PageStructure {
    fn name(&self) -> &str {
        "page structure"
    }

    fn group(&self) -> &str {
        "accessibility"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Home", cx.target.url("/es"));
        let outcome = inspect_structure(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Low, "Page structure test failed")
    }
}

async fn inspect_structure(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    session.visit(findings.url()).await?;
    let driver = session.driver();

    let levels: Vec<u8> = driver
        .find_elements(HEADINGS)
        .await?
        .iter()
        .filter_map(heading_level)
        .collect();
    let h1s = levels.iter().filter(|level| **level == 1).count();
    if h1s > 1 {
        findings.issue(
            Severity::Low,
            "Multiple h1 headings",
            "Accessibility",
            format!("The page has {} h1 headings", h1s),
        )?;
    }
    if let Some((from, to)) = skipped_level(&levels) {
        findings.push(
            findings
                .record(
                    Severity::Low,
                    "Skipped heading level",
                    "Accessibility",
                    format!("An h{} follows an h{}", to, from),
                )?
                .with_comparison(format!("h{} or higher", from + 1), format!("h{}", to)),
        );
    }

    let landmarks = [
        (
            SKIP_LINKS,
            "No skip navigation link",
            "Keyboard users cannot jump past the navigation",
        ),
        (MAIN_LANDMARK, "No main landmark", "No element marks the main content"),
        (
            NAVIGATION_LANDMARK,
            "No navigation landmark",
            "No element marks the navigation",
        ),
    ];
    for (selector, title, description) in landmarks {
        if driver.find_elements(selector).await?.is_empty() {
            findings.issue(Severity::Low, title, "Accessibility", description)?;
        }
    }

    let mut vague: Vec<String> = driver
        .find_elements("a")
        .await?
        .into_iter()
        .map(|link| link.text.trim().to_lowercase())
        .filter(|text| VAGUE_LINK_TEXT.contains(&text.as_str()))
        .collect();
    vague.sort();
    vague.dedup();
    if !vague.is_empty() {
        findings.issue(
            Severity::Low,
            "Links with vague text",
            "Accessibility",
            format!("Link text does not describe the target: {}", vague.join(", ")),
        )?;
    }
    Ok(())
}

fn heading_level(heading: &Element) -> Option<u8> {
    heading.tag.strip_prefix('h')?.parse().ok()
}

/// The first pair of consecutive headings that descends more than one level.
fn skipped_level(levels: &[u8]) -> Option<(u8, u8)> {
    levels
        .windows(2)
        .map(|pair| (pair[0], pair[1]))
        .find(|(from, to)| *to > from + 1)
}

/// Each locale declares its own language on the html element.
pub struct DocumentLanguage;

#[async_trait]
impl Probe for DocumentLanguage {
    fn name(&self) -> &str {
        "document language"
    }

    fn group(&self) -> &str {
        "accessibility"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Language", cx.target.url("/es"));
        let outcome = async {
            let session = cx.session()?;
            for locale in DECLARED_LOCALES {
                findings.locate(
                    format!("Home ({})", locale),
                    cx.target.url(&format!("/{}", locale)),
                );
                session.visit(findings.url()).await?;
                let lang = session
                    .driver()
                    .find_elements("html")
                    .await?
                    .first()
                    .and_then(|html| html.non_blank_attribute("lang").map(str::to_string));
                // A missing attribute is reported by the per-page checks.
                if let Some(lang) = lang
                    && !lang.starts_with(locale)
                {
                    findings.push(
                        findings
                            .record(
                                Severity::Low,
                                "Incorrect lang attribute",
                                "Accessibility",
                                format!("The /{} page declares another language", locale),
                            )?
                            .with_comparison(locale, lang),
                    );
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Low, "Document language test failed")
    }
}

pub const DECLARED_LOCALES: [&str; 3] = ["es", "ca", "eu"];

fn has_label(input: &Element) -> bool {
    input.labelled
        || input.non_blank_attribute("aria-label").is_some()
        || input.non_blank_attribute("aria-labelledby").is_some()
}

fn describe(input: &Element) -> String {
    if let Some(id) = input.non_blank_attribute("id") {
        format!("{}#{}", input.tag, id)
    } else if let Some(name) = input.non_blank_attribute("name") {
        format!("{}[name={}]", input.tag, name)
    } else {
        input.tag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_skipped_heading_level() {
        assert_eq!(skipped_level(&[1, 2, 3, 2, 3]), None);
        assert_eq!(skipped_level(&[1, 3, 2, 5]), Some((1, 3)));
        assert_eq!(skipped_level(&[2, 1, 2]), None);
        assert_eq!(skipped_level(&[]), None);
    }
}
