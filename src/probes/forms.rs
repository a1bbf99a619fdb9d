use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::config::Role;
use crate::issue::Severity;
use crate::probe::{Findings, Probe, ProbeContext, ProbeResult, Requirement};
use crate::probes::auth::{PASSWORD_RECOVERY_PATH, SIGN_UP_PATH};
use crate::session::{EMAIL_FIELD, SUBMIT_BUTTON};

const GROUP: &str = "forms";

pub const FORM: &str = "form";
pub const AMOUNT_CHOICES: &str =
    "input[name*='amount'], input[type='radio'][name*='collaboration']";
pub const PROFILE_PATH: &str = "/es/users/edit";
pub const COLLABORATION_PATH: &str = "/es/colabora";
pub const SINGLE_COLLABORATION_PATH: &str = "/es/colabora/puntual";
pub const MICROCREDITS_PATH: &str = "/es/microcreditos";

/// Values typed into the registration form, by field id.
pub const REGISTRATION_VALUES: [(&str, &str); 7] = [
    ("user_first_name", "Test"),
    ("user_last_name", "User"),
    ("user_password", "TestPassword123!"),
    ("user_password_confirmation", "TestPassword123!"),
    ("user_document_vatid", "12345678Z"),
    ("user_address", "Calle Test 123"),
    ("user_postal_code", "28001"),
];

// Shown by the microcredit page when no campaign is open.
const NO_CAMPAIGN: [&str; 2] = ["no hay", "no active"];

/// Both account forms submitted with every field empty.
pub struct EmptySubmissions;

#[async_trait]
impl Probe for EmptySubmissions {
    fn name(&self) -> &str {
        "empty form submissions"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Registration", cx.target.url(SIGN_UP_PATH));
        let outcome = async {
            let session = cx.session()?;
            let forms = [
                ("Registration", cx.target.url(SIGN_UP_PATH)),
                ("Login", cx.target.sign_in_url()),
            ];
            for (page, url) in forms {
                findings.locate(page, url);
                session.visit(findings.url()).await?;
                if session.driver().find_elements(SUBMIT_BUTTON).await?.is_empty() {
                    log::debug!("no submit button on {}", findings.url());
                    continue;
                }
                session.submit(SUBMIT_BUTTON).await?;
                findings
                    .check_page(
                        session.driver(),
                        Severity::High,
                        format!("Server error on empty {} form", page.to_lowercase()),
                        "Submitting the form without values crashed the server",
                    )
                    .await?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Empty form test failed")
    }
}

/// A complete registration with a fresh address.
pub struct RegistrationSubmission;

#[async_trait]
impl Probe for RegistrationSubmission {
    fn name(&self) -> &str {
        "registration submission"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Registration", cx.target.url(SIGN_UP_PATH));
        let outcome = inspect_registration(cx, &mut findings).await;
        findings.conclude(outcome, Severity::High, "Registration submission test failed")
    }
}

pub fn unique_email() -> String {
    format!("sweep_{}@example.com", Utc::now().timestamp_millis())
}

async fn inspect_registration(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    let driver = session.driver();
    session.visit(findings.url()).await?;
    session.wait_for(EMAIL_FIELD).await?;
    driver.fill(EMAIL_FIELD, &unique_email()).await?;
    for (field, value) in REGISTRATION_VALUES {
        let selector = format!("#{}", field);
        // Optional fields vary between deployments.
        if !driver.find_elements(&selector).await?.is_empty() {
            driver.fill(&selector, value).await?;
        }
    }
    session.submit(SUBMIT_BUTTON).await?;
    findings
        .check_page(
            driver,
            Severity::Critical,
            "Server error on registration",
            "Submitting a complete registration crashed the server",
        )
        .await?;
    Ok(())
}

/// The recovery form accepts an address.
pub struct RecoverySubmission;

#[async_trait]
impl Probe for RecoverySubmission {
    fn name(&self) -> &str {
        "password recovery submission"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings(
            "Password Recovery",
            cx.target.url(PASSWORD_RECOVERY_PATH),
        );
        let outcome = async {
            let session = cx.session()?;
            let driver = session.driver();
            session.visit(findings.url()).await?;
            if driver.find_elements(EMAIL_FIELD).await?.is_empty() {
                return anyhow::Ok(());
            }
            driver.fill(EMAIL_FIELD, "test@example.com").await?;
            session.submit(SUBMIT_BUTTON).await?;
            findings
                .check_page(
                    driver,
                    Severity::High,
                    "Server error on password recovery submission",
                    "Requesting a recovery email crashed the server",
                )
                .await?;
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Password recovery submission test failed")
    }
}

/// The collaboration pages offer a form and amounts to choose from.
pub struct CollaborationForms;

#[async_trait]
impl Probe for CollaborationForms {
    fn name(&self) -> &str {
        "collaboration forms"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Collaboration", cx.target.url(COLLABORATION_PATH));
        let outcome = inspect_collaboration(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Medium, "Collaboration form test failed")
    }
}

async fn inspect_collaboration(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    let driver = session.driver();
    session.visit(findings.url()).await?;
    let crashed = findings
        .check_page(
            driver,
            Severity::High,
            "Server error on collaboration page",
            "The collaboration page failed to render",
        )
        .await?;
    if !crashed && driver.find_elements(FORM).await?.is_empty() {
        findings.issue(
            Severity::High,
            "No form on collaboration page",
            "Missing Element",
            "The collaboration page offers no form",
        )?;
    }

    findings.locate(
        "Single Collaboration",
        cx.target.url(SINGLE_COLLABORATION_PATH),
    );
    session.visit(findings.url()).await?;
    let crashed = findings
        .check_page(
            driver,
            Severity::High,
            "Server error on single collaboration page",
            "The single collaboration page failed to render",
        )
        .await?;
    if !crashed && driver.find_elements(AMOUNT_CHOICES).await?.is_empty() {
        findings.issue(
            Severity::Medium,
            "No amount selection on single collaboration",
            "Missing Element",
            format!("No element matches {}", AMOUNT_CHOICES),
        )?;
    }
    Ok(())
}

/// The microcredit page shows a form or says no campaign is open.
pub struct MicrocreditForm;

#[async_trait]
impl Probe for MicrocreditForm {
    fn name(&self) -> &str {
        "microcredit form"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Microcredits", cx.target.url(MICROCREDITS_PATH));
        let outcome = async {
            let session = cx.session()?;
            let driver = session.driver();
            session.visit(findings.url()).await?;
            let crashed = findings
                .check_page(
                    driver,
                    Severity::High,
                    "Server error on microcredit page",
                    "The microcredit page failed to render",
                )
                .await?;
            if crashed || !driver.find_elements(FORM).await?.is_empty() {
                return anyhow::Ok(());
            }
            let content = driver.content().await?.to_lowercase();
            if !NO_CAMPAIGN.iter().any(|phrase| content.contains(phrase)) {
                findings.issue(
                    Severity::Medium,
                    "Microcredit page missing content",
                    "Missing Element",
                    "Neither a form nor a closed-campaign notice is shown",
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Microcredit form test failed")
    }
}

/// A signed-in member can open the profile form.
pub struct ProfileForm;

#[async_trait]
impl Probe for ProfileForm {
    fn name(&self) -> &str {
        "profile form"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::User)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Profile", cx.target.url(PROFILE_PATH));
        let outcome = async {
            let session = cx.session()?;
            if !session.is_logged_in() {
                log::warn!("skipping profile form: {:?}", session.auth());
                return anyhow::Ok(());
            }
            let driver = session.driver();
            session.visit(findings.url()).await?;
            let crashed = findings
                .check_page(
                    driver,
                    Severity::High,
                    "Server error on profile page",
                    "The profile page failed to render for a signed-in member",
                )
                .await?;
            if !crashed && driver.find_elements(FORM).await?.is_empty() {
                findings.issue(
                    Severity::High,
                    "No form on profile edit page",
                    "Missing Element",
                    "The profile page offers no form",
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Profile form test failed")
    }
}
