use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Role, DEFAULT_SIGNED_IN_MARKER};
use crate::issue::Severity;
use crate::probe::{
    server_error, Findings, Probe, ProbeContext, ProbeResult, Requirement,
};
use crate::session::{
    is_on_path, AuthState, EMAIL_FIELD, PASSWORD_FIELD, SUBMIT_BUTTON,
};

const GROUP: &str = "auth";

pub const SIGN_UP_PATH: &str = "/es/users/sign_up";
pub const PASSWORD_RECOVERY_PATH: &str = "/es/users/password/new";
pub const REGISTRATION_FIELDS: [&str; 4] = [
    "user_email",
    "user_password",
    "user_first_name",
    "user_last_name",
];

/// The sign-in page offers both credential fields.
pub struct LoginForm;

#[async_trait]
impl Probe for LoginForm {
    fn name(&self) -> &str {
        "login form"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Login Page", cx.target.sign_in_url());
        let outcome = inspect_login_form(cx, &mut findings).await;
        findings.conclude(outcome, Severity::High, "Login page test failed")
    }
}

async fn inspect_login_form(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    session.visit(findings.url()).await?;
    if let Some(reason) = server_error(session.driver()).await? {
        findings.push(
            findings
                .record(
                    Severity::Critical,
                    "Server error on login page",
                    "Server Error",
                    "The sign-in page failed to render",
                )?
                .with_error_message(reason),
        );
        return Ok(());
    }
    if let Err(error) = session.wait_for(EMAIL_FIELD).await {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Login email field missing",
                    "Missing Element",
                    format!("No element matches {}", EMAIL_FIELD),
                )?
                .with_error_message(error.to_string()),
        );
    }
    if session.driver().find_elements(PASSWORD_FIELD).await?.is_empty() {
        findings.issue(
            Severity::High,
            "Login password field missing",
            "Missing Element",
            format!("No element matches {}", PASSWORD_FIELD),
        )?;
    }
    Ok(())
}

/// The configured regular user can sign in and is offered a way out.
pub struct ValidLogin;

#[async_trait]
impl Probe for ValidLogin {
    fn name(&self) -> &str {
        "valid login"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::User)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Login", cx.target.sign_in_url());
        let outcome = inspect_valid_login(cx, &mut findings).await;
        findings.conclude(outcome, Severity::High, "Login test failed")
    }
}

async fn inspect_valid_login(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    match session.auth() {
        AuthState::LoggedIn(_) => {}
        AuthState::AuthFailed { reason, .. } => {
            let location = session.driver().current_url().await?;
            findings.locate("Login", location);
            findings.push(
                findings
                    .record(
                        Severity::High,
                        "Login with valid credentials failed",
                        "Authentication Error",
                        format!("{} could not sign in", cx.target.user.email),
                    )?
                    .with_error_message(reason.to_string())
                    .with_comparison("signed in", "still signed out"),
            );
            return Ok(());
        }
        other => anyhow::bail!("login was not attempted ({:?})", other),
    }
    // The configured marker was already required for the login to succeed.
    if cx.target.signed_in_marker.is_none()
        && session
            .driver()
            .find_elements(DEFAULT_SIGNED_IN_MARKER)
            .await?
            .is_empty()
    {
        let location = session.driver().current_url().await?;
        findings.locate("Login", location);
        findings.issue(
            Severity::Medium,
            "No sign-out control after login",
            "UX Issue",
            "Signed-in pages offer no way to sign out",
        )?;
    }
    Ok(())
}

/// Wrong credentials are rejected without a server error.
pub struct InvalidLogin;

#[async_trait]
impl Probe for InvalidLogin {
    fn name(&self) -> &str {
        "invalid login"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Login", cx.target.sign_in_url());
        let outcome = async {
            let session = cx.session()?;
            session.visit(findings.url()).await?;
            session.wait_for(EMAIL_FIELD).await?;
            let driver = session.driver();
            driver.fill(EMAIL_FIELD, "invalid@example.com").await?;
            driver.fill(PASSWORD_FIELD, "wrongpassword").await?;
            session.submit(SUBMIT_BUTTON).await?;
            if let Some(reason) = server_error(driver).await? {
                findings.push(
                    findings
                        .record(
                            Severity::Critical,
                            "Server error on invalid login",
                            "Server Error",
                            "Submitting wrong credentials crashed the server",
                        )?
                        .with_error_message(reason),
                );
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Invalid login test failed")
    }
}

/// The registration form carries every field a new member must fill in.
pub struct RegistrationForm;

#[async_trait]
impl Probe for RegistrationForm {
    fn name(&self) -> &str {
        "registration form"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Browser
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Registration", cx.target.url(SIGN_UP_PATH));
        let outcome = async {
            let session = cx.session()?;
            session.visit(findings.url()).await?;
            if let Some(reason) = server_error(session.driver()).await? {
                findings.push(
                    findings
                        .record(
                            Severity::Critical,
                            "Server error on registration page",
                            "Server Error",
                            "The registration page failed to render",
                        )?
                        .with_error_message(reason),
                );
                return anyhow::Ok(());
            }
            for field in REGISTRATION_FIELDS {
                let selector = format!("#{}", field);
                if session.driver().find_elements(&selector).await?.is_empty() {
                    findings.issue(
                        Severity::High,
                        format!("Registration field missing: {}", field),
                        "Missing Element",
                        format!("No element matches {}", selector),
                    )?;
                }
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(outcome, Severity::Medium, "Registration test failed")
    }
}

/// The password recovery page asks for an email address.
pub struct PasswordRecovery;

#[async_trait]
impl Probe for PasswordRecovery {
    fn name(&self) -> &str {
        "password recovery"
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
            session.visit(findings.url()).await?;
            if let Some(reason) = server_error(session.driver()).await? {
                findings.push(
                    findings
                        .record(
                            Severity::High,
                            "Server error on password recovery",
                            "Server Error",
                            "The password recovery page failed to render",
                        )?
                        .with_error_message(reason),
                );
            } else if session.driver().find_elements(EMAIL_FIELD).await?.is_empty() {
                findings.issue(
                    Severity::High,
                    "Password recovery email field missing",
                    "Missing Element",
                    format!("No element matches {}", EMAIL_FIELD),
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(
            outcome,
            Severity::Medium,
            "Password recovery test failed",
        )
    }
}

pub const LOGOUT_LINK: &str = "a[href*='sign_out']";
pub const AFTER_LOGOUT_PATH: &str = "/es/users/edit";

/// Signing out ends the session.
pub struct Logout;

#[async_trait]
impl Probe for Logout {
    fn name(&self) -> &str {
        "logout"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::User)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Logout", cx.target.url("/es"));
        let outcome = inspect_logout(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Medium, "Logout test failed")
    }
}

async fn inspect_logout(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    if !session.is_logged_in() {
        log::warn!("skipping logout: {:?}", session.auth());
        return Ok(());
    }
    let driver = session.driver();
    findings.locate("Logout", driver.current_url().await?);
    if driver.find_elements(LOGOUT_LINK).await?.is_empty() {
        findings.issue(
            Severity::Medium,
            "Logout link not found",
            "Missing Element",
            format!("No element matches {}", LOGOUT_LINK),
        )?;
        return Ok(());
    }
    session.submit(LOGOUT_LINK).await?;
    let crashed = findings
        .check_page(
            driver,
            Severity::High,
            "Server error on logout",
            "Signing out crashed the server",
        )
        .await?;
    if crashed {
        return Ok(());
    }

    findings.locate("Logout", cx.target.url(AFTER_LOGOUT_PATH));
    session.visit(findings.url()).await?;
    let location = driver.current_url().await?;
    if !is_on_path(&location, &cx.target.sign_in_path) {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Session survives logout",
                    "Security Issue",
                    format!("{} still rendered after signing out", AFTER_LOGOUT_PATH),
                )?
                .with_comparison(cx.target.sign_in_url(), location),
        );
    }
    Ok(())
}
