use anyhow::Result;
use async_trait::async_trait;

use crate::config::Role;
use crate::issue::Severity;
use crate::probe::{
    server_error, Findings, Probe, ProbeContext, ProbeResult, Requirement,
};
use crate::session::{is_on_path, Session};

pub const USER_PAGES: [(&str, &str); 8] = [
    ("Edit Profile", "/es/users/edit"),
    ("Tools", "/es/herramientas"),
    ("Participation", "/es/participa"),
    ("Proposals", "/es/propuestas"),
    ("Votes", "/es/votos"),
    ("Membership", "/es/militante"),
    ("Collaborations", "/es/colabora"),
    ("Microcredits", "/es/microcreditos"),
];

/// Pages behind the member login render for a signed-in regular user.
pub struct UserPages;

#[async_trait]
impl Probe for UserPages {
    fn name(&self) -> &str {
        "authenticated user pages"
    }

    fn group(&self) -> &str {
        "authenticated"
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::User)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Authenticated Pages", cx.target.sign_in_url());
        let outcome = inspect_user_pages(cx, &mut findings).await;
        findings.conclude(
            outcome,
            Severity::Medium,
            "Authenticated pages test failed",
        )
    }
}

async fn inspect_user_pages(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    if !session.is_logged_in() {
        log::warn!(
            "skipping authenticated user pages: {:?}",
            session.auth()
        );
        return Ok(());
    }
    for (page, path) in USER_PAGES {
        findings.locate(page, cx.target.url(path));
        inspect_user_page(cx, session, findings).await?;
    }
    Ok(())
}

async fn inspect_user_page(
    cx: &ProbeContext<'_>,
    session: &Session,
    findings: &mut Findings<'_>,
) -> Result<()> {
    if let Err(error) = session.visit(findings.url()).await {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Authenticated page failed to load",
                    "Navigation Error",
                    "The page could not be opened while signed in",
                )?
                .with_error_message(error.to_string()),
        );
        return Ok(());
    }
    if let Some(reason) = server_error(session.driver()).await? {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Server error on authenticated page",
                    "Server Error",
                    "The page failed to render for a signed-in user",
                )?
                .with_error_message(reason),
        );
        return Ok(());
    }
    let location = session.driver().current_url().await?;
    if is_on_path(&location, &cx.target.sign_in_path) {
        findings.push(
            findings
                .record(
                    Severity::High,
                    "Signed-in user sent back to sign-in",
                    "Authentication Error",
                    "The session was not honoured on this page",
                )?
                .with_comparison(findings.url().to_string(), location),
        );
    }
    Ok(())
}
