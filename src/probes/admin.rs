use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::config::Role;
use crate::issue::Severity;
use crate::probe::{
    server_error, Findings, Probe, ProbeContext, ProbeResult, Requirement,
};

const GROUP: &str = "admin";

/// Admin pages with the severity of a server error on each.
pub const ADMIN_PAGES: [(&str, &str, Severity); 12] = [
    ("Admin Dashboard", "/admin", Severity::Critical),
    ("Admin Users", "/admin/users", Severity::Critical),
    ("Admin Collaborations", "/admin/collaborations", Severity::High),
    ("Admin Microcredits", "/admin/microcredits", Severity::High),
    ("Admin Votes", "/admin/votes", Severity::High),
    ("Admin Proposals", "/admin/proposals", Severity::High),
    ("Admin Impulsa", "/admin/impulsa", Severity::High),
    ("Admin Census", "/admin/census", Severity::High),
    ("Admin Participation Teams", "/admin/participation_teams", Severity::High),
    ("Admin Pages", "/admin/pages", Severity::High),
    ("Admin Categories", "/admin/categories", Severity::High),
    ("Admin Notices", "/admin/notices", Severity::High),
];

// Words only the admin dashboard renders.
const ADMIN_CONTENT: [&str; 2] = ["dashboard", "users"];

/// Every admin page renders for the administrator.
pub struct AdminPages;

#[async_trait]
impl Probe for AdminPages {
    fn name(&self) -> &str {
        "admin pages"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::Admin)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings = cx.findings("Admin", cx.target.url("/admin"));
        let outcome = inspect_admin_pages(cx, &mut findings).await;
        findings.conclude(outcome, Severity::Medium, "Admin pages test failed")
    }
}

async fn inspect_admin_pages(
    cx: &ProbeContext<'_>,
    findings: &mut Findings<'_>,
) -> Result<()> {
    let session = cx.session()?;
    if !session.is_logged_in() {
        log::warn!("skipping admin pages: {:?}", session.auth());
        return Ok(());
    }
    let driver = session.driver();
    for (page, path, severity) in ADMIN_PAGES {
        findings.locate(page, cx.target.url(path));
        session.visit(findings.url()).await?;
        if let Some(reason) = server_error(driver).await? {
            findings.push(
                findings
                    .record(
                        severity,
                        format!("Server error on {}", path),
                        "Server Error",
                        format!("{} failed to render for the administrator", page),
                    )?
                    .with_error_message(reason),
            );
            continue;
        }
        let forbidden = driver.response_status().await? == Some(403)
            || driver.content().await?.contains("Forbidden");
        if forbidden {
            findings.issue(
                Severity::High,
                format!("Administrator denied {}", path),
                "Access Control",
                format!("{} is forbidden to the administrator", page),
            )?;
        }
    }
    Ok(())
}

/// A regular member must not see the admin dashboard.
pub struct AdminDeniedToUser;

#[async_trait]
impl Probe for AdminDeniedToUser {
    fn name(&self) -> &str {
        "admin denied to regular user"
    }

    fn group(&self) -> &str {
        GROUP
    }

    fn requirement(&self) -> Requirement {
        Requirement::Authenticated(Role::User)
    }

    async fn run(&self, cx: &ProbeContext<'_>) -> ProbeResult {
        let mut findings =
            cx.findings("Admin Access Control", cx.target.url("/admin"));
        let outcome = async {
            let session = cx.session()?;
            if !session.is_logged_in() {
                log::warn!(
                    "skipping admin access control: {:?}",
                    session.auth()
                );
                return anyhow::Ok(());
            }
            session.visit(findings.url()).await?;
            let driver = session.driver();
            if let Some(reason) = server_error(driver).await? {
                findings.push(
                    findings
                        .record(
                            Severity::High,
                            "Server error denying admin access",
                            "Server Error",
                            "A regular user got a server error instead of a denial",
                        )?
                        .with_error_message(reason),
                );
                return anyhow::Ok(());
            }
            let location = driver.current_url().await?;
            let content = driver.content().await?.to_lowercase();
            if still_under_admin(&location)
                && ADMIN_CONTENT.iter().any(|word| content.contains(word))
            {
                findings.issue(
                    Severity::Critical,
                    "Regular user can access admin area",
                    "Security Issue",
                    "A regular user was shown the admin dashboard",
                )?;
            }
            anyhow::Ok(())
        }
        .await;
        findings.conclude(
            outcome,
            Severity::Medium,
            "Admin access control test failed",
        )
    }
}

fn still_under_admin(location: &str) -> bool {
    match Url::parse(location) {
        Ok(url) => url.path().starts_with("/admin"),
        Err(_) => location.contains("/admin"),
    }
}
