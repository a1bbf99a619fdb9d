//! The probe catalog: every leaf check a run executes, in registration
//! order.

use std::sync::Arc;

use crate::probe::Probe;

pub mod accessibility;
pub mod admin;
pub mod api;
pub mod auth;
pub mod authenticated;
pub mod edge_cases;
pub mod forms;
pub mod headers;
pub mod navigation;
pub mod performance;
pub mod public;
pub mod security;

pub fn catalog() -> Vec<Arc<dyn Probe>> {
    let mut probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(public::HealthEndpoint),
        Arc::new(public::RootRedirect),
    ];
    for locale in public::LOCALES {
        probes.push(Arc::new(public::LocaleHome::new(locale)));
    }
    probes.extend([
        Arc::new(public::PublicPages) as Arc<dyn Probe>,
        Arc::new(public::MissingPage),
        Arc::new(auth::LoginForm),
        Arc::new(auth::ValidLogin),
        Arc::new(auth::InvalidLogin),
        Arc::new(auth::RegistrationForm),
        Arc::new(auth::PasswordRecovery),
        Arc::new(auth::Logout),
        Arc::new(authenticated::UserPages),
        Arc::new(admin::AdminPages),
        Arc::new(admin::AdminDeniedToUser),
        Arc::new(forms::EmptySubmissions),
        Arc::new(forms::RegistrationSubmission),
        Arc::new(forms::RecoverySubmission),
        Arc::new(forms::CollaborationForms),
        Arc::new(forms::MicrocreditForm),
        Arc::new(forms::ProfileForm),
        Arc::new(accessibility::Accessibility::new("Home", "/es")),
        Arc::new(accessibility::Accessibility::new(
            "Login Page",
            "/es/users/sign_in",
        )),
        Arc::new(accessibility::PageStructure),
        Arc::new(accessibility::DocumentLanguage),
        Arc::new(performance::PageLoadTime),
        Arc::new(performance::ResponseTime),
        Arc::new(performance::PageAssets),
        Arc::new(api::StatusEndpoints),
        Arc::new(api::UnknownApiPath),
        Arc::new(api::UnsupportedMethod),
        Arc::new(api::SpecialCharacters),
        Arc::new(api::JsonSignIn),
        Arc::new(api::LargeRequest),
        Arc::new(api::RapidRequests),
        Arc::new(security::CsrfToken),
        Arc::new(security::ReflectedScript),
        Arc::new(security::SqlErrorExposure),
        Arc::new(security::InvalidResourceIds),
        Arc::new(security::PathTraversal),
        Arc::new(headers::ContentType),
        Arc::new(headers::Compression),
        Arc::new(headers::CorsPolicy),
        Arc::new(headers::CacheHeaders),
        Arc::new(navigation::NavigationLinks),
        Arc::new(navigation::ExternalLinkRel),
    ]);
    for urls in edge_cases::CRAFTED_URLS {
        probes.push(Arc::new(urls));
    }
    probes.extend([
        Arc::new(edge_cases::LongUrl) as Arc<dyn Probe>,
        Arc::new(edge_cases::NoCookies),
        Arc::new(edge_cases::UnicodeSignIn),
        Arc::new(edge_cases::RapidSubmission),
        Arc::new(edge_cases::MethodOverride),
        Arc::new(edge_cases::ExpiredSession),
    ]);
    probes
}

#[derive(Debug, thiserror::Error)]
#[error("--only {0:?} matches no probe group or name")]
pub struct UnmatchedFilter(pub String);

/// Keeps the probes whose group or name is listed. An empty filter keeps
/// everything; an entry that matches nothing is an error.
pub fn select(
    probes: Vec<Arc<dyn Probe>>,
    only: &[String],
) -> Result<Vec<Arc<dyn Probe>>, UnmatchedFilter> {
    if only.is_empty() {
        return Ok(probes);
    }
    if let Some(unmatched) = only
        .iter()
        .find(|wanted| !probes.iter().any(|probe| is_selected(probe.as_ref(), wanted)))
    {
        return Err(UnmatchedFilter(unmatched.clone()));
    }
    Ok(probes
        .into_iter()
        .filter(|probe| only.iter().any(|wanted| is_selected(probe.as_ref(), wanted)))
        .collect())
}

fn is_selected(probe: &dyn Probe, wanted: &str) -> bool {
    wanted == probe.group() || wanted == probe.name()
}
