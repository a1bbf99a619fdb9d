use std::path::PathBuf;
use std::time::Duration;

use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_SIGN_IN_PATH: &str = "/es/users/sign_in";
pub const DEFAULT_SIGNED_IN_MARKER: &str =
    "a[href*='sign_out'], form[action*='sign_out']";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "regular user"),
            Role::Admin => write!(f, "administrator"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub email: String,
    pub password: String,
}

// Keep passwords out of logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("role", &self.role)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// The application under test.
#[derive(Clone, Debug)]
pub struct Target {
    pub base_url: Url,
    pub sign_in_path: String,
    /// Selector that only matches for an authenticated visitor. `None`
    /// falls back to the URL check alone.
    pub signed_in_marker: Option<String>,
    pub user: Identity,
    pub admin: Identity,
}

impl Target {
    pub fn new(base_url: Url) -> Self {
        Target {
            base_url,
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            signed_in_marker: Some(DEFAULT_SIGNED_IN_MARKER.to_string()),
            user: Identity {
                role: Role::User,
                email: "test@example.com".to_string(),
                password: "password123".to_string(),
            },
            admin: Identity {
                role: Role::Admin,
                email: "admin@example.com".to_string(),
                password: "admin123456".to_string(),
            },
        }
    }

    pub fn identity(&self, role: Role) -> &Identity {
        match role {
            Role::User => &self.user,
            Role::Admin => &self.admin,
        }
    }

    /// Resolves `path` against the base URL. Paths are appended verbatim so
    /// that deliberately malformed probe paths reach the server unchanged.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        )
    }

    pub fn sign_in_url(&self) -> String {
        self.url(&self.sign_in_path)
    }
}

/// Fixed per-operation deadlines. Exceeding one is a probe-local failure.
#[derive(Clone, Debug)]
pub struct Timeouts {
    pub navigation: Duration,
    pub element_wait: Duration,
    pub http_request: Duration,
    pub slow_http_request: Duration,
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            navigation: Duration::from_secs(30),
            element_wait: Duration::from_secs(10),
            http_request: Duration::from_secs(10),
            slow_http_request: Duration::from_secs(30),
            probe: Duration::from_secs(120),
        }
    }
}

/// Fixed delays standing in for a browser readiness signal.
#[derive(Clone, Debug)]
pub struct Settle {
    pub after_navigation: Duration,
    pub after_submit: Duration,
}

impl Default for Settle {
    fn default() -> Self {
        Settle {
            after_navigation: Duration::from_secs(2),
            after_submit: Duration::from_secs(3),
        }
    }
}

impl Settle {
    pub fn none() -> Self {
        Settle {
            after_navigation: Duration::ZERO,
            after_submit: Duration::ZERO,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "qa_report.md",
            ReportFormat::Json => "qa_report.json",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReportOptions {
    pub output_directory: PathBuf,
    pub format: ReportFormat,
}

impl ReportOptions {
    pub fn path(&self) -> PathBuf {
        self.output_directory.join(self.format.file_name())
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            output_directory: PathBuf::from("."),
            format: ReportFormat::Markdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let target =
            Target::new(Url::parse("http://localhost:3000/").unwrap());
        assert_eq!(target.url("/health"), "http://localhost:3000/health");
        assert_eq!(
            target.sign_in_url(),
            "http://localhost:3000/es/users/sign_in"
        );
    }

    fn target() -> Target {
        Target::new(Url::parse(DEFAULT_BASE_URL).unwrap())
    }

    #[test]
    fn test_url_keeps_malformed_paths_verbatim() {
        let target = target();
        assert_eq!(
            target.url("/es/test/../../../etc/passwd"),
            "http://localhost:3000/es/test/../../../etc/passwd"
        );
    }

    #[test]
    fn test_identity_debug_hides_password() {
        let target = target();
        let rendered = format!("{:?}", target.identity(Role::Admin));
        assert!(rendered.contains("admin@example.com"));
        assert!(!rendered.contains(&target.admin.password));
    }

    #[test]
    fn test_report_path_follows_format() {
        let options = ReportOptions {
            output_directory: PathBuf::from("/tmp/run"),
            format: ReportFormat::Json,
        };
        assert_eq!(options.path(), PathBuf::from("/tmp/run/qa_report.json"));
    }
}
