use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::browser::{BrowserOptions, ChromeDriver, Driver, DriverError};
use crate::config::{Role, Settle, Target, Timeouts};

pub const EMAIL_FIELD: &str = "#user_email";
pub const PASSWORD_FIELD: &str = "#user_password";
pub const SUBMIT_BUTTON: &str = "[name='commit']";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq)]
pub enum AuthState {
    LoggedOut,
    Authenticating(Role),
    LoggedIn(Role),
    AuthFailed { role: Role, reason: AuthFailure },
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AuthFailure {
    #[error("sign-in form unusable: {0}")]
    Form(String),
    #[error("still on the sign-in page after submitting ({0})")]
    StillOnSignIn(String),
    #[error("no element matching {0:?} after signing in")]
    MarkerMissing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("browser session unavailable: {0}")]
    Launch(#[from] DriverError),
    #[error("browser session did not start within {}s", .0.as_secs())]
    LaunchTimeout(Duration),
}

/// A browser context scoped to one probe invocation.
pub struct Session {
    driver: Box<dyn Driver>,
    auth: AuthState,
    settle: Settle,
    element_wait: Duration,
}

impl Session {
    pub fn new(
        driver: Box<dyn Driver>,
        settle: Settle,
        element_wait: Duration,
    ) -> Self {
        Session {
            driver,
            auth: AuthState::LoggedOut,
            settle,
            element_wait,
        }
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.auth, AuthState::LoggedIn(_))
    }

    /// Navigates and waits the fixed settle interval.
    pub async fn visit(&self, url: &str) -> Result<(), DriverError> {
        self.driver.navigate(url).await?;
        sleep(self.settle.after_navigation).await;
        Ok(())
    }

    /// Submits the sign-in form once. Failure is a state, not an error.
    pub async fn login(&mut self, target: &Target, role: Role) -> &AuthState {
        self.auth = AuthState::Authenticating(role);
        log::info!(
            "signing in as {} ({})",
            role,
            target.identity(role).email
        );
        self.auth = match self.attempt_login(target, role).await {
            Ok(()) => AuthState::LoggedIn(role),
            Err(reason) => {
                log::warn!("sign-in as {} failed: {}", role, reason);
                AuthState::AuthFailed { role, reason }
            }
        };
        &self.auth
    }

    async fn attempt_login(
        &self,
        target: &Target,
        role: Role,
    ) -> Result<(), AuthFailure> {
        let identity = target.identity(role);
        let form = |error: DriverError| AuthFailure::Form(error.to_string());

        self.visit(&target.sign_in_url()).await.map_err(form)?;
        self.wait_for(EMAIL_FIELD).await.map_err(form)?;
        self.driver
            .fill(EMAIL_FIELD, &identity.email)
            .await
            .map_err(form)?;
        self.driver
            .fill(PASSWORD_FIELD, &identity.password)
            .await
            .map_err(form)?;
        self.submit(SUBMIT_BUTTON).await.map_err(form)?;

        let location = self.driver.current_url().await.map_err(form)?;
        if is_on_path(&location, &target.sign_in_path) {
            return Err(AuthFailure::StillOnSignIn(location));
        }
        if let Some(marker) = &target.signed_in_marker {
            let found = self.driver.find_elements(marker).await.map_err(form)?;
            if found.is_empty() {
                return Err(AuthFailure::MarkerMissing(marker.clone()));
            }
        }
        Ok(())
    }

    /// Clicks `selector` and waits the fixed post-submit interval.
    pub async fn submit(&self, selector: &str) -> Result<(), DriverError> {
        self.driver.click(selector).await?;
        self.pause_after_submit().await;
        Ok(())
    }

    pub async fn pause_after_submit(&self) {
        sleep(self.settle.after_submit).await;
    }

    /// Polls until `selector` matches or the element wait elapses.
    pub async fn wait_for(&self, selector: &str) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            if !self.driver.find_elements(selector).await?.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= self.element_wait {
                return Err(DriverError::Timeout {
                    operation: format!("waiting for {}", selector),
                    after: self.element_wait,
                });
            }
            sleep(POLL_INTERVAL.min(self.element_wait)).await;
        }
    }

    /// Releases the browser. Teardown problems are logged, never raised.
    pub async fn close(self) {
        if let Err(error) = self.driver.close().await {
            log::warn!("closing browser session failed: {}", error);
        }
    }
}

/// Whether the path of `location` contains `path`; the query is ignored.
pub fn is_on_path(location: &str, path: &str) -> bool {
    match Url::parse(location) {
        Ok(url) => url.path().contains(path),
        Err(_) => location.contains(path),
    }
}

#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn open(&self) -> Result<Session, SessionError>;
}

/// Launches a fresh Chromium per session.
pub struct ChromeSessions {
    options: BrowserOptions,
    timeouts: Timeouts,
    settle: Settle,
}

impl ChromeSessions {
    pub fn new(options: BrowserOptions, timeouts: Timeouts, settle: Settle) -> Self {
        ChromeSessions {
            options,
            timeouts,
            settle,
        }
    }
}

#[async_trait]
impl SessionManager for ChromeSessions {
    async fn open(&self) -> Result<Session, SessionError> {
        let launch_timeout = self.timeouts.navigation;
        let driver = timeout(
            launch_timeout,
            ChromeDriver::launch(&self.options, self.timeouts.navigation),
        )
        .await
        .map_err(|_| SessionError::LaunchTimeout(launch_timeout))??;
        log::debug!(
            "opened browser session ({}x{}, {})",
            self.options.width,
            self.options.height,
            self.options.locale
        );
        Ok(Session::new(
            Box::new(driver),
            self.settle.clone(),
            self.timeouts.element_wait,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::scripted::{sign_in_app, ScriptedDriver, ScriptedPage};
    use crate::config::DEFAULT_BASE_URL;

    fn target() -> Target {
        Target::new(Url::parse(DEFAULT_BASE_URL).unwrap())
    }

    fn session(driver: ScriptedDriver) -> Session {
        Session::new(Box::new(driver), Settle::none(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_correct_identity_logs_in() {
        let target = target();
        let mut session = session(sign_in_app(&target, &[&target.user]));
        assert_eq!(session.auth(), &AuthState::LoggedOut);

        let state = session.login(&target, Role::User).await;
        assert_eq!(state, &AuthState::LoggedIn(Role::User));
        assert!(session.is_logged_in());
    }

    #[tokio::test]
    async fn test_wrong_password_fails_without_error() {
        let mut target = target();
        let registered = target.user.clone();
        target.user.password = "wrong-password".to_string();
        let mut session = session(sign_in_app(&target, &[&registered]));

        let state = session.login(&target, Role::User).await.clone();
        match state {
            AuthState::AuthFailed {
                role: Role::User,
                reason: AuthFailure::StillOnSignIn(location),
            } => assert!(location.ends_with("/es/users/sign_in")),
            other => panic!("unexpected state: {:?}", other),
        }
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_admin_identity_is_used_for_admin_role() {
        let target = target();
        let mut session = session(sign_in_app(&target, &[&target.admin]));

        assert_eq!(
            session.login(&target, Role::Admin).await,
            &AuthState::LoggedIn(Role::Admin)
        );
        assert!(matches!(
            session.login(&target, Role::User).await,
            AuthState::AuthFailed { role: Role::User, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_form_fails_login() {
        let target = target();
        let driver = ScriptedDriver::new()
            .page(&target.sign_in_url(), ScriptedPage::html("<p>maintenance</p>"));
        let mut session = session(driver);

        match session.login(&target, Role::User).await {
            AuthState::AuthFailed {
                reason: AuthFailure::Form(message),
                ..
            } => assert!(message.contains("#user_email")),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redirect_without_signed_in_marker_fails_login() {
        let target = target();
        let driver = sign_in_app(&target, &[&target.user])
            .page(&target.url("/es"), ScriptedPage::html("<h1>Inicio</h1>"));
        let mut session = session(driver);

        assert!(matches!(
            session.login(&target, Role::User).await,
            AuthState::AuthFailed {
                reason: AuthFailure::MarkerMissing(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_marker_check_can_be_disabled() {
        let mut target = target();
        target.signed_in_marker = None;
        let driver = sign_in_app(&target, &[&target.user])
            .page(&target.url("/es"), ScriptedPage::html("<h1>Inicio</h1>"));
        let mut session = session(driver);

        assert_eq!(
            session.login(&target, Role::User).await,
            &AuthState::LoggedIn(Role::User)
        );
    }

    #[tokio::test]
    async fn test_close_releases_driver() {
        let driver = ScriptedDriver::new();
        let closes = driver.close_counter();
        session(driver).close().await;
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sign_in_path_detection_ignores_query() {
        assert!(is_on_path(
            "http://localhost:3000/es/users/sign_in?locale=es",
            "/es/users/sign_in"
        ));
        assert!(!is_on_path(
            "http://localhost:3000/es?from=/es/users/sign_in",
            "/es/users/sign_in"
        ));
    }
}
