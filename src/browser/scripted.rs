//! An in-memory `Driver` serving canned pages, for exercising sessions and
//! probes without launching Chromium.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json as json;

use crate::browser::{Driver, DriverError, Element};
use crate::config::{Identity, Settle, Target, DEFAULT_SIGNED_IN_MARKER};
use crate::session::{
    Session, SessionError, SessionManager, EMAIL_FIELD, PASSWORD_FIELD,
    SUBMIT_BUTTON,
};

#[derive(Clone, Debug, Default)]
pub struct ScriptedPage {
    pub title: String,
    pub content: String,
    pub status: Option<u16>,
    elements: HashMap<String, Vec<Element>>,
    scripts: HashMap<String, json::Value>,
}

impl ScriptedPage {
    pub fn html(content: &str) -> Self {
        ScriptedPage {
            content: content.to_string(),
            status: Some(200),
            ..ScriptedPage::default()
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Elements returned for `selector`, matched verbatim.
    pub fn with(mut self, selector: &str, elements: Vec<Element>) -> Self {
        self.elements.insert(selector.to_string(), elements);
        self
    }

    /// The value `expression` evaluates to, matched verbatim.
    pub fn evaluating(mut self, expression: &str, value: json::Value) -> Self {
        self.scripts.insert(expression.to_string(), value);
        self
    }
}

pub fn element(tag: &str, attributes: &[(&str, &str)]) -> Element {
    Element {
        tag: tag.to_string(),
        text: String::new(),
        visible: true,
        labelled: false,
        attributes: attributes
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

type ClickHandler = Box<dyn Fn(&HashMap<String, String>) -> String + Send + Sync>;

#[derive(Default)]
struct State {
    pages: HashMap<String, ScriptedPage>,
    signed_out_pages: HashMap<String, ScriptedPage>,
    cookies_cleared: bool,
    current: String,
    fields: HashMap<String, String>,
}

#[derive(Default)]
pub struct ScriptedDriver {
    state: Mutex<State>,
    clicks: HashMap<String, ClickHandler>,
    redirects: HashMap<String, String>,
    unreachable: Vec<String>,
    navigation_delay: Duration,
    closes: Arc<AtomicUsize>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, page: ScriptedPage) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), page);
        self
    }

    /// Served at `url` instead of its usual page once cookies are cleared.
    pub fn page_without_cookies(self, url: &str, page: ScriptedPage) -> Self {
        self.state
            .lock()
            .unwrap()
            .signed_out_pages
            .insert(url.to_string(), page);
        self
    }

    /// Clicking `selector` navigates to the URL computed from the filled
    /// form fields.
    pub fn on_click(
        mut self,
        selector: &str,
        handler: impl Fn(&HashMap<String, String>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.clicks.insert(selector.to_string(), Box::new(handler));
        self
    }

    /// Navigating to `from` ends on `to`.
    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    /// Navigation to `url` fails as if the connection was refused.
    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.push(url.to_string());
        self
    }

    pub fn navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }

    pub fn counting_closes_in(mut self, closes: Arc<AtomicUsize>) -> Self {
        self.closes = closes;
        self
    }

    fn current_page(&self) -> ScriptedPage {
        let state = self.state.lock().unwrap();
        state
            .signed_out_pages
            .get(&state.current)
            .filter(|_| state.cookies_cleared)
            .or_else(|| state.pages.get(&state.current))
            .cloned()
            .unwrap_or_else(|| ScriptedPage::html("Not Found").status(404))
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        if self.unreachable.iter().any(|candidate| candidate == url) {
            return Err(DriverError::Script(format!(
                "net::ERR_CONNECTION_REFUSED at {}",
                url
            )));
        }
        if !self.navigation_delay.is_zero() {
            tokio::time::sleep(self.navigation_delay).await;
        }
        let destination = self.redirects.get(url).map_or(url, String::as_str);
        let mut state = self.state.lock().unwrap();
        state.current = destination.to_string();
        state.fields.clear();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state.lock().unwrap().current.clone())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.current_page().title)
    }

    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.current_page().content)
    }

    async fn find_elements(
        &self,
        selector: &str,
    ) -> Result<Vec<Element>, DriverError> {
        Ok(self
            .current_page()
            .elements
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn fill(
        &self,
        selector: &str,
        value: &str,
    ) -> Result<(), DriverError> {
        if !self.current_page().elements.contains_key(selector) {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .fields
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        if !self.current_page().elements.contains_key(selector) {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        if let Some(handler) = self.clicks.get(selector) {
            let mut state = self.state.lock().unwrap();
            state.current = handler(&state.fields);
        }
        Ok(())
    }

    async fn evaluate(
        &self,
        expression: &str,
    ) -> Result<json::Value, DriverError> {
        Ok(self
            .current_page()
            .scripts
            .get(expression)
            .cloned()
            .unwrap_or(json::Value::Null))
    }

    async fn response_status(&self) -> Result<Option<u16>, DriverError> {
        Ok(self.current_page().status)
    }

    async fn clear_cookies(&self) -> Result<(), DriverError> {
        self.state.lock().unwrap().cookies_cleared = true;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        tokio::fs::write(path, b"\x89PNG").await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A sign-in page accepting exactly the `registered` identities. A
/// successful submission lands on `/es`, which carries the signed-in marker.
pub fn sign_in_app(target: &Target, registered: &[&Identity]) -> ScriptedDriver {
    let accepted: Vec<(String, String)> = registered
        .iter()
        .map(|identity| (identity.email.clone(), identity.password.clone()))
        .collect();
    let home = target.url("/es");
    let sign_in = target.sign_in_url();
    let marker = target
        .signed_in_marker
        .clone()
        .unwrap_or_else(|| DEFAULT_SIGNED_IN_MARKER.to_string());

    ScriptedDriver::new()
        .page(
            &sign_in,
            ScriptedPage::html("<form id=\"new_user\"></form>")
                .title("Iniciar sesión")
                .with(EMAIL_FIELD, vec![element("input", &[("id", "user_email")])])
                .with(
                    PASSWORD_FIELD,
                    vec![element("input", &[("id", "user_password")])],
                )
                .with(SUBMIT_BUTTON, vec![element("input", &[("name", "commit")])]),
        )
        .page(
            &home,
            ScriptedPage::html("<h1>Inicio</h1>")
                .title("Inicio")
                .with(
                    &marker,
                    vec![element("a", &[("href", "/es/users/sign_out")])],
                ),
        )
        .on_click(SUBMIT_BUTTON, move |fields| {
            let email = fields.get(EMAIL_FIELD).cloned().unwrap_or_default();
            let password = fields.get(PASSWORD_FIELD).cloned().unwrap_or_default();
            if accepted.contains(&(email, password)) {
                home.clone()
            } else {
                sign_in.clone()
            }
        })
}

type DriverFactory =
    Box<dyn Fn() -> Result<ScriptedDriver, DriverError> + Send + Sync>;

/// Opens a new scripted driver per session and counts opens and closes.
pub struct ScriptedSessions {
    factory: DriverFactory,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl ScriptedSessions {
    pub fn new(
        factory: impl Fn() -> Result<ScriptedDriver, DriverError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        ScriptedSessions {
            factory: Box::new(factory),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl SessionManager for ScriptedSessions {
    async fn open(&self) -> Result<Session, SessionError> {
        let driver = (self.factory)()?.counting_closes_in(self.closed.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(
            Box::new(driver),
            Settle::none(),
            Duration::from_millis(20),
        ))
    }
}
