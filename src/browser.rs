use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::emulation;
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde_json as json;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::browser::evaluation::{evaluate_expression, evaluate_function_call};

pub mod evaluation;
#[cfg(test)]
pub mod scripted;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },
    #[error("no element matches {0:?}")]
    ElementNotFound(String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("could not decode script result: {0}")]
    Decode(#[from] json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A snapshot of one DOM element taken when it was queried.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Element {
    pub tag: String,
    pub text: String,
    pub visible: bool,
    /// A `<label>` is associated with the element, by `for` or by nesting.
    #[serde(default)]
    pub labelled: bool,
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The attribute value, treating blank values as absent.
    pub fn non_blank_attribute(&self, name: &str) -> Option<&str> {
        self.attribute(name).filter(|value| !value.trim().is_empty())
    }
}

/// Evaluates to the messages captured by `CONSOLE_ERRORS_HOOK`, or `null`
/// when the hook is not installed.
pub const CONSOLE_ERRORS: &str = "window.__sweepConsoleErrors ?? null";

/// The browser capabilities probes are written against.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn title(&self) -> Result<String, DriverError>;

    async fn content(&self) -> Result<String, DriverError>;

    async fn find_elements(
        &self,
        selector: &str,
    ) -> Result<Vec<Element>, DriverError>;

    /// Replaces the value of the first element matching `selector`.
    async fn fill(&self, selector: &str, value: &str)
    -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn evaluate(&self, expression: &str)
    -> Result<json::Value, DriverError>;

    /// HTTP status of the current document, when the browser exposes it.
    async fn response_status(&self) -> Result<Option<u16>, DriverError> {
        let value = self
            .evaluate(
                "window.performance.getEntriesByType('navigation')[0]?.responseStatus ?? null",
            )
            .await?;
        Ok(json::from_value(value)?)
    }

    /// Uncaught errors and `console.error` calls since the last navigation.
    async fn console_errors(&self) -> Result<Vec<String>, DriverError> {
        let value = self.evaluate(CONSOLE_ERRORS).await?;
        Ok(json::from_value::<Option<Vec<String>>>(value)?.unwrap_or_default())
    }

    /// Drops every cookie, ending any server-side session.
    async fn clear_cookies(&self) -> Result<(), DriverError>;

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

#[derive(Clone, Debug)]
pub struct BrowserOptions {
    pub headless: bool,
    pub no_sandbox: bool,
    pub width: u16,
    pub height: u16,
    pub locale: String,
    pub executable: Option<PathBuf>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        BrowserOptions {
            headless: true,
            no_sandbox: false,
            width: 1366,
            height: 768,
            locale: "es-ES".to_string(),
            executable: None,
        }
    }
}

const FIND_ELEMENTS: &str = r#"(selector) =>
  Array.from(document.querySelectorAll(selector)).map((element) => {
    const style = window.getComputedStyle(element);
    const rect = element.getBoundingClientRect();
    const attributes = Object.fromEntries(
      Array.from(element.attributes).map((a) => [a.name, a.value]),
    );
    if (typeof element.href === "string") attributes.href = element.href;
    if (typeof element.src === "string") attributes.src = element.src;
    return {
      tag: element.tagName.toLowerCase(),
      text: (element.innerText || element.textContent || "").trim(),
      visible:
        style.display !== "none" &&
        style.visibility !== "hidden" &&
        (rect.width > 0 || rect.height > 0),
      labelled: (element.labels?.length ?? 0) > 0,
      attributes,
    };
  })"#;

const FILL: &str = r#"(selector, value) => {
  const element = document.querySelector(selector);
  if (!element) return false;
  element.focus();
  element.value = value;
  element.dispatchEvent(new Event("input", { bubbles: true }));
  element.dispatchEvent(new Event("change", { bubbles: true }));
  return true;
}"#;

// Installed before any page script runs.
const CONSOLE_ERRORS_HOOK: &str = r#"(() => {
  const errors = [];
  Object.defineProperty(window, "__sweepConsoleErrors", { value: errors });
  const forward = console.error.bind(console);
  console.error = (...args) => {
    errors.push(args.map((arg) => String(arg)).join(" "));
    forward(...args);
  };
  window.addEventListener("error", (event) => {
    errors.push(event.message || String(event.error));
  });
  window.addEventListener("unhandledrejection", (event) => {
    errors.push("Unhandled rejection: " + String(event.reason));
  });
})();"#;

// The click is deferred so a triggered navigation cannot tear down the
// execution context before the evaluation returns.
const CLICK: &str = r#"(selector) => {
  const element = document.querySelector(selector);
  if (!element) return false;
  setTimeout(() => element.click(), 0);
  return true;
}"#;

/// One Chromium process with a single page. The process is killed when the
/// driver is dropped.
pub struct ChromeDriver {
    page: Page,
    navigation_timeout: Duration,
    handler: JoinHandle<()>,
    // Field order matters: the profile directory must outlive the process.
    _browser: chromiumoxide::Browser,
    _user_data_directory: TempDir,
}

impl ChromeDriver {
    pub async fn launch(
        options: &BrowserOptions,
        navigation_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let user_data_directory = TempDir::new()?;
        let config =
            browser_options_to_config(options, user_data_directory.path())?;
        let (browser, mut handler) =
            chromiumoxide::Browser::launch(config).await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    log::debug!("chromium handler reported error: {}", error);
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        page.execute(
            emulation::SetDeviceMetricsOverrideParams::builder()
                .width(options.width)
                .height(options.height)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(DriverError::Launch)?,
        )
        .await?;

        page.execute(
            emulation::SetLocaleOverrideParams::builder()
                .locale(options.locale.clone())
                .build(),
        )
        .await?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            CONSOLE_ERRORS_HOOK,
        ))
        .await?;

        Ok(ChromeDriver {
            page,
            navigation_timeout,
            handler,
            _browser: browser,
            _user_data_directory: user_data_directory,
        })
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Driver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        log::debug!("navigating to {}", url);
        timeout(self.navigation_timeout, self.page.goto(url.to_string()))
            .await
            .map_err(|_| DriverError::Timeout {
                operation: format!("navigation to {}", url),
                after: self.navigation_timeout,
            })??;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.page.content().await?)
    }

    async fn find_elements(
        &self,
        selector: &str,
    ) -> Result<Vec<Element>, DriverError> {
        evaluate_function_call(
            &self.page,
            FIND_ELEMENTS,
            vec![json::Value::from(selector)],
        )
        .await
    }

    async fn fill(
        &self,
        selector: &str,
        value: &str,
    ) -> Result<(), DriverError> {
        let found: bool = evaluate_function_call(
            &self.page,
            FILL,
            vec![json::Value::from(selector), json::Value::from(value)],
        )
        .await?;
        if found {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let found: bool = evaluate_function_call(
            &self.page,
            CLICK,
            vec![json::Value::from(selector)],
        )
        .await?;
        if found {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn evaluate(
        &self,
        expression: &str,
    ) -> Result<json::Value, DriverError> {
        evaluate_expression(&self.page, expression).await
    }

    async fn clear_cookies(&self) -> Result<(), DriverError> {
        self.page.execute(ClearBrowserCookiesParams::default()).await?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        let data = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.page.clone().close().await?;
        Ok(())
    }
}

fn browser_options_to_config(
    browser_options: &BrowserOptions,
    user_data_directory: &Path,
) -> Result<BrowserConfig, DriverError> {
    let apply_sandbox =
        |builder: BrowserConfigBuilder| -> BrowserConfigBuilder {
            if browser_options.no_sandbox {
                builder.no_sandbox().args([
                    "--disable-setuid-sandbox",
                    "--disable-dev-shm-usage",
                ])
            } else {
                builder
            }
        };
    let apply_executable =
        |builder: BrowserConfigBuilder| -> BrowserConfigBuilder {
            if let Some(executable) = &browser_options.executable {
                builder.chrome_executable(executable)
            } else {
                builder
            }
        };
    apply_executable(apply_sandbox(BrowserConfig::builder()))
        .headless_mode(if browser_options.headless {
            HeadlessMode::New
        } else {
            HeadlessMode::False
        })
        .window_size(
            browser_options.width as u32,
            browser_options.height as u32,
        )
        .user_data_dir(user_data_directory)
        .args([
            format!("--lang={}", browser_options.locale),
            format!(
                "--crash-dumps-dir={}",
                user_data_directory.join("crashes").display()
            ),
            "--no-crashpad".to_string(),
            "--disable-crash-reporter".to_string(),
        ])
        .build()
        .map_err(DriverError::Launch)
}
