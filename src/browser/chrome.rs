use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{LoadState, Locator, PageDriver, UrlPattern};
use crate::config::BrowserConfig;
use crate::utils::error::AppError;
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const DEFAULT_TAB_TIMEOUT: Duration = Duration::from_secs(30);
// The locked reservation can sit untouched for a long time while the
// operator finishes the form; the CDP connection must not be reaped meanwhile.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A launched Chrome process with the single tab the monitor works in.
pub struct ChromeBrowser {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeBrowser {
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        tracing::info!("Starting browser (headless={})", config.headless);

        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((1280, 1024)))
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
                std::ffi::OsStr::new("--disable-extensions"),
                std::ffi::OsStr::new("--disable-background-timer-throttling"),
                std::ffi::OsStr::new("--disable-backgrounding-occluded-windows"),
                std::ffi::OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(DEFAULT_TAB_TIMEOUT);

        tracing::debug!("Browser started successfully");
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn page(&self) -> ChromePage {
        ChromePage {
            tab: Arc::clone(&self.tab),
        }
    }

    /// Close the tab and let the browser process go down with `self`.
    pub fn close(self) {
        tracing::info!("Stopping browser");
        if let Err(e) = self.tab.close(true) {
            tracing::debug!("Tab close failed: {}", e);
        }
        tracing::debug!("Browser stopped successfully");
    }
}

/// [`PageDriver`] over a `headless_chrome` tab.
///
/// `headless_chrome` blocks the calling thread on every CDP round-trip, so
/// each call is moved onto the blocking pool.
#[derive(Clone)]
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| AppError::Internal(format!("browser task failed: {}", e)))?
    }

    async fn evaluate(&self, expression: String) -> Result<serde_json::Value> {
        self.blocking(move |tab| {
            let result = tab
                .evaluate(&expression, false)
                .map_err(|e| AppError::Browser(format!("Script evaluation failed: {}", e)))?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }
}

/// Absolute XPath of the `td` enclosing `this`, or null.
const ENCLOSING_CELL_XPATH: &str = r#"function() {
    let node = this.closest('td');
    if (!node) { return null; }
    const steps = [];
    for (; node && node.nodeType === 1; node = node.parentNode) {
        let index = 1;
        for (let sib = node.previousElementSibling; sib; sib = sib.previousElementSibling) {
            if (sib.nodeName === node.nodeName) { index += 1; }
        }
        steps.unshift(node.nodeName.toLowerCase() + '[' + index + ']');
    }
    return '/' + steps.join('/');
}"#;

fn nth_cell<'a>(tab: &'a Tab, selector: &str, index: usize) -> Option<Element<'a>> {
    let matches = tab.find_elements(selector).ok()?;
    let element = matches.into_iter().nth(index)?;
    let xpath = element
        .call_js_fn(ENCLOSING_CELL_XPATH, vec![], false)
        .ok()?
        .value?;
    tab.find_element_by_xpath(xpath.as_str()?).ok()
}

fn find<'a>(tab: &'a Tab, locator: &Locator) -> Result<Element<'a>> {
    let found = match locator {
        Locator::Css(selector) => tab.find_element(selector),
        Locator::CellOfNth { selector, index } => {
            return nth_cell(tab, selector, *index)
                .ok_or_else(|| AppError::element_not_found(locator.to_string()));
        }
        other => match other.to_xpath() {
            Some(xpath) => tab.find_element_by_xpath(&xpath),
            None => return Err(AppError::element_not_found(other.to_string())),
        },
    };
    found.map_err(|_| AppError::element_not_found(locator.to_string()))
}

fn call_on(tab: &Tab, locator: &Locator, function: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value> {
    let element = find(tab, locator)?;
    let result = element
        .call_js_fn(function, args, false)
        .map_err(|e| AppError::Browser(format!("Script on {} failed: {}", locator, e)))?;
    Ok(result.value.unwrap_or(serde_json::Value::Null))
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.set_default_timeout(timeout);
            let outcome = tab
                .navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| AppError::Navigation(format!("{}: {}", url, e)));
            tab.set_default_timeout(DEFAULT_TAB_TIMEOUT);
            outcome
        })
        .await
    }

    async fn content(&self) -> Result<String> {
        self.blocking(|tab| {
            tab.get_content()
                .map_err(|e| AppError::Browser(format!("Failed to get page content: {}", e)))
        })
        .await
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        let locator = locator.clone();
        self.blocking(move |tab| Ok(find(tab, &locator).is_ok())).await
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let locator = locator.clone();
        self.blocking(move |tab| {
            let element = find(tab, &locator)?;
            element
                .click()
                .map_err(|e| AppError::Browser(format!("Click on {} failed: {}", locator, e)))?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let locator = locator.clone();
        let value = value.to_string();
        self.blocking(move |tab| {
            call_on(
                tab,
                &locator,
                "function(v) { this.focus(); this.value = v; \
                 this.dispatchEvent(new Event('input', { bubbles: true })); \
                 this.dispatchEvent(new Event('change', { bubbles: true })); }",
                vec![json!(value)],
            )
            .map(|_| ())
        })
        .await
    }

    async fn is_checked(&self, locator: &Locator) -> Result<bool> {
        let locator = locator.clone();
        self.blocking(move |tab| {
            let value = call_on(tab, &locator, "function() { return this.checked === true; }", vec![])?;
            Ok(value.as_bool().unwrap_or(false))
        })
        .await
    }

    async fn force_check(&self, locator: &Locator) -> Result<()> {
        let locator = locator.clone();
        self.blocking(move |tab| {
            call_on(
                tab,
                &locator,
                "function() { this.checked = true; \
                 this.dispatchEvent(new Event('change', { bubbles: true })); }",
                vec![],
            )
            .map(|_| ())
        })
        .await
    }

    async fn wait_for_url(&self, pattern: &UrlPattern, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if pattern.matches(&self.tab.get_url()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout(format!("url {}", pattern), timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last_resources: Option<u64> = None;
        let mut quiet_since: Option<Instant> = None;

        loop {
            let status = self
                .evaluate(
                    "JSON.stringify({ ready: document.readyState, \
                       resources: performance.getEntriesByType('resource').length })"
                        .to_string(),
                )
                .await?;
            let status: serde_json::Value = match status.as_str() {
                Some(raw) => serde_json::from_str(raw)?,
                None => serde_json::Value::Null,
            };
            let ready = status.get("ready").and_then(|v| v.as_str()).unwrap_or("loading");
            let resources = status.get("resources").and_then(|v| v.as_u64()).unwrap_or(0);

            let reached = match state {
                LoadState::DomContentLoaded => ready == "interactive" || ready == "complete",
                LoadState::NetworkIdle => {
                    if ready == "complete" && last_resources == Some(resources) {
                        let since = *quiet_since.get_or_insert_with(Instant::now);
                        since.elapsed() >= NETWORK_QUIET
                    } else {
                        quiet_since = None;
                        false
                    }
                }
            };
            if reached {
                return Ok(());
            }

            last_resources = Some(resources);
            if Instant::now() >= deadline {
                return Err(AppError::timeout(format!("load state {:?}", state), timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn reload(&self, timeout: Duration) -> Result<()> {
        self.blocking(move |tab| {
            tab.set_default_timeout(timeout);
            let outcome = tab
                .reload(false, None)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| AppError::Navigation(format!("reload: {}", e)));
            tab.set_default_timeout(DEFAULT_TAB_TIMEOUT);
            outcome
        })
        .await?;
        self.wait_for_load(LoadState::NetworkIdle, timeout).await
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let data = self
            .blocking(|tab| {
                tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(|e| AppError::Browser(format!("Screenshot capture failed: {}", e)))
            })
            .await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }
}
