//! Getting a fresh browser onto the facility grid: log in, then step from
//! the offer detail page to next month's grid.
//!
//! Everything here runs once at start-up and any failure is fatal to the run.

use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{click_first, describe, first_present, LoadState, Locator, PageDriver};
use crate::config::Credentials;
use crate::scanner::{ensure_consent, ConsentState};
use crate::site::{self, SiteUrls};
use crate::utils::error::AppError;
use crate::Result;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
const FACILITY_URL_TIMEOUT: Duration = Duration::from_secs(10);
const FACILITY_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

pub const LOGIN_ERROR_SCREENSHOT: &str = "login_error.png";
pub const NAVIGATION_ERROR_SCREENSHOT: &str = "navigation_error.png";

#[derive(Debug, Clone)]
pub struct SessionFlow {
    urls: SiteUrls,
    screenshot_dir: PathBuf,
    login_settle: Duration,
    click_settle: Duration,
}

impl SessionFlow {
    pub fn new(urls: SiteUrls, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            urls,
            screenshot_dir: screenshot_dir.into(),
            login_settle: Duration::from_secs(2),
            click_settle: Duration::from_secs(1),
        }
    }

    /// Replace both fixed settle pauses.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.login_settle = settle;
        self.click_settle = settle;
        self
    }

    pub async fn login(&self, page: &dyn PageDriver, credentials: &Credentials) -> Result<()> {
        let login_url = self.urls.login();
        tracing::info!("Navigating to login page: {}", login_url);
        page.goto(&login_url, NAVIGATION_TIMEOUT).await?;

        match self.submit_login(page, credentials).await {
            Ok(()) => {
                tracing::info!("✓ Login successful");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Error during login: {}", e);
                self.capture(page, LOGIN_ERROR_SCREENSHOT).await;
                Err(e)
            }
        }
    }

    async fn submit_login(&self, page: &dyn PageDriver, credentials: &Credentials) -> Result<()> {
        tracing::debug!("Entering email: {}", credentials.email);
        fill_first(page, site::LOGIN_USER_ID, &credentials.email).await?;
        tracing::debug!("Entering password");
        fill_first(page, site::LOGIN_PASSWORD, &credentials.password).await?;

        tracing::info!("Clicking login button");
        click_first(page, site::LOGIN_BUTTON).await?;
        page.wait_for_load(LoadState::DomContentLoaded, LOGIN_LOAD_TIMEOUT)
            .await?;
        tokio::time::sleep(self.login_settle).await;

        let current_url = page.current_url().await?;
        if current_url.contains(site::LOGIN_URL_MARKER) {
            let message = login_error_text(&page.content().await?)
                .unwrap_or_else(|| "Still on login page".to_string());
            return Err(AppError::Login(message));
        }
        Ok(())
    }

    /// From the offer detail page, move one month ahead onto the facility grid
    /// and tick the consent box.
    pub async fn open_facility_page(&self, page: &dyn PageDriver) -> Result<()> {
        let initial_url = self.urls.offer_detail();
        tracing::info!("Navigating to initial page: {}", initial_url);
        page.goto(&initial_url, NAVIGATION_TIMEOUT).await?;

        match self.advance_to_grid(page).await {
            Ok(()) => {
                tracing::info!("✓ Ready to start monitoring for available slots");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Error during navigation flow: {}", e);
                self.capture(page, NAVIGATION_ERROR_SCREENSHOT).await;
                Err(e)
            }
        }
    }

    async fn advance_to_grid(&self, page: &dyn PageDriver) -> Result<()> {
        tracing::info!("Clicking '1か月後' button to navigate to facility selection page");
        let clicked = click_first(page, site::ONE_MONTH_LATER_BUTTON).await?;
        tracing::debug!("Found '1か月後' button with selector: {}", clicked);
        tracing::info!("✓ Clicked '1か月後' button");

        tokio::time::sleep(self.click_settle).await;
        page.wait_for_url(&site::facility_page(), FACILITY_URL_TIMEOUT).await?;
        page.wait_for_load(LoadState::DomContentLoaded, FACILITY_LOAD_TIMEOUT)
            .await?;
        tracing::info!("✓ Arrived at facility selection page");

        match ensure_consent(page).await? {
            ConsentState::AlreadyChecked | ConsentState::Checked => {
                tracing::info!("✓ Agreement checkbox checked")
            }
            ConsentState::Missing | ConsentState::Unconfirmed => {
                tracing::warn!("Could not find agreement checkbox, attempting to continue anyway")
            }
        }
        Ok(())
    }

    /// Best-effort screenshot for post-mortem.
    async fn capture(&self, page: &dyn PageDriver, file_name: &str) {
        let path = self.screenshot_dir.join(file_name);
        match page.screenshot(&path).await {
            Ok(()) => tracing::info!("Screenshot saved to {}", path.display()),
            Err(e) => tracing::debug!("Could not save screenshot {}: {}", path.display(), e),
        }
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }
}

async fn fill_first(page: &dyn PageDriver, chain: &[Locator], value: &str) -> Result<()> {
    match first_present(page, chain).await? {
        Some(locator) => page.fill(locator, value).await,
        None => Err(AppError::element_not_found(describe(chain))),
    }
}

fn login_error_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(site::LOGIN_ERROR_MESSAGE).ok()?;
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}
