// Integration tests for the slot locker
// These tests drive the scanner, locker, monitor and session flow against
// an in-memory page instead of a real browser.

pub mod locker_tests;
pub mod monitor_tests;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use slot_locker::browser::{LoadState, UrlPattern};
use slot_locker::locker::LockTimings;
use slot_locker::plugins::traits::Notifier;
use slot_locker::{AppError, Locator, PageDriver, Result};

pub const BASE_URL: &str = "https://site.test/140007-u";
pub const GRID_URL: &str = "https://site.test/140007-u/reserve/facilitySelect_dateTrans?movePage=oneMonthLater";
pub const TIME_URL: &str = "https://site.test/140007-u/reserve/facilitySelect_decide";
pub const EXPLANATION_URL: &str = "https://site.test/140007-u/reserve/offerDetail_initDisplay";
pub const MAIL_URL: &str = "https://site.test/140007-u/reserve/offerDetail_mailto";

pub const DATES: [&str; 5] = [
    "01/19 (Mon)",
    "01/20 (Tue)",
    "01/21 (Wed)",
    "01/22 (Thu)",
    "01/23 (Fri)",
];

/// What clicking an element does to the fake page.
#[derive(Debug, Clone)]
pub enum ClickEffect {
    Navigate(String),
    Check(Locator),
}

#[derive(Debug, Default)]
pub struct FakeSite {
    /// Versions of each page; a reload moves to the next one if there is one.
    pub pages: HashMap<String, VecDeque<String>>,
    pub current: String,
    pub on_click: HashMap<Locator, ClickEffect>,
    pub checked: HashMap<Locator, bool>,
    pub clicks: Vec<Locator>,
    pub fills: Vec<(Locator, String)>,
    pub forced: Vec<Locator>,
    pub content_reads: usize,
    pub reloads: usize,
    pub failing_reloads: usize,
    pub screenshots: Vec<PathBuf>,
}

impl FakeSite {
    fn html(&self) -> Result<String> {
        self.pages
            .get(&self.current)
            .and_then(|versions| versions.front())
            .cloned()
            .ok_or_else(|| AppError::Navigation(format!("no page at {}", self.current)))
    }
}

/// In-memory [`PageDriver`]: pages are static HTML, clicks trigger scripted
/// effects, waits succeed or time out immediately.
#[derive(Clone, Default)]
pub struct FakePage {
    site: Arc<Mutex<FakeSite>>,
}

impl FakePage {
    pub fn new(start_url: &str) -> Self {
        let page = Self::default();
        page.site().current = start_url.to_string();
        page
    }

    pub fn with_page(self, url: &str, html: String) -> Self {
        self.site()
            .pages
            .entry(url.to_string())
            .or_default()
            .push_back(html);
        self
    }

    pub fn on_click(self, locator: Locator, effect: ClickEffect) -> Self {
        self.site().on_click.insert(locator, effect);
        self
    }

    pub fn failing_reloads(self, count: usize) -> Self {
        self.site().failing_reloads = count;
        self
    }

    pub fn site(&self) -> MutexGuard<'_, FakeSite> {
        self.site.lock().unwrap()
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.site().clicks.clone()
    }

    pub fn reloads(&self) -> usize {
        self.site().reloads
    }

    pub fn content_reads(&self) -> usize {
        self.site().content_reads
    }

    pub fn current(&self) -> String {
        self.site().current.clone()
    }
}

fn normalized(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outer HTML of the first element `locator` resolves to.
fn resolve(html: &str, locator: &Locator) -> Option<String> {
    let document = Html::parse_document(html);
    match locator {
        Locator::Css(css) => {
            let selector = Selector::parse(css).ok()?;
            document.select(&selector).next().map(|el| el.html())
        }
        Locator::Text { tag, text } => {
            let selector = Selector::parse(tag).ok()?;
            document
                .select(&selector)
                .find(|el| normalized(el).contains(text.as_ref()))
                .map(|el| el.html())
        }
        Locator::CellOf { id } => {
            let all = Selector::parse("*").ok()?;
            let target = document
                .select(&all)
                .find(|el| el.value().id() == Some(id.as_str()))?;
            enclosing_cell(target)
        }
        Locator::CellOfNth { selector, index } => {
            let selector = Selector::parse(selector).ok()?;
            let target = document.select(&selector).nth(*index)?;
            enclosing_cell(target)
        }
    }
}

fn enclosing_cell(element: ElementRef<'_>) -> Option<String> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "td")
        .map(|el| el.html())
}

fn has_checked_attribute(outer_html: &str) -> bool {
    let fragment = Html::parse_fragment(outer_html);
    let selector = Selector::parse("[checked]").unwrap();
    fragment.select(&selector).next().is_some()
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut site = self.site();
        if !site.pages.contains_key(url) {
            return Err(AppError::Navigation(format!("{}: net::ERR_NAME_NOT_RESOLVED", url)));
        }
        site.current = url.to_string();
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let mut site = self.site();
        site.content_reads += 1;
        site.html()
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.current())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        let html = self.site().html()?;
        Ok(resolve(&html, locator).is_some())
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let mut site = self.site();
        let html = site.html()?;
        if resolve(&html, locator).is_none() {
            return Err(AppError::element_not_found(locator.to_string()));
        }
        site.clicks.push(locator.clone());
        match site.on_click.get(locator).cloned() {
            Some(ClickEffect::Navigate(url)) => site.current = url,
            Some(ClickEffect::Check(target)) => {
                site.checked.insert(target, true);
            }
            None => {}
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        let mut site = self.site();
        let html = site.html()?;
        if resolve(&html, locator).is_none() {
            return Err(AppError::element_not_found(locator.to_string()));
        }
        site.fills.push((locator.clone(), value.to_string()));
        Ok(())
    }

    async fn is_checked(&self, locator: &Locator) -> Result<bool> {
        let site = self.site();
        let html = site.html()?;
        let element = resolve(&html, locator)
            .ok_or_else(|| AppError::element_not_found(locator.to_string()))?;
        Ok(site
            .checked
            .get(locator)
            .copied()
            .unwrap_or_else(|| has_checked_attribute(&element)))
    }

    async fn force_check(&self, locator: &Locator) -> Result<()> {
        let mut site = self.site();
        let html = site.html()?;
        if resolve(&html, locator).is_none() {
            return Err(AppError::element_not_found(locator.to_string()));
        }
        site.forced.push(locator.clone());
        site.checked.insert(locator.clone(), true);
        Ok(())
    }

    async fn wait_for_url(&self, pattern: &UrlPattern, timeout: Duration) -> Result<()> {
        if pattern.matches(&self.current()) {
            Ok(())
        } else {
            Err(AppError::timeout(format!("url {}", pattern), timeout))
        }
    }

    async fn wait_for_load(&self, _state: LoadState, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn reload(&self, _timeout: Duration) -> Result<()> {
        let mut site = self.site();
        site.reloads += 1;
        if site.failing_reloads > 0 {
            site.failing_reloads -= 1;
            return Err(AppError::Navigation("reload: net::ERR_NETWORK_CHANGED".to_string()));
        }
        let current = site.current.clone();
        if let Some(versions) = site.pages.get_mut(&current) {
            if versions.len() > 1 {
                versions.pop_front();
            }
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG")?;
        self.site().screenshots.push(path.to_path_buf());
        Ok(())
    }
}

/// Notifier that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "Recording"
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        if self.fail {
            Err(AppError::Notification("Telegram API error: 401 Unauthorized".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn instant_timings() -> LockTimings {
    LockTimings {
        after_click: Duration::ZERO,
        page_wait: Duration::from_millis(10),
        time_settle: Duration::ZERO,
        agree_settle: Duration::ZERO,
    }
}

pub fn slot_link(row: usize, td: usize) -> Locator {
    Locator::owned_css(format!(
        "tr[id='height_auto_{}'] > td:nth-of-type({}) a.enable.nooutline",
        row, td
    ))
}

/// Facility grid page. Cells: `o` available, `x` unavailable, `-` out of period.
pub fn grid_page(consent_checked: bool, rows: &[(&str, &str)]) -> String {
    let mut html = format!(
        "<html><body><form>\
         <label for='reserveCaution'><input type='checkbox' id='reserveCaution'{}>上記内容に同意する</label>\
         <table id='TBL' class='time--table'><tbody><tr id='height_headday'>\
         <th class='time--table' rowspan='3'>運転免許試験場</th><th class='time--table'>予約枠名</th>",
        if consent_checked { " checked" } else { "" }
    );
    for date in DATES {
        let (day, weekday) = date.split_once(' ').unwrap();
        html.push_str(&format!(
            "<td class='time--table time--th--date'>{}<br>{}</td>",
            day, weekday
        ));
    }
    html.push_str("</tr>");

    for (i, (category, cells)) in rows.iter().enumerate() {
        html.push_str(&format!(
            "<tr id='height_auto_{}'><th class='time--table time--th main_color'>{}</th>",
            i + 1,
            category
        ));
        for cell in cells.chars() {
            html.push_str(match cell {
                'o' => "<td class='time--table time--th--date tdSelect enable'>\
                        <a class='enable nooutline' href='javascript:void(0)'>\
                        <svg aria-label='予約可能'></svg></a></td>",
                '-' => "<td class='time--table time--th--date time--cell--tri none'>\
                        <svg aria-label='時間外'></svg></td>",
                _ => "<td class='time--table time--th--date disable'><svg aria-label='空き無'></svg></td>",
            });
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table></form></body></html>");
    html
}

/// Time selection page. Each slot is `(enabled, id, label)`.
pub fn time_page(slots: &[(bool, &str, &str)], submit: &str) -> String {
    let mut html = String::from("<html><body><table><tr>");
    for (enabled, id, label) in slots {
        html.push_str(&format!(
            "<td class='{}'><input type='checkbox' class='checkbox_hide' id='{}'>\
             <label for='{}'>{}</label></td>",
            if *enabled { "enable" } else { "disable" },
            id,
            id,
            label
        ));
    }
    html.push_str("</tr></table>");
    html.push_str(submit);
    html.push_str("</body></html>");
    html
}

pub const SUBMIT_PRIMARY: &str =
    "<button type='button' onclick='showWarningPossibleCntOver();'>予約する</button>";
pub const SUBMIT_TEXT_ONLY: &str = "<button type='button' class='btn'>予約する</button>";

pub fn explanation_page(agree: &str) -> String {
    format!(
        "<html><body><h2>手続き説明</h2><form>{}</form></body></html>",
        agree
    )
}

pub const AGREE_PRIMARY: &str = "<input type='submit' value='同意する' id='ok'>";
pub const AGREE_ID_ONLY: &str = "<input type='submit' value='同意して進む' id='ok'>";

/// Grid → time selection → explanation, all wired up.
pub fn booking_site(grid: String, time: String, explanation: String) -> FakePage {
    FakePage::new(GRID_URL)
        .with_page(GRID_URL, grid)
        .with_page(TIME_URL, time)
        .with_page(EXPLANATION_URL, explanation)
        .with_page(MAIL_URL, "<html><body>メールアドレス</body></html>".to_string())
        .on_click(slot_link(1, 2), ClickEffect::Navigate(TIME_URL.to_string()))
        .on_click(
            Locator::css("button[onclick*=\"showWarningPossibleCntOver\"]"),
            ClickEffect::Navigate(EXPLANATION_URL.to_string()),
        )
        .on_click(
            Locator::text("button", "予約する"),
            ClickEffect::Navigate(EXPLANATION_URL.to_string()),
        )
        .on_click(
            Locator::css("input[type=\"submit\"][value=\"同意する\"]"),
            ClickEffect::Navigate(MAIL_URL.to_string()),
        )
        .on_click(Locator::css("input#ok"), ClickEffect::Navigate(MAIL_URL.to_string()))
}
