//! The page capability the scanner, locker and monitor drive.
//!
//! Everything here is expressed in terms of a single open page. The core never
//! holds element references across calls; elements are addressed by
//! [`Locator`] and re-resolved on every interaction.

pub mod chrome;
pub mod session;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::utils::error::AppError;
use crate::Result;

pub use chrome::{ChromeBrowser, ChromePage};

/// How to find an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locator {
    Css(Cow<'static, str>),
    /// First `tag` element whose normalized text contains `text`.
    Text {
        tag: Cow<'static, str>,
        text: Cow<'static, str>,
    },
    /// Nearest `td` enclosing the element with this id.
    CellOf { id: String },
    /// Nearest `td` enclosing the `index`-th (0-based) match of a CSS selector.
    CellOfNth {
        selector: Cow<'static, str>,
        index: usize,
    },
}

impl Locator {
    pub const fn css(selector: &'static str) -> Self {
        Locator::Css(Cow::Borrowed(selector))
    }

    pub const fn text(tag: &'static str, text: &'static str) -> Self {
        Locator::Text {
            tag: Cow::Borrowed(tag),
            text: Cow::Borrowed(text),
        }
    }

    pub fn owned_css(selector: impl Into<String>) -> Self {
        Locator::Css(Cow::Owned(selector.into()))
    }

    pub fn cell_of(id: impl Into<String>) -> Self {
        Locator::CellOf { id: id.into() }
    }

    pub const fn cell_of_nth(selector: &'static str, index: usize) -> Self {
        Locator::CellOfNth {
            selector: Cow::Borrowed(selector),
            index,
        }
    }

    /// XPath equivalent for locators CSS cannot express.
    pub fn to_xpath(&self) -> Option<String> {
        match self {
            Locator::Css(_) | Locator::CellOfNth { .. } => None,
            Locator::Text { tag, text } => Some(format!(
                "//{}[contains(normalize-space(.), {})]",
                tag,
                xpath_literal(text)
            )),
            Locator::CellOf { id } => Some(format!(
                "//*[@id={}]/ancestor::td[1]",
                xpath_literal(id)
            )),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "{}", selector),
            Locator::Text { tag, text } => write!(f, "{}:has-text('{}')", tag, text),
            Locator::CellOf { id } => write!(f, "td enclosing #{}", id),
            Locator::CellOfNth { selector, index } => write!(f, "td enclosing {} [{}]", selector, index),
        }
    }
}

fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Describe an ordered list of locators for error messages.
pub fn describe(chain: &[Locator]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// First locator in `chain` that resolves on the current page.
pub async fn first_present<'a>(page: &dyn PageDriver, chain: &'a [Locator]) -> Result<Option<&'a Locator>> {
    for locator in chain {
        if page.exists(locator).await? {
            return Ok(Some(locator));
        }
    }
    Ok(None)
}

/// Click the first locator in `chain` that resolves.
pub async fn click_first<'a>(page: &dyn PageDriver, chain: &'a [Locator]) -> Result<&'a Locator> {
    match first_present(page, chain).await? {
        Some(locator) => {
            page.click(locator).await?;
            Ok(locator)
        }
        None => Err(AppError::element_not_found(describe(chain))),
    }
}

/// URL glob: `**` matches anything, `*` anything but `/`.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    glob: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(glob: &str) -> Self {
        let mut pattern = String::from("^");
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    pattern.push_str(".*");
                } else {
                    pattern.push_str("[^/]*");
                }
            } else {
                pattern.push_str(&regex::escape(&c.to_string()));
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).expect("escaped glob is a valid regex");
        Self {
            glob: glob.to_string(),
            regex,
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glob)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    /// Document complete and no new network resources for a short quiet period.
    NetworkIdle,
}

/// A single live page in a browser session.
///
/// Timeouts are chosen by the caller per call site. A failed lookup is an
/// [`AppError::ElementNotFound`](crate::AppError::ElementNotFound), a wait that
/// runs out is an [`AppError::Timeout`](crate::AppError::Timeout).
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Serialized HTML of the current document.
    async fn content(&self) -> Result<String>;

    async fn current_url(&self) -> Result<String>;

    async fn exists(&self, locator: &Locator) -> Result<bool>;

    async fn click(&self, locator: &Locator) -> Result<()>;

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()>;

    async fn is_checked(&self, locator: &Locator) -> Result<bool>;

    /// Set `checked` directly and dispatch a `change` event.
    async fn force_check(&self, locator: &Locator) -> Result<()>;

    async fn wait_for_url(&self, pattern: &UrlPattern, timeout: Duration) -> Result<()>;

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<()>;

    async fn reload(&self, timeout: Duration) -> Result<()>;

    async fn screenshot(&self, path: &Path) -> Result<()>;
}
