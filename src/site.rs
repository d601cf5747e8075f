//! Fixed contract with the Kanagawa e-Shinsei reservation pages.
//!
//! Any drift in these values breaks detection or locking; there is no
//! adaptive fallback beyond the ordered alternatives listed per control.

use crate::browser::{Locator, UrlPattern};

pub const DEFAULT_BASE_URL: &str = "https://dshinsei.e-kanagawa.lg.jp/140007-u";

pub const LOGIN_PATH: &str = "/profile/userLogin";
pub const OFFER_DETAIL_PATH: &str = "/reserve/offerList_detail?tempSeq=50909&accessFrom=offerList";
pub const FACILITY_PATH: &str = "/reserve/facilitySelect_dateTrans?movePage=oneMonthLater";

pub const FACILITY_URL_GLOB: &str = "**/facilitySelect_dateTrans**";
pub const TIME_SELECTION_URL_GLOB: &str = "**/facilitySelect_decide**";
pub const PROCEDURE_EXPLANATION_URL_GLOB: &str = "**/offerDetail_initDisplay**";

/// Reservation frame names shown as row headers in the grid.
pub const VALID_CATEGORIES: [&str; 12] = [
    "普通車ＡＭ",
    "普通車ＰＭ",
    "準中型車ＡＭ",
    "準中型車ＰＭ",
    "大型車ＡＭ",
    "大型車ＰＭ",
    "大型特殊車ＡＭ",
    "大型特殊車ＰＭ",
    "けん引車ＡＭ",
    "けん引車ＰＭ",
    "大型二輪車ＡＭ",
    "大型二輪車ＰＭ",
];

// Consent checkbox. It is hidden inside a label, clicking the label toggles it.
pub const CONSENT_CHECKBOX: Locator = Locator::css("input#reserveCaution[type='checkbox']");
pub const CONSENT_LABEL: Locator = Locator::css("label[for='reserveCaution']");

// Grid structure.
pub const DATE_HEADER_CELLS: &str = "tr#height_headday td.time--table.time--th--date";
pub const CATEGORY_ROWS: &str = "tr[id^='height_auto_']";
pub const CATEGORY_NAME_CELL: &str = "th.time--table.time--th.main_color";
pub const AVAILABLE_SLOT_LINK: &str = "a.enable.nooutline";

// Cell state classes.
pub const AVAILABLE_CLASSES: [&str; 2] = ["tdSelect", "enable"];
pub const UNAVAILABLE_CLASS: &str = "disable";
pub const OUT_OF_PERIOD_CLASSES: [&str; 2] = ["time--cell--tri", "none"];

// Time selection page.
pub const TIME_CHECKBOXES: &str = "input[type=\"checkbox\"].checkbox_hide";
pub const ENABLED_TIME_CELL_CLASS: &str = "enable";

pub const SUBMIT_BUTTON: &[Locator] = &[
    Locator::css("button[onclick*=\"showWarningPossibleCntOver\"]"),
    Locator::text("button", "予約する"),
];

// Procedure explanation page.
pub const AGREE_BUTTON: &[Locator] = &[
    Locator::css("input[type=\"submit\"][value=\"同意する\"]"),
    Locator::css("input#ok"),
];

// Login page.
pub const LOGIN_USER_ID: &[Locator] = &[
    Locator::css("input#userLoginForm\\.userId"),
    Locator::css("input[name=\"userId\"]"),
];
pub const LOGIN_PASSWORD: &[Locator] = &[
    Locator::css("input#userLoginForm\\.userPasswd"),
    Locator::css("input[name=\"userPasswd\"]"),
];
pub const LOGIN_BUTTON: &[Locator] = &[
    Locator::css("input[type=\"submit\"][value=\"ログイン\"]"),
    Locator::css("input[type=\"submit\"]"),
];
pub const LOGIN_ERROR_MESSAGE: &str = ".errorMessage, .error, .alert";
pub const LOGIN_URL_MARKER: &str = "userLogin";

// Offer detail page: moves the grid one month ahead, landing on the facility page.
pub const ONE_MONTH_LATER_BUTTON: &[Locator] = &[
    Locator::css("input[type='button'][value='1か月後＞']"),
    Locator::css("input[type='button'][title='1か月後に進む']"),
    Locator::css("input[type='button'][onclick*='oneMonthLater']"),
    Locator::css("input[type='button'].button[value*='1か月後']"),
    Locator::css("input[type='button'][value*='1か月後']"),
    Locator::text("button", "1か月後"),
    Locator::text("a", "1か月後"),
];

/// Absolute URLs of the pages the session visits.
#[derive(Debug, Clone)]
pub struct SiteUrls {
    base: String,
}

impl SiteUrls {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn login(&self) -> String {
        format!("{}{}", self.base, LOGIN_PATH)
    }

    pub fn offer_detail(&self) -> String {
        format!("{}{}", self.base, OFFER_DETAIL_PATH)
    }

    pub fn facility(&self) -> String {
        format!("{}{}", self.base, FACILITY_PATH)
    }
}

impl Default for SiteUrls {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

pub fn facility_page() -> UrlPattern {
    UrlPattern::new(FACILITY_URL_GLOB)
}

pub fn time_selection_page() -> UrlPattern {
    UrlPattern::new(TIME_SELECTION_URL_GLOB)
}

pub fn procedure_explanation_page() -> UrlPattern {
    UrlPattern::new(PROCEDURE_EXPLANATION_URL_GLOB)
}
