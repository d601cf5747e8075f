use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::site::{DEFAULT_BASE_URL, VALID_CATEGORIES};

pub const DEFAULT_REFRESH_INTERVAL: u64 = 5;
pub const VALID_LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub credentials: Credentials,
    pub target_categories: Vec<String>,
    /// Seconds between scans.
    pub refresh_interval: u64,
    pub browser: BrowserConfig,
    pub test_mode: bool,
    pub log_level: String,
    pub site_base_url: String,
    /// Problems found while reading raw settings, reported by `validate`.
    #[serde(skip)]
    load_problems: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub chrome_path: Option<String>,
}

/// Every problem found while loading or validating, reported together.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Configuration errors:\n{}", bullet_list(.0))]
pub struct ConfigErrors(pub Vec<String>);

fn bullet_list(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {}", p))
        .collect::<Vec<_>>()
        .join("\n")
}

impl AppConfig {
    /// Load `.env`, an optional `config/default.*` file and the process
    /// environment. The result still needs [`AppConfig::validate`].
    pub fn load() -> Result<Self, ConfigErrors> {
        let _ = dotenvy::dotenv();

        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::default())
            .build()
            .map_err(|e| ConfigErrors(vec![e.to_string()]))?;

        Self::from_settings(&settings)
    }

    /// Build a config from raw settings. Unparsable values fall back to
    /// their defaults and are reported later by [`AppConfig::validate`].
    pub fn from_settings(settings: &Config) -> Result<Self, ConfigErrors> {
        let mut load_problems = Vec::new();

        let refresh_interval = match setting(settings, "refresh_interval") {
            None => DEFAULT_REFRESH_INTERVAL,
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                load_problems.push(format!(
                    "REFRESH_INTERVAL must be a whole number of seconds (got {})",
                    raw
                ));
                DEFAULT_REFRESH_INTERVAL
            }),
        };

        let target_categories = setting(settings, "target_categories")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(AppConfig {
            telegram: TelegramConfig {
                bot_token: setting(settings, "telegram_bot_token").unwrap_or_default(),
                chat_id: setting(settings, "telegram_chat_id").unwrap_or_default(),
            },
            credentials: Credentials {
                email: setting(settings, "user_email").unwrap_or_default(),
                password: setting(settings, "user_password").unwrap_or_default(),
            },
            target_categories,
            refresh_interval,
            browser: BrowserConfig {
                headless: flag(settings, "headless", true),
                chrome_path: setting(settings, "chrome_path"),
            },
            test_mode: flag(settings, "test_mode", false),
            log_level: setting(settings, "log_level")
                .map(|l| l.to_uppercase())
                .unwrap_or_else(|| "INFO".to_string()),
            site_base_url: setting(settings, "site_base_url")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            load_problems,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigErrors> {
        let mut problems = self.load_problems.clone();

        if self.telegram.bot_token.is_empty() {
            problems.push("TELEGRAM_BOT_TOKEN is required".to_string());
        }
        if self.telegram.chat_id.is_empty() {
            problems.push("TELEGRAM_CHAT_ID is required".to_string());
        }
        if self.credentials.email.is_empty() {
            problems.push("USER_EMAIL is required".to_string());
        }
        if self.credentials.password.is_empty() {
            problems.push("USER_PASSWORD is required".to_string());
        }

        if self.target_categories.is_empty() {
            problems.push("TARGET_CATEGORIES is required (at least one category)".to_string());
        }
        for category in &self.target_categories {
            if !VALID_CATEGORIES.contains(&category.as_str()) {
                problems.push(format!(
                    "Invalid category: {}. Valid categories: {}",
                    category,
                    VALID_CATEGORIES.join(", ")
                ));
            }
        }

        if self.refresh_interval < 1 {
            problems.push("REFRESH_INTERVAL must be at least 1 second".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            problems.push(format!(
                "Invalid LOG_LEVEL: {}. Valid levels: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if Url::parse(&self.site_base_url).is_err() {
            problems.push(format!("Invalid SITE_BASE_URL: {}", self.site_base_url));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors(problems))
        }
    }

    /// `tracing` filter directive for the configured level.
    pub fn tracing_level(&self) -> &'static str {
        match self.log_level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

fn setting(settings: &Config, key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag(settings: &Config, key: &str, default: bool) -> bool {
    match setting(settings, key) {
        Some(value) => matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}
