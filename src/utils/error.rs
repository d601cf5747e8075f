use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Timeout after {}ms waiting for {what}", .after.as_millis())]
    Timeout { what: String, after: Duration },

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the monitor loop reacts to a caught error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or a wait that ran out. Retried after the poll interval.
    Transient,
    /// The page did not have the shape we expected.
    Structural,
    Unclassified,
}

impl AppError {
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        AppError::ElementNotFound {
            selector: selector.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        AppError::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Http(_) | AppError::Timeout { .. } | AppError::Navigation(_) => {
                ErrorClass::Transient
            }
            AppError::ElementNotFound { .. } | AppError::Parse { .. } => ErrorClass::Structural,
            // Driver errors arrive as plain text, sort them by what they say.
            AppError::Browser(message) => classify_message(message),
            _ => ErrorClass::Unclassified,
        }
    }
}

/// Classify an error that did not originate as an [`AppError`].
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    match error.downcast_ref::<AppError>() {
        Some(app_error) => app_error.class(),
        None => classify_message(&error.to_string()),
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if lowered.contains("network") || lowered.contains("timeout") || lowered.contains("timed out") {
        ErrorClass::Transient
    } else if lowered.contains("element") || lowered.contains("selector") {
        ErrorClass::Structural
    } else {
        ErrorClass::Unclassified
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
