pub mod browser;
pub mod config;
pub mod locker;
pub mod models;
pub mod monitor;
pub mod plugins;
pub mod scanner;
pub mod site;
pub mod utils;

// Re-export commonly used types
pub use browser::{Locator, PageDriver};
pub use config::AppConfig;
pub use locker::ReservationLocker;
pub use models::{BookingOutcome, CandidateSlot};
pub use monitor::{Monitor, MonitorExit, Shutdown};
pub use scanner::GridScanner;
pub use utils::error::{AppError, Result};
