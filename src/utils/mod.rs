pub mod error;
pub mod retry;

pub use error::{AppError, ErrorClass};
pub use retry::{retry_with_backoff, BackoffPolicy};
