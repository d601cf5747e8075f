pub mod notifier;

pub use notifier::{deliver, format_booking_message, format_error_message, Notifier};
