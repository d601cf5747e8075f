pub mod notifiers;
pub mod traits;

pub use notifiers::TelegramNotifier;
pub use traits::Notifier;
