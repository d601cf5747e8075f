use async_trait::async_trait;

use crate::models::BookingOutcome;
use crate::Result;

/// One-way channel to the operator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `text` (Telegram-flavoured HTML).
    async fn send(&self, text: &str) -> Result<()>;
}

/// Send without letting a failure escape. Notification trouble never
/// changes what happened to the booking.
pub async fn deliver(notifier: &dyn Notifier, message: &str) {
    match notifier.send(message).await {
        Ok(()) => tracing::info!("{} notification sent successfully", notifier.name()),
        Err(e) => tracing::error!("Failed to send {} notification: {}", notifier.name(), e),
    }
}

/// Escape the characters Telegram's HTML mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn with_mode(message: String, test_mode: bool) -> String {
    if test_mode {
        format!("[TEST MODE]\n{}", message)
    } else {
        message
    }
}

pub fn format_booking_message(outcome: &BookingOutcome, test_mode: bool) -> String {
    let message = if outcome.success {
        format!(
            "🎉 <b>予約ロック成功！</b>\n\n\
             📋 <b>Category:</b> {}\n\
             📅 <b>Date:</b> {}\n\
             ⏰ <b>Time:</b> {}\n\n\
             ⚠️ <b>重要：</b>\n\
             予約はロックされましたが、まだ完了していません。\n\n\
             📝 <b>次のステップ：</b>\n\
             1. ブラウザで残りのフォームを入力してください\n\
             2. すべての情報を入力して送信してください\n\
             3. 確認メールが届くまで待ってください\n\n\
             💻 ブラウザは開いたままになっています。\n\
             今すぐフォームを完成させてください！",
            escape_html(&outcome.category),
            escape_html(&outcome.date),
            escape_html(&outcome.selected_time),
        )
    } else {
        format!(
            "❌ <b>予約失敗</b>\n\n\
             📋 <b>Category:</b> {}\n\
             📅 <b>Date:</b> {}\n\
             ⚠️ <b>Error:</b> {}\n\n\
             システムは引き続き空き枠を監視します。",
            escape_html(&outcome.category),
            escape_html(&outcome.date),
            escape_html(outcome.error_detail.as_deref().unwrap_or("Unknown error")),
        )
    };
    with_mode(message, test_mode)
}

pub fn format_error_message(error: &str, test_mode: bool) -> String {
    with_mode(
        format!("⚠️ Booking System Error\n\n{}", escape_html(error)),
        test_mode,
    )
}
